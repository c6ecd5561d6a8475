//! Runtime error representation.
//!
//! Every failing operation produces a [`VmError`] carrying the wire-level
//! [`Fault`] code, the reporting site, the index the site was working on and
//! a depth counter that grows as the error surfaces through callers. The
//! same data, stamped with tick time, becomes a wire log record.

use blockflow_asm::Fault;
use core::fmt;
use thiserror::Error;

/// How the driver reacts to a non-OK result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Severity {
    /// Terminates the current tick (or the current control operation).
    Abort,
    /// Logged; execution continues.
    Warning,
    /// Logged; purely informational.
    Notice,
}

/// Reporting site of an error or report record, serialized as `u16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
#[allow(missing_docs)]
pub enum Owner {
    ContextAllocate = 1,
    ContextDelete,
    ContextParse,
    InstanceCreate,
    InstanceParse,
    ScalarDataParse,
    ArrayDataParse,
    AccessAllocate,
    AccessParse,
    MemGet,
    MemSet,
    ParseDispatch,
    CodeCfgParse,
    BlockHeaderParse,
    BlockInputParse,
    BlockOutputParse,
    BlockDataParse,
    VerifyCode,
    ExecuteCode,
    LoopInit,
    LoopStart,
    LoopStop,
    LoopSetPeriod,
    LoopRunOnce,
    BlockMath,
    BlockLogic,
    BlockLatch,
    BlockCounter,
    BlockClock,
    BlockTimer,
    BlockSet,
    BlockFor,
    BlockInSelector,
    BlockQSelector,
    BlockCheckEn,
    BlockSetOutput,
    SubCfgParse,
    SubAddParse,
    Controller,
    DebugStep,
    DebugDump,
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Error value returned by every fallible engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{owner}[{owner_idx}]: {fault} (severity {severity:?}, depth {depth})")]
pub struct VmError {
    /// Wire-level fault code.
    pub fault: Fault,
    /// Site that produced or last surfaced the error.
    pub owner: Owner,
    /// Index the site was working on (block idx, context id, ...).
    pub owner_idx: u16,
    /// Number of callers the error has surfaced through.
    pub depth: u8,
    /// Driver reaction.
    pub severity: Severity,
}

impl VmError {
    /// A tick/operation-terminating error.
    pub const fn abort(fault: Fault, owner: Owner, owner_idx: u16) -> Self {
        Self {
            fault,
            owner,
            owner_idx,
            depth: 0,
            severity: Severity::Abort,
        }
    }

    /// A logged, non-terminating error.
    pub const fn warning(fault: Fault, owner: Owner, owner_idx: u16) -> Self {
        Self {
            fault,
            owner,
            owner_idx,
            depth: 0,
            severity: Severity::Warning,
        }
    }

    /// An informational record.
    pub const fn notice(fault: Fault, owner: Owner, owner_idx: u16) -> Self {
        Self {
            fault,
            owner,
            owner_idx,
            depth: 0,
            severity: Severity::Notice,
        }
    }

    /// Surface a child error: the fault and severity are preserved, the
    /// reporting site moves to the caller and the depth grows by one.
    pub fn chain(mut self, owner: Owner, owner_idx: u16) -> Self {
        self.owner = owner;
        self.owner_idx = owner_idx;
        self.depth = self.depth.saturating_add(1);
        self
    }

    /// True when this error terminates the current tick.
    pub const fn is_abort(&self) -> bool {
        matches!(self.severity, Severity::Abort)
    }

    /// Flag byte of the wire record: `abort | warning << 1 | notice << 2`.
    pub const fn flags(&self) -> u8 {
        match self.severity {
            Severity::Abort => 1,
            Severity::Warning => 1 << 1,
            Severity::Notice => 1 << 2,
        }
    }
}

/// Shorthand result alias used across the engine.
pub type VmResult<T> = Result<T, VmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_preserves_fault_and_grows_depth() {
        let inner = VmError::abort(Fault::MemOutOfBounds, Owner::MemGet, 0);
        let outer = inner.chain(Owner::BlockSet, 7).chain(Owner::ExecuteCode, 7);
        assert_eq!(outer.fault, Fault::MemOutOfBounds);
        assert_eq!(outer.owner, Owner::ExecuteCode);
        assert_eq!(outer.depth, 2);
        assert!(outer.is_abort());
    }

    #[test]
    fn flag_bits() {
        assert_eq!(VmError::abort(Fault::Deny, Owner::Controller, 0).flags(), 0b001);
        assert_eq!(VmError::warning(Fault::Deny, Owner::Controller, 0).flags(), 0b010);
        assert_eq!(VmError::notice(Fault::Deny, Owner::Controller, 0).flags(), 0b100);
    }
}

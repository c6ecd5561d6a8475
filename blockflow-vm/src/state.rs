//! Execution and loop state representation.

use core::fmt;

/// Resulting state of one block execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockOutcome {
    /// The block ran and produced its outputs.
    Executed,
    /// The block did not run this tick (inputs not ready or EN low).
    /// This is not a failure and is never logged to the wire.
    Inactive,
}

impl BlockOutcome {
    /// True when the block produced outputs this tick.
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Executed)
    }
}

/// Lifecycle state of the periodic loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LoopStatus {
    /// Driver constructed, never started.
    #[default]
    Created,
    /// Ticks are being delivered and executed.
    Running,
    /// Paused by request; resumable.
    Stopped,
    /// Stopped by the watchdog; requires an explicit start to resume.
    Halted,
}

impl fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

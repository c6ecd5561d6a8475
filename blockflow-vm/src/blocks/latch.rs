//! SR/RS latch block.
//!
//! Inputs: `EN`, `S`, `R`. Output 0 holds the latched boolean and is
//! marked updated on every active tick. Set wins in SR mode, reset wins
//! in RS mode when both lines are high.

use super::{in_true, set_output, Block, BlockState};
use crate::error::{Owner, VmError, VmResult};
use crate::memory::Memory;
use crate::state::BlockOutcome;
use blockflow_asm::{BlockPacket, Fault, Unpacker};
use blockflow_types::Value;

const IN_EN: usize = 0;
const IN_SET: usize = 1;
const IN_RESET: usize = 2;

/// Dominance mode of the latch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum LatchMode {
    /// Set dominates: `S & R` latches high.
    #[default]
    Sr,
    /// Reset dominates: `S & R` latches low.
    Rs,
}

/// Latch state: the stored bit plus the configured mode.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LatchState {
    /// Configured dominance.
    pub mode: LatchMode,
    /// Current latched value.
    pub state: bool,
}

pub(crate) fn parse(block: &mut Block, packet: BlockPacket, payload: &[u8]) -> VmResult<()> {
    if packet != BlockPacket::Cfg {
        tracing::warn!(block = block.idx, id = packet.id(), "unknown latch packet id");
        return Ok(());
    }
    let mut r = Unpacker::new(payload);
    let mode = match r
        .u8()
        .map_err(|f| VmError::abort(f, Owner::BlockLatch, block.idx))?
    {
        0 => LatchMode::Sr,
        _ => LatchMode::Rs,
    };
    block.state = BlockState::Latch(LatchState { mode, state: false });
    tracing::debug!(block = block.idx, ?mode, "latch configured");
    Ok(())
}

pub(crate) fn verify(block: &Block) -> VmResult<()> {
    match block.state {
        BlockState::Latch(_) => Ok(()),
        _ => Err(VmError::abort(Fault::NullPtr, Owner::BlockLatch, block.idx)),
    }
}

pub(crate) fn execute(mem: &mut Memory, block: &mut Block) -> VmResult<BlockOutcome> {
    if !in_true(mem, block, IN_EN) {
        return Ok(BlockOutcome::Inactive);
    }
    let set = in_true(mem, block, IN_SET);
    let reset = in_true(mem, block, IN_RESET);

    let BlockState::Latch(latch) = &mut block.state else {
        return Err(VmError::abort(Fault::NullPtr, Owner::BlockLatch, block.idx));
    };

    latch.state = match (set, reset, latch.mode) {
        (true, false, _) => true,
        (false, true, _) => false,
        (true, true, LatchMode::Sr) => true,
        (true, true, LatchMode::Rs) => false,
        (false, false, _) => latch.state,
    };

    let value = latch.state;
    set_output(mem, block, 0, Value::B(value))?;
    Ok(BlockOutcome::Executed)
}

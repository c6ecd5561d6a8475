//! Clock block: periodic pulse generator.
//!
//! On rising `EN` the current loop time is captured; while `EN` holds, the
//! output is high during the first `width` milliseconds of every `period`
//! window. `EN` low drives the output low and clears the window origin.

use super::{in_true, in_updated, input_value, set_output, Block, BlockState};
use crate::engine::TickCtx;
use crate::error::{Owner, VmError, VmResult};
use crate::memory::Memory;
use crate::state::BlockOutcome;
use blockflow_asm::{BlockPacket, Fault, Unpacker};
use blockflow_types::Value;

const IN_EN: usize = 0;
const IN_PERIOD: usize = 1;
const IN_WIDTH: usize = 2;
const OUT_Q: usize = 0;

/// Clock state and default configuration.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ClockState {
    /// Window length in ms, used when the PERIOD input is idle.
    pub default_period: f32,
    /// High time in ms, used when the WIDTH input is idle.
    pub default_width: f32,
    start_time_ms: u64,
    prev_en: bool,
}

pub(crate) fn parse(block: &mut Block, packet: BlockPacket, payload: &[u8]) -> VmResult<()> {
    if packet != BlockPacket::Cfg {
        tracing::warn!(block = block.idx, id = packet.id(), "unknown clock packet id");
        return Ok(());
    }
    let fail = |f| VmError::abort(f, Owner::BlockClock, 0);
    let mut r = Unpacker::new(payload);
    let default_period = r.f32().map_err(fail)?;
    let default_width = r.f32().map_err(fail)?;
    block.state = BlockState::Clock(ClockState {
        default_period,
        default_width,
        start_time_ms: 0,
        prev_en: false,
    });
    tracing::debug!(block = block.idx, default_period, default_width, "clock configured");
    Ok(())
}

pub(crate) fn verify(block: &Block) -> VmResult<()> {
    let BlockState::Clock(clock) = &block.state else {
        return Err(VmError::abort(Fault::NullPtr, Owner::BlockClock, block.idx));
    };
    if clock.default_period < 0.001 {
        return Err(VmError::warning(
            Fault::BlockInvalidParam,
            Owner::BlockClock,
            block.idx,
        ));
    }
    Ok(())
}

pub(crate) fn execute(
    mem: &mut Memory,
    block: &mut Block,
    tick: &TickCtx<'_>,
) -> VmResult<BlockOutcome> {
    let en = in_true(mem, block, IN_EN);

    let mut period = None;
    let mut width = None;
    if en {
        if in_updated(mem, block, IN_PERIOD) {
            period = input_value(mem, block, IN_PERIOD).map(|v| v.as_f32());
        }
        if in_updated(mem, block, IN_WIDTH) {
            width = input_value(mem, block, IN_WIDTH).map(|v| v.as_f32());
        }
    }

    let BlockState::Clock(clock) = &mut block.state else {
        return Err(VmError::abort(Fault::NullPtr, Owner::BlockClock, block.idx));
    };

    if !en {
        clock.prev_en = false;
        set_output(mem, block, OUT_Q, Value::B(false))?;
        return Ok(BlockOutcome::Executed);
    }

    let period = period.unwrap_or(clock.default_period).max(1.0);
    let width = width.unwrap_or(clock.default_width).max(0.0);

    if !clock.prev_en {
        clock.start_time_ms = tick.time_ms;
        clock.prev_en = true;
    }

    let local_time = tick.time_ms.saturating_sub(clock.start_time_ms);
    let phase = (local_time as f32) % period;
    let q = phase < width;

    set_output(mem, block, OUT_Q, Value::B(q))?;
    tracing::trace!(block = block.idx, phase, q, "clock executed");
    Ok(BlockOutcome::Executed)
}

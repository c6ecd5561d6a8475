//! Up/down counter block.
//!
//! Inputs: `CTU`, `CTD`, `RESET`, `STEP`, `LIMIT_MAX`, `LIMIT_MIN`.
//! Priority is RESET over CTU over CTD. In `ON_RISING` mode a count fires
//! only on the 0->1 transition of its line, each direction tracking its
//! own previous-edge flag. The current value saturates at the limits.
//! Outputs are written only on a reset or count event.

use super::{in_true, in_updated, input_value, set_output, Block, BlockState};
use crate::error::{Owner, VmError, VmResult};
use crate::memory::Memory;
use crate::state::BlockOutcome;
use blockflow_asm::{BlockPacket, Fault, Unpacker};
use blockflow_types::Value;

const IN_CTU: usize = 0;
const IN_CTD: usize = 1;
const IN_RESET: usize = 2;
const IN_STEP: usize = 3;
const IN_LIMIT_MAX: usize = 4;
const IN_LIMIT_MIN: usize = 5;

const OUT_ENO: usize = 0;
const OUT_VAL: usize = 1;

/// When a high count line produces a count.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CounterMode {
    /// Count once per rising edge.
    #[default]
    OnRising,
    /// Count on every tick the line is high.
    WhenActive,
}

/// Counter state and configuration.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct CounterState {
    /// Edge or level counting.
    pub mode: CounterMode,
    /// Value applied on reset.
    pub start: f32,
    /// Increment per count.
    pub step: f32,
    /// Upper saturation limit.
    pub max: f32,
    /// Lower saturation limit.
    pub min: f32,
    /// Current value.
    pub current: f32,
    prev_ctu: bool,
    prev_ctd: bool,
}

pub(crate) fn parse(block: &mut Block, packet: BlockPacket, payload: &[u8]) -> VmResult<()> {
    if packet != BlockPacket::Cfg {
        tracing::warn!(block = block.idx, id = packet.id(), "unknown counter packet id");
        return Ok(());
    }
    let fail = |f| VmError::abort(f, Owner::BlockCounter, 0);
    let mut r = Unpacker::new(payload);
    let mode = match r.u8().map_err(fail)? {
        0 => CounterMode::OnRising,
        1 => CounterMode::WhenActive,
        _ => return Err(VmError::abort(Fault::BlockInvalidParam, Owner::BlockCounter, block.idx)),
    };
    let start = r.f32().map_err(fail)?;
    let step = r.f32().map_err(fail)?;
    let max = r.f32().map_err(fail)?;
    let min = r.f32().map_err(fail)?;
    block.state = BlockState::Counter(CounterState {
        mode,
        start,
        step,
        max,
        min,
        current: start,
        prev_ctu: false,
        prev_ctd: false,
    });
    tracing::debug!(block = block.idx, ?mode, start, step, max, min, "counter configured");
    Ok(())
}

pub(crate) fn verify(block: &Block) -> VmResult<()> {
    match block.state {
        BlockState::Counter(_) => Ok(()),
        _ => Err(VmError::abort(Fault::NullPtr, Owner::BlockCounter, block.idx)),
    }
}

pub(crate) fn execute(mem: &mut Memory, block: &mut Block) -> VmResult<BlockOutcome> {
    // live parameter overrides arrive through the optional inputs
    let step_in = in_updated(mem, block, IN_STEP)
        .then(|| input_value(mem, block, IN_STEP))
        .flatten();
    let max_in = in_updated(mem, block, IN_LIMIT_MAX)
        .then(|| input_value(mem, block, IN_LIMIT_MAX))
        .flatten();
    let min_in = in_updated(mem, block, IN_LIMIT_MIN)
        .then(|| input_value(mem, block, IN_LIMIT_MIN))
        .flatten();

    let reset = in_true(mem, block, IN_RESET);
    let ctu = in_true(mem, block, IN_CTU);
    let ctd = in_true(mem, block, IN_CTD);

    let BlockState::Counter(counter) = &mut block.state else {
        return Err(VmError::abort(Fault::NullPtr, Owner::BlockCounter, block.idx));
    };

    if let Some(v) = step_in {
        counter.step = v.as_f32();
    }
    if let Some(v) = max_in {
        counter.max = v.as_f32();
    }
    if let Some(v) = min_in {
        counter.min = v.as_f32();
    }

    let mut counted = false;

    if reset {
        counter.current = counter.start;
        counter.prev_ctu = false;
        counter.prev_ctd = false;
        counted = true;
    } else {
        if ctu {
            let fire = match counter.mode {
                CounterMode::OnRising => !counter.prev_ctu,
                CounterMode::WhenActive => true,
            };
            counter.prev_ctu = true;
            if fire {
                counter.current = (counter.current + counter.step).min(counter.max);
                counted = true;
            }
        } else {
            counter.prev_ctu = false;
        }

        if !counted {
            if ctd {
                let fire = match counter.mode {
                    CounterMode::OnRising => !counter.prev_ctd,
                    CounterMode::WhenActive => true,
                };
                counter.prev_ctd = true;
                if fire {
                    counter.current = (counter.current - counter.step).max(counter.min);
                    counted = true;
                }
            } else {
                counter.prev_ctd = false;
            }
        }
    }

    if !counted {
        return Ok(BlockOutcome::Inactive);
    }

    let current = counter.current;
    set_output(mem, block, OUT_ENO, Value::B(true))?;
    set_output(mem, block, OUT_VAL, Value::F32(current))?;
    tracing::trace!(block = block.idx, current, "counter executed");
    Ok(BlockOutcome::Executed)
}

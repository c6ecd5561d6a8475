//! Timer block: TON, TOF and TP, each with an inverted variant.
//!
//! Inputs: `EN`, `PT` (preset, ms), `RESET`. Outputs: 0 = `Q`,
//! 1 = elapsed ms. Elapsed time advances by the driver tick delta while
//! the timer is timing; `RESET` forces elapsed to zero and `Q` to the
//! inactive value of the configured kind.

use super::{in_true, in_updated, input_value, set_output, Block, BlockState};
use crate::engine::TickCtx;
use crate::error::{Owner, VmError, VmResult};
use crate::memory::Memory;
use crate::state::BlockOutcome;
use blockflow_asm::{BlockPacket, Fault, Unpacker};
use blockflow_types::{DataType, Value};

const IN_EN: usize = 0;
const IN_PT: usize = 1;
const IN_RESET: usize = 2;

const OUT_Q: usize = 0;
const OUT_ELAPSED: usize = 1;

/// Timer behavior.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// On-delay: `Q` rises after `EN` has been high for `PT`.
    #[default]
    Ton,
    /// Off-delay: `Q` follows `EN` up and holds for `PT` after it falls.
    Tof,
    /// Pulse: rising `EN` drives `Q` high for exactly `PT`.
    Tp,
}

impl TryFrom<u8> for TimerKind {
    type Error = Fault;

    fn try_from(b: u8) -> Result<Self, Fault> {
        match b {
            1 => Ok(Self::Ton),
            2 => Ok(Self::Tof),
            3 => Ok(Self::Tp),
            _ => Err(Fault::BlockInvalidParam),
        }
    }
}

/// Timer state and configuration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimerState {
    /// TON/TOF/TP.
    pub kind: TimerKind,
    /// Invert the `Q` output.
    pub invert: bool,
    /// Preset used when the `PT` input is idle.
    pub preset_ms: u32,
    elapsed_ms: u64,
    q: bool,
    pulsing: bool,
    prev_en: bool,
}

pub(crate) fn parse(block: &mut Block, packet: BlockPacket, payload: &[u8]) -> VmResult<()> {
    if packet != BlockPacket::Cfg {
        tracing::warn!(block = block.idx, id = packet.id(), "unknown timer packet id");
        return Ok(());
    }
    let fail = |f| VmError::abort(f, Owner::BlockTimer, 0);
    let mut r = Unpacker::new(payload);
    let kind = TimerKind::try_from(r.u8().map_err(fail)?)
        .map_err(|f| VmError::abort(f, Owner::BlockTimer, block.idx))?;
    let invert = r.u8().map_err(fail)? != 0;
    let preset_ms = r.u32().map_err(fail)?;
    block.state = BlockState::Timer(TimerState {
        kind,
        invert,
        preset_ms,
        ..TimerState::default()
    });
    tracing::debug!(block = block.idx, ?kind, invert, preset_ms, "timer configured");
    Ok(())
}

pub(crate) fn verify(block: &Block) -> VmResult<()> {
    match block.state {
        BlockState::Timer(_) => Ok(()),
        _ => Err(VmError::abort(Fault::NullPtr, Owner::BlockTimer, block.idx)),
    }
}

pub(crate) fn execute(
    mem: &mut Memory,
    block: &mut Block,
    tick: &TickCtx<'_>,
) -> VmResult<BlockOutcome> {
    let en = in_true(mem, block, IN_EN);
    let reset = in_true(mem, block, IN_RESET);
    let pt_in = in_updated(mem, block, IN_PT)
        .then(|| input_value(mem, block, IN_PT))
        .flatten();

    let BlockState::Timer(timer) = &mut block.state else {
        return Err(VmError::abort(Fault::NullPtr, Owner::BlockTimer, block.idx));
    };

    let delta = u64::from(tick.delta_ms.max(1));
    let pt = match pt_in.map(|v| v.coerce(DataType::U32)) {
        Some(Value::U32(ms)) => u64::from(ms),
        _ => u64::from(timer.preset_ms),
    };

    if reset {
        timer.elapsed_ms = 0;
        timer.q = false;
        timer.pulsing = false;
        timer.prev_en = en;
    } else {
        match timer.kind {
            TimerKind::Ton => {
                if en {
                    timer.elapsed_ms += delta;
                    timer.q = timer.elapsed_ms >= pt;
                } else {
                    timer.elapsed_ms = 0;
                    timer.q = false;
                }
            }
            TimerKind::Tof => {
                if en {
                    timer.elapsed_ms = 0;
                    timer.q = true;
                } else if timer.q {
                    timer.elapsed_ms += delta;
                    if timer.elapsed_ms >= pt {
                        timer.q = false;
                    }
                }
            }
            TimerKind::Tp => {
                if en && !timer.prev_en && !timer.pulsing {
                    timer.pulsing = true;
                    timer.elapsed_ms = 0;
                }
                if timer.pulsing {
                    timer.elapsed_ms += delta;
                    if timer.elapsed_ms > pt {
                        timer.pulsing = false;
                    }
                }
                timer.q = timer.pulsing;
            }
        }
        timer.prev_en = en;
    }

    let q = timer.q ^ timer.invert;
    let elapsed = timer.elapsed_ms.min(u64::from(u32::MAX)) as u32;

    set_output(mem, block, OUT_Q, Value::B(q))?;
    set_output(mem, block, OUT_ELAPSED, Value::U32(elapsed))?;
    tracing::trace!(block = block.idx, q, elapsed, "timer executed");
    Ok(BlockOutcome::Executed)
}

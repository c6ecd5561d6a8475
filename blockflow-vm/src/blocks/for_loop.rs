//! For-loop block: iterated execution of the following child chain.
//!
//! While the loop condition holds, the block emits `ENO` and the iterator
//! value, then runs the next `chain_len` blocks of the global array in
//! order. After the loop the driver skips those blocks. The watchdog is
//! polled every iteration so a diverging loop cannot outlive the skip
//! budget.

use super::{in_true, input_value, inputs_updated, set_output, Block, BlockState};
use crate::engine::{Engine, TickCtx};
use crate::error::{Owner, VmError, VmResult};
use crate::state::BlockOutcome;
use blockflow_asm::{BlockPacket, BlockType, Fault, Unpacker};
use blockflow_types::Value;
use core::sync::atomic::Ordering;

const IN_EN: usize = 0;
const IN_START: usize = 1;
const IN_STOP: usize = 2;
const IN_STEP: usize = 3;

/// Loop continuation condition, compared against the STOP value.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ForCond {
    /// Continue while iterator > stop.
    Gt,
    /// Continue while iterator < stop.
    #[default]
    Lt,
    /// Continue while iterator >= stop.
    Gte,
    /// Continue while iterator <= stop.
    Lte,
}

/// Iterator step operator.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ForOp {
    /// iterator += step
    #[default]
    Add,
    /// iterator -= step
    Sub,
    /// iterator *= step
    Mul,
    /// iterator /= step (near-zero step leaves the iterator unchanged)
    Div,
}

/// For-loop configuration.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ForState {
    /// Iterator start, used when the START input is not wired.
    pub start: f32,
    /// Stop value, used when the STOP input is not wired.
    pub stop: f32,
    /// Step value, used when the STEP input is not wired.
    pub step: f32,
    /// Continuation condition.
    pub cond: ForCond,
    /// Step operator.
    pub op: ForOp,
    /// Number of following blocks forming the child chain.
    pub chain_len: u16,
}

fn state_mut(block: &mut Block) -> &mut ForState {
    if !matches!(block.state, BlockState::For(_)) {
        block.state = BlockState::For(ForState::default());
    }
    match &mut block.state {
        BlockState::For(st) => st,
        _ => unreachable!(),
    }
}

pub(crate) fn parse(block: &mut Block, packet: BlockPacket, payload: &[u8]) -> VmResult<()> {
    let idx = block.idx;
    let fail = |f| VmError::abort(f, Owner::BlockFor, idx);
    let mut r = Unpacker::new(payload);
    match packet {
        BlockPacket::Constants => {
            // start, stop, step through the common constants layout
            if r.u8().map_err(fail)? != 3 {
                return Err(fail(Fault::InvalidData));
            }
            let start = r.f32().map_err(fail)?;
            let stop = r.f32().map_err(fail)?;
            let step = r.f32().map_err(fail)?;
            let st = state_mut(block);
            st.start = start;
            st.stop = stop;
            st.step = step;
            tracing::debug!(block = idx, start, stop, step, "for constants parsed");
        }
        BlockPacket::Cfg => {
            let chain_len = r.u16().map_err(fail)?;
            let cond = match r.u8().map_err(fail)? {
                0 => ForCond::Gt,
                1 => ForCond::Lt,
                2 => ForCond::Gte,
                3 => ForCond::Lte,
                _ => return Err(fail(Fault::BlockInvalidParam)),
            };
            let op = match r.u8().map_err(fail)? {
                0 => ForOp::Add,
                1 => ForOp::Sub,
                2 => ForOp::Mul,
                3 => ForOp::Div,
                _ => return Err(fail(Fault::BlockInvalidParam)),
            };
            let st = state_mut(block);
            st.chain_len = chain_len;
            st.cond = cond;
            st.op = op;
            tracing::debug!(block = idx, chain_len, ?cond, ?op, "for settings parsed");
        }
        other => {
            tracing::warn!(block = idx, id = other.id(), "unknown for packet id");
        }
    }
    Ok(())
}

/// Verify needs the surrounding code graph: the chain must fit inside the
/// block array and must not contain another for-loop, since child chains
/// never re-enter for-loop scheduling.
pub(crate) fn verify(engine: &Engine, idx: usize) -> VmResult<()> {
    let block = engine
        .code
        .block(idx)
        .map_err(|f| VmError::abort(f, Owner::BlockFor, idx as u16))?;
    let BlockState::For(st) = &block.state else {
        return Err(VmError::abort(Fault::NullPtr, Owner::BlockFor, block.idx));
    };
    if st.step.abs() < 1e-6 {
        return Err(VmError::warning(
            Fault::BlockInvalidParam,
            Owner::BlockFor,
            block.idx,
        ));
    }
    let chain_end = idx + st.chain_len as usize;
    if chain_end >= engine.code.len() {
        return Err(VmError::abort(
            Fault::BlockInvalidConn,
            Owner::BlockFor,
            block.idx,
        ));
    }
    for child in idx + 1..=chain_end {
        let child_block = engine
            .code
            .block(child)
            .map_err(|f| VmError::abort(f, Owner::BlockFor, block.idx))?;
        if child_block.ty == BlockType::For {
            return Err(VmError::abort(
                Fault::BlockInvalidParam,
                Owner::BlockFor,
                block.idx,
            ));
        }
    }
    Ok(())
}

/// Returns the outcome plus the number of chain blocks the driver skips.
pub(crate) fn execute(
    engine: &mut Engine,
    idx: usize,
    tick: &TickCtx<'_>,
) -> VmResult<(BlockOutcome, usize)> {
    let block_idx = idx as u16;
    let fail = |f| VmError::abort(f, Owner::BlockFor, block_idx);

    let st = {
        let block = engine.code.block(idx).map_err(fail)?;
        let BlockState::For(st) = &block.state else {
            return Err(fail(Fault::NullPtr));
        };
        let st = *st;
        if !inputs_updated(&engine.memory, block) || !in_true(&engine.memory, block, IN_EN) {
            // the chain is not skipped; an idle loop leaves its children to
            // run as ordinary blocks
            return Ok((BlockOutcome::Inactive, 0));
        }
        st
    };

    let param = |engine: &Engine, n: usize, fallback: f32| {
        let block = engine.code.block(idx).ok();
        block
            .and_then(|b| input_value(&engine.memory, b, n))
            .map(|v| v.as_f32())
            .unwrap_or(fallback)
    };
    let start = param(engine, IN_START, st.start);
    let stop = param(engine, IN_STOP, st.stop);
    let step = param(engine, IN_STEP, st.step);

    let mut current = start;
    let mut iteration = 0u32;
    loop {
        let condition_met = match st.cond {
            ForCond::Gt => current > stop + f32::EPSILON,
            ForCond::Lt => current < stop - f32::EPSILON,
            ForCond::Gte => current >= stop - f32::EPSILON,
            ForCond::Lte => current <= stop + f32::EPSILON,
        };
        if !condition_met {
            break;
        }

        {
            let Engine { memory, code, .. } = engine;
            let block = code.block(idx).map_err(fail)?;
            set_output(memory, block, 0, Value::B(true))?;
            set_output(memory, block, 1, Value::F32(current))?;
        }

        for off in 1..=st.chain_len as usize {
            if tick.watchdog.load(Ordering::Relaxed) {
                tracing::warn!(
                    block = block_idx,
                    iteration,
                    "watchdog fired inside for-loop"
                );
                return Err(fail(Fault::BlockForTimeout));
            }
            let child = idx + off;
            let child_ty = engine.code.block(child).map_err(|_| fail(Fault::BlockInvalidConn))?.ty;
            if child_ty == BlockType::For {
                return Err(fail(Fault::BlockInvalidParam));
            }
            engine.clear_block_outputs(child);
            engine
                .execute_block(child, tick)
                .map_err(|e| e.chain(Owner::BlockFor, block_idx))?;
        }

        match st.op {
            ForOp::Add => current += step,
            ForOp::Sub => current -= step,
            ForOp::Mul => current *= step,
            ForOp::Div => {
                if step.abs() > f32::EPSILON {
                    current /= step;
                }
            }
        }
        iteration += 1;
    }

    tracing::trace!(block = block_idx, iteration, "for-loop finished");
    Ok((BlockOutcome::Executed, st.chain_len as usize))
}

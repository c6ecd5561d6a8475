//! Logic block: bytecode comparisons and boolean algebra.
//!
//! Same program format as the math block; the top of stack is thresholded
//! at `0.5` into the boolean output. Outputs: 0 = `ENO`, 1 = result.

use super::{cached_inputs, in_true, inputs_updated, set_output, Block, BlockState};
use crate::error::{Owner, VmError, VmResult};
use crate::eval::Expression;
use crate::state::BlockOutcome;
use blockflow_asm::{BlockPacket, Fault};
use blockflow_types::Value;

fn expr_mut(block: &mut Block) -> &mut Expression {
    if !matches!(block.state, BlockState::Logic(_)) {
        block.state = BlockState::Logic(Expression::default());
    }
    match &mut block.state {
        BlockState::Logic(expr) => expr,
        _ => unreachable!(),
    }
}

pub(crate) fn parse(block: &mut Block, packet: BlockPacket, payload: &[u8]) -> VmResult<()> {
    let idx = block.idx;
    let expr = expr_mut(block);
    let parsed = match packet {
        BlockPacket::Constants => expr.parse_constants(payload),
        BlockPacket::Instructions => expr.parse_instructions(payload),
        other => {
            tracing::warn!(block = idx, id = other.id(), "unknown logic packet id");
            Ok(())
        }
    };
    parsed.map_err(|f| VmError::abort(f, Owner::BlockLogic, idx))
}

pub(crate) fn verify(block: &Block) -> VmResult<()> {
    let BlockState::Logic(expr) = &block.state else {
        return Err(VmError::abort(Fault::NullPtr, Owner::BlockLogic, block.idx));
    };
    if expr.code.is_empty() {
        return Err(VmError::warning(
            Fault::BlockInvalidParam,
            Owner::BlockLogic,
            block.idx,
        ));
    }
    for instr in &expr.code {
        let op = instr
            .op()
            .map_err(|f| VmError::abort(f, Owner::BlockLogic, block.idx))?;
        if !op.is_logic() {
            return Err(VmError::abort(
                Fault::BlockInvalidParam,
                Owner::BlockLogic,
                block.idx,
            ));
        }
    }
    Ok(())
}

pub(crate) fn execute(
    mem: &mut crate::memory::Memory,
    block: &Block,
) -> VmResult<BlockOutcome> {
    if !inputs_updated(mem, block) || !in_true(mem, block, 0) {
        return Ok(BlockOutcome::Inactive);
    }
    let BlockState::Logic(expr) = &block.state else {
        return Err(VmError::abort(Fault::NullPtr, Owner::BlockLogic, block.idx));
    };

    let inputs = cached_inputs(mem, block, Owner::BlockLogic)?;
    let result = expr
        .eval_bool(&inputs)
        .map_err(|f| VmError::abort(f, Owner::BlockLogic, block.idx))?;

    set_output(mem, block, 0, Value::B(true))?;
    set_output(mem, block, 1, Value::B(result))?;
    tracing::trace!(block = block.idx, result, "logic executed");
    Ok(BlockOutcome::Executed)
}

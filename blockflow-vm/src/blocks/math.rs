//! Math block: bytecode arithmetic over `f32`.
//!
//! Inputs: `EN` at position 0, then the operand inputs referenced by `VAR`.
//! Outputs: 0 = `ENO` (true on success), 1 = `f32` result.

use super::{cached_inputs, in_true, inputs_updated, set_output, Block, BlockState};
use crate::error::{Owner, VmError, VmResult};
use crate::eval::Expression;
use crate::state::BlockOutcome;
use blockflow_asm::{BlockPacket, BlockType, Fault};
use blockflow_types::Value;

fn expr_mut(block: &mut Block) -> &mut Expression {
    if !matches!(block.state, BlockState::Math(_)) {
        block.state = BlockState::Math(Expression::default());
    }
    match &mut block.state {
        BlockState::Math(expr) => expr,
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
            tracing::warn!(block = idx, id = other.id(), "unknown math packet id");
            Ok(())
        }
    };
    parsed.map_err(|f| VmError::abort(f, Owner::BlockMath, idx))
}

pub(crate) fn verify(block: &Block) -> VmResult<()> {
    let BlockState::Math(expr) = &block.state else {
        return Err(VmError::abort(Fault::NullPtr, Owner::BlockMath, block.idx));
    };
    if expr.code.is_empty() {
        return Err(VmError::warning(
            Fault::BlockInvalidParam,
            Owner::BlockMath,
            block.idx,
        ));
    }
    for instr in &expr.code {
        let op = instr
            .op()
            .map_err(|f| VmError::abort(f, Owner::BlockMath, block.idx))?;
        if !op.is_math() {
            return Err(VmError::abort(
                Fault::BlockInvalidParam,
                Owner::BlockMath,
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
    debug_assert_eq!(block.ty, BlockType::Math);
    if !inputs_updated(mem, block) || !in_true(mem, block, 0) {
        return Ok(BlockOutcome::Inactive);
    }
    let BlockState::Math(expr) = &block.state else {
        return Err(VmError::abort(Fault::NullPtr, Owner::BlockMath, block.idx));
    };

    let inputs = cached_inputs(mem, block, Owner::BlockMath)?;
    let result = expr.eval(&inputs).map_err(|fault| match fault {
        // a zero divisor skips the outputs but does not abort the tick
        Fault::BlockDivByZero => VmError::notice(fault, Owner::BlockMath, block.idx),
        _ => VmError::abort(fault, Owner::BlockMath, block.idx),
    })?;

    set_output(mem, block, 0, Value::B(true))?;
    set_output(mem, block, 1, Value::F32(result))?;
    tracing::trace!(block = block.idx, result, "math executed");
    Ok(BlockOutcome::Executed)
}

//! Set block: copy a value into a target variable.
//!
//! Inputs: 0 = `VALUE`, 1 = `TARGET`. There is no enable line; the block
//! is active whenever `VALUE` carries the `updated` flag. The write goes
//! through the regular memory set path and coerces to the target type.

use super::{in_updated, Block};
use crate::error::{Owner, VmError, VmResult};
use crate::memory::Memory;
use crate::state::BlockOutcome;
use blockflow_asm::Fault;

const IN_VALUE: usize = 0;
const IN_TARGET: usize = 1;

pub(crate) fn execute(mem: &mut Memory, block: &Block) -> VmResult<BlockOutcome> {
    if !in_updated(mem, block, IN_VALUE) {
        return Ok(BlockOutcome::Inactive);
    }

    let value_id = block.input(IN_VALUE).ok_or(VmError::abort(
        Fault::NullPtr,
        Owner::BlockSet,
        block.idx,
    ))?;
    let target_id = block.input(IN_TARGET).ok_or(VmError::abort(
        Fault::NullPtr,
        Owner::BlockSet,
        block.idx,
    ))?;

    let value = mem
        .get(value_id)
        .map_err(|e| e.chain(Owner::BlockSet, block.idx))?;
    mem.set(target_id, value)
        .map_err(|e| e.chain(Owner::BlockSet, block.idx))?;
    tracing::trace!(block = block.idx, ?value, "set executed");
    Ok(BlockOutcome::Executed)
}

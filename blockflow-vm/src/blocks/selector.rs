//! Input-selector and output-selector blocks.
//!
//! The input-selector mirrors the instance of one of N option inputs into
//! its output slot, so downstream readers alias the chosen variable. The
//! output-selector drives exactly one of N boolean outputs high.

use super::{in_true, in_updated, input_value, Block};
use crate::error::{Owner, VmError, VmResult};
use crate::memory::Memory;
use crate::state::BlockOutcome;
use blockflow_asm::{BlockPacket, Fault, Unpacker};
use blockflow_types::Value;

const IN_EN: usize = 0;
const IN_SEL: usize = 1;
/// First option slot of the input-selector.
const IN_OPT_BASE: usize = 2;

/// Option descriptors may arrive as `BLOCK_DATA` option-slot packets
/// instead of `BLOCK_INPUTS` packets; slot `k` wires input `2 + k`.
pub(crate) fn parse_in_options(
    mem: &mut Memory,
    block: &mut Block,
    packet: BlockPacket,
    payload: &[u8],
) -> VmResult<()> {
    let BlockPacket::OptionSlot(slot) = packet else {
        tracing::warn!(block = block.idx, id = packet.id(), "unknown selector packet id");
        return Ok(());
    };
    let input_idx = IN_OPT_BASE + slot as usize;
    if input_idx >= block.in_cnt as usize {
        return Err(VmError::abort(
            Fault::BlockInvalidParam,
            Owner::BlockInSelector,
            block.idx,
        ));
    }
    let access = mem
        .parse_access(&mut Unpacker::new(payload))
        .map_err(|e| e.chain(Owner::BlockInSelector, block.idx))?;
    block.inputs[input_idx] = Some(access);
    Ok(())
}

pub(crate) fn verify_in(block: &Block) -> VmResult<()> {
    // EN + SEL + at least one option
    if block.in_cnt < 3 {
        return Err(VmError::abort(
            Fault::BlockInvalidConn,
            Owner::BlockInSelector,
            block.idx,
        ));
    }
    Ok(())
}

/// Input-selector execution.
///
/// On a SEL change the chosen option's instance record is copied over the
/// output's record, aliasing its data; the output is marked updated every
/// active tick regardless of the mirrored flag.
pub(crate) fn execute_in(mem: &mut Memory, block: &Block) -> VmResult<BlockOutcome> {
    if !in_true(mem, block, IN_EN) {
        return Ok(BlockOutcome::Inactive);
    }

    let out_target = block
        .output(0)
        .and_then(|id| mem.access.node(id).ok().map(|a| a.target))
        .ok_or(VmError::abort(
            Fault::NullPtr,
            Owner::BlockInSelector,
            block.idx,
        ))?;

    if in_updated(mem, block, IN_SEL) {
        let sel = input_value(mem, block, IN_SEL)
            .map(|v| v.as_u16() as usize)
            .unwrap_or(0);
        let options = block.in_cnt as usize - IN_OPT_BASE;
        if sel >= options {
            return Err(VmError::warning(
                Fault::BlockSelectorOob,
                Owner::BlockInSelector,
                block.idx,
            ));
        }
        let src_target = block
            .input(IN_OPT_BASE + sel)
            .and_then(|id| mem.access.node(id).ok().map(|a| a.target))
            .ok_or(VmError::abort(
                Fault::NullPtr,
                Owner::BlockInSelector,
                block.idx,
            ))?;
        let mirrored = *mem
            .instance(src_target)
            .map_err(|f| VmError::abort(f, Owner::BlockInSelector, block.idx))?;
        *mem.instance_mut(out_target)
            .map_err(|f| VmError::abort(f, Owner::BlockInSelector, block.idx))? = mirrored;
        tracing::trace!(block = block.idx, sel, "selector mirrored option");
    }

    mem.instance_mut(out_target)
        .map_err(|f| VmError::abort(f, Owner::BlockInSelector, block.idx))?
        .updated = true;
    Ok(BlockOutcome::Executed)
}

/// Output-selector execution.
///
/// `EN` low clears every output (value and `updated`). On a SEL change
/// all outputs clear, then only the selected one is driven high and
/// marked updated.
pub(crate) fn execute_q(mem: &mut Memory, block: &Block) -> VmResult<BlockOutcome> {
    let clear_all = |mem: &mut Memory| -> VmResult<()> {
        for q in 0..block.q_cnt as usize {
            let id = block.output(q).ok_or(VmError::abort(
                Fault::NullPtr,
                Owner::BlockQSelector,
                block.idx,
            ))?;
            let target = mem
                .access
                .node(id)
                .map_err(|f| VmError::abort(f, Owner::BlockQSelector, block.idx))?
                .target;
            let loc = mem
                .locate(id)
                .map_err(|e| e.chain(Owner::BlockQSelector, block.idx))?;
            mem.write_at(loc, Value::B(false))
                .map_err(|f| VmError::abort(f, Owner::BlockQSelector, block.idx))?;
            mem.instance_mut(target)
                .map_err(|f| VmError::abort(f, Owner::BlockQSelector, block.idx))?
                .updated = false;
        }
        Ok(())
    };

    if !in_true(mem, block, IN_EN) {
        clear_all(mem)?;
        return Ok(BlockOutcome::Inactive);
    }

    if in_updated(mem, block, IN_SEL) {
        let sel = input_value(mem, block, IN_SEL)
            .map(|v| v.as_u16() as usize)
            .unwrap_or(0);
        clear_all(mem)?;
        if sel >= block.q_cnt as usize {
            return Err(VmError::abort(
                Fault::BlockSelectorOob,
                Owner::BlockQSelector,
                block.idx,
            ));
        }
        let id = block.output(sel).ok_or(VmError::abort(
            Fault::NullPtr,
            Owner::BlockQSelector,
            block.idx,
        ))?;
        mem.set(id, Value::B(true))
            .map_err(|e| e.chain(Owner::BlockQSelector, block.idx))?;
        tracing::trace!(block = block.idx, sel, "q-selector switched");
    }

    Ok(BlockOutcome::Executed)
}

//! Block model and the block library.
//!
//! A block is a record of typed input and output ports (access descriptors
//! into shared memory) plus an opaque per-type state, stored in one ordered
//! array whose position defines execution order. The per-type behavior
//! lives in the submodules; dispatch is a `match` on the type tag in
//! [`crate::engine`].

use crate::error::{Owner, VmError, VmResult};
use crate::eval::Expression;
use crate::memory::{AccessId, Memory};
use blockflow_asm::{BlockPacket, BlockType, Fault};
use blockflow_types::Value;

pub mod clock;
pub mod counter;
pub mod for_loop;
pub mod latch;
pub mod logic;
pub mod math;
pub mod selector;
pub mod set;
pub mod timer;

pub use clock::ClockState;
pub use counter::{CounterMode, CounterState};
pub use for_loop::{ForCond, ForOp, ForState};
pub use latch::{LatchMode, LatchState};
pub use timer::{TimerKind, TimerState};

/// Opaque per-type block state.
///
/// The tagged variant replacing the original's `void*` custom-data field;
/// the dispatcher selects the alternative matching the block's type byte.
#[derive(Debug, Default, Clone, PartialEq)]
pub enum BlockState {
    /// Stateless block, or state not yet parsed.
    #[default]
    None,
    /// Math bytecode program.
    Math(Expression),
    /// Logic bytecode program.
    Logic(Expression),
    /// SR/RS latch.
    Latch(LatchState),
    /// Up/down counter.
    Counter(CounterState),
    /// Pulse generator.
    Clock(ClockState),
    /// TON/TOF/TP timer.
    Timer(TimerState),
    /// For-loop configuration.
    For(ForState),
}

/// One block of the code graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// Position in the block array; equals execution order.
    pub idx: u16,
    /// Type tag.
    pub ty: BlockType,
    /// Input port count.
    pub in_cnt: u8,
    /// Output port count.
    pub q_cnt: u8,
    /// Bit i high means input i is wired.
    pub in_connected_mask: u16,
    /// Input descriptors, populated by `BLOCK_INPUTS` packets.
    pub inputs: Vec<Option<AccessId>>,
    /// Output descriptors, populated by `BLOCK_OUTPUTS` packets.
    pub outputs: Vec<Option<AccessId>>,
    /// Per-type state, populated by `BLOCK_DATA` packets.
    pub state: BlockState,
}

impl Block {
    /// Build an empty block from its header packet fields.
    pub fn new(idx: u16, ty: BlockType, in_cnt: u8, q_cnt: u8, in_connected_mask: u16) -> Self {
        Self {
            idx,
            ty,
            in_cnt,
            q_cnt,
            in_connected_mask,
            inputs: vec![None; in_cnt as usize],
            outputs: vec![None; q_cnt as usize],
            state: BlockState::None,
        }
    }

    /// True when input `n` is wired.
    pub fn connected(&self, n: usize) -> bool {
        n < self.in_cnt as usize && (self.in_connected_mask >> n) & 1 == 1
    }

    /// Descriptor of input `n`, if wired and parsed.
    pub fn input(&self, n: usize) -> Option<AccessId> {
        self.inputs.get(n).copied().flatten()
    }

    /// Descriptor of output `q`, if parsed.
    pub fn output(&self, q: usize) -> Option<AccessId> {
        self.outputs.get(q).copied().flatten()
    }
}

/// True when every wired input's instance carries the `updated` flag.
///
/// Most blocks require this before running, which gives the "previous
/// producer has executed" gating of a PLC scan.
pub(crate) fn inputs_updated(mem: &Memory, block: &Block) -> bool {
    for i in 0..block.in_cnt as usize {
        if !block.connected(i) {
            continue;
        }
        let updated = block
            .input(i)
            .and_then(|id| mem.access.node(id).ok().map(|a| a.target))
            .and_then(|t| mem.instance(t).ok().map(|inst| inst.updated))
            .unwrap_or(false);
        if !updated {
            return false;
        }
    }
    true
}

/// True when input `n` is wired and its instance is `updated` this tick.
pub(crate) fn in_updated(mem: &Memory, block: &Block, n: usize) -> bool {
    if !block.connected(n) {
        return false;
    }
    block
        .input(n)
        .and_then(|id| mem.access.node(id).ok().map(|a| a.target))
        .and_then(|t| mem.instance(t).ok().map(|inst| inst.updated))
        .unwrap_or(false)
}

/// Enable-line check: input `n` is updated and its value is truthy.
///
/// A failed read reports a warning and behaves as a low line.
pub(crate) fn in_true(mem: &Memory, block: &Block, n: usize) -> bool {
    if !in_updated(mem, block, n) {
        return false;
    }
    let Some(id) = block.input(n) else { return false };
    match mem.get(id) {
        Ok(v) => v.as_bool(),
        Err(err) => {
            tracing::warn!(block = block.idx, input = n, %err, "enable read failed");
            false
        }
    }
}

/// Current value of input `n` if it is wired, regardless of `updated`.
pub(crate) fn input_value(mem: &Memory, block: &Block, n: usize) -> Option<Value> {
    mem.get(block.input(n)?).ok()
}

/// Cache the wired inputs of an evaluator block as `f32` values.
///
/// Position 0 (the enable line) stays zero; opcodes never reference it.
pub(crate) fn cached_inputs(
    mem: &Memory,
    block: &Block,
    owner: Owner,
) -> VmResult<Vec<f32>> {
    let mut values = vec![0f32; block.in_cnt as usize];
    for (i, slot) in values.iter_mut().enumerate().skip(1) {
        if block.connected(i) {
            if let Some(id) = block.input(i) {
                *slot = mem.get(id).map_err(|e| e.chain(owner, block.idx))?.as_f32();
            }
        }
    }
    Ok(values)
}

/// Write output `q`, coercing to the destination type.
pub(crate) fn set_output(
    mem: &mut Memory,
    block: &Block,
    q: usize,
    value: Value,
) -> VmResult<()> {
    if q >= block.q_cnt as usize {
        return Err(VmError::abort(
            Fault::BlockInvalidParam,
            Owner::BlockSetOutput,
            block.idx,
        ));
    }
    let id = block.output(q).ok_or(VmError::abort(
        Fault::NullPtr,
        Owner::BlockSetOutput,
        block.idx,
    ))?;
    mem.set(id, value)
        .map_err(|e| e.chain(Owner::BlockSetOutput, block.idx))
}

/// Clear the `updated` flag of every output whose instance permits it.
///
/// The driver calls this right before the block executes.
pub(crate) fn clear_outputs(mem: &mut Memory, block: &Block) {
    for q in 0..block.q_cnt as usize {
        let Some(target) = block
            .output(q)
            .and_then(|id| mem.access.node(id).ok().map(|a| a.target))
        else {
            continue;
        };
        if let Ok(inst) = mem.instance_mut(target) {
            if inst.can_clear {
                inst.updated = false;
            }
        }
    }
}

/// Route a `BLOCK_DATA` payload to the block's per-type parser.
///
/// Unrecognized packet ids for a given type are skipped, matching the
/// original dispatcher; blocks without parsers (`SET`, `Q_SELECTOR`)
/// accept nothing.
pub(crate) fn parse_block_data(
    mem: &mut Memory,
    block: &mut Block,
    packet: BlockPacket,
    payload: &[u8],
) -> VmResult<()> {
    match block.ty {
        BlockType::Math => math::parse(block, packet, payload),
        BlockType::Logic => logic::parse(block, packet, payload),
        BlockType::Latch => latch::parse(block, packet, payload),
        BlockType::Counter => counter::parse(block, packet, payload),
        BlockType::Clock => clock::parse(block, packet, payload),
        BlockType::Timer => timer::parse(block, packet, payload),
        BlockType::For => for_loop::parse(block, packet, payload),
        BlockType::InSelector => selector::parse_in_options(mem, block, packet, payload),
        BlockType::Set | BlockType::QSelector => {
            tracing::debug!(block = block.idx, ?packet, "no parser for block type, skipping");
            Ok(())
        }
    }
}

/// Run the block's per-type verify.
pub(crate) fn verify_block(block: &Block) -> VmResult<()> {
    match block.ty {
        BlockType::Math => math::verify(block),
        BlockType::Logic => logic::verify(block),
        BlockType::Latch => latch::verify(block),
        BlockType::Counter => counter::verify(block),
        BlockType::Clock => clock::verify(block),
        BlockType::Timer => timer::verify(block),
        BlockType::InSelector => selector::verify_in(block),
        // for-loop verify needs the whole code graph; see engine::verify_code
        BlockType::For | BlockType::Set | BlockType::QSelector => Ok(()),
    }
}

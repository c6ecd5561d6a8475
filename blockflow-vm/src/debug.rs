//! Debug facilities: single-step execution and block-state dumps.
//!
//! `RUN_ONE_STEP` executes exactly one block per command while the loop is
//! stopped, advancing a cursor through the block array (a for-loop and its
//! chain count as one step). After each step the current state of every
//! block is dumped to the transport so the peer can inspect the code
//! mid-scan.

use crate::blocks::Block;
use crate::consts::PUBLISH_MTU;
use crate::engine::{Engine, TickCtx};
use crate::error::{Owner, VmError, VmResult};
use crate::memory::Memory;
use crate::state::BlockOutcome;
use crate::transport::Transport;
use blockflow_asm::{Fault, PacketHeader};

/// Port marker for a slot with no readable value.
const PORT_EMPTY: u8 = 0xFF;

fn encode_port(mem: &Memory, block: &Block, slot: usize, input: bool, out: &mut Vec<u8>) {
    let id = if input {
        block.input(slot)
    } else {
        block.output(slot)
    };
    let value = id.and_then(|id| mem.get(id).ok());
    match value {
        Some(v) => {
            out.push(v.ty().into());
            let mut bytes = [0u8; 4];
            let n = v.write_le(&mut bytes);
            out.extend_from_slice(&bytes[..n]);
        }
        None => out.push(PORT_EMPTY),
    }
}

fn encode_block(mem: &Memory, block: &Block) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&block.idx.to_le_bytes());
    body.push(block.ty.into());
    body.push(block.in_cnt);
    body.push(block.q_cnt);
    body.extend_from_slice(&block.in_connected_mask.to_le_bytes());
    for n in 0..block.in_cnt as usize {
        encode_port(mem, block, n, true, &mut body);
    }
    for q in 0..block.q_cnt as usize {
        encode_port(mem, block, q, false, &mut body);
    }

    let mut record = Vec::with_capacity(body.len() + 2);
    record.extend_from_slice(&(body.len() as u16).to_le_bytes());
    record.extend_from_slice(&body);
    record
}

impl Engine {
    /// Dump every block's ports and current values to the transport.
    ///
    /// Frames are `DEBUG_DUMP`-tagged, carry a frame sequence number and
    /// a stream of length-prefixed per-block records, packed to the MTU.
    pub fn dump_blocks(&self, transport: &mut dyn Transport) {
        let mut seq = 0u16;
        let mut frame = Vec::with_capacity(PUBLISH_MTU);
        let start_frame = |frame: &mut Vec<u8>, seq: u16| {
            frame.clear();
            frame.push(u8::from(PacketHeader::DebugDump));
            frame.extend_from_slice(&seq.to_le_bytes());
        };
        start_frame(&mut frame, seq);

        for idx in 0..self.code.len() {
            let Ok(block) = self.code.block(idx) else {
                continue;
            };
            let record = encode_block(&self.memory, block);
            if frame.len() + record.len() > PUBLISH_MTU && frame.len() > 3 {
                transport.send(&frame);
                seq += 1;
                start_frame(&mut frame, seq);
            }
            frame.extend_from_slice(&record);
        }
        if frame.len() > 3 {
            transport.send(&frame);
        }
    }

    /// Execute the single block under the step cursor, then advance.
    ///
    /// A for-loop runs its whole child chain and the cursor skips past it,
    /// mirroring the periodic walk. The cursor wraps at the end of the
    /// block array. Returns the executed index and the outcome.
    pub fn step_once(&mut self, tick: &TickCtx<'_>) -> VmResult<(usize, BlockOutcome)> {
        if self.code.is_empty() {
            return Err(VmError::warning(
                Fault::BlockInvalidParam,
                Owner::DebugStep,
                0,
            ));
        }
        if self.step_cursor >= self.code.len() {
            self.step_cursor = 0;
        }
        let idx = self.step_cursor;

        self.clear_block_outputs(idx);
        match self.execute_block(idx, tick) {
            Ok((outcome, skip)) => {
                self.step_cursor = idx + 1 + skip;
                tracing::debug!(block = idx, ?outcome, "stepped");
                Ok((idx, outcome))
            }
            Err(err) => {
                self.step_cursor = idx + 1;
                Err(err.chain(Owner::DebugStep, idx as u16))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ContextCaps, TypeCaps};
    use crate::transport::RecordingTransport;
    use blockflow_asm::BlockType;
    use blockflow_types::DataType;

    fn engine_with_blocks() -> Engine {
        let mut engine = Engine::new();
        let caps = ContextCaps {
            types: [TypeCaps {
                heap_elements: 16,
                max_instances: 8,
                max_dims: 8,
            }; DataType::COUNT],
        };
        engine.memory.allocate_context(0, &caps).unwrap();
        engine.memory.access.allocate(8, 8);
        engine.code.create(2);
        engine
            .code
            .insert(Block::new(0, BlockType::Set, 2, 0, 0))
            .unwrap();
        engine
            .code
            .insert(Block::new(1, BlockType::Set, 2, 0, 0))
            .unwrap();
        engine
    }

    #[test]
    fn step_cursor_walks_and_wraps() {
        let mut engine = engine_with_blocks();
        let tick = TickCtx::unmonitored(10, 1, 10);

        let (first, _) = engine.step_once(&tick).unwrap();
        let (second, _) = engine.step_once(&tick).unwrap();
        let (wrapped, _) = engine.step_once(&tick).unwrap();
        assert_eq!((first, second, wrapped), (0, 1, 0));
    }

    #[test]
    fn step_without_code_is_refused() {
        let mut engine = Engine::new();
        let tick = TickCtx::unmonitored(0, 0, 10);
        let err = engine.step_once(&tick).unwrap_err();
        assert_eq!(err.fault, Fault::BlockInvalidParam);
    }

    #[test]
    fn dump_emits_length_prefixed_records() {
        let engine = engine_with_blocks();
        let mut transport = RecordingTransport::default();
        engine.dump_blocks(&mut transport);

        assert_eq!(transport.frames.len(), 1);
        let frame = &transport.frames[0];
        assert_eq!(frame[0], u8::from(PacketHeader::DebugDump));
        assert_eq!(&frame[1..3], &0u16.to_le_bytes());
        // first record: len, idx 0, Set, 2 inputs, 0 outputs, empty mask
        let len = u16::from_le_bytes([frame[3], frame[4]]) as usize;
        assert_eq!(&frame[5..7], &0u16.to_le_bytes());
        assert_eq!(frame[7], u8::from(BlockType::Set));
        assert_eq!(frame[8], 2);
        assert_eq!(frame[9], 0);
        // two unwired input markers close the record
        assert_eq!(&frame[12..14], &[0xFF, 0xFF]);
        assert_eq!(len, 9);
    }
}

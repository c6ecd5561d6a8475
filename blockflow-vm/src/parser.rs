//! Framed-packet parsers and the construction-order guard.
//!
//! The transport hands the controller one framed packet at a time; the
//! first byte selects the parser. A bitset of completed phases enforces
//! the construction sequence: out-of-order packets fail with
//! `SEQUENCE_VIOLATION` and mutate nothing. Context, instance and data
//! packets repeat freely across independent contexts.

use crate::blocks::{self, Block};
use crate::engine::{Engine, LoopConfig};
use crate::error::{Owner, VmError, VmResult};
use crate::memory::{ContextCaps, InstanceRef, TypeCaps};
use blockflow_asm::{BlockPacket, BlockType, Fault, PacketHeader, Unpacker};
use blockflow_types::DataType;

bitflags::bitflags! {
    /// Completed construction phases of the current load.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ParsePhases: u32 {
        /// At least one context allocated.
        const CONTEXT = 1 << 0;
        /// Instances created.
        const INSTANCES = 1 << 1;
        /// Instance data filled.
        const INSTANCE_DATA = 1 << 2;
        /// Access slab sized.
        const ACCESS = 1 << 3;
        /// Block list allocated.
        const CODE = 1 << 4;
        /// Block headers parsed.
        const HEADERS = 1 << 5;
        /// Block ports wired.
        const WIRING = 1 << 6;
        /// Block-specific data parsed.
        const BLOCK_DATA = 1 << 7;
        /// Loop configuration received.
        const LOOP_CFG = 1 << 8;
    }
}

impl Default for ParsePhases {
    fn default() -> Self {
        Self::empty()
    }
}

impl Engine {
    fn guard(&self, need: ParsePhases) -> VmResult<()> {
        if self.phases.contains(need) {
            Ok(())
        } else {
            tracing::warn!(?need, have = ?self.phases, "construction sequence violated");
            Err(VmError::abort(
                Fault::SequenceViolation,
                Owner::ParseDispatch,
                0,
            ))
        }
    }

    /// Dispatch one framed packet by its header byte.
    pub fn dispatch_packet(&mut self, frame: &[u8]) -> VmResult<()> {
        let first = *frame.first().ok_or(VmError::warning(
            Fault::PacketEmpty,
            Owner::ParseDispatch,
            0,
        ))?;
        let header = PacketHeader::try_from(first)
            .map_err(|f| VmError::warning(f, Owner::ParseDispatch, first as u16))?;
        let payload = &frame[1..];
        tracing::debug!(%header, len = payload.len(), "parsing packet");

        match header {
            PacketHeader::ContextCfg => self.parse_context_cfg(payload),
            PacketHeader::Instance => {
                self.guard(ParsePhases::CONTEXT)?;
                self.parse_instances(payload)?;
                self.phases |= ParsePhases::INSTANCES;
                Ok(())
            }
            PacketHeader::InstanceScalarData => {
                self.guard(ParsePhases::INSTANCES)?;
                self.parse_scalar_data(payload)?;
                self.phases |= ParsePhases::INSTANCE_DATA;
                Ok(())
            }
            PacketHeader::InstanceArrData => {
                self.guard(ParsePhases::INSTANCES)?;
                self.parse_array_data(payload)?;
                self.phases |= ParsePhases::INSTANCE_DATA;
                Ok(())
            }
            PacketHeader::AccessCfg => {
                self.parse_access_cfg(payload)?;
                self.phases |= ParsePhases::ACCESS;
                Ok(())
            }
            PacketHeader::CodeCfg => {
                self.parse_code_cfg(payload)?;
                self.phases |= ParsePhases::CODE;
                Ok(())
            }
            PacketHeader::BlockHeader => {
                self.guard(ParsePhases::CODE)?;
                self.parse_block_header(payload)?;
                self.phases |= ParsePhases::HEADERS;
                Ok(())
            }
            PacketHeader::BlockInputs => {
                self.guard(ParsePhases::HEADERS | ParsePhases::ACCESS)?;
                self.parse_block_port(payload, true)?;
                self.phases |= ParsePhases::WIRING;
                Ok(())
            }
            PacketHeader::BlockOutputs => {
                self.guard(ParsePhases::HEADERS | ParsePhases::ACCESS)?;
                self.parse_block_port(payload, false)?;
                self.phases |= ParsePhases::WIRING;
                Ok(())
            }
            PacketHeader::BlockData => {
                self.guard(ParsePhases::HEADERS)?;
                self.parse_block_data(payload)?;
                self.phases |= ParsePhases::BLOCK_DATA;
                Ok(())
            }
            PacketHeader::LoopCfg => {
                self.parse_loop_cfg(payload)?;
                self.phases |= ParsePhases::LOOP_CFG;
                Ok(())
            }
            PacketHeader::SubCfg => self.parse_sub_cfg(payload),
            PacketHeader::SubAdd => self.parse_sub_add(payload),
            PacketHeader::Publish | PacketHeader::DebugDump => Err(VmError::warning(
                Fault::Deny,
                Owner::ParseDispatch,
                first as u16,
            )),
        }
    }

    /// `CONTEXT_CFG`: `{ctx_id:u8}` + 7 x `{heap:u32, instances:u16, dims:u16}`.
    fn parse_context_cfg(&mut self, payload: &[u8]) -> VmResult<()> {
        let fail = |f| VmError::abort(f, Owner::ContextParse, 0);
        let mut r = Unpacker::new(payload);
        let ctx_id = r.u8().map_err(fail)?;
        let mut caps = ContextCaps::default();
        for slot in caps.types.iter_mut() {
            *slot = TypeCaps {
                heap_elements: r.u32().map_err(fail)?,
                max_instances: r.u16().map_err(fail)?,
                max_dims: r.u16().map_err(fail)?,
            };
        }
        if !r.is_empty() {
            return Err(fail(Fault::PacketIncomplete));
        }
        let result = self.memory.allocate_context(ctx_id, &caps);
        // the context exists either way; later phases may proceed
        if result.is_ok() || result.as_ref().err().map(|e| e.fault) == Some(Fault::MemAlreadyCreated)
        {
            self.phases |= ParsePhases::CONTEXT;
        }
        result.map_err(|e| e.chain(Owner::ContextParse, ctx_id as u16))
    }

    /// `INSTANCE`: stream of `{head:u16, dim_sizes:[u16; dims_cnt]}`.
    ///
    /// Head bit-packs `{context:3, dims_cnt:4, type:4, updated:1,
    /// can_clear:1}` from the low bit up; indices are assigned in stream
    /// order per context and type.
    fn parse_instances(&mut self, payload: &[u8]) -> VmResult<()> {
        let fail = |f| VmError::abort(f, Owner::InstanceParse, 0);
        let mut r = Unpacker::new(payload);
        while !r.is_empty() {
            let head = r.u16().map_err(fail)?;
            let ctx = (head & 0x07) as u8;
            let dims_cnt = ((head >> 3) & 0x0f) as usize;
            let ty = DataType::try_from(((head >> 7) & 0x0f) as u8)
                .map_err(|_| fail(Fault::MemInvalidDatatype))?;
            let can_clear = (head >> 12) & 1 == 1;

            let mut dims = [0u16; crate::consts::MAX_DIMS];
            if dims_cnt > dims.len() {
                return Err(fail(Fault::InvalidArg));
            }
            for d in dims.iter_mut().take(dims_cnt) {
                *d = r.u16().map_err(fail)?;
            }
            self.memory
                .create_instance(ctx, ty, &dims[..dims_cnt], can_clear)
                .map_err(|e| e.chain(Owner::InstanceParse, ctx as u16))?;
        }
        Ok(())
    }

    /// `INSTANCE_SCALAR_DATA`: `{ctx, type, count}` + count x `{idx:u16, value}`.
    fn parse_scalar_data(&mut self, payload: &[u8]) -> VmResult<()> {
        let fail = |f| VmError::abort(f, Owner::ScalarDataParse, 0);
        let mut r = Unpacker::new(payload);
        let ctx = r.u8().map_err(fail)?;
        let ty = DataType::try_from(r.u8().map_err(fail)?)
            .map_err(|_| fail(Fault::MemInvalidDatatype))?;
        let count = r.u8().map_err(fail)?;
        for _ in 0..count {
            let idx = r.u16().map_err(fail)?;
            let bytes = r.take(ty.size()).map_err(fail)?;
            self.memory
                .fill_instance(InstanceRef { ctx, ty, idx }, 0, bytes)
                .map_err(|f| VmError::warning(f, Owner::ScalarDataParse, idx))?;
        }
        Ok(())
    }

    /// `INSTANCE_ARR_DATA`: `{ctx, type, count}` + count x
    /// `{idx:u16, start:u16, items:u16, data}`.
    fn parse_array_data(&mut self, payload: &[u8]) -> VmResult<()> {
        let fail = |f| VmError::abort(f, Owner::ArrayDataParse, 0);
        let mut r = Unpacker::new(payload);
        let ctx = r.u8().map_err(fail)?;
        let ty = DataType::try_from(r.u8().map_err(fail)?)
            .map_err(|_| fail(Fault::MemInvalidDatatype))?;
        let count = r.u8().map_err(fail)?;
        for _ in 0..count {
            let idx = r.u16().map_err(fail)?;
            let start = r.u16().map_err(fail)?;
            let items = r.u16().map_err(fail)?;
            let bytes = r.take(items as usize * ty.size()).map_err(fail)?;
            self.memory
                .fill_instance(InstanceRef { ctx, ty, idx }, start, bytes)
                .map_err(|f| VmError::warning(f, Owner::ArrayDataParse, idx))?;
        }
        Ok(())
    }

    /// `ACCESS_CFG`: `{descriptors:u16, total_indices:u16}`.
    fn parse_access_cfg(&mut self, payload: &[u8]) -> VmResult<()> {
        let fail = |f| VmError::abort(f, Owner::AccessAllocate, 0);
        let mut r = Unpacker::new(payload);
        let descriptors = r.u16().map_err(fail)?;
        let total_indices = r.u16().map_err(fail)?;
        if !r.is_empty() {
            return Err(fail(Fault::PacketIncomplete));
        }
        self.memory.access.allocate(descriptors, total_indices);
        Ok(())
    }

    /// `CODE_CFG`: `{block_count:u16}`.
    fn parse_code_cfg(&mut self, payload: &[u8]) -> VmResult<()> {
        let fail = |f| VmError::abort(f, Owner::CodeCfgParse, 0);
        let mut r = Unpacker::new(payload);
        let count = r.u16().map_err(fail)?;
        self.code.create(count);
        Ok(())
    }

    /// `BLOCK_HEADER`: `{block_idx:u16, block_type:u8,
    /// in_connected_mask:u16, in_cnt:u8, q_cnt:u8}`.
    fn parse_block_header(&mut self, payload: &[u8]) -> VmResult<()> {
        let fail = |f| VmError::abort(f, Owner::BlockHeaderParse, 0);
        let mut r = Unpacker::new(payload);
        let idx = r.u16().map_err(fail)?;
        let ty = BlockType::try_from(r.u8().map_err(fail)?)
            .map_err(|f| VmError::abort(f, Owner::BlockHeaderParse, idx))?;
        let mask = r.u16().map_err(fail)?;
        let in_cnt = r.u8().map_err(fail)?;
        let q_cnt = r.u8().map_err(fail)?;
        self.code
            .insert(Block::new(idx, ty, in_cnt, q_cnt, mask))
            .map_err(|f| VmError::abort(f, Owner::BlockHeaderParse, idx))?;
        tracing::debug!(block = idx, %ty, in_cnt, q_cnt, "block header parsed");
        Ok(())
    }

    /// `BLOCK_INPUTS` / `BLOCK_OUTPUTS`: `{block_idx:u16, slot:u8}` + one
    /// access-descriptor subtree.
    fn parse_block_port(&mut self, payload: &[u8], input: bool) -> VmResult<()> {
        let owner = if input {
            Owner::BlockInputParse
        } else {
            Owner::BlockOutputParse
        };
        let fail = |f| VmError::abort(f, owner, 0);
        let mut r = Unpacker::new(payload);
        let idx = r.u16().map_err(fail)?;
        let slot = r.u8().map_err(fail)? as usize;

        let access = self
            .memory
            .parse_access(&mut r)
            .map_err(|e| e.chain(owner, idx))?;

        let block = self
            .code
            .block_mut(idx as usize)
            .map_err(|f| VmError::abort(f, owner, idx))?;
        let ports = if input {
            &mut block.inputs
        } else {
            &mut block.outputs
        };
        let port = ports
            .get_mut(slot)
            .ok_or(VmError::abort(Fault::BlockInvalidParam, owner, idx))?;
        *port = Some(access);
        Ok(())
    }

    /// `BLOCK_DATA`: `{block_idx:u16, block_type:u8, packet_id:u8}` +
    /// block-specific payload, routed to the per-type parser.
    fn parse_block_data(&mut self, payload: &[u8]) -> VmResult<()> {
        let fail = |f| VmError::abort(f, Owner::BlockDataParse, 0);
        let mut r = Unpacker::new(payload);
        let idx = r.u16().map_err(fail)?;
        let ty = BlockType::try_from(r.u8().map_err(fail)?)
            .map_err(|f| VmError::abort(f, Owner::BlockDataParse, idx))?;
        let packet = BlockPacket::try_from(r.u8().map_err(fail)?)
            .map_err(|f| VmError::abort(f, Owner::BlockDataParse, idx))?;
        let rest = r.take(r.remaining()).map_err(fail)?;

        let Engine { memory, code, .. } = self;
        let block = code
            .block_mut(idx as usize)
            .map_err(|f| VmError::abort(f, Owner::BlockDataParse, idx))?;
        if block.ty != ty {
            return Err(VmError::abort(
                Fault::BlockInvalidParam,
                Owner::BlockDataParse,
                idx,
            ));
        }
        blocks::parse_block_data(memory, block, packet, rest)
            .map_err(|e| e.chain(Owner::BlockDataParse, idx))
    }

    /// `LOOP_CFG`: `{period_us:u32, max_skipped:u8}`.
    fn parse_loop_cfg(&mut self, payload: &[u8]) -> VmResult<()> {
        let fail = |f| VmError::abort(f, Owner::LoopInit, 0);
        let mut r = Unpacker::new(payload);
        let period_us = u64::from(r.u32().map_err(fail)?);
        let max_skipped = r.u8().map_err(fail)?;
        self.loop_cfg = LoopConfig {
            period_us: period_us
                .clamp(crate::consts::LOOP_PERIOD_MIN_US, crate::consts::LOOP_PERIOD_MAX_US),
            max_skipped,
        };
        tracing::debug!(period_us, max_skipped, "loop configured");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;

    fn context_cfg_frame(ctx: u8, heap: u32, instances: u16, dims: u16) -> Vec<u8> {
        let mut frame = vec![PacketHeader::ContextCfg.into(), ctx];
        for _ in 0..DataType::COUNT {
            frame.extend_from_slice(&heap.to_le_bytes());
            frame.extend_from_slice(&instances.to_le_bytes());
            frame.extend_from_slice(&dims.to_le_bytes());
        }
        frame
    }

    fn instance_head(ctx: u16, dims_cnt: u16, ty: DataType, can_clear: bool) -> u16 {
        ctx | (dims_cnt << 3) | ((ty as u16) << 7) | ((can_clear as u16) << 12)
    }

    #[test]
    fn instance_before_context_is_a_sequence_violation() {
        let mut engine = Engine::new();
        let mut frame = vec![PacketHeader::Instance.into()];
        frame.extend_from_slice(&instance_head(0, 0, DataType::U8, false).to_le_bytes());
        let err = engine.dispatch_packet(&frame).unwrap_err();
        assert_eq!(err.fault, Fault::SequenceViolation);
        assert_eq!(engine.memory().instance_count(0, DataType::U8), 0);
    }

    #[test]
    fn instances_parse_in_stream_order() {
        let mut engine = Engine::new();
        engine
            .dispatch_packet(&context_cfg_frame(0, 64, 8, 8))
            .unwrap();

        let mut frame = vec![PacketHeader::Instance.into()];
        frame.extend_from_slice(&instance_head(0, 0, DataType::F32, false).to_le_bytes());
        frame.extend_from_slice(&instance_head(0, 1, DataType::U8, false).to_le_bytes());
        frame.extend_from_slice(&4u16.to_le_bytes());
        frame.extend_from_slice(&instance_head(0, 0, DataType::F32, true).to_le_bytes());
        engine.dispatch_packet(&frame).unwrap();

        assert_eq!(engine.memory().instance_count(0, DataType::F32), 2);
        assert_eq!(engine.memory().instance_count(0, DataType::U8), 1);
    }

    #[test]
    fn repeated_context_cfg_reports_already_created() {
        let mut engine = Engine::new();
        engine
            .dispatch_packet(&context_cfg_frame(2, 16, 4, 4))
            .unwrap();
        let err = engine
            .dispatch_packet(&context_cfg_frame(2, 16, 4, 4))
            .unwrap_err();
        assert_eq!(err.fault, Fault::MemAlreadyCreated);
        assert!(!err.is_abort());
    }

    #[test]
    fn scalar_data_fill_is_idempotent() {
        let mut engine = Engine::new();
        engine
            .dispatch_packet(&context_cfg_frame(0, 16, 4, 4))
            .unwrap();
        let mut frame = vec![PacketHeader::Instance.into()];
        frame.extend_from_slice(&instance_head(0, 0, DataType::U16, false).to_le_bytes());
        engine.dispatch_packet(&frame).unwrap();

        let mut data = vec![PacketHeader::InstanceScalarData.into(), 0, DataType::U16.into(), 1];
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&0xbeefu16.to_le_bytes());
        engine.dispatch_packet(&data).unwrap();
        let snapshot = {
            let r = InstanceRef { ctx: 0, ty: DataType::U16, idx: 0 };
            let inst = *engine.memory().instance(r).unwrap();
            engine.memory().instance_bytes(&inst).unwrap().to_vec()
        };
        engine.dispatch_packet(&data).unwrap();
        let r = InstanceRef { ctx: 0, ty: DataType::U16, idx: 0 };
        let inst = *engine.memory().instance(r).unwrap();
        assert_eq!(engine.memory().instance_bytes(&inst).unwrap(), snapshot);
    }

    #[test]
    fn block_data_type_mismatch_is_rejected() {
        let mut engine = Engine::new();
        let mut frame = vec![PacketHeader::CodeCfg.into()];
        frame.extend_from_slice(&1u16.to_le_bytes());
        engine.dispatch_packet(&frame).unwrap();

        let mut frame = vec![PacketHeader::BlockHeader.into()];
        frame.extend_from_slice(&0u16.to_le_bytes());
        frame.push(BlockType::Math.into());
        frame.extend_from_slice(&0b1u16.to_le_bytes());
        frame.push(1);
        frame.push(2);
        engine.dispatch_packet(&frame).unwrap();

        let mut frame = vec![PacketHeader::BlockData.into()];
        frame.extend_from_slice(&0u16.to_le_bytes());
        frame.push(BlockType::Logic.into());
        frame.push(0x00);
        frame.push(0);
        let err = engine.dispatch_packet(&frame).unwrap_err();
        assert_eq!(err.fault, Fault::BlockInvalidParam);
    }
}

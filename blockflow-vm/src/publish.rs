//! Publish channel: pushes subscribed instances' data to the transport.
//!
//! Subscriptions are registered through `SUB_CFG`/`SUB_ADD` packets and
//! persist until a full reset. After every completed cycle the driver
//! asks the engine to publish; entries are packed into `PUBLISH`-tagged
//! frames up to the transport MTU.

use crate::consts::PUBLISH_MTU;
use crate::engine::Engine;
use crate::error::{Owner, VmError, VmResult};
use crate::memory::{InstanceRef, Memory};
use crate::transport::Transport;
use blockflow_asm::{Fault, PacketHeader, Unpacker};
use blockflow_types::DataType;

/// One subscribed instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PubEntry {
    target: InstanceRef,
    /// Element count, precomputed at registration.
    el_cnt: u16,
}

/// Subscription list of the publish channel.
#[derive(Debug, Default)]
pub struct Subscriptions {
    list: Vec<PubEntry>,
    cap: usize,
}

impl Subscriptions {
    /// Registered instance count.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// True when nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Drop every subscription (part of `RESET_ALL`).
    pub fn reset(&mut self) {
        self.list.clear();
        self.cap = 0;
    }
}

fn encode_entry(mem: &Memory, entry: &PubEntry, out: &mut Vec<u8>) -> Result<(), Fault> {
    let inst = mem.instance(entry.target)?;
    out.extend_from_slice(&entry.target.idx.to_le_bytes());
    out.push(
        (entry.target.ctx & 0x07) | ((entry.target.ty as u8) << 3) | ((inst.updated as u8) << 7),
    );
    out.extend_from_slice(&entry.el_cnt.to_le_bytes());
    out.extend_from_slice(mem.instance_bytes(inst)?);
    Ok(())
}

impl Engine {
    /// `SUB_CFG`: `{capacity:u16}` sizes the subscription list.
    pub(crate) fn parse_sub_cfg(&mut self, payload: &[u8]) -> VmResult<()> {
        let fail = |f| VmError::abort(f, Owner::SubCfgParse, 0);
        let mut r = Unpacker::new(payload);
        let cap = r.u16().map_err(fail)? as usize;
        self.subs.list = Vec::with_capacity(cap);
        self.subs.cap = cap;
        tracing::debug!(cap, "subscription list allocated");
        Ok(())
    }

    /// `SUB_ADD`: `{ctx:u8, count:u8}` + count x `{type:u8, inst_idx:u16}`.
    pub(crate) fn parse_sub_add(&mut self, payload: &[u8]) -> VmResult<()> {
        let fail = |f| VmError::abort(f, Owner::SubAddParse, 0);
        let mut r = Unpacker::new(payload);
        let ctx = r.u8().map_err(fail)?;
        let count = r.u8().map_err(fail)?;
        for _ in 0..count {
            let ty = DataType::try_from(r.u8().map_err(fail)?)
                .map_err(|_| fail(Fault::MemInvalidDatatype))?;
            let idx = r.u16().map_err(fail)?;
            if self.subs.list.len() >= self.subs.cap {
                return Err(VmError::abort(Fault::NoMem, Owner::SubAddParse, idx));
            }
            let target = InstanceRef { ctx, ty, idx };
            let inst = *self
                .memory
                .instance(target)
                .map_err(|f| VmError::abort(f, Owner::SubAddParse, idx))?;
            let el_cnt = self
                .memory
                .elem_count(&inst)
                .map_err(|f| VmError::abort(f, Owner::SubAddParse, idx))?
                .min(u32::from(u16::MAX)) as u16;
            self.subs.list.push(PubEntry { target, el_cnt });
            tracing::debug!(ctx, %ty, idx, el_cnt, "subscription registered");
        }
        Ok(())
    }

    /// Pack every subscribed instance into `PUBLISH` frames and send them.
    ///
    /// Called by the driver after each completed cycle; a no-op without
    /// subscriptions. An entry too large for the MTU is skipped with a
    /// warning rather than truncated.
    pub fn publish(&self, transport: &mut dyn Transport) {
        if self.subs.is_empty() {
            return;
        }
        let mut frame = vec![u8::from(PacketHeader::Publish)];
        for entry in &self.subs.list {
            let mut item = Vec::new();
            if let Err(fault) = encode_entry(&self.memory, entry, &mut item) {
                tracing::warn!(?entry, %fault, "skipping unreadable subscription");
                continue;
            }
            if item.len() + 1 > PUBLISH_MTU {
                tracing::warn!(?entry, "instance data too large for one frame");
                continue;
            }
            if frame.len() + item.len() > PUBLISH_MTU {
                transport.send(&frame);
                frame.truncate(1);
            }
            frame.extend_from_slice(&item);
        }
        if frame.len() > 1 {
            transport.send(&frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ContextCaps, TypeCaps};
    use crate::transport::RecordingTransport;

    fn engine_with_vars() -> Engine {
        let mut engine = Engine::new();
        let caps = ContextCaps {
            types: [TypeCaps {
                heap_elements: 64,
                max_instances: 8,
                max_dims: 8,
            }; DataType::COUNT],
        };
        engine.memory.allocate_context(0, &caps).unwrap();
        engine.memory.create_instance(0, DataType::U16, &[], false).unwrap();
        engine.memory.create_instance(0, DataType::U8, &[4], false).unwrap();
        engine
            .memory
            .fill_instance(InstanceRef { ctx: 0, ty: DataType::U16, idx: 0 }, 0, &[0x34, 0x12])
            .unwrap();
        engine
            .memory
            .fill_instance(
                InstanceRef { ctx: 0, ty: DataType::U8, idx: 1 },
                0,
                &[1, 2, 3, 4],
            )
            .unwrap();
        engine
    }

    #[test]
    fn publish_packs_subscribed_instances() {
        let mut engine = engine_with_vars();
        engine.parse_sub_cfg(&2u16.to_le_bytes()).unwrap();
        let mut add = vec![0u8, 2];
        add.push(DataType::U16.into());
        add.extend_from_slice(&0u16.to_le_bytes());
        add.push(DataType::U8.into());
        add.extend_from_slice(&1u16.to_le_bytes());
        engine.parse_sub_add(&add).unwrap();

        let mut transport = RecordingTransport::default();
        engine.publish(&mut transport);

        assert_eq!(transport.frames.len(), 1);
        let frame = &transport.frames[0];
        assert_eq!(frame[0], u8::from(PacketHeader::Publish));
        // item 0: idx=0, head (ctx 0, U16, updated), el_cnt=1, 2 bytes
        assert_eq!(&frame[1..3], &0u16.to_le_bytes());
        assert_eq!(frame[3], (DataType::U16 as u8) << 3 | 1 << 7);
        assert_eq!(&frame[4..6], &1u16.to_le_bytes());
        assert_eq!(&frame[6..8], &[0x34, 0x12]);
        // item 1: idx=1, U8 array of 4
        assert_eq!(&frame[8..10], &1u16.to_le_bytes());
        assert_eq!(&frame[11..13], &4u16.to_le_bytes());
        assert_eq!(&frame[13..17], &[1, 2, 3, 4]);
    }

    #[test]
    fn subscription_capacity_is_enforced() {
        let mut engine = engine_with_vars();
        engine.parse_sub_cfg(&1u16.to_le_bytes()).unwrap();
        let mut add = vec![0u8, 2];
        add.push(DataType::U16.into());
        add.extend_from_slice(&0u16.to_le_bytes());
        add.push(DataType::U8.into());
        add.extend_from_slice(&1u16.to_le_bytes());
        let err = engine.parse_sub_add(&add).unwrap_err();
        assert_eq!(err.fault, Fault::NoMem);
    }

    #[test]
    fn publish_without_subscriptions_sends_nothing() {
        let engine = engine_with_vars();
        let mut transport = RecordingTransport::default();
        engine.publish(&mut transport);
        assert!(transport.frames.is_empty());
    }
}

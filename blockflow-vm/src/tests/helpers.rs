//! Packet builders and a preloaded engine for the scenario tests.
//!
//! Everything goes through [`Engine::dispatch_packet`], so each test also
//! exercises the wire format of the packets it uses.

use crate::engine::{Engine, TickCtx};
use crate::error::VmResult;
use crate::memory::{InstanceRef, Location};
use blockflow_asm::{BlockPacket, BlockType, Op, PacketHeader};
use blockflow_types::{DataType, Value};

/// Milliseconds each synchronous test tick advances the time base.
pub const TICK_MS: u32 = 10;

/// Wire bytes of an access-descriptor head.
pub fn desc_head(ty: DataType, ctx: u8, dims_cnt: u8, static_mask: u8, idx: u16) -> Vec<u8> {
    let mut out = vec![(ty as u8) | (ctx << 4), dims_cnt | (static_mask << 3)];
    out.extend_from_slice(&idx.to_le_bytes());
    out
}

/// Wire bytes of a whole-instance (scalar) descriptor.
pub fn desc_scalar(ty: DataType, idx: u16) -> Vec<u8> {
    desc_head(ty, 0, 0, 0, idx)
}

/// `CONSTANTS` payload from a float slice.
pub fn constants(values: &[f32]) -> Vec<u8> {
    let mut payload = vec![values.len() as u8];
    for v in values {
        payload.extend_from_slice(&v.to_le_bytes());
    }
    payload
}

/// `INSTRUCTIONS` payload from `(op, arg)` pairs.
pub fn instructions(code: &[(Op, u8)]) -> Vec<u8> {
    let mut payload = vec![code.len() as u8];
    for &(op, arg) in code {
        payload.push(op as u8);
        payload.push(arg);
    }
    payload
}

/// Engine with context 0 and an access slab ready for code loading.
pub struct TestBed {
    pub engine: Engine,
}

impl TestBed {
    pub fn new() -> Self {
        let mut bed = TestBed {
            engine: Engine::new(),
        };
        bed.init_base();
        bed
    }

    /// Allocate context 0 and the access slab; also used to rebuild after
    /// a full reset.
    pub fn init_base(&mut self) {
        let mut frame = vec![u8::from(PacketHeader::ContextCfg), 0];
        for _ in 0..DataType::COUNT {
            frame.extend_from_slice(&256u32.to_le_bytes());
            frame.extend_from_slice(&32u16.to_le_bytes());
            frame.extend_from_slice(&32u16.to_le_bytes());
        }
        self.dispatch(&frame);

        let mut frame = vec![u8::from(PacketHeader::AccessCfg)];
        frame.extend_from_slice(&64u16.to_le_bytes());
        frame.extend_from_slice(&64u16.to_le_bytes());
        self.dispatch(&frame);
    }

    pub fn dispatch(&mut self, frame: &[u8]) {
        self.engine
            .dispatch_packet(frame)
            .unwrap_or_else(|e| panic!("packet failed: {e}"));
    }

    fn instance(&mut self, ty: DataType, dims: &[u16], can_clear: bool) -> u16 {
        let head = (dims.len() as u16) << 3 | (ty as u16) << 7 | (can_clear as u16) << 12;
        let mut frame = vec![u8::from(PacketHeader::Instance)];
        frame.extend_from_slice(&head.to_le_bytes());
        for d in dims {
            frame.extend_from_slice(&d.to_le_bytes());
        }
        self.dispatch(&frame);
        self.engine.memory().instance_count(0, ty) - 1
    }

    /// Plain scalar variable, optionally with an initial value.
    pub fn scalar(&mut self, ty: DataType, value: Option<Value>) -> u16 {
        let idx = self.instance(ty, &[], false);
        if let Some(v) = value {
            self.set_scalar(ty, idx, v);
        }
        idx
    }

    /// Derived-output scalar (`can_clear`, starts not updated).
    pub fn output(&mut self, ty: DataType) -> u16 {
        self.instance(ty, &[], true)
    }

    /// Array variable filled from raw element bytes.
    pub fn array(&mut self, ty: DataType, dims: &[u16], bytes: &[u8]) -> u16 {
        let idx = self.instance(ty, dims, false);
        let mut frame = vec![u8::from(PacketHeader::InstanceArrData), 0, ty.into(), 1];
        frame.extend_from_slice(&idx.to_le_bytes());
        frame.extend_from_slice(&0u16.to_le_bytes());
        frame.extend_from_slice(&((bytes.len() / ty.size()) as u16).to_le_bytes());
        frame.extend_from_slice(bytes);
        self.dispatch(&frame);
        idx
    }

    /// Always-true boolean, the usual EN wiring.
    pub fn en_const(&mut self) -> u16 {
        self.scalar(DataType::B, Some(Value::B(true)))
    }

    /// Overwrite a scalar through the data-fill path.
    pub fn set_scalar(&mut self, ty: DataType, idx: u16, value: Value) {
        let mut bytes = [0u8; 4];
        let n = value.coerce(ty).write_le(&mut bytes);
        let mut frame = vec![u8::from(PacketHeader::InstanceScalarData), 0, ty.into(), 1];
        frame.extend_from_slice(&idx.to_le_bytes());
        frame.extend_from_slice(&bytes[..n]);
        self.dispatch(&frame);
    }

    pub fn code(&mut self, count: u16) {
        let mut frame = vec![u8::from(PacketHeader::CodeCfg)];
        frame.extend_from_slice(&count.to_le_bytes());
        self.dispatch(&frame);
    }

    pub fn block(&mut self, idx: u16, ty: BlockType, mask: u16, in_cnt: u8, q_cnt: u8) {
        let mut frame = vec![u8::from(PacketHeader::BlockHeader)];
        frame.extend_from_slice(&idx.to_le_bytes());
        frame.push(ty.into());
        frame.extend_from_slice(&mask.to_le_bytes());
        frame.push(in_cnt);
        frame.push(q_cnt);
        self.dispatch(&frame);
    }

    pub fn wire(&mut self, block: u16, slot: u8, input: bool, descriptor: &[u8]) {
        let header = if input {
            PacketHeader::BlockInputs
        } else {
            PacketHeader::BlockOutputs
        };
        let mut frame = vec![u8::from(header)];
        frame.extend_from_slice(&block.to_le_bytes());
        frame.push(slot);
        frame.extend_from_slice(descriptor);
        self.dispatch(&frame);
    }

    pub fn input(&mut self, block: u16, slot: u8, ty: DataType, inst: u16) {
        self.wire(block, slot, true, &desc_scalar(ty, inst));
    }

    pub fn out(&mut self, block: u16, slot: u8, ty: DataType, inst: u16) {
        self.wire(block, slot, false, &desc_scalar(ty, inst));
    }

    pub fn data(&mut self, block: u16, ty: BlockType, packet: BlockPacket, payload: &[u8]) {
        let mut frame = vec![u8::from(PacketHeader::BlockData)];
        frame.extend_from_slice(&block.to_le_bytes());
        frame.push(ty.into());
        frame.push(packet.id());
        frame.extend_from_slice(payload);
        self.dispatch(&frame);
    }

    /// Current value of a scalar instance.
    pub fn value(&self, ty: DataType, idx: u16) -> Value {
        let inst = *self
            .engine
            .memory()
            .instance(InstanceRef { ctx: 0, ty, idx })
            .unwrap();
        self.engine
            .memory()
            .read_at(Location {
                ctx: inst.ctx,
                ty: inst.ty,
                elem_offset: inst.elem_offset,
            })
            .unwrap()
    }

    pub fn updated(&self, ty: DataType, idx: u16) -> bool {
        self.engine
            .memory()
            .instance(InstanceRef { ctx: 0, ty, idx })
            .unwrap()
            .updated
    }

    /// One synchronous tick at the given time.
    pub fn tick_at(&mut self, time_ms: u64, cycle: u64) -> VmResult<()> {
        self.engine
            .execute_tick(&TickCtx::unmonitored(time_ms, cycle, TICK_MS))
    }

    /// Run `n` ticks, 10 ms apart, starting at 10 ms.
    pub fn run(&mut self, n: u64) {
        for i in 0..n {
            self.tick_at((i + 1) * u64::from(TICK_MS), i + 1).unwrap();
        }
    }
}

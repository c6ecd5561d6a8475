use crate::Fault;
use blockflow_types::{DataType, Value};

/// Cursor over a packet payload, reading little-endian fields.
///
/// Every read is bounds-checked; running past the end yields
/// [`Fault::PacketIncomplete`], which is the only failure mode.
#[derive(Debug, Clone, Copy)]
pub struct Unpacker<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Unpacker<'a> {
    /// Start reading at the beginning of `data`.
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// True when every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Consume `n` raw bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], Fault> {
        let end = self.pos.checked_add(n).ok_or(Fault::PacketIncomplete)?;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or(Fault::PacketIncomplete)?;
        self.pos = end;
        Ok(bytes)
    }

    /// Consume one byte.
    pub fn u8(&mut self) -> Result<u8, Fault> {
        Ok(self.take(1)?[0])
    }

    /// Consume a little-endian `u16`.
    pub fn u16(&mut self) -> Result<u16, Fault> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Consume a little-endian `u32`.
    pub fn u32(&mut self) -> Result<u32, Fault> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Consume a little-endian `f32`.
    pub fn f32(&mut self) -> Result<f32, Fault> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Consume one element of the given type.
    pub fn value(&mut self, ty: DataType) -> Result<Value, Fault> {
        let bytes = self.take(ty.size())?;
        Value::read_le(ty, bytes).ok_or(Fault::PacketIncomplete)
    }
}

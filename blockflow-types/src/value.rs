use crate::DataType;

/// A runtime value tagged with its [`DataType`].
///
/// Values of this type travel between memory, the expression evaluator and
/// block outputs. Writing a value into memory coerces it to the destination
/// type; see [`Value::coerce`] for the exact contract.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    /// Unsigned 8-bit integer.
    U8(u8),
    /// Unsigned 16-bit integer.
    U16(u16),
    /// Unsigned 32-bit integer.
    U32(u32),
    /// Signed 16-bit integer.
    I16(i16),
    /// Signed 32-bit integer.
    I32(i32),
    /// Boolean.
    B(bool),
    /// Single precision float.
    F32(f32),
}

impl Value {
    /// Type tag of this value.
    pub const fn ty(&self) -> DataType {
        match self {
            Self::U8(_) => DataType::U8,
            Self::U16(_) => DataType::U16,
            Self::U32(_) => DataType::U32,
            Self::I16(_) => DataType::I16,
            Self::I32(_) => DataType::I32,
            Self::B(_) => DataType::B,
            Self::F32(_) => DataType::F32,
        }
    }

    /// Zero value of the given type.
    pub const fn zero(ty: DataType) -> Self {
        match ty {
            DataType::U8 => Self::U8(0),
            DataType::U16 => Self::U16(0),
            DataType::U32 => Self::U32(0),
            DataType::I16 => Self::I16(0),
            DataType::I32 => Self::I32(0),
            DataType::B => Self::B(false),
            DataType::F32 => Self::F32(0.0),
        }
    }

    /// Numeric view of the value as `f32`; booleans map to `0.0`/`1.0`.
    pub fn as_f32(&self) -> f32 {
        match *self {
            Self::U8(v) => v as f32,
            Self::U16(v) => v as f32,
            Self::U32(v) => v as f32,
            Self::I16(v) => v as f32,
            Self::I32(v) => v as f32,
            Self::B(v) => v as u8 as f32,
            Self::F32(v) => v,
        }
    }

    /// Truthiness of the value: anything other than zero is `true`.
    pub fn as_bool(&self) -> bool {
        match *self {
            Self::U8(v) => v != 0,
            Self::U16(v) => v != 0,
            Self::U32(v) => v != 0,
            Self::I16(v) => v != 0,
            Self::I32(v) => v != 0,
            Self::B(v) => v,
            Self::F32(v) => v != 0.0,
        }
    }

    /// Saturating view as `u16`, used to resolve dynamic array indices.
    ///
    /// Floats are rounded half away from zero first; negative values clamp
    /// to zero, values past `u16::MAX` clamp to `u16::MAX`.
    pub fn as_u16(&self) -> u16 {
        match *self {
            Self::U8(v) => v as u16,
            Self::U16(v) => v,
            Self::U32(v) => v.min(u16::MAX as u32) as u16,
            Self::I16(v) => v.max(0) as u16,
            Self::I32(v) => v.clamp(0, u16::MAX as i32) as u16,
            Self::B(v) => v as u16,
            // `as` saturates and maps NaN to 0
            Self::F32(v) => v.round() as u16,
        }
    }

    /// Coerce the value to the destination type.
    ///
    /// Matching types pass through unchanged. Any other combination goes
    /// through `f32`: integer destinations round half away from zero and
    /// saturate to the destination range, float destinations take the plain
    /// cast, boolean destinations compare against zero. The function is total
    /// over all 7x7 type pairs.
    pub fn coerce(self, ty: DataType) -> Self {
        if self.ty() == ty {
            return self;
        }
        let v = self.as_f32();
        // float-to-int `as` casts saturate, which carries the clamping
        match ty {
            DataType::U8 => Self::U8(v.round() as u8),
            DataType::U16 => Self::U16(v.round() as u16),
            DataType::U32 => Self::U32(v.round() as u32),
            DataType::I16 => Self::I16(v.round() as i16),
            DataType::I32 => Self::I32(v.round() as i32),
            DataType::B => Self::B(v != 0.0),
            DataType::F32 => Self::F32(v),
        }
    }

    /// Decode a value of type `ty` from little-endian bytes.
    ///
    /// Returns `None` when `bytes` is shorter than the element size.
    pub fn read_le(ty: DataType, bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..ty.size())?;
        let value = match ty {
            DataType::U8 => Self::U8(bytes[0]),
            DataType::U16 => Self::U16(u16::from_le_bytes([bytes[0], bytes[1]])),
            DataType::U32 => {
                Self::U32(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            DataType::I16 => Self::I16(i16::from_le_bytes([bytes[0], bytes[1]])),
            DataType::I32 => {
                Self::I32(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            DataType::B => Self::B(bytes[0] != 0),
            DataType::F32 => {
                Self::F32(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
        };
        Some(value)
    }

    /// Encode the value as little-endian bytes into `out`.
    ///
    /// `out` must be at least [`DataType::size`] bytes long; the written
    /// length is returned.
    pub fn write_le(&self, out: &mut [u8]) -> usize {
        let size = self.ty().size();
        match *self {
            Self::U8(v) => out[0] = v,
            Self::U16(v) => out[..2].copy_from_slice(&v.to_le_bytes()),
            Self::U32(v) => out[..4].copy_from_slice(&v.to_le_bytes()),
            Self::I16(v) => out[..2].copy_from_slice(&v.to_le_bytes()),
            Self::I32(v) => out[..4].copy_from_slice(&v.to_le_bytes()),
            Self::B(v) => out[0] = v as u8,
            Self::F32(v) => out[..4].copy_from_slice(&v.to_le_bytes()),
        }
        size
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::B(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::F32(v)
    }
}

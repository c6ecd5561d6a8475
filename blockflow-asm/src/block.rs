use crate::Fault;
use core::fmt;

/// Block type identification tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum BlockType {
    /// Bytecode arithmetic over `f32`.
    Math = 0x01,
    /// Copy a value into a target variable.
    Set = 0x02,
    /// Bytecode comparisons and boolean algebra.
    Logic = 0x03,
    /// Up/down counter with edge or level counting.
    Counter = 0x04,
    /// Periodic pulse generator.
    Clock = 0x05,
    /// Iterated execution of the following child chain.
    For = 0x08,
    /// TON/TOF/TP timer, optionally inverted.
    Timer = 0x09,
    /// Mirror one of N option inputs to the output.
    InSelector = 0x0A,
    /// Drive exactly one of N boolean outputs.
    QSelector = 0x0B,
    /// SR/RS latch.
    Latch = 0x0C,
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<BlockType> for u8 {
    fn from(ty: BlockType) -> u8 {
        ty as u8
    }
}

impl TryFrom<u8> for BlockType {
    type Error = Fault;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        use BlockType::*;
        match b {
            0x01 => Ok(Math),
            0x02 => Ok(Set),
            0x03 => Ok(Logic),
            0x04 => Ok(Counter),
            0x05 => Ok(Clock),
            0x08 => Ok(For),
            0x09 => Ok(Timer),
            0x0A => Ok(InSelector),
            0x0B => Ok(QSelector),
            0x0C => Ok(Latch),
            _ => Err(Fault::BlockInvalidParam),
        }
    }
}

/// Payload kind of a `BLOCK_DATA` packet.
///
/// Wire format after the common header: `[packet_id:u8][data...]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BlockPacket {
    /// Constant pool: `{count:u8, f32 x count}`.
    Constants,
    /// Block-specific configuration.
    Cfg,
    /// Evaluator bytecode: `{count:u8, {op,arg} x count}`.
    Instructions,
    /// Selector option slot `n` (wire id `0x20 + n`).
    OptionSlot(u8),
}

impl BlockPacket {
    /// First wire id of the option-slot range.
    pub const OPTION_BASE: u8 = 0x20;
    /// Last wire id of the option-slot range.
    pub const OPTION_LAST: u8 = 0x3F;

    /// Wire id of the packet kind.
    pub const fn id(self) -> u8 {
        match self {
            Self::Constants => 0x00,
            Self::Cfg => 0x01,
            Self::Instructions => 0x10,
            Self::OptionSlot(n) => Self::OPTION_BASE + n,
        }
    }
}

impl TryFrom<u8> for BlockPacket {
    type Error = Fault;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        match b {
            0x00 => Ok(Self::Constants),
            0x01 => Ok(Self::Cfg),
            0x10 => Ok(Self::Instructions),
            Self::OPTION_BASE..=Self::OPTION_LAST => {
                Ok(Self::OptionSlot(b - Self::OPTION_BASE))
            }
            _ => Err(Fault::PacketNotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn block_type_tag_round_trip() {
        for ty in BlockType::iter() {
            assert_eq!(BlockType::try_from(ty as u8).unwrap(), ty);
        }
        assert!(BlockType::try_from(0x00).is_err());
        assert!(BlockType::try_from(0x06).is_err());
    }

    #[test]
    fn option_slot_ids() {
        assert_eq!(BlockPacket::try_from(0x20), Ok(BlockPacket::OptionSlot(0)));
        assert_eq!(BlockPacket::try_from(0x2a), Ok(BlockPacket::OptionSlot(10)));
        assert_eq!(BlockPacket::OptionSlot(3).id(), 0x23);
        assert!(BlockPacket::try_from(0x40).is_err());
    }
}

use crate::Fault;
use core::fmt;

/// First byte of every framed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum PacketHeader {
    /// Context capacity declaration.
    ContextCfg = 0xF0,
    /// Instance creation stream.
    Instance = 0xF1,
    /// Access-descriptor slab sizing.
    AccessCfg = 0xF2,
    /// Initial data for scalar instances.
    InstanceScalarData = 0xFA,
    /// Initial data for array instance regions.
    InstanceArrData = 0xFB,

    /// Loop period and skip budget.
    LoopCfg = 0xA0,
    /// Total block count of the code graph.
    CodeCfg = 0xAA,

    /// Block record header.
    BlockHeader = 0xB0,
    /// One block input slot wired to an access descriptor.
    BlockInputs = 0xB1,
    /// One block output slot wired to an access descriptor.
    BlockOutputs = 0xB2,
    /// Block-specific payload routed to the per-type parser.
    BlockData = 0xBA,

    /// Outbound frame carrying subscribed instance data.
    Publish = 0xD0,
    /// Outbound frame carrying a block-state debug dump.
    DebugDump = 0xDB,
    /// Subscription list sizing.
    SubCfg = 0xD1,
    /// Subscription registration.
    SubAdd = 0xD2,
}

impl fmt::Display for PacketHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}(0x{:02x})", *self as u8)
    }
}

impl From<PacketHeader> for u8 {
    fn from(h: PacketHeader) -> u8 {
        h as u8
    }
}

impl TryFrom<u8> for PacketHeader {
    type Error = Fault;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        use PacketHeader::*;
        match b {
            0xF0 => Ok(ContextCfg),
            0xF1 => Ok(Instance),
            0xF2 => Ok(AccessCfg),
            0xFA => Ok(InstanceScalarData),
            0xFB => Ok(InstanceArrData),
            0xA0 => Ok(LoopCfg),
            0xAA => Ok(CodeCfg),
            0xB0 => Ok(BlockHeader),
            0xB1 => Ok(BlockInputs),
            0xB2 => Ok(BlockOutputs),
            0xBA => Ok(BlockData),
            0xD0 => Ok(Publish),
            0xDB => Ok(DebugDump),
            0xD1 => Ok(SubCfg),
            0xD2 => Ok(SubAdd),
            _ => Err(Fault::PacketNotFound),
        }
    }
}

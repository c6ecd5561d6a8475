use crate::Fault;

/// 16-bit control command ids.
///
/// A control packet carries the command id in its first two bytes
/// (little-endian), followed by a command-specific payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
pub enum Command {
    /// Return the engine to its startup state: loop, code and memory gone.
    ResetAll = 0x0001,
    /// Drop the code graph and per-block state, keep memory contexts.
    ResetBlocks = 0x0002,
    /// Start or resume the periodic loop.
    LoopStart = 0x1000,
    /// Pause the periodic loop.
    LoopStop = 0x2000,
    /// Construct the loop driver.
    LoopInit = 0x3000,
    /// Change the loop period; payload `{period_us: u32}`.
    SetPeriod = 0x4000,
    /// Execute one synchronous cycle while the loop is not running.
    RunOnce = 0x5000,
    /// Execute a single block and dump the code state; debug aid.
    RunOneStep = 0x7000,
}

impl From<Command> for u16 {
    fn from(cmd: Command) -> u16 {
        cmd as u16
    }
}

impl TryFrom<u16> for Command {
    type Error = Fault;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        use Command::*;
        match id {
            0x0001 => Ok(ResetAll),
            0x0002 => Ok(ResetBlocks),
            0x1000 => Ok(LoopStart),
            0x2000 => Ok(LoopStop),
            0x3000 => Ok(LoopInit),
            0x4000 => Ok(SetPeriod),
            0x5000 => Ok(RunOnce),
            0x7000 => Ok(RunOneStep),
            _ => Err(Fault::PacketNotFound),
        }
    }
}

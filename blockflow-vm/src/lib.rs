//! Blockflow dataflow execution engine.
//!
//! User-authored code arrives as framed binary packets, is validated and
//! assembled into a graph of functional blocks over typed shared memory,
//! then executed deterministically on a periodic tick with a skip-budget
//! watchdog. See [`controller::Controller`] for the packet entry point and
//! [`engine::Engine`] for the runtime state.

pub mod blocks;
pub mod consts;
pub mod controller;
pub mod debug;
pub mod driver;
pub mod engine;
pub mod error;
pub mod eval;
pub mod logging;
pub mod memory;
pub mod parser;
pub mod publish;
pub mod state;
pub mod transport;

#[cfg(test)]
mod tests;

pub mod prelude {
    //! Common imports for hosts embedding the engine.

    pub use blockflow_asm::{BlockPacket, BlockType, Command, Fault, Instr, Op, PacketHeader};
    pub use blockflow_types::{DataType, Value};

    pub use crate::controller::Controller;
    pub use crate::driver::TickDriver;
    pub use crate::engine::{Engine, LoopConfig, TickCtx};
    pub use crate::error::{Owner, Severity, VmError, VmResult};
    pub use crate::memory::{Access, AccessId, ContextCaps, Memory, TypeCaps};
    pub use crate::state::{BlockOutcome, LoopStatus};
    pub use crate::transport::{NullTransport, RecordingTransport, Transport};
}

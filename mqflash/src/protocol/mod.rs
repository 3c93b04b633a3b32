//! Protocol implementations.

pub mod checksum;
pub mod frame;

// Re-export common types
pub use frame::{Command, FrameError, Opcode, ParsedFrame, Status};

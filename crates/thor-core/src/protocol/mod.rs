//! Protocol module - Thor wire format definitions.

pub mod constants;
pub mod frame;
pub mod response;

pub use constants::*;
pub use frame::{CodecError, Command, CommandFrame, Opcode, SequenceEnd};
pub use response::Response;

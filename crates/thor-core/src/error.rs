//! Error taxonomy for the Thor engine.
//!
//! Each layer owns its error type; `ThorError` is what the orchestrator
//! surfaces, and `exit_code` maps it onto the command-line contract.

use std::io;
use thiserror::Error;

use crate::pit::PitError;
use crate::protocol::CodecError;
use crate::session::SessionState;
use crate::transfer::{TransferError, TransferProgress};
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum ThorError {
    #[error("Handshake failed: {reason}")]
    HandshakeFailed { reason: String },

    #[error("Session not active (state: {state})")]
    SessionNotActive { state: SessionState },

    #[error("Cannot {operation} while session is {state}")]
    InvalidTransition {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Unknown partition: {0}")]
    UnknownPartition(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cancelled: {progress}")]
    Cancelled { progress: TransferProgress },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Protocol violation: {0}")]
    Codec(#[from] CodecError),

    #[error("PIT error: {0}")]
    Pit(#[from] PitError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Process exit codes, one per error category.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const OTHER: i32 = 1;
    pub const HANDSHAKE: i32 = 2;
    pub const SESSION: i32 = 3;
    pub const TRANSPORT: i32 = 4;
    pub const PROTOCOL: i32 = 5;
    pub const TRANSFER: i32 = 6;
    pub const INTEGRITY: i32 = 7;
    pub const CANCELLED: i32 = 8;
}

impl ThorError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ThorError::HandshakeFailed { .. } => exit_code::HANDSHAKE,
            ThorError::SessionNotActive { .. } | ThorError::InvalidTransition { .. } => {
                exit_code::SESSION
            }
            ThorError::Transport(_) | ThorError::Transfer(TransferError::Transport { .. }) => {
                exit_code::TRANSPORT
            }
            ThorError::Codec(_)
            | ThorError::Pit(_)
            | ThorError::Transfer(TransferError::Codec { .. }) => exit_code::PROTOCOL,
            ThorError::Transfer(TransferError::IntegrityMismatch { .. }) => exit_code::INTEGRITY,
            ThorError::Transfer(TransferError::Cancelled { .. }) | ThorError::Cancelled { .. } => {
                exit_code::CANCELLED
            }
            ThorError::Transfer(_) => exit_code::TRANSFER,
            ThorError::UnsupportedOperation(_)
            | ThorError::UnknownPartition(_)
            | ThorError::InvalidConfig(_)
            | ThorError::Io(_) => exit_code::OTHER,
        }
    }

    /// Whether the device went away while this error was produced.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ThorError::Transport(e) => e.is_disconnect(),
            ThorError::Transfer(TransferError::Transport { source, .. }) => source.is_disconnect(),
            _ => false,
        }
    }
}

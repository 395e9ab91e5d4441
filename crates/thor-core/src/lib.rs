//! Thor-Core: Samsung Thor download-mode protocol implementation in Rust.
//!
//! This crate drives the bootloader protocol spoken by Samsung devices in
//! download mode: handshake, packet size negotiation, PIT retrieval and
//! upload, and sequenced partition flashing.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Transport**: USB bulk channel abstraction (nusb, mock)
//! - **Protocol**: Command frames, response frames, wire constants
//! - **PIT**: Partition Information Table model
//! - **Session**: Handshake, negotiation and session configuration
//! - **Transfer**: Stop-and-wait chunked upload engine
//! - **Events**: Observer pattern for UI decoupling
//! - **Thor**: High-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use std::fs::File;
//! use thor_core::{NusbTransport, PartitionSelector, SessionConfig, Thor};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = NusbTransport::open()?;
//! let mut thor = Thor::new(transport, SessionConfig::default());
//!
//! thor.begin()?;
//! thor.read_pit()?;
//! let image = File::open("boot.img")?;
//! let size = image.metadata()?.len();
//! thor.flash(&PartitionSelector::Name("BOOT".into()), image, size)?;
//! thor.reboot()?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod events;
mod exchange;
pub mod pit;
pub mod protocol;
pub mod session;
pub mod thor;
pub mod transfer;
pub mod transport;

// Re-exports for convenience
pub use error::{ThorError, exit_code};
pub use events::{
    NullObserver, PacketDirection, ThorEvent, ThorObserver, ThorPhase, TracingObserver,
};
pub use pit::{BinaryType, DeviceType, PartitionSelector, PitEntry, PitError, PitTable, RawPartition};
pub use protocol::{CodecError, Command, CommandFrame, Opcode, Response};
pub use session::{Capabilities, Session, SessionConfig, SessionState};
pub use thor::Thor;
pub use transfer::{
    CancelToken, FlashOptions, FlashTarget, TransferError, TransferJob, TransferProgress,
    TransferReport,
};
pub use transport::{MockTransport, NusbTransport, TransportError, UsbTransport};

//! Event system for UI decoupling.
//!
//! Front-ends subscribe to session progress through [`ThorObserver`]
//! instead of scraping logs.

use std::fmt;

/// Coarse stages of a Thor session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThorPhase {
    /// No session yet.
    Idle,
    /// ODIN/LOKE exchange and negotiation.
    Handshake,
    /// Session open, waiting for a command.
    Active,
    PitDownload,
    PitUpload,
    /// Partition image upload in progress.
    Flashing,
    /// Session closed.
    Ended,
    Error,
}

impl fmt::Display for ThorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThorPhase::Idle => write!(f, "Idle"),
            ThorPhase::Handshake => write!(f, "Handshake"),
            ThorPhase::Active => write!(f, "Active"),
            ThorPhase::PitDownload => write!(f, "PIT Download"),
            ThorPhase::PitUpload => write!(f, "PIT Upload"),
            ThorPhase::Flashing => write!(f, "Flashing"),
            ThorPhase::Ended => write!(f, "Ended"),
            ThorPhase::Error => write!(f, "Error"),
        }
    }
}

/// Events emitted by the orchestrator and the transfer engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ThorEvent {
    /// Session negotiated.
    SessionStarted {
        protocol_version: u8,
        packet_size: u32,
    },
    /// The device went away mid-operation.
    DeviceDisconnected,
    PhaseChanged { from: ThorPhase, to: ThorPhase },
    /// One data chunk acknowledged.
    Progress {
        partition: String,
        current: u64,
        total: u64,
    },
    /// An acknowledgment timed out and the chunk is being resent.
    ChunkRetried { partition: String, chunk: u32 },
    /// Operation failed; `code` is the process exit code it maps to.
    Error { code: i32, message: String },
    /// USB packet sent/received.
    Packet {
        direction: PacketDirection,
        length: usize,
        data: Option<Vec<u8>>,
    },
    /// Partition image fully written.
    FlashComplete { partition: String, bytes: u64 },
}

/// USB packet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Host -> Device
    Rx, // Device -> Host
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Observer trait for receiving Thor events.
pub trait ThorObserver: Send + Sync {
    fn on_event(&self, event: &ThorEvent);
}

/// Discards all events.
pub struct NullObserver;

impl ThorObserver for NullObserver {
    fn on_event(&self, _event: &ThorEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl ThorObserver for TracingObserver {
    fn on_event(&self, event: &ThorEvent) {
        match event {
            ThorEvent::SessionStarted {
                protocol_version,
                packet_size,
            } => {
                tracing::info!(version = protocol_version, packet_size, "Session started");
            }
            ThorEvent::DeviceDisconnected => {
                tracing::warn!("Device disconnected");
            }
            ThorEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            ThorEvent::Progress {
                partition,
                current,
                total,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                tracing::debug!(partition = %partition, progress = %format!("{}%", pct), current, total, "Progress");
            }
            ThorEvent::ChunkRetried { partition, chunk } => {
                tracing::warn!(partition = %partition, chunk, "Ack timed out, resending chunk");
            }
            ThorEvent::Error { code, message } => {
                tracing::error!(code = code, "Error: {}", message);
            }
            ThorEvent::Packet {
                direction, length, ..
            } => {
                tracing::trace!(dir = %direction, len = length, "USB Packet");
            }
            ThorEvent::FlashComplete { partition, bytes } => {
                tracing::info!(partition = %partition, bytes, "Flash complete");
            }
        }
    }
}

/// Observer that records every event.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingObserver {
    events: std::sync::Mutex<Vec<ThorEvent>>,
}

#[cfg(test)]
impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ThorEvent> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }
}

#[cfg(test)]
impl ThorObserver for RecordingObserver {
    fn on_event(&self, event: &ThorEvent) {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.push(event.clone());
    }
}

/// Fires a cancel token on the first acknowledged chunk.
#[cfg(test)]
pub(crate) struct CancelOnProgress(pub crate::transfer::CancelToken);

#[cfg(test)]
impl ThorObserver for CancelOnProgress {
    fn on_event(&self, event: &ThorEvent) {
        if matches!(event, ThorEvent::Progress { .. }) {
            self.0.cancel();
        }
    }
}

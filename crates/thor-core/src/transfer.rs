//! Transfer engine: sequenced, stop-and-wait upload of partition images.
//!
//! An image is split into sequences of `sequence_size` packets. Each
//! sequence is announced with its padded length, sent one packet at a time
//! (every packet acknowledged with its index before the next goes out) and
//! closed with an end frame that tells the device where the data belongs.

use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, trace, warn};

use crate::error::ThorError;
use crate::events::{ThorEvent, ThorObserver};
use crate::exchange::send_command;
use crate::pit::{BinaryType, DeviceType, PitEntry, RawPartition};
use crate::protocol::{CodecError, Command, MAX_RESPONSE_READ, Opcode, Response, SequenceEnd};
use crate::session::{Capabilities, Session, SessionConfig};
use crate::transport::{TransportError, UsbTransport};

/// Where a transfer stood when it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    pub partition: String,
    pub bytes_sent: u64,
    pub total_size: u64,
    /// Number of acknowledged chunks.
    pub sequence: u32,
}

impl fmt::Display for TransferProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}/{} bytes, sequence {}",
            self.partition, self.bytes_sent, self.total_size, self.sequence
        )
    }
}

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Transfer aborted, acknowledgment timed out twice ({progress})")]
    Aborted { progress: TransferProgress },

    #[error("Integrity mismatch ({progress}): {detail}")]
    IntegrityMismatch {
        progress: TransferProgress,
        detail: String,
    },

    #[error("Transport error during transfer ({progress}): {source}")]
    Transport {
        progress: TransferProgress,
        source: TransportError,
    },

    #[error("Protocol violation during transfer ({progress}): {source}")]
    Codec {
        progress: TransferProgress,
        source: CodecError,
    },

    #[error("Image source ended early ({progress})")]
    SourceExhausted { progress: TransferProgress },

    #[error("Failed reading image source ({progress}): {source}")]
    Source {
        progress: TransferProgress,
        source: io::Error,
    },

    #[error("Transfer cancelled ({progress})")]
    Cancelled { progress: TransferProgress },
}

impl TransferError {
    pub fn progress(&self) -> &TransferProgress {
        match self {
            TransferError::Aborted { progress }
            | TransferError::IntegrityMismatch { progress, .. }
            | TransferError::Transport { progress, .. }
            | TransferError::Codec { progress, .. }
            | TransferError::SourceExhausted { progress }
            | TransferError::Source { progress, .. }
            | TransferError::Cancelled { progress } => progress,
        }
    }
}

/// Byte and chunk accounting for one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferJob {
    pub partition: String,
    pub total_size: u64,
    pub bytes_sent: u64,
    pub sequence_number: u32,
    pub chunk_size: u32,
}

impl TransferJob {
    pub fn new(partition: impl Into<String>, total_size: u64, chunk_size: u32) -> Self {
        Self {
            partition: partition.into(),
            total_size,
            bytes_sent: 0,
            sequence_number: 0,
            chunk_size,
        }
    }

    /// Number of data frames needed for the whole image.
    pub fn chunk_count(&self) -> u64 {
        self.total_size.div_ceil(self.chunk_size as u64)
    }

    pub fn remaining(&self) -> u64 {
        self.total_size - self.bytes_sent
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_sent == self.total_size
    }

    /// Account for one acknowledged chunk of `len` real bytes.
    fn record(&mut self, len: u64) {
        debug_assert!(self.bytes_sent + len <= self.total_size);
        self.bytes_sent += len;
        self.sequence_number += 1;
    }

    pub fn progress(&self) -> TransferProgress {
        TransferProgress {
            partition: self.partition.clone(),
            bytes_sent: self.bytes_sent,
            total_size: self.total_size,
            sequence: self.sequence_number,
        }
    }
}

/// Partition addressing used in end-of-sequence frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashTarget {
    pub name: String,
    pub partition_id: u32,
    pub binary_type: BinaryType,
    pub device_type: DeviceType,
}

impl FlashTarget {
    pub fn is_modem(&self) -> bool {
        self.binary_type == BinaryType::CommunicationProcessor
    }
}

impl From<&PitEntry> for FlashTarget {
    fn from(entry: &PitEntry) -> Self {
        Self {
            name: entry.partition_name.clone(),
            partition_id: entry.partition_id,
            binary_type: entry.binary_type,
            device_type: entry.device_type,
        }
    }
}

impl From<RawPartition> for FlashTarget {
    fn from(raw: RawPartition) -> Self {
        Self {
            name: format!("partition #{}", raw.partition_id),
            partition_id: raw.partition_id,
            binary_type: raw.binary_type,
            device_type: raw.device_type,
        }
    }
}

/// Flags carried by the final AP end-of-sequence frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlashOptions {
    pub efs_clear: bool,
    pub update_bootloader: bool,
}

impl From<&SessionConfig> for FlashOptions {
    fn from(config: &SessionConfig) -> Self {
        Self {
            efs_clear: config.efs_clear,
            update_bootloader: config.update_bootloader,
        }
    }
}

/// Summary of a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferReport {
    pub bytes_sent: u64,
    pub chunks: u32,
    pub sequences: u32,
    /// Chunks resent after an acknowledgment timeout.
    pub retries: u32,
}

/// Cooperative cancellation flag, polled before each chunk.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Which acknowledgment a data packet expects.
#[derive(Debug, Clone, Copy)]
enum Ack {
    /// `FileTransfer` echoing the packet index within its sequence.
    Index(u32),
    /// `PitFile`, data ignored.
    Pit,
}

pub struct TransferEngine<'a, T: UsbTransport> {
    transport: &'a T,
    config: &'a SessionConfig,
    observer: &'a dyn ThorObserver,
}

impl<'a, T: UsbTransport> TransferEngine<'a, T> {
    pub fn new(transport: &'a T, config: &'a SessionConfig, observer: &'a dyn ThorObserver) -> Self {
        Self {
            transport,
            config,
            observer,
        }
    }

    /// Upload `total_size` bytes from `source` to `target`.
    ///
    /// The source must yield at least `total_size` bytes. Cancellation is
    /// checked before every chunk; a chunk in flight always completes.
    #[instrument(skip(self, session, source, cancel), fields(partition = %target.name))]
    pub fn send<R: Read>(
        &self,
        session: &Session,
        mut source: R,
        total_size: u64,
        target: &FlashTarget,
        options: FlashOptions,
        cancel: &CancelToken,
    ) -> Result<TransferReport, ThorError> {
        session.require_active()?;
        if total_size == 0 {
            return Err(ThorError::UnsupportedOperation(format!(
                "refusing to flash an empty image to {}",
                target.name
            )));
        }

        let packet_size = session.packet_size() as u64;
        let sequence_bytes = packet_size * session.sequence_size() as u64;
        let sequences = total_size.div_ceil(sequence_bytes);
        // The first sequence is the largest one.
        wire_size(total_size.min(sequence_bytes).div_ceil(packet_size) * packet_size)?;
        let mut job = TransferJob::new(target.name.clone(), total_size, session.packet_size());
        let mut report = TransferReport::default();

        info!(
            total_size,
            packet_size,
            sequences,
            chunks = job.chunk_count(),
            modem = target.is_modem(),
            "Starting transfer"
        );

        self.control(&job, Command::TransferFlash, Opcode::FileTransfer, self.config.command_timeout())?;

        let mut packet = vec![0u8; packet_size as usize];
        for index in 0..sequences {
            let real_size = job.remaining().min(sequence_bytes);
            let packets = real_size.div_ceil(packet_size);
            let aligned_size = packets * packet_size;
            debug!(sequence = index, real_size, aligned_size, "Beginning sequence");

            self.control(
                &job,
                Command::TransferPart(wire_size(aligned_size)?),
                Opcode::FileTransfer,
                self.config.command_timeout(),
            )?;

            for packet_index in 0..packets as u32 {
                if cancel.is_cancelled() {
                    warn!(progress = %job.progress(), "Transfer cancelled");
                    return Err(TransferError::Cancelled {
                        progress: job.progress(),
                    }
                    .into());
                }

                let len = job.remaining().min(packet_size) as usize;
                read_chunk(&mut source, &mut packet, len, &job)?;

                report.retries += self.send_chunk(&packet, Ack::Index(packet_index), &job)?;
                job.record(len as u64);
                report.chunks += 1;

                self.observer.on_event(&ThorEvent::Progress {
                    partition: job.partition.clone(),
                    current: job.bytes_sent,
                    total: job.total_size,
                });
            }

            let end = SequenceEnd {
                modem: target.is_modem(),
                real_size: wire_size(real_size)?,
                binary_type: target.binary_type.into(),
                device_type: target.device_type.into(),
                partition_id: target.partition_id,
                last: index + 1 == sequences,
                efs_clear: options.efs_clear,
                update_bootloader: options.update_bootloader,
            };
            self.control(
                &job,
                Command::TransferEnd(end),
                Opcode::FileTransfer,
                self.config.end_sequence_timeout(),
            )?;
            report.sequences += 1;
        }

        report.bytes_sent = job.bytes_sent;
        info!(
            bytes = report.bytes_sent,
            chunks = report.chunks,
            retries = report.retries,
            "Transfer complete"
        );
        Ok(report)
    }

    /// Upload a serialised PIT. Requires [`Capabilities::WRITE_PIT`].
    #[instrument(skip_all, fields(len = pit.len()))]
    pub fn send_pit(&self, session: &Session, pit: &[u8]) -> Result<(), ThorError> {
        session.require_active()?;
        if !session.capabilities().contains(Capabilities::WRITE_PIT) {
            return Err(ThorError::UnsupportedOperation(format!(
                "PIT upload needs protocol version 1 or later, device speaks {}",
                session.protocol_version()
            )));
        }

        let job = TransferJob::new("PIT", pit.len() as u64, pit.len() as u32);
        let timeout = self.config.command_timeout();
        let len = pit.len() as u32;

        self.control(&job, Command::PitFlash, Opcode::PitFile, timeout)?;
        self.control(&job, Command::PitPart(len), Opcode::PitFile, timeout)?;
        self.send_chunk(pit, Ack::Pit, &job)?;
        self.control(&job, Command::PitEnd(len), Opcode::PitFile, timeout)?;
        info!("PIT uploaded");
        Ok(())
    }

    /// Write one packet and wait for its acknowledgment, resending once if
    /// the acknowledgment times out. Returns the number of resends.
    fn send_chunk(&self, chunk: &[u8], ack: Ack, job: &TransferJob) -> Result<u32, TransferError> {
        let timeout = self.config.chunk_timeout();
        let mut retries = 0;

        loop {
            self.transport
                .write(chunk, timeout)
                .map_err(|source| TransferError::Transport {
                    progress: job.progress(),
                    source,
                })?;

            let bytes = match self.transport.read(MAX_RESPONSE_READ, timeout) {
                Ok(bytes) => bytes,
                Err(e) if e.is_timeout() && retries == 0 => {
                    retries += 1;
                    let chunk_index = match ack {
                        Ack::Index(i) => i,
                        Ack::Pit => 0,
                    };
                    self.observer.on_event(&ThorEvent::ChunkRetried {
                        partition: job.partition.clone(),
                        chunk: chunk_index,
                    });
                    continue;
                }
                Err(e) if e.is_timeout() => {
                    return Err(TransferError::Aborted {
                        progress: job.progress(),
                    });
                }
                Err(source) => {
                    return Err(TransferError::Transport {
                        progress: job.progress(),
                        source,
                    });
                }
            };

            let response = Response::decode(&bytes).map_err(|source| TransferError::Codec {
                progress: job.progress(),
                source,
            })?;
            trace!(response = %response, "Chunk acknowledged");
            return check_ack(response, ack, job).map(|_| retries);
        }
    }

    /// One control exchange with transfer context attached to failures.
    fn control(
        &self,
        job: &TransferJob,
        command: Command,
        family: Opcode,
        read_timeout: Duration,
    ) -> Result<u32, TransferError> {
        let transport_err = |source| TransferError::Transport {
            progress: job.progress(),
            source,
        };
        let codec_err = |source| TransferError::Codec {
            progress: job.progress(),
            source,
        };

        send_command(self.transport, &command, self.config.command_timeout())
            .map_err(transport_err)?;
        let bytes = self
            .transport
            .read(MAX_RESPONSE_READ, read_timeout)
            .map_err(transport_err)?;
        Response::decode(&bytes)
            .and_then(|r| r.expect(family))
            .map_err(codec_err)
    }
}

fn check_ack(response: Response, ack: Ack, job: &TransferJob) -> Result<(), TransferError> {
    let mismatch = |detail: String| TransferError::IntegrityMismatch {
        progress: job.progress(),
        detail,
    };

    match (response, ack) {
        (Response::FileTransfer { data }, Ack::Index(index)) if data == index => Ok(()),
        (Response::FileTransfer { data }, Ack::Index(index)) => Err(mismatch(format!(
            "device acknowledged packet {data}, expected {index}"
        ))),
        (Response::Pit { .. }, Ack::Pit) => Ok(()),
        (Response::Fail { code }, _) => Err(mismatch(format!(
            "device reported failure 0x{code:08X}"
        ))),
        (other, ack) => Err(TransferError::Codec {
            progress: job.progress(),
            source: CodecError::UnexpectedResponse {
                expected: match ack {
                    Ack::Index(_) => Opcode::FileTransfer,
                    Ack::Pit => Opcode::PitFile,
                },
                actual: other.raw_opcode(),
            },
        }),
    }
}

/// Fill `packet[..len]` from the source and zero the padding.
fn read_chunk<R: Read>(
    source: &mut R,
    packet: &mut [u8],
    len: usize,
    job: &TransferJob,
) -> Result<(), TransferError> {
    source.read_exact(&mut packet[..len]).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            TransferError::SourceExhausted {
                progress: job.progress(),
            }
        } else {
            TransferError::Source {
                progress: job.progress(),
                source: e,
            }
        }
    })?;
    packet[len..].fill(0);
    Ok(())
}

/// Sequence lengths travel in 32-bit argument words.
fn wire_size(bytes: u64) -> Result<u32, ThorError> {
    u32::try_from(bytes).map_err(|_| {
        ThorError::InvalidConfig(format!(
            "sequence of {bytes} bytes does not fit a 32-bit size field"
        ))
    })
}

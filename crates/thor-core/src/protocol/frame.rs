//! Host -> device command frames.
//!
//! Every control command is a fixed 1 KiB frame: an opcode word, a
//! sub-opcode word and a 1016 byte argument block of little-endian words.

use byteorder::{ByteOrder, LittleEndian};
use std::fmt;
use thiserror::Error;

use super::constants::*;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Malformed frame: expected {expected} bytes, got {actual}")]
    MalformedFrame { expected: usize, actual: usize },

    #[error("Unknown opcode 0x{opcode:08X} (sub-opcode {sub_opcode:?})")]
    UnknownOpcode { opcode: u32, sub_opcode: Option<u32> },

    #[error("Unexpected response: expected {expected}, got opcode 0x{actual:08X}")]
    UnexpectedResponse { expected: Opcode, actual: u32 },

    #[error("Device rejected {opcode} command with code 0x{code:08X}")]
    DeviceRejected { opcode: Opcode, code: u32 },
}

/// Command families understood by the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Session,
    PitFile,
    FileTransfer,
    EndSession,
}

impl Opcode {
    pub const fn value(self) -> u32 {
        match self {
            Opcode::Session => OP_SESSION,
            Opcode::PitFile => OP_PIT_FILE,
            Opcode::FileTransfer => OP_FILE_TRANSFER,
            Opcode::EndSession => OP_END_SESSION,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            OP_SESSION => Some(Opcode::Session),
            OP_PIT_FILE => Some(Opcode::PitFile),
            OP_FILE_TRANSFER => Some(Opcode::FileTransfer),
            OP_END_SESSION => Some(Opcode::EndSession),
            _ => None,
        }
    }

    /// Whether `sub_opcode` is a known request within this family.
    pub fn accepts(self, sub_opcode: u32) -> bool {
        match self {
            Opcode::Session => matches!(
                sub_opcode,
                SESSION_BEGIN
                    | SESSION_DEVICE_TYPE
                    | SESSION_TOTAL_BYTES
                    | SESSION_FILE_PART_SIZE
                    | SESSION_ERASE_USER_DATA
                    | SESSION_ENABLE_T_FLASH
            ),
            Opcode::PitFile => matches!(sub_opcode, PIT_FLASH | PIT_DUMP | PIT_PART | PIT_END),
            Opcode::FileTransfer => matches!(
                sub_opcode,
                TRANSFER_FLASH | TRANSFER_DUMP | TRANSFER_PART | TRANSFER_END
            ),
            Opcode::EndSession => matches!(sub_opcode, END_SESSION | END_REBOOT | END_SHUTDOWN),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Session => write!(f, "Session"),
            Opcode::PitFile => write!(f, "PitFile"),
            Opcode::FileTransfer => write!(f, "FileTransfer"),
            Opcode::EndSession => write!(f, "EndSession"),
        }
    }
}

/// Arguments of the frame that closes a file transfer sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceEnd {
    /// Modem images use a shorter argument list.
    pub modem: bool,
    /// Unpadded byte count of the sequence.
    pub real_size: u32,
    pub binary_type: u32,
    pub device_type: u32,
    pub partition_id: u32,
    pub last: bool,
    pub efs_clear: bool,
    pub update_bootloader: bool,
}

impl SequenceEnd {
    fn args(&self) -> Vec<u32> {
        if self.modem {
            vec![
                DESTINATION_MODEM,
                self.real_size,
                self.binary_type,
                self.device_type,
                self.last as u32,
            ]
        } else {
            vec![
                DESTINATION_PHONE,
                self.real_size,
                self.binary_type,
                self.device_type,
                self.partition_id,
                self.last as u32,
                self.efs_clear as u32,
                self.update_bootloader as u32,
            ]
        }
    }
}

/// Typed host request. Encodes to exactly one [`CommandFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    BeginSession,
    TotalBytes(u64),
    FilePartSize(u32),
    EraseUserData,
    EnableTFlash,
    PitFlash,
    PitDump,
    /// Fragment index while dumping, byte length while uploading.
    PitPart(u32),
    /// Byte length while uploading, zero while dumping.
    PitEnd(u32),
    TransferFlash,
    /// Aligned byte length of the sequence that follows.
    TransferPart(u32),
    TransferEnd(SequenceEnd),
    EndSession,
    Reboot,
    Shutdown,
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::BeginSession
            | Command::TotalBytes(_)
            | Command::FilePartSize(_)
            | Command::EraseUserData
            | Command::EnableTFlash => Opcode::Session,
            Command::PitFlash | Command::PitDump | Command::PitPart(_) | Command::PitEnd(_) => {
                Opcode::PitFile
            }
            Command::TransferFlash | Command::TransferPart(_) | Command::TransferEnd(_) => {
                Opcode::FileTransfer
            }
            Command::EndSession | Command::Reboot | Command::Shutdown => Opcode::EndSession,
        }
    }

    pub fn sub_opcode(&self) -> u32 {
        match self {
            Command::BeginSession => SESSION_BEGIN,
            Command::TotalBytes(_) => SESSION_TOTAL_BYTES,
            Command::FilePartSize(_) => SESSION_FILE_PART_SIZE,
            Command::EraseUserData => SESSION_ERASE_USER_DATA,
            Command::EnableTFlash => SESSION_ENABLE_T_FLASH,
            Command::PitFlash => PIT_FLASH,
            Command::PitDump => PIT_DUMP,
            Command::PitPart(_) => PIT_PART,
            Command::PitEnd(_) => PIT_END,
            Command::TransferFlash => TRANSFER_FLASH,
            Command::TransferPart(_) => TRANSFER_PART,
            Command::TransferEnd(_) => TRANSFER_END,
            Command::EndSession => END_SESSION,
            Command::Reboot => END_REBOOT,
            Command::Shutdown => END_SHUTDOWN,
        }
    }

    fn args(&self) -> Vec<u32> {
        match self {
            Command::BeginSession => vec![BEGIN_SESSION_ARG],
            Command::TotalBytes(total) => vec![*total as u32, (*total >> 32) as u32],
            Command::FilePartSize(size)
            | Command::PitPart(size)
            | Command::PitEnd(size)
            | Command::TransferPart(size) => vec![*size],
            Command::TransferEnd(end) => end.args(),
            _ => Vec::new(),
        }
    }

    pub fn to_frame(&self) -> CommandFrame {
        let mut frame = CommandFrame::empty(self.opcode(), self.sub_opcode());
        for (i, arg) in self.args().into_iter().enumerate() {
            frame.set_arg(i, arg);
        }
        frame
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_frame().encode()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/0x{:02X}", self.opcode(), self.sub_opcode())
    }
}

/// A decoded or about-to-be-encoded command frame.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandFrame {
    opcode: Opcode,
    sub_opcode: u32,
    payload: Vec<u8>,
}

impl CommandFrame {
    fn empty(opcode: Opcode, sub_opcode: u32) -> Self {
        Self {
            opcode,
            sub_opcode,
            payload: vec![0u8; COMMAND_PAYLOAD_SIZE],
        }
    }

    fn set_arg(&mut self, index: usize, value: u32) {
        let offset = index * 4;
        LittleEndian::write_u32(&mut self.payload[offset..offset + 4], value);
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn sub_opcode(&self) -> u32 {
        self.sub_opcode
    }

    /// Argument word `index` (word 0 sits at byte offset 8 of the frame).
    pub fn arg(&self, index: usize) -> Option<u32> {
        let offset = index * 4;
        self.payload
            .get(offset..offset + 4)
            .map(LittleEndian::read_u32)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; COMMAND_HEADER_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.opcode.value());
        LittleEndian::write_u32(&mut buf[4..8], self.sub_opcode);
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() != COMMAND_FRAME_SIZE {
            return Err(CodecError::MalformedFrame {
                expected: COMMAND_FRAME_SIZE,
                actual: data.len(),
            });
        }
        let raw_opcode = LittleEndian::read_u32(&data[0..4]);
        let sub_opcode = LittleEndian::read_u32(&data[4..8]);
        let opcode = Opcode::from_u32(raw_opcode)
            .filter(|op| op.accepts(sub_opcode))
            .ok_or(CodecError::UnknownOpcode {
                opcode: raw_opcode,
                sub_opcode: Some(sub_opcode),
            })?;
        Ok(Self {
            opcode,
            sub_opcode,
            payload: data[COMMAND_HEADER_SIZE..].to_vec(),
        })
    }
}

impl fmt::Debug for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<u32> = (0..8).filter_map(|i| self.arg(i)).collect();
        f.debug_struct("CommandFrame")
            .field("opcode", &self.opcode)
            .field("sub_opcode", &format_args!("0x{:02X}", self.sub_opcode))
            .field("args", &args)
            .finish()
    }
}

//! Device -> host response frames.
//!
//! Every control command is answered by an 8 byte frame: the opcode of the
//! command family being acknowledged and one data word. Responses are
//! decoded once into a closed enum so callers match exhaustively.

use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

use super::constants::{FAIL_OPCODE, RESPONSE_FRAME_SIZE};
use super::frame::{CodecError, Opcode};

/// Parsed response from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Answer to a session command. For BeginSession, bits 16..24 of
    /// `data` carry the protocol version.
    Session { data: u32 },
    /// Answer to a PIT command. For a dump request, `data` is the PIT size.
    Pit { data: u32 },
    /// Answer to a file transfer command. For a data packet, `data` is the
    /// packet index within the current sequence.
    FileTransfer { data: u32 },
    /// Answer to an end-session command.
    EndSession { data: u32 },
    /// The bootloader refused the last request.
    Fail { code: u32 },
}

impl Response {
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != RESPONSE_FRAME_SIZE {
            return Err(CodecError::MalformedFrame {
                expected: RESPONSE_FRAME_SIZE,
                actual: bytes.len(),
            });
        }
        let opcode = LittleEndian::read_u32(&bytes[0..4]);
        let data = LittleEndian::read_u32(&bytes[4..8]);

        if opcode == FAIL_OPCODE {
            return Ok(Response::Fail { code: data });
        }
        match Opcode::from_u32(opcode) {
            Some(Opcode::Session) => Ok(Response::Session { data }),
            Some(Opcode::PitFile) => Ok(Response::Pit { data }),
            Some(Opcode::FileTransfer) => Ok(Response::FileTransfer { data }),
            Some(Opcode::EndSession) => Ok(Response::EndSession { data }),
            None => Err(CodecError::UnknownOpcode {
                opcode,
                sub_opcode: None,
            }),
        }
    }

    pub fn encode(&self) -> [u8; RESPONSE_FRAME_SIZE] {
        let (opcode, data) = match *self {
            Response::Session { data } => (Opcode::Session.value(), data),
            Response::Pit { data } => (Opcode::PitFile.value(), data),
            Response::FileTransfer { data } => (Opcode::FileTransfer.value(), data),
            Response::EndSession { data } => (Opcode::EndSession.value(), data),
            Response::Fail { code } => (FAIL_OPCODE, code),
        };
        let mut buf = [0u8; RESPONSE_FRAME_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], opcode);
        LittleEndian::write_u32(&mut buf[4..8], data);
        buf
    }

    /// Opcode word as it appeared on the wire.
    pub fn raw_opcode(&self) -> u32 {
        match self {
            Response::Session { .. } => Opcode::Session.value(),
            Response::Pit { .. } => Opcode::PitFile.value(),
            Response::FileTransfer { .. } => Opcode::FileTransfer.value(),
            Response::EndSession { .. } => Opcode::EndSession.value(),
            Response::Fail { .. } => FAIL_OPCODE,
        }
    }

    /// Check that this answers a command of family `expected` and return
    /// its data word.
    pub fn expect(self, expected: Opcode) -> Result<u32, CodecError> {
        match (self, expected) {
            (Response::Session { data }, Opcode::Session)
            | (Response::Pit { data }, Opcode::PitFile)
            | (Response::FileTransfer { data }, Opcode::FileTransfer)
            | (Response::EndSession { data }, Opcode::EndSession) => Ok(data),
            (Response::Fail { code }, opcode) => Err(CodecError::DeviceRejected { opcode, code }),
            (other, expected) => Err(CodecError::UnexpectedResponse {
                expected,
                actual: other.raw_opcode(),
            }),
        }
    }

    /// Protocol version carried by a BeginSession answer.
    pub fn protocol_version(data: u32) -> u8 {
        ((data >> 16) & 0xFF) as u8
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Session { data } => write!(f, "Session(0x{data:08X})"),
            Response::Pit { data } => write!(f, "Pit(0x{data:08X})"),
            Response::FileTransfer { data } => write!(f, "FileTransfer(0x{data:08X})"),
            Response::EndSession { data } => write!(f, "EndSession(0x{data:08X})"),
            Response::Fail { code } => write!(f, "Fail(0x{code:08X})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_session_version() {
        // Version 3 sits in byte 6 of the frame.
        let bytes = [0x64, 0, 0, 0, 0, 0, 3, 0];
        let resp = Response::decode(&bytes).unwrap();
        let data = resp.expect(Opcode::Session).unwrap();
        assert_eq!(Response::protocol_version(data), 3);
    }

    #[test]
    fn test_decode_fail() {
        let bytes = Response::Fail { code: 0x2A }.encode();
        assert_eq!(Response::decode(&bytes).unwrap(), Response::Fail { code: 0x2A });
        assert_eq!(
            Response::Fail { code: 0x2A }.expect(Opcode::FileTransfer),
            Err(CodecError::DeviceRejected {
                opcode: Opcode::FileTransfer,
                code: 0x2A
            })
        );
    }

    #[test]
    fn test_wrong_length_is_malformed() {
        assert!(matches!(
            Response::decode(b"LOKE"),
            Err(CodecError::MalformedFrame {
                expected: 8,
                actual: 4
            })
        ));
    }

    #[test]
    fn test_unknown_opcode() {
        let bytes = [0x42, 0, 0, 0, 1, 0, 0, 0];
        assert_eq!(
            Response::decode(&bytes),
            Err(CodecError::UnknownOpcode {
                opcode: 0x42,
                sub_opcode: None
            })
        );
    }

    #[test]
    fn test_family_mismatch() {
        let resp = Response::Pit { data: 0 };
        assert_eq!(
            resp.expect(Opcode::FileTransfer),
            Err(CodecError::UnexpectedResponse {
                expected: Opcode::FileTransfer,
                actual: 0x65
            })
        );
    }
}

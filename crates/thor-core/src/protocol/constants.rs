//! Protocol constants for the Samsung Thor (Odin) download mode.

use std::time::Duration;

// ============================================================================
// Device Identification
// ============================================================================

/// Samsung Electronics Vendor ID
pub const SAMSUNG_VENDOR_ID: u16 = 0x04E8;

/// Download mode Product IDs seen in the field
pub const DOWNLOAD_MODE_PIDS: &[u16] = &[0x6601, 0x685D, 0x68C3];

// ============================================================================
// Handshake
// ============================================================================

/// Host -> Device handshake probe
pub const HANDSHAKE_REQUEST: &[u8; 4] = b"ODIN";

/// Device -> Host handshake reply
pub const HANDSHAKE_REPLY: &[u8; 4] = b"LOKE";

/// Argument sent with BeginSession
pub const BEGIN_SESSION_ARG: u32 = 0xFFFF;

// ============================================================================
// Frame Sizes
// ============================================================================

/// Every control command is a fixed 1 KiB frame.
pub const COMMAND_FRAME_SIZE: usize = 1024;

/// Opcode + sub-opcode words.
pub const COMMAND_HEADER_SIZE: usize = 8;

/// Argument block following the header.
pub const COMMAND_PAYLOAD_SIZE: usize = COMMAND_FRAME_SIZE - COMMAND_HEADER_SIZE;

/// Responses are two little-endian words: opcode echo + data.
pub const RESPONSE_FRAME_SIZE: usize = 8;

/// Read buffer used for control responses.
pub const MAX_RESPONSE_READ: usize = 0x1000;

/// Response opcode the bootloader uses to report a failure.
pub const FAIL_OPCODE: u32 = 0xFFFF_FFFF;

// ============================================================================
// Opcodes (Host -> Device)
// ============================================================================

pub const OP_SESSION: u32 = 0x64;
pub const OP_PIT_FILE: u32 = 0x65;
pub const OP_FILE_TRANSFER: u32 = 0x66;
pub const OP_END_SESSION: u32 = 0x67;

// Session sub-opcodes
pub const SESSION_BEGIN: u32 = 0x00;
pub const SESSION_DEVICE_TYPE: u32 = 0x01;
pub const SESSION_TOTAL_BYTES: u32 = 0x02;
pub const SESSION_FILE_PART_SIZE: u32 = 0x05;
pub const SESSION_ERASE_USER_DATA: u32 = 0x07;
pub const SESSION_ENABLE_T_FLASH: u32 = 0x08;

// PIT sub-opcodes
pub const PIT_FLASH: u32 = 0x00;
pub const PIT_DUMP: u32 = 0x01;
pub const PIT_PART: u32 = 0x02;
pub const PIT_END: u32 = 0x03;

// File transfer sub-opcodes
pub const TRANSFER_FLASH: u32 = 0x00;
pub const TRANSFER_DUMP: u32 = 0x01;
pub const TRANSFER_PART: u32 = 0x02;
pub const TRANSFER_END: u32 = 0x03;

// End-session sub-opcodes
pub const END_SESSION: u32 = 0x00;
pub const END_REBOOT: u32 = 0x01;
pub const END_SHUTDOWN: u32 = 0x03;

/// End-of-sequence destination for application processor images.
pub const DESTINATION_PHONE: u32 = 0x00;
/// End-of-sequence destination for modem images.
pub const DESTINATION_MODEM: u32 = 0x01;

// ============================================================================
// Packet Negotiation
// ============================================================================

/// Packet size for protocol versions 0 and 1.
pub const LEGACY_PACKET_SIZE: u32 = 128 * 1024;
/// Packets per sequence for protocol versions 0 and 1.
pub const LEGACY_SEQUENCE_SIZE: u32 = 240;

/// Packet size for protocol version 2 and later.
pub const LARGE_PACKET_SIZE: u32 = 1024 * 1024;
/// Packets per sequence for protocol version 2 and later.
pub const LARGE_SEQUENCE_SIZE: u32 = 30;

/// Packet sizes must be a multiple of the USB high-speed bulk packet.
pub const PACKET_ALIGNMENT: u32 = 512;

/// Largest accepted packet size override. A full legacy sequence of these
/// still fits the 32-bit size fields of the transfer commands.
pub const MAX_PACKET_SIZE: u32 = 16 * 1024 * 1024;

/// PIT dumps are served in fragments of this size.
pub const PIT_FRAGMENT_SIZE: usize = 500;

/// Upper bound on an announced PIT dump size.
pub const MAX_PIT_SIZE: usize = 1024 * 1024;

// ============================================================================
// Timeouts
// ============================================================================

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(30);
/// Closing a sequence makes the device commit it to storage.
pub const DEFAULT_END_SEQUENCE_TIMEOUT: Duration = Duration::from_secs(120);
/// Erase and T-Flash can take minutes.
pub const DEFAULT_LONG_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);
/// Zero-length packet drain after a PIT dump.
pub const ZLP_TIMEOUT: Duration = Duration::from_millis(100);

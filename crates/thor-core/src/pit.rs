//! PIT (Partition Information Table) model.
//!
//! Binary layout (little-endian):
//!
//! ```text
//! Header (28 bytes)
//!   0x00  u32      magic (0x12349876)
//!   0x04  u32      entry count
//!   0x08  [u8; 8]  COM_TAR2
//!   0x10  [u8; 8]  CPU/bootloader id
//!   0x18  u32      logical unit count
//! Entry (132 bytes, repeated)
//!   0x00  u32 x 9  binary type, device type, identifier, attributes,
//!                  update attributes, block size/offset, block count,
//!                  file offset, file size
//!   0x24  [u8; 32] partition name
//!   0x44  [u8; 32] flash filename
//!   0x64  [u8; 32] FOTA filename
//! ```

use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, instrument, trace};

use crate::error::ThorError;
use crate::exchange::{request, send_command};
use crate::protocol::{
    CodecError, Command, MAX_PIT_SIZE, MAX_RESPONSE_READ, PIT_FRAGMENT_SIZE, ZLP_TIMEOUT,
};
use crate::session::{Session, SessionConfig};
use crate::transport::UsbTransport;

/// PIT magic number.
pub const PIT_MAGIC: u32 = 0x1234_9876;
/// Header size in bytes.
pub const PIT_HEADER_SIZE: usize = 28;
/// Entry record size in bytes.
pub const PIT_ENTRY_SIZE: usize = 132;
/// Width of each text field in an entry.
pub const PIT_STRING_SIZE: usize = 32;
/// Width of the header text fields.
pub const PIT_HEADER_STRING_SIZE: usize = 8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PitError {
    #[error("Truncated PIT: expected {expected} bytes, got {actual}")]
    TruncatedPit { expected: usize, actual: usize },

    #[error("Invalid PIT magic: expected 0x{:08X}, got 0x{actual:08X}", PIT_MAGIC)]
    BadMagic { actual: u32 },

    #[error(
        "Invalid PIT format: {entry_count} entries x {record_size} bytes != {remaining} remaining bytes"
    )]
    InvalidPitFormat {
        entry_count: u32,
        record_size: usize,
        remaining: usize,
    },

    #[error("Duplicate partition identifier {0}")]
    DuplicatePartitionId(u32),

    #[error("Field {field} is {len} bytes, limit is {limit}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        limit: usize,
    },

    #[error("Field {field} value {value:?} has a NUL or surrounding whitespace")]
    InvalidText { field: &'static str, value: String },

    #[error("Device announced a {size} byte PIT, limit is {limit}")]
    PitTooLarge { size: usize, limit: usize },
}

/// Processor an image is destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryType {
    /// Application processor.
    ApplicationProcessor,
    /// Communication processor (modem).
    CommunicationProcessor,
    Other(u32),
}

impl From<u32> for BinaryType {
    fn from(value: u32) -> Self {
        match value {
            0 => BinaryType::ApplicationProcessor,
            1 => BinaryType::CommunicationProcessor,
            v => BinaryType::Other(v),
        }
    }
}

impl From<BinaryType> for u32 {
    fn from(value: BinaryType) -> Self {
        match value {
            BinaryType::ApplicationProcessor => 0,
            BinaryType::CommunicationProcessor => 1,
            BinaryType::Other(v) => v,
        }
    }
}

impl fmt::Display for BinaryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryType::ApplicationProcessor => write!(f, "AP"),
            BinaryType::CommunicationProcessor => write!(f, "CP"),
            BinaryType::Other(v) => write!(f, "Unknown({v})"),
        }
    }
}

/// Storage the partition lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    OneNand,
    File,
    Mmc,
    All,
    Other(u32),
}

impl From<u32> for DeviceType {
    fn from(value: u32) -> Self {
        match value {
            0 => DeviceType::OneNand,
            1 => DeviceType::File,
            2 => DeviceType::Mmc,
            3 => DeviceType::All,
            v => DeviceType::Other(v),
        }
    }
}

impl From<DeviceType> for u32 {
    fn from(value: DeviceType) -> Self {
        match value {
            DeviceType::OneNand => 0,
            DeviceType::File => 1,
            DeviceType::Mmc => 2,
            DeviceType::All => 3,
            DeviceType::Other(v) => v,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::OneNand => write!(f, "OneNAND"),
            DeviceType::File => write!(f, "File/FAT"),
            DeviceType::Mmc => write!(f, "MMC"),
            DeviceType::All => write!(f, "All"),
            DeviceType::Other(v) => write!(f, "Unknown({v})"),
        }
    }
}

/// One partition record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PitEntry {
    pub binary_type: BinaryType,
    pub device_type: DeviceType,
    pub partition_id: u32,
    pub attributes: u32,
    pub update_attributes: u32,
    pub block_size_or_offset: u32,
    pub block_count: u32,
    pub file_offset: u32,
    pub file_size: u32,
    pub partition_name: String,
    pub flash_filename: String,
    pub fota_filename: String,
}

impl PitEntry {
    pub fn name(&self) -> &str {
        &self.partition_name
    }

    pub fn is_modem(&self) -> bool {
        self.binary_type == BinaryType::CommunicationProcessor
    }

    fn parse(record: &[u8]) -> Self {
        let word = |i: usize| LittleEndian::read_u32(&record[i * 4..i * 4 + 4]);
        let text = |i: usize| {
            let start = 36 + i * PIT_STRING_SIZE;
            decode_text(&record[start..start + PIT_STRING_SIZE])
        };
        Self {
            binary_type: word(0).into(),
            device_type: word(1).into(),
            partition_id: word(2),
            attributes: word(3),
            update_attributes: word(4),
            block_size_or_offset: word(5),
            block_count: word(6),
            file_offset: word(7),
            file_size: word(8),
            partition_name: text(0),
            flash_filename: text(1),
            fota_filename: text(2),
        }
    }

    fn write_to(&self, record: &mut [u8]) -> Result<(), PitError> {
        let words = [
            self.binary_type.into(),
            self.device_type.into(),
            self.partition_id,
            self.attributes,
            self.update_attributes,
            self.block_size_or_offset,
            self.block_count,
            self.file_offset,
            self.file_size,
        ];
        for (i, w) in words.into_iter().enumerate() {
            LittleEndian::write_u32(&mut record[i * 4..i * 4 + 4], w);
        }
        let texts = [
            ("partition_name", &self.partition_name),
            ("flash_filename", &self.flash_filename),
            ("fota_filename", &self.fota_filename),
        ];
        for (i, (field, value)) in texts.into_iter().enumerate() {
            let start = 36 + i * PIT_STRING_SIZE;
            encode_text(field, value, &mut record[start..start + PIT_STRING_SIZE])?;
        }
        Ok(())
    }
}

/// Parsed partition table. An immutable snapshot of the device at read time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PitTable {
    pub com_tar2: String,
    pub cpu_bl_id: String,
    pub lu_count: u32,
    entries: Vec<PitEntry>,
}

impl PitTable {
    /// Build a table from entries, rejecting duplicate identifiers and text
    /// that would not survive a serialize/parse cycle.
    pub fn new(
        com_tar2: impl Into<String>,
        cpu_bl_id: impl Into<String>,
        lu_count: u32,
        entries: Vec<PitEntry>,
    ) -> Result<Self, PitError> {
        let table = Self {
            com_tar2: com_tar2.into(),
            cpu_bl_id: cpu_bl_id.into(),
            lu_count,
            entries,
        };
        check_text("com_tar2", &table.com_tar2)?;
        check_text("cpu_bl_id", &table.cpu_bl_id)?;
        for entry in &table.entries {
            check_text("partition_name", &entry.partition_name)?;
            check_text("flash_filename", &entry.flash_filename)?;
            check_text("fota_filename", &entry.fota_filename)?;
        }
        check_unique_ids(&table.entries)?;
        Ok(table)
    }

    pub fn parse(data: &[u8]) -> Result<Self, PitError> {
        if data.len() < PIT_HEADER_SIZE {
            return Err(PitError::TruncatedPit {
                expected: PIT_HEADER_SIZE,
                actual: data.len(),
            });
        }

        let magic = LittleEndian::read_u32(&data[0..4]);
        if magic != PIT_MAGIC {
            return Err(PitError::BadMagic { actual: magic });
        }

        let entry_count = LittleEndian::read_u32(&data[4..8]);
        let remaining = data.len() - PIT_HEADER_SIZE;
        if (entry_count as u64) * (PIT_ENTRY_SIZE as u64) != remaining as u64 {
            return Err(PitError::InvalidPitFormat {
                entry_count,
                record_size: PIT_ENTRY_SIZE,
                remaining,
            });
        }

        let entries: Vec<PitEntry> = data[PIT_HEADER_SIZE..]
            .chunks_exact(PIT_ENTRY_SIZE)
            .map(PitEntry::parse)
            .collect();

        debug!(entries = entries.len(), "Parsed PIT");
        Self::new(
            decode_text(&data[8..16]),
            decode_text(&data[16..24]),
            LittleEndian::read_u32(&data[24..28]),
            entries,
        )
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PitError> {
        let mut buf = vec![0u8; PIT_HEADER_SIZE + self.entries.len() * PIT_ENTRY_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], PIT_MAGIC);
        LittleEndian::write_u32(&mut buf[4..8], self.entries.len() as u32);
        encode_text("com_tar2", &self.com_tar2, &mut buf[8..16])?;
        encode_text("cpu_bl_id", &self.cpu_bl_id, &mut buf[16..24])?;
        LittleEndian::write_u32(&mut buf[24..28], self.lu_count);

        for (entry, record) in self
            .entries
            .iter()
            .zip(buf[PIT_HEADER_SIZE..].chunks_exact_mut(PIT_ENTRY_SIZE))
        {
            entry.write_to(record)?;
        }
        Ok(buf)
    }

    pub fn entries(&self) -> &[PitEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact, case-sensitive name match.
    pub fn find_by_name(&self, name: &str) -> Option<&PitEntry> {
        self.entries.iter().find(|e| e.partition_name == name)
    }

    pub fn find_by_id(&self, partition_id: u32) -> Option<&PitEntry> {
        self.entries.iter().find(|e| e.partition_id == partition_id)
    }

    /// Resolve a name or id selector. Raw selectors never match a table.
    pub fn lookup(&self, selector: &PartitionSelector) -> Option<&PitEntry> {
        match selector {
            PartitionSelector::Name(name) => self.find_by_name(name),
            PartitionSelector::Id(id) => self.find_by_id(*id),
            PartitionSelector::Raw(_) => None,
        }
    }
}

impl fmt::Display for PitTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Partitions ({})", self.entries.len())?;
        for (i, entry) in self.entries.iter().enumerate() {
            let last = i + 1 == self.entries.len();
            let (branch, indent) = if last {
                ("└── ", "    ")
            } else {
                ("├── ", "│   ")
            };
            writeln!(f, "{branch}{}", entry.partition_name)?;
            let fields = [
                ("Identifier", entry.partition_id.to_string()),
                ("Binary Type", entry.binary_type.to_string()),
                ("Device Type", entry.device_type.to_string()),
                ("Attributes", format!("0x{:X}", entry.attributes)),
                ("Update Attributes", format!("0x{:X}", entry.update_attributes)),
                ("Block Size/Offset", entry.block_size_or_offset.to_string()),
                ("Block Count", entry.block_count.to_string()),
                ("File Offset", entry.file_offset.to_string()),
                ("File Size", entry.file_size.to_string()),
                ("Flash Filename", entry.flash_filename.clone()),
                ("FOTA Filename", entry.fota_filename.clone()),
            ];
            for (j, (key, value)) in fields.iter().enumerate() {
                let leaf = if j + 1 == fields.len() { "└── " } else { "├── " };
                writeln!(f, "{indent}{leaf}{key}: {value}")?;
            }
        }
        Ok(())
    }
}

/// Partition addressing accepted by `flash`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionSelector {
    /// Partition name as listed in the PIT.
    Name(String),
    /// PIT identifier.
    Id(u32),
    /// Address a partition without a PIT lookup.
    Raw(RawPartition),
}

/// Everything the end-of-sequence frame needs, supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawPartition {
    pub partition_id: u32,
    pub binary_type: BinaryType,
    pub device_type: DeviceType,
}

impl FromStr for PartitionSelector {
    type Err = std::convert::Infallible;

    /// Numbers select by id, anything else by name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.parse::<u32>() {
            Ok(id) => PartitionSelector::Id(id),
            Err(_) => PartitionSelector::Name(s.to_string()),
        })
    }
}

impl fmt::Display for PartitionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionSelector::Name(name) => write!(f, "{name}"),
            PartitionSelector::Id(id) => write!(f, "#{id}"),
            PartitionSelector::Raw(raw) => write!(f, "raw#{}", raw.partition_id),
        }
    }
}

/// Download the raw PIT from the device.
///
/// Fragments are concatenated in arrival order; each must be exactly the
/// size the announced total implies.
#[instrument(skip_all)]
pub fn download<T: UsbTransport>(
    transport: &T,
    session: &Session,
    config: &SessionConfig,
) -> Result<Vec<u8>, ThorError> {
    session.require_active()?;
    let timeout = config.command_timeout();

    let size = request(transport, Command::PitDump, timeout, timeout)? as usize;
    info!(size, "Device reported PIT size");
    if size > MAX_PIT_SIZE {
        return Err(PitError::PitTooLarge {
            size,
            limit: MAX_PIT_SIZE,
        }
        .into());
    }
    if size < PIT_HEADER_SIZE {
        return Err(PitError::TruncatedPit {
            expected: PIT_HEADER_SIZE,
            actual: size,
        }
        .into());
    }

    let fragments = size.div_ceil(PIT_FRAGMENT_SIZE);
    let mut pit = Vec::with_capacity(size);
    for index in 0..fragments {
        send_command(transport, &Command::PitPart(index as u32), timeout)?;
        let fragment = transport.read(MAX_RESPONSE_READ, timeout)?;
        let expected = (size - pit.len()).min(PIT_FRAGMENT_SIZE);
        if fragment.len() != expected {
            return Err(PitError::TruncatedPit {
                expected: size,
                actual: pit.len() + fragment.len(),
            }
            .into());
        }
        trace!(index, len = fragment.len(), "PIT fragment");
        pit.extend_from_slice(&fragment);
    }

    // The bootloader terminates the dump with a zero-length packet.
    match transport.read(MAX_RESPONSE_READ, ZLP_TIMEOUT) {
        Ok(extra) if !extra.is_empty() => {
            return Err(CodecError::MalformedFrame {
                expected: 0,
                actual: extra.len(),
            }
            .into());
        }
        Ok(_) => {}
        Err(e) if e.is_timeout() => {}
        Err(e) => return Err(e.into()),
    }

    request(transport, Command::PitEnd(0), timeout, timeout)?;
    Ok(pit)
}

fn check_unique_ids(entries: &[PitEntry]) -> Result<(), PitError> {
    let mut seen = HashSet::with_capacity(entries.len());
    for entry in entries {
        if !seen.insert(entry.partition_id) {
            return Err(PitError::DuplicatePartitionId(entry.partition_id));
        }
    }
    Ok(())
}

/// Parsing cuts at the first NUL and trims, so such text cannot round-trip.
fn check_text(field: &'static str, value: &str) -> Result<(), PitError> {
    if value.contains('\0') || value.trim() != value {
        return Err(PitError::InvalidText {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// NUL-padded fixed-width field to trimmed text.
fn decode_text(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).trim().to_string()
}

fn encode_text(field: &'static str, value: &str, out: &mut [u8]) -> Result<(), PitError> {
    check_text(field, value)?;
    let bytes = value.as_bytes();
    if bytes.len() > out.len() {
        return Err(PitError::FieldTooLong {
            field,
            len: bytes.len(),
            limit: out.len(),
        });
    }
    out.fill(0);
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::protocol::Response;
    use crate::transport::MockTransport;

    #[test]
    fn test_two_entry_buffer_parses() {
        let bytes = two_entry_table().to_bytes().unwrap();
        assert_eq!(bytes.len(), PIT_HEADER_SIZE + 2 * PIT_ENTRY_SIZE);

        let table = PitTable::parse(&bytes).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.find_by_name("BOOT").unwrap().partition_id, 11);
        assert_eq!(table.find_by_id(17).unwrap().name(), "RADIO");
        assert!(table.find_by_id(17).unwrap().is_modem());
        assert_eq!(table.com_tar2, "COM_TAR2");
        assert_eq!(table.cpu_bl_id, "SM8250");
    }

    #[test]
    fn test_roundtrip_preserves_table() {
        let mut unusual = entry(99, "X", BinaryType::Other(7));
        unusual.device_type = DeviceType::Other(8);
        unusual.fota_filename = "a".repeat(PIT_STRING_SIZE);
        let table = PitTable::new("", "", 3, vec![unusual]).unwrap();
        let parsed = PitTable::parse(&table.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, table);
    }

    #[test]
    fn test_count_length_mismatch_is_invalid_format() {
        let mut bytes = two_entry_table().to_bytes().unwrap();
        LittleEndian::write_u32(&mut bytes[4..8], 3);
        assert_eq!(
            PitTable::parse(&bytes),
            Err(PitError::InvalidPitFormat {
                entry_count: 3,
                record_size: PIT_ENTRY_SIZE,
                remaining: 2 * PIT_ENTRY_SIZE
            })
        );

        let mut bytes = two_entry_table().to_bytes().unwrap();
        bytes.push(0);
        assert!(matches!(
            PitTable::parse(&bytes),
            Err(PitError::InvalidPitFormat { .. })
        ));
    }

    #[test]
    fn test_bad_magic_and_short_header() {
        let mut bytes = two_entry_table().to_bytes().unwrap();
        bytes[0] = 0;
        assert!(matches!(PitTable::parse(&bytes), Err(PitError::BadMagic { .. })));
        assert!(matches!(
            PitTable::parse(&bytes[..10]),
            Err(PitError::TruncatedPit { .. })
        ));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let entries = vec![
            entry(1, "A", BinaryType::ApplicationProcessor),
            entry(1, "B", BinaryType::ApplicationProcessor),
        ];
        assert_eq!(
            PitTable::new("", "", 0, entries),
            Err(PitError::DuplicatePartitionId(1))
        );
    }

    #[test]
    fn test_text_fields_are_trimmed() {
        let mut bytes = two_entry_table().to_bytes().unwrap();
        let name = PIT_HEADER_SIZE + 36;
        bytes[name..name + 6].copy_from_slice(b"BOOT  ");
        let table = PitTable::parse(&bytes).unwrap();
        assert_eq!(table.entries()[0].partition_name, "BOOT");
    }

    #[test]
    fn test_text_that_would_not_roundtrip_is_rejected() {
        let padded = entry(1, "BOOT ", BinaryType::ApplicationProcessor);
        assert!(matches!(
            PitTable::new("", "", 0, vec![padded]),
            Err(PitError::InvalidText {
                field: "partition_name",
                ..
            })
        ));

        let mut embedded = entry(1, "BOOT", BinaryType::ApplicationProcessor);
        embedded.flash_filename = "boot\0.img".into();
        assert!(matches!(
            PitTable::new("", "", 0, vec![embedded]),
            Err(PitError::InvalidText {
                field: "flash_filename",
                ..
            })
        ));

        assert!(matches!(
            PitTable::new(" COM", "", 0, Vec::new()),
            Err(PitError::InvalidText { field: "com_tar2", .. })
        ));

        let mut table = two_entry_table();
        table.cpu_bl_id = "SM8250\n".into();
        assert!(matches!(
            table.to_bytes(),
            Err(PitError::InvalidText { field: "cpu_bl_id", .. })
        ));
    }

    #[test]
    fn test_lookup_has_no_partial_matches() {
        let table = two_entry_table();
        assert!(table.lookup(&PartitionSelector::Name("BOO".into())).is_none());
        assert!(table.lookup(&PartitionSelector::Name("boot".into())).is_none());
        assert!(table.lookup(&"11".parse().unwrap()).is_some());
        assert!(table.lookup(&"BOOT".parse().unwrap()).is_some());
    }

    #[test]
    fn test_overlong_name_rejected_on_serialize() {
        let long = entry(1, &"N".repeat(33), BinaryType::ApplicationProcessor);
        let table = PitTable::new("", "", 0, vec![long]).unwrap();
        assert!(matches!(
            table.to_bytes(),
            Err(PitError::FieldTooLong {
                field: "partition_name",
                ..
            })
        ));
    }

    #[test]
    fn test_display_lists_every_partition() {
        let text = two_entry_table().to_string();
        assert!(text.starts_with("Partitions (2)"));
        assert!(text.contains("├── BOOT"));
        assert!(text.contains("└── RADIO"));
        assert!(text.contains("Binary Type: CP"));
    }

    fn active_session() -> Session {
        let mut session = Session::new();
        session.force_active_for_tests(0);
        session
    }

    #[test]
    fn test_download_reassembles_fragments() {
        let mut entries = Vec::new();
        for i in 0..4 {
            entries.push(entry(i, &format!("P{i}"), BinaryType::ApplicationProcessor));
        }
        let bytes = PitTable::new("", "", 0, entries).unwrap().to_bytes().unwrap();
        assert_eq!(bytes.len(), 556); // two fragments: 500 + 56

        let mock = MockTransport::new();
        mock.queue_response(Response::Pit {
            data: bytes.len() as u32,
        });
        mock.queue_bytes(&bytes[..500]);
        mock.queue_bytes(&bytes[500..]);
        mock.queue_zlp();
        mock.queue_response(Response::Pit { data: 0 });

        let config = SessionConfig::default();
        let pit = download(&mock, &active_session(), &config).unwrap();
        assert_eq!(pit, bytes);

        let commands = mock.command_writes();
        let parts: Vec<u32> = commands
            .iter()
            .filter(|c| c.sub_opcode() == crate::protocol::PIT_PART)
            .map(|c| c.arg(0).unwrap())
            .collect();
        assert_eq!(parts, vec![0, 1]);
        assert_eq!(mock.pending_replies(), 0);
    }

    #[test]
    fn test_short_fragment_is_truncated() {
        let bytes = two_entry_table().to_bytes().unwrap();
        let mock = MockTransport::new();
        mock.queue_response(Response::Pit {
            data: bytes.len() as u32,
        });
        mock.queue_bytes(&bytes[..100]);

        let err = download(&mock, &active_session(), &SessionConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            ThorError::Pit(PitError::TruncatedPit { expected: 292, actual: 100 })
        ));
    }

    #[test]
    fn test_oversized_pit_rejected_before_fragments() {
        let mock = MockTransport::new();
        mock.queue_response(Response::Pit { data: u32::MAX });

        let err = download(&mock, &active_session(), &SessionConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            ThorError::Pit(PitError::PitTooLarge {
                limit: MAX_PIT_SIZE,
                ..
            })
        ));
        assert_eq!(err.exit_code(), crate::error::exit_code::PROTOCOL);
        let commands = mock.command_writes();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].sub_opcode(), crate::protocol::PIT_DUMP);
    }

    #[test]
    fn test_download_requires_active_session() {
        let mock = MockTransport::new();
        let err = download(&mock, &Session::new(), &SessionConfig::default()).unwrap_err();
        assert!(matches!(err, ThorError::SessionNotActive { .. }));
        assert!(mock.get_writes().is_empty());
    }
}

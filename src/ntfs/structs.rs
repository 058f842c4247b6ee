//! NTFS on-wire structures and constants
//!
//! Everything in this module is pure: it decodes and encodes the byte
//! layouts exchanged with the volume device, with no I/O of its own.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;

// ============================================================================
// Control codes
// ============================================================================

pub mod fsctl {
    pub const GET_NTFS_VOLUME_DATA: u32 = 0x00090064;
    pub const ENUM_USN_DATA: u32 = 0x000900B3;
    pub const READ_USN_JOURNAL: u32 = 0x000900BB;
    pub const QUERY_USN_JOURNAL: u32 = 0x000900F4;
}

/// Size of the response header ("next FRN" / "next USN") preceding records
pub const RESPONSE_HEADER_SIZE: usize = 8;

/// Fixed header of a V2 USN record
pub const USN_RECORD_V2_HEADER: usize = 60;

/// Fixed header of a V3 USN record (128-bit file ids)
pub const USN_RECORD_V3_HEADER: usize = 76;

/// Records are 8-byte aligned inside device buffers
pub const RECORD_ALIGNMENT: usize = 8;

/// Round a declared record length up to the next 8-byte boundary
#[inline]
pub fn aligned_record_len(record_length: usize) -> usize {
    (record_length + RECORD_ALIGNMENT - 1) & !(RECORD_ALIGNMENT - 1)
}

// ============================================================================
// File Reference Number
// ============================================================================

const ENTRY_INDEX_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// 64-bit file reference number: low 48 bits index the MFT entry, the high
/// 16 bits count how many times that entry has been reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Frn(pub u64);

impl Frn {
    /// Entry index of the volume root directory
    pub const ROOT_ENTRY: u64 = 5;

    /// The canonical root reference
    pub const ROOT: Frn = Frn(Self::ROOT_ENTRY);

    pub fn new(entry_index: u64, sequence: u16) -> Self {
        Frn(((sequence as u64) << 48) | (entry_index & ENTRY_INDEX_MASK))
    }

    /// MFT entry index (lower 48 bits)
    #[inline]
    pub fn entry_index(self) -> u64 {
        self.0 & ENTRY_INDEX_MASK
    }

    /// Reuse sequence number (upper 16 bits)
    #[inline]
    pub fn sequence(self) -> u16 {
        (self.0 >> 48) as u16
    }

    /// `0`, `5` and any generation of entry 5 denote the volume root.
    #[inline]
    pub fn is_root(self) -> bool {
        self.0 == 0 || self.entry_index() == Self::ROOT_ENTRY
    }
}

impl fmt::Display for Frn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<u64> for Frn {
    fn from(value: u64) -> Self {
        Frn(value)
    }
}

// ============================================================================
// NTFS Volume Data (from FSCTL_GET_NTFS_VOLUME_DATA)
// ============================================================================

pub const NTFS_VOLUME_DATA_SIZE: usize = 0x60;

#[derive(Debug, Clone, Default)]
pub struct NtfsVolumeData {
    pub volume_serial_number: u64,
    pub number_sectors: u64,
    pub total_clusters: u64,
    pub free_clusters: u64,
    pub total_reserved: u64,
    pub bytes_per_sector: u32,
    pub bytes_per_cluster: u32,
    pub bytes_per_file_record_segment: u32,
    pub clusters_per_file_record_segment: u32,
    pub mft_valid_data_length: u64,
    pub mft_start_lcn: u64,
    pub mft2_start_lcn: u64,
    pub mft_zone_start: u64,
    pub mft_zone_end: u64,
}

impl NtfsVolumeData {
    /// Parse from raw buffer (0x60 bytes from FSCTL_GET_NTFS_VOLUME_DATA)
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < NTFS_VOLUME_DATA_SIZE {
            return None;
        }

        let mut cursor = Cursor::new(data);

        Some(Self {
            volume_serial_number: cursor.read_u64::<LittleEndian>().ok()?,
            number_sectors: cursor.read_u64::<LittleEndian>().ok()?,
            total_clusters: cursor.read_u64::<LittleEndian>().ok()?,
            free_clusters: cursor.read_u64::<LittleEndian>().ok()?,
            total_reserved: cursor.read_u64::<LittleEndian>().ok()?,
            bytes_per_sector: cursor.read_u32::<LittleEndian>().ok()?,
            bytes_per_cluster: cursor.read_u32::<LittleEndian>().ok()?,
            bytes_per_file_record_segment: cursor.read_u32::<LittleEndian>().ok()?,
            clusters_per_file_record_segment: cursor.read_u32::<LittleEndian>().ok()?,
            mft_valid_data_length: cursor.read_u64::<LittleEndian>().ok()?,
            mft_start_lcn: cursor.read_u64::<LittleEndian>().ok()?,
            mft2_start_lcn: cursor.read_u64::<LittleEndian>().ok()?,
            mft_zone_start: cursor.read_u64::<LittleEndian>().ok()?,
            mft_zone_end: cursor.read_u64::<LittleEndian>().ok()?,
        })
    }

    /// Estimate total MFT records
    pub fn estimated_mft_records(&self) -> u64 {
        if self.bytes_per_file_record_segment == 0 {
            return 0;
        }
        self.mft_valid_data_length / self.bytes_per_file_record_segment as u64
    }
}

// ============================================================================
// Journal descriptor (from FSCTL_QUERY_USN_JOURNAL)
// ============================================================================

pub const USN_JOURNAL_DATA_SIZE: usize = 0x38;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JournalDescriptor {
    pub journal_id: u64,
    pub first_usn: i64,
    pub next_usn: i64,
    pub lowest_valid_usn: i64,
    pub max_usn: i64,
    pub max_size: u64,
    pub allocation_delta: u64,
}

impl JournalDescriptor {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < USN_JOURNAL_DATA_SIZE {
            return None;
        }

        let mut cursor = Cursor::new(data);

        Some(Self {
            journal_id: cursor.read_u64::<LittleEndian>().ok()?,
            first_usn: cursor.read_i64::<LittleEndian>().ok()?,
            next_usn: cursor.read_i64::<LittleEndian>().ok()?,
            lowest_valid_usn: cursor.read_i64::<LittleEndian>().ok()?,
            max_usn: cursor.read_i64::<LittleEndian>().ok()?,
            max_size: cursor.read_u64::<LittleEndian>().ok()?,
            allocation_delta: cursor.read_u64::<LittleEndian>().ok()?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(USN_JOURNAL_DATA_SIZE);
        // Writes into a Vec cannot fail
        let _ = out.write_u64::<LittleEndian>(self.journal_id);
        let _ = out.write_i64::<LittleEndian>(self.first_usn);
        let _ = out.write_i64::<LittleEndian>(self.next_usn);
        let _ = out.write_i64::<LittleEndian>(self.lowest_valid_usn);
        let _ = out.write_i64::<LittleEndian>(self.max_usn);
        let _ = out.write_u64::<LittleEndian>(self.max_size);
        let _ = out.write_u64::<LittleEndian>(self.allocation_delta);
        out
    }

    /// Position the journal can be read from
    pub fn first_valid_usn(&self) -> i64 {
        self.first_usn.max(self.lowest_valid_usn)
    }
}

// ============================================================================
// Request payloads
// ============================================================================

/// Input for FSCTL_ENUM_USN_DATA (MFT_ENUM_DATA_V1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumRequest {
    pub start_frn: Frn,
    pub low_usn: i64,
    pub high_usn: i64,
    pub min_major_version: u16,
    pub max_major_version: u16,
}

impl EnumRequest {
    pub const SIZE: usize = 28;

    /// Request every live entry starting at `start_frn`, with no USN bound
    pub fn unbounded(start_frn: Frn) -> Self {
        Self {
            start_frn,
            low_usn: 0,
            high_usn: i64::MAX,
            min_major_version: 2,
            max_major_version: 3,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        let _ = out.write_u64::<LittleEndian>(self.start_frn.0);
        let _ = out.write_i64::<LittleEndian>(self.low_usn);
        let _ = out.write_i64::<LittleEndian>(self.high_usn);
        let _ = out.write_u16::<LittleEndian>(self.min_major_version);
        let _ = out.write_u16::<LittleEndian>(self.max_major_version);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let mut cursor = Cursor::new(data);
        Some(Self {
            start_frn: Frn(cursor.read_u64::<LittleEndian>().ok()?),
            low_usn: cursor.read_i64::<LittleEndian>().ok()?,
            high_usn: cursor.read_i64::<LittleEndian>().ok()?,
            min_major_version: cursor.read_u16::<LittleEndian>().ok()?,
            max_major_version: cursor.read_u16::<LittleEndian>().ok()?,
        })
    }
}

/// Input for FSCTL_READ_USN_JOURNAL (READ_USN_JOURNAL_DATA_V0)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadJournalRequest {
    pub start_usn: i64,
    pub reason_mask: u32,
    pub return_only_on_close: bool,
    pub timeout: u64,
    pub bytes_to_wait_for: u64,
    pub journal_id: u64,
}

impl ReadJournalRequest {
    pub const SIZE: usize = 40;

    pub fn new(journal_id: u64, start_usn: i64, reason_mask: u32) -> Self {
        Self {
            start_usn,
            reason_mask,
            return_only_on_close: false,
            timeout: 0,
            bytes_to_wait_for: 0,
            journal_id,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        let _ = out.write_i64::<LittleEndian>(self.start_usn);
        let _ = out.write_u32::<LittleEndian>(self.reason_mask);
        let _ = out.write_u32::<LittleEndian>(self.return_only_on_close as u32);
        let _ = out.write_u64::<LittleEndian>(self.timeout);
        let _ = out.write_u64::<LittleEndian>(self.bytes_to_wait_for);
        let _ = out.write_u64::<LittleEndian>(self.journal_id);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let mut cursor = Cursor::new(data);
        Some(Self {
            start_usn: cursor.read_i64::<LittleEndian>().ok()?,
            reason_mask: cursor.read_u32::<LittleEndian>().ok()?,
            return_only_on_close: cursor.read_u32::<LittleEndian>().ok()? != 0,
            timeout: cursor.read_u64::<LittleEndian>().ok()?,
            bytes_to_wait_for: cursor.read_u64::<LittleEndian>().ok()?,
            journal_id: cursor.read_u64::<LittleEndian>().ok()?,
        })
    }
}

/// Read the 8-byte cursor that prefixes every enumeration/journal response
pub fn response_cursor(data: &[u8]) -> Option<u64> {
    let head: [u8; 8] = data.get(..RESPONSE_HEADER_SIZE)?.try_into().ok()?;
    Some(u64::from_le_bytes(head))
}

// ============================================================================
// USN Record
// ============================================================================

#[derive(Debug, Clone)]
pub struct UsnRecord {
    pub record_length: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub file_reference_number: u64,
    pub parent_file_reference_number: u64,
    pub usn: i64,
    pub timestamp: u64,
    pub reason: u32,
    pub source_info: u32,
    pub security_id: u32,
    pub file_attributes: u32,
    pub file_name_length: u16,
    pub file_name_offset: u16,
    pub file_name: String,
}

impl UsnRecord {
    /// Parse a USN record (V2 or V3). `data` must start at the record and
    /// may extend past it; only `record_length` bytes are trusted.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }

        let mut cursor = Cursor::new(data);
        let record_length = cursor.read_u32::<LittleEndian>().ok()?;
        let major_version = cursor.read_u16::<LittleEndian>().ok()?;
        let minor_version = cursor.read_u16::<LittleEndian>().ok()?;

        let min_size = if major_version >= 3 {
            USN_RECORD_V3_HEADER
        } else {
            USN_RECORD_V2_HEADER
        };
        let record_len = record_length as usize;
        if record_len < min_size || data.len() < record_len {
            return None;
        }

        // V3 carries 128-bit ids; the low half is the classic FRN.
        let (file_ref, parent_ref) = if major_version >= 3 {
            let file_ref = cursor.read_u64::<LittleEndian>().ok()?;
            let _ = cursor.read_u64::<LittleEndian>().ok()?;
            let parent_ref = cursor.read_u64::<LittleEndian>().ok()?;
            let _ = cursor.read_u64::<LittleEndian>().ok()?;
            (file_ref, parent_ref)
        } else {
            (
                cursor.read_u64::<LittleEndian>().ok()?,
                cursor.read_u64::<LittleEndian>().ok()?,
            )
        };

        let usn = cursor.read_i64::<LittleEndian>().ok()?;
        let timestamp = cursor.read_u64::<LittleEndian>().ok()?;
        let reason = cursor.read_u32::<LittleEndian>().ok()?;
        let source_info = cursor.read_u32::<LittleEndian>().ok()?;
        let security_id = cursor.read_u32::<LittleEndian>().ok()?;
        let file_attributes = cursor.read_u32::<LittleEndian>().ok()?;
        let file_name_length = cursor.read_u16::<LittleEndian>().ok()?;
        let file_name_offset = cursor.read_u16::<LittleEndian>().ok()?;

        // Name must sit inside the record, after the fixed header
        let name_start = file_name_offset as usize;
        let name_end = name_start + file_name_length as usize;
        if name_start < min_size || name_end > record_len {
            return None;
        }

        let name_u16: Vec<u16> = data[name_start..name_end]
            .chunks_exact(2)
            .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
            .collect();
        let file_name = String::from_utf16_lossy(&name_u16);

        Some(Self {
            record_length,
            major_version,
            minor_version,
            file_reference_number: file_ref,
            parent_file_reference_number: parent_ref,
            usn,
            timestamp,
            reason,
            source_info,
            security_id,
            file_attributes,
            file_name_length,
            file_name_offset,
            file_name,
        })
    }

    pub fn frn(&self) -> Frn {
        Frn(self.file_reference_number)
    }

    pub fn parent_frn(&self) -> Frn {
        Frn(self.parent_file_reference_number)
    }

    pub fn is_directory(&self) -> bool {
        (self.file_attributes & file_attributes::DIRECTORY) != 0
    }
}

// ============================================================================
// Record iteration over a device buffer
// ============================================================================

/// Plausible declared lengths for a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordBounds {
    pub min: usize,
    pub max: usize,
}

/// Catalog enumeration records are small; anything larger is corruption.
pub const CATALOG_RECORD_BOUNDS: RecordBounds = RecordBounds { min: 60, max: 10_000 };

pub const JOURNAL_RECORD_BOUNDS: RecordBounds = RecordBounds { min: 60, max: 0x10000 };

/// Walks concatenated records in a response payload (the part after the
/// 8-byte cursor). Stops at the first record whose declared length is out of
/// bounds or runs past the buffer, and remembers that it did.
pub struct UsnRecordIter<'a> {
    data: &'a [u8],
    offset: usize,
    bounds: RecordBounds,
    malformed: bool,
}

impl<'a> UsnRecordIter<'a> {
    pub fn new(data: &'a [u8], bounds: RecordBounds) -> Self {
        Self {
            data,
            offset: 0,
            bounds,
            malformed: false,
        }
    }

    /// True if iteration stopped on a corrupt or truncated record
    pub fn hit_malformed(&self) -> bool {
        self.malformed
    }
}

impl Iterator for UsnRecordIter<'_> {
    /// (offset of the record inside the payload, decoded record)
    type Item = (usize, UsnRecord);

    fn next(&mut self) -> Option<Self::Item> {
        if self.malformed || self.offset + 4 > self.data.len() {
            return None;
        }

        let rest = &self.data[self.offset..];
        let record_len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;

        // Zero padding after the last record
        if record_len == 0 {
            return None;
        }

        if record_len < self.bounds.min || record_len > self.bounds.max || record_len > rest.len() {
            self.malformed = true;
            return None;
        }

        let Some(record) = UsnRecord::from_bytes(&rest[..record_len]) else {
            self.malformed = true;
            return None;
        };

        let at = self.offset;
        self.offset += aligned_record_len(record_len);
        Some((at, record))
    }
}

// ============================================================================
// USN Reason flags
// ============================================================================

pub mod usn_reason {
    pub const DATA_OVERWRITE: u32 = 0x00000001;
    pub const DATA_EXTEND: u32 = 0x00000002;
    pub const DATA_TRUNCATION: u32 = 0x00000004;
    pub const NAMED_DATA_OVERWRITE: u32 = 0x00000010;
    pub const NAMED_DATA_EXTEND: u32 = 0x00000020;
    pub const NAMED_DATA_TRUNCATION: u32 = 0x00000040;
    pub const FILE_CREATE: u32 = 0x00000100;
    pub const FILE_DELETE: u32 = 0x00000200;
    pub const EA_CHANGE: u32 = 0x00000400;
    pub const SECURITY_CHANGE: u32 = 0x00000800;
    pub const RENAME_OLD_NAME: u32 = 0x00001000;
    pub const RENAME_NEW_NAME: u32 = 0x00002000;
    pub const INDEXABLE_CHANGE: u32 = 0x00004000;
    pub const BASIC_INFO_CHANGE: u32 = 0x00008000;
    pub const HARD_LINK_CHANGE: u32 = 0x00010000;
    pub const COMPRESSION_CHANGE: u32 = 0x00020000;
    pub const ENCRYPTION_CHANGE: u32 = 0x00040000;
    pub const OBJECT_ID_CHANGE: u32 = 0x00080000;
    pub const REPARSE_POINT_CHANGE: u32 = 0x00100000;
    pub const STREAM_CHANGE: u32 = 0x00200000;
    pub const TRANSACTED_CHANGE: u32 = 0x00400000;
    pub const INTEGRITY_CHANGE: u32 = 0x00800000;
    pub const DESIRED_STORAGE_CLASS_CHANGE: u32 = 0x01000000;
    pub const CLOSE: u32 = 0x80000000;

    /// Every change reason
    pub const ALL: u32 = 0xFFFFFFFF;

    pub(crate) const NAMES: &[(u32, &str)] = &[
        (DATA_OVERWRITE, "DataOverwrite"),
        (DATA_EXTEND, "DataExtend"),
        (DATA_TRUNCATION, "DataTruncation"),
        (NAMED_DATA_OVERWRITE, "NamedDataOverwrite"),
        (NAMED_DATA_EXTEND, "NamedDataExtend"),
        (NAMED_DATA_TRUNCATION, "NamedDataTruncation"),
        (FILE_CREATE, "FileCreate"),
        (FILE_DELETE, "FileDelete"),
        (EA_CHANGE, "EaChange"),
        (SECURITY_CHANGE, "SecurityChange"),
        (RENAME_OLD_NAME, "RenameOldName"),
        (RENAME_NEW_NAME, "RenameNewName"),
        (INDEXABLE_CHANGE, "IndexableChange"),
        (BASIC_INFO_CHANGE, "BasicInfoChange"),
        (HARD_LINK_CHANGE, "HardLinkChange"),
        (COMPRESSION_CHANGE, "CompressionChange"),
        (ENCRYPTION_CHANGE, "EncryptionChange"),
        (OBJECT_ID_CHANGE, "ObjectIdChange"),
        (REPARSE_POINT_CHANGE, "ReparsePointChange"),
        (STREAM_CHANGE, "StreamChange"),
        (TRANSACTED_CHANGE, "TransactedChange"),
        (INTEGRITY_CHANGE, "IntegrityChange"),
        (DESIRED_STORAGE_CLASS_CHANGE, "DesiredStorageClassChange"),
        (CLOSE, "Close"),
    ];
}

/// Decode a reason bitmask into flag names, lowest bit first
pub fn reason_flags_to_names(flags: u32) -> Vec<&'static str> {
    usn_reason::NAMES
        .iter()
        .filter(|(bit, _)| flags & bit != 0)
        .map(|(_, name)| *name)
        .collect()
}

// ============================================================================
// FILETIME conversion utilities
// ============================================================================

/// Convert Windows FILETIME (100-nanosecond intervals since 1601) to Unix timestamp
pub fn filetime_to_unix(filetime: u64) -> i64 {
    // Difference between 1601 and 1970 in 100-nanosecond intervals
    const EPOCH_DIFF: u64 = 116444736000000000;

    if filetime < EPOCH_DIFF {
        return 0;
    }

    ((filetime - EPOCH_DIFF) / 10_000_000) as i64
}

/// Convert Windows FILETIME to chrono DateTime
pub fn filetime_to_datetime(filetime: u64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp(filetime_to_unix(filetime), 0).unwrap_or_default()
}

// ============================================================================
// File Attributes
// ============================================================================

pub mod file_attributes {
    pub const READONLY: u32 = 0x00000001;
    pub const HIDDEN: u32 = 0x00000002;
    pub const SYSTEM: u32 = 0x00000004;
    pub const DIRECTORY: u32 = 0x00000010;
    pub const ARCHIVE: u32 = 0x00000020;
    pub const DEVICE: u32 = 0x00000040;
    pub const NORMAL: u32 = 0x00000080;
    pub const TEMPORARY: u32 = 0x00000100;
    pub const SPARSE_FILE: u32 = 0x00000200;
    pub const REPARSE_POINT: u32 = 0x00000400;
    pub const COMPRESSED: u32 = 0x00000800;
    pub const OFFLINE: u32 = 0x00001000;
    pub const NOT_CONTENT_INDEXED: u32 = 0x00002000;
    pub const ENCRYPTED: u32 = 0x00004000;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ntfs::scripted::SyntheticRecord;

    #[test]
    fn frn_splits_entry_and_sequence() {
        let frn = Frn::new(0x1234, 7);
        assert_eq!(frn.entry_index(), 0x1234);
        assert_eq!(frn.sequence(), 7);
        assert_eq!(frn.0, 0x0007_0000_0000_1234);
        assert_eq!(frn.to_string(), "0x0007000000001234");
    }

    #[test]
    fn root_is_recognised_in_every_form() {
        assert!(Frn(0).is_root());
        assert!(Frn(5).is_root());
        assert!(Frn::new(5, 5).is_root());
        assert!(!Frn(6).is_root());
        assert!(!Frn::new(0x10005, 1).is_root());
    }

    #[test]
    fn alignment_rounds_up_to_eight() {
        assert_eq!(aligned_record_len(60), 64);
        assert_eq!(aligned_record_len(61), 64);
        assert_eq!(aligned_record_len(64), 64);
        assert_eq!(aligned_record_len(73), 80);
        assert_eq!(aligned_record_len(90), 96);
    }

    #[test]
    fn parses_v2_record() {
        let bytes = SyntheticRecord::new(Frn::new(42, 3), Frn::new(5, 5), "notes.txt")
            .with_usn(4096)
            .with_reason(usn_reason::FILE_CREATE | usn_reason::CLOSE)
            .with_timestamp(133_000_000_000_000_000)
            .encode();

        let record = UsnRecord::from_bytes(&bytes).unwrap();
        assert_eq!(record.major_version, 2);
        assert_eq!(record.frn(), Frn::new(42, 3));
        assert_eq!(record.parent_frn(), Frn::new(5, 5));
        assert_eq!(record.usn, 4096);
        assert_eq!(record.file_name, "notes.txt");
        assert_eq!(record.reason, usn_reason::FILE_CREATE | usn_reason::CLOSE);
        assert_eq!(record.file_name_offset as usize, USN_RECORD_V2_HEADER);
        assert!(!record.is_directory());
    }

    #[test]
    fn parses_v3_record_folding_ids() {
        let bytes = SyntheticRecord::new(Frn(900), Frn(100), "Users")
            .directory()
            .v3()
            .encode();

        let record = UsnRecord::from_bytes(&bytes).unwrap();
        assert_eq!(record.major_version, 3);
        assert_eq!(record.frn(), Frn(900));
        assert_eq!(record.parent_frn(), Frn(100));
        assert_eq!(record.file_name, "Users");
        assert!(record.is_directory());
    }

    #[test]
    fn rejects_name_outside_record() {
        let mut bytes = SyntheticRecord::new(Frn(1), Frn(5), "abc").encode();
        // file_name_length at offset 56
        bytes[56..58].copy_from_slice(&200u16.to_le_bytes());
        assert!(UsnRecord::from_bytes(&bytes).is_none());
    }

    #[test]
    fn rejects_short_declared_length() {
        let mut bytes = SyntheticRecord::new(Frn(1), Frn(5), "abc").encode();
        bytes[0..4].copy_from_slice(&40u32.to_le_bytes());
        assert!(UsnRecord::from_bytes(&bytes).is_none());
    }

    #[test]
    fn iterator_advances_by_aligned_length() {
        let mut payload = Vec::new();
        for len in [61u32, 73, 90] {
            payload.extend(
                SyntheticRecord::new(Frn(len as u64), Frn(5), "xxxxxxxxxxxxxxx")
                    .with_declared_len(len)
                    .encode(),
            );
        }
        assert_eq!(payload.len(), 64 + 80 + 96);

        let offsets: Vec<usize> = UsnRecordIter::new(&payload, JOURNAL_RECORD_BOUNDS)
            .map(|(at, _)| at)
            .collect();
        assert_eq!(offsets, vec![0, 64, 144]);
    }

    #[test]
    fn iterator_stops_on_out_of_bounds_length() {
        let mut payload = SyntheticRecord::new(Frn(10), Frn(5), "ok").encode();
        let mut bad = SyntheticRecord::new(Frn(11), Frn(5), "bad").encode();
        bad[0..4].copy_from_slice(&20_000u32.to_le_bytes());
        payload.extend(bad);
        payload.extend(SyntheticRecord::new(Frn(12), Frn(5), "never").encode());

        let mut iter = UsnRecordIter::new(&payload, CATALOG_RECORD_BOUNDS);
        let names: Vec<String> = iter.by_ref().map(|(_, r)| r.file_name).collect();
        assert_eq!(names, vec!["ok"]);
        assert!(iter.hit_malformed());
    }

    #[test]
    fn iterator_stops_on_truncated_tail() {
        let mut payload = SyntheticRecord::new(Frn(10), Frn(5), "whole").encode();
        let tail = SyntheticRecord::new(Frn(11), Frn(5), "cut off").encode();
        payload.extend_from_slice(&tail[..tail.len() / 2]);

        let mut iter = UsnRecordIter::new(&payload, CATALOG_RECORD_BOUNDS);
        assert_eq!(iter.by_ref().count(), 1);
        assert!(iter.hit_malformed());
    }

    #[test]
    fn zero_padding_is_a_clean_end() {
        let mut payload = SyntheticRecord::new(Frn(10), Frn(5), "a").encode();
        payload.extend_from_slice(&[0u8; 16]);

        let mut iter = UsnRecordIter::new(&payload, CATALOG_RECORD_BOUNDS);
        assert_eq!(iter.by_ref().count(), 1);
        assert!(!iter.hit_malformed());
    }

    #[test]
    fn requests_round_trip_through_bytes() {
        let enum_req = EnumRequest::unbounded(Frn(77));
        let bytes = enum_req.to_bytes();
        assert_eq!(bytes.len(), EnumRequest::SIZE);
        assert_eq!(EnumRequest::from_bytes(&bytes), Some(enum_req));
        assert_eq!(enum_req.high_usn, i64::MAX);

        let read_req = ReadJournalRequest::new(9, 1024, usn_reason::ALL);
        let bytes = read_req.to_bytes();
        assert_eq!(bytes.len(), ReadJournalRequest::SIZE);
        assert_eq!(ReadJournalRequest::from_bytes(&bytes), Some(read_req));
    }

    #[test]
    fn journal_descriptor_layout() {
        let desc = JournalDescriptor {
            journal_id: 0xAB,
            first_usn: 100,
            next_usn: 5000,
            lowest_valid_usn: 64,
            max_usn: i64::MAX,
            max_size: 32 << 20,
            allocation_delta: 8 << 20,
        };
        let bytes = desc.to_bytes();
        assert_eq!(bytes.len(), USN_JOURNAL_DATA_SIZE);
        assert_eq!(JournalDescriptor::from_bytes(&bytes), Some(desc));
        assert_eq!(desc.first_valid_usn(), 100);
        assert!(JournalDescriptor::from_bytes(&bytes[..0x20]).is_none());
    }

    #[test]
    fn reason_names_decode_every_bit() {
        let names = reason_flags_to_names(usn_reason::FILE_CREATE | usn_reason::CLOSE);
        assert_eq!(names, vec!["FileCreate", "Close"]);
        assert!(reason_flags_to_names(0).is_empty());
    }

    #[test]
    fn filetime_conversion() {
        assert_eq!(filetime_to_unix(116444736000000000), 0);
        assert_eq!(filetime_to_unix(116444736000000000 + 10_000_000), 1);
        assert_eq!(filetime_to_unix(5), 0);
        let dt = filetime_to_datetime(132_000_000_000_000_000);
        assert_eq!(dt.format("%Y").to_string(), "2019");
    }
}

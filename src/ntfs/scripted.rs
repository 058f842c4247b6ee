//! Scripted in-memory device
//!
//! Replays canned responses through [`DeviceChannel`] so the journal reader,
//! catalog scanner and the whole pipeline can run without a real volume.
//! Also builds synthetic USN records and response buffers.

use crate::error::{Result, UsnTraceError};
use crate::ntfs::device::{ControlOutcome, DeviceChannel, VolumeId, VolumeProvider};
use crate::ntfs::structs::*;
use byteorder::{LittleEndian, WriteBytesExt};
use std::collections::{BTreeMap, VecDeque};

// ============================================================================
// Synthetic records
// ============================================================================

/// Builder for a single USN record as the device would return it
#[derive(Debug, Clone)]
pub struct SyntheticRecord {
    pub frn: Frn,
    pub parent: Frn,
    pub name: String,
    pub usn: i64,
    pub timestamp: u64,
    pub reason: u32,
    pub attributes: u32,
    pub major_version: u16,
    declared_len: Option<u32>,
}

impl SyntheticRecord {
    pub fn new(frn: Frn, parent: Frn, name: &str) -> Self {
        Self {
            frn,
            parent,
            name: name.to_string(),
            usn: 0,
            timestamp: 0,
            reason: 0,
            attributes: file_attributes::ARCHIVE,
            major_version: 2,
            declared_len: None,
        }
    }

    pub fn with_usn(mut self, usn: i64) -> Self {
        self.usn = usn;
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_reason(mut self, reason: u32) -> Self {
        self.reason = reason;
        self
    }

    pub fn directory(mut self) -> Self {
        self.attributes |= file_attributes::DIRECTORY;
        self
    }

    pub fn v3(mut self) -> Self {
        self.major_version = 3;
        self
    }

    /// Force the declared record length. The name is truncated to fit and the
    /// encoded buffer is padded to the 8-byte boundary after it.
    pub fn with_declared_len(mut self, len: u32) -> Self {
        self.declared_len = Some(len);
        self
    }

    fn header_len(&self) -> usize {
        if self.major_version >= 3 {
            USN_RECORD_V3_HEADER
        } else {
            USN_RECORD_V2_HEADER
        }
    }

    /// Encode to the on-wire layout, padded to an 8-byte multiple
    pub fn encode(&self) -> Vec<u8> {
        let header = self.header_len();
        let mut name_bytes: Vec<u8> = self
            .name
            .encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect();

        let declared = match self.declared_len {
            Some(len) => {
                let room = (len as usize).saturating_sub(header) & !1;
                name_bytes.truncate(room);
                len as usize
            }
            None => header + name_bytes.len(),
        };

        let mut out = Vec::with_capacity(aligned_record_len(declared));
        let _ = out.write_u32::<LittleEndian>(declared as u32);
        let _ = out.write_u16::<LittleEndian>(self.major_version);
        let _ = out.write_u16::<LittleEndian>(0);
        if self.major_version >= 3 {
            let _ = out.write_u64::<LittleEndian>(self.frn.0);
            let _ = out.write_u64::<LittleEndian>(0);
            let _ = out.write_u64::<LittleEndian>(self.parent.0);
            let _ = out.write_u64::<LittleEndian>(0);
        } else {
            let _ = out.write_u64::<LittleEndian>(self.frn.0);
            let _ = out.write_u64::<LittleEndian>(self.parent.0);
        }
        let _ = out.write_i64::<LittleEndian>(self.usn);
        let _ = out.write_u64::<LittleEndian>(self.timestamp);
        let _ = out.write_u32::<LittleEndian>(self.reason);
        let _ = out.write_u32::<LittleEndian>(0);
        let _ = out.write_u32::<LittleEndian>(0);
        let _ = out.write_u32::<LittleEndian>(self.attributes);
        let _ = out.write_u16::<LittleEndian>(name_bytes.len() as u16);
        let _ = out.write_u16::<LittleEndian>(header as u16);
        out.extend_from_slice(&name_bytes);
        out.resize(aligned_record_len(declared.max(out.len())), 0);
        out
    }
}

fn response(cursor: u64, records: &[SyntheticRecord]) -> Vec<u8> {
    let mut out = cursor.to_le_bytes().to_vec();
    for record in records {
        out.extend(record.encode());
    }
    out
}

/// Build an FSCTL_ENUM_USN_DATA response buffer
pub fn enum_response(next_frn: Frn, records: &[SyntheticRecord]) -> Vec<u8> {
    response(next_frn.0, records)
}

/// Build an FSCTL_READ_USN_JOURNAL response buffer
pub fn journal_response(next_usn: i64, records: &[SyntheticRecord]) -> Vec<u8> {
    response(next_usn as u64, records)
}

// ============================================================================
// Scripted device
// ============================================================================

/// One canned reply
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Reply(Vec<u8>),
    EndOfData,
    Fail(std::io::ErrorKind),
}

/// A request the device received
#[derive(Debug, Clone)]
pub struct ScriptedCall {
    pub code: u32,
    pub input: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
struct Script {
    queue: VecDeque<ScriptedResponse>,
    /// Replayed forever once the queue is drained
    repeat: Option<ScriptedResponse>,
}

impl Script {
    fn next(&mut self) -> ScriptedResponse {
        self.queue
            .pop_front()
            .or_else(|| self.repeat.clone())
            .unwrap_or(ScriptedResponse::EndOfData)
    }
}

/// In-memory volume that answers control requests from a script
#[derive(Debug, Clone, Default)]
pub struct ScriptedDevice {
    journal: Option<JournalDescriptor>,
    volume_data: Option<Vec<u8>>,
    enumeration: Script,
    journal_reads: Script,
    calls: Vec<ScriptedCall>,
}

impl ScriptedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(mut self, descriptor: JournalDescriptor) -> Self {
        self.journal = Some(descriptor);
        self
    }

    /// Raw FSCTL_GET_NTFS_VOLUME_DATA answer
    pub fn with_volume_data(mut self, bytes: Vec<u8>) -> Self {
        self.volume_data = Some(bytes);
        self
    }

    pub fn push_enum(mut self, response: ScriptedResponse) -> Self {
        self.enumeration.queue.push_back(response);
        self
    }

    pub fn push_enum_reply(self, bytes: Vec<u8>) -> Self {
        self.push_enum(ScriptedResponse::Reply(bytes))
    }

    pub fn repeat_enum(mut self, response: ScriptedResponse) -> Self {
        self.enumeration.repeat = Some(response);
        self
    }

    pub fn push_journal(mut self, response: ScriptedResponse) -> Self {
        self.journal_reads.queue.push_back(response);
        self
    }

    pub fn push_journal_reply(self, bytes: Vec<u8>) -> Self {
        self.push_journal(ScriptedResponse::Reply(bytes))
    }

    pub fn repeat_journal(mut self, response: ScriptedResponse) -> Self {
        self.journal_reads.repeat = Some(response);
        self
    }

    pub fn calls(&self) -> &[ScriptedCall] {
        &self.calls
    }

    pub fn call_count(&self, code: u32) -> usize {
        self.calls.iter().filter(|c| c.code == code).count()
    }

    /// Start FRNs of every enumeration request, in order
    pub fn enum_starts(&self) -> Vec<Frn> {
        self.calls
            .iter()
            .filter(|c| c.code == fsctl::ENUM_USN_DATA)
            .filter_map(|c| EnumRequest::from_bytes(&c.input))
            .map(|r| r.start_frn)
            .collect()
    }

    /// Start USNs of every journal read, in order
    pub fn journal_starts(&self) -> Vec<i64> {
        self.calls
            .iter()
            .filter(|c| c.code == fsctl::READ_USN_JOURNAL)
            .filter_map(|c| ReadJournalRequest::from_bytes(&c.input))
            .map(|r| r.start_usn)
            .collect()
    }

    fn reply(code: u32, response: ScriptedResponse, output: &mut [u8]) -> Result<ControlOutcome> {
        match response {
            ScriptedResponse::Reply(bytes) => {
                let n = bytes.len().min(output.len());
                output[..n].copy_from_slice(&bytes[..n]);
                Ok(ControlOutcome::Data(n))
            }
            ScriptedResponse::EndOfData => Ok(ControlOutcome::EndOfData),
            ScriptedResponse::Fail(kind) => Err(UsnTraceError::DeviceControl {
                code,
                source: std::io::Error::from(kind),
            }),
        }
    }
}

impl DeviceChannel for ScriptedDevice {
    fn control(&mut self, code: u32, input: &[u8], output: &mut [u8]) -> Result<ControlOutcome> {
        self.calls.push(ScriptedCall {
            code,
            input: input.to_vec(),
        });

        match code {
            fsctl::QUERY_USN_JOURNAL => match self.journal {
                Some(descriptor) => {
                    Self::reply(code, ScriptedResponse::Reply(descriptor.to_bytes()), output)
                }
                None => Err(UsnTraceError::UsnJournalNotActive("scripted".to_string())),
            },
            fsctl::GET_NTFS_VOLUME_DATA => match &self.volume_data {
                Some(bytes) => Self::reply(code, ScriptedResponse::Reply(bytes.clone()), output),
                None => Self::reply(
                    code,
                    ScriptedResponse::Fail(std::io::ErrorKind::Unsupported),
                    output,
                ),
            },
            fsctl::ENUM_USN_DATA => {
                let response = self.enumeration.next();
                Self::reply(code, response, output)
            }
            fsctl::READ_USN_JOURNAL => {
                let response = self.journal_reads.next();
                Self::reply(code, response, output)
            }
            _ => Self::reply(
                code,
                ScriptedResponse::Fail(std::io::ErrorKind::InvalidInput),
                output,
            ),
        }
    }
}

// ============================================================================
// Scripted provider
// ============================================================================

/// Provider handing out a fresh copy of a scripted device per open
#[derive(Debug, Clone, Default)]
pub struct ScriptedVolumes {
    devices: BTreeMap<VolumeId, ScriptedDevice>,
}

impl ScriptedVolumes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_volume(mut self, volume: VolumeId, device: ScriptedDevice) -> Self {
        self.devices.insert(volume, device);
        self
    }
}

impl VolumeProvider for ScriptedVolumes {
    type Channel = ScriptedDevice;

    fn open(&self, volume: VolumeId) -> Result<ScriptedDevice> {
        self.devices.get(&volume).cloned().ok_or_else(|| {
            UsnTraceError::VolumeOpenError(
                volume.device_path(),
                std::io::Error::from(std::io::ErrorKind::NotFound),
            )
        })
    }

    fn candidate_volumes(&self) -> Vec<VolumeId> {
        self.devices.keys().copied().collect()
    }
}

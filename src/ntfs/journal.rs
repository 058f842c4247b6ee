//! USN Journal Reader
//!
//! Streams change records from the journal's first valid position up to the
//! present. Every loop exit is bounded: end-of-data, a response that carries
//! payload but no parsable record, a cursor that stops moving forward, or the
//! hard read cap.

use crate::config::ScanConfig;
use crate::error::{Result, UsnTraceError};
use crate::ntfs::device::{ControlOutcome, DeviceChannel};
use crate::ntfs::structs::*;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

// ============================================================================
// Change records
// ============================================================================

/// One journal entry, immutable once parsed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeRecord {
    pub usn: i64,
    pub frn: Frn,
    pub parent_frn: Frn,
    /// FILETIME (100ns ticks since 1601-01-01)
    pub timestamp: u64,
    pub reason_flags: u32,
    pub file_attributes: u32,
    pub file_name: String,
}

impl ChangeRecord {
    pub fn from_usn_record(record: UsnRecord) -> Self {
        Self {
            usn: record.usn,
            frn: record.frn(),
            parent_frn: record.parent_frn(),
            timestamp: record.timestamp,
            reason_flags: record.reason,
            file_attributes: record.file_attributes,
            file_name: record.file_name,
        }
    }

    pub fn reason(&self) -> ChangeReason {
        ChangeReason::from_usn_reason(self.reason_flags)
    }

    pub fn reason_names(&self) -> Vec<&'static str> {
        reason_flags_to_names(self.reason_flags)
    }

    pub fn datetime(&self) -> chrono::DateTime<chrono::Utc> {
        filetime_to_datetime(self.timestamp)
    }

    pub fn is_directory(&self) -> bool {
        (self.file_attributes & file_attributes::DIRECTORY) != 0
    }
}

/// Dominant kind of change carried by a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeReason {
    Created,
    Deleted,
    Modified,
    RenamedFrom,
    RenamedTo,
    AttributeChange,
    SecurityChange,
    Other(u32),
}

impl ChangeReason {
    pub fn from_usn_reason(reason: u32) -> Self {
        if (reason & usn_reason::FILE_CREATE) != 0 {
            ChangeReason::Created
        } else if (reason & usn_reason::FILE_DELETE) != 0 {
            ChangeReason::Deleted
        } else if (reason & usn_reason::RENAME_OLD_NAME) != 0 {
            ChangeReason::RenamedFrom
        } else if (reason & usn_reason::RENAME_NEW_NAME) != 0 {
            ChangeReason::RenamedTo
        } else if (reason & usn_reason::SECURITY_CHANGE) != 0 {
            ChangeReason::SecurityChange
        } else if (reason & usn_reason::BASIC_INFO_CHANGE) != 0 {
            ChangeReason::AttributeChange
        } else if (reason
            & (usn_reason::DATA_OVERWRITE
                | usn_reason::DATA_EXTEND
                | usn_reason::DATA_TRUNCATION))
            != 0
        {
            ChangeReason::Modified
        } else {
            ChangeReason::Other(reason)
        }
    }

    pub fn is_significant(&self) -> bool {
        !matches!(self, ChangeReason::Other(_))
    }
}

// ============================================================================
// Buffer parsing
// ============================================================================

/// Records decoded from one journal response payload
#[derive(Debug, Default)]
pub struct JournalBatch {
    pub records: Vec<ChangeRecord>,
    /// A record with an implausible length cut the batch short
    pub truncated: bool,
}

/// Decode the records following the 8-byte "next USN" header
pub fn parse_journal_payload(payload: &[u8]) -> JournalBatch {
    let mut iter = UsnRecordIter::new(payload, JOURNAL_RECORD_BOUNDS);
    let records = iter
        .by_ref()
        .map(|(_, record)| ChangeRecord::from_usn_record(record))
        .collect();
    JournalBatch {
        records,
        truncated: iter.hit_malformed(),
    }
}

/// Why a journal stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JournalStop {
    EndOfData,
    EmptyBatch,
    NoProgress,
    ReadLimit,
    DeviceError,
}

// ============================================================================
// Journal Reader
// ============================================================================

/// Reader over one volume's change journal. Owns the channel; the handle is
/// released when the reader is dropped.
pub struct JournalReader<C: DeviceChannel> {
    channel: C,
    descriptor: Option<JournalDescriptor>,
    buffer: Vec<u8>,
    max_reads: u64,
    reason_mask: u32,
    return_only_on_close: bool,
}

impl<C: DeviceChannel> JournalReader<C> {
    pub fn new(channel: C) -> Self {
        Self::with_config(channel, &ScanConfig::default())
    }

    pub fn with_config(channel: C, config: &ScanConfig) -> Self {
        Self {
            channel,
            descriptor: None,
            buffer: vec![0u8; config.journal_buffer_size.max(USN_JOURNAL_DATA_SIZE)],
            max_reads: config.max_journal_reads.max(1),
            reason_mask: config.reason_mask,
            return_only_on_close: config.return_only_on_close,
        }
    }

    /// Query the journal. `None` when the volume has no active journal or the
    /// device refuses the request; neither is an error for the caller.
    pub fn query_journal(&mut self) -> Option<JournalDescriptor> {
        let result = self
            .channel
            .control(fsctl::QUERY_USN_JOURNAL, &[], &mut self.buffer[..USN_JOURNAL_DATA_SIZE]);

        let descriptor = match result {
            Ok(ControlOutcome::Data(n)) => JournalDescriptor::from_bytes(&self.buffer[..n]),
            Ok(ControlOutcome::EndOfData) => None,
            Err(UsnTraceError::UsnJournalNotActive(volume)) => {
                debug!("No active journal on {}", volume);
                None
            }
            Err(e) => {
                debug!("Journal query failed: {}", e);
                None
            }
        };

        if let Some(d) = &descriptor {
            debug!(
                journal_id = d.journal_id,
                first_usn = d.first_usn,
                next_usn = d.next_usn,
                "Journal descriptor"
            );
        }
        self.descriptor = descriptor;
        descriptor
    }

    pub fn descriptor(&self) -> Option<&JournalDescriptor> {
        self.descriptor.as_ref()
    }

    /// Re-query the journal and collect every record from its first valid
    /// position. Only cancellation is reported as an error.
    pub fn read_entries(&mut self, cancel: &AtomicBool) -> Result<Vec<ChangeRecord>> {
        let mut records = Vec::new();
        self.for_each_entry(cancel, |record| records.push(record))?;
        Ok(records)
    }

    /// Stream records to a callback in journal order. Returns how the stream
    /// ended; an absent journal yields `EndOfData` without any callback.
    pub fn for_each_entry<F>(&mut self, cancel: &AtomicBool, mut callback: F) -> Result<JournalStop>
    where
        F: FnMut(ChangeRecord),
    {
        let Some(descriptor) = self.query_journal() else {
            return Ok(JournalStop::EndOfData);
        };

        let mut start_usn = descriptor.first_valid_usn();
        let mut total = 0u64;
        let mut stop = JournalStop::ReadLimit;

        for read in 0..self.max_reads {
            if cancel.load(Ordering::SeqCst) {
                return Err(UsnTraceError::Cancelled);
            }

            let mut request = ReadJournalRequest::new(descriptor.journal_id, start_usn, self.reason_mask);
            request.return_only_on_close = self.return_only_on_close;

            let bytes_returned = match self.channel.control(
                fsctl::READ_USN_JOURNAL,
                &request.to_bytes(),
                &mut self.buffer,
            ) {
                Ok(ControlOutcome::Data(n)) => n,
                Ok(ControlOutcome::EndOfData) => {
                    stop = JournalStop::EndOfData;
                    break;
                }
                Err(e) => {
                    warn!("Journal read at USN {} failed: {}", start_usn, e);
                    stop = JournalStop::DeviceError;
                    break;
                }
            };

            let Some(next_usn) = response_cursor(&self.buffer[..bytes_returned]) else {
                stop = JournalStop::EndOfData;
                break;
            };
            let next_usn = next_usn as i64;

            let batch = parse_journal_payload(&self.buffer[RESPONSE_HEADER_SIZE..bytes_returned]);
            if batch.truncated {
                debug!("Discarded malformed tail of journal batch at USN {}", start_usn);
            }

            let parsed = batch.records.len();
            for record in batch.records {
                callback(record);
            }
            total += parsed as u64;

            if parsed == 0 && bytes_returned > RESPONSE_HEADER_SIZE {
                warn!(
                    "Journal batch at USN {} held {} bytes but no records; stopping",
                    start_usn, bytes_returned
                );
                stop = JournalStop::EmptyBatch;
                break;
            }

            if next_usn <= start_usn {
                stop = JournalStop::NoProgress;
                break;
            }

            debug!(read, parsed, next_usn, "Journal batch");
            start_usn = next_usn;
        }

        if stop == JournalStop::ReadLimit {
            warn!("Journal read cap of {} reached", self.max_reads);
        }
        info!("Read {} journal records ({:?})", total, stop);
        Ok(stop)
    }
}

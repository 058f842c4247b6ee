//! Volume catalog scanner
//!
//! Enumerates every live MFT entry through FSCTL_ENUM_USN_DATA and keeps the
//! latest {name, parent, attributes} seen per FRN. The whole catalog is read
//! up front because resolving one path can need any number of ancestor
//! directories the journal never mentions.

use crate::config::ScanConfig;
use crate::error::{Result, UsnTraceError};
use crate::ntfs::device::{ControlOutcome, DeviceChannel};
use crate::ntfs::structs::*;
use compact_str::CompactString;
use indicatif::ProgressBar;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Upper bound on pre-allocation derived from volume metadata
const MAX_CAPACITY_HINT: usize = 16 * 1024 * 1024;

// ============================================================================
// Catalog
// ============================================================================

/// Catalog entry for one FRN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRecord {
    pub parent_frn: Frn,
    pub name: CompactString,
    pub attributes: u32,
}

impl CatalogRecord {
    pub fn new(parent_frn: Frn, name: &str, attributes: u32) -> Self {
        Self {
            parent_frn,
            name: CompactString::new(name),
            attributes,
        }
    }

    pub fn is_directory(&self) -> bool {
        (self.attributes & file_attributes::DIRECTORY) != 0
    }
}

/// FRN → record map for one volume snapshot. Always holds the root.
#[derive(Debug, Clone)]
pub struct Catalog {
    records: HashMap<Frn, CatalogRecord>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl Catalog {
    /// Empty catalog containing only the self-parented root
    pub fn with_capacity(capacity: usize) -> Self {
        let mut records = HashMap::with_capacity(capacity.max(1));
        records.insert(
            Frn::ROOT,
            CatalogRecord::new(Frn::ROOT, "", file_attributes::DIRECTORY),
        );
        Self { records }
    }

    /// Build from known entries; later entries for the same FRN win
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Frn, CatalogRecord)>,
    {
        let iter = entries.into_iter();
        let mut catalog = Self::with_capacity(iter.size_hint().0 + 1);
        for (frn, record) in iter {
            catalog.upsert(frn, record);
        }
        catalog
    }

    /// Insert or overwrite; the most recently observed state wins
    pub fn upsert(&mut self, frn: Frn, record: CatalogRecord) {
        self.records.insert(frn, record);
    }

    pub fn get(&self, frn: Frn) -> Option<&CatalogRecord> {
        self.records.get(&frn)
    }

    pub fn contains(&self, frn: Frn) -> bool {
        self.records.contains_key(&frn)
    }

    /// Number of entries, including the seeded root
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when nothing beyond the seeded root is known
    pub fn is_empty(&self) -> bool {
        self.records.len() <= 1
    }

    pub fn iter(&self) -> impl Iterator<Item = (Frn, &CatalogRecord)> {
        self.records.iter().map(|(frn, record)| (*frn, record))
    }

    pub fn directory_count(&self) -> usize {
        self.records.values().filter(|r| r.is_directory()).count()
    }

    /// Split into owned parent and name maps
    pub fn into_maps(self) -> (HashMap<Frn, Frn>, HashMap<Frn, String>) {
        let mut parents = HashMap::with_capacity(self.records.len());
        let mut names = HashMap::with_capacity(self.records.len());
        for (frn, record) in self.records {
            parents.insert(frn, record.parent_frn);
            names.insert(frn, record.name.into_string());
        }
        (parents, names)
    }
}

// ============================================================================
// Batch parsing
// ============================================================================

/// Outcome of decoding one enumeration payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub parsed: usize,
    /// A corrupt or truncated record ended the batch early
    pub truncated: bool,
}

/// Decode the records following the 8-byte resume FRN and upsert them
pub fn parse_enum_payload(payload: &[u8], catalog: &mut Catalog) -> BatchOutcome {
    let mut iter = UsnRecordIter::new(payload, CATALOG_RECORD_BOUNDS);
    let mut parsed = 0;
    for (_, record) in iter.by_ref() {
        catalog.upsert(
            record.frn(),
            CatalogRecord {
                parent_frn: record.parent_frn(),
                name: CompactString::from(record.file_name),
                attributes: record.file_attributes,
            },
        );
        parsed += 1;
    }
    BatchOutcome {
        parsed,
        truncated: iter.hit_malformed(),
    }
}

// ============================================================================
// Scanner
// ============================================================================

/// Why an enumeration ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanStop {
    EndOfData,
    Stalled,
    Desync,
    BatchLimit,
    DeviceError,
}

/// Counters for one scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub batches: u64,
    pub records: u64,
    pub truncated_batches: u64,
    pub stop: ScanStop,
}

/// Full catalog enumeration over one channel. Owns the channel; the handle is
/// released when the scanner is dropped.
pub struct CatalogScanner<C: DeviceChannel> {
    channel: C,
    buffer: Vec<u8>,
    max_batches: u64,
    capacity_hint: usize,
    progress: Option<ProgressBar>,
}

impl<C: DeviceChannel> CatalogScanner<C> {
    pub fn new(channel: C) -> Self {
        Self::with_config(channel, &ScanConfig::default())
    }

    pub fn with_config(channel: C, config: &ScanConfig) -> Self {
        Self {
            channel,
            buffer: vec![0u8; config.enum_buffer_size.max(NTFS_VOLUME_DATA_SIZE)],
            max_batches: config.max_enum_batches.max(1),
            capacity_hint: config.catalog_capacity_hint,
            progress: None,
        }
    }

    /// Report batch progress on a spinner
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Scan the catalog. Never fails for an unreadable volume (the result is
    /// just the root); only cancellation is an error.
    pub fn scan(&mut self, cancel: &AtomicBool) -> Result<Catalog> {
        self.scan_with_summary(cancel).map(|(catalog, _)| catalog)
    }

    pub fn scan_with_summary(&mut self, cancel: &AtomicBool) -> Result<(Catalog, ScanSummary)> {
        let mut catalog = Catalog::with_capacity(self.initial_capacity());

        let mut start_frn = Frn(0);
        let mut last_next: Option<Frn> = None;
        let mut summary = ScanSummary {
            batches: 0,
            records: 0,
            truncated_batches: 0,
            stop: ScanStop::BatchLimit,
        };

        while summary.batches < self.max_batches {
            if cancel.load(Ordering::SeqCst) {
                return Err(UsnTraceError::Cancelled);
            }

            let request = EnumRequest::unbounded(start_frn);
            let outcome = self
                .channel
                .control(fsctl::ENUM_USN_DATA, &request.to_bytes(), &mut self.buffer);
            summary.batches += 1;

            let bytes_returned = match outcome {
                Ok(ControlOutcome::Data(n)) => n,
                Ok(ControlOutcome::EndOfData) => {
                    summary.stop = ScanStop::EndOfData;
                    break;
                }
                Err(e) => {
                    warn!("Catalog enumeration at {} failed: {}", start_frn, e);
                    summary.stop = ScanStop::DeviceError;
                    break;
                }
            };

            // A response too short for the cursor is the end of enumeration
            let Some(next_frn) = response_cursor(&self.buffer[..bytes_returned]).map(Frn) else {
                summary.stop = ScanStop::EndOfData;
                break;
            };

            let batch = parse_enum_payload(
                &self.buffer[RESPONSE_HEADER_SIZE..bytes_returned],
                &mut catalog,
            );
            summary.records += batch.parsed as u64;
            if batch.truncated {
                summary.truncated_batches += 1;
                debug!("Discarded malformed tail of catalog batch at {}", start_frn);
            }

            if let Some(pb) = &self.progress {
                pb.set_message(format!("Catalog: {} entries", catalog.len()));
                pb.tick();
            }

            // Termination checks, in priority order
            if next_frn.0 == 0 {
                summary.stop = ScanStop::EndOfData;
                break;
            }
            if last_next == Some(next_frn) {
                warn!("Catalog enumeration stalled at {}; keeping partial catalog", next_frn);
                summary.stop = ScanStop::Stalled;
                break;
            }
            if batch.parsed == 0 && bytes_returned > RESPONSE_HEADER_SIZE {
                warn!(
                    "Catalog batch at {} held {} bytes but no records; stopping",
                    start_frn, bytes_returned
                );
                summary.stop = ScanStop::Desync;
                break;
            }

            last_next = Some(next_frn);
            start_frn = next_frn;
        }

        if summary.stop == ScanStop::BatchLimit {
            warn!("Catalog batch cap of {} reached", self.max_batches);
        }
        info!(
            "Catalog scan: {} entries from {} batches ({:?})",
            catalog.len(),
            summary.batches,
            summary.stop
        );
        Ok((catalog, summary))
    }

    /// Size the map from the MFT when the caller gave no hint
    fn initial_capacity(&mut self) -> usize {
        if self.capacity_hint > 0 {
            return self.capacity_hint;
        }

        let estimate = match self.channel.control(
            fsctl::GET_NTFS_VOLUME_DATA,
            &[],
            &mut self.buffer[..NTFS_VOLUME_DATA_SIZE],
        ) {
            Ok(ControlOutcome::Data(n)) => NtfsVolumeData::from_bytes(&self.buffer[..n])
                .map(|data| data.estimated_mft_records() as usize)
                .unwrap_or(0),
            _ => 0,
        };
        debug!("Catalog capacity estimate: {}", estimate);
        estimate.min(MAX_CAPACITY_HINT)
    }
}

//! Scanner configuration
//!
//! Buffer sizes and the hard iteration caps that bound every device loop.
//! Defaults match what the Windows volume driver handles comfortably; a JSON
//! file can override any subset of them.

use crate::error::{Result, UsnTraceError};
use crate::ntfs::structs::usn_reason;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 4 MiB, used for both enumeration and journal reads
pub const DEFAULT_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Configuration for catalog scans, journal reads and path resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Output buffer for FSCTL_ENUM_USN_DATA
    pub enum_buffer_size: usize,
    /// Output buffer for FSCTL_READ_USN_JOURNAL
    pub journal_buffer_size: usize,
    /// Hard cap on enumeration batches per scan
    pub max_enum_batches: u64,
    /// Hard cap on journal reads per stream
    pub max_journal_reads: u64,
    /// Fixed-point rounds in phase B of path resolution
    pub max_resolve_rounds: usize,
    /// Ancestor depth beyond which a path is declared unresolvable
    pub max_depth: usize,
    /// Reason mask for journal reads
    pub reason_mask: u32,
    /// Only report records when the file handle is closed
    pub return_only_on_close: bool,
    /// Initial catalog capacity; 0 derives it from the volume's MFT size
    pub catalog_capacity_hint: usize,
    /// Show a spinner while scanning
    pub show_progress: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            enum_buffer_size: DEFAULT_BUFFER_SIZE,
            journal_buffer_size: DEFAULT_BUFFER_SIZE,
            max_enum_batches: 1_000_000,
            max_journal_reads: 10_000,
            max_resolve_rounds: 100,
            max_depth: 256,
            reason_mask: usn_reason::ALL,
            return_only_on_close: false,
            catalog_capacity_hint: 0,
            show_progress: false,
        }
    }
}

impl ScanConfig {
    /// Load from a JSON file; missing fields keep their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text).map_err(|e| match e {
            UsnTraceError::Config { source, .. } => UsnTraceError::Config {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: ScanConfig =
            serde_json::from_str(text).map_err(|source| UsnTraceError::Config {
                path: "<inline>".to_string(),
                source,
            })?;
        Ok(config.sanitized())
    }

    /// Clamp values that would make the device loops meaningless
    pub fn sanitized(mut self) -> Self {
        // Room for the cursor plus at least one maximal catalog record
        const MIN_BUFFER: usize = 16 * 1024;
        self.enum_buffer_size = self.enum_buffer_size.max(MIN_BUFFER);
        self.journal_buffer_size = self.journal_buffer_size.max(MIN_BUFFER);
        self.max_enum_batches = self.max_enum_batches.max(1);
        self.max_journal_reads = self.max_journal_reads.max(1);
        self.max_resolve_rounds = self.max_resolve_rounds.max(1);
        self
    }
}

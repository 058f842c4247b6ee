//! usntrace - NTFS change journal ingestion and MFT path reconstruction
//!
//! Reads the USN change journal and the complete file catalog of an NTFS
//! volume, then rebuilds full paths for every file the journal mentions,
//! including files whose directories were renamed, deleted or reused.
//!
//! # Features
//!
//! - **Journal streaming**: every change record from the first valid USN
//! - **Catalog enumeration**: all live MFT entries with name, parent and attributes
//! - **Path resolution**: iterative parent-chain walking with cycle protection
//!   and entry-index fallback for stale sequence numbers
//! - **Bounded device loops**: stall, desync and iteration caps on every read
//!
//! # Example
//!
//! ```no_run
//! use usntrace::{VolumeId, VolumeScanner, ntfs::platform_volumes};
//!
//! fn main() -> usntrace::Result<()> {
//!     let scanner = VolumeScanner::new(platform_volumes());
//!     let volume: VolumeId = "C:".parse()?;
//!
//!     let trace = scanner.trace_volume(volume)?;
//!     for record in &trace.records {
//!         let path = trace.paths.display_path(record).unwrap_or_default();
//!         println!("{} {} {}", record.usn, record.reason_names().join("|"), path);
//!     }
//!     println!("{:?}", trace.paths.stats);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod ntfs;
pub mod path_resolver;
pub mod scanner;

// Re-export main types
pub use config::ScanConfig;
pub use error::{Result, UsnTraceError};
pub use path_resolver::{resolve_paths, PathResolver, ResolutionStats, ResolvedPath};
pub use scanner::{MultiVolumeScanner, PathMap, VolumeScanner, VolumeTrace};

// Re-export NTFS types that users might need
pub use ntfs::{
    Catalog, CatalogRecord, ChangeReason, ChangeRecord, Frn, JournalDescriptor, VolumeId,
};

use std::collections::{BTreeSet, HashMap};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Volumes of this machine with an active change journal
pub fn get_journal_capable_volumes() -> BTreeSet<VolumeId> {
    VolumeScanner::new(ntfs::platform_volumes()).journal_capable_volumes()
}

/// Every change record of `volume`, in journal order
pub fn read_journal_entries(volume: VolumeId) -> Result<Vec<ChangeRecord>> {
    VolumeScanner::new(ntfs::platform_volumes()).read_journal_entries(volume)
}

/// Scan the catalog of `volume` and resolve `requested` (FRN → journal
/// parent hint) to full paths
pub fn build_path_map(volume: VolumeId, requested: &HashMap<Frn, Frn>) -> Result<PathMap> {
    VolumeScanner::new(ntfs::platform_volumes()).build_path_map(volume, requested)
}

/// Format bytes as human-readable string
pub fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Format a Windows FILETIME as a human-readable date string
pub fn format_filetime(filetime: u64) -> String {
    use ntfs::structs::filetime_to_datetime;
    filetime_to_datetime(filetime).format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_sizes() {
        assert!(format_size(512).ends_with(" B"));
        assert!(format_size(1536).ends_with("KiB"));
        assert!(format_size(3 * 1024 * 1024 * 1024).ends_with("GiB"));
    }

    #[test]
    fn formats_filetime() {
        // 2020-01-01 00:00:00 UTC
        assert_eq!(format_filetime(132_223_104_000_000_000), "2020-01-01 00:00:00");
    }
}

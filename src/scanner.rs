//! Main Scanner Module
//!
//! Orchestrates the per-volume pipeline: journal read, full catalog scan,
//! then path resolution for the FRNs the journal mentioned. Each volume is
//! driven through its own channel; several volumes can run in parallel.

use crate::config::ScanConfig;
use crate::error::Result;
use crate::ntfs::catalog::{Catalog, CatalogScanner};
use crate::ntfs::device::{VolumeId, VolumeProvider};
use crate::ntfs::journal::{ChangeRecord, JournalReader};
use crate::ntfs::structs::{Frn, JournalDescriptor};
use crate::path_resolver::{PathResolver, ResolutionStats};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// ============================================================================
// Results
// ============================================================================

/// Paths for the requested FRNs plus the catalog they were resolved against
#[derive(Debug, Clone, Default, Serialize)]
pub struct PathMap {
    /// Requested FRN → absolute path, only for FRNs that fully resolved
    pub resolved_paths: HashMap<Frn, String>,
    pub catalog_parents: HashMap<Frn, Frn>,
    pub catalog_names: HashMap<Frn, String>,
    pub stats: ResolutionStats,
}

impl PathMap {
    pub fn path_for(&self, frn: Frn) -> Option<&str> {
        self.resolved_paths.get(&frn).map(String::as_str)
    }

    /// Best display path for a journal record: the resolved path of the
    /// file, else its resolved parent joined with the journal name
    pub fn display_path(&self, record: &ChangeRecord) -> Option<String> {
        if let Some(path) = self.path_for(record.frn) {
            return Some(path.to_string());
        }
        self.path_for(record.parent_frn).map(|parent| {
            if parent.ends_with('\\') {
                format!("{}{}", parent, record.file_name)
            } else {
                format!("{}\\{}", parent, record.file_name)
            }
        })
    }
}

/// Journal records of one volume joined with their paths
#[derive(Debug, Clone, Serialize)]
pub struct VolumeTrace {
    pub volume: VolumeId,
    pub records: Vec<ChangeRecord>,
    pub paths: PathMap,
}

/// FRN → journal-reported parent for every record; later records win
pub fn requested_from_records(records: &[ChangeRecord]) -> HashMap<Frn, Frn> {
    let mut requested = HashMap::with_capacity(records.len());
    for record in records {
        requested.insert(record.frn, record.parent_frn);
    }
    requested
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(message);
    pb
}

// ============================================================================
// Volume Scanner
// ============================================================================

/// Pipeline over volumes of one provider
pub struct VolumeScanner<P: VolumeProvider> {
    provider: P,
    config: ScanConfig,
    /// Cancellation flag
    cancelled: Arc<AtomicBool>,
}

impl<P: VolumeProvider> VolumeScanner<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            config: ScanConfig::default(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Configure the scanner
    pub fn with_config(mut self, config: ScanConfig) -> Self {
        self.config = config.sanitized();
        self
    }

    /// Share an existing cancellation token
    pub fn with_cancel_token(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancelled = token;
        self
    }

    /// Get cancellation token
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    /// Cancel every running and future operation of this scanner
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Channel to `volume`, or `None` when the volume simply cannot be read.
    /// Any other open failure propagates.
    fn open_channel(&self, volume: VolumeId) -> Result<Option<P::Channel>> {
        match self.provider.open(volume) {
            Ok(channel) => Ok(Some(channel)),
            Err(e) if e.is_capability_absent() => {
                debug!("{}: {}", volume, e);
                Ok(None)
            }
            Err(e) => {
                warn!("{}: open failed: {}", volume, e);
                Err(e)
            }
        }
    }

    /// Journal metadata, or `None` when the volume has no usable journal
    pub fn query_journal(&self, volume: VolumeId) -> Result<Option<JournalDescriptor>> {
        Ok(self
            .open_channel(volume)?
            .and_then(|channel| JournalReader::with_config(channel, &self.config).query_journal()))
    }

    /// Descriptor of every candidate volume that answers a journal query.
    /// Volumes that fail to open are logged and skipped.
    pub fn journal_descriptors(&self) -> BTreeMap<VolumeId, JournalDescriptor> {
        let descriptors: BTreeMap<VolumeId, JournalDescriptor> = self
            .provider
            .candidate_volumes()
            .into_iter()
            .filter_map(|volume| match self.query_journal(volume) {
                Ok(descriptor) => descriptor.map(|d| (volume, d)),
                Err(e) => {
                    warn!("Skipping {}: {}", volume, e);
                    None
                }
            })
            .collect();
        info!("{} journal-capable volume(s)", descriptors.len());
        descriptors
    }

    /// Candidate volumes that answer a journal query
    pub fn journal_capable_volumes(&self) -> BTreeSet<VolumeId> {
        self.journal_descriptors().into_keys().collect()
    }

    /// Every journal record of `volume` from its first valid USN. An absent
    /// journal or unopenable volume gives an empty list.
    pub fn read_journal_entries(&self, volume: VolumeId) -> Result<Vec<ChangeRecord>> {
        let Some(channel) = self.open_channel(volume)? else {
            return Ok(Vec::new());
        };

        let pb = self
            .config
            .show_progress
            .then(|| spinner(format!("{} reading journal...", volume)));
        let records =
            JournalReader::with_config(channel, &self.config).read_entries(&self.cancelled);
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        records
    }

    /// Full catalog of `volume`; just the root when it cannot be read
    pub fn scan_catalog(&self, volume: VolumeId) -> Result<Catalog> {
        let Some(channel) = self.open_channel(volume)? else {
            return Ok(Catalog::default());
        };

        let start = Instant::now();
        let mut scanner = CatalogScanner::with_config(channel, &self.config);
        let pb = self
            .config
            .show_progress
            .then(|| spinner(format!("{} scanning catalog...", volume)));
        if let Some(pb) = &pb {
            scanner = scanner.with_progress(pb.clone());
        }

        let catalog = scanner.scan(&self.cancelled);
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        let catalog = catalog?;
        info!(
            "{}: catalog of {} entries in {:.2}s",
            volume,
            catalog.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(catalog)
    }

    /// Scan the catalog of `volume` and resolve paths for `requested`
    /// (FRN → journal-reported parent)
    pub fn build_path_map(
        &self,
        volume: VolumeId,
        requested: &HashMap<Frn, Frn>,
    ) -> Result<PathMap> {
        let catalog = self.scan_catalog(volume)?;

        let (mut cache, stats) = PathResolver::new(&catalog, volume)
            .with_hints(requested)
            .with_limits(self.config.max_resolve_rounds, self.config.max_depth)
            .resolve_all(requested.keys().copied(), &self.cancelled)?;
        cache.retain(|frn, _| requested.contains_key(frn));

        let (catalog_parents, catalog_names) = catalog.into_maps();
        Ok(PathMap {
            resolved_paths: cache,
            catalog_parents,
            catalog_names,
            stats,
        })
    }

    /// Journal read followed by path resolution of every FRN it mentions
    pub fn trace_volume(&self, volume: VolumeId) -> Result<VolumeTrace> {
        let records = self.read_journal_entries(volume)?;
        let requested = requested_from_records(&records);
        let paths = self.build_path_map(volume, &requested)?;
        Ok(VolumeTrace {
            volume,
            records,
            paths,
        })
    }
}

// ============================================================================
// Multi-Volume Scanner
// ============================================================================

/// Runs the pipeline on several volumes at once, one rayon task per volume.
/// Every task opens its own channel.
pub struct MultiVolumeScanner<P: VolumeProvider + Sync> {
    scanner: VolumeScanner<P>,
}

impl<P: VolumeProvider + Sync> MultiVolumeScanner<P> {
    pub fn new(provider: P) -> Self {
        Self {
            scanner: VolumeScanner::new(provider),
        }
    }

    pub fn with_config(mut self, config: ScanConfig) -> Self {
        self.scanner = self.scanner.with_config(config);
        self
    }

    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        self.scanner.cancel_token()
    }

    pub fn journal_capable_volumes(&self) -> BTreeSet<VolumeId> {
        self.scanner.journal_capable_volumes()
    }

    /// Path maps for several volumes; results keep the input order
    pub fn build_path_maps(
        &self,
        requests: &[(VolumeId, HashMap<Frn, Frn>)],
    ) -> Vec<(VolumeId, Result<PathMap>)> {
        requests
            .par_iter()
            .map(|(volume, requested)| (*volume, self.scanner.build_path_map(*volume, requested)))
            .collect()
    }

    /// Journal plus paths for each volume
    pub fn trace_volumes(&self, volumes: &[VolumeId]) -> Vec<(VolumeId, Result<VolumeTrace>)> {
        volumes
            .par_iter()
            .map(|&volume| (volume, self.scanner.trace_volume(volume)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UsnTraceError;
    use crate::ntfs::scripted::*;

    fn c() -> VolumeId {
        VolumeId::new('C').unwrap()
    }

    fn descriptor() -> JournalDescriptor {
        JournalDescriptor {
            journal_id: 0xABCD,
            first_usn: 1000,
            next_usn: 5000,
            lowest_valid_usn: 1000,
            max_usn: i64::MAX,
            max_size: 32 * 1024 * 1024,
            allocation_delta: 8 * 1024 * 1024,
        }
    }

    fn record(frn: u64, parent: u64, name: &str) -> SyntheticRecord {
        SyntheticRecord::new(Frn(frn), Frn(parent), name)
    }

    #[test]
    fn missing_volume_gives_empty_results() {
        let scanner = VolumeScanner::new(ScriptedVolumes::new());
        assert!(scanner.read_journal_entries(c()).unwrap().is_empty());
        assert!(scanner.query_journal(c()).unwrap().is_none());
        assert_eq!(scanner.scan_catalog(c()).unwrap().len(), 1);

        let map = scanner.build_path_map(c(), &HashMap::from([(Frn(5), Frn(5))])).unwrap();
        assert_eq!(map.path_for(Frn(5)), Some("C:\\"));
    }

    #[test]
    fn capable_volumes_need_a_journal() {
        let provider = ScriptedVolumes::new()
            .with_volume(c(), ScriptedDevice::new().with_journal(descriptor()))
            .with_volume(VolumeId::new('D').unwrap(), ScriptedDevice::new());
        let scanner = VolumeScanner::new(provider);
        let capable = scanner.journal_capable_volumes();
        assert_eq!(capable.into_iter().collect::<Vec<_>>(), vec![c()]);
    }

    /// Provider whose volumes exist but fail to open for an unexpected reason
    struct BrokenVolumes;

    impl VolumeProvider for BrokenVolumes {
        type Channel = ScriptedDevice;

        fn open(&self, _volume: VolumeId) -> Result<ScriptedDevice> {
            Err(UsnTraceError::IoError(std::io::Error::from(
                std::io::ErrorKind::Interrupted,
            )))
        }

        fn candidate_volumes(&self) -> Vec<VolumeId> {
            vec![VolumeId::new('C').unwrap()]
        }
    }

    #[test]
    fn unexpected_open_errors_propagate() {
        let scanner = VolumeScanner::new(BrokenVolumes);
        assert!(matches!(scanner.query_journal(c()), Err(UsnTraceError::IoError(_))));
        assert!(matches!(scanner.read_journal_entries(c()), Err(UsnTraceError::IoError(_))));
        assert!(matches!(scanner.scan_catalog(c()), Err(UsnTraceError::IoError(_))));
        assert!(scanner
            .build_path_map(c(), &HashMap::from([(Frn(5), Frn(5))]))
            .is_err());

        // Listing skips the broken volume rather than failing
        assert!(scanner.journal_descriptors().is_empty());
    }

    #[test]
    fn descriptors_come_with_capable_volumes() {
        let provider = ScriptedVolumes::new()
            .with_volume(c(), ScriptedDevice::new().with_journal(descriptor()))
            .with_volume(VolumeId::new('D').unwrap(), ScriptedDevice::new());
        let scanner = VolumeScanner::new(provider);
        let descriptors = scanner.journal_descriptors();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[&c()].journal_id, 0xABCD);
    }

    #[test]
    fn resolved_paths_only_cover_requested_frns() {
        let device = ScriptedDevice::new().push_enum_reply(enum_response(
            Frn(300),
            &[
                record(100, 5, "Users").directory(),
                record(200, 100, "a.txt"),
            ],
        ));
        let scanner = VolumeScanner::new(ScriptedVolumes::new().with_volume(c(), device));
        let map = scanner
            .build_path_map(c(), &HashMap::from([(Frn(200), Frn(100))]))
            .unwrap();

        assert_eq!(map.resolved_paths.len(), 1);
        assert_eq!(map.path_for(Frn(200)), Some("C:\\Users\\a.txt"));
        assert_eq!(map.catalog_names[&Frn(100)], "Users");
        assert_eq!(map.catalog_parents[&Frn(200)], Frn(100));
    }

    #[test]
    fn display_path_falls_back_to_parent() {
        let mut map = PathMap::default();
        map.resolved_paths.insert(Frn(100), "C:\\Users".to_string());
        let gone = ChangeRecord {
            usn: 1,
            frn: Frn(999),
            parent_frn: Frn(100),
            timestamp: 0,
            reason_flags: 0,
            file_attributes: 0,
            file_name: "deleted.tmp".to_string(),
        };
        assert_eq!(map.display_path(&gone).as_deref(), Some("C:\\Users\\deleted.tmp"));
    }

    #[test]
    fn cancelled_scanner_reports_cancellation() {
        let device = ScriptedDevice::new()
            .with_journal(descriptor())
            .repeat_enum(ScriptedResponse::Reply(enum_response(Frn(10), &[])));
        let scanner = VolumeScanner::new(ScriptedVolumes::new().with_volume(c(), device));
        scanner.cancel();

        assert!(matches!(scanner.read_journal_entries(c()), Err(UsnTraceError::Cancelled)));
        assert!(matches!(scanner.scan_catalog(c()), Err(UsnTraceError::Cancelled)));
    }
}

//! FRN to full path resolution
//!
//! Walks parent chains through a [`Catalog`] snapshot to turn file reference
//! numbers into absolute paths. Chains are unwound iteratively with a visited
//! set and a depth guard, so corrupted catalogs with parent loops terminate.
//! A path is only cached once its whole ancestor chain reached the root.

use crate::error::{Result, UsnTraceError};
use crate::ntfs::catalog::Catalog;
use crate::ntfs::device::VolumeId;
use crate::ntfs::structs::Frn;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Marker standing in for an ancestor that could not be found
pub const UNKNOWN_PARENT: &str = "<unknown>";

/// Path separator used on NTFS volumes
const SEPARATOR: char = '\\';

/// Resolved FRN → absolute path. Never holds sentinel paths.
pub type ResolvedPathCache = HashMap<Frn, String>;

/// Counters over one resolution run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionStats {
    pub total_requested: usize,
    pub fully_resolved: usize,
    /// Requests whose own parent reference was matched by entry index only
    pub fallback_matches: usize,
    /// Requests left without a full path
    pub true_orphans: usize,
    /// Requests absent from the catalog altogether
    pub deleted_files: usize,
}

impl ResolutionStats {
    pub fn resolved_ratio(&self) -> f64 {
        if self.total_requested == 0 {
            return 1.0;
        }
        self.fully_resolved as f64 / self.total_requested as f64
    }
}

/// Outcome of resolving one FRN
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedPath {
    /// Full path from the drive root
    Path(String),
    /// The chain hit a missing ancestor; the string starts with
    /// [`UNKNOWN_PARENT`] followed by whatever part of the path was known
    Unknown(String),
}

impl ResolvedPath {
    pub fn is_resolved(&self) -> bool {
        matches!(self, ResolvedPath::Path(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            ResolvedPath::Path(p) | ResolvedPath::Unknown(p) => p,
        }
    }

    pub fn into_string(self) -> String {
        match self {
            ResolvedPath::Path(p) | ResolvedPath::Unknown(p) => p,
        }
    }
}

/// Append `name` to `parent`, without doubling a trailing separator
fn join_path(parent: &str, name: &str) -> String {
    let mut path = String::with_capacity(parent.len() + name.len() + 1);
    path.push_str(parent);
    if !parent.ends_with(SEPARATOR) {
        path.push(SEPARATOR);
    }
    path.push_str(name);
    path
}

/// Resolver over one catalog snapshot. The catalog is only ever read.
pub struct PathResolver<'a> {
    catalog: &'a Catalog,
    root: String,
    hints: Option<&'a HashMap<Frn, Frn>>,
    max_rounds: usize,
    max_depth: usize,
    cache: ResolvedPathCache,
    /// (entry index, FRN) sorted, built on the first fallback lookup
    by_entry: Option<Vec<(u64, Frn)>>,
    /// Requested FRNs whose parent was found by entry index
    fallback_hits: HashSet<Frn>,
}

impl<'a> PathResolver<'a> {
    pub fn new(catalog: &'a Catalog, volume: VolumeId) -> Self {
        Self {
            catalog,
            root: volume.root_path(),
            hints: None,
            max_rounds: 100,
            max_depth: 256,
            cache: HashMap::new(),
            by_entry: None,
            fallback_hits: HashSet::new(),
        }
    }

    /// Journal-reported parents, used only to break ties in fallback matching
    pub fn with_hints(mut self, hints: &'a HashMap<Frn, Frn>) -> Self {
        self.hints = Some(hints);
        self
    }

    pub fn with_limits(mut self, max_rounds: usize, max_depth: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self.max_depth = max_depth;
        self
    }

    pub fn cache(&self) -> &ResolvedPathCache {
        &self.cache
    }

    /// Resolve a single FRN, caching every ancestor that fully resolves
    pub fn resolve(&mut self, frn: Frn) -> ResolvedPath {
        let (path, used_fallback) = self.walk(frn);
        if used_fallback {
            self.fallback_hits.insert(frn);
        }
        path
    }

    /// Resolve every requested FRN in two phases and report statistics.
    /// Hands back the cache, so the resolver is consumed.
    pub fn resolve_all<I>(
        mut self,
        requested: I,
        cancel: &AtomicBool,
    ) -> Result<(ResolvedPathCache, ResolutionStats)>
    where
        I: IntoIterator<Item = Frn>,
    {
        let requested: BTreeSet<Frn> = requested.into_iter().collect();
        self.cache.reserve(requested.len());

        // Phase A: the root and its direct children
        for &frn in &requested {
            if frn.is_root() {
                self.cache.insert(frn, self.root.clone());
            } else if let Some(record) = self.catalog.get(frn) {
                if record.parent_frn.is_root() {
                    let path = join_path(&self.root, &record.name);
                    self.cache.insert(frn, path);
                }
            }
        }
        debug!("Phase A resolved {} of {}", self.cache.len(), requested.len());

        // Phase B: fixed-point rounds over a snapshot of what is still pending
        for round in 0..self.max_rounds {
            if cancel.load(Ordering::SeqCst) {
                return Err(UsnTraceError::Cancelled);
            }

            let pending: Vec<Frn> = requested
                .iter()
                .copied()
                .filter(|frn| !self.cache.contains_key(frn))
                .collect();
            if pending.is_empty() {
                break;
            }

            let mut progress = 0usize;
            for frn in pending {
                if self.resolve(frn).is_resolved() {
                    progress += 1;
                }
            }
            debug!("Resolve round {}: {} newly resolved", round, progress);
            if progress == 0 {
                break;
            }
        }

        let fully_resolved = requested
            .iter()
            .filter(|frn| self.cache.contains_key(*frn))
            .count();
        let deleted_files = requested
            .iter()
            .filter(|frn| !frn.is_root() && !self.catalog.contains(**frn))
            .count();
        let stats = ResolutionStats {
            total_requested: requested.len(),
            fully_resolved,
            fallback_matches: self
                .fallback_hits
                .iter()
                .filter(|frn| requested.contains(*frn))
                .count(),
            true_orphans: requested.len() - fully_resolved,
            deleted_files,
        };
        info!(
            "Resolved {}/{} paths ({} by fallback, {} orphans, {} deleted)",
            stats.fully_resolved,
            stats.total_requested,
            stats.fallback_matches,
            stats.true_orphans,
            stats.deleted_files
        );

        Ok((self.cache, stats))
    }

    /// Walk up from `frn` until the root, a cached ancestor, or a dead end,
    /// then unwind. Returns the path and whether the starting entry's parent
    /// needed a fallback match.
    fn walk(&mut self, frn: Frn) -> (ResolvedPath, bool) {
        let catalog = self.catalog;
        let mut chain: Vec<(Frn, &'a str)> = Vec::new();
        let mut visited: HashSet<Frn> = HashSet::new();
        let mut current = frn;
        let mut used_fallback = false;

        let base: Option<String> = loop {
            let depth = chain.len();
            if depth > self.max_depth {
                break None;
            }
            if current.is_root() {
                self.cache.insert(current, self.root.clone());
                break Some(self.root.clone());
            }
            if let Some(path) = self.cache.get(&current) {
                break Some(path.clone());
            }
            if !visited.insert(current) {
                break None;
            }
            let Some(record) = catalog.get(current) else {
                break None;
            };

            chain.push((current, record.name.as_str()));
            let parent = record.parent_frn;
            if parent.is_root() {
                break Some(self.root.clone());
            }

            current = if self.cache.contains_key(&parent) || catalog.contains(parent) {
                parent
            } else if let Some(matched) = self.fallback_parent(parent, current) {
                if depth == 0 {
                    used_fallback = true;
                }
                matched
            } else {
                break None;
            };
        };

        let path = match base {
            Some(mut path) => {
                for &(entry, name) in chain.iter().rev() {
                    path = join_path(&path, name);
                    self.cache.insert(entry, path.clone());
                }
                ResolvedPath::Path(path)
            }
            None => {
                let mut path = UNKNOWN_PARENT.to_string();
                for &(_, name) in chain.iter().rev() {
                    path = join_path(&path, name);
                }
                ResolvedPath::Unknown(path)
            }
        };
        (path, used_fallback)
    }

    /// Find a catalog entry sharing `parent`'s entry index. Prefers the
    /// journal's hint for `child` when it is one of the candidates, else the
    /// lowest FRN.
    fn fallback_parent(&mut self, parent: Frn, child: Frn) -> Option<Frn> {
        let catalog = self.catalog;
        let index = self.by_entry.get_or_insert_with(|| {
            let mut index: Vec<(u64, Frn)> =
                catalog.iter().map(|(frn, _)| (frn.entry_index(), frn)).collect();
            index.sort_unstable();
            index
        });

        let wanted = parent.entry_index();
        let start = index.partition_point(|&(entry, _)| entry < wanted);
        let candidates: Vec<Frn> = index[start..]
            .iter()
            .take_while(|&&(entry, _)| entry == wanted)
            .map(|&(_, frn)| frn)
            .filter(|&frn| frn != child)
            .collect();

        let hinted = self
            .hints
            .and_then(|hints| hints.get(&child))
            .copied()
            .filter(|hint| candidates.contains(hint));
        let chosen = hinted.or_else(|| candidates.first().copied());
        if let Some(matched) = chosen {
            debug!("Parent {} of {} matched by entry index to {}", parent, child, matched);
        }
        chosen
    }
}

/// Resolve `requested` (FRN → journal-reported parent) against `catalog`
pub fn resolve_paths(
    catalog: &Catalog,
    volume: VolumeId,
    requested: &HashMap<Frn, Frn>,
    cancel: &AtomicBool,
) -> Result<(ResolvedPathCache, ResolutionStats)> {
    PathResolver::new(catalog, volume)
        .with_hints(requested)
        .resolve_all(requested.keys().copied(), cancel)
}

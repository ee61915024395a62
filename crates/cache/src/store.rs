//! Lookup and publication of node outputs
//!
//! The marker file is the commit point: publication renames every output
//! into place first and writes the marker last, so a crash mid-publish
//! leaves no marker and the partial state reads as a miss. Restores test the
//! marker first and require every declared output to exist before reporting
//! a hit; a hit touches the marker, which is the store's only LRU signal.

use crate::diagnostics;
use crate::key::CacheKey;
use crate::layout::StoreLayout;
use crate::maintenance::{self, CleanupStats, MaintenanceOutcome, MaintenancePolicy};
use crate::node::CacheableNode;
use crate::{Error, Result, fsutil};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Outcome of a cache lookup.
///
/// `MissIncomplete` is a miss to the caller; it is distinguished so that
/// callers and tests can observe that a marker existed but its outputs did
/// not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    /// Marker present and every declared output restored
    Hit,
    /// No marker for the key
    Miss,
    /// Marker present but at least one declared output missing
    MissIncomplete,
}

impl CacheLookup {
    /// Whether the lookup restored all outputs
    #[must_use]
    pub fn is_hit(self) -> bool {
        matches!(self, Self::Hit)
    }
}

/// The cache of intermediate results, rooted at a home directory.
///
/// All cross-process coordination happens through filesystem primitives
/// (atomic rename, advisory lock, mtimes); the manager itself holds no
/// locks between calls and can be shared freely within a process.
#[derive(Debug)]
pub struct CacheManager {
    layout: StoreLayout,
    policy: MaintenancePolicy,
    disabled: bool,
    analyze_misses: bool,
    verbose: bool,
}

impl CacheManager {
    /// Open a cache rooted at `home`, creating the directory tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the layout cannot be created.
    pub fn open(home: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            layout: StoreLayout::open(home)?,
            policy: MaintenancePolicy::default(),
            disabled: false,
            analyze_misses: false,
            verbose: false,
        })
    }

    /// The on-disk layout
    #[must_use]
    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Restore the declared outputs of `node` for `key` into `outputs`.
    ///
    /// On [`CacheLookup::Hit`] every declared output name maps to an
    /// existing store path and the marker has been touched. On any miss
    /// `outputs` is left empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the store cannot be accessed or the marker
    /// cannot be touched.
    pub fn restore_outputs(
        &self,
        node: &dyn CacheableNode,
        key: &CacheKey,
        outputs: &mut HashMap<String, PathBuf>,
    ) -> Result<CacheLookup> {
        let dir = self.layout.intermediate_results_dir();
        fs::create_dir_all(dir).map_err(|e| Error::io(e, dir, "create_dir_all"))?;

        let marker = self.layout.marker_file(key);
        if !marker.is_file() {
            debug!(node = node.id(), key = %key, "cache miss");
            if self.analyze_misses {
                let _ = diagnostics::analyze_cache_miss(&self.layout, key);
            }
            return Ok(CacheLookup::Miss);
        }

        for (name, spec) in node.outputs() {
            let path = self.layout.output_file(key, name, spec.extension())?;
            if path.is_file() {
                outputs.insert(name.clone(), path);
            } else {
                warn!(
                    "Cache for {} is incomplete. Missing: {}",
                    node.id(),
                    path.file_name().unwrap_or_default().to_string_lossy()
                );
                outputs.clear();
                return Ok(CacheLookup::MissIncomplete);
            }
        }

        // Mark its use; eviction reads this mtime as the LRU timestamp.
        fsutil::set_mtime(&marker, SystemTime::now())?;
        debug!(node = node.id(), key = %key, "restored outputs from cache");
        Ok(CacheLookup::Hit)
    }

    /// Publish freshly produced outputs for `(node, key)`.
    ///
    /// Every entry of `produced` is moved into the store (atomic rename,
    /// with a copy fallback across devices) and rewritten in place to its
    /// final store path. The marker is written last, via temp + rename.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownOutput`] if `produced` contains a name the
    /// node does not declare, or [`Error::Io`] if a move or the marker
    /// write fails. On error the marker has not been written and the key
    /// remains a miss.
    pub fn save_outputs(
        &self,
        node: &dyn CacheableNode,
        key: &CacheKey,
        produced: &mut HashMap<String, PathBuf>,
    ) -> Result<()> {
        let dir = self.layout.intermediate_results_dir();
        fs::create_dir_all(dir).map_err(|e| Error::io(e, dir, "create_dir_all"))?;

        let mut final_paths = Vec::with_capacity(produced.len());
        for (name, temp_path) in produced.iter() {
            let spec = node
                .outputs()
                .get(name)
                .ok_or_else(|| Error::unknown_output(node.id(), name))?;
            let dest = self.layout.output_file(key, name, spec.extension())?;
            fsutil::atomic_move(temp_path, &dest)?;
            final_paths.push((name.clone(), dest));
        }
        for (name, path) in final_paths {
            produced.insert(name, path);
        }

        // Outputs are all in place; committing the entry is now a single
        // atomic rename of the marker.
        fsutil::write_atomic(&self.layout.marker_file(key), key.to_json()?.as_bytes())?;
        debug!(node = node.id(), key = %key, "published outputs to cache");
        Ok(())
    }

    /// Whether a marker exists for `key`.
    ///
    /// Marker existence is the commit point; output files alone are never
    /// evidence of a cached result.
    #[must_use]
    pub fn has_cached_result(&self, key: &CacheKey) -> bool {
        self.layout.marker_file(key).is_file()
    }

    /// Run periodic maintenance: rate-limited across runs, exclusive across
    /// processes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the state file or the store cannot be
    /// accessed. Lock contention is not an error.
    pub fn perform_maintenance(&self) -> Result<MaintenanceOutcome> {
        maintenance::perform_maintenance(&self.layout, &self.policy, self.verbose)
    }

    /// Run the cleanup body unconditionally, bypassing the rate gate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the store cannot be scanned.
    pub fn clean_up_all(&self) -> Result<CleanupStats> {
        maintenance::clean_up_intermediate_results(&self.layout, &self.policy, self.verbose)
    }

    /// Maximum age of intermediate results in hours
    #[must_use]
    pub fn max_age_hours(&self) -> u64 {
        self.policy.max_age_hours
    }

    /// Set the maximum age of intermediate results in hours
    pub fn set_max_age_hours(&mut self, hours: u64) {
        self.policy.max_age_hours = hours;
    }

    /// Maximum overall size of the intermediate store in bytes
    #[must_use]
    pub fn max_size_bytes(&self) -> u64 {
        self.policy.max_size_bytes
    }

    /// Set the maximum overall size of the intermediate store in bytes
    pub fn set_max_size_bytes(&mut self, bytes: u64) {
        self.policy.max_size_bytes = bytes;
    }

    /// Whether the executor should bypass the cache entirely.
    ///
    /// Advisory state for the caller; cache operations do not intercept
    /// themselves.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Set whether the executor should bypass the cache
    pub fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
    }

    /// Whether misses trigger diagnostics against existing entries
    #[must_use]
    pub fn analyze_misses(&self) -> bool {
        self.analyze_misses
    }

    /// Set whether misses trigger diagnostics
    pub fn set_analyze_misses(&mut self, analyze_misses: bool) {
        self.analyze_misses = analyze_misses;
    }

    /// Whether maintenance logs per-file detail at info level
    #[must_use]
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Set verbose maintenance logging
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }
}

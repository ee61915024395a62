//! Maintenance of the intermediate-result store
//!
//! Cleanup runs in two phases: age-based expiry of keys whose marker has not
//! been touched within `max_age_hours`, then size-based eviction of whole
//! key groups, largest first, until the store fits `max_size_bytes`. The
//! size phase frees the most bytes per decision rather than approximating
//! LRU; recency is only honoured through the age phase.
//!
//! Periodic maintenance is coordinated across processes with an advisory
//! exclusive lock on the cleanup state file and rate-limited across runs by
//! that file's mtime.

use crate::layout::StoreLayout;
use crate::{Error, Result};
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Default maximum age of an intermediate result: 31 days.
pub const DEFAULT_MAX_AGE_HOURS: u64 = 24 * 31;

/// Default maximum overall store size: 1 GiB.
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 1024 * 1024 * 1024;

/// Minimum interval between periodic maintenance runs.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Bounds enforced by the cleanup sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenancePolicy {
    /// Entries whose marker is older than this many hours are expired
    pub max_age_hours: u64,
    /// Target upper bound for the total size of recognised store files
    pub max_size_bytes: u64,
}

impl Default for MaintenancePolicy {
    fn default() -> Self {
        Self {
            max_age_hours: DEFAULT_MAX_AGE_HOURS,
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
        }
    }
}

/// Totals reported by one cleanup sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    /// Recognised store files seen by the scan
    pub files_scanned: usize,
    /// Total size of recognised files before any deletion
    pub total_size: u64,
    /// Distinct cache keys expired by the age phase
    pub expired_keys: usize,
    /// Files deleted across both phases
    pub entries_deleted: u64,
    /// Bytes freed across both phases
    pub bytes_freed: u64,
}

/// What a `perform_maintenance` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceOutcome {
    /// The cleanup body ran; totals attached
    Performed(CleanupStats),
    /// The last run was less than the maintenance interval ago
    SkippedRecent,
    /// Another process holds the maintenance lock
    SkippedLocked,
}

/// One recognised file in the store.
struct StoreEntry {
    path: PathBuf,
    filename: String,
    cache_key: String,
    size: u64,
}

/// Run maintenance if due: lock out other processes, honour the 24h rate
/// gate, then sweep and stamp the state file.
///
/// # Errors
///
/// Returns [`Error::Io`] if the state file cannot be opened or locked, or if
/// the sweep itself fails. Contention and recency are outcomes, not errors.
pub fn perform_maintenance(
    layout: &StoreLayout,
    policy: &MaintenancePolicy,
    verbose: bool,
) -> Result<MaintenanceOutcome> {
    let state_path = layout.cleanup_state_file();
    let state = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&state_path)
        .map_err(|e| Error::io(e, &state_path, "open"))?;

    // Advisory and non-blocking: contention means another process is
    // already sweeping, which is a normal outcome.
    let locked = state
        .try_lock_exclusive()
        .map_err(|e| Error::io(e, &state_path, "lock"))?;
    if !locked {
        info!("Cache maintenance is already performed by another process");
        return Ok(MaintenanceOutcome::SkippedLocked);
    }

    let last_run = state
        .metadata()
        .map_err(|e| Error::io(e, &state_path, "metadata"))?
        .modified()
        .map_err(|e| Error::io(e, &state_path, "modified"))?;
    let age = SystemTime::now()
        .duration_since(last_run)
        .unwrap_or(Duration::ZERO);
    if age < MAINTENANCE_INTERVAL {
        debug!(
            age_secs = age.as_secs(),
            "Not performing routine maintenance; the last maintenance was recent"
        );
        return Ok(MaintenanceOutcome::SkippedRecent);
    }

    info!(home = %layout.home().display(), "Performing periodic cache maintenance");
    let stats = clean_up_intermediate_results(layout, policy, verbose)?;

    // Stamp only after a successful sweep; the mtime is the cross-run
    // rate limiter, the lock is process exclusion only.
    state
        .set_modified(SystemTime::now())
        .map_err(|e| Error::io(e, &state_path, "set_modified"))?;
    Ok(MaintenanceOutcome::Performed(stats))
}

/// Sweep the intermediate-result store: expire by age, then evict by size.
///
/// Unrecognised files are logged and left alone; they count toward neither
/// the total size nor any eviction decision. Per-file delete failures are
/// logged and skipped.
///
/// # Errors
///
/// Returns [`Error::Io`] if the store directory cannot be scanned.
pub fn clean_up_intermediate_results(
    layout: &StoreLayout,
    policy: &MaintenancePolicy,
    verbose: bool,
) -> Result<CleanupStats> {
    let dir = layout.intermediate_results_dir();
    info!(
        dir = %dir.display(),
        max_age_hours = policy.max_age_hours,
        max_size = %format_bytes(policy.max_size_bytes),
        "Cleaning intermediate results cache"
    );

    let now = SystemTime::now();
    let mut entries = Vec::new();
    let mut expired = HashSet::new();

    let dir_iter = fs::read_dir(dir).map_err(|e| Error::io(e, dir, "read_dir"))?;
    for dent in dir_iter {
        let dent = dent.map_err(|e| Error::io(e, dir, "read_dir"))?;
        let metadata = dent
            .metadata()
            .map_err(|e| Error::io(e, dent.path(), "metadata"))?;
        if !metadata.is_file() {
            continue;
        }
        let Ok(filename) = dent.file_name().into_string() else {
            warn!(path = %dent.path().display(), "Unrecognised file in cache");
            continue;
        };
        let Some(prefix) = StoreLayout::parse_cache_key_prefix(&filename) else {
            warn!(path = %dent.path().display(), "Unrecognised file in cache");
            continue;
        };
        let cache_key = prefix.to_string();

        // Markers are the files that get touched on use; only they drive
        // the age decision. Outputs inherit it through the shared prefix.
        if &filename[cache_key.len()..] == ".txt" {
            let last_modified = metadata
                .modified()
                .map_err(|e| Error::io(e, dent.path(), "modified"))?;
            let age_hours = now
                .duration_since(last_modified)
                .unwrap_or(Duration::ZERO)
                .as_secs()
                / 3600;
            if age_hours > policy.max_age_hours {
                expired.insert(cache_key.clone());
            }
        }

        entries.push(StoreEntry {
            path: dent.path(),
            filename,
            cache_key,
            size: metadata.len(),
        });
    }

    let mut total_size: u64 = entries.iter().map(|e| e.size).sum();
    let mut stats = CleanupStats {
        files_scanned: entries.len(),
        total_size,
        expired_keys: expired.len(),
        ..CleanupStats::default()
    };
    info!(
        files = stats.files_scanned,
        total_size = %format_bytes(total_size),
        expired_keys = stats.expired_keys,
        "Scanned intermediate results"
    );

    // Phase 1: delete every file belonging to an expired key. Failed
    // deletions keep their entry so the size phase can try again.
    if !expired.is_empty() {
        let mut freed = 0u64;
        let mut deleted = 0u64;
        entries.retain(|entry| {
            if !expired.contains(&entry.cache_key) {
                return true;
            }
            if verbose {
                info!(file = %entry.filename, "Deleting expired cache entry");
            }
            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    freed += entry.size;
                    deleted += 1;
                    false
                }
                Err(e) => {
                    warn!(path = %entry.path.display(), error = %e, "Failed to delete cache entry");
                    true
                }
            }
        });
        info!(
            freed = %format_bytes(freed),
            deleted,
            "Deleted expired cache entries"
        );
        total_size -= freed;
        stats.bytes_freed += freed;
        stats.entries_deleted += deleted;
    }

    if total_size <= policy.max_size_bytes {
        return Ok(stats);
    }

    info!("Cache size exceeds target size, deleting largest entries first");

    // Phase 2: group the remaining files by key and free whole groups,
    // biggest first, until the store fits. Ties on size break by key so
    // the order is deterministic. Groups are never abandoned part-way.
    let mut groups: BTreeMap<String, Vec<StoreEntry>> = BTreeMap::new();
    for entry in entries {
        groups.entry(entry.cache_key.clone()).or_default().push(entry);
    }
    let mut groups: Vec<(String, Vec<StoreEntry>)> = groups.into_iter().collect();
    groups.sort_by_key(|(_, group)| std::cmp::Reverse(group.iter().map(|e| e.size).sum::<u64>()));

    let mut freed = 0u64;
    let mut deleted = 0u64;
    for (cache_key, group) in groups {
        if total_size <= policy.max_size_bytes {
            break;
        }
        debug!(key = %cache_key, "Evicting cache entry group");
        for entry in group {
            if verbose {
                info!(file = %entry.filename, "Deleting cache entry");
            }
            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    freed += entry.size;
                    total_size -= entry.size;
                    deleted += 1;
                }
                Err(e) => {
                    warn!(path = %entry.path.display(), error = %e, "Failed to delete cache entry");
                }
            }
        }
    }
    info!(
        freed = %format_bytes(freed),
        deleted,
        "Deleted cache entries to reduce cache size"
    );
    stats.bytes_freed += freed;
    stats.entries_deleted += deleted;
    Ok(stats)
}

/// Render a byte count with a binary-unit suffix for log output.
pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

//! Explaining cache misses
//!
//! When a key misses, the store usually still holds entries of the same
//! kind from earlier runs. Ranking those by fingerprint delta against the
//! missed key tells the operator *why* they missed: which inputs changed,
//! appeared, or disappeared since the closest previous run.

use crate::key::{AnnotatedValue, CacheKey, Delta};
use crate::layout::StoreLayout;
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use std::fs;
use std::time::SystemTime;
use tracing::{info, warn};

/// An existing store entry of the missed key's kind, with its distance to
/// the missed key.
#[derive(Debug, Clone)]
pub struct MissCandidate {
    /// Marker filename in the store
    pub filename: String,
    /// Marker mtime, i.e. when the entry was last used
    pub last_modified: SystemTime,
    /// The candidate's parsed fingerprint
    pub key: CacheKey,
    /// Component differences against the missed key
    pub deltas: Vec<Delta>,
}

/// Rank existing entries of `key`'s kind by delta count, log the ranking
/// and a detailed delta for the best match, and return the ranking.
///
/// Purely observational: no store state changes. Unreadable directories
/// yield an empty ranking; unparseable markers are logged and skipped.
#[must_use]
pub fn analyze_cache_miss(layout: &StoreLayout, key: &CacheKey) -> Vec<MissCandidate> {
    let marker_pattern = Regex::new(&format!(r"^{}_[0-9a-f]+\.txt$", regex::escape(key.kind())))
        .expect("valid marker pattern");

    let mut candidates = Vec::new();
    let Ok(dir_iter) = fs::read_dir(layout.intermediate_results_dir()) else {
        return candidates;
    };
    for dent in dir_iter.flatten() {
        let Ok(filename) = dent.file_name().into_string() else {
            continue;
        };
        if !marker_pattern.is_match(&filename) {
            continue;
        }
        let Ok(last_modified) = dent.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        match CacheKey::read(&dent.path()) {
            Ok(other) => {
                let deltas = key.diff(&other);
                candidates.push(MissCandidate {
                    filename,
                    last_modified,
                    key: other,
                    deltas,
                });
            }
            Err(e) => {
                warn!(path = %dent.path().display(), error = %e, "Failed to read cache key for analysis");
            }
        }
    }

    candidates.sort_by_key(|c| c.deltas.len());

    info!(
        "  {} existing cache entries for {}",
        candidates.len(),
        key.kind()
    );
    for candidate in &candidates {
        info!(
            "    {} {} {} deltas",
            candidate.filename,
            format_timestamp(candidate.last_modified),
            candidate.deltas.len()
        );
    }
    if let Some(best) = candidates.first() {
        info!("  Detailed delta for cache entry with best match:");
        for delta in &best.deltas {
            info!("    {}", delta.key);
            info!("      New: {}", render_side(delta.ours.as_ref()));
            info!("      Old: {}", render_side(delta.theirs.as_ref()));
        }
    }

    candidates
}

fn render_side(value: Option<&AnnotatedValue>) -> String {
    value.map_or_else(|| "(none)".to_string(), ToString::to_string)
}

fn format_timestamp(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Secs, true)
}

//! Content-addressed intermediate-result caching for pipeline nodes
//!
//! This crate provides the caching infrastructure that lets a build
//! pipeline skip recomputation when a node's inputs reappear:
//! - Stable fingerprinting of named input components into a [`CacheKey`]
//! - An on-disk store whose filenames encode the key
//! - Crash-safe publication of outputs (atomic renames, marker written last)
//! - Cooperative cross-process maintenance bounded by age and size
//! - Miss diagnostics ranking existing entries by fingerprint delta
//!
//! # Overview
//!
//! The executor asks [`CacheManager::restore_outputs`] for a node's outputs
//! under a key; on a hit the store paths are handed back, on a miss the
//! executor runs the node and publishes the results with
//! [`CacheManager::save_outputs`]. The marker file written last during
//! publication is the commit point, and its mtime is the LRU signal
//! maintenance uses for age-based expiry.
//!
//! # Cache Key Computation
//!
//! A key is computed from named components (input file hashes, settings,
//! resolved artifact coordinates). Components are canonicalised by sorting
//! on the name and hashing `name: value` lines with SHA-1; the recipe is a
//! byte-exact contract shared with every other consumer of the store.

mod diagnostics;
mod error;
pub mod fsutil;
mod key;
mod layout;
mod maintenance;
mod node;
mod store;

// Re-export error types at crate root
pub use error::{Error, Result};

// Re-export main types
pub use diagnostics::{MissCandidate, analyze_cache_miss};
pub use key::{
    AnnotatedValue, CacheKey, Delta, FILENAME_PREFIX_RE, HASH_VALUE_PATTERN, KIND_PATTERN,
    KeyBuilder,
};
pub use layout::{CLEANUP_STATE_FILENAME, HOME_ENV_VAR, StoreLayout};
pub use maintenance::{
    CleanupStats, DEFAULT_MAX_AGE_HOURS, DEFAULT_MAX_SIZE_BYTES, MaintenanceOutcome,
    MaintenancePolicy, clean_up_intermediate_results, perform_maintenance,
};
pub use node::{CacheableNode, OutputKind, OutputSpec};
pub use store::{CacheLookup, CacheManager};

//! On-disk layout of the cache home directory
//!
//! ```text
//! <home>/artifacts/                      stable artifacts (not governed here)
//! <home>/intermediate_results/           the intermediate-result store
//! <home>/assets/                         asset indices (not governed here)
//! <home>/nfrt_cache_cleanup.state        maintenance lock + rate-gate mtime
//! ```
//!
//! Store filenames encode the cache key: `<kind>_<hash>.txt` is the marker,
//! `<kind>_<hash>_<name><ext>` an output file. The layout owns path
//! derivation so every component agrees on the grammar.

use crate::key::{CacheKey, FILENAME_PREFIX_RE};
use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Filename of the maintenance coordination file, directly under the home
/// directory.
pub const CLEANUP_STATE_FILENAME: &str = "nfrt_cache_cleanup.state";

/// Environment variable overriding the default home directory.
pub const HOME_ENV_VAR: &str = "NFRT_HOME";

/// The cache home directory and its fixed subdirectories.
///
/// Opening the layout creates the directory tree; for the lifetime of the
/// handle the directories are owned by the cache, and other components only
/// reach in via paths returned from restore/publish.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    home: PathBuf,
    artifacts_dir: PathBuf,
    intermediate_results_dir: PathBuf,
    assets_dir: PathBuf,
}

impl StoreLayout {
    /// Open (and create if needed) the layout rooted at `home`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if a directory cannot be created.
    pub fn open(home: impl Into<PathBuf>) -> Result<Self> {
        let home = home.into();
        let layout = Self {
            artifacts_dir: home.join("artifacts"),
            intermediate_results_dir: home.join("intermediate_results"),
            assets_dir: home.join("assets"),
            home,
        };
        for dir in [
            &layout.home,
            &layout.artifacts_dir,
            &layout.intermediate_results_dir,
            &layout.assets_dir,
        ] {
            fs::create_dir_all(dir).map_err(|e| Error::io(e, dir, "create_dir_all"))?;
        }
        Ok(layout)
    }

    /// Resolve the default home directory: `$NFRT_HOME` if set, else
    /// `~/.nfrt`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if neither the override nor a home
    /// directory is available.
    pub fn default_home() -> Result<PathBuf> {
        if let Ok(home) = std::env::var(HOME_ENV_VAR) {
            if !home.trim().is_empty() {
                return Ok(PathBuf::from(home));
            }
        }
        dirs::home_dir()
            .map(|home| home.join(".nfrt"))
            .ok_or_else(|| Error::configuration("could not determine home directory"))
    }

    /// The home directory
    #[must_use]
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Artifact storage, stable across pipeline versions
    #[must_use]
    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    /// The governed intermediate-result store
    #[must_use]
    pub fn intermediate_results_dir(&self) -> &Path {
        &self.intermediate_results_dir
    }

    /// Asset index storage
    #[must_use]
    pub fn assets_dir(&self) -> &Path {
        &self.assets_dir
    }

    /// The maintenance coordination file
    #[must_use]
    pub fn cleanup_state_file(&self) -> PathBuf {
        self.home.join(CLEANUP_STATE_FILENAME)
    }

    /// The marker file for `key`: `<kind>_<hash>.txt`
    #[must_use]
    pub fn marker_file(&self, key: &CacheKey) -> PathBuf {
        self.intermediate_results_dir.join(format!("{key}.txt"))
    }

    /// The output file for `(key, name)`: `<kind>_<hash>_<name><ext>`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `name` contains a path separator;
    /// output files always live directly in the store directory.
    pub fn output_file(&self, key: &CacheKey, name: &str, extension: &str) -> Result<PathBuf> {
        if name.chars().any(std::path::is_separator) {
            return Err(Error::configuration(format!(
                "output name {name:?} contains a path separator"
            )));
        }
        Ok(self
            .intermediate_results_dir
            .join(format!("{key}_{name}{extension}")))
    }

    /// Extract the `kind_hash` cache-key prefix from a store filename, if
    /// the name follows the store grammar.
    #[must_use]
    pub fn parse_cache_key_prefix(filename: &str) -> Option<&str> {
        FILENAME_PREFIX_RE
            .captures(filename)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::AnnotatedValue;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn test_key() -> CacheKey {
        let mut comps = BTreeMap::new();
        comps.insert("a".to_string(), AnnotatedValue::new("x"));
        CacheKey::new("compile", comps).unwrap()
    }

    #[test]
    fn open_creates_directory_tree() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().join("cache-home");
        let layout = StoreLayout::open(&home).unwrap();

        assert!(layout.artifacts_dir().is_dir());
        assert!(layout.intermediate_results_dir().is_dir());
        assert!(layout.assets_dir().is_dir());
        assert_eq!(layout.cleanup_state_file(), home.join(CLEANUP_STATE_FILENAME));
    }

    #[test]
    fn marker_and_output_paths_share_the_key_prefix() {
        let dir = TempDir::new().unwrap();
        let layout = StoreLayout::open(dir.path()).unwrap();
        let key = test_key();

        let marker = layout.marker_file(&key);
        let output = layout.output_file(&key, "classes", ".jar").unwrap();

        let marker_name = marker.file_name().unwrap().to_str().unwrap();
        let output_name = output.file_name().unwrap().to_str().unwrap();
        assert_eq!(marker_name, format!("{key}.txt"));
        assert_eq!(output_name, format!("{key}_classes.jar"));
        assert_eq!(
            StoreLayout::parse_cache_key_prefix(marker_name),
            Some(key.to_string().as_str())
        );
        assert_eq!(
            StoreLayout::parse_cache_key_prefix(output_name),
            Some(key.to_string().as_str())
        );
    }

    #[test]
    fn output_name_must_not_contain_separators() {
        let dir = TempDir::new().unwrap();
        let layout = StoreLayout::open(dir.path()).unwrap();
        assert!(layout.output_file(&test_key(), "a/b", ".jar").is_err());
    }

    #[test]
    fn unrecognised_names_do_not_parse() {
        assert_eq!(StoreLayout::parse_cache_key_prefix("README.md"), None);
        assert_eq!(StoreLayout::parse_cache_key_prefix("_abc.txt"), None);
        // Hash shorter than 40 hex digits is not a key prefix
        assert_eq!(StoreLayout::parse_cache_key_prefix("t_abc123.txt"), None);
    }
}

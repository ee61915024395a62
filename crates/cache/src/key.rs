//! Cache key fingerprinting for pipeline node inputs
//!
//! A [`CacheKey`] canonicalises a set of named input components into a stable
//! SHA-1 digest. The textual form `kind_hash` names every file belonging to
//! the key in the intermediate-result store, and the JSON form is persisted
//! as the marker sidecar.
//!
//! The hash recipe is a byte-exact interop contract: entries sorted by name,
//! rendered as `name: value`, joined with `\n`, hashed with SHA-1. Any
//! implementation producing different bytes fragments the cache.

use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::LazyLock;

/// Pattern a key kind must match in full.
pub const KIND_PATTERN: &str = "[A-Za-z0-9]{1,32}";

/// Pattern a hash value must match in full.
pub const HASH_VALUE_PATTERN: &str = "[0-9a-f]{40}";

static KIND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^{KIND_PATTERN}$")).expect("valid kind pattern"));

static HASH_VALUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^{HASH_VALUE_PATTERN}$")).expect("valid hash pattern"));

/// Matches the `kind_hash` prefix at the start of a store filename.
///
/// Capture group 1 is the cache-key string.
pub static FILENAME_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^({KIND_PATTERN}_{HASH_VALUE_PATTERN})")).expect("valid prefix pattern")
});

/// A component value with optional human context.
///
/// Only `value` participates in hashing. The annotation carries information
/// that is useful when explaining a miss (such as the file path a hash was
/// computed from) but must not affect the key identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AnnotatedValue {
    /// The value that is hashed into the key
    pub value: String,
    /// Optional context, preserved through JSON round-trips
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

impl AnnotatedValue {
    /// A value without annotation
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            annotation: None,
        }
    }

    /// A value with annotation
    #[must_use]
    pub fn annotated(value: impl Into<String>, annotation: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            annotation: Some(annotation.into()),
        }
    }
}

impl fmt::Display for AnnotatedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.annotation {
            Some(annotation) => write!(f, "{} ({annotation})", self.value),
            None => write!(f, "{}", self.value),
        }
    }
}

/// A per-component difference between two fingerprints.
///
/// `ours` is absent when the component only exists in the other key,
/// `theirs` when it only exists in this one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    /// Component name
    pub key: String,
    /// This key's side, if present
    pub ours: Option<AnnotatedValue>,
    /// The other key's side, if present
    pub theirs: Option<AnnotatedValue>,
}

/// A content-addressed fingerprint of a pipeline node's inputs.
///
/// The triple `(kind, hash_value, components)` where `hash_value` is a pure
/// function of `{name -> value}`. Construction always validates; a `CacheKey`
/// in hand is known well-formed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawCacheKey")]
pub struct CacheKey {
    #[serde(rename = "type")]
    kind: String,
    hash_value: String,
    components: BTreeMap<String, AnnotatedValue>,
}

/// Mirror of the marker JSON document, prior to validation.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCacheKey {
    #[serde(rename = "type")]
    kind: String,
    hash_value: String,
    components: BTreeMap<String, AnnotatedValue>,
}

impl TryFrom<RawCacheKey> for CacheKey {
    type Error = Error;

    fn try_from(raw: RawCacheKey) -> Result<Self> {
        Self::from_parts(raw.kind, raw.hash_value, raw.components)
    }
}

impl CacheKey {
    /// Create a key for `kind`, computing the hash from the components.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if `kind` does not match
    /// [`KIND_PATTERN`].
    pub fn new(
        kind: impl Into<String>,
        components: BTreeMap<String, AnnotatedValue>,
    ) -> Result<Self> {
        let kind = kind.into();
        validate_kind(&kind)?;
        let hash_value = compute_hash_value(&components);
        Ok(Self {
            kind,
            hash_value,
            components,
        })
    }

    /// Reassemble a key from an explicit hash value (the deserialisation
    /// path), validating both fields.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if `kind` or `hash_value` fail their
    /// pattern checks.
    pub fn from_parts(
        kind: impl Into<String>,
        hash_value: impl Into<String>,
        components: BTreeMap<String, AnnotatedValue>,
    ) -> Result<Self> {
        let kind = kind.into();
        let hash_value = hash_value.into();
        validate_kind(&kind)?;
        if !HASH_VALUE_RE.is_match(&hash_value) {
            return Err(Error::invalid_key(format!(
                "invalid hash value {hash_value:?}, must be a lowercase SHA-1 hash"
            )));
        }
        Ok(Self {
            kind,
            hash_value,
            components,
        })
    }

    /// The kind tag identifying the pipeline node class
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The 40-hex-digit component digest
    #[must_use]
    pub fn hash_value(&self) -> &str {
        &self.hash_value
    }

    /// The named components this key was computed from
    #[must_use]
    pub fn components(&self) -> &BTreeMap<String, AnnotatedValue> {
        &self.components
    }

    /// Compare component-wise against `other`.
    ///
    /// Emits one [`Delta`] per component whose value differs or which exists
    /// on only one side. Delta ordering is unspecified.
    #[must_use]
    pub fn diff(&self, other: &CacheKey) -> Vec<Delta> {
        let mut deltas = Vec::new();
        for (name, ours) in &self.components {
            let theirs = other.components.get(name);
            if theirs.is_none_or(|t| t.value != ours.value) {
                deltas.push(Delta {
                    key: name.clone(),
                    ours: Some(ours.clone()),
                    theirs: theirs.cloned(),
                });
            }
        }
        for (name, theirs) in &other.components {
            if !self.components.contains_key(name) {
                deltas.push(Delta {
                    key: name.clone(),
                    ours: None,
                    theirs: Some(theirs.clone()),
                });
            }
        }
        deltas
    }

    /// Render one `name: value (annotation)` line per component.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.components {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(&value.to_string());
            out.push('\n');
        }
        out
    }

    /// Serialise to the pretty-printed marker JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if serialisation fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::configuration(format!("failed to serialize cache key: {e}")))
    }

    /// Write the marker JSON document to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or the write fails.
    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?).map_err(|e| Error::io(e, path, "write"))
    }

    /// Read and validate a marker JSON document from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and
    /// [`Error::MarkerFormat`] if its contents are not a valid key document.
    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::io(e, path, "read"))?;
        serde_json::from_str(&content).map_err(|e| Error::marker_format(path, e.to_string()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.kind, self.hash_value)
    }
}

fn validate_kind(kind: &str) -> Result<()> {
    if KIND_RE.is_match(kind) {
        Ok(())
    } else {
        Err(Error::invalid_key(format!(
            "invalid kind {kind:?}, must match {KIND_PATTERN}"
        )))
    }
}

/// The canonical digest: sort by name (BTreeMap iteration order is already
/// byte-wise lexicographic), render `name: value`, join with `\n`, SHA-1.
fn compute_hash_value(components: &BTreeMap<String, AnnotatedValue>) -> String {
    let joined = components
        .iter()
        .map(|(name, value)| format!("{name}: {}", value.value))
        .collect::<Vec<_>>()
        .join("\n");
    hex::encode(Sha1::digest(joined.as_bytes()))
}

/// Collects heterogeneous input components into a [`CacheKey`].
///
/// Pipeline actions use this to fingerprint whatever determines their output:
/// literal settings, resolved artifact coordinates, and the contents of input
/// files. Adding a component under an existing name replaces it.
#[derive(Debug, Default)]
pub struct KeyBuilder {
    components: BTreeMap<String, AnnotatedValue>,
}

impl KeyBuilder {
    /// An empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a literal component
    #[must_use]
    pub fn add(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.components
            .insert(name.into(), AnnotatedValue::new(value));
        self
    }

    /// Add a literal component with an annotation
    #[must_use]
    pub fn add_annotated(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        annotation: impl Into<String>,
    ) -> Self {
        self.components
            .insert(name.into(), AnnotatedValue::annotated(value, annotation));
        self
    }

    /// Add a component whose value is the SHA-1 of a file's contents, with
    /// the path recorded as the annotation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read.
    pub fn add_path(mut self, name: impl Into<String>, path: &Path) -> Result<Self> {
        let mut file = fs::File::open(path).map_err(|e| Error::io(e, path, "open"))?;
        let mut hasher = Sha1::new();
        io::copy(&mut file, &mut hasher).map_err(|e| Error::io(e, path, "read"))?;
        self.components.insert(
            name.into(),
            AnnotatedValue::annotated(hex::encode(hasher.finalize()), path.display().to_string()),
        );
        Ok(self)
    }

    /// Finalise into a key of the given kind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if `kind` is not a valid kind tag.
    pub fn build(self, kind: impl Into<String>) -> Result<CacheKey> {
        CacheKey::new(kind, self.components)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn components(pairs: &[(&str, &str)]) -> BTreeMap<String, AnnotatedValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), AnnotatedValue::new(*v)))
            .collect()
    }

    #[test]
    fn hash_matches_reference_vector() {
        // "a: x\nb: y"
        let key = CacheKey::new("t", components(&[("a", "x"), ("b", "y")])).unwrap();
        assert_eq!(key.hash_value(), "b098fe07185bb3e0f1464e504ac6aeda02a01c04");
        assert_eq!(key.to_string(), "t_b098fe07185bb3e0f1464e504ac6aeda02a01c04");
    }

    #[test]
    fn hash_ignores_annotations() {
        let plain = CacheKey::new("t", components(&[("a", "x"), ("b", "y")])).unwrap();
        let mut annotated = components(&[("a", "x")]);
        annotated.insert(
            "b".to_string(),
            AnnotatedValue::annotated("y", "from /tmp/b"),
        );
        let key = CacheKey::new("t", annotated).unwrap();
        assert_eq!(plain.hash_value(), key.hash_value());
    }

    #[test]
    fn hash_changes_with_any_value() {
        let base = CacheKey::new("t", components(&[("a", "x"), ("b", "y")])).unwrap();
        let changed = CacheKey::new("t", components(&[("a", "x2"), ("b", "y")])).unwrap();
        assert_ne!(base.hash_value(), changed.hash_value());
    }

    #[test]
    fn empty_components_hash_empty_string() {
        let key = CacheKey::new("t", BTreeMap::new()).unwrap();
        assert_eq!(key.hash_value(), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn kind_validation() {
        assert!(CacheKey::new("", BTreeMap::new()).is_err());
        assert!(CacheKey::new("has_underscore", BTreeMap::new()).is_err());
        assert!(CacheKey::new("a".repeat(33), BTreeMap::new()).is_err());
        assert!(CacheKey::new("a".repeat(32), BTreeMap::new()).is_ok());
        assert!(CacheKey::new("Compile9", BTreeMap::new()).is_ok());
    }

    #[test]
    fn from_parts_validates_hash() {
        let err = CacheKey::from_parts("t", "not-a-hash", BTreeMap::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidKey { .. }));
        // Uppercase hex is rejected; the contract is lowercase
        let upper = "B098FE07185BB3E0F1464E504AC6AEDA02A01C04";
        assert!(CacheKey::from_parts("t", upper, BTreeMap::new()).is_err());
        let lower = "b098fe07185bb3e0f1464e504ac6aeda02a01c04";
        assert!(CacheKey::from_parts("t", lower, BTreeMap::new()).is_ok());
    }

    #[test]
    fn json_round_trip_preserves_annotations() {
        let mut comps = BTreeMap::new();
        comps.insert(
            "src".to_string(),
            AnnotatedValue::annotated("deadbeef", "/tmp/s"),
        );
        comps.insert("opt".to_string(), AnnotatedValue::new("O2"));
        let key = CacheKey::new("build", comps).unwrap();

        let json = key.to_json().unwrap();
        assert!(json.contains("\"hashValue\""));
        assert!(json.contains("\"type\": \"build\""));

        let parsed: CacheKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, key);
        assert_eq!(
            parsed.components()["src"].annotation.as_deref(),
            Some("/tmp/s")
        );
        // Absent annotations are omitted from the document entirely
        assert!(!json.contains("annotation\": null"));
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("key.json");
        let key = CacheKey::new("build", components(&[("src", "deadbeef")])).unwrap();
        key.write(&path).unwrap();
        assert_eq!(CacheKey::read(&path).unwrap(), key);
    }

    #[test]
    fn read_rejects_invalid_key_document() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("key.json");
        fs::write(
            &path,
            r#"{ "type": "bad kind", "hashValue": "b098fe07185bb3e0f1464e504ac6aeda02a01c04", "components": {} }"#,
        )
        .unwrap();
        assert!(matches!(
            CacheKey::read(&path),
            Err(Error::MarkerFormat { .. })
        ));
    }

    #[test]
    fn diff_reports_changed_missing_and_extra() {
        let a = CacheKey::new("t", components(&[("x", "1"), ("y", "2")])).unwrap();
        let b = CacheKey::new("t", components(&[("x", "1"), ("y", "3"), ("z", "4")])).unwrap();

        let mut deltas = a.diff(&b);
        deltas.sort_by(|l, r| l.key.cmp(&r.key));
        assert_eq!(deltas.len(), 2);

        assert_eq!(deltas[0].key, "y");
        assert_eq!(deltas[0].ours.as_ref().unwrap().value, "2");
        assert_eq!(deltas[0].theirs.as_ref().unwrap().value, "3");

        assert_eq!(deltas[1].key, "z");
        assert!(deltas[1].ours.is_none());
        assert_eq!(deltas[1].theirs.as_ref().unwrap().value, "4");
    }

    #[test]
    fn diff_of_equal_keys_is_empty() {
        let a = CacheKey::new("t", components(&[("x", "1")])).unwrap();
        assert!(a.diff(&a).is_empty());
    }

    #[test]
    fn filename_prefix_parses() {
        let key = CacheKey::new("compile", components(&[("a", "x")])).unwrap();
        let filename = format!("{key}_classes.jar");
        let captures = FILENAME_PREFIX_RE.captures(&filename).unwrap();
        assert_eq!(&captures[1], key.to_string().as_str());
        assert!(FILENAME_PREFIX_RE.captures("notakey.txt").is_none());
    }

    #[test]
    fn describe_includes_annotations() {
        let mut comps = components(&[("opt", "O2")]);
        comps.insert(
            "src".to_string(),
            AnnotatedValue::annotated("deadbeef", "/tmp/s"),
        );
        let key = CacheKey::new("build", comps).unwrap();
        assert_eq!(key.describe(), "opt: O2\nsrc: deadbeef (/tmp/s)\n");
    }

    #[test]
    fn builder_hashes_file_contents() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("input.txt");
        fs::write(&input, "P").unwrap();

        let key = KeyBuilder::new()
            .add("opt", "O2")
            .add_path("src", &input)
            .unwrap()
            .build("build")
            .unwrap();

        let src = &key.components()["src"];
        assert_eq!(src.value, "511993d3c99719e38a6779073019dacd7178ddb9");
        assert_eq!(src.annotation.as_deref(), Some(input.display().to_string().as_str()));
    }

    #[test]
    fn builder_last_add_wins() {
        let key = KeyBuilder::new()
            .add("a", "1")
            .add("a", "2")
            .build("t")
            .unwrap();
        assert_eq!(key.components()["a"].value, "2");
    }
}

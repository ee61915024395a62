//! Collaborator contract between the executor and the cache
//!
//! The cache never runs a node; it only needs a node's identity and its
//! declared outputs to derive store paths. Implement [`CacheableNode`] for
//! the executor's node type to let it participate in restore/publish.

use indexmap::IndexMap;

/// The file type of a declared output, determining its store extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    /// A Java archive
    Jar,
    /// A zip archive
    Zip,
    /// A JSON document
    Json,
    /// Plain text
    Txt,
    /// Opaque binary data
    Bin,
}

impl OutputKind {
    /// The dot-prefixed filename extension for this kind
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Jar => ".jar",
            Self::Zip => ".zip",
            Self::Json => ".json",
            Self::Txt => ".txt",
            Self::Bin => ".bin",
        }
    }
}

/// A node's declaration of one output it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSpec {
    kind: OutputKind,
}

impl OutputSpec {
    /// Declare an output of the given kind
    #[must_use]
    pub const fn new(kind: OutputKind) -> Self {
        Self { kind }
    }

    /// The declared output kind
    #[must_use]
    pub const fn kind(&self) -> OutputKind {
        self.kind
    }

    /// The store extension, delegated from the kind
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        self.kind.extension()
    }
}

/// Trait for pipeline nodes whose outputs can be cached.
///
/// `outputs()` returns the declared outputs in declaration order; every
/// produced output published for the node must appear here.
pub trait CacheableNode {
    /// Stable identifier, used in log messages
    fn id(&self) -> &str;

    /// The declared outputs, by logical name
    fn outputs(&self) -> &IndexMap<String, OutputSpec>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_are_dot_prefixed() {
        for kind in [
            OutputKind::Jar,
            OutputKind::Zip,
            OutputKind::Json,
            OutputKind::Txt,
            OutputKind::Bin,
        ] {
            assert!(kind.extension().starts_with('.'));
        }
        assert_eq!(OutputSpec::new(OutputKind::Jar).extension(), ".jar");
    }
}

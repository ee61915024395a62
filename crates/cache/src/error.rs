//! Error types for the cache crate

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error during cache operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(nfrt::cache::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "rename", "lock")
        operation: String,
    },

    /// A cache key field failed validation
    #[error("Invalid cache key: {message}")]
    #[diagnostic(
        code(nfrt::cache::invalid_key),
        help("Key kinds are 1-32 alphanumeric characters; hashes are 40 lowercase hex digits")
    )]
    InvalidKey {
        /// Which field was rejected and why
        message: String,
    },

    /// A marker file did not contain a valid cache key document
    #[error("Malformed cache marker {}: {message}", path.display())]
    #[diagnostic(code(nfrt::cache::marker_format))]
    MarkerFormat {
        /// The marker file that failed to parse
        path: Box<Path>,
        /// Parser error message
        message: String,
    },

    /// A produced output name was not declared by the node
    #[error("Node {node} does not declare an output named {name:?}")]
    #[diagnostic(code(nfrt::cache::unknown_output))]
    UnknownOutput {
        /// The node whose outputs were being published
        node: String,
        /// The undeclared output name
        name: String,
    },

    /// Configuration or validation error
    #[error("Cache configuration error: {message}")]
    #[diagnostic(code(nfrt::cache::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },
}

impl Error {
    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create an invalid-key error
    #[must_use]
    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: msg.into(),
        }
    }

    /// Create a marker-format error
    #[must_use]
    pub fn marker_format(path: impl AsRef<Path>, msg: impl Into<String>) -> Self {
        Self::MarkerFormat {
            path: path.as_ref().into(),
            message: msg.into(),
        }
    }

    /// Create an unknown-output error
    #[must_use]
    pub fn unknown_output(node: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UnknownOutput {
            node: node.into(),
            name: name.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;

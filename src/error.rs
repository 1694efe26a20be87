//! Error types for documents, patches, links and loading.
//!
//! Schema mismatches are not errors: they are reported as
//! [`FailReason`](crate::FailReason) values by the matching engine.

use std::path::PathBuf;
use thiserror::Error;

/// Contract violations raised while applying a patch.
///
/// These abort the current `patch` call. The document is not rolled back,
/// so callers are expected to validate patches before submitting them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PatchError {
    #[error("cannot add {path}: key already present")]
    DuplicateKey { path: String },

    #[error("cannot {op} {path}: key not present")]
    MissingKey { op: &'static str, path: String },

    #[error("cannot {op} {path}: index {index} out of range (length {length})")]
    IndexOutOfRange {
        op: &'static str,
        path: String,
        index: usize,
        length: usize,
    },

    #[error("array index \"{segment}\" at {path} is not numeric")]
    NonNumericIndex { path: String, segment: String },

    #[error("cannot patch {path}: parent is not an object or array")]
    InvalidTarget { path: String },

    #[error("cannot move {from} into its own descendant {to}")]
    MoveIntoSelf { from: String, to: String },

    #[error("document is read-only")]
    ReadOnly,

    #[error("malformed patch operation: {message}")]
    MalformedOperation { message: String },
}

/// Contract violations raised by schema binding calls.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BindError {
    #[error("malformed monitor key \"{key}\": {message}")]
    MalformedMonitorKey { key: String, message: String },

    #[error("unknown node #{id}")]
    UnknownNode { id: u64 },
}

/// Errors produced when submitting data through a link.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinkError {
    #[error("unsupported encoding type: {enc_type}")]
    UnsupportedEncoding { enc_type: String },

    #[error("cannot encode {actual} as form data: expected an object")]
    NotFormEncodable { actual: String },
}

/// Malformed URI reference.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UriError {
    #[error("invalid port \"{port}\" in {uri}")]
    InvalidPort { uri: String, port: String },
}

/// Malformed URI template.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    #[error("unclosed expression starting at offset {offset}")]
    UnclosedExpression { offset: usize },

    #[error("invalid prefix modifier \"{modifier}\" in expression {{{expression}}}")]
    InvalidPrefix {
        expression: String,
        modifier: String,
    },

    #[error("empty variable name in expression {{{expression}}}")]
    EmptyVariable { expression: String },
}

/// Errors while loading JSON from files or URLs.
#[derive(Debug, Error)]
pub enum LoadError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("cannot fetch {url}: remote loading is disabled")]
    RemoteDisabled { url: String },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid patch: {source}")]
    InvalidPatch {
        #[source]
        source: serde_json::Error,
    },
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. }
            | LoadError::ReadError { .. }
            | LoadError::RemoteDisabled { .. } => 3,
            #[cfg(feature = "remote")]
            LoadError::NetworkError { .. } => 3,
            _ => 2,
        }
    }
}

impl PatchError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        2
    }
}

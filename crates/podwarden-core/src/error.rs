//! Error types for snapshot parsing, patterns and configuration.

use thiserror::Error;

/// Errors raised while decoding a portal `grep`/`poll` payload.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot payload is not a JSON object")]
    NotAnObject,

    #[error("pod key `{0}` does not end with ` #<index>`")]
    BadKey(String),

    #[error("record for pod `{0}` is not a JSON object")]
    BadRecord(String),
}

/// Errors raised while compiling a cluster glob.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("empty cluster pattern")]
    Empty,

    #[error("invalid cluster pattern `{pattern}`: {reason}")]
    Invalid { pattern: String, reason: String },
}

/// Errors raised while loading `podwarden.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
}

//! Error types for shapeprod

use thiserror::Error;

/// shapeprod error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(String),

    /// Unknown era/channel, missing binning, malformed binning or unknown process nick.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A cut or weight with this name already exists in its set.
    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    /// A cut or weight with this name does not exist in its set.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A derived process refers to a process that has not been constructed.
    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    /// A request reuses an existing key with different content.
    #[error("Conflicting request: {0}")]
    ConflictingRequest(String),

    /// The estimation backend failed to materialize an artifact.
    #[error("Production error: {0}")]
    Production(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

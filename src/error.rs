//! Error types for configuration, conversion, execution and caching.

use std::path::PathBuf;

/// Result type alias for process wrapper operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring, running or caching a process.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// The configuration document could not be parsed.
    #[error("configuration parse error: {reason}")]
    ConfigParse { reason: String },

    /// A parameter declares no delivery or collection mechanism.
    #[error("there must be a mechanism to handle the {direction} parameter '{id}'")]
    MissingMechanism { id: String, direction: String },

    /// Inconsistent configuration detected at first use.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A handler option name is not in the option registry.
    #[error("unknown {kind} handler '{name}'")]
    UnknownHandler { kind: String, name: String },

    /// Failed to validate an image reference.
    #[error("invalid image reference '{reference}': {reason}")]
    InvalidImageReference { reference: String, reason: String },

    /// Service settings could not be loaded.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    // =========================================================================
    // Request Errors
    // =========================================================================
    /// A required input has no value.
    #[error("missing value for required input '{id}'")]
    MissingInput { id: String },

    /// An input value was rejected by its binding or validator.
    #[error("invalid value for input '{id}': {reason}")]
    InvalidInput { id: String, reason: String },

    /// An output was requested that the configuration does not declare.
    #[error("unknown output '{id}'")]
    UnknownOutput { id: String },

    // =========================================================================
    // Conversion Errors
    // =========================================================================
    /// Content could not be converted to or from the declared binding.
    #[error("cannot convert {binding} data: {reason}")]
    Conversion { binding: String, reason: String },

    // =========================================================================
    // Execution Errors
    // =========================================================================
    /// The program exited with a non-zero exit value.
    #[error("exit value is not zero: {code}")]
    NonZeroExitValue { code: i32 },

    /// The program wrote to stderr.
    #[error("stderr is not empty: {stderr}")]
    StderrNotEmpty { stderr: String },

    /// The stderr handler found an error report.
    #[error("error reported on stderr: {message}")]
    StderrError { message: String },

    /// The process runner itself failed.
    #[error("{runner} runner failed: {reason}")]
    RunnerFailed { runner: String, reason: String },

    /// Operation timed out.
    #[error("operation '{operation}' timed out after {duration:?}")]
    Timeout {
        operation: String,
        duration: std::time::Duration,
    },

    /// The image id could not be resolved.
    #[error("failed to resolve image '{image}': {reason}")]
    ImageLookupFailed { image: String, reason: String },

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// No cached result exists under the key.
    #[error("no cached result for key {key}")]
    CacheMiss { key: String },

    /// Cache directory could not be initialized.
    #[error("failed to initialize cache at {path}: {reason}")]
    StorageInitFailed { path: PathBuf, reason: String },

    /// Write to the cache failed.
    #[error("cache write failed: {0}")]
    StorageWriteFailed(String),

    /// Read from the cache failed.
    #[error("cache read failed: {0}")]
    StorageReadFailed(String),

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Builds a parse error with a message naming the offending field.
    pub(crate) fn parse(reason: impl Into<String>) -> Self {
        Self::ConfigParse {
            reason: reason.into(),
        }
    }

    /// Builds a conversion error for the given binding.
    pub(crate) fn conversion(binding: impl ToString, reason: impl ToString) -> Self {
        Self::Conversion {
            binding: binding.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Returns true for errors caused by the configuration rather than the request.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigParse { .. }
                | Self::MissingMechanism { .. }
                | Self::Configuration(_)
                | Self::UnknownHandler { .. }
                | Self::InvalidImageReference { .. }
                | Self::InvalidSettings(_)
        )
    }
}

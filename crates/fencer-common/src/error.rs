//! Unified error types for the fencer workspace.
//!
//! Construction-fatal, per-call, and recovery-fatal failures are all
//! expressed through [`FencerError`]; best-effort skips during periodic
//! scans are logged at the call site and never surface as errors.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum FencerError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// The host does not support the requested operation.
    #[error("unsupported: {message}")]
    Unsupported {
        /// Description of the missing host capability.
        message: String,
    },

    /// A permission or capability error.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied operation.
        message: String,
    },

    /// `prepare` was called twice for the same container.
    #[error("container {id} has already been prepared")]
    AlreadyPrepared {
        /// Container that was prepared twice.
        id: String,
    },

    /// Two recovered records claimed the same container ID.
    #[error("duplicate container ID {id} during recovery")]
    DuplicateContainer {
        /// Colliding container ID.
        id: String,
    },

    /// No free project IDs are left in the configured range.
    #[error("failed to assign project ID, range exhausted")]
    ProjectIdsExhausted,

    /// A project-ID or project-quota operation failed.
    #[error("quota operation on {path} for project {project_id} failed: {source}")]
    Quota {
        /// Path the operation targeted.
        path: PathBuf,
        /// Project ID involved (0 when not yet known).
        project_id: u32,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// Isolator state could not be recovered from the host.
    #[error("recovery failed: {message}")]
    Recovery {
        /// Description of the recovery failure.
        message: String,
    },

    /// Text input could not be parsed.
    #[error("failed to parse '{input}': {message}")]
    Parse {
        /// Offending input.
        input: String,
        /// Description of the parse failure.
        message: String,
    },

    /// The actor behind a handle is no longer running.
    #[error("{name} actor has stopped")]
    ActorStopped {
        /// Name of the stopped actor.
        name: &'static str,
    },

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// YAML configuration could not be decoded.
    #[error("configuration decode error: {source}")]
    Yaml {
        /// Underlying YAML error.
        #[from]
        source: serde_yaml::Error,
    },
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, FencerError>;

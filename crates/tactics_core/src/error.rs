//! Error types for the placement core.
//!
//! Per-request placement outcomes live in [`crate::placement::PlacementFailure`];
//! this module covers everything that is not a user-correctable rejection:
//! data loading, persistence, and corrupted simulation state.

use thiserror::Error;

/// Result type alias using [`GameError`].
pub type Result<T> = std::result::Result<T, GameError>;

/// Top-level error type for the placement core.
#[derive(Debug, Error)]
pub enum GameError {
    /// Data file parsing error.
    #[error("Failed to parse data file '{path}': {message}")]
    DataParseError {
        /// Path (or label) of the data that failed to parse.
        path: String,
        /// Error message.
        message: String,
    },

    /// Catalog data is structurally invalid.
    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),

    /// Configuration is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid entity reference.
    #[error("Entity not found: {0}")]
    EntityNotFound(u64),

    /// The cell map and reverse index of the spatial grid disagree.
    ///
    /// Not recoverable locally; the peer must resync from the authority.
    #[error("Spatial index corrupted: {0}")]
    IndexCorrupted(String),

    /// Serialization or deserialization of simulation state failed.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Filesystem error while reading or writing replays.
    #[error("IO error on '{path}': {message}")]
    Io {
        /// File involved.
        path: String,
        /// Error message.
        message: String,
    },

    /// Invalid game state.
    #[error("Invalid game state: {0}")]
    InvalidState(String),

    /// Desync detected between peers or against a recorded replay.
    #[error("Desync detected at tick {tick}: local hash {local_hash}, remote hash {remote_hash}")]
    DesyncDetected {
        /// Tick where desync occurred.
        tick: u64,
        /// Local simulation hash.
        local_hash: u64,
        /// Remote simulation hash.
        remote_hash: u64,
    },
}

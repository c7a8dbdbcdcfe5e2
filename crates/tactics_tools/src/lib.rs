//! # Tactics Development Tools
//!
//! Command-line tools for development:
//! - Data validators for catalog and battlefield files
//! - Replay inspection and verification

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod replay;
pub mod validate;

use thiserror::Error;

/// Errors reported by the tools.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Error from the simulation core.
    #[error(transparent)]
    Core(#[from] tactics_core::error::GameError),

    /// Report could not be rendered as JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error.
    #[error("IO error at {path}: {message}")]
    Io {
        /// File or directory involved.
        path: String,
        /// Error message.
        message: String,
    },

    /// Data files were read but contain problems.
    #[error("{0} problem(s) found in data files")]
    ValidationFailed(usize),
}

/// Result type for tool operations.
pub type Result<T> = std::result::Result<T, ToolError>;

//! Error types for board snapshot operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for board operations.
pub type BoardResult<T> = Result<T, BoardError>;

/// Errors that can occur while loading or saving a board snapshot.
#[derive(Debug, Error)]
pub enum BoardError {
    /// The board file does not exist.
    #[error("Board file not found: {path}")]
    NotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// Failed to open or read the file.
    #[error("Failed to read board: {path}")]
    FileRead {
        /// Path to the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Failed to write the file.
    #[error("Failed to write board: {path}")]
    FileWrite {
        /// Path to the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The file is not a valid board snapshot.
    #[error("Corrupted board file: {path}")]
    Corrupted {
        /// Path to the file.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// Footprint lookup by reference failed.
    #[error("Footprint not found: {reference}")]
    FootprintNotFound {
        /// The missing reference.
        reference: String,
    },
}

impl BoardError {
    /// Creates a file read error.
    pub fn file_read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a file write error.
    pub fn file_write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::FileWrite {
            path: path.into(),
            source,
        }
    }

    /// Creates a corrupted file error.
    pub fn corrupted(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Corrupted {
            path: path.into(),
            source,
        }
    }

    /// Creates a footprint not found error.
    pub fn footprint_not_found(reference: impl Into<String>) -> Self {
        Self::FootprintNotFound {
            reference: reference.into(),
        }
    }
}

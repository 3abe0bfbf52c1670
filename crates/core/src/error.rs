//! Errors that abort an indexing run

use std::io;
use std::path::{Path, PathBuf};

/// Failure of an indexing run. No database version is produced.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Reading a directory entry, file attributes or file content failed
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The chunking engine called back out of order
    #[error("chunking engine protocol violation: {0}")]
    Protocol(String),
}

impl IndexError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;

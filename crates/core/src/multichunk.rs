//! MultiChunk containers and the local cache they are written to
//!
//! A multichunk batches the bytes of new chunks into one zstd-compressed
//! file. Which chunks it holds is recorded separately, as a
//! [`MultiChunkEntry`](crate::model::MultiChunkEntry) in the database version.

use std::io;
use std::path::{Path, PathBuf};

use crate::hash::MultiChunkId;

/// Default uncompressed size at which a multichunk is closed (512 KiB)
pub const DEFAULT_MULTICHUNK_SIZE: usize = 512 * 1024;

/// Local directory holding multichunk files
#[derive(Debug, Clone)]
pub struct Cache {
    dir: PathBuf,
}

impl Cache {
    /// Open or create the cache directory
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Where the container with `id` is stored
    #[must_use]
    pub fn multichunk_file(&self, id: &MultiChunkId) -> PathBuf {
        self.dir.join(format!("multichunk-{}", id.to_hex()))
    }
}

/// An open multichunk being filled by the chunking engine
#[derive(Debug)]
pub struct MultiChunk {
    id: MultiChunkId,
    path: PathBuf,
    data: Vec<u8>,
}

impl MultiChunk {
    #[must_use]
    pub fn new(id: MultiChunkId, path: PathBuf) -> Self {
        Self {
            id,
            path,
            data: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &MultiChunkId {
        &self.id
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once the buffered, uncompressed bytes reach `limit`
    #[must_use]
    pub fn is_full(&self, limit: usize) -> bool {
        self.data.len() >= limit
    }

    /// Append one chunk's bytes. Membership is recorded by the listener.
    pub fn write_chunk(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    /// Compress the buffered bytes and write the container file
    ///
    /// # Errors
    /// Returns an error if compression or the write fails.
    pub fn close(&self, compression_level: i32) -> io::Result<()> {
        let compressed = zstd::encode_all(self.data.as_slice(), compression_level)?;
        std::fs::write(&self.path, compressed)
    }
}

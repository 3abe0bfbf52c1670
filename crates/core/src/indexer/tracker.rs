//! Chunk dedup and multichunk membership for one run

use tracing::trace;

use crate::chunker::Chunk;
use crate::error::{IndexError, Result};
use crate::hash::MultiChunkId;
use crate::model::{ChunkEntry, DatabaseVersion, MultiChunkEntry};
use crate::store::HistoryStore;

/// Tracks the multichunk currently being filled by the engine
#[derive(Debug, Default)]
pub(crate) struct ChunkTracker {
    open: Option<MultiChunkEntry>,
}

impl ChunkTracker {
    /// Register `chunk` if neither committed history nor this run has seen it.
    ///
    /// Returns true if the chunk is new and must be written out.
    pub fn track<S: HistoryStore + ?Sized>(
        &self,
        store: &S,
        in_progress: &mut DatabaseVersion,
        chunk: &Chunk,
    ) -> bool {
        if store.chunk(&chunk.checksum).is_some() || in_progress.chunk(&chunk.checksum).is_some() {
            trace!("chunk exists: {}", chunk.checksum);
            return false;
        }

        trace!("chunk new: {}", chunk.checksum);
        in_progress.add_chunk(ChunkEntry {
            checksum: chunk.checksum,
            size: chunk.size,
        })
    }

    pub fn open(&mut self, id: MultiChunkId) -> Result<()> {
        if let Some(open) = &self.open {
            return Err(IndexError::protocol(format!(
                "multichunk {id} opened while {} is still open",
                open.id
            )));
        }

        trace!("+multichunk {id}");
        self.open = Some(MultiChunkEntry {
            id,
            chunks: Vec::new(),
        });
        Ok(())
    }

    pub fn write(&mut self, id: &MultiChunkId, chunk: &Chunk, in_progress: &DatabaseVersion) -> Result<()> {
        let open = self.expect_open(id)?;
        if in_progress.chunk(&chunk.checksum).is_none() {
            return Err(IndexError::protocol(format!(
                "chunk {} written to multichunk {id} but never reported as new",
                chunk.checksum
            )));
        }

        trace!("chunk {} > multichunk {id}", chunk.checksum);
        open.chunks.push(chunk.checksum);
        Ok(())
    }

    /// Finalize membership and register the multichunk in the run's version
    pub fn close(&mut self, id: &MultiChunkId, in_progress: &mut DatabaseVersion) -> Result<()> {
        self.expect_open(id)?;
        if let Some(entry) = self.open.take() {
            trace!("/multichunk {id} ({} chunks)", entry.chunks.len());
            in_progress.add_multichunk(entry);
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    fn expect_open(&mut self, id: &MultiChunkId) -> Result<&mut MultiChunkEntry> {
        match self.open.as_ref().map(|open| open.id) {
            Some(open) if open == *id => {}
            Some(open) => {
                return Err(IndexError::protocol(format!(
                    "multichunk {id} used while {open} is open"
                )));
            }
            None => {}
        }
        self.open
            .as_mut()
            .ok_or_else(|| IndexError::protocol(format!("multichunk {id} is not open")))
    }
}

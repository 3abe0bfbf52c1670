//! zindex-core: delta indexing engine
//!
//! Chunks files into deduplicated, content-addressed pieces, batches new
//! chunks into multichunks and tracks every file identity across renames,
//! changes and deletions as a series of immutable database versions.

pub mod chunker;
pub mod config;
pub mod error;
pub mod hash;
pub mod indexer;
pub mod model;
pub mod multichunk;
pub mod scan;
pub mod store;

pub use chunker::{Chunk, ChunkConfig, Deduper, DeduperListener};
pub use config::Config;
pub use error::{IndexError, Result};
pub use hash::{ContentHash, FileId, MultiChunkId};
pub use indexer::Indexer;
pub use model::{
    ChunkEntry, DatabaseVersion, FileContent, FileHistory, FileStatus, FileType, FileVersion,
    MultiChunkEntry,
};
pub use multichunk::{Cache, MultiChunk};
pub use scan::Scanner;
pub use store::{Database, HistoryStore};

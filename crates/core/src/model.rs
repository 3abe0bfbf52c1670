//! Database entities: chunks, multichunks, file contents, file histories
//!
//! Everything here is a plain value. A [`DatabaseVersion`] is the delta one
//! indexing run produces; committed history is the union of all of them.

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::hash::{ContentHash, FileId, MultiChunkId};

/// One content-addressed block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEntry {
    pub checksum: ContentHash,
    pub size: u32,
}

/// A physical container batching chunks, in write order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiChunkEntry {
    pub id: MultiChunkId,
    pub chunks: Vec<ContentHash>,
}

/// Whole-file content: the ordered chunks that reconstruct the file bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub checksum: ContentHash,
    pub size: u64,
    pub chunks: Vec<ContentHash>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    File,
    Folder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    New,
    Changed,
    Renamed,
    Deleted,
    /// Only metadata this model does not track changed
    Unknown,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "NEW",
            Self::Changed => "CHANGED",
            Self::Renamed => "RENAMED",
            Self::Deleted => "DELETED",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// One observed state of a file identity.
///
/// Never mutated after construction: the next state is a new record derived
/// from this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersion {
    /// Starts at 1, increases by exactly one per version of an identity
    pub version: u64,
    pub status: FileStatus,
    /// Parent directory relative to the indexed root, `/`-separated, empty for the root
    pub path: String,
    pub name: String,
    pub file_type: FileType,
    pub size: u64,
    /// `None` for folders
    pub checksum: Option<ContentHash>,
    pub last_modified: SystemTime,
    pub updated: SystemTime,
    /// Machine that observed this version
    pub created_by: String,
}

impl FileVersion {
    /// Path relative to the indexed root, `/`-separated
    #[must_use]
    pub fn full_name(&self) -> String {
        join_full_name(&self.path, &self.name)
    }

    /// Synthetic deletion: identical to `self` except status and version number
    #[must_use]
    pub fn deleted(&self) -> Self {
        Self {
            version: self.version + 1,
            status: FileStatus::Deleted,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.status == FileStatus::Deleted
    }
}

impl fmt::Display for FileVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{} {}", self.full_name(), self.version, self.status)?;
        if let Some(checksum) = &self.checksum {
            write!(f, " ({checksum})")?;
        }
        Ok(())
    }
}

pub(crate) fn join_full_name(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}/{name}")
    }
}

/// The lineage of one logical file across renames and edits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHistory {
    pub file_id: FileId,
    pub versions: Vec<FileVersion>,
}

impl FileHistory {
    #[must_use]
    pub fn new(file_id: FileId) -> Self {
        Self {
            file_id,
            versions: Vec::new(),
        }
    }

    /// The current version
    #[must_use]
    pub fn last_version(&self) -> Option<&FileVersion> {
        self.versions.last()
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.last_version().is_some_and(FileVersion::is_deleted)
    }
}

/// The delta produced by one indexing run.
///
/// A history in here carries only the versions added by that run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseVersion {
    chunks: BTreeMap<ContentHash, ChunkEntry>,
    multichunks: BTreeMap<MultiChunkId, MultiChunkEntry>,
    contents: BTreeMap<ContentHash, FileContent>,
    histories: BTreeMap<FileId, FileHistory>,
}

impl DatabaseVersion {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a chunk. Returns false if it was already registered.
    pub fn add_chunk(&mut self, chunk: ChunkEntry) -> bool {
        if self.chunks.contains_key(&chunk.checksum) {
            return false;
        }
        self.chunks.insert(chunk.checksum, chunk);
        true
    }

    #[must_use]
    pub fn chunk(&self, checksum: &ContentHash) -> Option<&ChunkEntry> {
        self.chunks.get(checksum)
    }

    pub fn chunks(&self) -> impl Iterator<Item = &ChunkEntry> {
        self.chunks.values()
    }

    pub fn add_multichunk(&mut self, multichunk: MultiChunkEntry) {
        self.multichunks.insert(multichunk.id, multichunk);
    }

    #[must_use]
    pub fn multichunk(&self, id: &MultiChunkId) -> Option<&MultiChunkEntry> {
        self.multichunks.get(id)
    }

    pub fn multichunks(&self) -> impl Iterator<Item = &MultiChunkEntry> {
        self.multichunks.values()
    }

    /// Register a file content. Returns false if one with that checksum was already registered.
    pub fn add_content(&mut self, content: FileContent) -> bool {
        if self.contents.contains_key(&content.checksum) {
            return false;
        }
        self.contents.insert(content.checksum, content);
        true
    }

    #[must_use]
    pub fn content(&self, checksum: &ContentHash) -> Option<&FileContent> {
        self.contents.get(checksum)
    }

    pub fn contents(&self) -> impl Iterator<Item = &FileContent> {
        self.contents.values()
    }

    /// Append a version to the run's partial history of `file_id`
    pub fn add_file_version(&mut self, file_id: FileId, version: FileVersion) {
        self.histories
            .entry(file_id)
            .or_insert_with(|| FileHistory::new(file_id))
            .versions
            .push(version);
    }

    #[must_use]
    pub fn file_history(&self, file_id: &FileId) -> Option<&FileHistory> {
        self.histories.get(file_id)
    }

    pub fn file_histories(&self) -> impl Iterator<Item = &FileHistory> {
        self.histories.values()
    }

    /// Number of file versions added across all histories
    #[must_use]
    pub fn version_count(&self) -> usize {
        self.histories.values().map(|h| h.versions.len()).sum()
    }

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn multichunk_count(&self) -> usize {
        self.multichunks.len()
    }

    #[must_use]
    pub fn content_count(&self) -> usize {
        self.contents.len()
    }

    /// True if the run found nothing to record
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
            && self.multichunks.is_empty()
            && self.contents.is_empty()
            && self.histories.is_empty()
    }
}

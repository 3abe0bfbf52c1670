//! History store: read queries over committed database versions
//!
//! [`HistoryStore`] is all the indexer ever sees of committed history.
//! [`Database`] is the local implementation: an in-memory merge of every
//! committed [`DatabaseVersion`], persisted as zstd-compressed JSON.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use color_eyre::Result;
use color_eyre::eyre::{bail, eyre};
use serde::{Deserialize, Serialize};

use crate::hash::{ContentHash, FileId, MultiChunkId};
use crate::model::{ChunkEntry, DatabaseVersion, FileContent, FileHistory, MultiChunkEntry};

/// Directory under the indexed root holding local state
pub const STATE_DIR: &str = ".zindex";

/// Commit log file name inside [`STATE_DIR`]
pub const DATABASE_FILE: &str = "database.json.zst";

/// Read-only view of all previously committed database versions.
///
/// Lookups by path and checksum consider each history's last version only.
pub trait HistoryStore {
    /// The history whose last version lives at `full_name`
    fn file_history_by_path(&self, full_name: &str) -> Option<&FileHistory>;

    /// Histories whose last version has content `checksum`, in ascending [`FileId`] order
    fn file_histories_by_checksum(&self, checksum: &ContentHash) -> Vec<&FileHistory>;

    fn chunk(&self, checksum: &ContentHash) -> Option<&ChunkEntry>;

    fn content(&self, checksum: &ContentHash) -> Option<&FileContent>;

    /// Every known history, in ascending [`FileId`] order
    fn file_histories(&self) -> Box<dyn Iterator<Item = &FileHistory> + '_>;
}

/// On-disk form: the ordered commit log
#[derive(Debug, Default, Serialize, Deserialize)]
struct CommitLog {
    versions: Vec<DatabaseVersion>,
}

/// Local database: every committed version merged into lookup indices
#[derive(Debug, Default)]
pub struct Database {
    log: CommitLog,
    histories: BTreeMap<FileId, FileHistory>,
    chunks: HashMap<ContentHash, ChunkEntry>,
    multichunks: HashMap<MultiChunkId, MultiChunkEntry>,
    contents: HashMap<ContentHash, FileContent>,
    /// full name -> history, live (not deleted) histories only
    by_path: HashMap<String, FileId>,
    /// checksum -> histories, live histories only
    by_checksum: HashMap<ContentHash, BTreeSet<FileId>>,
}

impl Database {
    /// Create an empty database
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the commit log for an indexed root
    #[must_use]
    pub fn path(root: &Path) -> PathBuf {
        root.join(STATE_DIR).join(DATABASE_FILE)
    }

    /// Load the database of an indexed root, or return an empty one if none exists
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read, decoded or replayed.
    pub fn load(root: &Path) -> Result<Self> {
        let path = Self::path(root);
        if !path.exists() {
            return Ok(Self::new());
        }

        let compressed = std::fs::read(&path)?;
        let json = zstd::decode_all(compressed.as_slice())?;
        let log: CommitLog = serde_json::from_slice(&json)?;

        let mut database = Self::new();
        for version in log.versions {
            database.commit(version)?;
        }
        Ok(database)
    }

    /// Persist the commit log under the indexed root.
    ///
    /// Writes to a temporary file first so a crash never leaves a torn log.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&self, root: &Path, compression_level: i32) -> Result<()> {
        let path = Self::path(root);
        let dir = path
            .parent()
            .ok_or_else(|| eyre!("database path has no parent: {}", path.display()))?;
        std::fs::create_dir_all(dir)?;

        let json = serde_json::to_vec(&self.log)?;
        let compressed = zstd::encode_all(json.as_slice(), compression_level)?;

        let tmp = path.with_extension("zst.tmp");
        std::fs::write(&tmp, &compressed)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Number of committed database versions
    #[must_use]
    pub fn version_count(&self) -> usize {
        self.log.versions.len()
    }

    /// Committed database versions, oldest first
    #[must_use]
    pub fn versions(&self) -> &[DatabaseVersion] {
        &self.log.versions
    }

    /// Look up a history by id
    #[must_use]
    pub fn file_history(&self, file_id: &FileId) -> Option<&FileHistory> {
        self.histories.get(file_id)
    }

    #[must_use]
    pub fn multichunk(&self, id: &MultiChunkId) -> Option<&MultiChunkEntry> {
        self.multichunks.get(id)
    }

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn content_count(&self) -> usize {
        self.contents.len()
    }

    /// Merge a finished database version into history.
    ///
    /// The version is checked in full before anything is merged, so a
    /// rejected version leaves the database untouched.
    ///
    /// # Errors
    /// Returns an error if a history would get a version number gap or
    /// an empty delta history.
    pub fn commit(&mut self, version: DatabaseVersion) -> Result<()> {
        self.validate(&version)?;

        for chunk in version.chunks() {
            self.chunks.entry(chunk.checksum).or_insert(*chunk);
        }
        for multichunk in version.multichunks() {
            self.multichunks
                .entry(multichunk.id)
                .or_insert_with(|| multichunk.clone());
        }
        for content in version.contents() {
            self.contents
                .entry(content.checksum)
                .or_insert_with(|| content.clone());
        }
        for delta in version.file_histories() {
            self.unindex(&delta.file_id);
            self.histories
                .entry(delta.file_id)
                .or_insert_with(|| FileHistory::new(delta.file_id))
                .versions
                .extend(delta.versions.iter().cloned());
            self.index(&delta.file_id);
        }

        self.log.versions.push(version);
        Ok(())
    }

    fn validate(&self, version: &DatabaseVersion) -> Result<()> {
        for delta in version.file_histories() {
            let mut expected = self
                .histories
                .get(&delta.file_id)
                .and_then(FileHistory::last_version)
                .map_or(1, |last| last.version + 1);

            if delta.versions.is_empty() {
                bail!("history {} has no versions in this delta", delta.file_id);
            }
            for file_version in &delta.versions {
                if file_version.version != expected {
                    bail!(
                        "history {}: expected version {expected}, got {}",
                        delta.file_id,
                        file_version.version
                    );
                }
                expected += 1;
            }
        }
        Ok(())
    }

    fn unindex(&mut self, file_id: &FileId) {
        let Some(last) = self.histories.get(file_id).and_then(FileHistory::last_version) else {
            return;
        };

        let full_name = last.full_name();
        if self.by_path.get(&full_name) == Some(file_id) {
            self.by_path.remove(&full_name);
        }
        if let Some(checksum) = last.checksum
            && let Some(ids) = self.by_checksum.get_mut(&checksum)
        {
            ids.remove(file_id);
            if ids.is_empty() {
                self.by_checksum.remove(&checksum);
            }
        }
    }

    fn index(&mut self, file_id: &FileId) {
        let Some(last) = self.histories.get(file_id).and_then(FileHistory::last_version) else {
            return;
        };
        if last.is_deleted() {
            return;
        }

        self.by_path.insert(last.full_name(), *file_id);
        if let Some(checksum) = last.checksum {
            self.by_checksum.entry(checksum).or_default().insert(*file_id);
        }
    }
}

impl HistoryStore for Database {
    fn file_history_by_path(&self, full_name: &str) -> Option<&FileHistory> {
        self.by_path
            .get(full_name)
            .and_then(|id| self.histories.get(id))
    }

    fn file_histories_by_checksum(&self, checksum: &ContentHash) -> Vec<&FileHistory> {
        self.by_checksum
            .get(checksum)
            .map(|ids| ids.iter().filter_map(|id| self.histories.get(id)).collect())
            .unwrap_or_default()
    }

    fn chunk(&self, checksum: &ContentHash) -> Option<&ChunkEntry> {
        self.chunks.get(checksum)
    }

    fn content(&self, checksum: &ContentHash) -> Option<&FileContent> {
        self.contents.get(checksum)
    }

    fn file_histories(&self) -> Box<dyn Iterator<Item = &FileHistory> + '_> {
        Box::new(self.histories.values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::file_version;

    fn version_with(file_id: FileId, full_name: &str, content: &[u8], number: u64) -> DatabaseVersion {
        let mut db_version = DatabaseVersion::new();
        db_version.add_file_version(file_id, file_version(full_name, content, number));
        db_version
    }

    #[test]
    fn test_lookup_by_path_and_checksum() {
        let mut db = Database::new();
        let id = FileId::from_u128(1);
        db.commit(version_with(id, "docs/a.txt", b"hello", 1)).unwrap();

        assert_eq!(db.file_history_by_path("docs/a.txt").unwrap().file_id, id);
        assert!(db.file_history_by_path("a.txt").is_none());

        let by_checksum = db.file_histories_by_checksum(&ContentHash::from_bytes(b"hello"));
        assert_eq!(by_checksum.len(), 1);
        assert_eq!(by_checksum[0].file_id, id);
    }

    #[test]
    fn test_rename_moves_path_index() {
        let mut db = Database::new();
        let id = FileId::from_u128(1);
        db.commit(version_with(id, "a.txt", b"hello", 1)).unwrap();
        db.commit(version_with(id, "c.txt", b"hello", 2)).unwrap();

        assert!(db.file_history_by_path("a.txt").is_none());
        assert_eq!(db.file_history_by_path("c.txt").unwrap().versions.len(), 2);
    }

    #[test]
    fn test_deleted_histories_leave_indices() {
        let mut db = Database::new();
        let id = FileId::from_u128(1);
        db.commit(version_with(id, "a.txt", b"hello", 1)).unwrap();

        let last = db.file_history(&id).unwrap().last_version().unwrap().deleted();
        let mut deletion = DatabaseVersion::new();
        deletion.add_file_version(id, last);
        db.commit(deletion).unwrap();

        assert!(db.file_history_by_path("a.txt").is_none());
        assert!(db.file_histories_by_checksum(&ContentHash::from_bytes(b"hello")).is_empty());
        // Still enumerated for the vanished-file sweep
        assert_eq!(db.file_histories().count(), 1);
    }

    #[test]
    fn test_checksum_lookup_is_ordered_by_id() {
        let mut db = Database::new();
        let high = FileId::from_u128(9);
        let low = FileId::from_u128(3);
        db.commit(version_with(high, "z.txt", b"same", 1)).unwrap();
        db.commit(version_with(low, "y.txt", b"same", 1)).unwrap();

        let ids: Vec<_> = db
            .file_histories_by_checksum(&ContentHash::from_bytes(b"same"))
            .iter()
            .map(|h| h.file_id)
            .collect();
        assert_eq!(ids, vec![low, high]);
    }

    #[test]
    fn test_commit_rejects_version_gap() {
        let mut db = Database::new();
        let id = FileId::from_u128(1);
        db.commit(version_with(id, "a.txt", b"hello", 1)).unwrap();

        let result = db.commit(version_with(id, "a.txt", b"changed", 3));
        assert!(result.is_err());
        assert_eq!(db.version_count(), 1);
    }

    #[test]
    fn test_commit_rejects_new_history_not_starting_at_one() {
        let mut db = Database::new();
        assert!(db.commit(version_with(FileId::from_u128(1), "a.txt", b"x", 2)).is_err());
    }

    #[test]
    fn test_chunks_deduplicated_across_commits() {
        let mut db = Database::new();
        let chunk = ChunkEntry {
            checksum: ContentHash::from_bytes(b"hello"),
            size: 5,
        };
        for _ in 0..2 {
            let mut db_version = DatabaseVersion::new();
            db_version.add_chunk(chunk);
            db.commit(db_version).unwrap();
        }
        assert_eq!(db.chunk_count(), 1);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let id = FileId::from_u128(5);

        let mut db = Database::new();
        db.commit(version_with(id, "a.txt", b"hello", 1)).unwrap();
        db.save(dir.path(), 3).unwrap();

        let loaded = Database::load(dir.path()).unwrap();
        assert_eq!(loaded.version_count(), 1);
        assert_eq!(loaded.file_history_by_path("a.txt").unwrap().file_id, id);
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::load(dir.path()).unwrap();
        assert_eq!(db.version_count(), 0);
        assert_eq!(db.file_histories().count(), 0);
    }
}

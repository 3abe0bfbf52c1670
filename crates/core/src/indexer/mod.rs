//! Delta indexer: turns a directory snapshot into one new database version
//!
//! The indexer drives the [`Deduper`] over the file list and listens to its
//! callbacks. New chunks are batched into multichunks, every observed path
//! is matched to a file identity, and a version is recorded for each one
//! that changed. Histories whose files vanished get a synthetic deletion at
//! the end. Committed history is only ever read. Everything new lives in
//! the returned [`DatabaseVersion`].

mod resolve;
mod sweep;
mod tracker;
mod version;

use std::collections::HashSet;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info, trace};

use crate::chunker::{Chunk, DeduperListener, Deduper};
use crate::config::{CONFIG_FILE, Config};
use crate::error::{IndexError, Result};
use crate::hash::{ContentHash, FileId, MultiChunkId};
use crate::model::{DatabaseVersion, FileContent, FileHistory, FileType};
use crate::multichunk::{Cache, MultiChunk};
use crate::store::HistoryStore;

use self::resolve::IdentityResolver;
use self::tracker::ChunkTracker;
use self::version::{FileProperties, next_version};

/// Indexes paths below `root` against a read-only history store
pub struct Indexer<'a, S: HistoryStore + ?Sized> {
    root: PathBuf,
    config: &'a Config,
    store: &'a S,
    cache: Cache,
}

impl<'a, S: HistoryStore + ?Sized> Indexer<'a, S> {
    /// Create an indexer for `root`
    ///
    /// # Errors
    /// Returns an error if the chunking sizes are out of range or the
    /// multichunk cache directory cannot be created.
    pub fn new(root: impl Into<PathBuf>, config: &'a Config, store: &'a S) -> Result<Self> {
        let root = root.into();
        config.chunking.validate().map_err(|e| {
            IndexError::io(
                &root.join(CONFIG_FILE),
                io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
            )
        })?;
        let cache_dir = config.cache_dir(&root);
        let cache = Cache::open(&cache_dir).map_err(|e| IndexError::io(&cache_dir, e))?;
        Ok(Self {
            root,
            config,
            store,
            cache,
        })
    }

    /// Index `files` (relative to the root, or absolute below it).
    ///
    /// Either the whole run succeeds and yields one database version, or it
    /// fails and yields nothing.
    ///
    /// # Errors
    /// Returns [`IndexError::Io`] if a path or file cannot be read and
    /// [`IndexError::Protocol`] if the chunking engine misbehaves.
    pub fn index(&self, files: &[PathBuf]) -> Result<DatabaseVersion> {
        let files = self.relative_paths(files)?;
        debug!("indexing {} paths below {}", files.len(), self.root.display());

        let deduper = Deduper::new(&self.root, self.config.chunking.clone())
            .multichunk_size(self.config.multichunk_size)
            .compression_level(self.config.compression_level);

        let mut listener = IndexerListener {
            root: &self.root,
            store: self.store,
            cache: &self.cache,
            machine_name: &self.config.machine_name,
            in_progress: DatabaseVersion::new(),
            tracker: ChunkTracker::default(),
            current: None,
        };
        deduper.deduplicate(&files, &mut listener)?;
        let mut in_progress = listener.into_database_version()?;

        debug!("looking for deleted files");
        let deleted = sweep::sweep_vanished(self.store, &self.root, &mut in_progress);

        info!(
            "indexed {} paths: {} new chunks, {} multichunks, {} contents, {} versions ({deleted} deleted)",
            files.len(),
            in_progress.chunk_count(),
            in_progress.multichunk_count(),
            in_progress.content_count(),
            in_progress.version_count(),
        );
        Ok(in_progress)
    }

    /// Normalize to root-relative paths, dropping duplicates but keeping order
    fn relative_paths(&self, files: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut seen = HashSet::new();
        let mut relative = Vec::with_capacity(files.len());

        for file in files {
            let path = if file.is_absolute() {
                file.strip_prefix(&self.root)
                    .map_err(|_| invalid_path(file, "not below the indexed root"))?
                    .to_path_buf()
            } else {
                file.clone()
            };

            let normal = path
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
            if !normal || path.file_name().is_none() {
                return Err(invalid_path(file, "not a plain relative path"));
            }
            if path.to_str().is_none() {
                return Err(IndexError::io(
                    file,
                    io::Error::new(io::ErrorKind::InvalidData, "path is not valid UTF-8"),
                ));
            }
            let path: PathBuf = path
                .components()
                .filter(|c| matches!(c, Component::Normal(_)))
                .collect();

            if seen.insert(path.clone()) {
                relative.push(path);
            }
        }
        Ok(relative)
    }
}

fn invalid_path(path: &Path, reason: &str) -> IndexError {
    IndexError::io(path, io::Error::new(io::ErrorKind::InvalidInput, reason.to_string()))
}

/// Split a relative path into its `/`-separated parent and its name.
///
/// `None` if any component is not valid UTF-8.
fn split_path(path: &Path) -> Option<(String, String)> {
    let name = path.file_name()?.to_str()?.to_string();
    let mut parent = Vec::new();
    for component in path.parent().into_iter().flat_map(Path::components) {
        if let Component::Normal(part) = component {
            parent.push(part.to_str()?);
        }
    }
    Some((parent.join("/"), name))
}

/// Content collected between file start and file end
struct PendingContent {
    /// Bytes actually chunked
    size: u64,
    chunks: Vec<ContentHash>,
}

struct CurrentFile {
    path: PathBuf,
    /// `None` unless the path was a regular file at file start
    content: Option<PendingContent>,
}

struct IndexerListener<'i, S: ?Sized> {
    root: &'i Path,
    store: &'i S,
    cache: &'i Cache,
    machine_name: &'i str,
    in_progress: DatabaseVersion,
    tracker: ChunkTracker,
    current: Option<CurrentFile>,
}

impl<S: HistoryStore + ?Sized> IndexerListener<'_, S> {
    fn into_database_version(self) -> Result<DatabaseVersion> {
        if let Some(current) = &self.current {
            return Err(IndexError::protocol(format!(
                "run finished while {} was still open",
                current.path.display()
            )));
        }
        if self.tracker.is_open() {
            return Err(IndexError::protocol("run finished with an open multichunk"));
        }
        Ok(self.in_progress)
    }

    fn expect_current(&mut self, path: &Path) -> Result<&mut CurrentFile> {
        match self.current.as_ref().map(|current| current.path.as_path()) {
            Some(open) if open == path => {}
            Some(open) => {
                return Err(IndexError::protocol(format!(
                    "callback for {} while {} is open",
                    path.display(),
                    open.display()
                )));
            }
            None => {
                return Err(IndexError::protocol(format!(
                    "callback for {} before its file start",
                    path.display()
                )));
            }
        }
        self.current
            .as_mut()
            .ok_or_else(|| IndexError::protocol(format!("{} is not open", path.display())))
    }

    /// Read attributes at the end of the capture. `None` if the path vanished.
    fn capture(&self, path: &Path, checksum: Option<&ContentHash>) -> Result<Option<FileProperties>> {
        let full_path = self.root.join(path);
        let metadata = match std::fs::metadata(&full_path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(IndexError::io(&full_path, e)),
        };
        let last_modified = metadata
            .modified()
            .map_err(|e| IndexError::io(&full_path, e))?;

        let (parent, name) = split_path(path).ok_or_else(|| {
            IndexError::io(
                &full_path,
                io::Error::new(io::ErrorKind::InvalidData, "path is not valid UTF-8"),
            )
        })?;
        let properties = if metadata.is_dir() {
            FileProperties {
                path: parent,
                name,
                file_type: FileType::Folder,
                size: 0,
                last_modified,
                checksum: None,
            }
        } else {
            FileProperties {
                path: parent,
                name,
                file_type: FileType::File,
                size: metadata.len(),
                last_modified,
                checksum: checksum.copied(),
            }
        };
        Ok(Some(properties))
    }

    fn add_file_version(&mut self, observed: &FileProperties, content: Option<PendingContent>) {
        let resolver = IdentityResolver::new(self.store, self.root);
        let previous_history = resolver.resolve(observed, &self.in_progress);
        let previous = previous_history.and_then(FileHistory::last_version);
        let file_id = previous_history.map_or_else(FileId::random, |h| h.file_id);

        let Some(version) = next_version(previous, observed, self.machine_name, SystemTime::now())
        else {
            debug!("{}: identical to previous version, not adding", observed.full_name());
            return;
        };

        match previous {
            Some(previous) => debug!("added {version} based on {previous}"),
            None => debug!("added {version}"),
        }
        self.in_progress.add_file_version(file_id, version);

        // Content is stored once globally; chunks were registered already
        if let (Some(checksum), Some(content)) = (observed.checksum, content) {
            if self.store.content(&checksum).is_some() || self.in_progress.content(&checksum).is_some() {
                trace!("content {checksum} exists");
                return;
            }
            self.in_progress.add_content(FileContent {
                checksum,
                size: content.size,
                chunks: content.chunks,
            });
        }
    }
}

impl<S: HistoryStore + ?Sized> DeduperListener for IndexerListener<'_, S> {
    fn on_file_start(&mut self, path: &Path) -> Result<()> {
        if let Some(current) = &self.current {
            return Err(IndexError::protocol(format!(
                "{} started while {} is open",
                path.display(),
                current.path.display()
            )));
        }
        trace!("+file {}", path.display());

        let full_path = self.root.join(path);
        let content = match std::fs::metadata(&full_path) {
            Ok(metadata) if metadata.is_file() => Some(PendingContent {
                size: 0,
                chunks: Vec::new(),
            }),
            Ok(_) => None,
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(IndexError::io(&full_path, e)),
        };

        self.current = Some(CurrentFile {
            path: path.to_path_buf(),
            content,
        });
        Ok(())
    }

    fn on_chunk(&mut self, chunk: &Chunk) -> Result<bool> {
        Ok(self.tracker.track(self.store, &mut self.in_progress, chunk))
    }

    fn on_file_add_chunk(&mut self, path: &Path, chunk: &Chunk) -> Result<()> {
        let current = self.expect_current(path)?;
        // Not a regular file at file start; the observation is dropped at file end
        let Some(content) = &mut current.content else {
            trace!(
                "chunk {} > {} (became a file during capture)",
                chunk.checksum,
                path.display()
            );
            return Ok(());
        };

        trace!("chunk {} > {}", chunk.checksum, path.display());
        content.size += u64::from(chunk.size);
        content.chunks.push(chunk.checksum);
        Ok(())
    }

    fn create_new_multichunk_id(&mut self, _first_chunk: &Chunk) -> MultiChunkId {
        MultiChunkId::random()
    }

    fn multichunk_file(&self, id: &MultiChunkId) -> PathBuf {
        self.cache.multichunk_file(id)
    }

    fn on_open_multichunk(&mut self, multichunk: &MultiChunk) -> Result<()> {
        self.tracker.open(*multichunk.id())
    }

    fn on_write_multichunk(&mut self, multichunk: &MultiChunk, chunk: &Chunk) -> Result<()> {
        self.tracker.write(multichunk.id(), chunk, &self.in_progress)
    }

    fn on_close_multichunk(&mut self, multichunk: &MultiChunk) -> Result<()> {
        self.tracker.close(multichunk.id(), &mut self.in_progress)
    }

    fn on_file_end(&mut self, path: &Path, checksum: Option<&ContentHash>) -> Result<()> {
        self.expect_current(path)?;
        let content = self.current.take().and_then(|current| current.content);

        let Some(observed) = self.capture(path, checksum)? else {
            debug!("{}: vanished during capture, not adding", path.display());
            return Ok(());
        };
        // A regular file now, but not one when its capture started
        if observed.file_type == FileType::File
            && (observed.checksum.is_none() || content.is_none())
        {
            debug!("{}: appeared during capture, not adding", path.display());
            return Ok(());
        }

        self.add_file_version(&observed, content);
        Ok(())
    }
}

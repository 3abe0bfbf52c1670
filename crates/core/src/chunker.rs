//! Chunking engine: content-defined chunking using FastCDC
//!
//! [`Deduper`] streams each file through FastCDC and reports what it finds
//! to a [`DeduperListener`]. Per run the callbacks arrive in this order:
//!
//! ```text
//! on_start
//!   on_file_start(path)
//!     on_chunk(chunk) -> is_new
//!       [is_new] create_new_multichunk_id, multichunk_file, on_open_multichunk   (if none open)
//!       [is_new] on_write_multichunk
//!       [is_new] on_close_multichunk                                             (if full)
//!     on_file_add_chunk(path, chunk)
//!   on_file_end(path, checksum)
//! on_close_multichunk                                                            (if one is open)
//! on_finish
//! ```

use std::io;
use std::path::{Path, PathBuf};

use color_eyre::eyre::bail;
use fastcdc::v2020::{
    AVERAGE_MAX, AVERAGE_MIN, MAXIMUM_MAX, MAXIMUM_MIN, MINIMUM_MAX, MINIMUM_MIN, Normalization,
    StreamCDC,
};
use tracing::trace;

use crate::error::{IndexError, Result};
use crate::hash::{ContentHash, MultiChunkId};
use crate::multichunk::{DEFAULT_MULTICHUNK_SIZE, MultiChunk};

/// Configuration for content-defined chunking
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct ChunkConfig {
    /// Minimum chunk size in bytes
    pub min_size: u32,
    /// Average (expected) chunk size in bytes
    pub avg_size: u32,
    /// Maximum chunk size in bytes
    pub max_size: u32,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            min_size: 512,
            avg_size: 4096,
            max_size: 32768,
        }
    }
}

impl ChunkConfig {
    /// Check the sizes against the bounds FastCDC accepts.
    ///
    /// # Errors
    /// Returns an error naming the first size out of range, or if the sizes
    /// are not ordered `min_size <= avg_size <= max_size`.
    pub fn validate(&self) -> color_eyre::Result<()> {
        let bounds = [
            ("min_size", self.min_size, MINIMUM_MIN, MINIMUM_MAX),
            ("avg_size", self.avg_size, AVERAGE_MIN, AVERAGE_MAX),
            ("max_size", self.max_size, MAXIMUM_MIN, MAXIMUM_MAX),
        ];
        for (name, value, lower, upper) in bounds {
            if !(lower..=upper).contains(&value) {
                bail!("chunking.{name} = {value} is outside {lower}..={upper}");
            }
        }
        if self.min_size > self.avg_size || self.avg_size > self.max_size {
            bail!(
                "chunking sizes must satisfy min_size <= avg_size <= max_size, got {} / {} / {}",
                self.min_size,
                self.avg_size,
                self.max_size
            );
        }
        Ok(())
    }
}

/// A content-defined chunk as produced by the engine
#[derive(Debug, Clone)]
pub struct Chunk {
    /// BLAKE3 hash of the chunk content
    pub checksum: ContentHash,
    /// Length of this chunk in bytes
    pub size: u32,
    pub data: Vec<u8>,
}

impl Chunk {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            checksum: ContentHash::from_bytes(&data),
            size: data.len() as u32,
            data,
        }
    }
}

/// Receiver of the chunking engine's callbacks.
///
/// Every callback may fail; an error aborts the whole run.
pub trait DeduperListener {
    fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_file_start(&mut self, path: &Path) -> Result<()>;

    /// Returns true if the chunk is new and must be written to a multichunk
    fn on_chunk(&mut self, chunk: &Chunk) -> Result<bool>;

    fn on_file_add_chunk(&mut self, path: &Path, chunk: &Chunk) -> Result<()>;

    /// Random id for a multichunk about to be opened for `first_chunk`
    fn create_new_multichunk_id(&mut self, first_chunk: &Chunk) -> MultiChunkId;

    /// Physical location of the container with `id`
    fn multichunk_file(&self, id: &MultiChunkId) -> PathBuf;

    fn on_open_multichunk(&mut self, multichunk: &MultiChunk) -> Result<()>;

    fn on_write_multichunk(&mut self, multichunk: &MultiChunk, chunk: &Chunk) -> Result<()>;

    fn on_close_multichunk(&mut self, multichunk: &MultiChunk) -> Result<()>;

    /// `checksum` is `None` for folders and for paths that could not be opened
    fn on_file_end(&mut self, path: &Path, checksum: Option<&ContentHash>) -> Result<()>;

    fn on_finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Splits files into chunks and batches new chunks into multichunks
#[derive(Debug, Clone)]
pub struct Deduper {
    root: PathBuf,
    chunking: ChunkConfig,
    multichunk_size: usize,
    compression_level: i32,
}

impl Deduper {
    /// Create an engine reading paths relative to `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, chunking: ChunkConfig) -> Self {
        Self {
            root: root.into(),
            chunking,
            multichunk_size: DEFAULT_MULTICHUNK_SIZE,
            compression_level: 3,
        }
    }

    /// Close multichunks once they hold this many uncompressed bytes
    #[must_use]
    pub fn multichunk_size(mut self, size: usize) -> Self {
        self.multichunk_size = size;
        self
    }

    /// zstd level for multichunk containers
    #[must_use]
    pub fn compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    /// Run the callback protocol over `files` (relative to the root)
    ///
    /// # Errors
    /// Returns an error if a file cannot be read or a multichunk cannot be
    /// written, or if the listener rejects a callback.
    pub fn deduplicate<L>(&self, files: &[PathBuf], listener: &mut L) -> Result<()>
    where
        L: DeduperListener + ?Sized,
    {
        listener.on_start()?;

        let mut open = None;
        for path in files {
            listener.on_file_start(path)?;
            let checksum = self.chunk_file(path, listener, &mut open)?;
            listener.on_file_end(path, checksum.as_ref())?;
        }

        if let Some(multichunk) = open.take() {
            self.close_multichunk(&multichunk, listener)?;
        }

        listener.on_finish()
    }

    /// Chunk one file, returning its whole-file checksum
    fn chunk_file<L>(
        &self,
        path: &Path,
        listener: &mut L,
        open: &mut Option<MultiChunk>,
    ) -> Result<Option<ContentHash>>
    where
        L: DeduperListener + ?Sized,
    {
        let full_path = self.root.join(path);

        let file = match std::fs::metadata(&full_path) {
            Ok(metadata) if metadata.is_dir() => return Ok(None),
            Ok(_) => std::fs::File::open(&full_path),
            Err(e) => Err(e),
        };
        let file = match file {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!("{} vanished before chunking", path.display());
                return Ok(None);
            }
            Err(e) => return Err(IndexError::io(&full_path, e)),
        };

        let mut hasher = blake3::Hasher::new();
        let chunker = StreamCDC::with_level(
            file,
            self.chunking.min_size,
            self.chunking.avg_size,
            self.chunking.max_size,
            Normalization::Level1,
        );

        for entry in chunker {
            let entry =
                entry.map_err(|e| IndexError::io(&full_path, io::Error::other(e.to_string())))?;
            hasher.update(&entry.data);
            let chunk = Chunk::new(entry.data);

            if listener.on_chunk(&chunk)? {
                self.write_new_chunk(&chunk, listener, open)?;
            }
            listener.on_file_add_chunk(path, &chunk)?;
        }

        Ok(Some(ContentHash::from(hasher.finalize())))
    }

    fn write_new_chunk<L>(
        &self,
        chunk: &Chunk,
        listener: &mut L,
        open: &mut Option<MultiChunk>,
    ) -> Result<()>
    where
        L: DeduperListener + ?Sized,
    {
        let mut multichunk = match open.take() {
            Some(multichunk) => multichunk,
            None => {
                let id = listener.create_new_multichunk_id(chunk);
                let multichunk = MultiChunk::new(id, listener.multichunk_file(&id));
                listener.on_open_multichunk(&multichunk)?;
                multichunk
            }
        };

        multichunk.write_chunk(&chunk.data);
        listener.on_write_multichunk(&multichunk, chunk)?;

        if multichunk.is_full(self.multichunk_size) {
            self.close_multichunk(&multichunk, listener)?;
        } else {
            *open = Some(multichunk);
        }
        Ok(())
    }

    fn close_multichunk<L>(&self, multichunk: &MultiChunk, listener: &mut L) -> Result<()>
    where
        L: DeduperListener + ?Sized,
    {
        multichunk
            .close(self.compression_level)
            .map_err(|e| IndexError::io(multichunk.path(), e))?;
        listener.on_close_multichunk(multichunk)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_chunk_config_bounds() {
        assert!(ChunkConfig::default().validate().is_ok());

        let too_small = ChunkConfig {
            min_size: 16,
            ..ChunkConfig::default()
        };
        let err = too_small.validate().unwrap_err().to_string();
        assert!(err.contains("min_size"), "{err}");

        let unordered = ChunkConfig {
            min_size: 8192,
            avg_size: 4096,
            max_size: 32768,
        };
        assert!(unordered.validate().is_err());

        let too_large = ChunkConfig {
            max_size: 32 * 1024 * 1024,
            ..ChunkConfig::default()
        };
        assert!(too_large.validate().is_err());
    }

    /// Records the callback sequence; treats a chunk as new the first time it is seen
    #[derive(Default)]
    struct Recorder {
        dir: PathBuf,
        events: Vec<String>,
        seen: HashSet<ContentHash>,
        file_chunks: Vec<ContentHash>,
        file_checksums: Vec<(PathBuf, Option<ContentHash>)>,
    }

    impl DeduperListener for Recorder {
        fn on_start(&mut self) -> Result<()> {
            self.events.push("start".into());
            Ok(())
        }

        fn on_file_start(&mut self, path: &Path) -> Result<()> {
            self.events.push(format!("file_start {}", path.display()));
            Ok(())
        }

        fn on_chunk(&mut self, chunk: &Chunk) -> Result<bool> {
            self.events.push("chunk".into());
            Ok(self.seen.insert(chunk.checksum))
        }

        fn on_file_add_chunk(&mut self, _path: &Path, chunk: &Chunk) -> Result<()> {
            self.events.push("add_chunk".into());
            self.file_chunks.push(chunk.checksum);
            Ok(())
        }

        fn create_new_multichunk_id(&mut self, _first_chunk: &Chunk) -> MultiChunkId {
            MultiChunkId::random()
        }

        fn multichunk_file(&self, id: &MultiChunkId) -> PathBuf {
            self.dir.join(id.to_hex())
        }

        fn on_open_multichunk(&mut self, _multichunk: &MultiChunk) -> Result<()> {
            self.events.push("open".into());
            Ok(())
        }

        fn on_write_multichunk(&mut self, _multichunk: &MultiChunk, _chunk: &Chunk) -> Result<()> {
            self.events.push("write".into());
            Ok(())
        }

        fn on_close_multichunk(&mut self, multichunk: &MultiChunk) -> Result<()> {
            assert!(multichunk.path().exists(), "container written before close callback");
            self.events.push("close".into());
            Ok(())
        }

        fn on_file_end(&mut self, path: &Path, checksum: Option<&ContentHash>) -> Result<()> {
            self.events.push(format!("file_end {}", path.display()));
            self.file_checksums.push((path.to_path_buf(), checksum.copied()));
            Ok(())
        }

        fn on_finish(&mut self) -> Result<()> {
            self.events.push("finish".into());
            Ok(())
        }
    }

    fn setup() -> (TempDir, Recorder) {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join(".cache");
        fs::create_dir(&cache).unwrap();
        let recorder = Recorder {
            dir: cache,
            ..Recorder::default()
        };
        (dir, recorder)
    }

    #[test]
    fn test_callback_order_for_small_file() {
        let (dir, mut recorder) = setup();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();

        let deduper = Deduper::new(dir.path(), ChunkConfig::default());
        deduper
            .deduplicate(&[PathBuf::from("a.txt")], &mut recorder)
            .unwrap();

        assert_eq!(
            recorder.events,
            vec![
                "start",
                "file_start a.txt",
                "chunk",
                "open",
                "write",
                "add_chunk",
                "file_end a.txt",
                "close",
                "finish",
            ]
        );
        assert_eq!(
            recorder.file_checksums,
            vec![(PathBuf::from("a.txt"), Some(ContentHash::from_bytes(b"hello")))]
        );
    }

    #[test]
    fn test_known_chunks_are_not_written() {
        let (dir, mut recorder) = setup();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();
        fs::write(dir.path().join("b.txt"), "hello").unwrap();

        let deduper = Deduper::new(dir.path(), ChunkConfig::default());
        deduper
            .deduplicate(&[PathBuf::from("a.txt"), PathBuf::from("b.txt")], &mut recorder)
            .unwrap();

        let writes = recorder.events.iter().filter(|e| *e == "write").count();
        let adds = recorder.events.iter().filter(|e| *e == "add_chunk").count();
        assert_eq!(writes, 1);
        assert_eq!(adds, 2);
    }

    #[test]
    fn test_folder_and_missing_path_have_no_checksum() {
        let (dir, mut recorder) = setup();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let deduper = Deduper::new(dir.path(), ChunkConfig::default());
        deduper
            .deduplicate(&[PathBuf::from("sub"), PathBuf::from("gone.txt")], &mut recorder)
            .unwrap();

        assert_eq!(
            recorder.file_checksums,
            vec![(PathBuf::from("sub"), None), (PathBuf::from("gone.txt"), None)]
        );
        assert!(!recorder.events.iter().any(|e| e == "chunk"));
    }

    #[test]
    fn test_empty_file_has_checksum_and_no_chunks() {
        let (dir, mut recorder) = setup();
        fs::write(dir.path().join("empty"), "").unwrap();

        let deduper = Deduper::new(dir.path(), ChunkConfig::default());
        deduper
            .deduplicate(&[PathBuf::from("empty")], &mut recorder)
            .unwrap();

        assert_eq!(
            recorder.file_checksums,
            vec![(PathBuf::from("empty"), Some(ContentHash::from_bytes(b"")))]
        );
        assert!(recorder.file_chunks.is_empty());
    }

    #[test]
    fn test_chunks_cover_entire_file() {
        let (dir, mut recorder) = setup();
        let mut data = Vec::with_capacity(200_000);
        for i in 0..10_000 {
            data.extend_from_slice(format!("fn func_{i}() {{ let x = {i}; }}\n").as_bytes());
        }
        fs::write(dir.path().join("big.rs"), &data).unwrap();

        let deduper = Deduper::new(dir.path(), ChunkConfig::default()).multichunk_size(64 * 1024);
        deduper
            .deduplicate(&[PathBuf::from("big.rs")], &mut recorder)
            .unwrap();

        assert!(recorder.file_chunks.len() > 1);
        assert_eq!(
            recorder.file_checksums[0].1,
            Some(ContentHash::from_bytes(&data))
        );

        // Small container limit forces several open/close pairs
        let opens = recorder.events.iter().filter(|e| *e == "open").count();
        let closes = recorder.events.iter().filter(|e| *e == "close").count();
        assert!(opens > 1);
        assert_eq!(opens, closes);
    }

    #[test]
    fn test_listener_error_aborts_run() {
        struct Rejecting;

        impl DeduperListener for Rejecting {
            fn on_file_start(&mut self, _path: &Path) -> Result<()> {
                Err(IndexError::protocol("rejected"))
            }
            fn on_chunk(&mut self, _chunk: &Chunk) -> Result<bool> {
                unreachable!()
            }
            fn on_file_add_chunk(&mut self, _path: &Path, _chunk: &Chunk) -> Result<()> {
                unreachable!()
            }
            fn create_new_multichunk_id(&mut self, _first_chunk: &Chunk) -> MultiChunkId {
                unreachable!()
            }
            fn multichunk_file(&self, _id: &MultiChunkId) -> PathBuf {
                unreachable!()
            }
            fn on_open_multichunk(&mut self, _multichunk: &MultiChunk) -> Result<()> {
                unreachable!()
            }
            fn on_write_multichunk(&mut self, _multichunk: &MultiChunk, _chunk: &Chunk) -> Result<()> {
                unreachable!()
            }
            fn on_close_multichunk(&mut self, _multichunk: &MultiChunk) -> Result<()> {
                unreachable!()
            }
            fn on_file_end(&mut self, _path: &Path, _checksum: Option<&ContentHash>) -> Result<()> {
                unreachable!()
            }
        }

        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let deduper = Deduper::new(dir.path(), ChunkConfig::default());
        let result = deduper.deduplicate(&[PathBuf::from("a.txt")], &mut Rejecting);
        assert!(matches!(result, Err(IndexError::Protocol(_))));
    }
}

//! zindex configuration file parsing (.zindex.toml)

use std::path::{Path, PathBuf};

use color_eyre::eyre::WrapErr as _;

use crate::chunker::ChunkConfig;
use crate::multichunk::DEFAULT_MULTICHUNK_SIZE;
use crate::store::STATE_DIR;

/// Config file name
pub const CONFIG_FILE: &str = ".zindex.toml";

/// zindex project configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    /// Recorded as the author of every file version this machine observes
    pub machine_name: String,

    /// Files to include even if gitignored
    pub include: Vec<String>,

    /// Extra ignore globs applied on top of .gitignore
    pub ignore: Vec<String>,

    /// Content-defined chunking parameters
    pub chunking: ChunkConfig,

    /// Uncompressed bytes after which a multichunk is closed
    pub multichunk_size: usize,

    /// zstd level for multichunks and the database file
    pub compression_level: i32,

    /// Multichunk cache, relative to the indexed root unless absolute
    pub cache_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            machine_name: default_machine_name(),
            include: Vec::new(),
            ignore: Vec::new(),
            chunking: ChunkConfig::default(),
            multichunk_size: DEFAULT_MULTICHUNK_SIZE,
            compression_level: 3,
            cache_dir: Path::new(STATE_DIR).join("cache"),
        }
    }
}

fn default_machine_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}

impl Config {
    /// Load config from project root.
    ///
    /// Returns default config if .zindex.toml doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be parsed, or if its
    /// chunking sizes are out of range.
    pub fn load(root: &Path) -> color_eyre::Result<Self> {
        let config_path = root.join(CONFIG_FILE);
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Self = toml::from_str(&content)?;
            config
                .chunking
                .validate()
                .wrap_err_with(|| format!("invalid {}", config_path.display()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Absolute cache directory for an indexed root
    #[must_use]
    pub fn cache_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.cache_dir)
    }
}

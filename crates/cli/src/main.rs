//! zindex: content-addressed delta indexing for a directory tree
//!
//! Each `zindex index` run compares the tree against every previously
//! committed database version and records only what changed:
//! - Native .gitignore support
//! - Content-defined chunking with BLAKE3 checksums
//! - Chunk and content deduplication across files and runs
//! - Rename and move detection by content

mod debug_log;
mod progress;

use std::path::{Path, PathBuf};

use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand, builder::Styles};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr as _, bail};
use tracing::{debug, info};

use zindex_core::{Config, Database, DatabaseVersion, FileStatus, Indexer, Scanner};

use crate::progress::IndexProgress;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::Red.on_default());

#[derive(Parser)]
#[command(name = "zindex")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "Content-addressed delta indexing with native .gitignore support")]
#[command(long_about = r#"
zindex records a directory tree as a series of database versions.

Features:
  • Native .gitignore - respects your existing ignore files
  • Deduplication    - identical chunks and files are stored once
  • File identity    - renames and moves keep their history
  • Fast             - BLAKE3 hashing, zstd compression

Examples:
  zindex index ./project             Index changes and commit them
  zindex index ./project --dry-run   Show what would be recorded
  zindex log ./project               Show committed database versions
  zindex scan ./project              List the paths that would be indexed
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a directory and commit the new database version
    Index {
        /// Directory to index
        path: PathBuf,

        /// Compute the new version without committing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the committed database versions of a directory
    Log {
        /// Indexed directory
        path: PathBuf,

        /// Output format (json, summary)
        #[arg(short, long, default_value = "summary")]
        format: String,
    },

    /// Scan a directory and list the paths that would be indexed
    Scan {
        /// Directory to scan
        path: PathBuf,
    },

    /// Show version and build info
    Version,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let session = debug_log::init(cli.verbose);
    debug!("debug log at {}", session.log_path.display());

    match cli.command {
        Commands::Version => {
            eprintln!("zindex {}", env!("CARGO_PKG_VERSION"));
            eprintln!("Built with Rust {}", env!("CARGO_PKG_RUST_VERSION"));
        }
        Commands::Index { path, dry_run } => {
            index_command(&path, dry_run)?;
        }
        Commands::Log { path, format } => {
            log_command(&path, &format)?;
        }
        Commands::Scan { path } => {
            scan_command(&path)?;
        }
    }

    Ok(())
}

fn canonical_root(path: &Path) -> Result<PathBuf> {
    let root = path
        .canonicalize()
        .wrap_err_with(|| format!("cannot open {}", path.display()))?;
    if !root.is_dir() {
        bail!("{} is not a directory", root.display());
    }
    Ok(root)
}

/// Scanner with the config's ignore and include patterns applied
fn configured_scanner(root: &Path, config: &Config) -> Scanner {
    let scanner = config
        .ignore
        .iter()
        .fold(Scanner::new(root), |scanner, pattern| scanner.ignore(pattern.as_str()));
    config
        .include
        .iter()
        .fold(scanner, |scanner, pattern| scanner.include(pattern.as_str()))
}

/// Every file version of a database version, ordered by path
fn changes(db_version: &DatabaseVersion) -> Vec<(String, FileStatus)> {
    let mut changes: Vec<_> = db_version
        .file_histories()
        .flat_map(|history| history.versions.iter())
        .map(|version| (version.full_name(), version.status))
        .collect();
    changes.sort_by(|a, b| a.0.cmp(&b.0));
    changes
}

fn index_command(path: &Path, dry_run: bool) -> Result<()> {
    let root = canonical_root(path)?;
    let config = Config::load(&root)?;
    let mut database = Database::load(&root)?;
    info!(
        "Indexing {} as {} ({} committed versions)",
        root.display(),
        config.machine_name,
        database.version_count()
    );

    let progress = IndexProgress::new();
    let paths = configured_scanner(&root, &config).scan_paths()?;
    progress.scanned(paths.len(), &root);

    let total_bytes: u64 = paths
        .iter()
        .filter_map(|p| std::fs::metadata(root.join(p)).ok())
        .filter(std::fs::Metadata::is_file)
        .map(|m| m.len())
        .sum();

    let db_version = {
        let indexer = Indexer::new(&root, &config, &database)?;
        let spinner = progress.index_spinner(total_bytes);
        let result = indexer.index(&paths);
        spinner.finish_and_clear();
        result?
    };

    if db_version.is_empty() {
        progress.unchanged();
        return Ok(());
    }

    for (full_name, status) in changes(&db_version) {
        progress.file_version(status, &full_name);
    }
    let chunk_bytes: u64 = db_version.chunks().map(|c| u64::from(c.size)).sum();
    progress.finish(
        db_version.version_count(),
        db_version.chunk_count(),
        chunk_bytes,
    );

    if dry_run {
        progress.dry_run();
        return Ok(());
    }

    database.commit(db_version)?;
    database.save(&root, config.compression_level)?;
    progress.committed(database.version_count());
    Ok(())
}

fn log_command(path: &Path, format: &str) -> Result<()> {
    let root = canonical_root(path)?;
    let database = Database::load(&root)?;

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(database.versions())?;
            println!("{json}");
        }
        "summary" => {
            if database.versions().is_empty() {
                eprintln!("No database versions in {}", root.display());
            }
            for (i, db_version) in database.versions().iter().enumerate() {
                println!(
                    "database version {}: {} versions, {} chunks, {} multichunks, {} contents",
                    i + 1,
                    db_version.version_count(),
                    db_version.chunk_count(),
                    db_version.multichunk_count(),
                    db_version.content_count(),
                );
                for history in db_version.file_histories() {
                    for version in &history.versions {
                        println!("  {} {version}", history.file_id);
                    }
                }
            }
        }
        other => bail!("unknown format {other:?}, expected json or summary"),
    }

    Ok(())
}

fn scan_command(path: &Path) -> Result<()> {
    let root = canonical_root(path)?;
    let config = Config::load(&root)?;
    info!("Scanning {}...", root.display());

    let paths = configured_scanner(&root, &config).scan_paths()?;

    let mut files = 0usize;
    let mut total_size = 0u64;
    for path in &paths {
        let metadata = std::fs::symlink_metadata(root.join(path))?;
        if metadata.is_file() {
            files += 1;
            total_size += metadata.len();
        }
        println!("{}", path.display());
    }

    eprintln!(
        "{} paths ({files} files, {})",
        paths.len(),
        humansize::format_size(total_size, humansize::BINARY)
    );
    Ok(())
}

//! Cargo-style progress output for zindex
//!
//! Displays progress in the familiar cargo format, with a spinner while the
//! indexer runs:
//! ```text
//!    Scanning 952 paths in ./project
//! ⠋    Indexing 3.21 MiB...
//!         New src/lib.rs
//!     Renamed docs/guide.md
//!     Indexed 14 versions, 231 new chunks (3.21 MiB) in 1.40s
//! ```

use std::io::{self, Write as _};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_subscriber::fmt::MakeWriter;
use zindex_core::FileStatus;

/// Shared draw target so log lines never tear through a progress bar
static MULTI: LazyLock<MultiProgress> = LazyLock::new(MultiProgress::new);

/// Status verbs for cargo-style output (right-aligned to 12 chars)
struct Status;

impl Status {
    const SCANNING: &str = "Scanning";
    const INDEXING: &str = "Indexing";
    const INDEXED: &str = "Indexed";
    const UNCHANGED: &str = "Unchanged";
    const COMMITTED: &str = "Committed";
    const DRY_RUN: &str = "Dry run";
}

/// Print a cargo-style status line
fn print_status(status: &str, style: &console::Style, message: &str) {
    let line = format!("{:>12} {message}", style.apply_to(status));
    MULTI.suspend(|| {
        let _ = writeln!(console::Term::stderr(), "{line}");
    });
}

fn green() -> console::Style {
    console::Style::new().green().bold()
}

fn format_elapsed(elapsed: Duration) -> String {
    if elapsed.as_secs() >= 1 {
        format!("{:.2}s", elapsed.as_secs_f64())
    } else {
        format!("{}ms", elapsed.as_millis())
    }
}

/// Style for one file version line, by status
fn status_style(status: FileStatus) -> console::Style {
    match status {
        FileStatus::New => console::Style::new().green().bold(),
        FileStatus::Changed => console::Style::new().yellow().bold(),
        FileStatus::Renamed => console::Style::new().cyan().bold(),
        FileStatus::Deleted => console::Style::new().red().bold(),
        FileStatus::Unknown => console::Style::new().dim().bold(),
    }
}

/// Capitalized verb for a status ("New", "Renamed", ...)
fn status_verb(status: FileStatus) -> &'static str {
    match status {
        FileStatus::New => "New",
        FileStatus::Changed => "Changed",
        FileStatus::Renamed => "Renamed",
        FileStatus::Deleted => "Deleted",
        FileStatus::Unknown => "Touched",
    }
}

/// Progress tracker for one indexing run
pub struct IndexProgress {
    start: Instant,
}

impl IndexProgress {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Show the "Scanning N paths in <dir>" line
    pub fn scanned(&self, paths: usize, root: &std::path::Path) {
        print_status(
            Status::SCANNING,
            &green(),
            &format!("{paths} paths in {}", root.display()),
        );
    }

    /// Spinner shown while the indexer runs (chunking gives no per-file hook here)
    pub fn index_spinner(&self, total_bytes: u64) -> ProgressBar {
        let pb = MULTI.add(ProgressBar::new_spinner());
        let size_str = humansize::format_size(total_bytes, humansize::BINARY);
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg:>12} {prefix}") {
            pb.set_style(style);
        }
        pb.set_message(Status::INDEXING);
        pb.set_prefix(format!("{size_str}..."));
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    /// One line per file version in the new database version
    pub fn file_version(&self, status: FileStatus, full_name: &str) {
        print_status(status_verb(status), &status_style(status), full_name);
    }

    /// Nothing changed since the last committed version
    pub fn unchanged(&self) {
        print_status(
            Status::UNCHANGED,
            &console::Style::new().dim().bold(),
            &format!("nothing to index ({})", format_elapsed(self.start.elapsed())),
        );
    }

    /// Show the final summary line
    pub fn finish(&self, versions: usize, chunks: usize, chunk_bytes: u64) {
        let size_str = humansize::format_size(chunk_bytes, humansize::BINARY);
        print_status(
            Status::INDEXED,
            &green(),
            &format!(
                "{versions} versions, {chunks} new chunks ({size_str}) in {}",
                format_elapsed(self.start.elapsed())
            ),
        );
    }

    /// The new version was merged into the local database
    pub fn committed(&self, number: usize) {
        print_status(Status::COMMITTED, &green(), &format!("database version {number}"));
    }

    /// The new version was discarded
    pub fn dry_run(&self) {
        print_status(
            Status::DRY_RUN,
            &console::Style::new().yellow().bold(),
            "database left unchanged",
        );
    }
}

impl Default for IndexProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Log writer that suspends progress bars while a line is written
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressWriter;

impl io::Write for ProgressWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        MULTI.suspend(|| io::stderr().write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for ProgressWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        *self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(250)), "250ms");
        assert_eq!(format_elapsed(Duration::from_millis(1500)), "1.50s");
    }

    #[test]
    fn test_status_verbs_fit_column() {
        for status in [
            FileStatus::New,
            FileStatus::Changed,
            FileStatus::Renamed,
            FileStatus::Deleted,
            FileStatus::Unknown,
        ] {
            assert!(status_verb(status).len() <= 12);
        }
    }
}

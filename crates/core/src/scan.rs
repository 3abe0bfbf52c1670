//! Directory snapshot with gitignore support via the `ignore` crate

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use color_eyre::Result;
use ignore::WalkBuilder;
use ignore::overrides::{Override, OverrideBuilder};
use tracing::warn;

use crate::store::STATE_DIR;

/// Recorded names are UTF-8 strings; anything else cannot round-trip to disk
fn is_utf8(path: &Path) -> bool {
    path.to_str().is_some()
}

/// Filename for include patterns (like .gitignore but for force-including)
pub const ZINDEX_INCLUDE_FILE: &str = ".zindexinclude";

/// Scanner for directory trees with gitignore support
pub struct Scanner {
    root: PathBuf,
    /// Additional ignore globs beyond .gitignore
    extra_ignores: Vec<String>,
    /// Patterns to force-include even if gitignored (e.g., ".env")
    includes: Vec<String>,
}

impl Scanner {
    /// Create a new scanner for the given root directory
    ///
    /// Automatically loads patterns from `.zindexinclude` if present.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let mut includes = Vec::new();

        if let Ok(contents) = std::fs::read_to_string(root.join(ZINDEX_INCLUDE_FILE)) {
            for line in contents.lines() {
                let line = line.trim();
                // Skip empty lines and comments
                if !line.is_empty() && !line.starts_with('#') {
                    includes.push(line.to_string());
                }
            }
        }

        Self {
            root,
            extra_ignores: Vec::new(),
            includes,
        }
    }

    /// Add an extra ignore glob
    #[must_use]
    pub fn ignore(mut self, pattern: impl Into<String>) -> Self {
        self.extra_ignores.push(pattern.into());
        self
    }

    /// Force-include a pattern even if it matches .gitignore
    #[must_use]
    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.includes.push(pattern.into());
        self
    }

    fn ignore_matcher(&self) -> Result<Override> {
        let mut overrides = OverrideBuilder::new(&self.root);
        for pattern in &self.extra_ignores {
            overrides.add(&format!("!{pattern}"))?;
        }
        Ok(overrides.build()?)
    }

    /// Create a configured walk builder
    fn walk_builder(&self, respect_gitignore: bool) -> Result<WalkBuilder> {
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(false)
            .git_ignore(respect_gitignore)
            .git_global(respect_gitignore)
            .git_exclude(respect_gitignore)
            .require_git(false)
            .follow_links(false)
            .overrides(self.ignore_matcher()?)
            .filter_entry(|e| e.file_name() != ".git" && e.file_name() != STATE_DIR);
        Ok(builder)
    }

    /// Scan for files matching include patterns (bypassing gitignore)
    fn scan_includes(&self, paths: &mut BTreeSet<PathBuf>) -> Result<()> {
        if self.includes.is_empty() {
            return Ok(());
        }

        let mut overrides = OverrideBuilder::new(&self.root);
        for pattern in &self.includes {
            overrides.add(pattern)?;
        }
        let matcher = overrides.build()?;

        for result in self.walk_builder(false)?.build() {
            let entry = result?;
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }

            let relative_path = entry.path().strip_prefix(&self.root)?;
            if !is_utf8(relative_path) {
                continue;
            }
            if matcher.matched(relative_path, false).is_whitelist() {
                // Parents of an included file are part of the snapshot too
                for ancestor in relative_path.ancestors() {
                    if !ancestor.as_os_str().is_empty() {
                        paths.insert(ancestor.to_path_buf());
                    }
                }
            }
        }

        Ok(())
    }

    /// Scan the directory and return every file and folder path, relative to the root
    ///
    /// Sorted, so a folder always precedes its contents. Symlinks and paths
    /// that are not valid UTF-8 are skipped.
    ///
    /// # Errors
    /// Returns an error if directory traversal fails
    pub fn scan_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths = BTreeSet::new();

        for result in self.walk_builder(true)?.build() {
            let entry = result?;
            if entry.depth() == 0 {
                continue;
            }
            if entry.file_type().is_none_or(|t| t.is_symlink()) {
                continue;
            }

            let relative_path = entry.path().strip_prefix(&self.root)?;
            if !is_utf8(relative_path) {
                warn!("skipping {}: name is not valid UTF-8", relative_path.display());
                continue;
            }
            paths.insert(relative_path.to_path_buf());
        }

        self.scan_includes(&mut paths)?;

        Ok(paths.into_iter().collect())
    }
}

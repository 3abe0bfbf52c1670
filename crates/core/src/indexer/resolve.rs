//! File identity resolution: which history does an observed path continue?
//!
//! Folders match by path only. Files match by path first, then by content:
//! a history whose last version has the same checksum but whose path is gone
//! from disk is taken as the source of a rename or move.
//!
//! Deleted histories never match, and a history that already received a
//! version in the current run is not offered again, so an identity advances
//! at most once per run.

use std::path::Path;

use tracing::debug;

use super::version::FileProperties;
use crate::model::{DatabaseVersion, FileHistory, FileType};
use crate::store::HistoryStore;

/// Whether `full_name` (relative, `/`-separated) exists below `root`
pub(crate) fn exists_on_disk(root: &Path, full_name: &str) -> bool {
    root.join(full_name).exists()
}

pub(crate) struct IdentityResolver<'a, S: ?Sized> {
    store: &'a S,
    root: &'a Path,
}

impl<'a, S: HistoryStore + ?Sized> IdentityResolver<'a, S> {
    pub fn new(store: &'a S, root: &'a Path) -> Self {
        Self { store, root }
    }

    /// The history `observed` continues, or `None` if it starts a new identity
    pub fn resolve(
        &self,
        observed: &FileProperties,
        in_progress: &DatabaseVersion,
    ) -> Option<&'a FileHistory> {
        let full_name = observed.full_name();
        let eligible = |history: &&FileHistory| {
            !history.is_deleted()
                && history.last_version().is_some()
                && in_progress.file_history(&history.file_id).is_none()
        };

        if let Some(history) = self.store.file_history_by_path(&full_name).filter(eligible) {
            debug!("{full_name}: found history {} by path", history.file_id);
            return Some(history);
        }

        if observed.file_type == FileType::Folder {
            debug!("{full_name}: no history found, starting new folder history");
            return None;
        }

        let checksum = observed.checksum?;

        // First candidate in store order wins; the store enumerates by ascending id
        let candidate = self
            .store
            .file_histories_by_checksum(&checksum)
            .into_iter()
            .filter(eligible)
            .find(|history| {
                history
                    .last_version()
                    .is_some_and(|last| !exists_on_disk(self.root, &last.full_name()))
            });

        match candidate {
            Some(history) => {
                debug!("{full_name}: found history {} by checksum {checksum}", history.file_id);
            }
            None => {
                debug!("{full_name}: no history found, starting new history (checksum {checksum})");
            }
        }
        candidate
    }
}

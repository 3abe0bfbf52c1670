//! Vanished-file sweep: synthetic deletions for histories whose file is gone

use std::path::Path;

use tracing::debug;

use super::resolve::exists_on_disk;
use crate::model::DatabaseVersion;
use crate::store::HistoryStore;

/// Append a DELETED version for every untouched, live history whose last
/// path no longer exists under `root`. Returns the number of deletions.
///
/// Histories that already got a version in `in_progress` are skipped: a
/// rename there already accounts for the old path.
pub(crate) fn sweep_vanished<S: HistoryStore + ?Sized>(
    store: &S,
    root: &Path,
    in_progress: &mut DatabaseVersion,
) -> usize {
    let mut count = 0;
    for history in store.file_histories() {
        if in_progress.file_history(&history.file_id).is_some() {
            continue;
        }
        let Some(last) = history.last_version() else {
            continue;
        };
        if last.is_deleted() {
            continue;
        }

        if !exists_on_disk(root, &last.full_name()) {
            let deletion = last.deleted();
            debug!("deleted: {last}, adding {deletion}");
            in_progress.add_file_version(history.file_id, deletion);
            count += 1;
        }
    }
    count
}

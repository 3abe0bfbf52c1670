//! Next-version construction and status assignment

use std::time::SystemTime;

use crate::hash::ContentHash;
use crate::model::{FileStatus, FileType, FileVersion, join_full_name};

/// What was observed on disk for one path at the end of its capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileProperties {
    pub path: String,
    pub name: String,
    pub file_type: FileType,
    pub size: u64,
    pub last_modified: SystemTime,
    pub checksum: Option<ContentHash>,
}

impl FileProperties {
    pub fn full_name(&self) -> String {
        join_full_name(&self.path, &self.name)
    }
}

/// Build the version that follows `previous` for an observation.
///
/// Returns `None` when checksum, name and path all equal the previous
/// version's: nothing changed that this model records.
pub(crate) fn next_version(
    previous: Option<&FileVersion>,
    observed: &FileProperties,
    machine_name: &str,
    now: SystemTime,
) -> Option<FileVersion> {
    if let Some(previous) = previous
        && previous.checksum == observed.checksum
        && previous.name == observed.name
        && previous.path == observed.path
    {
        return None;
    }

    Some(FileVersion {
        version: previous.map_or(1, |p| p.version + 1),
        status: status(previous, observed),
        path: observed.path.clone(),
        name: observed.name.clone(),
        file_type: observed.file_type,
        size: observed.size,
        checksum: observed.checksum,
        last_modified: observed.last_modified,
        updated: now,
        created_by: machine_name.to_string(),
    })
}

fn status(previous: Option<&FileVersion>, observed: &FileProperties) -> FileStatus {
    let Some(previous) = previous else {
        return FileStatus::New;
    };

    if observed.file_type == FileType::File && observed.checksum != previous.checksum {
        FileStatus::Changed
    } else if observed.full_name() != previous.full_name() {
        FileStatus::Renamed
    } else {
        FileStatus::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::file_version;

    fn observed(full_name: &str, content: &[u8]) -> FileProperties {
        let v = file_version(full_name, content, 1);
        FileProperties {
            path: v.path,
            name: v.name,
            file_type: FileType::File,
            size: content.len() as u64,
            last_modified: SystemTime::UNIX_EPOCH,
            checksum: Some(ContentHash::from_bytes(content)),
        }
    }

    fn folder(full_name: &str) -> FileProperties {
        FileProperties {
            file_type: FileType::Folder,
            size: 0,
            checksum: None,
            ..observed(full_name, b"")
        }
    }

    #[test]
    fn test_first_version_is_new() {
        let v = next_version(None, &observed("a.txt", b"hello"), "box", SystemTime::now()).unwrap();
        assert_eq!(v.version, 1);
        assert_eq!(v.status, FileStatus::New);
        assert_eq!(v.created_by, "box");
    }

    #[test]
    fn test_identical_observation_is_suppressed() {
        let previous = file_version("docs/a.txt", b"hello", 3);
        let next = next_version(
            Some(&previous),
            &observed("docs/a.txt", b"hello"),
            "box",
            SystemTime::now(),
        );
        assert!(next.is_none());
    }

    #[test]
    fn test_changed_content() {
        let previous = file_version("a.txt", b"hello", 1);
        let v = next_version(Some(&previous), &observed("a.txt", b"hello!"), "box", SystemTime::now())
            .unwrap();
        assert_eq!(v.version, 2);
        assert_eq!(v.status, FileStatus::Changed);
    }

    #[test]
    fn test_changed_wins_over_renamed() {
        let previous = file_version("a.txt", b"hello", 1);
        let v = next_version(Some(&previous), &observed("b.txt", b"other"), "box", SystemTime::now())
            .unwrap();
        assert_eq!(v.status, FileStatus::Changed);
    }

    #[test]
    fn test_renamed_and_moved() {
        let previous = file_version("a.txt", b"hello", 4);

        let renamed = next_version(Some(&previous), &observed("c.txt", b"hello"), "box", SystemTime::now())
            .unwrap();
        assert_eq!(renamed.status, FileStatus::Renamed);
        assert_eq!(renamed.version, 5);

        let moved = next_version(
            Some(&previous),
            &observed("sub/a.txt", b"hello"),
            "box",
            SystemTime::now(),
        )
        .unwrap();
        assert_eq!(moved.status, FileStatus::Renamed);
        assert_eq!(moved.path, "sub");
    }

    #[test]
    fn test_folder_same_path_is_suppressed() {
        let previous = FileVersion {
            file_type: FileType::Folder,
            checksum: None,
            ..file_version("docs", b"", 1)
        };
        assert!(next_version(Some(&previous), &folder("docs"), "box", SystemTime::now()).is_none());
    }

    #[test]
    fn test_file_replaced_by_folder_is_unknown() {
        let previous = file_version("thing", b"bytes", 1);
        let v = next_version(Some(&previous), &folder("thing"), "box", SystemTime::now()).unwrap();
        assert_eq!(v.status, FileStatus::Unknown);
        assert_eq!(v.file_type, FileType::Folder);
    }

    #[test]
    fn test_previous_version_untouched() {
        let previous = file_version("a.txt", b"hello", 1);
        let snapshot = previous.clone();
        let _ = next_version(Some(&previous), &observed("a.txt", b"new"), "box", SystemTime::now());
        assert_eq!(previous, snapshot);
    }
}

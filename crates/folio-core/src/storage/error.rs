//! Storage error handling
//!
//! Errors raised by local persistence and by entity store edits. File
//! errors carry the path and what was being done with it; `io` sorts raw
//! I/O failures into the cases a user can act on.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::models::EntityId;

/// ENOSPC and EDQUOT
const NO_SPACE_CODES: [i32; 2] = [28, 122];

/// What was being done with a file when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    Read,
    Write,
    CreateDir,
    Copy,
    Remove,
}

impl fmt::Display for FileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            FileAction::Read => "read",
            FileAction::Write => "write",
            FileAction::CreateDir => "create directory",
            FileAction::Copy => "copy to",
            FileAction::Remove => "remove",
        };
        f.write_str(verb)
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Could not {action} '{path}': {source}")]
    File {
        action: FileAction,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Permission denied for '{path}'")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Out of disk space while writing '{path}'")]
    NoSpace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The local store file exists but does not parse
    #[error("Local store '{path}' is unreadable ({details}); a copy was kept at '{backup_path}'")]
    CorruptStore {
        path: PathBuf,
        backup_path: PathBuf,
        details: String,
    },

    /// Final rename of an atomic write
    #[error("Could not move '{temp}' into place at '{target}': {source}")]
    Replace {
        temp: PathBuf,
        target: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No such entity: '{id}'")]
    UnknownEntity { id: EntityId },

    /// Tombstoned ids can never be edited or reused
    #[error("Entity '{id}' has been deleted")]
    Tombstoned { id: EntityId },

    #[error("Invalid move: {details}")]
    InvalidMove { details: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    /// Wrap an I/O failure on `path`
    pub fn io(action: FileAction, path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::PermissionDenied {
            return StorageError::PermissionDenied { path, source };
        }
        if source
            .raw_os_error()
            .is_some_and(|code| NO_SPACE_CODES.contains(&code))
        {
            return StorageError::NoSpace { path, source };
        }
        StorageError::File {
            action,
            path,
            source,
        }
    }

    /// Whether the user can fix the cause and carry on with the same data
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StorageError::NoSpace { .. }
                | StorageError::PermissionDenied { .. }
                | StorageError::CorruptStore { .. }
        )
    }

    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        Some(match self {
            StorageError::NoSpace { .. } => "Free up disk space and run the command again.",
            StorageError::PermissionDenied { .. } => {
                "Make sure the data directory is owned by your user and writable."
            }
            StorageError::CorruptStore { .. } => {
                "Sync again to rebuild the store from the remote snapshot, or restore the backup copy."
            }
            StorageError::File {
                action: FileAction::CreateDir,
                ..
            } => "Check that the parent of the data directory exists.",
            _ => return None,
        })
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_is_recoverable() {
        let source = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = StorageError::io(FileAction::Write, "/data/store.json", source);

        assert!(matches!(err, StorageError::PermissionDenied { .. }));
        assert!(err.is_recoverable());
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_no_space_from_os_code() {
        let err = StorageError::io(
            FileAction::Write,
            "/data/store.tmp",
            io::Error::from_raw_os_error(28),
        );
        assert!(matches!(err, StorageError::NoSpace { .. }));
    }

    #[test]
    fn test_other_errors_keep_action() {
        let source = io::Error::new(io::ErrorKind::NotFound, "gone");
        let err = StorageError::io(FileAction::Read, "/data/client_id", source);

        assert!(matches!(
            err,
            StorageError::File {
                action: FileAction::Read,
                ..
            }
        ));
        assert!(err.to_string().starts_with("Could not read '/data/client_id'"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_corrupt_store_message() {
        let err = StorageError::CorruptStore {
            path: PathBuf::from("/data/store.json"),
            backup_path: PathBuf::from("/data/store.json.corrupt.backup"),
            details: "expected value at line 1".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("unreadable"));
        assert!(msg.contains("store.json.corrupt.backup"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_entity_errors_have_no_suggestion() {
        let err = StorageError::Tombstoned { id: "p1".into() };
        assert!(err.to_string().contains("p1"));
        assert!(err.recovery_suggestion().is_none());
    }
}

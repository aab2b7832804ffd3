//! Typed error kinds surfaced by the snow engine
//!
//! All fallible operations return `anyhow::Result`; the kinds below are the
//! errors callers are expected to match on, recovered via
//! `err.downcast_ref::<SnowError>()`.

use std::path::PathBuf;
use thiserror::Error;

/// Error kinds surfaced by the snow engine
#[derive(Debug, Error)]
pub enum SnowError {
    /// No `.snow` entry found in the directory or any of its ancestors
    #[error("not a snow repository (or any parent directory): {0}")]
    NotARepository(PathBuf),

    /// Repository has no HEAD and no reference to attach to
    #[error("repository has no HEAD")]
    NoHead,

    /// The commondir is missing, not a directory, or placed inside the workdir
    #[error("invalid commondir: {0}")]
    InvalidCommondir(String),

    /// Commit requested over an empty index without `allow_empty`
    #[error("nothing to commit")]
    NothingToCommit,

    /// A reference with that name already exists
    #[error("reference already exists: {0}")]
    RefExists(String),

    /// No reference with that name
    #[error("reference not found: {0}")]
    RefNotFound(String),

    /// The reference HEAD is attached to cannot be deleted
    #[error("cannot delete checked out reference: {0}")]
    CannotDeleteCheckedOutRef(String),

    /// Start point of a new reference does not name a known commit
    #[error("invalid start point: {0}")]
    InvalidStartPoint(String),

    /// Checkout target does not resolve to a reference or commit
    #[error("unknown target: {0}")]
    UnknownTarget(String),

    /// Malformed ancestor expression (`HEAD~N~M...`)
    #[error("invalid hash syntax: {0}")]
    InvalidHashSyntax(String),

    /// Ancestor expression walked past a root commit
    #[error("expression walks past the root of history: {0}")]
    OutOfHistory(String),

    /// The running OS is neither macOS, Linux nor Windows
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// A bundled helper executable could not be located
    #[error("helper executable not found: {0}")]
    HelperNotFound(String),

    /// A spawned helper exited with a non-zero status
    #[error("helper exited with status {code}")]
    HelperExitNonZero { code: i32, stderr: Option<String> },

    /// Another process holds a write-capable handle on the file
    #[error("file is being written by another process: {path}")]
    FileWrittenByAnotherProcess {
        path: String,
        process_name: Option<String>,
    },

    /// Aggregate of per-file write-lock errors
    #[error("write lock violation ({} files)", errors.len())]
    WriteLockViolation { errors: Vec<SnowError> },

    /// Internal short-circuit of `compare_file_hash`; never escapes as an error
    #[error("hash block mismatch at index {index}")]
    HashBlockMismatch { index: usize },

    /// Mutating call on an invalidated index
    #[error("index has been invalidated")]
    IndexInvalidated,

    /// Filesystem or subprocess failure, tagged with the path involved
    #[error("io error at {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl SnowError {
    /// Wrap an `std::io::Error` with the path it occurred at
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        SnowError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = SnowError::NothingToCommit.into();
        assert!(matches!(
            err.downcast_ref::<SnowError>(),
            Some(SnowError::NothingToCommit)
        ));
    }

    #[test]
    fn test_write_lock_violation_display() {
        let err = SnowError::WriteLockViolation {
            errors: vec![
                SnowError::FileWrittenByAnotherProcess {
                    path: "a.bin".into(),
                    process_name: Some("blender".into()),
                },
                SnowError::FileWrittenByAnotherProcess {
                    path: "b.bin".into(),
                    process_name: None,
                },
            ],
        };
        assert!(err.to_string().contains("2 files"));
    }
}

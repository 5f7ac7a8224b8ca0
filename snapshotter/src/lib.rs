use std::fmt;
use std::path::PathBuf;

pub mod clone;
pub mod context;
mod copy;
pub mod mount;
pub mod snapshots;

pub use crate::clone::{without_label, CloneSnapshotter, LABEL_CLONE_SOURCE};
pub use crate::context::{CancellationToken, Context};
pub use crate::mount::{writable_dir, Mount, MountKind};
pub use crate::snapshots::{with_labels, Info, Kind, Opt, Snapshotter, Usage};

/// Snapshotter related errors
#[derive(Debug)]
pub enum Error {
    /// The requested snapshot (or parent) is not present in the store
    NotFound(String),
    /// A snapshot with the same key already exists
    AlreadyExists(String),
    /// The snapshot is not in a state allowing the operation
    FailedPrecondition(String),
    /// The caller supplied an argument the store cannot accept
    InvalidArgument(String),
    /// No writable directory could be identified in a mount list
    UnsupportedMounts(String),
    /// The calling context was canceled
    Canceled,
    /// An error occurred when trying to clear a writable directory
    ClearDirectory(PathBuf, std::io::Error),
    /// An error occurred when copying an entry of a writable directory
    Copy {
        src: PathBuf,
        dst: PathBuf,
        source: std::io::Error,
    },
    /// An error occurred when trying to create or remove a snapshot directory
    SnapshotDirectory(PathBuf, std::io::Error),
    /// An error occurred when trying to open the metadata file
    OpenStateFile(String),
    /// The metadata file exists but does not hold a valid state
    ParseStateFile(String),
    /// An error occurred when trying to serialize the metadata
    SerializeState(String),
    /// An error occurred when trying to write the metadata into the file
    WriteStateFile(String),
    /// A blocking task could not be joined
    Internal(String),
    /// An error annotated with the operation that produced it
    Context(String, Box<Error>),
    /// An operation failed and removing its partial result failed as well
    Rollback { cause: Box<Error>, cleanup: Box<Error> },
}

/// Coarse classification of an [`Error`], looking through context wrappers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    InvalidArgument,
    UnsupportedMounts,
    Canceled,
    Io,
    Internal,
}

impl Error {
    /// Wrap the error with a description of the operation that failed.
    pub fn context<S: Into<String>>(self, op: S) -> Self {
        Error::Context(op.into(), Box::new(self))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::FailedPrecondition(_) => ErrorKind::FailedPrecondition,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::UnsupportedMounts(_) => ErrorKind::UnsupportedMounts,
            Error::Canceled => ErrorKind::Canceled,
            Error::ClearDirectory(..)
            | Error::Copy { .. }
            | Error::SnapshotDirectory(..)
            | Error::OpenStateFile(_)
            | Error::WriteStateFile(_) => ErrorKind::Io,
            Error::ParseStateFile(_) | Error::SerializeState(_) | Error::Internal(_) => {
                ErrorKind::Internal
            }
            Error::Context(_, inner) => inner.kind(),
            Error::Rollback { cause, .. } => cause.kind(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound(msg)
            | Error::AlreadyExists(msg)
            | Error::FailedPrecondition(msg)
            | Error::InvalidArgument(msg)
            | Error::UnsupportedMounts(msg)
            | Error::OpenStateFile(msg)
            | Error::ParseStateFile(msg)
            | Error::SerializeState(msg)
            | Error::WriteStateFile(msg)
            | Error::Internal(msg) => write!(f, "{}", msg),
            Error::Canceled => write!(f, "operation canceled"),
            Error::ClearDirectory(path, e) => {
                write!(f, "clear directory {}: {}", path.display(), e)
            }
            Error::Copy { src, dst, source } => {
                write!(f, "copy {} to {}: {}", src.display(), dst.display(), source)
            }
            Error::SnapshotDirectory(path, e) => {
                write!(f, "snapshot directory {}: {}", path.display(), e)
            }
            Error::Context(op, inner) => write!(f, "{}: {}", op, inner),
            Error::Rollback { cause, cleanup } => {
                write!(f, "{} (cleanup also failed: {})", cause, cleanup)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ClearDirectory(_, e) | Error::SnapshotDirectory(_, e) => Some(e),
            Error::Copy { source, .. } => Some(source),
            Error::Context(_, inner) => Some(inner.as_ref()),
            Error::Rollback { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

/// A common result type for our crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Run filesystem work on the blocking thread pool.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("blocking task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use crate::{Error, ErrorKind};
    use std::io;

    #[test]
    fn test_kind_looks_through_context() {
        let err = Error::NotFound("snapshot \"a\" does not exist".to_string())
            .context("stat source snapshot \"a\"");

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "stat source snapshot \"a\": snapshot \"a\" does not exist"
        );
    }

    #[test]
    fn test_rollback_reports_both_errors() {
        let err = Error::Rollback {
            cause: Box::new(Error::Copy {
                src: "/src/a".into(),
                dst: "/dst/a".into(),
                source: io::Error::new(io::ErrorKind::Other, "disk full"),
            }),
            cleanup: Box::new(Error::FailedPrecondition("busy".to_string())),
        };

        assert_eq!(err.kind(), ErrorKind::Io);
        let msg = err.to_string();
        assert!(msg.contains("disk full"));
        assert!(msg.contains("cleanup also failed: busy"));
    }
}

//! Error types for gatestore.
//!
//! Loading distinguishes three families of failure:
//! - **NotFound**: a mount point, tier, gate or collection does not exist
//! - **Malformed**: a record could not be parsed or holds an invalid volume
//! - **Io**: the file system refused an operation (open, mmap, read_dir)
//!
//! Reads never fail; only loads, `Store` lifecycle calls and `wait` return errors.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while loading or observing a feature database.
#[derive(Error, Debug)]
pub enum Error {
    /// A path in the hierarchy does not exist
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A record or collection holds data that cannot be interpreted
    #[error("malformed data in {}: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },

    /// Any other I/O failure
    #[error("{op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// File system observation failure
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    /// The operation was cancelled before completing
    #[error("operation cancelled")]
    Cancelled,

    /// A background load or reload task panicked or was aborted
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    /// Wraps an I/O error, mapping `ErrorKind::NotFound` to [`Error::NotFound`].
    pub fn io(op: &'static str, path: impl AsRef<Path>, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        if source.kind() == io::ErrorKind::NotFound {
            Error::NotFound(path)
        } else {
            Error::Io { op, path, source }
        }
    }

    /// Create a malformed data error
    pub fn malformed(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Error::Malformed {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Returns true when the error means "does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum VfsError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

impl VfsError {
    /// Maps an IO error for a specific path to a typed variant.
    ///
    /// `NotFound` and `PermissionDenied` are recoverable — callers treat them
    /// as "entry vanished" / "entry unreadable" rather than failures.
    pub(crate) fn from_io(path: &Path, error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io(error),
        }
    }

    /// Returns true for errors that mean "this entry is gone or unreadable".
    pub fn is_vanished(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::PermissionDenied(_))
    }
}

pub type Result<T> = std::result::Result<T, VfsError>;

/// Canonicalizes a path, returning the original if canonicalization fails.
pub fn canonicalize_existing_path(path: PathBuf) -> PathBuf {
    fs::canonicalize(&path).unwrap_or(path)
}

/// Canonicalizes the parent directory while keeping the final component
/// as-is. This is the node-key form: a symlink keeps its own path and name
/// instead of resolving to its target's.
pub fn canonicalize_node_path(path: PathBuf) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            canonicalize_existing_path(parent.to_path_buf()).join(name)
        }
        _ => canonicalize_existing_path(path),
    }
}

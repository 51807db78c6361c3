//! Metadata accessor.
//!
//! Stats a single path and classifies it as file or directory. Pure and
//! stateless — no caching, no recursion. Callers treat `NotFound` and
//! `PermissionDenied` as "entry vanished" rather than failures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{canonicalize_node_path, Result, VfsError};
use crate::node::{NodeMeta, VirtualNode};

/// Stats `path` and builds a fresh node record.
///
/// Symlinks are not followed; anything that is not a directory classifies as
/// a file, and a symlink is keyed by its own path, never its target's (only
/// the parent directory is canonicalized). Directory nodes come back with an
/// empty children list — listing is a separate call and the cache's
/// responsibility.
pub fn stat(path: &Path) -> Result<VirtualNode> {
    let metadata = fs::symlink_metadata(path).map_err(|error| VfsError::from_io(path, error))?;
    let path = canonicalize_node_path(path.to_path_buf());

    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());
    let parent = path.parent().map(Path::to_path_buf);

    let meta = NodeMeta {
        hidden: name.starts_with('.'),
        readonly: metadata.permissions().readonly(),
        permissions: mode_string(&metadata),
        size: if metadata.is_dir() { 0 } else { metadata.len() },
        created: metadata.created().ok().and_then(systime_to_unix),
        accessed: metadata.accessed().ok().and_then(systime_to_unix),
        modified: metadata.modified().ok().and_then(systime_to_unix),
        path,
        name,
        parent,
    };

    if metadata.is_dir() {
        Ok(VirtualNode::Directory {
            meta,
            children: Vec::new(),
        })
    } else {
        Ok(VirtualNode::File { meta })
    }
}

/// Lists the immediate children of a directory, sorted by name.
///
/// Entries that error during iteration are skipped and logged — a vanished or
/// unreadable entry never fails the whole listing.
pub fn list_children(path: &Path) -> Result<Vec<PathBuf>> {
    let read_dir = fs::read_dir(path).map_err(|error| VfsError::from_io(path, error))?;

    let mut children = Vec::new();
    for entry in read_dir {
        match entry {
            Ok(entry) => children.push(entry.path()),
            Err(error) => {
                log::debug!("skipping unreadable entry under {}: {error}", path.display());
            }
        }
    }
    children.sort();
    Ok(children)
}

/// Returns the current unix timestamp in seconds.
pub fn unix_now_secs() -> u64 {
    systime_to_unix(SystemTime::now()).unwrap_or(0)
}

fn systime_to_unix(time: SystemTime) -> Option<u64> {
    time.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

#[cfg(unix)]
fn mode_string(metadata: &fs::Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;

    let mode = metadata.permissions().mode();
    let mut out = String::with_capacity(9);
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

#[cfg(not(unix))]
fn mode_string(metadata: &fs::Metadata) -> String {
    if metadata.permissions().readonly() {
        "r--r--r--".to_string()
    } else {
        "rw-rw-rw-".to_string()
    }
}

//! Cached node records.
//!
//! A `VirtualNode` is the in-memory mirror of one filesystem path. Parent and
//! child relations are expressed as path strings resolved through the
//! `NodeCache` on demand — never as live references — so rebuilding or
//! evicting a subtree can never dangle.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Metadata shared by files and directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMeta {
    /// Canonical absolute path — the cache key.
    pub path: PathBuf,
    /// Display name (final path component).
    pub name: String,
    /// Parent path, `None` for a filesystem root.
    pub parent: Option<PathBuf>,
    /// Byte size. For directories: aggregate of descendant file sizes as
    /// currently cached (refined as deeper levels are built).
    pub size: u64,
    /// Dotfile flag.
    pub hidden: bool,
    /// Read-only flag from the underlying permissions.
    pub readonly: bool,
    /// Mode string, e.g. `rwxr-xr-x`.
    pub permissions: String,
    /// Creation time (unix seconds), if the platform reports one.
    pub created: Option<u64>,
    /// Last access time (unix seconds).
    pub accessed: Option<u64>,
    /// Last modification time (unix seconds).
    pub modified: Option<u64>,
}

/// A cached metadata record for one filesystem path.
///
/// Matched exhaustively at every use site; there is deliberately no shared
/// trait over the two kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum VirtualNode {
    File {
        meta: NodeMeta,
    },
    Directory {
        meta: NodeMeta,
        /// Ordered child references, by path.
        children: Vec<PathBuf>,
    },
}

impl VirtualNode {
    pub fn meta(&self) -> &NodeMeta {
        match self {
            Self::File { meta } => meta,
            Self::Directory { meta, .. } => meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut NodeMeta {
        match self {
            Self::File { meta } => meta,
            Self::Directory { meta, .. } => meta,
        }
    }

    pub fn path(&self) -> &Path {
        &self.meta().path
    }

    pub fn name(&self) -> &str {
        &self.meta().name
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Directory { .. })
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Self::File { .. })
    }

    /// Derived extension for files, lowercased. `None` for directories and
    /// extensionless names.
    pub fn extension(&self) -> Option<String> {
        match self {
            Self::File { meta } => Path::new(&meta.name)
                .extension()
                .map(|ext| ext.to_string_lossy().to_ascii_lowercase()),
            Self::Directory { .. } => None,
        }
    }

    /// Cached child paths for directories, empty for files.
    pub fn children(&self) -> &[PathBuf] {
        match self {
            Self::File { .. } => &[],
            Self::Directory { children, .. } => children,
        }
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut Vec<PathBuf>> {
        match self {
            Self::File { .. } => None,
            Self::Directory { children, .. } => Some(children),
        }
    }
}

/// Two nodes are equal iff their canonical paths are equal.
impl PartialEq for VirtualNode {
    fn eq(&self, other: &Self) -> bool {
        self.path() == other.path()
    }
}

impl Eq for VirtualNode {}

/// Sibling ordering used by consumer-facing listings: directories before
/// files, then case-insensitive name ascending. The exact-name tiebreak keeps
/// the order total so rebuilds never reshuffle equal-ranked siblings.
pub fn sibling_order(a: &VirtualNode, b: &VirtualNode) -> Ordering {
    match (a.is_dir(), b.is_dir()) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => {
            let name_a = a.name().to_lowercase();
            let name_b = b.name().to_lowercase();
            name_a.cmp(&name_b).then_with(|| a.name().cmp(b.name()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(path: &str) -> NodeMeta {
        let path = PathBuf::from(path);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        NodeMeta {
            path,
            name,
            parent: None,
            size: 0,
            hidden: false,
            readonly: false,
            permissions: String::new(),
            created: None,
            accessed: None,
            modified: None,
        }
    }

    fn file(path: &str) -> VirtualNode {
        VirtualNode::File { meta: meta(path) }
    }

    fn dir(path: &str) -> VirtualNode {
        VirtualNode::Directory {
            meta: meta(path),
            children: Vec::new(),
        }
    }

    #[test]
    fn equality_is_path_equality() {
        let mut a = file("/w/a.txt");
        let b = file("/w/a.txt");
        a.meta_mut().size = 42;
        assert_eq!(a, b);
        assert_ne!(a, file("/w/b.txt"));
    }

    #[test]
    fn extension_is_derived_and_lowercased() {
        assert_eq!(file("/w/Main.RS").extension(), Some("rs".to_string()));
        assert_eq!(file("/w/Makefile").extension(), None);
        assert_eq!(dir("/w/src.d").extension(), None);
    }

    #[test]
    fn siblings_sort_dirs_first_then_case_insensitive() {
        let mut nodes = vec![file("/w/Zeta.txt"), dir("/w/beta"), file("/w/alpha.txt"), dir("/w/Alpha")];
        nodes.sort_by(sibling_order);
        let names: Vec<_> = nodes.iter().map(|n| n.name()).collect();
        assert_eq!(names, vec!["Alpha", "beta", "alpha.txt", "Zeta.txt"]);
    }
}

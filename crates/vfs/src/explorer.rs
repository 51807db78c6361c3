//! Tree projection.
//!
//! Maintains the flattened, depth-first, visibility-ordered row list a tree
//! UI consumes. The projector owns the rows and the expand/collapse state; it
//! derives everything else from the `NodeCache` and never mutates it.
//!
//! Row order within a directory is deterministic and stable across rebuilds:
//! directories before files, then case-insensitive name — unrelated siblings
//! never visibly reshuffle.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::NodeCache;
use crate::error::{canonicalize_existing_path, canonicalize_node_path, Result};
use crate::node::{sibling_order, VirtualNode};

/// One visible entry of the flattened tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorerRow {
    pub name: String,
    pub path: PathBuf,
    /// Parent path; `None` only for the watched root's own row.
    pub parent: Option<PathBuf>,
    /// Distance from the watched root (root is 0).
    pub depth: usize,
    pub modified: Option<u64>,
    /// Clipboard state, supplied externally via `set_cut`.
    pub cut: bool,
    /// `Some(flag)` for directories, `None` for files.
    pub expanded: Option<bool>,
}

/// Expand/collapse-aware projection of one watched root.
pub struct TreeProjector {
    cache: Arc<NodeCache>,
    root: PathBuf,
    expanded: HashSet<PathBuf>,
    cut: HashSet<PathBuf>,
    rows: Vec<ExplorerRow>,
}

impl TreeProjector {
    /// Builds the initial projection: the root row plus its listing.
    pub fn new(cache: Arc<NodeCache>, root: &Path) -> Result<Self> {
        let root = canonicalize_existing_path(root.to_path_buf());
        let root_node = cache.get_node(&root)?;

        let mut projector = Self {
            cache,
            expanded: HashSet::from([root.clone()]),
            cut: HashSet::new(),
            rows: Vec::new(),
            root,
        };
        let mut rows = vec![ExplorerRow {
            name: root_node.name().to_string(),
            path: projector.root.clone(),
            parent: None,
            depth: 0,
            modified: root_node.meta().modified,
            cut: false,
            expanded: Some(true),
        }];
        rows.extend(projector.derive_visible(&projector.root));
        projector.rows = rows;
        Ok(projector)
    }

    /// The current flattened list, a valid expansion-restricted DFS of the
    /// cache state as of the last applied command or notice.
    pub fn rows(&self) -> &[ExplorerRow] {
        &self.rows
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Marks a directory expanded and splices its visible subtree (including
    /// already-expanded descendants) after its row.
    pub fn expand(&mut self, path: &Path) {
        let path = canonicalize_node_path(path.to_path_buf());
        if !self.expanded.insert(path.clone()) {
            return;
        }

        let Some(index) = self.row_index(&path) else {
            // Not currently visible; the flag takes effect when an ancestor
            // expands.
            return;
        };
        if self.rows[index].expanded.is_none() {
            // Not a directory after all.
            self.expanded.remove(&path);
            return;
        }

        self.rows[index].expanded = Some(true);
        let subtree = self.derive_visible(&path);
        self.rows.splice(index + 1..index + 1, subtree);
    }

    /// Marks a directory collapsed and drops all rows below it. Descendants
    /// keep their own expanded flags, so a later `expand` restores the prior
    /// shape. Projection-only: the cache is untouched.
    pub fn collapse(&mut self, path: &Path) {
        let path = canonicalize_node_path(path.to_path_buf());
        if path == self.root {
            return;
        }
        self.expanded.remove(&path);

        let Some(index) = self.row_index(&path) else {
            return;
        };
        if self.rows[index].expanded.is_none() {
            return;
        }
        self.rows[index].expanded = Some(false);
        let end = self.subtree_end(index);
        self.rows.drain(index + 1..end);
    }

    /// Applies a "children of `parent` changed" notice: atomically replaces
    /// the parent's visible block with rows re-derived from the cache.
    /// Visible expanded directories that vanished are pruned with their whole
    /// subtrees.
    pub fn handle_children_changed(&mut self, parent: &Path) {
        let Some(index) = self.row_index(parent) else {
            return;
        };
        if self.rows[index].expanded != Some(true) {
            // Collapsed or a file row: nothing visible to refresh.
            return;
        }

        let end = self.subtree_end(index);
        let previously_visible: HashSet<PathBuf> = self.rows[index + 1..end]
            .iter()
            .map(|row| row.path.clone())
            .collect();
        let fresh = self.derive_visible(parent);

        // A flag is dropped only for a directory that was visible here and
        // did not come back. Flags hidden under a collapsed descendant stay,
        // whatever the cache currently holds — eviction is not deletion.
        let returned: HashSet<&Path> = fresh.iter().map(|row| row.path.as_path()).collect();
        self.expanded
            .retain(|p| !previously_visible.contains(p) || returned.contains(p.as_path()));

        self.rows.splice(index + 1..end, fresh);
    }

    /// Replaces the externally-supplied clipboard set.
    pub fn set_cut(&mut self, paths: &[PathBuf]) {
        self.cut = paths.iter().cloned().collect();
        for row in &mut self.rows {
            row.cut = self.cut.contains(&row.path);
        }
    }

    fn row_index(&self, path: &Path) -> Option<usize> {
        self.rows.iter().position(|row| row.path == path)
    }

    /// End of the contiguous visible block below `index` (exclusive).
    fn subtree_end(&self, index: usize) -> usize {
        let depth = self.rows[index].depth;
        let mut end = index + 1;
        while end < self.rows.len() && self.rows[end].depth > depth {
            end += 1;
        }
        end
    }

    /// Depth-first derivation of the visible rows under `parent`, recursing
    /// only into expanded directories.
    fn derive_visible(&self, parent: &Path) -> Vec<ExplorerRow> {
        let mut rows = Vec::new();
        let mut children = match self.cache.get_children(parent) {
            Ok(children) => children,
            Err(error) => {
                log::debug!("listing {} failed: {error}", parent.display());
                return rows;
            }
        };
        children.sort_by(sibling_order);

        for child in children {
            let is_expanded_dir = child.is_dir() && self.expanded.contains(child.path());
            rows.push(self.make_row(&child, is_expanded_dir));
            if is_expanded_dir {
                rows.extend(self.derive_visible(child.path()));
            }
        }
        rows
    }

    fn make_row(&self, node: &VirtualNode, is_expanded: bool) -> ExplorerRow {
        let path = node.path().to_path_buf();
        ExplorerRow {
            name: node.name().to_string(),
            depth: self.depth_of(&path),
            parent: node.meta().parent.clone(),
            modified: node.meta().modified,
            cut: self.cut.contains(&path),
            expanded: node.is_dir().then_some(is_expanded),
            path,
        }
    }

    /// Depth by path relativization against the watched root.
    fn depth_of(&self, path: &Path) -> usize {
        path.strip_prefix(&self.root)
            .map(|rel| rel.components().count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    use crate::meta;

    fn canon(path: &Path) -> PathBuf {
        canonicalize_existing_path(path.to_path_buf())
    }

    fn names(projector: &TreeProjector) -> Vec<(String, usize)> {
        projector
            .rows()
            .iter()
            .map(|row| (row.name.clone(), row.depth))
            .collect()
    }

    /// Every non-root row's parent must already have been emitted.
    fn assert_sound(projector: &TreeProjector) {
        let mut seen: HashSet<&Path> = HashSet::new();
        for row in projector.rows() {
            if let Some(parent) = &row.parent {
                assert!(
                    seen.contains(parent.as_path()),
                    "row {} emitted before its parent {}",
                    row.path.display(),
                    parent.display()
                );
            }
            seen.insert(&row.path);
        }
    }

    fn fixture() -> (TempDir, Arc<NodeCache>, TreeProjector) {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("src")).unwrap();
        File::create(temp.path().join("src/main.rs")).unwrap();
        File::create(temp.path().join("README.md")).unwrap();

        let cache = Arc::new(NodeCache::new());
        let projector = TreeProjector::new(Arc::clone(&cache), temp.path()).unwrap();
        (temp, cache, projector)
    }

    #[test]
    fn initial_projection_is_root_plus_listing() {
        let (_temp, _cache, projector) = fixture();
        let rows = names(&projector);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].1, 0);
        // Directories sort before files.
        assert_eq!(rows[1], ("src".to_string(), 1));
        assert_eq!(rows[2], ("README.md".to_string(), 1));
        assert_sound(&projector);
    }

    #[test]
    fn expand_splices_children_in_place() {
        let (temp, _cache, mut projector) = fixture();
        projector.expand(&temp.path().join("src"));

        let rows = names(&projector);
        assert_eq!(
            rows[1..],
            [
                ("src".to_string(), 1),
                ("main.rs".to_string(), 2),
                ("README.md".to_string(), 1)
            ]
        );
        assert_sound(&projector);
    }

    #[test]
    fn collapse_drops_rows_but_keeps_descendant_flags() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("a/b")).unwrap();
        File::create(temp.path().join("a/b/leaf.txt")).unwrap();

        let cache = Arc::new(NodeCache::new());
        let mut projector = TreeProjector::new(Arc::clone(&cache), temp.path()).unwrap();

        projector.expand(&temp.path().join("a"));
        projector.expand(&temp.path().join("a/b"));
        assert_eq!(projector.rows().len(), 4);

        projector.collapse(&temp.path().join("a"));
        assert_eq!(projector.rows().len(), 2);
        assert_eq!(projector.rows()[1].expanded, Some(false));

        // Re-expanding restores the already-expanded descendant too.
        projector.expand(&temp.path().join("a"));
        let rows = names(&projector);
        assert_eq!(
            rows[1..],
            [
                ("a".to_string(), 1),
                ("b".to_string(), 2),
                ("leaf.txt".to_string(), 3)
            ]
        );
        assert_sound(&projector);
    }

    #[test]
    fn children_changed_splices_new_entry_in_order() {
        let (temp, cache, mut projector) = fixture();
        let root = canon(temp.path());

        File::create(temp.path().join("CHANGELOG.md")).unwrap();
        cache.apply_upsert(meta::stat(&root.join("CHANGELOG.md")).unwrap());
        projector.handle_children_changed(&root);

        let rows = names(&projector);
        assert_eq!(
            rows[1..],
            [
                ("src".to_string(), 1),
                ("CHANGELOG.md".to_string(), 1),
                ("README.md".to_string(), 1)
            ]
        );
        assert_sound(&projector);
    }

    #[test]
    fn delete_cascade_drops_expanded_subtree_in_one_update() {
        let (temp, cache, mut projector) = fixture();
        let root = canon(temp.path());
        projector.expand(&root.join("src"));
        assert_eq!(projector.rows().len(), 4);

        fs::remove_dir_all(temp.path().join("src")).unwrap();
        cache.apply_remove(&root.join("src"));
        projector.handle_children_changed(&root);

        let rows = names(&projector);
        assert_eq!(rows[1..], [("README.md".to_string(), 1)]);
        assert_sound(&projector);

        // The vanished directory's expansion flag was pruned: a re-created
        // "src" starts collapsed.
        fs::create_dir(temp.path().join("src")).unwrap();
        cache.apply_upsert(meta::stat(&root.join("src")).unwrap());
        projector.handle_children_changed(&root);
        let src_row = projector
            .rows()
            .iter()
            .find(|row| row.name == "src")
            .unwrap();
        assert_eq!(src_row.expanded, Some(false));
    }

    #[test]
    fn collapsed_descendant_expansion_survives_cache_eviction() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("a/b")).unwrap();
        File::create(temp.path().join("a/b/leaf.txt")).unwrap();

        let cache = Arc::new(NodeCache::new());
        let mut projector = TreeProjector::new(Arc::clone(&cache), temp.path()).unwrap();
        let root = canon(temp.path());

        projector.expand(&root.join("a"));
        projector.expand(&root.join("a/b"));
        projector.collapse(&root.join("a"));

        // An unrelated full eviction followed by a refresh of the root must
        // not cost "a/b" its remembered expansion — it still exists.
        cache.invalidate_all();
        projector.handle_children_changed(&root);

        projector.expand(&root.join("a"));
        let rows = names(&projector);
        assert_eq!(
            rows[1..],
            [
                ("a".to_string(), 1),
                ("b".to_string(), 2),
                ("leaf.txt".to_string(), 3)
            ]
        );
        assert_sound(&projector);
    }

    #[test]
    fn notice_for_collapsed_directory_changes_nothing() {
        let (temp, cache, mut projector) = fixture();
        let root = canon(temp.path());
        let before = projector.rows().to_vec();

        File::create(temp.path().join("src/lib.rs")).unwrap();
        cache.apply_upsert(meta::stat(&root.join("src/lib.rs")).unwrap());
        projector.handle_children_changed(&root.join("src"));

        assert_eq!(projector.rows(), &before[..]);
    }

    #[test]
    fn set_cut_flags_matching_rows() {
        let (temp, _cache, mut projector) = fixture();
        let root = canon(temp.path());

        projector.set_cut(&[root.join("README.md")]);
        let flagged: Vec<&str> = projector
            .rows()
            .iter()
            .filter(|row| row.cut)
            .map(|row| row.name.as_str())
            .collect();
        assert_eq!(flagged, vec!["README.md"]);

        projector.set_cut(&[]);
        assert!(projector.rows().iter().all(|row| !row.cut));
    }

    #[test]
    fn rebuild_order_is_stable() {
        let (temp, _cache, mut projector) = fixture();
        let root = canon(temp.path());

        let before = names(&projector);
        projector.handle_children_changed(&root);
        assert_eq!(names(&projector), before);
    }
}

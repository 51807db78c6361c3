//! In-memory node cache.
//!
//! Two parallel path-keyed maps — node snapshots and ordered children lists —
//! behind a single `parking_lot::Mutex`. Stats happen outside the lock and
//! the finished result is swapped in atomically; when two threads race to
//! build the same path, last write wins and both results are individually
//! valid. The lock is never held across a syscall.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{canonicalize_node_path, Result};
use crate::meta;
use crate::node::VirtualNode;

/// Shared cache of filesystem metadata and directory listings.
///
/// The cache exclusively owns the node snapshots and the children index.
/// Consumers read through `get_node`/`get_children`; only the reconciler
/// mutates via `apply_upsert`/`apply_remove`.
#[derive(Default)]
pub struct NodeCache {
    inner: Mutex<CacheMaps>,
}

#[derive(Default)]
struct CacheMaps {
    nodes: HashMap<PathBuf, VirtualNode>,
    /// Ordered immediate-children paths per cached directory. Invariant: a
    /// key present here is present in `nodes` as a `Directory`.
    children: HashMap<PathBuf, Vec<PathBuf>>,
}

impl NodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached node for `path`, statting and building it on a miss.
    ///
    /// Building a directory lists and stats its immediate children (one level,
    /// never the whole subtree) and seeds their cache entries, so a follow-up
    /// `get_node` for a child is a hit.
    pub fn get_node(&self, path: &Path) -> Result<VirtualNode> {
        let path = canonicalize_node_path(path.to_path_buf());
        if let Some(node) = self.inner.lock().nodes.get(&path) {
            return Ok(node.clone());
        }
        self.build(&path)
    }

    /// Returns the immediate children of `path` as node snapshots.
    ///
    /// Uses the cached children list when present, building it otherwise.
    /// Entries whose path no longer resolves are skipped — the listing never
    /// contains an orphan. Files yield an empty listing.
    pub fn get_children(&self, path: &Path) -> Result<Vec<VirtualNode>> {
        let path = canonicalize_node_path(path.to_path_buf());
        let cached = self.inner.lock().children.get(&path).cloned();

        let child_paths = match cached {
            Some(paths) => paths,
            None => {
                let node = self.build(&path)?;
                if !node.is_dir() {
                    return Ok(Vec::new());
                }
                node.children().to_vec()
            }
        };

        // Resolve under the lock first, re-stat stragglers after releasing it.
        let mut resolved = Vec::with_capacity(child_paths.len());
        let mut missing = Vec::new();
        {
            let inner = self.inner.lock();
            for child in &child_paths {
                match inner.nodes.get(child) {
                    Some(node) => resolved.push(node.clone()),
                    None => missing.push(child.clone()),
                }
            }
        }
        for child in missing {
            match self.build(&child) {
                Ok(node) => resolved.push(node),
                Err(error) if error.is_vanished() => {
                    log::debug!("dropping vanished child {}: {error}", child.display());
                }
                Err(error) => return Err(error),
            }
        }

        resolved.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(resolved)
    }

    /// Evicts `path` and every cached descendant from both maps.
    ///
    /// Runs as one critical section so no reader observes a half-evicted
    /// subtree. Idempotent: evicting an absent path is a no-op. The next
    /// `get_node`/`get_children` for any evicted path forces a fresh stat.
    pub fn invalidate(&self, path: &Path) {
        let path = canonicalize_node_path(path.to_path_buf());
        self.inner.lock().evict_subtree(&path);
    }

    /// Clears both maps.
    pub fn invalidate_all(&self) {
        let mut inner = self.inner.lock();
        inner.nodes.clear();
        inner.children.clear();
    }

    /// Inserts or replaces a freshly stated node.
    ///
    /// Replacing a directory keeps its cached children list — a directory
    /// `Modified` signals metadata change, not membership change. The path is
    /// attached to the parent's cached children list in sorted position when
    /// that list exists (a parent listed lazily later picks it up anyway).
    pub fn apply_upsert(&self, node: VirtualNode) {
        let mut inner = self.inner.lock();
        inner.upsert(node);
    }

    /// Removes `path` and its cached descendants, detaching it from the
    /// parent's children list.
    pub fn apply_remove(&self, path: &Path) {
        let path = canonicalize_node_path(path.to_path_buf());
        let mut inner = self.inner.lock();
        inner.evict_subtree(&path);
        inner.detach_from_parent(&path);
    }

    /// True if `path` currently has a cached node (no IO).
    pub fn contains(&self, path: &Path) -> bool {
        self.inner.lock().nodes.contains_key(path)
    }

    /// Number of cached nodes (no IO).
    pub fn len(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().nodes.is_empty()
    }

    /// Stats `path` (and its immediate children for directories) outside the
    /// lock, then swaps the result in atomically.
    fn build(&self, path: &PathBuf) -> Result<VirtualNode> {
        let mut node = meta::stat(path)?;

        if !node.is_dir() {
            let mut inner = self.inner.lock();
            inner.upsert(node.clone());
            return Ok(node);
        }

        let listing = meta::list_children(node.path())?;
        let mut child_nodes = Vec::with_capacity(listing.len());
        for child in listing {
            match meta::stat(&child) {
                Ok(child_node) => child_nodes.push(child_node),
                Err(error) if error.is_vanished() => {
                    log::debug!("skipping {}: {error}", child.display());
                }
                Err(error) => return Err(error),
            }
        }
        let child_paths: Vec<PathBuf> =
            child_nodes.iter().map(|n| n.path().to_path_buf()).collect();

        let mut inner = self.inner.lock();

        // Aggregate size: file children contribute their size, directory
        // children whatever aggregate is already cached for them.
        let mut size = 0u64;
        for child in &child_nodes {
            size += if child.is_file() {
                child.meta().size
            } else {
                inner
                    .nodes
                    .get(child.path())
                    .map(|cached| cached.meta().size)
                    .unwrap_or(0)
            };
        }
        node.meta_mut().size = size;
        if let Some(children) = node.children_mut() {
            *children = child_paths.clone();
        }

        for child in child_nodes {
            inner.upsert_preserving_children(child);
        }
        inner.children.insert(path.clone(), child_paths);
        inner.nodes.insert(path.clone(), node.clone());
        Ok(node)
    }
}

impl CacheMaps {
    fn upsert(&mut self, node: VirtualNode) {
        let path = node.path().to_path_buf();
        let parent = node.meta().parent.clone();
        self.upsert_preserving_children(node);

        if let Some(parent) = parent {
            if let Some(siblings) = self.children.get_mut(&parent) {
                if let Err(position) = siblings.binary_search(&path) {
                    siblings.insert(position, path.clone());
                }
            }
            if let Some(parent_node) = self.nodes.get_mut(&parent) {
                if let Some(embedded) = parent_node.children_mut() {
                    if let Err(position) = embedded.binary_search(&path) {
                        embedded.insert(position, path);
                    }
                }
            }
        }
    }

    /// Inserts `node`, carrying over the previous children list when a
    /// directory replaces a directory (a re-stat does not re-list membership).
    fn upsert_preserving_children(&mut self, mut node: VirtualNode) {
        let path = node.path().to_path_buf();
        if node.is_dir() {
            if let Some(VirtualNode::Directory { meta, children }) = self.nodes.get(&path) {
                // A bare re-stat knows neither membership nor the aggregate
                // size; keep the cached values.
                let preserved_size = meta.size;
                let preserved = children.clone();
                if let Some(fresh) = node.children_mut() {
                    *fresh = preserved;
                }
                node.meta_mut().size = preserved_size;
            }
        } else {
            // A file replacing a stale directory entry drops the listing.
            self.children.remove(&path);
        }
        self.nodes.insert(path, node);
    }

    fn evict_subtree(&mut self, root: &Path) {
        self.remove_cached_tree(root);

        // Sweep for stragglers the children walk could not reach (seeded
        // entries whose parent listing was already evicted).
        let stray: Vec<PathBuf> = self
            .nodes
            .keys()
            .filter(|key| key.starts_with(root))
            .cloned()
            .collect();
        for key in stray {
            self.nodes.remove(&key);
            self.children.remove(&key);
        }
    }

    fn remove_cached_tree(&mut self, path: &Path) {
        if let Some(children) = self.children.remove(path) {
            for child in children {
                self.remove_cached_tree(&child);
            }
        }
        self.nodes.remove(path);
    }

    fn detach_from_parent(&mut self, path: &Path) {
        let Some(parent) = path.parent() else {
            return;
        };
        if let Some(siblings) = self.children.get_mut(parent) {
            siblings.retain(|child| child != path);
        }
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            if let Some(embedded) = parent_node.children_mut() {
                embedded.retain(|child| child != path);
            }
        }
    }
}

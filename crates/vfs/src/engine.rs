//! Engine facade.
//!
//! `VfsEngine` ties the pieces together: one shared `NodeCache`, and per
//! watched root a notify watcher plus a reconciler task feeding a broadcast
//! of `ChangeNotice`s. Consumers either observe a root as a stream of
//! listings or subscribe to raw notices and drive a `TreeProjector`.
//!
//! Mutations for independent roots proceed in parallel; per root, the
//! reconciler's single-consumer queue keeps cache mutations serial.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use crate::cache::NodeCache;
use crate::error::{canonicalize_existing_path, canonicalize_node_path, Result, VfsError};
use crate::node::VirtualNode;
use crate::ops;
use crate::reconcile::{spawn_reconciler, ChangeNotice, ReconcilerHandle, RootState};
use crate::watch::{watch_root, RootWatcher};

/// Capacity of the per-root notice broadcast. A lagging subscriber is sent a
/// fresh full listing rather than replayed notices.
const NOTICE_CAPACITY: usize = 256;

/// Capacity of each observer's listing stream.
const LISTING_CAPACITY: usize = 64;

/// The virtual filesystem cache and change-reconciliation engine.
///
/// Constructed once per watched-root set; `shutdown` cancels all watcher
/// tasks and releases the OS watch handles.
#[derive(Default)]
pub struct VfsEngine {
    cache: Arc<NodeCache>,
    roots: Mutex<HashMap<PathBuf, WatchedRoot>>,
}

struct WatchedRoot {
    notice_tx: broadcast::Sender<ChangeNotice>,
    reconciler: ReconcilerHandle,
    /// Keeps the OS watch registered; dropped on unwatch.
    watcher: RootWatcher,
}

impl VfsEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared node cache. Hand this to a `TreeProjector`.
    pub fn cache(&self) -> Arc<NodeCache> {
        Arc::clone(&self.cache)
    }

    // -------------------------------------------------------------------
    // Cache passthroughs
    // -------------------------------------------------------------------

    pub fn get_node(&self, path: &Path) -> Result<VirtualNode> {
        self.cache.get_node(path)
    }

    pub fn get_children(&self, path: &Path) -> Result<Vec<VirtualNode>> {
        self.cache.get_children(path)
    }

    pub fn invalidate(&self, path: &Path) {
        self.cache.invalidate(path);
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    // -------------------------------------------------------------------
    // Watching
    // -------------------------------------------------------------------

    /// Observes a directory as a stream of listings.
    ///
    /// The first emission is the current listing; every subsequent emission
    /// follows a coalesced change anywhere under the root. A watch failure
    /// surfaces once as `Err` and ends the stream — cached data stays
    /// browsable but no longer auto-refreshes. Dropping the receiver ends
    /// this subscription; the root itself stays watched until `unwatch`.
    pub async fn observe_directory(
        &self,
        root: &Path,
    ) -> Result<mpsc::Receiver<Result<Vec<VirtualNode>>>> {
        let root = canonicalize_existing_path(root.to_path_buf());
        if !self.cache.get_node(&root)?.is_dir() {
            return Err(VfsError::InvalidPath(format!(
                "not a directory: {}",
                root.display()
            )));
        }

        let mut notices = self.ensure_watched(&root)?;
        let initial = self.cache.get_children(&root)?;
        let (listing_tx, listing_rx) = mpsc::channel(LISTING_CAPACITY);
        let cache = Arc::clone(&self.cache);

        tokio::spawn(async move {
            if listing_tx.send(Ok(initial)).await.is_err() {
                return;
            }
            loop {
                match notices.recv().await {
                    Ok(ChangeNotice::ChildrenChanged { parent }) => {
                        if !parent.starts_with(&root) {
                            continue;
                        }
                        if listing_tx.send(root_listing(&cache, &root)).await.is_err() {
                            return;
                        }
                    }
                    Ok(ChangeNotice::WatchFailed { message, .. }) => {
                        let _ = listing_tx.send(Err(VfsError::Watch(message))).await;
                        return;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::debug!("observer lagged {skipped} notices for {}", root.display());
                        if listing_tx.send(root_listing(&cache, &root)).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Ok(listing_rx)
    }

    /// Subscribes to the raw coalesced notices for a root, starting its
    /// watcher if needed. This is how a `TreeProjector` driver replays
    /// changes.
    pub fn subscribe(&self, root: &Path) -> Result<broadcast::Receiver<ChangeNotice>> {
        let root = canonicalize_existing_path(root.to_path_buf());
        self.ensure_watched(&root)
    }

    /// Current reconciler state for a watched root, `None` if not watched.
    pub fn root_state(&self, root: &Path) -> Option<RootState> {
        let root = canonicalize_existing_path(root.to_path_buf());
        self.roots.lock().get(&root).map(|w| w.reconciler.state())
    }

    /// Stops watching a root. The OS watch handle is released immediately;
    /// the reconciler finishes its current pass and stops (an invalidation
    /// in flight always runs to completion). Cached data remains browsable.
    pub fn unwatch(&self, root: &Path) {
        let root = canonicalize_existing_path(root.to_path_buf());
        if let Some(watched) = self.roots.lock().remove(&root) {
            log::debug!("unwatched {}", watched.watcher.root().display());
        }
    }

    /// Tears down every watched root.
    pub fn shutdown(&self) {
        self.roots.lock().clear();
    }

    fn ensure_watched(&self, root: &PathBuf) -> Result<broadcast::Receiver<ChangeNotice>> {
        let mut roots = self.roots.lock();
        if let Some(watched) = roots.get(root) {
            return Ok(watched.notice_tx.subscribe());
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = broadcast::channel(NOTICE_CAPACITY);
        let watcher = watch_root(root, event_tx)?;
        let reconciler = spawn_reconciler(
            root.clone(),
            Arc::clone(&self.cache),
            event_rx,
            notice_tx.clone(),
        );

        roots.insert(
            root.clone(),
            WatchedRoot {
                notice_tx,
                reconciler,
                watcher,
            },
        );
        Ok(notice_rx)
    }

    // -------------------------------------------------------------------
    // Mutating passthroughs
    // -------------------------------------------------------------------
    //
    // Each performs the filesystem operation and, only on success,
    // invalidates the affected parents and broadcasts the corresponding
    // notices as one unit. A failed operation leaves the cache untouched.

    pub fn create_file(&self, path: &Path) -> Result<()> {
        ops::create_file(path)?;
        self.refresh_parent_of(path);
        Ok(())
    }

    pub fn create_directory(&self, path: &Path) -> Result<()> {
        ops::create_dir(path)?;
        self.refresh_parent_of(path);
        Ok(())
    }

    /// Renames an entry within its directory.
    pub fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.relocate(from, to)
    }

    /// Moves an entry to a new parent. Observed as a delete plus a create by
    /// external watchers; the cache is refreshed for both parents here.
    pub fn move_entry(&self, from: &Path, to: &Path) -> Result<()> {
        self.relocate(from, to)
    }

    pub fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        ops::copy_entry(from, to)?;
        self.refresh_parent_of(from);
        self.refresh_parent_of(to);
        Ok(())
    }

    pub fn delete(&self, path: &Path) -> Result<()> {
        ops::delete_entry(path)?;
        self.cache.invalidate(path);
        self.refresh_parent_of(path);
        Ok(())
    }

    fn relocate(&self, from: &Path, to: &Path) -> Result<()> {
        ops::rename_entry(from, to)?;
        self.cache.invalidate(from);
        self.refresh_parent_of(from);
        self.refresh_parent_of(to);
        Ok(())
    }

    /// Invalidates a mutated path's parent and notifies every watched root
    /// that covers it.
    fn refresh_parent_of(&self, path: &Path) {
        let Some(parent) = path.parent() else {
            return;
        };
        let parent = canonicalize_node_path(parent.to_path_buf());
        self.cache.invalidate(&parent);

        let roots = self.roots.lock();
        for (root, watched) in roots.iter() {
            if parent.starts_with(root) {
                let _ = watched.notice_tx.send(ChangeNotice::ChildrenChanged {
                    parent: parent.clone(),
                });
            }
        }
    }
}

fn root_listing(cache: &NodeCache, root: &Path) -> Result<Vec<VirtualNode>> {
    match cache.get_children(root) {
        Ok(listing) => Ok(listing),
        // The root itself vanished: an empty listing, not a stream error.
        Err(error) if error.is_vanished() => Ok(Vec::new()),
        Err(error) => Err(error),
    }
}

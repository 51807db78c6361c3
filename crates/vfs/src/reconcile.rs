//! Change reconciliation.
//!
//! One background task per watched root consumes that root's event queue
//! serially (single consumer, FIFO), re-stats affected paths, applies the
//! result to the shared `NodeCache`, and broadcasts one coalesced
//! "children changed" notice per affected parent per processing pass.
//!
//! The task never trusts event payloads: a `Created` for a path that is
//! already gone re-stats to `NotFound` and is treated as a delete, which is
//! what makes reordered or coalesced OS events safe to apply.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::cache::NodeCache;
use crate::meta;
use crate::watch::{VfsEvent, VfsEventKind, WatchMessage};

/// Per-root reconciler state.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum RootState {
    Idle = 0,
    Watching = 1,
    Updating = 2,
    Stopped = 3,
}

impl RootState {
    /// Loads the state from an atomic.
    pub fn load(atomic: &AtomicU8) -> Self {
        match atomic.load(Ordering::Relaxed) {
            1 => Self::Watching,
            2 => Self::Updating,
            3 => Self::Stopped,
            _ => Self::Idle,
        }
    }

    fn store(self, atomic: &AtomicU8) {
        atomic.store(self as u8, Ordering::Relaxed);
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Watching => "watching",
            Self::Updating => "updating",
            Self::Stopped => "stopped",
        }
    }
}

/// A derived notification fanned out to consumers after a processing pass.
#[derive(Debug, Clone)]
pub enum ChangeNotice {
    /// The listing of `parent` changed (membership or a child's metadata).
    ChildrenChanged { parent: PathBuf },
    /// The OS watch for `root` failed. Terminal: cached data under the root
    /// stays browsable but no longer auto-refreshes.
    WatchFailed { root: PathBuf, message: String },
}

/// Handle to a spawned reconciler task.
///
/// Cancellation is cooperative: closing the event queue (dropping the
/// watcher) lets the current pass run to completion before the task exits,
/// so an invalidation is never left half-done.
pub struct ReconcilerHandle {
    state: Arc<AtomicU8>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    pub fn state(&self) -> RootState {
        RootState::load(&self.state)
    }

    /// Waits for the task to finish after its event queue has closed.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Spawns the reconciliation task for one watched root.
pub fn spawn_reconciler(
    root: PathBuf,
    cache: Arc<NodeCache>,
    mut event_rx: UnboundedReceiver<WatchMessage>,
    notice_tx: broadcast::Sender<ChangeNotice>,
) -> ReconcilerHandle {
    let state = Arc::new(AtomicU8::new(RootState::Idle as u8));
    let task_state = Arc::clone(&state);

    let task = tokio::spawn(async move {
        RootState::Watching.store(&task_state);

        while let Some(first) = event_rx.recv().await {
            RootState::Updating.store(&task_state);

            // Drain whatever else is already queued into the same pass so
            // notices for one parent coalesce.
            let mut batch = vec![first];
            while let Ok(message) = event_rx.try_recv() {
                batch.push(message);
            }

            let mut changed_parents = BTreeSet::new();
            let mut failure = None;
            for message in batch {
                match message {
                    WatchMessage::Event(event) => {
                        if let Some(parent) = apply_event(&cache, &event) {
                            changed_parents.insert(parent);
                        }
                    }
                    WatchMessage::Error(message) => {
                        failure = Some(message);
                        break;
                    }
                }
            }

            for parent in changed_parents {
                let _ = notice_tx.send(ChangeNotice::ChildrenChanged { parent });
            }

            if let Some(message) = failure {
                log::warn!("watch failed for {}: {message}", root.display());
                let _ = notice_tx.send(ChangeNotice::WatchFailed {
                    root: root.clone(),
                    message,
                });
                break;
            }

            RootState::Watching.store(&task_state);
        }

        RootState::Stopped.store(&task_state);
    });

    ReconcilerHandle { state, task }
}

/// Applies one event to the cache, returning the parent whose listing
/// changed (to be coalesced by the caller).
///
/// `Created`/`Modified` re-stat the path and replace the cached node; a
/// vanished path is treated exactly like `Deleted`. A directory `Modified`
/// does not re-list membership — membership changes arrive as separate
/// child events.
fn apply_event(cache: &NodeCache, event: &VfsEvent) -> Option<PathBuf> {
    let Some(parent) = event.path.parent().map(Path::to_path_buf) else {
        // Event for a filesystem root; nothing sensible to reconcile.
        return None;
    };

    // An event may arrive before its parent was ever listed. Stat the parent
    // in anyway — an event is never dropped over missing bookkeeping.
    if !cache.contains(&parent) {
        if let Err(error) = cache.get_node(&parent) {
            if error.is_vanished() {
                // The whole branch is gone; evict and report the level above.
                cache.apply_remove(&parent);
                return parent.parent().map(Path::to_path_buf);
            }
            log::warn!("failed to stat parent {}: {error}", parent.display());
            return None;
        }
    }

    match event.kind {
        VfsEventKind::Created | VfsEventKind::Modified => match meta::stat(&event.path) {
            Ok(node) => {
                cache.apply_upsert(node);
                Some(parent)
            }
            Err(error) if error.is_vanished() => {
                cache.apply_remove(&event.path);
                Some(parent)
            }
            Err(error) => {
                log::warn!("failed to stat {}: {error}", event.path.display());
                None
            }
        },
        VfsEventKind::Deleted => {
            cache.apply_remove(&event.path);
            Some(parent)
        }
    }
}

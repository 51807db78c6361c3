//! Change watching.
//!
//! Wraps a `notify` recursive watcher per watched root. Callbacks normalize
//! raw OS events into the canonical three-variant `VfsEvent` and send them
//! into a channel consumed by a single reconciler task — the callback never
//! touches shared cache state.

use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{Result, VfsError};
use crate::meta::unix_now_secs;

/// Canonical change kind. A rename is observed as a delete plus a create;
/// the engine never reconstructs it as a single operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VfsEventKind {
    Created,
    Modified,
    Deleted,
}

/// A normalized change notification for one path.
///
/// No ordering guarantee across distinct paths; per-path ordering is
/// best-effort since the OS may coalesce rapid successive events. The
/// reconciler re-stats instead of trusting the payload, so reordering is
/// tolerated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfsEvent {
    pub kind: VfsEventKind,
    pub path: PathBuf,
    /// Unix seconds at observation time.
    pub observed_at: u64,
}

impl VfsEvent {
    pub fn new(kind: VfsEventKind, path: PathBuf) -> Self {
        Self {
            kind,
            path,
            observed_at: unix_now_secs(),
        }
    }
}

/// What the watcher sends to the reconciler.
#[derive(Debug)]
pub enum WatchMessage {
    Event(VfsEvent),
    /// The OS watch subsystem errored; terminal for this root's stream.
    Error(String),
}

/// Keeps the OS watch registered. Dropping it deregisters the watch and ends
/// the event stream promptly — no polling, no leaked handles.
pub struct RootWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl RootWatcher {
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Registers a recursive watch on `root`, forwarding normalized events into
/// `event_tx`.
pub fn watch_root(root: &Path, event_tx: UnboundedSender<WatchMessage>) -> Result<RootWatcher> {
    let mut watcher = recommended_watcher(move |event_result: notify::Result<Event>| {
        match event_result {
            Ok(event) => {
                for vfs_event in normalize_event(event) {
                    if event_tx.send(WatchMessage::Event(vfs_event)).is_err() {
                        // Reconciler gone; nothing left to notify.
                        return;
                    }
                }
            }
            Err(error) => {
                let _ = event_tx.send(WatchMessage::Error(error.to_string()));
            }
        }
    })
    .map_err(|error| VfsError::Watch(format!("failed to create watcher: {error}")))?;

    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(|error| VfsError::Watch(format!("failed to watch {}: {error}", root.display())))?;

    log::debug!("watching {}", root.display());
    Ok(RootWatcher {
        _watcher: watcher,
        root: root.to_path_buf(),
    })
}

/// Normalizes a raw notify event into canonical per-path events.
///
/// Access events carry no cache-relevant change and are dropped. Unknown
/// kinds map to `Modified`: the reconciler's re-stat makes an over-eager
/// `Modified` harmless, whereas a dropped event would go stale.
pub fn normalize_event(event: Event) -> Vec<VfsEvent> {
    let kind = match event.kind {
        EventKind::Access(_) => return Vec::new(),
        EventKind::Create(_) => VfsEventKind::Created,
        EventKind::Remove(_) => VfsEventKind::Deleted,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => VfsEventKind::Deleted,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => VfsEventKind::Created,
        EventKind::Modify(_) => VfsEventKind::Modified,
        EventKind::Any | EventKind::Other => VfsEventKind::Modified,
    };

    event
        .paths
        .into_iter()
        .map(|path| VfsEvent::new(kind, path))
        .collect()
}

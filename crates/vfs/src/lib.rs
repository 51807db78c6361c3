//! Virtual filesystem cache with change reconciliation.
//!
//! The cache holds a lazily-built in-memory mirror of on-disk metadata and
//! keeps it consistent with external changes: a recursive watcher per
//! observed root feeds normalized events to a reconciler task, which
//! re-stats affected paths, applies the result to the shared [`NodeCache`],
//! and fans out coalesced [`ChangeNotice`]s. [`VfsEngine`] is the front
//! door; [`TreeProjector`] derives flat, display-ready tree rows from the
//! cache for an explorer-style consumer.
//!
//! Reads are cheap and lock-light: metadata lookups hit the cache or stat
//! outside the lock and swap the result in atomically. The reconciler never
//! trusts event payloads — it re-stats, so reordered or coalesced OS events
//! converge on what the disk actually holds.

pub mod cache;
pub mod engine;
pub mod error;
pub mod explorer;
pub mod meta;
pub mod node;
pub mod ops;
pub mod reconcile;
pub mod watch;

pub use cache::NodeCache;
pub use engine::VfsEngine;
pub use error::{Result, VfsError};
pub use explorer::{ExplorerRow, TreeProjector};
pub use node::{NodeMeta, VirtualNode};
pub use reconcile::{ChangeNotice, ReconcilerHandle, RootState};
pub use watch::{RootWatcher, VfsEvent, VfsEventKind, WatchMessage};

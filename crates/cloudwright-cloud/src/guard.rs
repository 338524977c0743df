//! Serialization of mutations per resource collection
//!
//! Discovery identifies new resources by diffing listings, which breaks as
//! soon as two creates against the same collection overlap. The guard holds
//! one async mutex per [`ResourceKind`]; entry points take every kind they
//! mutate for the whole operation, not just around the create call.
//!
//! Locks are not reentrant. Only entry points acquire them; the reconcilers
//! they call assume the caller already holds the right kinds.

use crate::model::ResourceKind;
use chrono::{DateTime, Utc};
use std::sync::{Arc, OnceLock};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-kind mutation locks
#[derive(Debug)]
pub struct SerializationGuard {
    locks: [Arc<Mutex<()>>; ResourceKind::COUNT],
}

impl SerializationGuard {
    pub fn new() -> Self {
        Self {
            locks: std::array::from_fn(|_| Arc::new(Mutex::new(()))),
        }
    }

    /// Process-wide guard shared by every controller that does not get one
    /// injected explicitly
    pub fn shared() -> Arc<SerializationGuard> {
        static SHARED: OnceLock<Arc<SerializationGuard>> = OnceLock::new();
        SHARED
            .get_or_init(|| Arc::new(SerializationGuard::new()))
            .clone()
    }

    /// Acquire every lock in `kinds`.
    ///
    /// Kinds are always taken in the same order regardless of how they are
    /// passed, so two callers locking overlapping sets cannot deadlock.
    pub async fn lock(&self, kinds: &[ResourceKind]) -> CollectionLock {
        let mut kinds = kinds.to_vec();
        kinds.sort();
        kinds.dedup();

        let mut guards = Vec::with_capacity(kinds.len());
        for kind in &kinds {
            guards.push(self.locks[kind.index()].clone().lock_owned().await);
        }

        tracing::debug!(kinds = ?kinds, "Acquired collection lock");
        CollectionLock {
            kinds,
            acquired_at: Utc::now(),
            guards,
        }
    }

    /// Whether `kind` is currently held by someone
    pub fn is_locked(&self, kind: ResourceKind) -> bool {
        self.locks[kind.index()].try_lock().is_err()
    }
}

impl Default for SerializationGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for one or more collection locks
#[derive(Debug)]
pub struct CollectionLock {
    kinds: Vec<ResourceKind>,
    acquired_at: DateTime<Utc>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl CollectionLock {
    pub fn kinds(&self) -> &[ResourceKind] {
        &self.kinds
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Release the locks
    pub fn release(mut self) {
        self.unlock();
    }

    fn unlock(&mut self) {
        if self.guards.is_empty() {
            return;
        }
        // Reverse of acquisition order
        while self.guards.pop().is_some() {}

        let held_ms = Utc::now()
            .signed_duration_since(self.acquired_at)
            .num_milliseconds();
        tracing::debug!(kinds = ?self.kinds, held_ms, "Released collection lock");
    }
}

impl Drop for CollectionLock {
    fn drop(&mut self) {
        self.unlock();
    }
}

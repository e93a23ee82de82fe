//! Per-note advisory locks.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{Error, Result};
use crate::memory::NoteId;

/// Registry size that triggers the first prune.
const PRUNE_FLOOR: usize = 256;

/// Registry of async mutexes keyed by note id.
///
/// Every writer of a note's link set holds that note's lock. Multiple locks
/// are always taken in ascending id order, so two passes touching
/// overlapping notes cannot deadlock.
#[derive(Default)]
pub struct NoteLocks {
    registry: Mutex<Registry>,
}

struct Registry {
    slots: HashMap<NoteId, Arc<AsyncMutex<()>>>,
    /// Size at which idle entries are next dropped
    prune_at: usize,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
            prune_at: PRUNE_FLOOR,
        }
    }
}

/// Guards for a set of notes; released together on drop.
pub struct LockSet {
    ids: BTreeSet<NoteId>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl LockSet {
    pub fn contains(&self, id: NoteId) -> bool {
        self.ids.contains(&id)
    }

    pub fn ids(&self) -> &BTreeSet<NoteId> {
        &self.ids
    }
}

impl NoteLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: NoteId) -> Result<Arc<AsyncMutex<()>>> {
        let mut registry = self
            .registry
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock registry: {}", e)))?;
        if registry.slots.len() >= registry.prune_at {
            // Drop entries nobody else references. Held entries survive, so
            // the next scan waits until the registry has doubled.
            registry.slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            registry.prune_at = (registry.slots.len() * 2).max(PRUNE_FLOOR);
        }
        Ok(Arc::clone(registry.slots.entry(id).or_default()))
    }

    /// Acquire the locks for `ids` in ascending order.
    pub async fn lock_many<I>(&self, ids: I) -> Result<LockSet>
    where
        I: IntoIterator<Item = NoteId>,
    {
        let ids: BTreeSet<NoteId> = ids.into_iter().collect();
        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            let slot = self.slot(*id)?;
            guards.push(slot.lock_owned().await);
        }
        Ok(LockSet {
            ids,
            _guards: guards,
        })
    }

    pub async fn lock(&self, id: NoteId) -> Result<LockSet> {
        self.lock_many([id]).await
    }

    /// Number of registry entries (held or idle).
    pub fn tracked(&self) -> usize {
        self.registry.lock().map(|r| r.slots.len()).unwrap_or(0)
    }
}

//! Note store contract and the in-memory implementation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::memory::types::{MemoryNote, NoteId};

/// Durable keyed storage for note records.
///
/// Pure CRUD: semantic invariants (link symmetry, no dangling links) are
/// the evolution engine's job, not the store's.
pub trait NoteStore: Send + Sync {
    /// Insert a note under a freshly assigned id. `note.id` is ignored.
    fn create(&self, note: &MemoryNote) -> Result<NoteId>;

    /// Fetch a note, or `Error::NotFound`.
    fn get(&self, id: NoteId) -> Result<MemoryNote>;

    /// Overwrite an existing note in full.
    fn put(&self, note: &MemoryNote) -> Result<()>;

    /// Overwrite several existing notes atomically: all or none are written.
    fn put_many(&self, notes: &[MemoryNote]) -> Result<()>;

    /// Remove a note. Returns false if it was absent.
    fn delete(&self, id: NoteId) -> Result<bool>;

    /// All notes, by ascending id.
    fn list(&self) -> Result<Vec<MemoryNote>>;

    /// Number of stored notes.
    fn len(&self) -> Result<usize> {
        Ok(self.list()?.len())
    }

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Process-local note store backed by a `BTreeMap`.
pub struct InMemoryNoteStore {
    notes: RwLock<BTreeMap<NoteId, MemoryNote>>,
    next_id: AtomicU64,
}

impl InMemoryNoteStore {
    pub fn new() -> Self {
        Self {
            notes: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn read_lock(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<NoteId, MemoryNote>>> {
        self.notes
            .read()
            .map_err(|e| Error::Internal(format!("Failed to lock note map: {}", e)))
    }

    fn write_lock(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<NoteId, MemoryNote>>> {
        self.notes
            .write()
            .map_err(|e| Error::Internal(format!("Failed to lock note map: {}", e)))
    }
}

impl Default for InMemoryNoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NoteStore for InMemoryNoteStore {
    fn create(&self, note: &MemoryNote) -> Result<NoteId> {
        let id = NoteId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut record = note.clone();
        record.id = id;
        self.write_lock()?.insert(id, record);
        Ok(id)
    }

    fn get(&self, id: NoteId) -> Result<MemoryNote> {
        self.read_lock()?
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(id))
    }

    fn put(&self, note: &MemoryNote) -> Result<()> {
        let mut notes = self.write_lock()?;
        match notes.get_mut(&note.id) {
            Some(slot) => {
                *slot = note.clone();
                Ok(())
            }
            None => Err(Error::not_found(note.id)),
        }
    }

    fn put_many(&self, batch: &[MemoryNote]) -> Result<()> {
        let mut notes = self.write_lock()?;
        if let Some(missing) = batch.iter().find(|n| !notes.contains_key(&n.id)) {
            return Err(Error::not_found(missing.id));
        }
        for note in batch {
            notes.insert(note.id, note.clone());
        }
        Ok(())
    }

    fn delete(&self, id: NoteId) -> Result<bool> {
        Ok(self.write_lock()?.remove(&id).is_some())
    }

    fn list(&self) -> Result<Vec<MemoryNote>> {
        Ok(self.read_lock()?.values().cloned().collect())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.read_lock()?.len())
    }
}

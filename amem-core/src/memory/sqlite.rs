//! SQLite-backed note store implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::memory::schema::initialize_schema;
use crate::memory::store::NoteStore;
use crate::memory::types::*;

const NOTE_COLUMNS: &str = "id, content, timestamp, keywords, tags, context, category,
                            links, evolution_history, provenance, created_at, updated_at";

/// SQLite-backed note store.
pub struct SqliteNoteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteNoteStore {
    /// Open or create a note store at the given path. `~` is expanded.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let raw = path.as_ref().to_string_lossy();
        let expanded = shellexpand::tilde(raw.as_ref()).into_owned();
        let conn = Connection::open(expanded)?;
        // Applied migrations are skipped, so existing databases only pick up new ones.
        initialize_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;
        f(&mut conn)
    }

    fn write_note(conn: &Connection, note: &MemoryNote) -> Result<usize> {
        let rows = conn.execute(
            "UPDATE notes SET
                content = ?2, timestamp = ?3, keywords = ?4, tags = ?5, context = ?6,
                category = ?7, links = ?8, evolution_history = ?9, provenance = ?10,
                created_at = ?11, updated_at = ?12
             WHERE id = ?1",
            params![
                note.id.0 as i64,
                note.content,
                note.timestamp,
                serde_json::to_string(&note.keywords)?,
                serde_json::to_string(&note.tags)?,
                note.context,
                note.category,
                serde_json::to_string(&note.links)?,
                serde_json::to_string(&note.evolution_history)?,
                serde_json::to_string(&note.provenance)?,
                note.created_at.to_rfc3339(),
                note.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(rows)
    }

    fn row_to_note(row: &rusqlite::Row) -> rusqlite::Result<RawNote> {
        Ok(RawNote {
            id: row.get(0)?,
            content: row.get(1)?,
            timestamp: row.get(2)?,
            keywords: row.get(3)?,
            tags: row.get(4)?,
            context: row.get(5)?,
            category: row.get(6)?,
            links: row.get(7)?,
            evolution_history: row.get(8)?,
            provenance: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

/// Row as stored, before JSON columns are decoded.
struct RawNote {
    id: i64,
    content: String,
    timestamp: String,
    keywords: String,
    tags: String,
    context: String,
    category: String,
    links: String,
    evolution_history: String,
    provenance: String,
    created_at: String,
    updated_at: String,
}

impl RawNote {
    fn decode(self) -> Result<MemoryNote> {
        let keywords: BTreeSet<String> = serde_json::from_str(&self.keywords)?;
        let tags: BTreeSet<String> = serde_json::from_str(&self.tags)?;
        let links: BTreeSet<NoteId> = serde_json::from_str(&self.links)?;

        Ok(MemoryNote {
            id: NoteId(self.id as u64),
            content: self.content,
            timestamp: self.timestamp,
            keywords,
            tags,
            context: self.context,
            category: self.category,
            links,
            evolution_history: serde_json::from_str(&self.evolution_history)?,
            provenance: serde_json::from_str(&self.provenance)?,
            created_at: parse_datetime(&self.created_at),
            updated_at: parse_datetime(&self.updated_at),
        })
    }
}

impl NoteStore for SqliteNoteStore {
    fn create(&self, note: &MemoryNote) -> Result<NoteId> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notes (
                    content, timestamp, keywords, tags, context, category,
                    links, evolution_history, provenance, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    note.content,
                    note.timestamp,
                    serde_json::to_string(&note.keywords)?,
                    serde_json::to_string(&note.tags)?,
                    note.context,
                    note.category,
                    serde_json::to_string(&note.links)?,
                    serde_json::to_string(&note.evolution_history)?,
                    serde_json::to_string(&note.provenance)?,
                    note.created_at.to_rfc3339(),
                    note.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(NoteId(conn.last_insert_rowid() as u64))
        })
    }

    fn get(&self, id: NoteId) -> Result<MemoryNote> {
        let raw = self.with_conn(|conn| {
            let raw = conn
                .query_row(
                    &format!("SELECT {} FROM notes WHERE id = ?1", NOTE_COLUMNS),
                    params![id.0 as i64],
                    Self::row_to_note,
                )
                .optional()?;
            Ok(raw)
        })?;

        raw.ok_or_else(|| Error::not_found(id))?.decode()
    }

    fn put(&self, note: &MemoryNote) -> Result<()> {
        self.with_conn(|conn| {
            if Self::write_note(conn, note)? == 0 {
                return Err(Error::not_found(note.id));
            }
            Ok(())
        })
    }

    fn put_many(&self, notes: &[MemoryNote]) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            for note in notes {
                if Self::write_note(&tx, note)? == 0 {
                    // Dropping the transaction rolls back earlier writes
                    return Err(Error::not_found(note.id));
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn delete(&self, id: NoteId) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute("DELETE FROM notes WHERE id = ?1", params![id.0 as i64])?;
            Ok(rows > 0)
        })
    }

    fn list(&self) -> Result<Vec<MemoryNote>> {
        let raws = self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {} FROM notes ORDER BY id", NOTE_COLUMNS))?;
            let raws = stmt
                .query_map([], Self::row_to_note)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(raws)
        })?;

        raws.into_iter().map(RawNote::decode).collect()
    }

    fn len(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM notes", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

//! Memory notes and their storage.
//!
//! A note is a short piece of text with descriptive attributes (context,
//! keywords, tags, category) and a set of links to related notes. The
//! link set lives inside each note's own record; the evolution engine is
//! its only writer.
//!
//! Two stores are provided:
//!
//! - [`InMemoryNoteStore`]: process-local, for tests and ephemeral agents
//! - [`SqliteNoteStore`]: durable, one row per note
//!
//! ## Example
//!
//! ```rust,ignore
//! use amem_core::memory::{MemoryNote, NoteStore, SqliteNoteStore};
//!
//! let store = SqliteNoteStore::open("~/.amem/notes.db")?;
//! let id = store.create(&MemoryNote::new("I like R&B music").with_category("Personal"))?;
//! let note = store.get(id)?;
//! ```

mod schema;
mod sqlite;
mod store;
mod types;

pub use schema::{get_schema_version, initialize_schema, is_initialized, SCHEMA_VERSION};
pub use sqlite::SqliteNoteStore;
pub use store::{InMemoryNoteStore, NoteStore};
pub use types::{
    current_timestamp, validate_timestamp, EvolutionEvent, FieldProvenance, MemoryNote, NewNote,
    NoteAttribute, NoteId, NoteUpdate, Provenance, SkippedCandidate, DEFAULT_CATEGORY,
    TIMESTAMP_FORMAT,
};

//! Note table layout and versioned migrations.

use rusqlite::{Connection, Result as SqliteResult};

/// Version the database reaches after [`initialize_schema`].
pub const SCHEMA_VERSION: i32 = 1;

/// Ordered migrations; entry `i` brings the database to version `i + 1`.
///
/// Set-valued fields and history are JSON text columns. `AUTOINCREMENT`
/// keeps SQLite from handing out the id of a deleted note again.
const MIGRATIONS: &[&str] = &["
    CREATE TABLE IF NOT EXISTS notes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        content TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        keywords TEXT NOT NULL DEFAULT '[]',
        tags TEXT NOT NULL DEFAULT '[]',
        context TEXT NOT NULL DEFAULT '',
        category TEXT NOT NULL,
        links TEXT NOT NULL DEFAULT '[]',
        evolution_history TEXT NOT NULL DEFAULT '[]',
        provenance TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_notes_category ON notes(category);
    CREATE INDEX IF NOT EXISTS idx_notes_timestamp ON notes(timestamp);
"];

/// Bring the database up to [`SCHEMA_VERSION`], applying each missing
/// migration in its own transaction.
pub fn initialize_schema(conn: &Connection) -> SqliteResult<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let applied = get_schema_version(conn)?;
    for (step, sql) in MIGRATIONS.iter().enumerate() {
        let version = step as i32 + 1;
        if version <= applied {
            continue;
        }
        conn.execute_batch(&format!(
            "BEGIN;\n{}\nINSERT INTO schema_version (version) VALUES ({});\nCOMMIT;",
            sql, version
        ))?;
    }
    Ok(())
}

/// Highest applied migration, or 0 for a fresh database.
pub fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

/// Whether the notes table exists.
pub fn is_initialized(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'notes')",
        [],
        |row| row.get::<_, bool>(0),
    )
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_database_reaches_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(!is_initialized(&conn));

        initialize_schema(&conn).unwrap();
        assert!(is_initialized(&conn));
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_rerun_applies_nothing() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();

        let rows: i32 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, MIGRATIONS.len() as i32);
    }

    #[test]
    fn test_notes_ids_autoincrement() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let sql: String = conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = 'notes'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(sql.contains("AUTOINCREMENT"));
    }
}

//! SQLite plumbing for the persistent vector store: connection setup with the
//! sqlite-vec extension, schema, migrations and health checks.

pub mod migrations;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Open (or create) the vector database at the given path, with sqlite-vec
/// loaded and schema initialized.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    load_sqlite_vec();

    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    // Enable WAL mode for better concurrent read performance
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_millis(5000))?;

    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;

    tracing::info!(path = %path.display(), "database initialized");
    Ok(conn)
}

/// Open a fully migrated in-memory database.
pub fn open_memory_database() -> Result<Connection> {
    load_sqlite_vec();
    let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;
    Ok(conn)
}

/// Result of [`check_database_health`].
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseHealth {
    /// `"ok"` when `PRAGMA integrity_check` passes, otherwise its first message.
    pub integrity: String,
    pub sqlite_vec_version: String,
    pub schema_version: u32,
    pub embedding_model: Option<String>,
    pub collections: usize,
    pub documents: usize,
}

impl DatabaseHealth {
    pub fn is_healthy(&self) -> bool {
        self.integrity == "ok" && self.schema_version == migrations::CURRENT_SCHEMA_VERSION
    }
}

/// Integrity, extension and schema report for `otel-recall doctor`.
pub fn check_database_health(conn: &Connection) -> Result<DatabaseHealth> {
    let integrity: String = conn
        .query_row("PRAGMA integrity_check", [], |r| r.get(0))
        .context("integrity check failed to run")?;
    let sqlite_vec_version: String = conn
        .query_row("SELECT vec_version()", [], |r| r.get(0))
        .context("sqlite-vec is not loaded")?;
    let collections: i64 = conn.query_row("SELECT COUNT(*) FROM collections", [], |r| r.get(0))?;
    let documents: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))?;

    Ok(DatabaseHealth {
        integrity,
        sqlite_vec_version,
        schema_version: migrations::get_schema_version(conn)?,
        embedding_model: migrations::get_embedding_model(conn)?,
        collections: collections as usize,
        documents: documents as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_file_database_is_healthy() {
        let dir = tempfile::TempDir::new().unwrap();
        let conn = open_database(dir.path().join("nested/vectors.db")).unwrap();

        let journal: String = conn
            .pragma_query_value(None, "journal_mode", |r| r.get(0))
            .unwrap();
        assert_eq!(journal, "wal");
        let busy: i64 = conn
            .pragma_query_value(None, "busy_timeout", |r| r.get(0))
            .unwrap();
        assert_eq!(busy, 5000);

        let health = check_database_health(&conn).unwrap();
        assert!(health.is_healthy());
        assert_eq!(health.collections, 0);
        assert!(health.sqlite_vec_version.starts_with('v'));
    }

    #[test]
    fn reopening_keeps_schema_version() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("vectors.db");
        drop(open_database(&path).unwrap());
        let conn = open_database(&path).unwrap();
        assert_eq!(
            migrations::get_schema_version(&conn).unwrap(),
            migrations::CURRENT_SCHEMA_VERSION
        );
    }
}

//! SQL DDL for the vector store tables.
//!
//! Defines `collections` (one row per collection with its fixed
//! dimensionality and metric), `documents` (text and metadata by collection
//! and id) and `schema_meta`. Each collection additionally gets its own vec0
//! table, created on demand by [`vec_table_sql`]. All DDL uses `IF NOT EXISTS`
//! for idempotent initialization.

use rusqlite::Connection;

use crate::store::DistanceMetric;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY,
    dimensions INTEGER NOT NULL CHECK(dimensions > 0),
    metric TEXT NOT NULL CHECK(metric IN ('cosine','l2')),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL REFERENCES collections(name) ON DELETE CASCADE,
    id TEXT NOT NULL,
    text TEXT NOT NULL,
    metadata TEXT NOT NULL,
    cluster_id TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (collection, id)
);

CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Name of the vec0 table backing a collection.
pub fn vec_table_name(collection: &str) -> String {
    format!("vec_{collection}")
}

/// DDL for a collection's vec0 table. `collection` must already be validated
/// as a safe identifier.
pub fn vec_table_sql(collection: &str, dimensions: usize, metric: DistanceMetric) -> String {
    format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS {} USING vec0(\n    id TEXT PRIMARY KEY,\n    embedding FLOAT[{dimensions}] distance_metric={}\n);",
        vec_table_name(collection),
        metric.as_str()
    )
}

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_all_tables() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"collections".to_string()));
        assert!(tables.contains(&"documents".to_string()));
        assert!(tables.contains(&"schema_meta".to_string()));
    }

    #[test]
    fn schema_is_idempotent() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap(); // second call should not error
    }

    #[test]
    fn vec_table_is_created_with_metric() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&vec_table_sql("traces", 3, DistanceMetric::L2))
            .unwrap();
        let sql: String = conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE name = 'vec_traces'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(sql.contains("FLOAT[3]"));
        assert!(sql.contains("distance_metric=l2"));
    }
}

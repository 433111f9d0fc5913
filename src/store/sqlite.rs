//! Persistent backend on SQLite + sqlite-vec.
//!
//! Document text and metadata live in `documents`; each collection's vectors
//! live in its own vec0 table whose dimensionality and distance metric are
//! fixed at creation. KNN runs inside sqlite-vec. A filtered query widens its
//! KNN until it has `k` matching hits or the collection is exhausted; past
//! sqlite-vec's `k` ceiling it falls back to an exact scan, narrowed by the
//! `cluster_id` index when the filter names a cluster.
//!
//! The connection is shared behind a mutex; every call runs on the blocking
//! thread pool.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

use super::{CollectionInfo, DistanceMetric, VectorBackend};
use crate::db::{migrations, schema};
use crate::document::{Document, Filter, Metadata, CLUSTER_ID_KEY};
use crate::error::StoreError;

const FILTER_OVERFETCH: usize = 4;
/// Largest `k` sqlite-vec accepts in a KNN query.
const KNN_LIMIT: usize = 4096;

pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Wrap a connection opened by [`crate::db::open_database`].
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Record the embedding model writing to this store.
    ///
    /// Returns the previously recorded model when it differs: vectors from
    /// two models are not comparable.
    pub async fn record_embedding_model(&self, model: &str) -> Result<Option<String>, StoreError> {
        let model = model.to_string();
        self.with_conn(move |conn| {
            let previous = migrations::get_embedding_model(conn)?;
            match previous {
                Some(prev) if prev != model => Ok(Some(prev)),
                Some(_) => Ok(None),
                None => {
                    migrations::set_embedding_model(conn, &model)?;
                    Ok(None)
                }
            }
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("db lock poisoned: {e}")))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("db task failed: {e}")))?
    }
}

/// Collection names become part of table names, so only `[a-z0-9_]` is allowed.
fn validate_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidCollection(name.to_string()))
    }
}

fn load_collection(conn: &Connection, name: &str) -> Result<Option<CollectionInfo>, StoreError> {
    let row = conn
        .query_row(
            "SELECT dimensions, metric FROM collections WHERE name = ?1",
            [name],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?;

    row.map(|(dimensions, metric)| {
        Ok(CollectionInfo {
            name: name.to_string(),
            dimensions: dimensions as usize,
            metric: metric
                .parse::<DistanceMetric>()
                .map_err(StoreError::Unavailable)?,
        })
    })
    .transpose()
}

fn require_collection(conn: &Connection, name: &str) -> Result<CollectionInfo, StoreError> {
    validate_name(name)?;
    load_collection(conn, name)?.ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))
}

/// Up to `limit` nearest ids by the collection's own metric.
fn knn(
    conn: &Connection,
    collection: &str,
    embedding: &[u8],
    limit: usize,
) -> Result<Vec<(String, f64)>, StoreError> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    let rows = conn
        .prepare(&format!(
            "SELECT id, distance FROM {} WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2",
            schema::vec_table_name(collection)
        ))?
        .query_map(params![embedding, limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Distances to every candidate document, ascending. Candidates come from the
/// `cluster_id` index when the filter names a cluster, otherwise from the
/// whole collection.
fn exact_scan(
    conn: &Connection,
    info: &CollectionInfo,
    embedding: &[u8],
    filter: &Filter,
) -> Result<Vec<(String, f64)>, StoreError> {
    let ids: Vec<String> = match filter.get(CLUSTER_ID_KEY).and_then(|c| c.as_str()) {
        Some(cluster) => conn
            .prepare("SELECT id FROM documents WHERE collection = ?1 AND cluster_id = ?2")?
            .query_map(params![info.name, cluster], |row| row.get(0))?
            .collect::<Result<_, _>>()?,
        None => conn
            .prepare("SELECT id FROM documents WHERE collection = ?1")?
            .query_map([&info.name], |row| row.get(0))?
            .collect::<Result<_, _>>()?,
    };

    let distance_fn = match info.metric {
        DistanceMetric::Cosine => "vec_distance_cosine",
        DistanceMetric::L2 => "vec_distance_l2",
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT {distance_fn}(embedding, ?1) FROM {} WHERE id = ?2",
        schema::vec_table_name(&info.name)
    ))?;

    let mut scored = Vec::with_capacity(ids.len());
    for id in ids {
        let distance = stmt
            .query_row(params![embedding, id], |row| row.get::<_, f64>(0))
            .optional()?;
        if let Some(distance) = distance {
            scored.push((id, distance));
        }
    }
    scored.sort_by(|(a, da), (b, db)| da.total_cmp(db).then_with(|| a.cmp(b)));
    Ok(scored)
}

/// Load documents for ranked ids, keep those matching `filter`, stop at `k`.
fn resolve(
    conn: &Connection,
    collection: &str,
    candidates: Vec<(String, f64)>,
    filter: Option<&Filter>,
    k: usize,
) -> Result<Vec<(Document, f64)>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT text, metadata FROM documents WHERE collection = ?1 AND id = ?2")?;
    let mut hits = Vec::with_capacity(candidates.len().min(k));
    for (id, distance) in candidates {
        if hits.len() == k {
            break;
        }
        let Some((text, metadata)) = stmt
            .query_row(params![collection, id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .optional()?
        else {
            tracing::warn!(collection = %collection, id = %id, "vector without document");
            continue;
        };
        let metadata: Metadata = serde_json::from_str(&metadata)
            .map_err(|e| StoreError::Unavailable(format!("metadata decoding: {e}")))?;
        let doc = Document::new(id, text, metadata);
        if filter.map_or(true, |f| doc.matches(f)) {
            hits.push((doc, distance));
        }
    }
    Ok(hits)
}

#[async_trait]
impl VectorBackend for SqliteBackend {
    async fn create_collection(&self, info: &CollectionInfo) -> Result<(), StoreError> {
        validate_name(&info.name)?;
        let info = info.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            if load_collection(&tx, &info.name)?.is_some() {
                return Err(StoreError::AlreadyExists(info.name));
            }
            tx.execute(
                "INSERT INTO collections (name, dimensions, metric, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    info.name,
                    info.dimensions as i64,
                    info.metric.as_str(),
                    Utc::now().to_rfc3339()
                ],
            )?;
            tx.execute_batch(&schema::vec_table_sql(&info.name, info.dimensions, info.metric))?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn collection(&self, name: &str) -> Result<Option<CollectionInfo>, StoreError> {
        let name = name.to_string();
        self.with_conn(move |conn| load_collection(conn, &name)).await
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, StoreError> {
        self.with_conn(|conn| {
            let names = conn
                .prepare("SELECT name FROM collections ORDER BY name")?
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            let mut infos = Vec::with_capacity(names.len());
            for name in names {
                if let Some(info) = load_collection(conn, &name)? {
                    infos.push(info);
                }
            }
            Ok(infos)
        })
        .await
    }

    async fn upsert(&self, collection: &str, docs: &[Document]) -> Result<(), StoreError> {
        let collection = collection.to_string();
        let docs = docs.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            require_collection(&tx, &collection)?;
            let vec_table = schema::vec_table_name(&collection);
            let now = Utc::now().to_rfc3339();

            for doc in &docs {
                let metadata = serde_json::to_string(&doc.metadata)
                    .map_err(|e| StoreError::Unavailable(format!("metadata encoding: {e}")))?;
                tx.execute(
                    "INSERT OR REPLACE INTO documents (collection, id, text, metadata, cluster_id, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![collection, doc.id, doc.text, metadata, doc.cluster_id(), now],
                )?;
                // vec0 has no upsert.
                tx.execute(&format!("DELETE FROM {vec_table} WHERE id = ?1"), [&doc.id])?;
                let bytes: &[u8] = bytemuck::cast_slice(&doc.embedding);
                tx.execute(
                    &format!("INSERT INTO {vec_table} (id, embedding) VALUES (?1, ?2)"),
                    params![doc.id, bytes],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<(Document, f64)>, StoreError> {
        let collection = collection.to_string();
        let embedding = embedding.to_vec();
        let filter = filter.filter(|f| !f.is_empty()).cloned();

        self.with_conn(move |conn| {
            let info = require_collection(conn, &collection)?;
            let bytes: &[u8] = bytemuck::cast_slice(&embedding);

            let Some(filter) = filter else {
                let candidates = knn(conn, &collection, bytes, k.min(KNN_LIMIT))?;
                return resolve(conn, &collection, candidates, None, k);
            };

            let mut fetch = k.saturating_mul(FILTER_OVERFETCH).max(1);
            loop {
                let limit = fetch.min(KNN_LIMIT);
                let candidates = knn(conn, &collection, bytes, limit)?;
                let exhausted = candidates.len() < limit;
                let hits = resolve(conn, &collection, candidates, Some(&filter), k)?;
                if hits.len() >= k || exhausted {
                    return Ok(hits);
                }
                if limit == KNN_LIMIT {
                    break;
                }
                fetch = fetch.saturating_mul(FILTER_OVERFETCH);
            }

            tracing::debug!(collection = %collection, k, "filtered knn hit its k ceiling, scanning exactly");
            let candidates = exact_scan(conn, &info, bytes, &filter)?;
            resolve(conn, &collection, candidates, Some(&filter), k)
        })
        .await
    }

    async fn count(&self, collection: &str) -> Result<usize, StoreError> {
        let collection = collection.to_string();
        self.with_conn(move |conn| {
            require_collection(conn, &collection)?;
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM documents WHERE collection = ?1",
                [&collection],
                |r| r.get(0),
            )?;
            Ok(n as usize)
        })
        .await
    }
}

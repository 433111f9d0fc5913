//! In-process backend: exact brute-force search over a map per collection.
//!
//! Used for tests and for `storage.backend = "memory"`. Contents are lost
//! when the process exits.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::distance::distance;
use super::{CollectionInfo, VectorBackend};
use crate::document::{Document, Filter};
use crate::error::StoreError;

struct Collection {
    info: CollectionInfo,
    docs: HashMap<String, Document>,
}

#[derive(Default)]
pub struct MemoryBackend {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Collection>> {
        self.collections.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Collection>> {
        self.collections.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl VectorBackend for MemoryBackend {
    async fn create_collection(&self, info: &CollectionInfo) -> Result<(), StoreError> {
        let mut collections = self.write();
        if collections.contains_key(&info.name) {
            return Err(StoreError::AlreadyExists(info.name.clone()));
        }
        collections.insert(
            info.name.clone(),
            Collection {
                info: info.clone(),
                docs: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn collection(&self, name: &str) -> Result<Option<CollectionInfo>, StoreError> {
        Ok(self.read().get(name).map(|c| c.info.clone()))
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, StoreError> {
        let mut infos: Vec<CollectionInfo> = self.read().values().map(|c| c.info.clone()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    async fn upsert(&self, collection: &str, docs: &[Document]) -> Result<(), StoreError> {
        let mut collections = self.write();
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        for doc in docs {
            target.docs.insert(doc.id.clone(), doc.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<(Document, f64)>, StoreError> {
        let collections = self.read();
        let target = collections
            .get(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;

        let mut hits: Vec<(Document, f64)> = target
            .docs
            .values()
            .filter(|doc| filter.map_or(true, |f| doc.matches(f)))
            .map(|doc| {
                let d = distance(target.info.metric, embedding, &doc.embedding);
                (doc.clone(), d)
            })
            .collect();
        hits.sort_by(|(a, da), (b, db)| da.total_cmp(db).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(k);
        Ok(hits)
    }

    async fn count(&self, collection: &str) -> Result<usize, StoreError> {
        self.read()
            .get(collection)
            .map(|c| c.docs.len())
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))
    }
}

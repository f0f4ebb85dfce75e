use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use super::traits::{DocumentStore, UpsertOutcome};

/// Per-collection document maps held in process memory.
#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    collections: Arc<RwLock<HashMap<String, BTreeMap<String, Value>>>>,
    rejected: Arc<RwLock<HashSet<String>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future upsert into `collection` come back rejected.
    pub fn reject_collection(&self, collection: &str) {
        self.rejected
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(collection.to_string());
    }

    pub fn documents(&self, collection: &str) -> Vec<Value> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        collections
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<Value> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        collections.get(collection).and_then(|docs| docs.get(id)).cloned()
    }

    pub fn count(&self, collection: &str) -> usize {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        collections.get(collection).map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    fn endpoint(&self) -> String {
        "memory://".to_string()
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, collection: &str, id: &str, document: &Value) -> Result<UpsertOutcome> {
        let refused = self
            .rejected
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(collection);
        if refused {
            return Ok(UpsertOutcome::Rejected {
                reason: format!("collection {} is read-only", collection),
            });
        }

        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), document.clone());
        Ok(UpsertOutcome::Accepted)
    }
}

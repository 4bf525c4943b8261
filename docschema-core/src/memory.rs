use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{PoisonError, RwLock};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::store::{
    CollectionWatch, DocumentStore, DocumentWatch, StoreQuery, StoredDocument, auto_id,
    merge_document,
};
use crate::store_value::StoreDocument;
use crate::watch::WatchHub;

type Collections = HashMap<String, IndexMap<String, StoreDocument>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStoreConfig {
    /// Length of ids generated by `add_document`.
    pub auto_id_length: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        MemoryStoreConfig { auto_id_length: 20 }
    }
}

/// An in-process document store.
///
/// Useful for testing and as a reference implementation. Collections keep
/// documents in insertion order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    config: MemoryStoreConfig,
    data: RwLock<Collections>,
    watchers: WatchHub,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: MemoryStoreConfig) -> Self {
        MemoryStore {
            config,
            ..Self::default()
        }
    }

    /// Replaces a document synchronously, notifying watchers.
    pub fn insert(&self, collection: &str, id: &str, document: StoreDocument) {
        self.write(collection, id, document, false);
    }

    /// Number of live document and collection watches.
    pub fn active_watchers(&self) -> usize {
        self.watchers.active()
    }

    fn write(&self, collection: &str, id: &str, document: StoreDocument, merge: bool) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let documents = data.entry(collection.to_string()).or_default();
        match documents.get_mut(id) {
            Some(existing) if merge => merge_document(existing, document),
            _ => {
                documents.insert(id.to_string(), document);
            }
        }
        let documents = &*documents;
        self.watchers
            .publish(collection, id, documents.get(id), || listing(documents));
    }
}

fn listing(documents: &IndexMap<String, StoreDocument>) -> Vec<StoredDocument> {
    documents
        .iter()
        .map(|(id, data)| StoredDocument {
            id: id.clone(),
            data: data.clone(),
        })
        .collect()
}

impl DocumentStore for MemoryStore {
    type Error = Infallible;

    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<StoreDocument>, Self::Error> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data.get(collection).and_then(|docs| docs.get(id)).cloned())
    }

    async fn query_documents(
        &self,
        collection: &str,
        query: &StoreQuery,
    ) -> Result<Vec<StoredDocument>, Self::Error> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data
            .get(collection)
            .map(|docs| query.apply(listing(docs)))
            .unwrap_or_default())
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        document: StoreDocument,
        merge: bool,
    ) -> Result<(), Self::Error> {
        self.write(collection, id, document, merge);
        Ok(())
    }

    async fn add_document(&self, collection: &str, document: StoreDocument) -> Result<String, Self::Error> {
        let id = auto_id(self.config.auto_id_length);
        self.write(collection, &id, document, false);
        Ok(id)
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<(), Self::Error> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let Some(documents) = data.get_mut(collection) else {
            return Ok(());
        };
        if documents.shift_remove(id).is_some() {
            let documents = &*documents;
            self.watchers
                .publish(collection, id, None, || listing(documents));
        }
        Ok(())
    }

    async fn watch_document(&self, collection: &str, id: &str) -> Result<DocumentWatch, Self::Error> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        let current = data.get(collection).and_then(|docs| docs.get(id)).cloned();
        Ok(self.watchers.watch_document(collection, id, current))
    }

    async fn watch_collection(
        &self,
        collection: &str,
        query: &StoreQuery,
    ) -> Result<CollectionWatch, Self::Error> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        let docs = data.get(collection).map(listing).unwrap_or_default();
        Ok(self.watchers.watch_collection(collection, query.clone(), docs))
    }
}

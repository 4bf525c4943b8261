//! Store abstraction for runtime dispatch.

use std::convert::Infallible;
use std::path::{Path, PathBuf};

use docschema_core::{
    CollectionWatch, DocumentStore, DocumentWatch, MemoryStore, MemoryStoreConfig, StoreDocument,
    StoreQuery, StoredDocument,
};
use docschema_rocks::RocksStore;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnyStoreError {
    #[error("rocks error: {0}")]
    Rocks(#[from] docschema_rocks::RocksError),
}

impl From<Infallible> for AnyStoreError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    #[default]
    Memory,
    Rocks,
}

impl std::str::FromStr for StoreType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Ok(StoreType::Memory),
            "rocks" | "rocksdb" => Ok(StoreType::Rocks),
            _ => Err(format!("unknown store type: {}", s)),
        }
    }
}

impl std::fmt::Display for StoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreType::Memory => write!(f, "memory"),
            StoreType::Rocks => write!(f, "rocks"),
        }
    }
}

pub enum AnyStore {
    Memory(MemoryStore),
    Rocks(RocksStore),
}

impl AnyStore {
    /// Opens a store. The path is only used by persistent stores.
    pub fn open(
        store_type: StoreType,
        path: impl AsRef<Path>,
        memory: MemoryStoreConfig,
    ) -> Result<Self, AnyStoreError> {
        match store_type {
            StoreType::Memory => Ok(Self::Memory(MemoryStore::with_config(memory))),
            StoreType::Rocks => Ok(Self::Rocks(RocksStore::open(path)?)),
        }
    }
}

impl DocumentStore for AnyStore {
    type Error = AnyStoreError;

    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<StoreDocument>, Self::Error> {
        match self {
            AnyStore::Memory(s) => s.get_document(collection, id).await.map_err(Into::into),
            AnyStore::Rocks(s) => s.get_document(collection, id).await.map_err(Into::into),
        }
    }

    async fn query_documents(
        &self,
        collection: &str,
        query: &StoreQuery,
    ) -> Result<Vec<StoredDocument>, Self::Error> {
        match self {
            AnyStore::Memory(s) => s.query_documents(collection, query).await.map_err(Into::into),
            AnyStore::Rocks(s) => s.query_documents(collection, query).await.map_err(Into::into),
        }
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        document: StoreDocument,
        merge: bool,
    ) -> Result<(), Self::Error> {
        match self {
            AnyStore::Memory(s) => s.set_document(collection, id, document, merge).await.map_err(Into::into),
            AnyStore::Rocks(s) => s.set_document(collection, id, document, merge).await.map_err(Into::into),
        }
    }

    async fn add_document(&self, collection: &str, document: StoreDocument) -> Result<String, Self::Error> {
        match self {
            AnyStore::Memory(s) => s.add_document(collection, document).await.map_err(Into::into),
            AnyStore::Rocks(s) => s.add_document(collection, document).await.map_err(Into::into),
        }
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<(), Self::Error> {
        match self {
            AnyStore::Memory(s) => s.delete_document(collection, id).await.map_err(Into::into),
            AnyStore::Rocks(s) => s.delete_document(collection, id).await.map_err(Into::into),
        }
    }

    async fn watch_document(&self, collection: &str, id: &str) -> Result<DocumentWatch, Self::Error> {
        match self {
            AnyStore::Memory(s) => s.watch_document(collection, id).await.map_err(Into::into),
            AnyStore::Rocks(s) => s.watch_document(collection, id).await.map_err(Into::into),
        }
    }

    async fn watch_collection(
        &self,
        collection: &str,
        query: &StoreQuery,
    ) -> Result<CollectionWatch, Self::Error> {
        match self {
            AnyStore::Memory(s) => s.watch_collection(collection, query).await.map_err(Into::into),
            AnyStore::Rocks(s) => s.watch_collection(collection, query).await.map_err(Into::into),
        }
    }
}

pub fn default_store_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("docschema")
        .join("store")
}

//! RocksDB-backed document store for Docschema.
//!
//! Documents live under `<collection path>/<id>` keys as CBOR. Collections
//! list in id order; documents of nested collections are not part of their
//! parent's listing.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use docschema_core::watch::WatchHub;
use docschema_core::{
    CollectionWatch, DocumentStore, DocumentWatch, StoreDocument, StoreQuery, StoredDocument,
    auto_id, merge_document,
};
use log::warn;
use rocksdb::{DB, Direction, IteratorMode, Options};
use thiserror::Error;

const AUTO_ID_LENGTH: usize = 20;

#[derive(Debug, Error)]
pub enum RocksError {
    #[error("RocksDB error: {0}")]
    Db(#[from] rocksdb::Error),
    #[error("failed to encode document: {0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),
    #[error("failed to decode document: {0}")]
    Decode(#[from] ciborium::de::Error<std::io::Error>),
}

/// A persistent document store backed by RocksDB.
pub struct RocksStore {
    db: DB,
    /// Serializes writes and watch registration, so watchers observe
    /// changes in commit order and never miss one.
    writes: Mutex<()>,
    watchers: WatchHub,
}

fn prefix(collection: &str) -> String {
    format!("{}/", collection.trim_matches('/'))
}

fn key(collection: &str, id: &str) -> String {
    format!("{}{id}", prefix(collection))
}

fn encode(document: &StoreDocument) -> Result<Vec<u8>, RocksError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(document, &mut bytes)?;
    Ok(bytes)
}

fn decode(bytes: &[u8]) -> Result<StoreDocument, RocksError> {
    Ok(ciborium::from_reader(bytes)?)
}

impl RocksStore {
    /// Opens a RocksDB store at the given path.
    ///
    /// Creates the database if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RocksError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self {
            db,
            writes: Mutex::new(()),
            watchers: WatchHub::new(),
        })
    }

    /// Number of live document and collection watches.
    pub fn active_watchers(&self) -> usize {
        self.watchers.active()
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self, collection: &str, id: &str) -> Result<Option<StoreDocument>, RocksError> {
        match self.db.get_pinned(key(collection, id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn list(&self, collection: &str) -> Result<Vec<StoredDocument>, RocksError> {
        let prefix = prefix(collection);
        let mut documents = Vec::new();
        for item in self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward))
        {
            let (key, value) = item?;
            let Some(id) = key.strip_prefix(prefix.as_bytes()) else {
                break;
            };
            if id.contains(&b'/') {
                continue;
            }
            documents.push(StoredDocument {
                id: String::from_utf8_lossy(id).into_owned(),
                data: decode(&value)?,
            });
        }
        Ok(documents)
    }

    fn publish(&self, collection: &str, id: &str, current: Option<&StoreDocument>) {
        self.watchers.publish(collection, id, current, || {
            self.list(collection).unwrap_or_else(|e| {
                warn!("could not list {collection} for watchers: {e}");
                Vec::new()
            })
        });
    }

    fn write(&self, collection: &str, id: &str, document: StoreDocument, merge: bool) -> Result<(), RocksError> {
        let _guard = self.lock();
        let document = match self.read(collection, id)? {
            Some(mut existing) if merge => {
                merge_document(&mut existing, document);
                existing
            }
            _ => document,
        };
        self.db.put(key(collection, id), encode(&document)?)?;
        self.publish(collection, id, Some(&document));
        Ok(())
    }
}

impl DocumentStore for RocksStore {
    type Error = RocksError;

    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<StoreDocument>, Self::Error> {
        self.read(collection, id)
    }

    async fn query_documents(
        &self,
        collection: &str,
        query: &StoreQuery,
    ) -> Result<Vec<StoredDocument>, Self::Error> {
        Ok(query.apply(self.list(collection)?))
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        document: StoreDocument,
        merge: bool,
    ) -> Result<(), Self::Error> {
        self.write(collection, id, document, merge)
    }

    async fn add_document(&self, collection: &str, document: StoreDocument) -> Result<String, Self::Error> {
        let id = auto_id(AUTO_ID_LENGTH);
        self.write(collection, &id, document, false)?;
        Ok(id)
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<(), Self::Error> {
        let _guard = self.lock();
        let key = key(collection, id);
        if self.db.get_pinned(&key)?.is_some() {
            self.db.delete(&key)?;
            self.publish(collection, id, None);
        }
        Ok(())
    }

    async fn watch_document(&self, collection: &str, id: &str) -> Result<DocumentWatch, Self::Error> {
        let _guard = self.lock();
        let current = self.read(collection, id)?;
        Ok(self.watchers.watch_document(collection, id, current))
    }

    async fn watch_collection(
        &self,
        collection: &str,
        query: &StoreQuery,
    ) -> Result<CollectionWatch, Self::Error> {
        let _guard = self.lock();
        let listing = self.list(collection)?;
        Ok(self.watchers.watch_collection(collection, query.clone(), listing))
    }
}

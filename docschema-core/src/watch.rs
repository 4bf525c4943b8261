use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::store::{CollectionWatch, DocumentWatch, StoreQuery, StoredDocument};
use crate::store_value::StoreDocument;

type DocumentKey = (String, String);

#[derive(Debug, Default)]
struct Watchers {
    documents: HashMap<DocumentKey, Vec<mpsc::UnboundedSender<Option<StoreDocument>>>>,
    collections: HashMap<String, Vec<(StoreQuery, mpsc::UnboundedSender<Vec<StoredDocument>>)>>,
}

/// Fan-out of document changes to live watchers.
///
/// Shared by store backends. A backend registers and publishes while holding
/// its own data lock, so a watcher never misses a change between its initial
/// snapshot and registration. Watchers whose receiver was dropped are pruned
/// on the next publish.
#[derive(Debug, Default)]
pub struct WatchHub {
    watchers: Mutex<Watchers>,
}

impl WatchHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a document watcher, delivering `current` immediately.
    pub fn watch_document(&self, collection: &str, id: &str, current: Option<StoreDocument>) -> DocumentWatch {
        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(current).is_ok() {
            self.lock()
                .documents
                .entry((collection.to_string(), id.to_string()))
                .or_default()
                .push(tx);
        }
        rx
    }

    /// Registers a collection watcher, delivering the query result over
    /// `listing` immediately.
    pub fn watch_collection(
        &self,
        collection: &str,
        query: StoreQuery,
        listing: Vec<StoredDocument>,
    ) -> CollectionWatch {
        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(query.apply(listing)).is_ok() {
            self.lock()
                .collections
                .entry(collection.to_string())
                .or_default()
                .push((query, tx));
        }
        rx
    }

    /// Notifies watchers that a document changed.
    ///
    /// `listing` produces the full collection contents after the change; it
    /// is only invoked when the collection has watchers.
    pub fn publish(
        &self,
        collection: &str,
        id: &str,
        current: Option<&StoreDocument>,
        listing: impl FnOnce() -> Vec<StoredDocument>,
    ) {
        let mut watchers = self.lock();

        let key = (collection.to_string(), id.to_string());
        if let Some(senders) = watchers.documents.get_mut(&key) {
            senders.retain(|tx| tx.send(current.cloned()).is_ok());
            if senders.is_empty() {
                watchers.documents.remove(&key);
            }
        }

        if let Some(senders) = watchers.collections.get_mut(collection) {
            let listing = listing();
            senders.retain(|(query, tx)| tx.send(query.apply(listing.iter().cloned())).is_ok());
            if senders.is_empty() {
                watchers.collections.remove(collection);
            }
        }
    }

    /// Number of watchers whose receiver is still alive.
    pub fn active(&self) -> usize {
        let mut watchers = self.lock();
        watchers.documents.retain(|_, senders| {
            senders.retain(|tx| !tx.is_closed());
            !senders.is_empty()
        });
        watchers.collections.retain(|_, senders| {
            senders.retain(|(_, tx)| !tx.is_closed());
            !senders.is_empty()
        });
        watchers.documents.values().map(Vec::len).sum::<usize>()
            + watchers.collections.values().map(Vec::len).sum::<usize>()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Watchers> {
        self.watchers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

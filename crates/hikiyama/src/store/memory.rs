//! In-process document store.
//!
//! Writes are applied under a lock and fanned out to every listener of the
//! written document before `merge` returns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{Document, DocumentStore, Patch, StoreEvent};
use crate::error::Result;
use crate::subscription::Subscription;

#[derive(Debug)]
struct Listener {
    key: u64,
    tx: mpsc::UnboundedSender<StoreEvent>,
}

#[derive(Debug, Default)]
struct Inner {
    documents: Mutex<HashMap<String, Document>>,
    listeners: Mutex<HashMap<String, Vec<Listener>>>,
    next_key: AtomicU64,
    writes: AtomicU64,
}

impl Inner {
    fn remove_listener(&self, id: &str, key: u64) {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = listeners.get_mut(id) {
            list.retain(|l| l.key != key);
            if list.is_empty() {
                listeners.remove(id);
            }
        }
    }

    fn notify(&self, event: &StoreEvent) {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = listeners.get_mut(event.id()) {
            list.retain(|l| l.tx.send(event.clone()).is_ok());
        }
    }
}

/// An in-memory [`DocumentStore`].
///
/// Cloning yields another handle to the same documents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of merge writes applied so far.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Number of listeners registered on `id`.
    #[must_use]
    pub fn listener_count(&self, id: &str) -> usize {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map_or(0, Vec::len)
    }

    /// Read a document without going through the async interface.
    #[must_use]
    pub fn document(&self, id: &str) -> Option<Document> {
        self.inner
            .documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Deliver a listener error to every listener of `id`.
    ///
    /// Mirrors a transient failure on one document's change stream.
    pub fn fail_listeners(&self, id: &str, message: impl Into<String>) {
        self.inner.notify(&StoreEvent::Failed {
            id: id.to_string(),
            message: message.into(),
        });
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn subscribe(&self, id: &str, tx: mpsc::UnboundedSender<StoreEvent>) -> Result<Subscription> {
        let key = self.inner.next_key.fetch_add(1, Ordering::SeqCst);

        // Register and deliver the initial snapshot while holding the document
        // lock so no write can slip in between.
        {
            let documents = self
                .inner
                .documents
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let _ = tx.send(StoreEvent::Changed {
                id: id.to_string(),
                snapshot: documents.get(id).cloned(),
            });
            self.inner
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(id.to_string())
                .or_default()
                .push(Listener { key, tx });
        }
        debug!(document = id, key, "Registered memory listener");

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let doc_id = id.to_string();
        Ok(Subscription::new(id, move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove_listener(&doc_id, key);
                trace!(document = %doc_id, key, "Removed memory listener");
            }
        }))
    }

    async fn merge(&self, id: &str, patch: Patch) -> Result<()> {
        let mut documents = self
            .inner
            .documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let document = documents.entry(id.to_string()).or_default();
        patch.apply_to(document, Utc::now());
        let snapshot = document.clone();
        self.inner.writes.fetch_add(1, Ordering::SeqCst);

        trace!(document = id, fields = patch.len(), "Merged patch");

        // Still holding the document lock keeps per-document delivery in
        // write order.
        self.inner.notify(&StoreEvent::Changed {
            id: id.to_string(),
            snapshot: Some(snapshot),
        });
        drop(documents);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.document(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscribe_delivers_initial_snapshot() {
        let store = MemoryStore::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _sub = store.subscribe("yama01", tx).unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            StoreEvent::Changed {
                id: "yama01".to_string(),
                snapshot: None,
            }
        );
    }

    #[tokio::test]
    async fn test_merge_notifies_listener() {
        let store = MemoryStore::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = store.subscribe("yama01", tx).unwrap();
        rx.recv().await.unwrap();

        store
            .merge("yama01", Patch::new().set("lat", 39.6))
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            StoreEvent::Changed { id, snapshot } => {
                assert_eq!(id, "yama01");
                assert_eq!(snapshot.unwrap()["lat"], json!(39.6));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_listener_only_sees_its_document() {
        let store = MemoryStore::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = store.subscribe("yama01", tx).unwrap();
        rx.recv().await.unwrap();

        store
            .merge("yama02", Patch::new().set("lat", 1.0))
            .await
            .unwrap();

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_removes_listener() {
        let store = MemoryStore::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = store.subscribe("yama01", tx).unwrap();
        assert_eq!(store.listener_count("yama01"), 1);

        sub.cancel();
        assert_eq!(store.listener_count("yama01"), 0);

        rx.recv().await.unwrap();
        // The store dropped its sender, so the channel closes.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_merge_keeps_other_fields() {
        let store = MemoryStore::new();
        store
            .merge("yama03", Patch::new().set("lat", 1.0).set("lng", 2.0))
            .await
            .unwrap();
        store
            .merge("yama03", Patch::new().set("angleDeg", 90))
            .await
            .unwrap();

        let doc = store.get("yama03").await.unwrap().unwrap();
        assert_eq!(doc["lat"], json!(1.0));
        assert_eq!(doc["lng"], json!(2.0));
        assert_eq!(doc["angleDeg"], json!(90));
    }

    #[tokio::test]
    async fn test_fail_listeners() {
        let store = MemoryStore::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = store.subscribe("yama04", tx).unwrap();
        rx.recv().await.unwrap();

        store.fail_listeners("yama04", "unavailable");

        assert_eq!(
            rx.recv().await.unwrap(),
            StoreEvent::Failed {
                id: "yama04".to_string(),
                message: "unavailable".to_string(),
            }
        );
        assert_eq!(store.listener_count("yama04"), 1);
    }
}

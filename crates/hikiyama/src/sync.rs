//! Live state synchronizer.
//!
//! Holds one listener per registered float and folds every pushed snapshot
//! into a [`FloatTable`]. A snapshot replaces the float's state wholesale;
//! nothing from the previous state carries over.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::float::FloatState;
use crate::registry;
use crate::store::{Document, DocumentStore, StoreEvent};
use crate::subscription::SubscriptionSet;

/// The current state of every registered float, in registry order.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatTable {
    states: Vec<FloatState>,
}

impl FloatTable {
    /// A table with every float in its unknown state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            states: registry::entities().map(FloatState::stub).collect(),
        }
    }

    /// Read every float's record once.
    ///
    /// # Errors
    ///
    /// Returns the first store read error.
    pub async fn fetch(store: &dyn DocumentStore) -> Result<Self> {
        let mut table = Self::new();
        for id in registry::ids() {
            let snapshot = store.get(id).await?;
            table.apply(id, snapshot.as_ref());
        }
        Ok(table)
    }

    /// Get the state of one float.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&FloatState> {
        registry::index_of(id).and_then(|i| self.states.get(i))
    }

    /// Iterate over all floats in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &FloatState> {
        self.states.iter()
    }

    /// Number of floats.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Always false; the table covers the whole registry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Replace a float's state with one built from `snapshot`.
    ///
    /// Returns the registry id, or `None` if `id` is not registered.
    pub fn apply(&mut self, id: &str, snapshot: Option<&Document>) -> Option<&'static str> {
        let entity = registry::lookup(id)?;
        let slot = registry::index_of(entity.id).and_then(|i| self.states.get_mut(i))?;
        *slot = FloatState::from_snapshot(entity, snapshot);
        Some(entity.id)
    }
}

impl Default for FloatTable {
    fn default() -> Self {
        Self::new()
    }
}

/// What changed after a store event was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A float's state was replaced.
    Updated(&'static str),
    /// The listener for one float reported an error. Other floats are
    /// unaffected and this listener stays open.
    ListenerFailed {
        /// Float identifier.
        id: String,
        /// Error description from the store.
        message: String,
    },
}

/// Keeps a [`FloatTable`] in step with the document store.
#[derive(Debug)]
pub struct Synchronizer {
    store: Arc<dyn DocumentStore>,
    table: FloatTable,
    subscriptions: SubscriptionSet,
    rx: Option<mpsc::UnboundedReceiver<StoreEvent>>,
}

impl Synchronizer {
    /// Create a synchronizer over `store`. No listeners are open yet.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            table: FloatTable::new(),
            subscriptions: SubscriptionSet::new(),
            rx: None,
        }
    }

    /// Open one listener per registered float.
    ///
    /// A float whose listener cannot be opened is logged and skipped. Calling
    /// this while already subscribed does nothing. Returns the number of open
    /// listeners.
    ///
    /// # Errors
    ///
    /// Returns an error only if no listener at all could be opened.
    pub fn subscribe(&mut self) -> Result<usize> {
        if !self.subscriptions.is_empty() {
            return Ok(self.subscriptions.len());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for id in registry::ids() {
            match self.store.subscribe(id, tx.clone()) {
                Ok(subscription) => self.subscriptions.add(subscription),
                Err(e) => warn!(float = id, error = %e, "Failed to open listener"),
            }
        }

        if self.subscriptions.is_empty() {
            return Err(Error::store(
                self.store.name(),
                "no float listener could be opened",
            ));
        }

        info!(
            store = self.store.name(),
            listeners = self.subscriptions.len(),
            "Subscribed to float updates"
        );
        self.rx = Some(rx);
        Ok(self.subscriptions.len())
    }

    /// Release every listener. Idempotent; returns how many were released.
    pub fn unsubscribe(&mut self) -> usize {
        let released = self.subscriptions.cancel_all();
        self.rx = None;
        if released > 0 {
            debug!(released, "Unsubscribed from float updates");
        }
        released
    }

    /// Check if listeners are open.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscriptions.any_active()
    }

    /// The current table.
    #[must_use]
    pub fn table(&self) -> &FloatTable {
        &self.table
    }

    /// Wait for the next store event and apply it.
    ///
    /// Returns `None` once unsubscribed or when every listener has closed.
    pub async fn next_change(&mut self) -> Option<SyncEvent> {
        loop {
            let event = self.rx.as_mut()?.recv().await?;
            if let Some(change) = self.handle(event) {
                return Some(change);
            }
        }
    }

    /// Apply the next already-delivered store event, if there is one.
    pub fn try_next_change(&mut self) -> Option<SyncEvent> {
        loop {
            let event = self.rx.as_mut()?.try_recv().ok()?;
            if let Some(change) = self.handle(event) {
                return Some(change);
            }
        }
    }

    fn handle(&mut self, event: StoreEvent) -> Option<SyncEvent> {
        match event {
            StoreEvent::Changed { id, snapshot } => {
                let Some(float_id) = self.table.apply(&id, snapshot.as_ref()) else {
                    debug!(document = %id, "Ignoring change for unregistered document");
                    return None;
                };
                if let Some(position) = self.table.get(float_id).and_then(FloatState::position) {
                    if !position.is_valid() {
                        warn!(float = float_id, %position, "Float reported an out-of-range position");
                    }
                }
                Some(SyncEvent::Updated(float_id))
            }
            StoreEvent::Failed { id, message } => {
                warn!(float = %id, error = %message, "Float listener failed");
                Some(SyncEvent::ListenerFailed { id, message })
            }
        }
    }
}

impl Drop for Synchronizer {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Patch};
    use crate::subscription::Subscription;
    use serde_json::json;

    async fn drain_initial(sync: &mut Synchronizer) {
        for _ in 0..registry::ids().len() {
            assert!(matches!(
                sync.next_change().await,
                Some(SyncEvent::Updated(_))
            ));
        }
    }

    #[test]
    fn test_table_covers_registry() {
        let table = FloatTable::new();
        assert_eq!(table.len(), 18);
        assert!(!table.is_empty());
        assert_eq!(table.get("yama18").unwrap().name, "川原町");
        assert!(table.get("yama19").is_none());

        let ids: Vec<&str> = table.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, registry::ids());
    }

    #[tokio::test]
    async fn test_table_fetch() {
        let store = MemoryStore::new();
        store
            .merge("yama08", Patch::new().set("lat", 39.6).set("lng", 140.5))
            .await
            .unwrap();

        let table = FloatTable::fetch(&store).await.unwrap();
        assert_eq!(table.len(), 18);
        assert!(table.get("yama08").unwrap().position().is_some());
        assert!(table.get("yama01").unwrap().position().is_none());
    }

    #[test]
    fn test_table_apply_unregistered() {
        let mut table = FloatTable::new();
        assert!(table.apply("nope", None).is_none());
        assert_eq!(table, FloatTable::new());
    }

    #[tokio::test]
    async fn test_subscribe_opens_one_listener_per_float() {
        let store = MemoryStore::new();
        let mut sync = Synchronizer::new(Arc::new(store.clone()));

        assert_eq!(sync.subscribe().unwrap(), 18);
        for id in registry::ids() {
            assert_eq!(store.listener_count(id), 1);
        }

        // Second call is a no-op.
        assert_eq!(sync.subscribe().unwrap(), 18);
        assert_eq!(store.listener_count("yama01"), 1);
        assert!(sync.is_subscribed());
    }

    #[tokio::test]
    async fn test_remote_change_updates_table() {
        let store = MemoryStore::new();
        let mut sync = Synchronizer::new(Arc::new(store.clone()));
        sync.subscribe().unwrap();
        drain_initial(&mut sync).await;

        store
            .merge(
                "yama05",
                Patch::new()
                    .set("lat", 39.6)
                    .set("lng", 140.56)
                    .server_timestamp("updatedAt"),
            )
            .await
            .unwrap();

        assert_eq!(sync.next_change().await, Some(SyncEvent::Updated("yama05")));
        let state = sync.table().get("yama05").unwrap();
        assert_eq!(state.lat, Some(39.6));
        assert!(state.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_snapshot_replaces_state_wholesale() {
        let store = MemoryStore::new();
        store
            .merge("yama02", Patch::new().set("lat", 1.0).set("lng", 2.0).set("heading", 90))
            .await
            .unwrap();

        let mut sync = Synchronizer::new(Arc::new(store.clone()));
        sync.subscribe().unwrap();
        drain_initial(&mut sync).await;
        assert_eq!(sync.table().get("yama02").unwrap().heading, Some(90.0));

        // A snapshot without heading clears it locally.
        let mut doc = store.document("yama02").unwrap();
        doc.remove("heading");
        sync.handle(StoreEvent::Changed {
            id: "yama02".to_string(),
            snapshot: Some(doc),
        });

        let state = sync.table().get("yama02").unwrap();
        assert!(state.heading.is_none());
        assert_eq!(state.lat, Some(1.0));
    }

    #[tokio::test]
    async fn test_listener_error_is_isolated() {
        let store = MemoryStore::new();
        let mut sync = Synchronizer::new(Arc::new(store.clone()));
        sync.subscribe().unwrap();
        drain_initial(&mut sync).await;

        store.fail_listeners("yama03", "permission denied");
        assert_eq!(
            sync.next_change().await,
            Some(SyncEvent::ListenerFailed {
                id: "yama03".to_string(),
                message: "permission denied".to_string(),
            })
        );

        store
            .merge("yama04", Patch::new().set("lat", 5.0).set("lng", 6.0))
            .await
            .unwrap();
        assert_eq!(sync.next_change().await, Some(SyncEvent::Updated("yama04")));

        store
            .merge("yama03", Patch::new().set("lat", 7.0).set("lng", 8.0))
            .await
            .unwrap();
        assert_eq!(sync.next_change().await, Some(SyncEvent::Updated("yama03")));
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let store = MemoryStore::new();
        let mut sync = Synchronizer::new(Arc::new(store.clone()));
        sync.subscribe().unwrap();

        assert_eq!(sync.unsubscribe(), 18);
        assert_eq!(sync.unsubscribe(), 0);
        assert!(!sync.is_subscribed());
        assert_eq!(store.listener_count("yama01"), 0);
        assert!(sync.next_change().await.is_none());
        assert!(sync.try_next_change().is_none());
    }

    #[tokio::test]
    async fn test_drop_releases_listeners() {
        let store = MemoryStore::new();
        {
            let mut sync = Synchronizer::new(Arc::new(store.clone()));
            sync.subscribe().unwrap();
        }
        assert_eq!(store.listener_count("yama10"), 0);
    }

    #[tokio::test]
    async fn test_try_next_change() {
        let store = MemoryStore::new();
        let mut sync = Synchronizer::new(Arc::new(store.clone()));
        assert!(sync.try_next_change().is_none());

        sync.subscribe().unwrap();
        let mut applied = 0;
        while sync.try_next_change().is_some() {
            applied += 1;
        }
        assert_eq!(applied, 18);
    }

    #[derive(Debug, Default)]
    struct FlakyStore {
        inner: MemoryStore,
    }

    #[async_trait::async_trait]
    impl DocumentStore for FlakyStore {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn subscribe(
            &self,
            id: &str,
            tx: mpsc::UnboundedSender<StoreEvent>,
        ) -> Result<Subscription> {
            if id == "yama07" {
                return Err(Error::store(id, "listener refused"));
            }
            self.inner.subscribe(id, tx)
        }

        async fn merge(&self, id: &str, patch: Patch) -> Result<()> {
            self.inner.merge(id, patch).await
        }

        async fn get(&self, id: &str) -> Result<Option<Document>> {
            self.inner.get(id).await
        }
    }

    #[tokio::test]
    async fn test_failed_listener_open_is_skipped() {
        let mut sync = Synchronizer::new(Arc::new(FlakyStore::default()));
        assert_eq!(sync.subscribe().unwrap(), 17);
    }

    #[tokio::test]
    async fn test_out_of_range_position_still_applied() {
        let store = MemoryStore::new();
        let mut sync = Synchronizer::new(Arc::new(store.clone()));
        sync.subscribe().unwrap();
        drain_initial(&mut sync).await;

        store
            .merge("yama09", Patch::new().set("lat", 123.0).set("lng", json!(0.0)))
            .await
            .unwrap();
        sync.next_change().await;
        assert_eq!(sync.table().get("yama09").unwrap().lat, Some(123.0));
    }
}

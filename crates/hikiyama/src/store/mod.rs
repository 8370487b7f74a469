//! Document store abstraction for hikiyama.
//!
//! Float records live in a shared document store: one JSON document per float
//! identifier. The store is the single source of truth. Writers send partial
//! [`Patch`]es that are merged field by field; readers hold one listener per
//! document and receive the whole document on every change.
//!
//! Two implementations ship with the crate:
//! - [`MemoryStore`]: in-process, changes fan out immediately
//! - [`SqliteStore`]: a local `SQLite` file shared between processes, with
//!   listeners that poll for changes

pub mod memory;
pub mod migrations;
pub mod schema;
pub mod sqlite;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::subscription::Subscription;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A stored document: a JSON object.
pub type Document = Map<String, Value>;

/// A value in a [`Patch`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// A literal JSON value.
    Value(Value),
    /// Replaced by the store's clock when the write is applied.
    ServerTimestamp,
}

/// A partial update to one document.
///
/// Fields present in the patch overwrite the same fields in the stored
/// document; all other stored fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    fields: BTreeMap<String, FieldValue>,
}

impl Patch {
    /// Create an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field to a literal value.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), FieldValue::Value(value.into()));
        self
    }

    /// Set a field to the store's clock at write time.
    #[must_use]
    pub fn server_timestamp(mut self, key: impl Into<String>) -> Self {
        self.fields.insert(key.into(), FieldValue::ServerTimestamp);
        self
    }

    /// Get a field's pending value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Iterate over the field names this patch touches.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Number of fields in the patch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the patch touches no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Merge this patch into `document`, resolving server timestamps to `now`.
    pub fn apply_to(&self, document: &mut Document, now: DateTime<Utc>) {
        for (key, value) in &self.fields {
            let resolved = match value {
                FieldValue::Value(v) => v.clone(),
                FieldValue::ServerTimestamp => server_timestamp_value(now),
            };
            document.insert(key.clone(), resolved);
        }
    }
}

/// Encode a server-assigned timestamp the way the stores persist it.
#[must_use]
pub fn server_timestamp_value(now: DateTime<Utc>) -> Value {
    serde_json::json!({
        "seconds": now.timestamp(),
        "nanos": now.timestamp_subsec_nanos(),
    })
}

/// A notification delivered to a document listener.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// The document changed. `None` means it does not exist.
    Changed {
        /// Document identifier.
        id: String,
        /// Full current contents.
        snapshot: Option<Document>,
    },
    /// The listener for this document hit an error. It stays registered.
    Failed {
        /// Document identifier.
        id: String,
        /// Description of what went wrong.
        message: String,
    },
}

impl StoreEvent {
    /// The document this event is about.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Changed { id, .. } | Self::Failed { id, .. } => id,
        }
    }
}

/// A realtime document store.
///
/// Implementations must deliver the current snapshot to a new listener right
/// after it is registered, then one [`StoreEvent::Changed`] per change, in
/// write order for that document.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync + std::fmt::Debug {
    /// The name of this store (for logging/debugging).
    fn name(&self) -> &'static str;

    /// Start listening to one document.
    ///
    /// Events are sent through `tx` until the returned subscription is
    /// cancelled. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be registered.
    fn subscribe(&self, id: &str, tx: mpsc::UnboundedSender<StoreEvent>) -> Result<Subscription>;

    /// Merge a partial update into one document, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn merge(&self, id: &str, patch: Patch) -> Result<()>;

    /// Read one document.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    async fn get(&self, id: &str) -> Result<Option<Document>>;
}

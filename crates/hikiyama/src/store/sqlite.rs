//! `SQLite`-backed document store.
//!
//! Documents are JSON bodies in one table, so a `track` process and a `view`
//! process on the same machine share float state through one database file.
//! `SQLite` has no cross-process change feed, so each listener polls its
//! document and emits a snapshot whenever the BLAKE3 hash of the body
//! changes.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, trace, warn};

use super::{migrations, Document, DocumentStore, Patch, StoreEvent};
use crate::error::{Error, Result};
use crate::subscription::Subscription;

/// Hash recorded for a document that does not exist.
const MISSING_HASH: &str = "missing";

#[derive(Debug)]
struct Inner {
    path: PathBuf,
    collection: String,
    poll_interval: Duration,
    conn: Mutex<Connection>,
}

/// A [`DocumentStore`] persisted in a local `SQLite` database.
///
/// Cloning yields another handle to the same connection.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    inner: Arc<Inner>,
}

impl SqliteStore {
    /// Open or create a store database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(
        path: impl AsRef<Path>,
        collection: impl Into<String>,
        poll_interval: Duration,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening document database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // WAL lets viewer processes read while a tracker writes.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        migrations::initialize_schema(&conn)?;

        info!("Document database opened at {}", path.display());
        Ok(Self::from_connection(path, conn, collection.into(), poll_interval))
    }

    /// Create an in-memory store instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory(collection: impl Into<String>, poll_interval: Duration) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        migrations::initialize_schema(&conn)?;

        Ok(Self::from_connection(
            PathBuf::from(":memory:"),
            conn,
            collection.into(),
            poll_interval,
        ))
    }

    fn from_connection(
        path: PathBuf,
        conn: Connection,
        collection: String,
        poll_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                path,
                collection,
                poll_interval,
                conn: Mutex::new(conn),
            }),
        }
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Get the collection this store reads and writes.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.inner.collection
    }

    /// Read a document synchronously.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored body is not a JSON object.
    pub fn read(&self, id: &str) -> Result<Option<Document>> {
        self.inner.read(id)
    }

    /// Count the documents in this store's collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self) -> Result<i64> {
        let conn = self.inner.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1",
            [&self.inner.collection],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a database call on the blocking pool.
    async fn run_blocking<T, F>(self: &Arc<Self>, f: F) -> Result<T>
    where
        F: FnOnce(&Inner) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| Error::internal(format!("database task failed: {e}")))?
    }

    fn read(&self, id: &str) -> Result<Option<Document>> {
        let body: Option<String> = self
            .lock()
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                params![self.collection, id],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|b| parse_body(id, &b)).transpose()
    }

    fn merge(&self, id: &str, patch: &Patch) -> Result<()> {
        let mut conn = self.lock();
        // Take the write lock up front so busy_timeout applies to a held lock.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                params![self.collection, id],
                |row| row.get(0),
            )
            .optional()?;
        let mut document = match existing {
            Some(body) => parse_body(id, &body)?,
            None => Document::new(),
        };

        let now = Utc::now();
        patch.apply_to(&mut document, now);
        let body = serde_json::to_string(&document)?;

        tx.execute(
            r"
            INSERT INTO documents (collection, id, body, revision, updated_at)
            VALUES (?1, ?2, ?3, 1, ?4)
            ON CONFLICT (collection, id) DO UPDATE SET
                body = excluded.body,
                revision = documents.revision + 1,
                updated_at = excluded.updated_at
            ",
            params![self.collection, id, body, now.to_rfc3339()],
        )?;
        tx.commit()?;

        trace!(document = id, fields = patch.len(), "Merged patch");
        Ok(())
    }
}

fn parse_body(id: &str, body: &str) -> Result<Document> {
    match serde_json::from_str::<serde_json::Value>(body)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(Error::store(id, "stored body is not a JSON object")),
    }
}

fn hash_document(document: Option<&Document>) -> String {
    match document {
        Some(doc) => {
            let body = serde_json::Value::Object(doc.clone()).to_string();
            blake3::hash(body.as_bytes()).to_hex().to_string()
        }
        None => MISSING_HASH.to_string(),
    }
}

/// Poll one document until the receiver goes away.
async fn poll_document(inner: Arc<Inner>, id: String, tx: mpsc::UnboundedSender<StoreEvent>) {
    let mut ticker = interval(inner.poll_interval);
    let mut last_hash: Option<String> = None;
    let mut failing = false;

    loop {
        tokio::select! {
            () = tx.closed() => {
                debug!(document = %id, "Listener channel closed, stopping poll");
                break;
            }
            _ = ticker.tick() => {}
        }

        let doc_id = id.clone();
        let event = match inner.run_blocking(move |inner| inner.read(&doc_id)).await {
            Ok(snapshot) => {
                failing = false;
                let hash = hash_document(snapshot.as_ref());
                if last_hash.as_ref() == Some(&hash) {
                    trace!(document = %id, "Document unchanged");
                    continue;
                }
                last_hash = Some(hash);
                StoreEvent::Changed {
                    id: id.clone(),
                    snapshot,
                }
            }
            Err(e) => {
                // Report once per failure streak, keep polling.
                if failing {
                    continue;
                }
                failing = true;
                warn!(document = %id, error = %e, "Error polling document");
                StoreEvent::Failed {
                    id: id.clone(),
                    message: e.to_string(),
                }
            }
        };

        if tx.send(event).is_err() {
            debug!(document = %id, "Listener channel closed, stopping poll");
            break;
        }
    }
}

#[async_trait::async_trait]
impl DocumentStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn subscribe(&self, id: &str, tx: mpsc::UnboundedSender<StoreEvent>) -> Result<Subscription> {
        debug!(
            document = id,
            interval_ms = self.inner.poll_interval.as_millis(),
            "Starting document poll"
        );
        let task = tokio::spawn(poll_document(
            Arc::clone(&self.inner),
            id.to_string(),
            tx,
        ));
        Ok(Subscription::new(id, move || task.abort()))
    }

    async fn merge(&self, id: &str, patch: Patch) -> Result<()> {
        let id = id.to_string();
        self.inner
            .run_blocking(move |inner| inner.merge(&id, &patch))
            .await
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        let id = id.to_string();
        self.inner.run_blocking(move |inner| inner.read(&id)).await
    }
}

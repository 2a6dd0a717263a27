//! Document store access.
//!
//! The framework needs very little from persistence: find by equality,
//! upsert and remove by identifier, and count. [`Backend`] is that surface;
//! [`MemoryBackend`] is the in-process implementation used by tests and demos.
//!
//! One [`Connection`] is opened at startup and shared by every request. Each
//! request clones a lightweight [`Database`] handle from it, bound to one
//! logical database name. The handle must be released once the request is
//! over ([`Context::close`](crate::Context::close) does that), and any use
//! after release fails with [`StoreError::Released`].

mod memory;

pub use memory::MemoryBackend;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::trace;

use crate::error::Error;

/// A stored document: a JSON object whose `_id` field identifies it.
pub type Document = Map<String, Value>;

/// Name of the identifier field.
pub const ID_FIELD: &str = "_id";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The per-request handle was used after the request finished.
    #[error("database handle already released")]
    Released,

    #[error("document (de)serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    /// A document did not serialize to a JSON object.
    #[error("documents must be JSON objects")]
    NotAnObject,

    #[error("backend failure: {0}")]
    Backend(String),
}

// ── Filter ────────────────────────────────────────────────────────────────────

/// An equality filter. A document matches when every listed field is equal.
///
/// ```rust
/// use goat::store::Filter;
///
/// let f = Filter::new().eq("username", "billy");
/// let all = Filter::new();
/// assert!(all.is_empty());
/// # let _ = f;
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter(Map<String, Value>);

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter on the identifier field.
    pub fn id(id: impl fmt::Display) -> Self {
        Self::new().eq(ID_FIELD, id.to_string())
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.0.insert(field.to_owned(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.0.iter().all(|(k, v)| doc.get(k) == Some(v))
    }
}

// ── Backend ───────────────────────────────────────────────────────────────────

/// The operations a document store must provide.
///
/// Results of `find` come back in insertion order.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    async fn find(&self, db: &str, collection: &str, filter: &Filter)
        -> Result<Vec<Document>, StoreError>;

    /// Inserts `doc` under `id`, replacing any document already stored there.
    async fn upsert(&self, db: &str, collection: &str, id: &str, doc: Document)
        -> Result<(), StoreError>;

    /// Returns whether a document was removed.
    async fn remove(&self, db: &str, collection: &str, id: &str) -> Result<bool, StoreError>;

    async fn count(&self, db: &str, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        Ok(self.find(db, collection, filter).await?.len() as u64)
    }
}

// ── Connection ────────────────────────────────────────────────────────────────

/// The long-lived connection shared by all requests.
#[derive(Clone)]
pub struct Connection {
    backend: Arc<dyn Backend>,
    target: Arc<str>,
    stats: Arc<Stats>,
}

#[derive(Default)]
struct Stats {
    acquired: AtomicU64,
    released: AtomicU64,
}

impl Connection {
    /// Opens a connection to `target`, a URL such as `memory://localhost/app`.
    ///
    /// Only the `memory` scheme ships with the crate; plug other stores in
    /// with [`Connection::with_backend`].
    pub fn open(target: &str) -> Result<Self, Error> {
        let parsed = url::Url::parse(target).map_err(|e| Error::Connect {
            target: target.to_owned(),
            reason: e.to_string(),
        })?;
        match parsed.scheme() {
            "memory" => Ok(Self::with_backend(target, MemoryBackend::new())),
            other => Err(Error::Connect {
                target: target.to_owned(),
                reason: format!("unsupported scheme `{other}`"),
            }),
        }
    }

    pub fn with_backend(target: &str, backend: impl Backend) -> Self {
        Self {
            backend: Arc::new(backend),
            target: target.into(),
            stats: Arc::default(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Clones a per-request handle bound to database `name`.
    pub fn database(&self, name: &str) -> Database {
        let serial = self.stats.acquired.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(db = name, serial, "database handle acquired");
        Database {
            lease: Arc::new(Lease {
                conn: self.clone(),
                name: name.into(),
                serial,
                released: AtomicBool::new(false),
            }),
        }
    }

    /// Handles acquired so far.
    pub fn acquired(&self) -> u64 {
        self.stats.acquired.load(Ordering::Relaxed)
    }

    /// Handles released so far.
    pub fn released(&self) -> u64 {
        self.stats.released.load(Ordering::Relaxed)
    }

    /// Handles acquired but not yet released.
    pub fn open_handles(&self) -> u64 {
        self.acquired().saturating_sub(self.released())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.target)
            .field("open_handles", &self.open_handles())
            .finish()
    }
}

// ── Database ──────────────────────────────────────────────────────────────────

/// A per-request database handle.
///
/// Clones share one lease; releasing any clone releases them all.
#[derive(Clone)]
pub struct Database {
    lease: Arc<Lease>,
}

struct Lease {
    conn: Connection,
    name: Box<str>,
    serial: u64,
    released: AtomicBool,
}

impl Lease {
    fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.conn.stats.released.fetch_add(1, Ordering::Relaxed);
        trace!(db = %self.name, serial = self.serial, "database handle released");
        true
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.release();
    }
}

impl Database {
    pub fn name(&self) -> &str {
        &self.lease.name
    }

    /// Releases the handle. Returns `false` if it was already released.
    pub fn release(&self) -> bool {
        self.lease.release()
    }

    pub fn is_released(&self) -> bool {
        self.lease.released.load(Ordering::Acquire)
    }

    pub fn collection(&self, name: &str) -> Collection {
        Collection { db: self.clone(), name: name.to_owned() }
    }

    fn backend(&self) -> Result<&dyn Backend, StoreError> {
        if self.is_released() {
            return Err(StoreError::Released);
        }
        Ok(self.lease.conn.backend.as_ref())
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.lease.name)
            .field("released", &self.is_released())
            .finish()
    }
}

// ── Collection ────────────────────────────────────────────────────────────────

/// Typed access to one collection through a [`Database`] handle.
pub struct Collection {
    db: Database,
    name: String,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn find_one<T: DeserializeOwned>(&self, filter: &Filter) -> Result<Option<T>, StoreError> {
        let docs = self.raw_find(filter).await?;
        match docs.into_iter().next() {
            Some(doc) => Ok(Some(serde_json::from_value(Value::Object(doc))?)),
            None => Ok(None),
        }
    }

    pub async fn find_many<T: DeserializeOwned>(&self, filter: &Filter) -> Result<Vec<T>, StoreError> {
        self.raw_find(filter)
            .await?
            .into_iter()
            .map(|doc| serde_json::from_value(Value::Object(doc)).map_err(StoreError::from))
            .collect()
    }

    pub async fn raw_find(&self, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        self.db.backend()?.find(self.db.name(), &self.name, filter).await
    }

    /// Stores `value` under `id`. The `_id` field of the stored document is
    /// forced to `id`.
    pub async fn upsert_id<T: Serialize>(&self, id: impl fmt::Display, value: &T) -> Result<(), StoreError> {
        let Value::Object(mut doc) = serde_json::to_value(value)? else {
            return Err(StoreError::NotAnObject);
        };
        let id = id.to_string();
        doc.insert(ID_FIELD.to_owned(), Value::String(id.clone()));
        self.db.backend()?.upsert(self.db.name(), &self.name, &id, doc).await
    }

    pub async fn remove_id(&self, id: impl fmt::Display) -> Result<bool, StoreError> {
        self.db.backend()?.remove(self.db.name(), &self.name, &id.to_string()).await
    }

    pub async fn count(&self, filter: &Filter) -> Result<u64, StoreError> {
        self.db.backend()?.count(self.db.name(), &self.name, filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq, Serialize)]
    struct Goat {
        #[serde(rename = "_id")]
        id: String,
        name: String,
        horns: u8,
    }

    fn billy() -> Goat {
        Goat { id: "g1".into(), name: "billy".into(), horns: 2 }
    }

    #[test]
    fn open_rejects_unknown_schemes() {
        assert!(Connection::open("memory://localhost/farm").is_ok());
        assert!(matches!(Connection::open("mongodb://localhost/farm"), Err(Error::Connect { .. })));
        assert!(matches!(Connection::open("not a url"), Err(Error::Connect { .. })));
    }

    #[tokio::test]
    async fn typed_round_trip_through_collection() {
        let conn = Connection::open("memory://localhost/farm").unwrap();
        let goats = conn.database("farm").collection("goats");

        goats.upsert_id("g1", &billy()).await.unwrap();
        let found: Option<Goat> = goats.find_one(&Filter::new().eq("name", "billy")).await.unwrap();
        assert_eq!(found, Some(billy()));
        assert_eq!(goats.count(&Filter::new()).await.unwrap(), 1);

        assert!(goats.remove_id("g1").await.unwrap());
        assert!(!goats.remove_id("g1").await.unwrap());
        assert_eq!(goats.count(&Filter::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn released_handle_refuses_work() {
        let conn = Connection::open("memory://localhost/farm").unwrap();
        let db = conn.database("farm");
        let clone = db.clone();

        assert!(db.release());
        assert!(!clone.release());
        assert_eq!(conn.released(), 1);
        assert!(matches!(
            clone.collection("goats").count(&Filter::new()).await,
            Err(StoreError::Released)
        ));
    }

    #[test]
    fn dropping_last_clone_releases_once() {
        let conn = Connection::open("memory://localhost/farm").unwrap();
        let db = conn.database("farm");
        let clone = db.clone();
        drop(db);
        assert_eq!(conn.open_handles(), 1);
        drop(clone);
        assert_eq!(conn.open_handles(), 0);
        assert_eq!(conn.released(), 1);
    }

    #[test]
    fn non_object_documents_are_rejected() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let conn = Connection::open("memory://localhost/farm").unwrap();
        let res = rt.block_on(conn.database("farm").collection("c").upsert_id("x", &42));
        assert!(matches!(res, Err(StoreError::NotAnObject)));
    }
}

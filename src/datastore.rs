//! Collection-of-documents boundary the handlers persist through.
//!
//! Documents are JSON objects. [`Datastore::create`] assigns the `id` field. The
//! concrete store is picked from the connection string at startup:
//!
//! - `memory:` keeps everything in process memory
//! - `file:<path>` keeps the same state and rewrites a JSON snapshot after every write
//!
//! [`LazyDatastore`] wraps either one and connects on first use; a failed connect is
//! not cached, so the next call tries again.

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::{Map, Value};
use std::{
    cmp::Ordering,
    collections::HashMap,
    future::Future,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type Document = Map<String, Value>;

pub const ID_FIELD: &str = "id";

#[derive(Debug, Error)]
pub enum DatastoreError {
    #[error("datastore unavailable: {0}")]
    Unavailable(String),
    #[error("datastore i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("datastore serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("datastore operation timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub direction: Direction,
}

impl Sort {
    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Descending,
        }
    }

    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Ascending,
        }
    }
}

/// Conjunction of field equalities.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter(Vec<(String, Value)>);

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self(vec![(field.into(), value.into())])
    }

    pub fn and(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push((field.into(), value.into()));
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.0
            .iter()
            .all(|(field, value)| doc.get(field) == Some(value))
    }
}

#[async_trait]
pub trait Datastore: Send + Sync {
    async fn find_all(&self, collection: &str, sort: &Sort) -> Result<Vec<Document>, DatastoreError>;

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, DatastoreError>;

    async fn create(&self, collection: &str, doc: Document) -> Result<Document, DatastoreError>;

    /// Insert `doc` unless a document matching `unique` already exists, checked and written
    /// atomically. `None` means the existing document won.
    async fn create_if_absent(
        &self,
        collection: &str,
        unique: &Filter,
        doc: Document,
    ) -> Result<Option<Document>, DatastoreError>;
}

/// Run a datastore call under a deadline.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, DatastoreError>
where
    F: Future<Output = Result<T, DatastoreError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| DatastoreError::Timeout(limit))?
}

/// Numbers compare numerically, RFC 3339 strings chronologically, other strings lexically.
/// A missing field sorts below everything.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (
                DateTime::parse_from_rfc3339(x),
                DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

type Collections = HashMap<String, Vec<Document>>;

fn sorted(docs: &[Document], sort: &Sort) -> Vec<Document> {
    let field = sort.field.as_str();
    let mut out = docs.to_vec();
    match sort.direction {
        Direction::Ascending => out.sort_by(|a, b| compare_values(a.get(field), b.get(field))),
        Direction::Descending => {
            // equal keys list the latest write first
            out.reverse();
            out.sort_by(|a, b| compare_values(b.get(field), a.get(field)));
        }
    }
    out
}

fn with_new_id(mut doc: Document) -> Document {
    doc.insert(
        ID_FIELD.to_string(),
        Value::String(Uuid::new_v4().simple().to_string()),
    );
    doc
}

fn contains(collections: &Collections, collection: &str, filter: &Filter) -> bool {
    collections
        .get(collection)
        .is_some_and(|docs| docs.iter().any(|d| filter.matches(d)))
}

#[derive(Default)]
pub struct MemoryDatastore {
    collections: RwLock<Collections>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_collections(collections: Collections) -> Self {
        Self {
            collections: RwLock::new(collections),
        }
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn find_all(&self, collection: &str, sort: &Sort) -> Result<Vec<Document>, DatastoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| sorted(docs, sort))
            .unwrap_or_default())
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, DatastoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| filter.matches(d)).cloned()))
    }

    async fn create(&self, collection: &str, doc: Document) -> Result<Document, DatastoreError> {
        let doc = with_new_id(doc);
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .push(doc.clone());
        Ok(doc)
    }

    async fn create_if_absent(
        &self,
        collection: &str,
        unique: &Filter,
        doc: Document,
    ) -> Result<Option<Document>, DatastoreError> {
        let mut collections = self.collections.write().await;
        if contains(&collections, collection, unique) {
            return Ok(None);
        }
        let doc = with_new_id(doc);
        collections
            .entry(collection.to_string())
            .or_default()
            .push(doc.clone());
        Ok(Some(doc))
    }
}

/// A [`MemoryDatastore`] mirrored to a JSON file after every write.
///
/// A write only becomes visible once the snapshot has been renamed into place, and
/// nothing after the rename awaits, so a write abandoned by a deadline leaves neither
/// memory nor disk changed.
pub struct JsonFileDatastore {
    path: PathBuf,
    memory: MemoryDatastore,
}

impl JsonFileDatastore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, DatastoreError> {
        let path = path.into();

        let collections = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => Collections::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let parent = match path.parent() {
                    Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                    _ => PathBuf::from("."),
                };
                if !tokio::fs::try_exists(&parent).await? {
                    return Err(DatastoreError::Unavailable(format!(
                        "directory {:?} does not exist",
                        parent
                    )));
                }
                Collections::new()
            }
            Err(e) => return Err(e.into()),
        };

        let count: usize = collections.values().map(Vec::len).sum();
        info!("[datastore] 📂 Opened {:?} ({} documents)", path, count);

        Ok(Self {
            path,
            memory: MemoryDatastore::with_collections(collections),
        })
    }

    /// Write `collections` plus `doc` to disk, then apply it to `collections`.
    async fn commit(
        &self,
        collections: &mut Collections,
        collection: &str,
        doc: Document,
    ) -> Result<Document, DatastoreError> {
        let doc = with_new_id(doc);
        let mut snapshot = collections.clone();
        snapshot
            .entry(collection.to_string())
            .or_default()
            .push(doc.clone());

        let json = serde_json::to_vec_pretty(&snapshot)?;
        let tmp = TempSnapshot(
            self.path
                .with_extension(format!("{}.tmp", Uuid::new_v4().simple())),
        );
        tokio::fs::write(&tmp.0, json).await?;

        // commit point: no await from here on
        std::fs::rename(&tmp.0, &self.path)?;
        *collections = snapshot;
        Ok(doc)
    }
}

/// Removes a snapshot that never got renamed into place.
struct TempSnapshot(PathBuf);

impl Drop for TempSnapshot {
    fn drop(&mut self) {
        if self.0.exists() {
            let _ = std::fs::remove_file(&self.0);
        }
    }
}

#[async_trait]
impl Datastore for JsonFileDatastore {
    async fn find_all(&self, collection: &str, sort: &Sort) -> Result<Vec<Document>, DatastoreError> {
        self.memory.find_all(collection, sort).await
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, DatastoreError> {
        self.memory.find_one(collection, filter).await
    }

    async fn create(&self, collection: &str, doc: Document) -> Result<Document, DatastoreError> {
        let mut collections = self.memory.collections.write().await;
        self.commit(&mut collections, collection, doc).await
    }

    async fn create_if_absent(
        &self,
        collection: &str,
        unique: &Filter,
        doc: Document,
    ) -> Result<Option<Document>, DatastoreError> {
        let mut collections = self.memory.collections.write().await;
        if contains(&collections, collection, unique) {
            return Ok(None);
        }
        self.commit(&mut collections, collection, doc).await.map(Some)
    }
}

/// Open the store named by a connection string.
pub async fn connect(url: &str) -> Result<Arc<dyn Datastore>, DatastoreError> {
    if url == "memory:" || url == "memory" {
        debug!("[datastore] Using in-memory datastore");
        return Ok(Arc::new(MemoryDatastore::new()));
    }
    if let Some(path) = url.strip_prefix("file:") {
        let path = path.strip_prefix("//").unwrap_or(path);
        if path.is_empty() {
            return Err(DatastoreError::Unavailable(
                "file: connection string needs a path".to_string(),
            ));
        }
        return Ok(Arc::new(JsonFileDatastore::open(path).await?));
    }
    Err(DatastoreError::Unavailable(format!(
        "unsupported connection string {:?} (expected memory: or file:<path>)",
        url
    )))
}

/// Connects on first use and keeps the handle for the life of the process.
pub struct LazyDatastore {
    url: String,
    inner: OnceCell<Arc<dyn Datastore>>,
}

impl LazyDatastore {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            inner: OnceCell::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.initialized()
    }

    async fn get(&self) -> Result<&Arc<dyn Datastore>, DatastoreError> {
        self.inner
            .get_or_try_init(|| async {
                match connect(&self.url).await {
                    Ok(store) => {
                        info!("[datastore] ✅ Connected");
                        Ok(store)
                    }
                    Err(e) => {
                        warn!("[datastore] ❌ Connection failed, will retry on next use: {}", e);
                        Err(e)
                    }
                }
            })
            .await
    }
}

#[async_trait]
impl Datastore for LazyDatastore {
    async fn find_all(&self, collection: &str, sort: &Sort) -> Result<Vec<Document>, DatastoreError> {
        self.get().await?.find_all(collection, sort).await
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, DatastoreError> {
        self.get().await?.find_one(collection, filter).await
    }

    async fn create(&self, collection: &str, doc: Document) -> Result<Document, DatastoreError> {
        self.get().await?.create(collection, doc).await
    }

    async fn create_if_absent(
        &self,
        collection: &str,
        unique: &Filter,
        doc: Document,
    ) -> Result<Option<Document>, DatastoreError> {
        self.get()
            .await?
            .create_if_absent(collection, unique, doc)
            .await
    }
}

//! Object storage seam.
//!
//! Workflow documents and block data live in a key-value object store.
//! Every stored object carries a revision so that document writes can be
//! made conditional on what the writer last read.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::instrument;

/// An object read from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// The object contents.
    pub data: Bytes,
    /// Revision of the object at read time.
    pub revision: u64,
}

/// Precondition for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutCondition {
    /// Write unconditionally.
    Always,
    /// Write only if the key does not exist yet.
    IfAbsent,
    /// Write only if the key is still at this revision.
    IfRevision(u64),
}

/// Errors from object store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectStoreError {
    /// Key not found.
    NotFound { key: String },
    /// The write precondition did not hold.
    Conflict { key: String },
    /// The key cannot be stored by this backend.
    InvalidKey { key: String },
    /// Failed to store data.
    StoreFailed { message: String },
    /// Failed to retrieve data.
    RetrieveFailed { message: String },
}

impl ObjectStoreError {
    /// Returns true for failures that may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreFailed { .. } | Self::RetrieveFailed { .. })
    }
}

impl std::fmt::Display for ObjectStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { key } => write!(f, "object not found: {key}"),
            Self::Conflict { key } => write!(f, "object changed concurrently: {key}"),
            Self::InvalidKey { key } => write!(f, "invalid object key: {key}"),
            Self::StoreFailed { message } => write!(f, "object store put failed: {message}"),
            Self::RetrieveFailed { message } => write!(f, "object store get failed: {message}"),
        }
    }
}

impl std::error::Error for ObjectStoreError {}

/// Trait for object storage operations.
///
/// Implemented over NATS JetStream key-value, the local filesystem, and
/// memory.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Retrieves an object and its revision.
    async fn get(&self, key: &str) -> Result<StoredObject, ObjectStoreError>;

    /// Stores an object if `condition` holds and returns the new revision.
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        condition: PutCondition,
    ) -> Result<u64, ObjectStoreError>;
}

#[async_trait]
impl<S: ObjectStore + ?Sized> ObjectStore for Arc<S> {
    async fn get(&self, key: &str) -> Result<StoredObject, ObjectStoreError> {
        (**self).get(key).await
    }

    async fn put(
        &self,
        key: &str,
        data: Bytes,
        condition: PutCondition,
    ) -> Result<u64, ObjectStoreError> {
        (**self).put(key, data, condition).await
    }
}

fn check_condition(
    key: &str,
    current: Option<u64>,
    condition: PutCondition,
) -> Result<(), ObjectStoreError> {
    let holds = match condition {
        PutCondition::Always => true,
        PutCondition::IfAbsent => current.is_none(),
        PutCondition::IfRevision(expected) => current == Some(expected),
    };
    if holds {
        Ok(())
    } else {
        Err(ObjectStoreError::Conflict {
            key: key.to_string(),
        })
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: HashMap<String, StoredObject>,
    sequence: u64,
}

/// In-memory object store.
///
/// Revisions come from one store-wide sequence, as in a JetStream bucket.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryObjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored objects.
    pub async fn len(&self) -> usize {
        self.state.lock().await.objects.len()
    }

    /// Returns true if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> Result<StoredObject, ObjectStoreError> {
        self.state
            .lock()
            .await
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound {
                key: key.to_string(),
            })
    }

    async fn put(
        &self,
        key: &str,
        data: Bytes,
        condition: PutCondition,
    ) -> Result<u64, ObjectStoreError> {
        let mut state = self.state.lock().await;
        let current = state.objects.get(key).map(|o| o.revision);
        check_condition(key, current, condition)?;
        state.sequence += 1;
        let revision = state.sequence;
        state
            .objects
            .insert(key.to_string(), StoredObject { data, revision });
        Ok(revision)
    }
}

/// Directory below the root holding per-key generation numbers.
const REVISIONS_DIR: &str = ".revisions";

/// Object store over a local directory.
///
/// Keys map to relative paths below the root. Each key has a generation
/// number kept in a sidecar file under `.revisions/`, incremented on every
/// write. Conditional writes are serialized within one process only.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FsObjectStore {
    /// Creates a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    fn relative(key: &str) -> Result<&Path, ObjectStoreError> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
            && relative.components().next() != Some(Component::Normal(OsStr::new(REVISIONS_DIR)));
        if !valid {
            return Err(ObjectStoreError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(relative)
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        Ok(self.root.join(Self::relative(key)?))
    }

    fn revision_path_for(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        Ok(self.root.join(REVISIONS_DIR).join(Self::relative(key)?))
    }

    // The generation is read before the data and written after it, so data
    // is never older than the generation it is paired with.
    async fn read(&self, key: &str) -> Result<Option<StoredObject>, ObjectStoreError> {
        let revision = read_generation(&self.revision_path_for(key)?)
            .await?
            .unwrap_or(0);
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(contents) => Ok(Some(StoredObject {
                data: Bytes::from(contents),
                revision,
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(retrieve_failed(&path, e)),
        }
    }
}

async fn read_generation(path: &Path) -> Result<Option<u64>, ObjectStoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ObjectStoreError::RetrieveFailed {
                message: format!("{}: {e}", path.display()),
            }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(retrieve_failed(path, e)),
    }
}

/// Writes through a staging file and a rename.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), ObjectStoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| store_failed(parent, e))?;
    }
    let mut staging = path.to_path_buf().into_os_string();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);
    tokio::fs::write(&staging, data)
        .await
        .map_err(|e| store_failed(&staging, e))?;
    tokio::fs::rename(&staging, path)
        .await
        .map_err(|e| store_failed(path, e))
}

fn retrieve_failed(path: &Path, e: std::io::Error) -> ObjectStoreError {
    ObjectStoreError::RetrieveFailed {
        message: format!("{}: {e}", path.display()),
    }
}

fn store_failed(path: &Path, e: std::io::Error) -> ObjectStoreError {
    ObjectStoreError::StoreFailed {
        message: format!("{}: {e}", path.display()),
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<StoredObject, ObjectStoreError> {
        self.read(key)
            .await?
            .ok_or_else(|| ObjectStoreError::NotFound {
                key: key.to_string(),
            })
    }

    #[instrument(skip(self, data), fields(len = data.len()))]
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        condition: PutCondition,
    ) -> Result<u64, ObjectStoreError> {
        let path = self.path_for(key)?;
        let revision_path = self.revision_path_for(key)?;
        let _guard = self.write_lock.lock().await;

        if condition != PutCondition::Always {
            let current = self.read(key).await?.map(|o| o.revision);
            check_condition(key, current, condition)?;
        }

        let next = read_generation(&revision_path).await?.unwrap_or(0) + 1;
        write_atomic(&path, &data).await?;
        write_atomic(&revision_path, next.to_string().as_bytes()).await?;
        Ok(next)
    }
}

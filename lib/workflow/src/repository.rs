//! Persistence adapter for workflow documents and block data.
//!
//! Storage layout, per workflow:
//!
//! - `{workflow_id}/workflow.yml`: the document
//! - `{workflow_id}/data/{data_key}`: block data blobs
//!
//! Transient store failures are retried with exponential backoff before
//! they surface.

use crate::document::WorkflowDocument;
use crate::error::DocumentError;
use crate::port::DataKey;
use crate::store::{ObjectStore, ObjectStoreError, PutCondition};
use blockflow_core::WorkflowId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Returns the storage key of a workflow's document.
#[must_use]
pub fn document_key(workflow_id: &WorkflowId) -> String {
    format!("{workflow_id}/workflow.yml")
}

/// Returns the storage key of one data blob.
#[must_use]
pub fn data_key(workflow_id: &WorkflowId, key: &DataKey) -> String {
    format!("{workflow_id}/data/{key}")
}

/// Exponential backoff for transient store errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Returns the delay before retry number `attempt` (0-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ms = self
            .initial_backoff_ms
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Runs `op`, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns the first permanent error, or the last transient one once
    /// retries are exhausted.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, ObjectStoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ObjectStoreError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let backoff = self.backoff(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "retrying object store operation"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// Errors from the persistence adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// The object store failed.
    Store(ObjectStoreError),
    /// The stored document could not be read or written.
    Document(DocumentError),
    /// The document changed since it was loaded.
    Conflict { workflow_id: WorkflowId },
}

impl RepositoryError {
    /// Returns true for failures that may succeed on redelivery.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_transient())
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "storage error: {e}"),
            Self::Document(e) => write!(f, "{e}"),
            Self::Conflict { workflow_id } => {
                write!(f, "workflow {workflow_id} was modified concurrently")
            }
        }
    }
}

impl std::error::Error for RepositoryError {}

impl From<ObjectStoreError> for RepositoryError {
    fn from(e: ObjectStoreError) -> Self {
        Self::Store(e)
    }
}

impl From<DocumentError> for RepositoryError {
    fn from(e: DocumentError) -> Self {
        Self::Document(e)
    }
}

/// A document together with the revision it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedDocument {
    /// The parsed document.
    pub document: WorkflowDocument,
    /// Store revision, or `None` if the document does not exist yet.
    pub revision: Option<u64>,
}

/// Reads and writes workflow documents and their data.
#[derive(Debug, Clone)]
pub struct DocumentRepository<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S: ObjectStore> DocumentRepository<S> {
    /// Creates a repository over `store`.
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Loads a document.
    ///
    /// A missing document is not an error: an empty one is returned with no
    /// revision, and nothing is written.
    ///
    /// # Errors
    ///
    /// Returns `Document` if the stored text is malformed, or `Store` if the
    /// store keeps failing.
    #[instrument(skip(self), fields(workflow_id = %workflow_id))]
    pub async fn load(&self, workflow_id: &WorkflowId) -> Result<LoadedDocument, RepositoryError> {
        let key = document_key(workflow_id);
        match self.retry.run("load", || self.store.get(&key)).await {
            Ok(object) => Ok(LoadedDocument {
                document: WorkflowDocument::from_bytes(&object.data)?,
                revision: Some(object.revision),
            }),
            Err(ObjectStoreError::NotFound { .. }) => {
                debug!("document missing, bootstrapping empty graph");
                Ok(LoadedDocument {
                    document: WorkflowDocument::new(),
                    revision: None,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Loads a document, persisting an empty one if it does not exist.
    ///
    /// # Errors
    ///
    /// As [`Self::load`] and [`Self::save`].
    pub async fn load_or_create(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<LoadedDocument, RepositoryError> {
        let loaded = self.load(workflow_id).await?;
        if loaded.revision.is_some() {
            return Ok(loaded);
        }
        match self.save(workflow_id, &loaded.document, None).await {
            Ok(revision) => Ok(LoadedDocument {
                document: loaded.document,
                revision: Some(revision),
            }),
            // Someone else created it first.
            Err(RepositoryError::Conflict { .. }) => self.load(workflow_id).await,
            Err(e) => Err(e),
        }
    }

    /// Saves a document if it is still at `expected`.
    ///
    /// `None` means the document must not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if another writer got there first.
    #[instrument(skip(self, document), fields(workflow_id = %workflow_id))]
    pub async fn save(
        &self,
        workflow_id: &WorkflowId,
        document: &WorkflowDocument,
        expected: Option<u64>,
    ) -> Result<u64, RepositoryError> {
        let key = document_key(workflow_id);
        let data = Bytes::from(document.to_yaml()?);
        let condition = expected.map_or(PutCondition::IfAbsent, PutCondition::IfRevision);
        match self
            .retry
            .run("save", || self.store.put(&key, data.clone(), condition))
            .await
        {
            Ok(revision) => {
                debug!(revision, status = %document.status, "document saved");
                Ok(revision)
            }
            Err(ObjectStoreError::Conflict { .. }) => Err(RepositoryError::Conflict {
                workflow_id: workflow_id.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads a data blob.
    ///
    /// # Errors
    ///
    /// Returns `Store` with `NotFound` if no blob has the key.
    pub async fn get_data(
        &self,
        workflow_id: &WorkflowId,
        key: &DataKey,
    ) -> Result<Bytes, RepositoryError> {
        let key = data_key(workflow_id, key);
        let object = self.retry.run("get_data", || self.store.get(&key)).await?;
        Ok(object.data)
    }

    /// Writes a data blob, replacing any previous contents.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the store keeps failing.
    pub async fn put_data(
        &self,
        workflow_id: &WorkflowId,
        key: &DataKey,
        data: Bytes,
    ) -> Result<(), RepositoryError> {
        let key = data_key(workflow_id, key);
        self.retry
            .run("put_data", || {
                self.store.put(&key, data.clone(), PutCondition::Always)
            })
            .await?;
        Ok(())
    }
}

//! NATS integration for workflow execution.
//!
//! - Documents and block data live in a JetStream key-value bucket whose
//!   entry revisions back conditional writes.
//! - Wake-ups travel on a work-queue stream, one subject per workflow, in a
//!   versioned envelope.
//! - A durable pull consumer with explicit acknowledgement feeds the worker.

use crate::dispatch::BlockExecutor;
use crate::envelope::Envelope;
use crate::queue::{QueueError, WakeupQueue, WakeupSignal};
use crate::store::{ObjectStore, ObjectStoreError, PutCondition, StoredObject};
use crate::worker::{Disposition, Worker, WorkerConfig};
use async_nats::jetstream;
use async_nats::jetstream::AckKind;
use async_nats::jetstream::kv;
use async_trait::async_trait;
use blockflow_core::WorkflowId;
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

/// Subject prefix for wake-up signals.
const WAKEUP_SUBJECT_PREFIX: &str = "blockflow.wakeup";

/// Stream name for wake-ups.
const WAKEUP_STREAM_NAME: &str = "BLOCKFLOW_WAKEUP";

/// Durable consumer name for workers.
const WAKEUP_CONSUMER_NAME: &str = "blockflow-worker";

/// Key-value bucket for documents and data.
const DOCUMENTS_BUCKET_NAME: &str = "blockflow-documents";

/// Largest value accepted by the bucket, in bytes.
const DEFAULT_MAX_VALUE_SIZE: i32 = 8 * 1024 * 1024;

/// Configuration for NATS-backed execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL.
    pub url: String,
    /// Key-value bucket name (defaults to blockflow-documents).
    #[serde(default)]
    pub documents_bucket: Option<String>,
    /// Wake-up stream name (defaults to BLOCKFLOW_WAKEUP).
    #[serde(default)]
    pub wakeup_stream: Option<String>,
    /// Durable consumer name (defaults to blockflow-worker).
    #[serde(default)]
    pub wakeup_consumer: Option<String>,
    /// Largest stored value in bytes.
    #[serde(default)]
    pub max_value_size: Option<i32>,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self::new("nats://127.0.0.1:4222")
    }
}

impl NatsConfig {
    /// Creates a new config with the given NATS URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            documents_bucket: None,
            wakeup_stream: None,
            wakeup_consumer: None,
            max_value_size: None,
        }
    }

    fn documents_bucket(&self) -> &str {
        self.documents_bucket
            .as_deref()
            .unwrap_or(DOCUMENTS_BUCKET_NAME)
    }

    fn wakeup_stream(&self) -> &str {
        self.wakeup_stream.as_deref().unwrap_or(WAKEUP_STREAM_NAME)
    }

    fn wakeup_consumer(&self) -> &str {
        self.wakeup_consumer
            .as_deref()
            .unwrap_or(WAKEUP_CONSUMER_NAME)
    }

    fn max_value_size(&self) -> i32 {
        self.max_value_size.unwrap_or(DEFAULT_MAX_VALUE_SIZE)
    }
}

/// Connects to NATS and returns a JetStream context.
///
/// # Errors
///
/// Returns `ConnectionFailed` if the server cannot be reached.
pub async fn connect(config: &NatsConfig) -> Result<jetstream::Context, QueueError> {
    let client = async_nats::connect(&config.url)
        .await
        .map_err(|e| QueueError::ConnectionFailed {
            message: e.to_string(),
        })?;
    info!(url = %config.url, "connected to NATS");
    Ok(jetstream::new(client))
}

/// Returns the subject carrying a workflow's wake-ups.
fn wakeup_subject(workflow_id: &WorkflowId) -> String {
    format!("{WAKEUP_SUBJECT_PREFIX}.{workflow_id}")
}

fn is_conflict(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("wrong last sequence") || message.contains("already exists")
}

/// JetStream key-value object store.
///
/// The entry revision is the stream sequence of the last write, so it
/// serves directly as the document revision.
#[derive(Clone)]
pub struct NatsKvStore {
    kv: kv::Store,
}

impl NatsKvStore {
    /// Opens the bucket, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns `StoreFailed` if the bucket cannot be opened or created.
    pub async fn new(jetstream: &jetstream::Context, config: &NatsConfig) -> Result<Self, ObjectStoreError> {
        let bucket = config.documents_bucket();
        let kv = match jetstream.get_key_value(bucket).await {
            Ok(kv) => kv,
            Err(_) => {
                info!(bucket, "creating key-value bucket");
                jetstream
                    .create_key_value(kv::Config {
                        bucket: bucket.to_string(),
                        history: 1,
                        max_value_size: config.max_value_size(),
                        storage: jetstream::stream::StorageType::File,
                        ..Default::default()
                    })
                    .await
                    .map_err(|e| ObjectStoreError::StoreFailed {
                        message: format!("failed to create bucket {bucket}: {e}"),
                    })?
            }
        };
        Ok(Self { kv })
    }
}

#[async_trait]
impl ObjectStore for NatsKvStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<StoredObject, ObjectStoreError> {
        let entry = self
            .kv
            .entry(key)
            .await
            .map_err(|e| ObjectStoreError::RetrieveFailed {
                message: e.to_string(),
            })?;
        match entry {
            Some(entry) if matches!(entry.operation, kv::Operation::Put) => Ok(StoredObject {
                data: entry.value,
                revision: entry.revision,
            }),
            _ => Err(ObjectStoreError::NotFound {
                key: key.to_string(),
            }),
        }
    }

    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn put(&self, key: &str, data: Bytes, condition: PutCondition) -> Result<u64, ObjectStoreError> {
        let result = match condition {
            PutCondition::Always => self.kv.put(key, data).await.map_err(|e| e.to_string()),
            PutCondition::IfAbsent => self.kv.create(key, data).await.map_err(|e| e.to_string()),
            PutCondition::IfRevision(revision) => self
                .kv
                .update(key, data, revision)
                .await
                .map_err(|e| e.to_string()),
        };
        result.map_err(|message| {
            if is_conflict(&message) {
                debug!(key, "conditional write lost");
                ObjectStoreError::Conflict {
                    key: key.to_string(),
                }
            } else {
                ObjectStoreError::StoreFailed { message }
            }
        })
    }
}

/// Wake-up queue over a JetStream work-queue stream.
#[derive(Clone)]
pub struct NatsWakeupQueue {
    jetstream: jetstream::Context,
    config: NatsConfig,
}

impl NatsWakeupQueue {
    /// Ensures the wake-up stream exists.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionFailed` if the stream cannot be created.
    pub async fn new(jetstream: jetstream::Context, config: NatsConfig) -> Result<Self, QueueError> {
        jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: config.wakeup_stream().to_string(),
                subjects: vec![format!("{WAKEUP_SUBJECT_PREFIX}.>")],
                storage: jetstream::stream::StorageType::File,
                retention: jetstream::stream::RetentionPolicy::WorkQueue,
                ..Default::default()
            })
            .await
            .map_err(|e| QueueError::ConnectionFailed {
                message: format!("failed to create wake-up stream: {e}"),
            })?;
        Ok(Self { jetstream, config })
    }

    /// Consumes wake-ups with the durable consumer until the stream ends.
    ///
    /// Each message is handled in its own task, at most `concurrency` at a
    /// time. Malformed messages are terminated.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionFailed` if the consumer cannot be created or the
    /// message stream cannot be opened.
    pub async fn consume<S, E, Q>(&self, worker: Worker<S, E, Q>, worker_config: &WorkerConfig) -> Result<(), QueueError>
    where
        S: ObjectStore + 'static,
        E: BlockExecutor + 'static,
        Q: WakeupQueue + 'static,
    {
        let consumer_name = self.config.wakeup_consumer();
        let stream = self
            .jetstream
            .get_stream(self.config.wakeup_stream())
            .await
            .map_err(|e| QueueError::ConnectionFailed {
                message: format!("failed to get wake-up stream: {e}"),
            })?;
        let consumer = stream
            .get_or_create_consumer(
                consumer_name,
                jetstream::consumer::pull::Config {
                    durable_name: Some(consumer_name.to_string()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ack_wait: worker_config.ack_wait(),
                    max_deliver: i64::from(worker_config.max_deliver),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| QueueError::ConnectionFailed {
                message: format!("failed to create consumer {consumer_name}: {e}"),
            })?;
        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| QueueError::ConnectionFailed {
                message: format!("failed to open message stream: {e}"),
            })?;

        let permits = Arc::new(Semaphore::new(worker_config.concurrency.max(1)));
        info!(consumer = consumer_name, "wake-up consumer started");

        while let Some(message) = messages.next().await {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "failed to receive wake-up");
                    continue;
                }
            };
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let worker = worker.clone();
            let retry_delay = worker_config.retry_delay();
            tokio::spawn(async move {
                let ack = match Envelope::<WakeupSignal>::decode(&message.payload) {
                    Ok(envelope) => match worker.process(&envelope.into_payload()).await {
                        Disposition::Ack => AckKind::Ack,
                        Disposition::Retry => AckKind::Nak(Some(retry_delay)),
                        Disposition::Discard => AckKind::Term,
                    },
                    Err(e) => {
                        error!(subject = %message.subject, error = %e, "undecodable wake-up");
                        AckKind::Term
                    }
                };
                if let Err(e) = message.ack_with(ack).await {
                    warn!(error = %e, "failed to acknowledge wake-up");
                }
                drop(permit);
            });
        }
        info!("wake-up stream ended");
        Ok(())
    }
}

#[async_trait]
impl WakeupQueue for NatsWakeupQueue {
    #[instrument(skip(self, signal), fields(workflow_id = %signal.workflow_id))]
    async fn emit(&self, signal: WakeupSignal) -> Result<(), QueueError> {
        let subject = wakeup_subject(&signal.workflow_id);
        let bytes = Envelope::new(signal)
            .to_json_bytes()
            .map_err(|e| QueueError::PublishFailed {
                message: format!("failed to serialize wake-up: {e}"),
            })?;

        self.jetstream
            .publish(subject, bytes.into())
            .await
            .map_err(|e| QueueError::PublishFailed {
                message: e.to_string(),
            })?
            .await
            .map_err(|e| QueueError::PublishFailed {
                message: e.to_string(),
            })?;

        Ok(())
    }
}

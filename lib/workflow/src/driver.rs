//! The driver loop.
//!
//! Each wake-up runs exactly one invocation of [`Driver::step`]: load the
//! document, take at most one scheduling step, save, and re-arm with a new
//! wake-up while the run is still pending.
//!
//! Every save is conditional on the revision read at load. The save before
//! a dispatch is the fencing point: of two invocations racing on the same
//! revision, only one gets to call the executor.

use crate::dispatch::{BlockExecutor, DispatchOutcome, apply_outcome};
use crate::document::{RunStatus, WorkflowDocument};
use crate::error::DocumentError;
use crate::node::NodeId;
use crate::queue::{QueueError, WakeupQueue, WakeupSignal};
use crate::repository::{DocumentRepository, RepositoryError, RetryPolicy};
use crate::step::{Effect, advance};
use crate::store::ObjectStore;
use blockflow_core::{Result, WorkflowId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Driver settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Upper bound on one executor call.
    pub dispatch_timeout_secs: u64,
    /// Extra time a pending dispatch is presumed alive beyond the timeout.
    pub dispatch_grace_secs: u64,
    /// Retry policy for transient store errors.
    pub retry: RetryPolicy,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout_secs: 300,
            dispatch_grace_secs: 30,
            retry: RetryPolicy::default(),
        }
    }
}

impl DriverConfig {
    /// Returns the executor call timeout.
    #[must_use]
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    fn dispatch_lease(&self) -> chrono::Duration {
        let lease = Duration::from_secs(self.dispatch_timeout_secs.saturating_add(self.dispatch_grace_secs));
        chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::days(365))
    }
}

/// Errors from a driver invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The stored document cannot be scheduled. Retrying will not help.
    MalformedDocument {
        workflow_id: WorkflowId,
        message: String,
    },
    /// Another invocation changed the document first.
    Conflict { workflow_id: WorkflowId },
    /// The object store failed.
    Store { message: String, transient: bool },
    /// The wake-up queue failed.
    Queue(QueueError),
    /// The operation is not allowed while a run is in progress.
    RunInProgress { workflow_id: WorkflowId },
}

impl DriverError {
    fn from_repository(workflow_id: &WorkflowId, e: RepositoryError) -> Self {
        match e {
            RepositoryError::Document(e) => Self::MalformedDocument {
                workflow_id: workflow_id.clone(),
                message: e.to_string(),
            },
            RepositoryError::Conflict { workflow_id } => Self::Conflict { workflow_id },
            RepositoryError::Store(e) => Self::Store {
                transient: e.is_transient(),
                message: e.to_string(),
            },
        }
    }

    fn malformed(workflow_id: &WorkflowId, e: impl Into<DocumentError>) -> Self {
        Self::MalformedDocument {
            workflow_id: workflow_id.clone(),
            message: e.into().to_string(),
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedDocument {
                workflow_id,
                message,
            } => write!(f, "workflow {workflow_id} cannot be scheduled: {message}"),
            Self::Conflict { workflow_id } => {
                write!(f, "workflow {workflow_id} was advanced by another invocation")
            }
            Self::Store { message, .. } => write!(f, "{message}"),
            Self::Queue(e) => write!(f, "{e}"),
            Self::RunInProgress { workflow_id } => {
                write!(f, "workflow {workflow_id} is running")
            }
        }
    }
}

impl std::error::Error for DriverError {}

impl From<QueueError> for DriverError {
    fn from(e: QueueError) -> Self {
        Self::Queue(e)
    }
}

/// What one invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The document is not pending; nothing was done.
    Skipped { status: RunStatus },
    /// A dispatch is in flight elsewhere; nothing was done.
    Waiting { node_id: NodeId },
    /// No work remained and the run was marked finished.
    Completed,
    /// A node's outputs were propagated.
    Propagated { node_id: NodeId },
    /// A node was dispatched and its outcome recorded.
    Dispatched {
        node_id: NodeId,
        outcome: DispatchOutcome,
    },
}

/// Runs workflow steps against injected collaborators.
#[derive(Debug, Clone)]
pub struct Driver<S, E, Q> {
    repository: DocumentRepository<S>,
    executor: E,
    queue: Q,
    config: DriverConfig,
}

impl<S, E, Q> Driver<S, E, Q>
where
    S: ObjectStore,
    E: BlockExecutor,
    Q: WakeupQueue,
{
    /// Creates a driver.
    pub fn new(store: S, executor: E, queue: Q, config: DriverConfig) -> Self {
        Self {
            repository: DocumentRepository::new(store, config.retry.clone()),
            executor,
            queue,
            config,
        }
    }

    /// Returns the document repository.
    pub fn repository(&self) -> &DocumentRepository<S> {
        &self.repository
    }

    /// Performs one invocation for `workflow_id`.
    ///
    /// # Errors
    ///
    /// `MalformedDocument` if the document cannot be parsed or scheduled,
    /// `Conflict` if another invocation saved first, `Store` or `Queue` for
    /// collaborator failures.
    #[instrument(skip(self), fields(workflow_id = %workflow_id))]
    pub async fn step(&self, workflow_id: &WorkflowId) -> Result<StepOutcome, DriverError> {
        let loaded = self
            .repository
            .load(workflow_id)
            .await
            .map_err(|e| DriverError::from_repository(workflow_id, e))?;
        if loaded.document.status != RunStatus::Pending {
            debug!(status = %loaded.document.status, "workflow not pending, skipping");
            return Ok(StepOutcome::Skipped {
                status: loaded.document.status,
            });
        }

        let step = advance(
            workflow_id,
            loaded.document,
            Utc::now(),
            self.config.dispatch_lease(),
        )
        .map_err(|e| DriverError::malformed(workflow_id, e))?;
        debug!(action = %step.action, "selected action");

        match step.effect {
            Effect::Waiting { node_id } => {
                debug!(node_id = %node_id, "dispatch in flight, waiting");
                Ok(StepOutcome::Waiting { node_id })
            }
            Effect::Completed => {
                self.save(workflow_id, &step.document, loaded.revision).await?;
                info!("workflow finished");
                Ok(StepOutcome::Completed)
            }
            Effect::Propagated(propagation) => {
                self.save(workflow_id, &step.document, loaded.revision).await?;
                debug!(
                    node_id = %propagation.source,
                    fed = propagation.fed.len(),
                    "outputs propagated"
                );
                self.rearm(workflow_id).await?;
                Ok(StepOutcome::Propagated {
                    node_id: propagation.source,
                })
            }
            Effect::Rejected { node_id, error } => {
                self.save(workflow_id, &step.document, loaded.revision).await?;
                warn!(node_id = %node_id, error = %error, "node could not be dispatched, run aborted");
                Ok(StepOutcome::Dispatched {
                    node_id,
                    outcome: DispatchOutcome::Failed(error),
                })
            }
            Effect::Dispatch(request) => {
                let revision = self.save(workflow_id, &step.document, loaded.revision).await?;
                let node_id = request.node_id.clone();
                info!(node_id = %node_id, service = %request.service, "dispatching block");

                let started = Instant::now();
                let timeout = self.config.dispatch_timeout();
                let outcome = match tokio::time::timeout(timeout, self.executor.execute(&request)).await {
                    Ok(Ok(())) => DispatchOutcome::Succeeded,
                    Ok(Err(e)) => DispatchOutcome::Failed(e),
                    Err(_) => DispatchOutcome::TimedOut,
                };
                let elapsed_ms = started.elapsed().as_millis() as u64;
                match &outcome {
                    DispatchOutcome::Succeeded => {
                        info!(node_id = %node_id, elapsed_ms, "block succeeded");
                    }
                    DispatchOutcome::Failed(e) => {
                        warn!(node_id = %node_id, elapsed_ms, error = %e, "block failed, run aborted");
                    }
                    DispatchOutcome::TimedOut => {
                        warn!(node_id = %node_id, timeout_secs = timeout.as_secs(), "block timed out, run aborted");
                    }
                }

                let mut document = step.document;
                apply_outcome(&mut document, &node_id, &outcome)
                    .map_err(|e| DriverError::malformed(workflow_id, e))?;
                self.save(workflow_id, &document, Some(revision)).await?;
                if document.status == RunStatus::Pending {
                    self.rearm(workflow_id).await?;
                }
                Ok(StepOutcome::Dispatched { node_id, outcome })
            }
        }
    }

    /// Requests a run: marks the document pending and emits a wake-up.
    ///
    /// A run already in progress only gets a fresh wake-up, which is
    /// harmless under at-least-once processing.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be loaded or saved, or the
    /// wake-up cannot be emitted.
    #[instrument(skip(self), fields(workflow_id = %workflow_id))]
    pub async fn request_run(&self, workflow_id: &WorkflowId) -> Result<(), DriverError> {
        let mut loaded = self
            .repository
            .load_or_create(workflow_id)
            .await
            .map_err(|e| DriverError::from_repository(workflow_id, e))?;
        if loaded.document.status != RunStatus::Pending {
            loaded.document.status = RunStatus::Pending;
            self.save(workflow_id, &loaded.document, loaded.revision).await?;
            info!("run requested");
        } else {
            debug!("run already pending, re-emitting wake-up");
        }
        self.rearm(workflow_id).await
    }

    /// Resets every unlocked node and port to idle.
    ///
    /// # Errors
    ///
    /// Returns `RunInProgress` while the document is pending.
    #[instrument(skip(self), fields(workflow_id = %workflow_id))]
    pub async fn reset(&self, workflow_id: &WorkflowId) -> Result<WorkflowDocument, DriverError> {
        let mut loaded = self
            .repository
            .load_or_create(workflow_id)
            .await
            .map_err(|e| DriverError::from_repository(workflow_id, e))?;
        if loaded.document.status == RunStatus::Pending {
            return Err(DriverError::RunInProgress {
                workflow_id: workflow_id.clone(),
            }
            .into());
        }
        loaded.document.reset_statuses();
        self.save(workflow_id, &loaded.document, loaded.revision).await?;
        info!("statuses reset");
        Ok(loaded.document)
    }

    async fn save(
        &self,
        workflow_id: &WorkflowId,
        document: &WorkflowDocument,
        revision: Option<u64>,
    ) -> Result<u64, DriverError> {
        let revision = self
            .repository
            .save(workflow_id, document, revision)
            .await
            .map_err(|e| DriverError::from_repository(workflow_id, e))?;
        Ok(revision)
    }

    async fn rearm(&self, workflow_id: &WorkflowId) -> Result<(), DriverError> {
        self.queue
            .emit(WakeupSignal::new(workflow_id.clone()))
            .await
            .map_err(DriverError::Queue)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{BlockError, ScriptedExecutor};
    use crate::edge::PortRef;
    use crate::node::{Node, NodeStatus};
    use crate::port::{Port, PortStatus};
    use crate::queue::ChannelWakeupQueue;
    use crate::store::MemoryObjectStore;
    use tokio::sync::mpsc::UnboundedReceiver;

    type TestDriver = Driver<MemoryObjectStore, ScriptedExecutor, ChannelWakeupQueue>;

    struct Harness {
        driver: TestDriver,
        executor: ScriptedExecutor,
        store: MemoryObjectStore,
        wakeups: UnboundedReceiver<WakeupSignal>,
        workflow_id: WorkflowId,
    }

    impl Harness {
        async fn new(executor: ScriptedExecutor, document: WorkflowDocument) -> Self {
            Self::with_config(executor, document, DriverConfig::default()).await
        }

        async fn with_config(
            executor: ScriptedExecutor,
            document: WorkflowDocument,
            config: DriverConfig,
        ) -> Self {
            let store = MemoryObjectStore::new();
            let (queue, wakeups) = ChannelWakeupQueue::channel();
            let driver = Driver::new(store.clone(), executor.clone(), queue, config);
            let workflow_id = WorkflowId::new();
            driver
                .repository()
                .save(&workflow_id, &document, None)
                .await
                .expect("seed");
            Self {
                driver,
                executor,
                store,
                wakeups,
                workflow_id,
            }
        }

        async fn step(&self) -> StepOutcome {
            self.driver.step(&self.workflow_id).await.expect("step")
        }

        async fn document(&self) -> WorkflowDocument {
            self.driver
                .repository()
                .load(&self.workflow_id)
                .await
                .expect("load")
                .document
        }

        fn drain_wakeups(&mut self) -> usize {
            let mut count = 0;
            while self.wakeups.try_recv().is_ok() {
                count += 1;
            }
            count
        }

        fn dispatched(&self) -> Vec<String> {
            self.executor
                .calls()
                .into_iter()
                .map(|r| r.node_id.to_string())
                .collect()
        }
    }

    /// upload -> transform -> download, with upload's output already ready.
    fn chain() -> WorkflowDocument {
        let mut doc = WorkflowDocument::new();
        doc.add_node(
            Node::new("upload", "single_file_upload_txt").with_output(Port::new(0, "text")),
        )
        .expect("upload");
        doc.add_node(
            Node::new("transform", "txt_to_md")
                .with_input(Port::new(0, "text"))
                .with_output(Port::new(0, "text")),
        )
        .expect("transform");
        doc.add_node(
            Node::new("download", "single_file_download_txt").with_input(Port::new(0, "text")),
        )
        .expect("download");
        doc.connect(PortRef::new("upload", 0), PortRef::new("transform", 0))
            .expect("edge 1");
        doc.connect(PortRef::new("transform", 0), PortRef::new("download", 0))
            .expect("edge 2");
        doc.nodes[0].outputs[0].status = PortStatus::Ready;
        doc.status = RunStatus::Pending;
        doc
    }

    fn node_status(doc: &WorkflowDocument, id: &str) -> NodeStatus {
        doc.node(&NodeId::new(id)).expect("node").status
    }

    #[tokio::test]
    async fn three_node_chain_runs_to_completion() {
        let mut h = Harness::new(ScriptedExecutor::succeeding(), chain()).await;

        assert_eq!(
            h.step().await,
            StepOutcome::Propagated {
                node_id: NodeId::new("upload")
            }
        );
        let doc = h.document().await;
        assert_eq!(doc.nodes[1].inputs[0].status, PortStatus::Ready);

        assert_eq!(
            h.step().await,
            StepOutcome::Dispatched {
                node_id: NodeId::new("transform"),
                outcome: DispatchOutcome::Succeeded
            }
        );
        let doc = h.document().await;
        assert_eq!(node_status(&doc, "transform"), NodeStatus::Ready);
        assert!(doc.nodes[1].outputs_ready());

        assert_eq!(
            h.step().await,
            StepOutcome::Propagated {
                node_id: NodeId::new("transform")
            }
        );
        assert_eq!(
            h.step().await,
            StepOutcome::Dispatched {
                node_id: NodeId::new("download"),
                outcome: DispatchOutcome::Succeeded
            }
        );
        assert_eq!(h.step().await, StepOutcome::Completed);

        let doc = h.document().await;
        assert_eq!(doc.status, RunStatus::Finished);
        assert_eq!(node_status(&doc, "download"), NodeStatus::Ready);
        assert_eq!(h.dispatched(), vec!["transform", "download"]);
        // One re-arm per step that left the run pending.
        assert_eq!(h.drain_wakeups(), 4);

        assert_eq!(
            h.step().await,
            StepOutcome::Skipped {
                status: RunStatus::Finished
            }
        );
    }

    #[tokio::test]
    async fn dispatch_carries_keys_and_token() {
        let h = Harness::new(ScriptedExecutor::succeeding(), chain()).await;
        h.step().await;
        h.step().await;

        let calls = h.executor.calls();
        assert_eq!(calls.len(), 1);
        let request = &calls[0];
        let doc = h.document().await;
        assert_eq!(request.workflow_id, h.workflow_id);
        assert_eq!(
            request.input_keys,
            vec![doc.nodes[0].outputs[0].key.clone().expect("upload key")]
        );
        assert_eq!(
            request.output_keys,
            vec![doc.nodes[1].outputs[0].key.clone().expect("transform key")]
        );
        assert!(request.dispatch_token.contains("transform"));
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_timeout_finishes_with_node_pending() {
        let executor = ScriptedExecutor::succeeding().with_delay(Duration::from_secs(3_600));
        let mut h = Harness::new(executor, chain()).await;
        h.step().await;
        h.drain_wakeups();

        assert_eq!(
            h.step().await,
            StepOutcome::Dispatched {
                node_id: NodeId::new("transform"),
                outcome: DispatchOutcome::TimedOut
            }
        );
        let doc = h.document().await;
        assert_eq!(doc.status, RunStatus::Finished);
        assert_eq!(node_status(&doc, "transform"), NodeStatus::Pending);
        assert_eq!(h.drain_wakeups(), 0);
    }

    #[tokio::test]
    async fn executor_failure_marks_node_failed() {
        let executor = ScriptedExecutor::with_script([Err(BlockError::Rejected {
            status: 502,
            body: "bad gateway".to_string(),
        })]);
        let mut h = Harness::new(executor, chain()).await;
        h.step().await;
        h.drain_wakeups();

        let outcome = h.step().await;
        assert!(matches!(
            outcome,
            StepOutcome::Dispatched {
                outcome: DispatchOutcome::Failed(_),
                ..
            }
        ));
        let doc = h.document().await;
        assert_eq!(doc.status, RunStatus::Finished);
        assert_eq!(node_status(&doc, "transform"), NodeStatus::Failed);
        assert_eq!(node_status(&doc, "download"), NodeStatus::Idle);
        assert_eq!(h.drain_wakeups(), 0);
    }

    #[tokio::test]
    async fn redelivered_wakeups_do_not_redispatch() {
        let h = Harness::new(ScriptedExecutor::succeeding(), chain()).await;
        h.step().await;
        h.step().await;
        assert_eq!(h.dispatched(), vec!["transform"]);

        // Redelivered wake-ups only continue the run from the stored state.
        h.step().await;
        h.step().await;
        assert_eq!(h.dispatched(), vec!["transform", "download"]);
        h.step().await;
        h.step().await;
        assert_eq!(h.dispatched(), vec!["transform", "download"]);
    }

    #[tokio::test]
    async fn each_step_makes_at_most_one_transition() {
        let h = Harness::new(ScriptedExecutor::succeeding(), chain()).await;
        let mut before = h.document().await;
        loop {
            let outcome = h.step().await;
            let after = h.document().await;
            let changed_nodes = before
                .nodes
                .iter()
                .zip(&after.nodes)
                .filter(|(b, a)| b.status != a.status)
                .count();
            assert!(changed_nodes <= 1, "{outcome:?} changed {changed_nodes} nodes");
            if outcome == StepOutcome::Completed {
                break;
            }
            before = after;
        }
    }

    #[tokio::test]
    async fn in_flight_dispatch_blocks_concurrent_completion() {
        let executor = ScriptedExecutor::succeeding().with_delay(Duration::from_millis(50));
        let h = Harness::new(executor, chain()).await;
        h.step().await;

        let (first, second) = tokio::join!(h.driver.step(&h.workflow_id), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            h.driver.step(&h.workflow_id).await
        });
        assert!(matches!(
            first.expect("first"),
            StepOutcome::Dispatched {
                outcome: DispatchOutcome::Succeeded,
                ..
            }
        ));
        assert_eq!(
            second.expect("second"),
            StepOutcome::Waiting {
                node_id: NodeId::new("transform")
            }
        );
        assert_eq!(h.document().await.status, RunStatus::Pending);
        assert_eq!(h.dispatched(), vec!["transform"]);
    }

    #[tokio::test]
    async fn in_flight_dispatch_blocks_second_dispatch() {
        let mut doc = WorkflowDocument::new();
        for id in ["a", "b"] {
            doc.add_node(Node::new(id, "single_file_upload_txt").with_output(Port::new(0, "text")))
                .expect("node");
        }
        doc.status = RunStatus::Pending;
        let executor = ScriptedExecutor::succeeding().with_delay(Duration::from_millis(100));
        let h = Harness::new(executor, doc).await;

        let (first, second) = tokio::join!(h.driver.step(&h.workflow_id), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            h.driver.step(&h.workflow_id).await
        });
        assert_eq!(
            first.expect("first"),
            StepOutcome::Dispatched {
                node_id: NodeId::new("a"),
                outcome: DispatchOutcome::Succeeded
            }
        );
        assert_eq!(
            second.expect("second"),
            StepOutcome::Waiting {
                node_id: NodeId::new("a")
            }
        );
        let doc = h.document().await;
        assert_eq!(node_status(&doc, "a"), NodeStatus::Ready);
        assert_eq!(node_status(&doc, "b"), NodeStatus::Idle);
        assert_eq!(h.dispatched(), vec!["a"]);

        while h.step().await != StepOutcome::Completed {}
        assert_eq!(h.dispatched(), vec!["a", "b"]);
        assert_eq!(node_status(&h.document().await, "b"), NodeStatus::Ready);
    }

    #[tokio::test]
    async fn stale_save_is_rejected_as_conflict() {
        let h = Harness::new(ScriptedExecutor::succeeding(), chain()).await;
        let stale = h
            .driver
            .repository()
            .load(&h.workflow_id)
            .await
            .expect("load");
        h.step().await;

        let err = h
            .driver
            .repository()
            .save(&h.workflow_id, &stale.document, stale.revision)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict { .. }));
    }

    #[tokio::test]
    async fn missing_input_key_fails_without_dispatch() {
        let mut doc = chain();
        doc.nodes[0].outputs[0].key = None;
        let h = Harness::new(ScriptedExecutor::succeeding(), doc).await;
        h.step().await;

        let outcome = h.step().await;
        assert!(matches!(
            outcome,
            StepOutcome::Dispatched {
                outcome: DispatchOutcome::Failed(BlockError::MissingInput { .. }),
                ..
            }
        ));
        assert!(h.dispatched().is_empty());
    }

    #[tokio::test]
    async fn request_run_marks_pending_and_emits() {
        let mut doc = chain();
        doc.status = RunStatus::Absent;
        let mut h = Harness::new(ScriptedExecutor::succeeding(), doc).await;

        assert_eq!(
            h.step().await,
            StepOutcome::Skipped {
                status: RunStatus::Absent
            }
        );
        h.driver.request_run(&h.workflow_id).await.expect("run");
        assert_eq!(h.document().await.status, RunStatus::Pending);
        assert_eq!(h.drain_wakeups(), 1);

        h.driver.request_run(&h.workflow_id).await.expect("again");
        assert_eq!(h.drain_wakeups(), 1);
    }

    #[tokio::test]
    async fn request_run_bootstraps_unknown_workflow() {
        let store = MemoryObjectStore::new();
        let (queue, mut wakeups) = ChannelWakeupQueue::channel();
        let driver = Driver::new(
            store.clone(),
            ScriptedExecutor::succeeding(),
            queue,
            DriverConfig::default(),
        );
        let id = WorkflowId::new();
        driver.request_run(&id).await.expect("run");
        assert!(wakeups.try_recv().is_ok());
        assert_eq!(driver.step(&id).await.expect("step"), StepOutcome::Completed);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn reset_refused_while_pending() {
        let h = Harness::new(ScriptedExecutor::succeeding(), chain()).await;
        let err = h.driver.reset(&h.workflow_id).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            DriverError::RunInProgress { .. }
        ));
    }

    #[tokio::test]
    async fn reset_after_run_allows_rerun() {
        let h = Harness::new(ScriptedExecutor::succeeding(), chain()).await;
        while h.step().await != StepOutcome::Completed {}

        let doc = h.driver.reset(&h.workflow_id).await.expect("reset");
        assert_eq!(doc.status, RunStatus::Absent);
        assert!(doc.nodes.iter().all(|n| n.status == NodeStatus::Idle));
        assert!(doc.nodes[2].inputs[0].key.is_some());
    }

    #[tokio::test]
    async fn malformed_document_is_not_written_back() {
        let store = MemoryObjectStore::new();
        let (queue, _wakeups) = ChannelWakeupQueue::channel();
        let id = WorkflowId::new();
        store
            .put(
                &crate::repository::document_key(&id),
                bytes::Bytes::from_static(b"status: pending\nnodes: [{id: a}]\n"),
                crate::store::PutCondition::Always,
            )
            .await
            .expect("seed");
        let before = store
            .get(&crate::repository::document_key(&id))
            .await
            .expect("get");
        let driver = Driver::new(
            store.clone(),
            ScriptedExecutor::succeeding(),
            queue,
            DriverConfig::default(),
        );

        let err = driver.step(&id).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            DriverError::MalformedDocument { .. }
        ));
        let after = store
            .get(&crate::repository::document_key(&id))
            .await
            .expect("get");
        assert_eq!(before, after);
    }

    #[test]
    fn lease_covers_timeout_and_grace() {
        let config = DriverConfig {
            dispatch_timeout_secs: 10,
            dispatch_grace_secs: 5,
            retry: RetryPolicy::none(),
        };
        assert_eq!(config.dispatch_lease(), chrono::Duration::seconds(15));
        assert_eq!(config.dispatch_timeout(), Duration::from_secs(10));
    }
}

//! Dispatch and tracking.
//!
//! Dispatch is split around the remote call. [`begin_dispatch`] marks the
//! node pending and builds the request; the caller persists that state,
//! invokes the executor, and records the result with [`apply_outcome`].

use crate::document::{RunStatus, WorkflowDocument};
use crate::error::GraphError;
use crate::node::{NodeId, NodeStatus, ServiceKey};
use crate::port::{DataKey, PortAddress, PortStatus};
use async_trait::async_trait;
use blockflow_core::WorkflowId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Request sent to a block executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRequest {
    /// The workflow the node belongs to.
    pub workflow_id: WorkflowId,
    /// The dispatched node.
    pub node_id: NodeId,
    /// The executor service handling the node.
    pub service: ServiceKey,
    /// Input data keys, by input order.
    pub input_keys: Vec<DataKey>,
    /// Output data keys the executor must write, by output order.
    pub output_keys: Vec<DataKey>,
    /// The node's parameter blob, untouched.
    #[serde(default)]
    pub parameters: JsonValue,
    /// Stable token for deduplicating repeated dispatches.
    pub dispatch_token: String,
}

/// Derives the deduplication token for a dispatch.
///
/// Redelivery of the same step produces the same token, so an executor can
/// recognize a repeat and skip its side effect.
#[must_use]
pub fn dispatch_token(workflow_id: &WorkflowId, node_id: &NodeId, output_keys: &[DataKey]) -> String {
    let keys: Vec<&str> = output_keys.iter().map(DataKey::as_str).collect();
    format!("{workflow_id}/{node_id}/{}", keys.join(","))
}

/// Errors from block execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    /// No executor is registered for the service.
    UnknownService { service: ServiceKey },
    /// An input has no data key to read.
    MissingInput { node_id: NodeId, port: PortAddress },
    /// The parameters have no JSON form.
    InvalidParameters { node_id: NodeId, message: String },
    /// The executor answered with a failure status.
    Rejected { status: u16, body: String },
    /// The executor could not be reached.
    Transport { message: String },
    /// The executor did not answer in time.
    Timeout { after: Duration },
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownService { service } => write!(f, "no executor for service '{service}'"),
            Self::MissingInput { node_id, port } => {
                write!(f, "input '{port}' on node {node_id} has no data key")
            }
            Self::InvalidParameters { node_id, message } => {
                write!(f, "parameters of node {node_id} cannot be sent: {message}")
            }
            Self::Rejected { status, body } => {
                write!(f, "executor rejected request with status {status}: {body}")
            }
            Self::Transport { message } => write!(f, "executor unreachable: {message}"),
            Self::Timeout { after } => write!(f, "executor timed out after {after:?}"),
        }
    }
}

impl std::error::Error for BlockError {}

/// Invokes the executor behind a block.
///
/// On success the executor has written every output blob named in the
/// request to the shared object store.
#[async_trait]
pub trait BlockExecutor: Send + Sync {
    /// Executes one block.
    async fn execute(&self, request: &BlockRequest) -> Result<(), BlockError>;
}

#[async_trait]
impl<E: BlockExecutor + ?Sized> BlockExecutor for Arc<E> {
    async fn execute(&self, request: &BlockRequest) -> Result<(), BlockError> {
        (**self).execute(request).await
    }
}

/// Result of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The executor finished and wrote its outputs.
    Succeeded,
    /// The executor reported an error.
    Failed(BlockError),
    /// No answer arrived in time; the executor may still have run.
    TimedOut,
}

/// Marks a runnable node pending at `now` and builds its request.
///
/// Outputs without a data key are assigned a fresh one first, so the
/// executor always knows where to write.
///
/// # Errors
///
/// Returns `Ok(Err(..))` if an input has no data key; the node has still
/// been marked pending and the caller should record the failure. Returns
/// `Err` if the node does not exist.
pub fn begin_dispatch(
    document: &mut WorkflowDocument,
    workflow_id: &WorkflowId,
    node_id: &NodeId,
    now: DateTime<Utc>,
) -> Result<Result<BlockRequest, BlockError>, GraphError> {
    let node = document
        .node_mut(node_id)
        .ok_or_else(|| GraphError::NodeNotFound {
            node_id: node_id.clone(),
        })?;
    node.status = NodeStatus::Pending;
    node.dispatched_at = Some(now);
    for output in &mut node.outputs {
        if output.key.is_none() {
            output.key = Some(DataKey::generate(&output.port_type));
        }
    }

    let mut inputs: Vec<_> = node.inputs.iter().collect();
    inputs.sort_by_key(|p| p.order);
    let mut input_keys = Vec::with_capacity(inputs.len());
    for input in inputs {
        match &input.key {
            Some(key) => input_keys.push(key.clone()),
            None => {
                return Ok(Err(BlockError::MissingInput {
                    node_id: node_id.clone(),
                    port: PortAddress::input(input.order),
                }));
            }
        }
    }
    let output_keys: Vec<DataKey> = node.output_keys().into_iter().flatten().collect();
    let parameters = match node.parameters_json() {
        Ok(parameters) => parameters,
        Err(e) => {
            return Ok(Err(BlockError::InvalidParameters {
                node_id: node_id.clone(),
                message: e.to_string(),
            }));
        }
    };

    Ok(Ok(BlockRequest {
        workflow_id: workflow_id.clone(),
        node_id: node_id.clone(),
        service: node.service.clone(),
        input_keys,
        dispatch_token: dispatch_token(workflow_id, node_id, &output_keys),
        output_keys,
        parameters,
    }))
}

/// Records the result of a dispatch.
///
/// Success makes every output and the node ready. A failure marks the node
/// failed and finishes the workflow. A timeout also finishes the workflow
/// but leaves the node pending, since the executor may have run.
///
/// # Errors
///
/// Returns `NodeNotFound` if the node does not exist.
pub fn apply_outcome(
    document: &mut WorkflowDocument,
    node_id: &NodeId,
    outcome: &DispatchOutcome,
) -> Result<(), GraphError> {
    let node = document
        .node_mut(node_id)
        .ok_or_else(|| GraphError::NodeNotFound {
            node_id: node_id.clone(),
        })?;
    match outcome {
        DispatchOutcome::Succeeded => {
            for output in &mut node.outputs {
                output.status = PortStatus::Ready;
            }
            node.status = NodeStatus::Ready;
        }
        DispatchOutcome::Failed(_) => {
            node.status = NodeStatus::Failed;
            document.status = RunStatus::Finished;
        }
        DispatchOutcome::TimedOut => {
            document.status = RunStatus::Finished;
        }
    }
    Ok(())
}

/// A block executor that replays scripted results and records requests.
///
/// Once the script runs out every call succeeds.
#[derive(Debug, Clone, Default)]
pub struct ScriptedExecutor {
    script: Arc<Mutex<VecDeque<Result<(), BlockError>>>>,
    calls: Arc<Mutex<Vec<BlockRequest>>>,
    delay: Option<Duration>,
}

impl ScriptedExecutor {
    /// Creates an executor that always succeeds.
    #[must_use]
    pub fn succeeding() -> Self {
        Self::default()
    }

    /// Creates an executor that answers with the given results, in order.
    #[must_use]
    pub fn with_script(results: impl IntoIterator<Item = Result<(), BlockError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(results.into_iter().collect())),
            ..Self::default()
        }
    }

    /// Delays every answer.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns every request received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<BlockRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl BlockExecutor for ScriptedExecutor {
    async fn execute(&self, request: &BlockRequest) -> Result<(), BlockError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or(Ok(()))
    }
}

//! The workflow document.
//!
//! A document is the complete persisted graph for one workflow: its run
//! status, its nodes in document order, and its edges. It is a plain value:
//! loaded, transformed, and saved whole. Document order is the tie-break
//! for every scheduling decision.

use crate::edge::Edge;
use crate::error::DocumentError;
use crate::node::{Node, NodeId, NodeStatus};
use crate::port::PortStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Run status of a whole document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Never run, or reset since.
    #[default]
    Absent,
    /// A run was requested and has not finished.
    Pending,
    /// The last run completed or was aborted.
    Finished,
}

impl RunStatus {
    /// Returns true for the absent status.
    #[must_use]
    pub fn is_absent(&self) -> bool {
        *self == Self::Absent
    }

    /// Returns the status as written in documents.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Pending => "pending",
            Self::Finished => "finished",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted workflow graph.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkflowDocument {
    /// Run status; omitted from the text form while absent.
    #[serde(default, skip_serializing_if = "RunStatus::is_absent")]
    pub status: RunStatus,
    /// Nodes in document order.
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Edges in document order.
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl WorkflowDocument {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates a document from its YAML text form.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` if the text does not match the document schema,
    /// or `Invalid` if it parses but violates a structural invariant.
    pub fn parse(text: &str) -> Result<Self, DocumentError> {
        // An empty object is stored as an empty file by some editors.
        if text.trim().is_empty() {
            return Ok(Self::new());
        }
        let document: Self = serde_yaml::from_str(text).map_err(|e| DocumentError::Malformed {
            message: e.to_string(),
        })?;
        document.validate()?;
        Ok(document)
    }

    /// Parses a document from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` for non-UTF-8 input, otherwise as [`Self::parse`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DocumentError> {
        let text = std::str::from_utf8(bytes).map_err(|e| DocumentError::Malformed {
            message: e.to_string(),
        })?;
        Self::parse(text)
    }

    /// Serializes the document to its YAML text form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String, DocumentError> {
        serde_yaml::to_string(self).map_err(|e| DocumentError::SerializeFailed {
            message: e.to_string(),
        })
    }

    /// Returns the node with the given ID.
    #[must_use]
    pub fn node(&self, node_id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == node_id)
    }

    /// Returns the node with the given ID, mutably.
    pub fn node_mut(&mut self, node_id: &NodeId) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| &n.id == node_id)
    }

    /// Returns the edges leaving one output port of a node.
    pub fn edges_from<'a>(
        &'a self,
        node_id: &'a NodeId,
        order: u32,
    ) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges
            .iter()
            .filter(move |e| &e.source.node == node_id && e.source.order == order)
    }

    /// Returns true if the document is running.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == RunStatus::Pending
    }

    /// Resets every unlocked node and port to idle and clears the run status.
    ///
    /// Data keys are kept so that locked inputs stay usable on the next run.
    pub fn reset_statuses(&mut self) {
        self.status = RunStatus::Absent;
        for node in &mut self.nodes {
            if node.locked {
                continue;
            }
            node.status = NodeStatus::Idle;
            node.dispatched_at = None;
            for port in node.inputs.iter_mut().chain(node.outputs.iter_mut()) {
                if !port.locked {
                    port.status = PortStatus::Idle;
                }
            }
        }
    }
}

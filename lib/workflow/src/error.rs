//! Error types for document and graph operations.
//!
//! - `GraphError`: structural problems with nodes, ports and edges
//! - `DocumentError`: failures parsing or serializing a persisted document
//!
//! Workflow-level context (the workflow ID) is added by the caller when the
//! error crosses into the driver or the server.

use crate::edge::EdgeId;
use crate::node::NodeId;
use crate::port::{PortAddress, PortType};
use std::fmt;

/// Errors from graph operations and structural validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Node with the given ID was not found.
    NodeNotFound { node_id: NodeId },
    /// A node with the given ID already exists.
    DuplicateNode { node_id: NodeId },
    /// Port not found on node.
    PortNotFound { node_id: NodeId, port: PortAddress },
    /// Two ports on one node share a direction and order.
    DuplicatePort { node_id: NodeId, port: PortAddress },
    /// Port types differ across an edge.
    IncompatibleTypes {
        source_node: NodeId,
        source_type: PortType,
        target_node: NodeId,
        target_type: PortType,
    },
    /// The target input already has a producer.
    InputAlreadyConnected { node_id: NodeId, port: PortAddress },
    /// An edge joining the same ports already exists.
    DuplicateEdge { edge_id: EdgeId },
    /// Edge with the given ID was not found.
    EdgeNotFound { edge_id: EdgeId },
    /// The graph contains a cycle.
    CycleDetected,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeNotFound { node_id } => write!(f, "node not found: {node_id}"),
            Self::DuplicateNode { node_id } => write!(f, "duplicate node id: {node_id}"),
            Self::PortNotFound { node_id, port } => {
                write!(f, "port '{port}' not found on node {node_id}")
            }
            Self::DuplicatePort { node_id, port } => {
                write!(f, "port '{port}' declared twice on node {node_id}")
            }
            Self::IncompatibleTypes {
                source_node,
                source_type,
                target_node,
                target_type,
            } => write!(
                f,
                "incompatible port types: {source_node} produces {source_type}, {target_node} expects {target_type}"
            ),
            Self::InputAlreadyConnected { node_id, port } => {
                write!(f, "input '{port}' on node {node_id} already has a producer")
            }
            Self::DuplicateEdge { edge_id } => write!(f, "duplicate edge: {edge_id}"),
            Self::EdgeNotFound { edge_id } => write!(f, "edge not found: {edge_id}"),
            Self::CycleDetected => write!(f, "graph contains cycles"),
        }
    }
}

impl std::error::Error for GraphError {}

/// Errors reading or writing the persisted document form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    /// The text is not a well-formed document.
    Malformed { message: String },
    /// The document parsed but is structurally invalid.
    Invalid(GraphError),
    /// The document could not be serialized.
    SerializeFailed { message: String },
}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { message } => write!(f, "malformed workflow document: {message}"),
            Self::Invalid(e) => write!(f, "invalid workflow document: {e}"),
            Self::SerializeFailed { message } => {
                write!(f, "failed to serialize workflow document: {message}")
            }
        }
    }
}

impl std::error::Error for DocumentError {}

impl From<GraphError> for DocumentError {
    fn from(e: GraphError) -> Self {
        Self::Invalid(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_error_display() {
        let err = GraphError::NodeNotFound {
            node_id: NodeId::new("n1"),
        };
        assert!(err.to_string().contains("node not found: n1"));
    }

    #[test]
    fn port_not_found_uses_handle_form() {
        let err = GraphError::PortNotFound {
            node_id: NodeId::new("n1"),
            port: PortAddress::input(2),
        };
        assert!(err.to_string().contains("'input.2'"));
    }

    #[test]
    fn incompatible_types_names_both_sides() {
        let err = GraphError::IncompatibleTypes {
            source_node: NodeId::new("a"),
            source_type: PortType::Pdf,
            target_node: NodeId::new("b"),
            target_type: PortType::Text,
        };
        let message = err.to_string();
        assert!(message.contains("pdf"));
        assert!(message.contains("text"));
    }

    #[test]
    fn document_error_wraps_graph_error() {
        let err: DocumentError = GraphError::CycleDetected.into();
        assert!(err.to_string().contains("graph contains cycles"));
    }
}

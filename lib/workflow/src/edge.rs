//! Edge types for workflow documents.
//!
//! An edge carries the data key of one node's output port to another node's
//! input port. Edges are persisted in the editor's handle form
//! (`sourceHandle: output.0`, `targetHandle: input.0`) and converted into
//! typed port orders once, when the document is parsed.

use crate::node::NodeId;
use crate::port::{ParseHandleError, PortAddress, PortDirection};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(String);

impl EdgeId {
    /// Wraps an existing edge ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derives the canonical ID from the edge's endpoints.
    ///
    /// Two edges joining the same ports always derive the same ID.
    #[must_use]
    pub fn derive(source: &PortRef, target: &PortRef) -> Self {
        Self(format!(
            "reactflow__edge-{}{}-{}{}",
            source.node,
            PortAddress::output(source.order),
            target.node,
            PortAddress::input(target.order)
        ))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One endpoint of an edge: a node and a port order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortRef {
    /// The node owning the port.
    pub node: NodeId,
    /// The port order.
    pub order: u32,
}

impl PortRef {
    /// Creates a port reference.
    #[must_use]
    pub fn new(node: impl Into<NodeId>, order: u32) -> Self {
        Self {
            node: node.into(),
            order,
        }
    }
}

/// A directed connection from an output port to an input port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "EdgeRecord", into = "EdgeRecord")]
pub struct Edge {
    /// The edge ID.
    pub id: EdgeId,
    /// The producing output port.
    pub source: PortRef,
    /// The consuming input port.
    pub target: PortRef,
}

impl Edge {
    /// Creates an edge with its derived ID.
    #[must_use]
    pub fn new(source: PortRef, target: PortRef) -> Self {
        Self {
            id: EdgeId::derive(&source, &target),
            source,
            target,
        }
    }

    /// Returns true if this edge joins the same ports as `other`.
    #[must_use]
    pub fn same_endpoints(&self, other: &Self) -> bool {
        self.source == other.source && self.target == other.target
    }
}

/// Persisted edge shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EdgeRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    source: NodeId,
    source_handle: String,
    target: NodeId,
    target_handle: String,
}

/// Error raised when a persisted edge has unusable handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeRecordError {
    /// A handle string could not be parsed.
    Handle(ParseHandleError),
    /// A handle named the wrong direction.
    WrongDirection {
        /// The offending handle.
        handle: String,
        /// The direction the handle must have.
        expected: PortDirection,
    },
}

impl fmt::Display for EdgeRecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handle(e) => write!(f, "{e}"),
            Self::WrongDirection { handle, expected } => {
                write!(f, "handle '{handle}' must be an {} handle", expected.as_str())
            }
        }
    }
}

impl std::error::Error for EdgeRecordError {}

fn parse_handle(handle: &str, expected: PortDirection) -> Result<u32, EdgeRecordError> {
    let address: PortAddress = handle.parse().map_err(EdgeRecordError::Handle)?;
    if address.direction != expected {
        return Err(EdgeRecordError::WrongDirection {
            handle: handle.to_string(),
            expected,
        });
    }
    Ok(address.order)
}

impl TryFrom<EdgeRecord> for Edge {
    type Error = EdgeRecordError;

    fn try_from(record: EdgeRecord) -> Result<Self, Self::Error> {
        let source = PortRef {
            node: record.source,
            order: parse_handle(&record.source_handle, PortDirection::Output)?,
        };
        let target = PortRef {
            node: record.target,
            order: parse_handle(&record.target_handle, PortDirection::Input)?,
        };
        let id = record
            .id
            .map(EdgeId::new)
            .unwrap_or_else(|| EdgeId::derive(&source, &target));
        Ok(Self { id, source, target })
    }
}

impl From<Edge> for EdgeRecord {
    fn from(edge: Edge) -> Self {
        Self {
            id: Some(edge.id.0),
            source_handle: PortAddress::output(edge.source.order).to_string(),
            source: edge.source.node,
            target_handle: PortAddress::input(edge.target.order).to_string(),
            target: edge.target.node,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_id_is_deterministic() {
        let a = Edge::new(PortRef::new("up", 0), PortRef::new("down", 1));
        let b = Edge::new(PortRef::new("up", 0), PortRef::new("down", 1));
        assert_eq!(a.id, b.id);
        assert_eq!(a.id.as_str(), "reactflow__edge-upoutput.0-downinput.1");
    }

    #[test]
    fn derived_id_distinguishes_ports() {
        let a = Edge::new(PortRef::new("up", 0), PortRef::new("down", 0));
        let b = Edge::new(PortRef::new("up", 0), PortRef::new("down", 1));
        assert_ne!(a.id, b.id);
        assert!(!a.same_endpoints(&b));
    }

    #[test]
    fn deserializes_handle_form() {
        let yaml = "source: a\nsourceHandle: output.0\ntarget: b\ntargetHandle: input.2\nid: e1\n";
        let edge: Edge = serde_yaml::from_str(yaml).expect("deserialize");
        assert_eq!(edge.id.as_str(), "e1");
        assert_eq!(edge.source, PortRef::new("a", 0));
        assert_eq!(edge.target, PortRef::new("b", 2));
    }

    #[test]
    fn missing_id_is_derived() {
        let yaml = "source: a\nsourceHandle: output.0\ntarget: b\ntargetHandle: input.0\n";
        let edge: Edge = serde_yaml::from_str(yaml).expect("deserialize");
        assert_eq!(edge.id, EdgeId::derive(&edge.source, &edge.target));
    }

    #[test]
    fn rejects_reversed_handles() {
        let yaml = "source: a\nsourceHandle: input.0\ntarget: b\ntargetHandle: input.0\n";
        let result: Result<Edge, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn serializes_handle_form() {
        let edge = Edge::new(PortRef::new("a", 1), PortRef::new("b", 0));
        let yaml = serde_yaml::to_string(&edge).expect("serialize");
        assert!(yaml.contains("sourceHandle: output.1"));
        assert!(yaml.contains("targetHandle: input.0"));
    }
}

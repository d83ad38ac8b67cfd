//! Structural validation and editing of workflow documents.
//!
//! The document stores nodes and edges as flat lists. For checks that need
//! graph structure, such as cycle detection, a petgraph view is built on
//! demand.

use crate::document::WorkflowDocument;
use crate::edge::{Edge, EdgeId, PortRef};
use crate::error::GraphError;
use crate::node::{Node, NodeId};
use crate::port::{DataKey, PortAddress, PortStatus};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

/// A petgraph view of a document: one vertex per node, one edge per document edge.
#[derive(Debug)]
pub struct DependencyGraph<'a> {
    graph: DiGraph<&'a NodeId, &'a Edge>,
}

impl<'a> DependencyGraph<'a> {
    /// Builds the view.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if an edge references a node that does not exist.
    pub fn build(document: &'a WorkflowDocument) -> Result<Self, GraphError> {
        let mut graph = DiGraph::with_capacity(document.nodes.len(), document.edges.len());
        let mut node_index_map = HashMap::with_capacity(document.nodes.len());
        for node in &document.nodes {
            let index = graph.add_node(&node.id);
            node_index_map.insert(&node.id, index);
        }
        for edge in &document.edges {
            let source = lookup(&node_index_map, &edge.source.node)?;
            let target = lookup(&node_index_map, &edge.target.node)?;
            graph.add_edge(source, target, edge);
        }
        Ok(Self { graph })
    }

    /// Returns true if the graph contains a directed cycle.
    #[must_use]
    pub fn has_cycle(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }
}

fn lookup(
    map: &HashMap<&NodeId, NodeIndex>,
    node_id: &NodeId,
) -> Result<NodeIndex, GraphError> {
    map.get(node_id)
        .copied()
        .ok_or_else(|| GraphError::NodeNotFound {
            node_id: node_id.clone(),
        })
}

impl WorkflowDocument {
    /// Validates the structural invariants of the document.
    ///
    /// Node IDs are unique, port orders are unique per direction, edges join
    /// an existing output to an existing input of the same type, every input
    /// has at most one producer, no two edges join the same ports, and the
    /// graph is acyclic.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut seen_nodes = HashSet::new();
        for node in &self.nodes {
            if !seen_nodes.insert(&node.id) {
                return Err(GraphError::DuplicateNode {
                    node_id: node.id.clone(),
                });
            }
            validate_ports(node)?;
        }

        let mut seen_edges: HashSet<(&PortRef, &PortRef)> = HashSet::new();
        let mut fed_inputs: HashSet<&PortRef> = HashSet::new();
        for edge in &self.edges {
            self.check_edge_types(&edge.source, &edge.target)?;
            if !seen_edges.insert((&edge.source, &edge.target)) {
                return Err(GraphError::DuplicateEdge {
                    edge_id: edge.id.clone(),
                });
            }
            if !fed_inputs.insert(&edge.target) {
                return Err(GraphError::InputAlreadyConnected {
                    node_id: edge.target.node.clone(),
                    port: PortAddress::input(edge.target.order),
                });
            }
        }

        if DependencyGraph::build(self)?.has_cycle() {
            return Err(GraphError::CycleDetected);
        }
        Ok(())
    }

    /// Appends a node.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID is taken or the node declares a port twice.
    pub fn add_node(&mut self, node: Node) -> Result<(), GraphError> {
        if self.node(&node.id).is_some() {
            return Err(GraphError::DuplicateNode { node_id: node.id });
        }
        validate_ports(&node)?;
        self.nodes.push(node);
        Ok(())
    }

    /// Removes a node and every edge touching it.
    ///
    /// Inputs that lose their producer have their key cleared.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if no node has the ID.
    pub fn remove_node(&mut self, node_id: &NodeId) -> Result<Node, GraphError> {
        let position = self
            .nodes
            .iter()
            .position(|n| &n.id == node_id)
            .ok_or_else(|| GraphError::NodeNotFound {
                node_id: node_id.clone(),
            })?;
        let removed = self.nodes.remove(position);

        let orphaned: Vec<PortRef> = self
            .edges
            .iter()
            .filter(|e| &e.source.node == node_id && &e.target.node != node_id)
            .map(|e| e.target.clone())
            .collect();
        self.edges
            .retain(|e| &e.source.node != node_id && &e.target.node != node_id);
        for target in orphaned {
            self.clear_input(&target);
        }
        Ok(removed)
    }

    /// Connects an output port to an input port.
    ///
    /// The target input takes over the source output's data key. A source
    /// without a key is assigned a fresh one first, so every consumer of one
    /// output shares a single blob.
    ///
    /// # Errors
    ///
    /// Returns an error if either port is missing, the types differ, the
    /// target already has a producer, or the edge would close a cycle.
    pub fn connect(&mut self, source: PortRef, target: PortRef) -> Result<EdgeId, GraphError> {
        self.check_edge_types(&source, &target)?;
        if self.edges.iter().any(|e| e.target == target) {
            return Err(GraphError::InputAlreadyConnected {
                node_id: target.node,
                port: PortAddress::input(target.order),
            });
        }

        let edge = Edge::new(source.clone(), target.clone());
        let edge_id = edge.id.clone();
        self.edges.push(edge);
        let acyclic = DependencyGraph::build(self).map(|g| !g.has_cycle());
        if !matches!(acyclic, Ok(true)) {
            self.edges.pop();
            return Err(acyclic.err().unwrap_or(GraphError::CycleDetected));
        }

        let key = self.ensure_output_key(&source)?;
        let input = self.port_mut(&target, PortAddress::input(target.order))?;
        input.key = Some(key);
        input.status = PortStatus::Idle;
        Ok(edge_id)
    }

    /// Removes an edge and clears the key of the input it fed.
    ///
    /// # Errors
    ///
    /// Returns `EdgeNotFound` if no edge has the ID.
    pub fn disconnect(&mut self, edge_id: &EdgeId) -> Result<Edge, GraphError> {
        let position = self
            .edges
            .iter()
            .position(|e| &e.id == edge_id)
            .ok_or_else(|| GraphError::EdgeNotFound {
                edge_id: edge_id.clone(),
            })?;
        let edge = self.edges.remove(position);
        self.clear_input(&edge.target);
        Ok(edge)
    }

    fn check_edge_types(&self, source: &PortRef, target: &PortRef) -> Result<(), GraphError> {
        let source_port = self.port(source, PortAddress::output(source.order))?;
        let target_port = self.port(target, PortAddress::input(target.order))?;
        if source_port.port_type != target_port.port_type {
            return Err(GraphError::IncompatibleTypes {
                source_node: source.node.clone(),
                source_type: source_port.port_type.clone(),
                target_node: target.node.clone(),
                target_type: target_port.port_type.clone(),
            });
        }
        Ok(())
    }

    fn port(&self, at: &PortRef, address: PortAddress) -> Result<&crate::port::Port, GraphError> {
        let node = self.node(&at.node).ok_or_else(|| GraphError::NodeNotFound {
            node_id: at.node.clone(),
        })?;
        node.port(address).ok_or_else(|| GraphError::PortNotFound {
            node_id: at.node.clone(),
            port: address,
        })
    }

    fn port_mut(
        &mut self,
        at: &PortRef,
        address: PortAddress,
    ) -> Result<&mut crate::port::Port, GraphError> {
        let node = self
            .node_mut(&at.node)
            .ok_or_else(|| GraphError::NodeNotFound {
                node_id: at.node.clone(),
            })?;
        node.port_mut(address).ok_or_else(|| GraphError::PortNotFound {
            node_id: at.node.clone(),
            port: address,
        })
    }

    fn ensure_output_key(&mut self, source: &PortRef) -> Result<DataKey, GraphError> {
        let output = self.port_mut(source, PortAddress::output(source.order))?;
        if let Some(key) = &output.key {
            return Ok(key.clone());
        }
        let key = DataKey::generate(&output.port_type);
        output.key = Some(key.clone());
        Ok(key)
    }

    fn clear_input(&mut self, target: &PortRef) {
        if let Some(input) = self
            .node_mut(&target.node)
            .and_then(|n| n.port_mut(PortAddress::input(target.order)))
        {
            input.key = None;
            input.status = PortStatus::Idle;
        }
    }
}

fn validate_ports(node: &Node) -> Result<(), GraphError> {
    for (ports, address) in [
        (&node.inputs, PortAddress::input as fn(u32) -> PortAddress),
        (&node.outputs, PortAddress::output),
    ] {
        let mut orders = HashSet::new();
        for port in ports {
            if !orders.insert(port.order) {
                return Err(GraphError::DuplicatePort {
                    node_id: node.id.clone(),
                    port: address(port.order),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{Port, PortType};

    fn upload(id: &str) -> Node {
        Node::new(id, "single_file_upload_txt").with_output(Port::new(0, "text"))
    }

    fn transform(id: &str) -> Node {
        Node::new(id, "txt_to_md")
            .with_input(Port::new(0, "text"))
            .with_output(Port::new(0, "text"))
    }

    fn document(nodes: Vec<Node>) -> WorkflowDocument {
        WorkflowDocument {
            nodes,
            ..WorkflowDocument::default()
        }
    }

    #[test]
    fn connect_assigns_shared_key() {
        let mut doc = document(vec![upload("u"), transform("a"), transform("b")]);
        doc.connect(PortRef::new("u", 0), PortRef::new("a", 0))
            .expect("connect a");
        doc.connect(PortRef::new("u", 0), PortRef::new("b", 0))
            .expect("connect b");

        let source_key = doc.nodes[0].outputs[0].key.clone().expect("source key");
        assert_eq!(doc.nodes[1].inputs[0].key.as_ref(), Some(&source_key));
        assert_eq!(doc.nodes[2].inputs[0].key.as_ref(), Some(&source_key));
        assert!(source_key.as_str().ends_with(".txt"));
        doc.validate().expect("valid");
    }

    #[test]
    fn connect_reuses_existing_source_key() {
        let mut doc = document(vec![
            Node::new("u", "x").with_output(Port::new(0, "pdf").with_key(DataKey::new("k.pdf"))),
            Node::new("p", "pdf_to_txt").with_input(Port::new(0, "pdf")),
        ]);
        let edge_id = doc
            .connect(PortRef::new("u", 0), PortRef::new("p", 0))
            .expect("connect");
        assert_eq!(edge_id.as_str(), "reactflow__edge-uoutput.0-pinput.0");
        assert_eq!(doc.nodes[1].inputs[0].key, Some(DataKey::new("k.pdf")));
    }

    #[test]
    fn connect_rejects_type_mismatch() {
        let mut doc = document(vec![
            Node::new("u", "single_file_upload_pdf").with_output(Port::new(0, "pdf")),
            transform("t"),
        ]);
        let err = doc
            .connect(PortRef::new("u", 0), PortRef::new("t", 0))
            .unwrap_err();
        assert!(matches!(err, GraphError::IncompatibleTypes { .. }));
        assert!(doc.edges.is_empty());
    }

    #[test]
    fn text_does_not_connect_to_txt() {
        let mut doc = document(vec![
            upload("u"),
            Node::new("t", "legacy").with_input(Port::new(0, PortType::Txt)),
        ]);
        assert!(doc
            .connect(PortRef::new("u", 0), PortRef::new("t", 0))
            .is_err());
    }

    #[test]
    fn connect_rejects_second_producer() {
        let mut doc = document(vec![upload("u1"), upload("u2"), transform("t")]);
        doc.connect(PortRef::new("u1", 0), PortRef::new("t", 0))
            .expect("first");
        let err = doc
            .connect(PortRef::new("u2", 0), PortRef::new("t", 0))
            .unwrap_err();
        assert!(matches!(err, GraphError::InputAlreadyConnected { .. }));
    }

    #[test]
    fn connect_rejects_missing_port() {
        let mut doc = document(vec![upload("u"), transform("t")]);
        let err = doc
            .connect(PortRef::new("u", 1), PortRef::new("t", 0))
            .unwrap_err();
        assert!(matches!(err, GraphError::PortNotFound { .. }));
    }

    #[test]
    fn connect_rejects_cycle() {
        let mut doc = document(vec![transform("a"), transform("b")]);
        doc.connect(PortRef::new("a", 0), PortRef::new("b", 0))
            .expect("a to b");
        let err = doc
            .connect(PortRef::new("b", 0), PortRef::new("a", 0))
            .unwrap_err();
        assert_eq!(err, GraphError::CycleDetected);
        assert_eq!(doc.edges.len(), 1);
        assert!(doc.nodes[0].inputs[0].key.is_none());
    }

    #[test]
    fn disconnect_clears_target_input() {
        let mut doc = document(vec![upload("u"), transform("t")]);
        let edge_id = doc
            .connect(PortRef::new("u", 0), PortRef::new("t", 0))
            .expect("connect");
        doc.nodes[1].inputs[0].status = PortStatus::Ready;

        doc.disconnect(&edge_id).expect("disconnect");
        assert!(doc.edges.is_empty());
        assert!(doc.nodes[1].inputs[0].key.is_none());
        assert_eq!(doc.nodes[1].inputs[0].status, PortStatus::Idle);
        assert!(doc.nodes[0].outputs[0].key.is_some());

        let err = doc.disconnect(&edge_id).unwrap_err();
        assert!(matches!(err, GraphError::EdgeNotFound { .. }));
    }

    #[test]
    fn remove_node_drops_incident_edges() {
        let mut doc = document(vec![upload("u"), transform("a"), transform("b")]);
        doc.connect(PortRef::new("u", 0), PortRef::new("a", 0))
            .expect("u to a");
        doc.connect(PortRef::new("a", 0), PortRef::new("b", 0))
            .expect("a to b");

        let removed = doc.remove_node(&NodeId::new("a")).expect("remove");
        assert_eq!(removed.id, NodeId::new("a"));
        assert!(doc.edges.is_empty());
        assert!(doc.nodes[1].inputs[0].key.is_none());
        doc.validate().expect("valid");
    }

    #[test]
    fn add_node_rejects_duplicates() {
        let mut doc = document(vec![upload("u")]);
        let err = doc.add_node(upload("u")).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateNode { .. }));

        let err = doc
            .add_node(
                Node::new("x", "y")
                    .with_input(Port::new(0, "text"))
                    .with_input(Port::new(0, "text")),
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicatePort { .. }));
    }

    #[test]
    fn validate_rejects_duplicate_edges() {
        let mut doc = document(vec![upload("u"), transform("t")]);
        doc.connect(PortRef::new("u", 0), PortRef::new("t", 0))
            .expect("connect");
        let mut copy = doc.edges[0].clone();
        copy.id = EdgeId::new("other");
        doc.edges.push(copy);
        assert!(matches!(
            doc.validate(),
            Err(GraphError::DuplicateEdge { .. })
        ));
    }
}

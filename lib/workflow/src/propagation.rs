//! Edge propagation.
//!
//! Moves a finished node's output data references onto the inputs they
//! feed, then returns the node to a resting state so its outputs are not
//! fanned out twice.

use crate::document::WorkflowDocument;
use crate::edge::PortRef;
use crate::error::GraphError;
use crate::node::{NodeId, NodeStatus};
use crate::port::{DataKey, PortAddress, PortStatus};
use tracing::debug;

/// Summary of one propagation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Propagation {
    /// The node whose outputs were fanned out.
    pub source: NodeId,
    /// Inputs that were made ready, in edge order.
    pub fed: Vec<PortRef>,
}

/// Propagates every output of `node_id` along its outgoing edges.
///
/// Each connected input receives the output's data key and becomes ready.
/// The node's outputs and inputs are then reset to idle. A node with inputs
/// returns to `idle` so a future upstream write can trigger it again; a
/// node without inputs settles at `ready`, since nothing could ever feed it
/// again and leaving it idle would re-run it forever.
///
/// # Errors
///
/// Returns `NodeNotFound` if the node does not exist, or `PortNotFound` if
/// an edge targets a missing input.
pub fn propagate(document: &mut WorkflowDocument, node_id: &NodeId) -> Result<Propagation, GraphError> {
    let node = document.node(node_id).ok_or_else(|| GraphError::NodeNotFound {
        node_id: node_id.clone(),
    })?;

    let transfers: Vec<(PortRef, Option<DataKey>)> = node
        .outputs
        .iter()
        .flat_map(|output| {
            document
                .edges_from(node_id, output.order)
                .map(move |edge| (edge.target.clone(), output.key.clone()))
        })
        .collect();

    let mut propagation = Propagation {
        source: node_id.clone(),
        fed: Vec::with_capacity(transfers.len()),
    };
    for (target, key) in transfers {
        let input = document
            .node_mut(&target.node)
            .and_then(|n| n.port_mut(PortAddress::input(target.order)))
            .ok_or_else(|| GraphError::PortNotFound {
                node_id: target.node.clone(),
                port: PortAddress::input(target.order),
            })?;
        input.key = key;
        input.status = PortStatus::Ready;
        debug!(
            from = %node_id,
            to = %target.node,
            port = %PortAddress::input(target.order),
            "input ready"
        );
        propagation.fed.push(target);
    }

    if let Some(node) = document.node_mut(node_id) {
        for port in node.outputs.iter_mut().chain(node.inputs.iter_mut()) {
            port.status = PortStatus::Idle;
        }
        node.status = if node.inputs.is_empty() {
            NodeStatus::Ready
        } else {
            NodeStatus::Idle
        };
    }
    Ok(propagation)
}

//! Readiness scheduler.
//!
//! Selection is a pure function of the document: the same document always
//! yields the same action, which is what makes redelivered wake-ups safe.

use crate::document::WorkflowDocument;
use crate::node::NodeId;
use std::fmt;

/// The next unit of progress for a workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Dispatch this node to its executor.
    Run(NodeId),
    /// Fan out this node's ready outputs.
    Propagate(NodeId),
    /// Nothing left to do; the run is complete.
    Idle,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run(id) => write!(f, "run {id}"),
            Self::Propagate(id) => write!(f, "propagate {id}"),
            Self::Idle => f.write_str("idle"),
        }
    }
}

/// Selects the next action in priority order.
///
/// 1. The first node, in document order, that is idle with every input
///    ready and no output still awaiting propagation.
/// 2. Otherwise the first node whose outputs are all ready.
/// 3. Otherwise `Idle`.
#[must_use]
pub fn select_next_action(document: &WorkflowDocument) -> Action {
    if let Some(node) = document.nodes.iter().find(|n| n.is_runnable()) {
        return Action::Run(node.id.clone());
    }
    if let Some(node) = document.nodes.iter().find(|n| n.outputs_ready()) {
        return Action::Propagate(node.id.clone());
    }
    Action::Idle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeStatus};
    use crate::port::{Port, PortStatus};

    fn ready_output_source(id: &str) -> Node {
        Node::new(id, "single_file_upload_txt")
            .with_output(Port::new(0, "text").with_status(PortStatus::Ready))
    }

    fn waiting(id: &str) -> Node {
        Node::new(id, "txt_to_md")
            .with_input(Port::new(0, "text"))
            .with_output(Port::new(0, "text"))
    }

    fn doc(nodes: Vec<Node>) -> WorkflowDocument {
        WorkflowDocument {
            nodes,
            ..WorkflowDocument::default()
        }
    }

    #[test]
    fn empty_document_is_idle() {
        assert_eq!(select_next_action(&WorkflowDocument::new()), Action::Idle);
    }

    #[test]
    fn source_without_inputs_runs_first() {
        let d = doc(vec![
            waiting("t"),
            Node::new("u", "single_file_upload_txt").with_output(Port::new(0, "text")),
        ]);
        assert_eq!(select_next_action(&d), Action::Run(NodeId::new("u")));
    }

    #[test]
    fn run_takes_priority_over_propagate() {
        let mut runnable = waiting("t");
        runnable.inputs[0].status = PortStatus::Ready;
        let d = doc(vec![ready_output_source("u"), runnable]);
        assert_eq!(select_next_action(&d), Action::Run(NodeId::new("t")));
    }

    #[test]
    fn ready_outputs_are_propagated() {
        let d = doc(vec![ready_output_source("u"), waiting("t")]);
        assert_eq!(select_next_action(&d), Action::Propagate(NodeId::new("u")));
    }

    #[test]
    fn document_order_breaks_ties() {
        let mut first = waiting("a");
        first.inputs[0].status = PortStatus::Ready;
        let mut second = waiting("b");
        second.inputs[0].status = PortStatus::Ready;
        let d = doc(vec![first, second]);
        assert_eq!(select_next_action(&d), Action::Run(NodeId::new("a")));
    }

    #[test]
    fn pending_ready_and_failed_nodes_are_not_rerun() {
        for status in [NodeStatus::Pending, NodeStatus::Ready, NodeStatus::Failed] {
            let d = doc(vec![
                Node::new("u", "single_file_upload_txt")
                    .with_output(Port::new(0, "text"))
                    .with_status(status),
            ]);
            assert_eq!(select_next_action(&d), Action::Idle, "status {status:?}");
        }
    }

    #[test]
    fn selection_is_idempotent() {
        let d = doc(vec![ready_output_source("u"), waiting("t")]);
        assert_eq!(select_next_action(&d), select_next_action(&d));
    }

    #[test]
    fn partially_ready_outputs_are_not_propagated() {
        let node = Node::new("m", "multi")
            .with_output(Port::new(0, "text").with_status(PortStatus::Ready))
            .with_output(Port::new(1, "text"))
            .with_status(NodeStatus::Ready);
        assert_eq!(select_next_action(&doc(vec![node])), Action::Idle);
    }
}

//! One pure scheduling step.
//!
//! [`advance`] takes a document by value and returns the next document
//! together with what happened. Only dispatch needs I/O; it is returned as a
//! request for the caller to carry out.

use crate::dispatch::{BlockError, BlockRequest, DispatchOutcome, apply_outcome, begin_dispatch};
use crate::document::{RunStatus, WorkflowDocument};
use crate::error::GraphError;
use crate::node::{NodeId, NodeStatus};
use crate::propagation::{Propagation, propagate};
use crate::scheduler::{Action, select_next_action};
use blockflow_core::WorkflowId;
use chrono::{DateTime, Duration, Utc};

/// What a step did, or left for the caller to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// No work remained; the document is now finished.
    Completed,
    /// A node's outputs were fanned out.
    Propagated(Propagation),
    /// A node was marked pending; the request must be sent.
    Dispatch(BlockRequest),
    /// A node could not be dispatched; the failure is already recorded.
    Rejected { node_id: NodeId, error: BlockError },
    /// No action is possible while a dispatch is still in flight.
    Waiting { node_id: NodeId },
}

/// The result of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// The document after the step.
    pub document: WorkflowDocument,
    /// The action the scheduler selected.
    pub action: Action,
    /// The step's effect.
    pub effect: Effect,
}

impl Step {
    /// Returns true if another step should follow.
    #[must_use]
    pub fn has_more_work(&self) -> bool {
        self.document.status == RunStatus::Pending
    }
}

/// Returns the first pending node whose dispatch may still be running.
fn in_flight(document: &WorkflowDocument, now: DateTime<Utc>, lease: Duration) -> Option<&NodeId> {
    document
        .nodes
        .iter()
        .filter(|n| n.status == NodeStatus::Pending)
        .find(|n| n.dispatched_at.is_some_and(|at| now < at + lease))
        .map(|n| &n.id)
}

/// Performs one scheduling step on `document` at time `now`.
///
/// While a node was dispatched less than `lease` ago, the step waits and
/// leaves the document untouched, so at most one dispatch per workflow is
/// in flight and its result can always be saved. A pending node older than
/// the lease is treated as abandoned and the run finishes around it.
///
/// # Errors
///
/// Returns an error if the selected node vanished from the document, which
/// only happens for a structurally invalid document.
pub fn advance(
    workflow_id: &WorkflowId,
    mut document: WorkflowDocument,
    now: DateTime<Utc>,
    lease: Duration,
) -> Result<Step, GraphError> {
    let action = select_next_action(&document);
    if let Some(node_id) = in_flight(&document, now, lease) {
        let effect = Effect::Waiting {
            node_id: node_id.clone(),
        };
        return Ok(Step {
            document,
            action,
            effect,
        });
    }
    let effect = match &action {
        Action::Idle => {
            document.status = RunStatus::Finished;
            Effect::Completed
        }
        Action::Propagate(node_id) => Effect::Propagated(propagate(&mut document, node_id)?),
        Action::Run(node_id) => match begin_dispatch(&mut document, workflow_id, node_id, now)? {
            Ok(request) => Effect::Dispatch(request),
            Err(error) => {
                apply_outcome(&mut document, node_id, &DispatchOutcome::Failed(error.clone()))?;
                Effect::Rejected {
                    node_id: node_id.clone(),
                    error,
                }
            }
        },
    };
    Ok(Step {
        document,
        action,
        effect,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::PortRef;
    use crate::node::Node;
    use crate::port::{Port, PortStatus};

    fn lease() -> Duration {
        Duration::seconds(330)
    }

    fn run_step(doc: WorkflowDocument) -> Step {
        advance(&WorkflowId::new(), doc, Utc::now(), lease()).expect("step")
    }

    fn pending(nodes: Vec<Node>) -> WorkflowDocument {
        WorkflowDocument {
            status: RunStatus::Pending,
            nodes,
            edges: Vec::new(),
        }
    }

    #[test]
    fn idle_step_finishes_document() {
        let step = run_step(pending(Vec::new()));
        assert_eq!(step.action, Action::Idle);
        assert_eq!(step.effect, Effect::Completed);
        assert_eq!(step.document.status, RunStatus::Finished);
        assert!(!step.has_more_work());
    }

    #[test]
    fn run_step_returns_request() {
        let doc = pending(vec![
            Node::new("u", "single_file_upload_txt").with_output(Port::new(0, "text")),
        ]);
        let step = run_step(doc);
        assert_eq!(step.action, Action::Run(NodeId::new("u")));
        assert!(matches!(step.effect, Effect::Dispatch(_)));
        assert_eq!(step.document.nodes[0].status, NodeStatus::Pending);
        assert!(step.has_more_work());
    }

    #[test]
    fn unfed_input_is_rejected_in_place() {
        let mut node = Node::new("t", "txt_to_md")
            .with_input(Port::new(0, "text"))
            .with_output(Port::new(0, "text"));
        node.inputs[0].status = PortStatus::Ready;
        let step = run_step(pending(vec![node]));
        assert!(matches!(step.effect, Effect::Rejected { .. }));
        assert_eq!(step.document.nodes[0].status, NodeStatus::Failed);
        assert_eq!(step.document.status, RunStatus::Finished);
    }

    #[test]
    fn propagate_step_feeds_downstream() {
        let mut doc = pending(vec![
            Node::new("u", "single_file_upload_txt").with_output(Port::new(0, "text")),
            Node::new("t", "txt_to_md")
                .with_input(Port::new(0, "text"))
                .with_output(Port::new(0, "text")),
        ]);
        doc.connect(PortRef::new("u", 0), PortRef::new("t", 0))
            .expect("connect");
        doc.nodes[0].outputs[0].status = PortStatus::Ready;

        let step = run_step(doc);
        assert_eq!(step.action, Action::Propagate(NodeId::new("u")));
        assert_eq!(step.document.nodes[1].inputs[0].status, PortStatus::Ready);
    }

    #[test]
    fn advance_is_deterministic() {
        let doc = pending(vec![
            Node::new("u", "single_file_upload_txt").with_output(Port::new(0, "text")),
        ]);
        let id = WorkflowId::new();
        let now = Utc::now();
        let a = advance(&id, doc.clone(), now, lease()).expect("a");
        let b = advance(&id, doc, now, lease()).expect("b");
        assert_eq!(a.action, b.action);
        assert_eq!(a.document.nodes[0].status, b.document.nodes[0].status);
    }

    #[test]
    fn fresh_dispatch_blocks_completion() {
        let now = Utc::now();
        let mut node = Node::new("u", "single_file_upload_txt")
            .with_output(Port::new(0, "text"))
            .with_status(NodeStatus::Pending);
        node.dispatched_at = Some(now - Duration::seconds(10));
        let doc = pending(vec![node]);

        let step = advance(&WorkflowId::new(), doc.clone(), now, lease()).expect("step");
        assert_eq!(
            step.effect,
            Effect::Waiting {
                node_id: NodeId::new("u")
            }
        );
        assert_eq!(step.document, doc);
        assert!(step.has_more_work());
    }

    #[test]
    fn fresh_dispatch_blocks_other_runnable_nodes() {
        let now = Utc::now();
        let mut busy = Node::new("a", "single_file_upload_txt")
            .with_output(Port::new(0, "text"))
            .with_status(NodeStatus::Pending);
        busy.dispatched_at = Some(now - Duration::seconds(10));
        let idle = Node::new("b", "single_file_upload_txt").with_output(Port::new(0, "text"));
        let doc = pending(vec![busy, idle]);

        let step = advance(&WorkflowId::new(), doc.clone(), now, lease()).expect("step");
        assert_eq!(step.action, Action::Run(NodeId::new("b")));
        assert_eq!(
            step.effect,
            Effect::Waiting {
                node_id: NodeId::new("a")
            }
        );
        assert_eq!(step.document, doc);
    }

    #[test]
    fn abandoned_dispatch_finishes_run() {
        let now = Utc::now();
        let mut node = Node::new("u", "single_file_upload_txt")
            .with_output(Port::new(0, "text"))
            .with_status(NodeStatus::Pending);
        node.dispatched_at = Some(now - Duration::seconds(3_600));

        let step = advance(&WorkflowId::new(), pending(vec![node]), now, lease()).expect("step");
        assert_eq!(step.effect, Effect::Completed);
        assert_eq!(step.document.status, RunStatus::Finished);
        assert_eq!(step.document.nodes[0].status, NodeStatus::Pending);
    }
}

//! Workflow engine for blockflow.
//!
//! A workflow is a persisted document of nodes wired by typed edges. Each
//! wake-up advances a running document by one step:
//!
//! - **Document model**: nodes, ports and edges as stored by the editor
//! - **Propagation**: moves finished outputs onto downstream inputs
//! - **Scheduling**: picks the next node to run or propagate
//! - **Dispatch**: hands a node to its executor and records the result
//! - **Driver**: load, step, fenced save, re-arm
//! - **Adapters**: NATS key-value and work queue, filesystem and memory
//!   stores, HTTP block executor

pub mod catalog;
pub mod dispatch;
pub mod document;
pub mod driver;
pub mod edge;
pub mod envelope;
pub mod error;
pub mod graph;
pub mod http;
pub mod nats;
pub mod node;
pub mod port;
pub mod propagation;
pub mod queue;
pub mod repository;
pub mod scheduler;
pub mod step;
pub mod store;
pub mod worker;

pub use catalog::{BlockSpec, Catalog, Route};
pub use dispatch::{BlockError, BlockExecutor, BlockRequest, DispatchOutcome};
pub use document::{RunStatus, WorkflowDocument};
pub use driver::{Driver, DriverConfig, DriverError, StepOutcome};
pub use edge::{Edge, EdgeId, PortRef};
pub use error::{DocumentError, GraphError};
pub use http::{ExecutorConfig, HttpBlockExecutor};
pub use node::{Node, NodeId, NodeStatus, ServiceKey};
pub use port::{DataKey, Port, PortAddress, PortStatus, PortType};
pub use queue::{ChannelWakeupQueue, QueueError, WakeupQueue, WakeupSignal};
pub use repository::{DocumentRepository, RepositoryError, RetryPolicy};
pub use scheduler::{Action, select_next_action};
pub use store::{FsObjectStore, MemoryObjectStore, ObjectStore, ObjectStoreError, PutCondition};
pub use worker::{Disposition, Worker, WorkerConfig};

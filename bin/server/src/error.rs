//! API error types.
//!
//! Engine errors are mapped onto HTTP statuses here. Internal details are
//! logged and replaced by a generic message; client mistakes are echoed.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use blockflow_core::WorkflowId;
use blockflow_workflow::{DocumentError, DriverError, GraphError, ObjectStoreError, RepositoryError};
use rootcause::Report;
use std::fmt;

/// Errors returned by API handlers.
#[derive(Debug)]
pub enum ApiError {
    /// The path does not hold a valid workflow ID.
    InvalidId { id: String, reason: String },
    /// The submitted document is not valid.
    InvalidDocument { details: String },
    /// A structural edit was rejected.
    Graph(GraphError),
    /// The catalog has no such block type.
    UnknownBlock { block: String },
    /// The data key cannot name a blob.
    InvalidKey { key: String },
    /// The requested data blob does not exist.
    DataNotFound { key: String },
    /// The workflow is running and cannot be edited.
    RunInProgress { workflow_id: WorkflowId },
    /// The document changed since the client read it.
    Conflict { workflow_id: WorkflowId },
    /// The stored document cannot be read.
    Corrupt { workflow_id: WorkflowId, details: String },
    /// Storage failed.
    Storage { details: String },
    /// The wake-up queue failed.
    Queue { details: String },
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidId { id, reason } => write!(f, "invalid workflow id '{id}': {reason}"),
            Self::InvalidDocument { details } => write!(f, "invalid workflow document: {details}"),
            Self::Graph(e) => write!(f, "{e}"),
            Self::UnknownBlock { block } => write!(f, "unknown block type '{block}'"),
            Self::InvalidKey { key } => write!(f, "invalid data key '{key}'"),
            Self::DataNotFound { key } => write!(f, "data '{key}' not found"),
            Self::RunInProgress { workflow_id } => {
                write!(f, "workflow '{workflow_id}' is running")
            }
            Self::Conflict { workflow_id } => {
                write!(f, "workflow '{workflow_id}' was modified concurrently")
            }
            Self::Corrupt {
                workflow_id,
                details,
            } => write!(f, "workflow '{workflow_id}' is unreadable: {details}"),
            Self::Storage { details } => write!(f, "storage error: {details}"),
            Self::Queue { details } => write!(f, "queue error: {details}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    /// Maps a repository failure for `workflow_id`.
    pub fn from_repository(workflow_id: &WorkflowId, e: RepositoryError) -> Self {
        match e {
            RepositoryError::Conflict { workflow_id } => Self::Conflict { workflow_id },
            RepositoryError::Document(e) => Self::Corrupt {
                workflow_id: workflow_id.clone(),
                details: e.to_string(),
            },
            RepositoryError::Store(ObjectStoreError::NotFound { key }) => Self::DataNotFound { key },
            RepositoryError::Store(e) => Self::Storage {
                details: e.to_string(),
            },
        }
    }
}

impl From<Report<DriverError>> for ApiError {
    fn from(report: Report<DriverError>) -> Self {
        match report.current_context() {
            DriverError::MalformedDocument {
                workflow_id,
                message,
            } => Self::Corrupt {
                workflow_id: workflow_id.clone(),
                details: message.clone(),
            },
            DriverError::Conflict { workflow_id } => Self::Conflict {
                workflow_id: workflow_id.clone(),
            },
            DriverError::Store { message, .. } => Self::Storage {
                details: message.clone(),
            },
            DriverError::Queue(e) => Self::Queue {
                details: e.to_string(),
            },
            DriverError::RunInProgress { workflow_id } => Self::RunInProgress {
                workflow_id: workflow_id.clone(),
            },
        }
    }
}

impl From<GraphError> for ApiError {
    fn from(e: GraphError) -> Self {
        Self::Graph(e)
    }
}

impl From<DocumentError> for ApiError {
    fn from(e: DocumentError) -> Self {
        Self::InvalidDocument {
            details: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidId { .. } | Self::InvalidKey { .. } => StatusCode::BAD_REQUEST,
            Self::InvalidDocument { .. } | Self::UnknownBlock { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Graph(GraphError::NodeNotFound { .. } | GraphError::EdgeNotFound { .. }) => {
                StatusCode::NOT_FOUND
            }
            Self::Graph(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::DataNotFound { .. } => StatusCode::NOT_FOUND,
            Self::RunInProgress { .. } | Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Corrupt { .. } | Self::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Queue { .. } => StatusCode::SERVICE_UNAVAILABLE,
        };

        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            match status {
                StatusCode::SERVICE_UNAVAILABLE => "Service unavailable".to_string(),
                _ => "Internal server error".to_string(),
            }
        } else {
            self.to_string()
        };

        (status, message).into_response()
    }
}

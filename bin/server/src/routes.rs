//! Editor-facing HTTP handlers.
//!
//! Documents travel as YAML in the stored format. Structural edits are
//! refused while a run is in progress and saved conditionally on the
//! revision that was read, so they cannot clobber the engine's writes.

use crate::app::AppState;
use crate::error::ApiError;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use blockflow_core::{WorkflowId, hex_token};
use blockflow_workflow::{BlockSpec, DataKey, EdgeId, Node, NodeId, PortRef, WorkflowDocument};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::info;

const YAML: &str = "application/yaml";

fn parse_id(raw: &str) -> Result<WorkflowId, ApiError> {
    raw.parse().map_err(|e: blockflow_core::ParseIdError| ApiError::InvalidId {
        id: raw.to_string(),
        reason: e.reason,
    })
}

fn parse_data_key(raw: String) -> Result<DataKey, ApiError> {
    if raw.is_empty() || raw.starts_with('.') || raw.contains(['/', '\\']) {
        return Err(ApiError::InvalidKey { key: raw });
    }
    Ok(DataKey::new(raw))
}

fn etag(revision: u64) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!("\"{revision}\"")).ok()
}

fn if_match(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::IF_MATCH)?
        .to_str()
        .ok()?
        .trim()
        .trim_matches('"')
        .parse()
        .ok()
}

fn yaml_response(document: &WorkflowDocument, revision: Option<u64>) -> Result<Response, ApiError> {
    let body = document.to_yaml().map_err(|e| ApiError::Storage {
        details: e.to_string(),
    })?;
    let mut response = ([(header::CONTENT_TYPE, YAML)], body).into_response();
    if let Some(value) = revision.and_then(etag) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

/// Applies a structural edit to a workflow that is not running.
async fn edit<T>(
    state: &AppState,
    workflow_id: &WorkflowId,
    apply: impl FnOnce(&mut WorkflowDocument) -> Result<T, ApiError>,
) -> Result<T, ApiError> {
    let repository = state.driver.repository();
    let mut loaded = repository
        .load_or_create(workflow_id)
        .await
        .map_err(|e| ApiError::from_repository(workflow_id, e))?;
    if loaded.document.is_pending() {
        return Err(ApiError::RunInProgress {
            workflow_id: workflow_id.clone(),
        });
    }
    let value = apply(&mut loaded.document)?;
    repository
        .save(workflow_id, &loaded.document, loaded.revision)
        .await
        .map_err(|e| ApiError::from_repository(workflow_id, e))?;
    Ok(value)
}

/// Liveness probe.
pub async fn health() -> &'static str {
    "ok"
}

/// Lists the block catalog.
pub async fn list_blocks(State(state): State<AppState>) -> Json<&'static [BlockSpec]> {
    Json(state.catalog.blocks())
}

/// Body of a created workflow.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedWorkflow {
    pub workflow_id: WorkflowId,
}

/// Creates an empty workflow under a fresh ID.
pub async fn create_workflow(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<CreatedWorkflow>), ApiError> {
    let workflow_id = WorkflowId::new();
    state
        .driver
        .repository()
        .load_or_create(&workflow_id)
        .await
        .map_err(|e| ApiError::from_repository(&workflow_id, e))?;
    info!(workflow_id = %workflow_id, "workflow created");
    Ok((StatusCode::CREATED, Json(CreatedWorkflow { workflow_id })))
}

/// Returns a workflow document; an unknown ID yields an empty one.
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let workflow_id = parse_id(&id)?;
    let loaded = state
        .driver
        .repository()
        .load(&workflow_id)
        .await
        .map_err(|e| ApiError::from_repository(&workflow_id, e))?;
    yaml_response(&loaded.document, loaded.revision)
}

/// Replaces a workflow's nodes and edges.
///
/// The run status stays whatever is stored. An `If-Match` revision, when
/// sent, must match the stored one.
pub async fn put_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, ApiError> {
    let workflow_id = parse_id(&id)?;
    let mut document = WorkflowDocument::parse(&body)?;

    let repository = state.driver.repository();
    let current = repository
        .load(&workflow_id)
        .await
        .map_err(|e| ApiError::from_repository(&workflow_id, e))?;
    if current.document.is_pending() {
        return Err(ApiError::RunInProgress { workflow_id });
    }
    if let Some(expected) = if_match(&headers) {
        if current.revision != Some(expected) {
            return Err(ApiError::Conflict { workflow_id });
        }
    }

    document.status = current.document.status;
    let revision = repository
        .save(&workflow_id, &document, current.revision)
        .await
        .map_err(|e| ApiError::from_repository(&workflow_id, e))?;

    let mut response = StatusCode::NO_CONTENT.into_response();
    if let Some(value) = etag(revision) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

/// Starts a run.
pub async fn run_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let workflow_id = parse_id(&id)?;
    state.driver.request_run(&workflow_id).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Resets node and port statuses; refused while running.
pub async fn reset_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let workflow_id = parse_id(&id)?;
    let document = state.driver.reset(&workflow_id).await?;
    yaml_response(&document, None)
}

/// Body for adding a node.
#[derive(Debug, Deserialize)]
pub struct NewNode {
    /// Catalog block key.
    pub block: String,
    /// Node ID; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
}

/// Adds a node instantiated from the catalog.
pub async fn add_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<NewNode>,
) -> Result<(StatusCode, Json<Node>), ApiError> {
    let workflow_id = parse_id(&id)?;
    let node_id = request
        .id
        .unwrap_or_else(|| format!("{}_{}", request.block, &hex_token()[..8]));
    let node = state
        .catalog
        .instantiate(&request.block, node_id)
        .ok_or(ApiError::UnknownBlock {
            block: request.block,
        })?;
    edit(&state, &workflow_id, |document| {
        document.add_node(node.clone())?;
        Ok(())
    })
    .await?;
    Ok((StatusCode::CREATED, Json(node)))
}

/// Removes a node and its edges.
pub async fn remove_node(
    State(state): State<AppState>,
    Path((id, node_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let workflow_id = parse_id(&id)?;
    edit(&state, &workflow_id, |document| {
        document.remove_node(&NodeId::new(node_id))?;
        Ok(())
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// One end of a new edge.
#[derive(Debug, Deserialize)]
pub struct Endpoint {
    /// Node ID.
    pub node: String,
    /// Port order on that node.
    pub order: u32,
}

/// Body for connecting two ports.
#[derive(Debug, Deserialize)]
pub struct NewEdge {
    /// The output port.
    pub source: Endpoint,
    /// The input port.
    pub target: Endpoint,
}

/// Body of a created edge.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedEdge {
    pub id: EdgeId,
}

/// Connects an output port to an input port.
pub async fn connect(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<NewEdge>,
) -> Result<(StatusCode, Json<CreatedEdge>), ApiError> {
    let workflow_id = parse_id(&id)?;
    let edge_id = edit(&state, &workflow_id, |document| {
        Ok(document.connect(
            PortRef::new(request.source.node, request.source.order),
            PortRef::new(request.target.node, request.target.order),
        )?)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(CreatedEdge { id: edge_id })))
}

/// Removes an edge.
pub async fn disconnect(
    State(state): State<AppState>,
    Path((id, edge_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let workflow_id = parse_id(&id)?;
    edit(&state, &workflow_id, |document| {
        document.disconnect(&EdgeId::new(edge_id))?;
        Ok(())
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Reads a data blob.
pub async fn get_data(
    State(state): State<AppState>,
    Path((id, key)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let workflow_id = parse_id(&id)?;
    let key = parse_data_key(key)?;
    let data = state
        .driver
        .repository()
        .get_data(&workflow_id, &key)
        .await
        .map_err(|e| ApiError::from_repository(&workflow_id, e))?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], data).into_response())
}

/// Writes a data blob.
pub async fn put_data(
    State(state): State<AppState>,
    Path((id, key)): Path<(String, String)>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let workflow_id = parse_id(&id)?;
    let key = parse_data_key(key)?;
    state
        .driver
        .repository()
        .put_data(&workflow_id, &key, body)
        .await
        .map_err(|e| ApiError::from_repository(&workflow_id, e))?;
    Ok(StatusCode::NO_CONTENT)
}

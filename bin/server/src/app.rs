//! Application state and router.

use crate::routes;
use axum::Router;
use axum::routing::{delete, get, post};
use blockflow_workflow::{BlockExecutor, Catalog, Driver, DriverConfig, ObjectStore, WakeupQueue};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Object store selected at startup.
pub type DynStore = Arc<dyn ObjectStore>;
/// Block executor selected at startup.
pub type DynExecutor = Arc<dyn BlockExecutor>;
/// Wake-up queue selected at startup.
pub type DynQueue = Arc<dyn WakeupQueue>;
/// The driver as wired by the server.
pub type AppDriver = Driver<DynStore, DynExecutor, DynQueue>;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// The engine driver, shared with the worker.
    pub driver: Arc<AppDriver>,
    /// Block types offered to the editor.
    pub catalog: Catalog,
}

impl AppState {
    /// Wires a driver over the given collaborators.
    pub fn new(
        store: DynStore,
        executor: DynExecutor,
        queue: DynQueue,
        config: DriverConfig,
        catalog: Catalog,
    ) -> Self {
        Self {
            driver: Arc::new(Driver::new(store, executor, queue, config)),
            catalog,
        }
    }
}

/// Builds the HTTP router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/blocks", get(routes::list_blocks))
        .route("/workflows", post(routes::create_workflow))
        .route(
            "/workflows/{id}",
            get(routes::get_workflow).put(routes::put_workflow),
        )
        .route("/workflows/{id}/run", post(routes::run_workflow))
        .route("/workflows/{id}/reset", post(routes::reset_workflow))
        .route("/workflows/{id}/nodes", post(routes::add_node))
        .route("/workflows/{id}/nodes/{node_id}", delete(routes::remove_node))
        .route("/workflows/{id}/edges", post(routes::connect))
        .route("/workflows/{id}/edges/{edge_id}", delete(routes::disconnect))
        .route(
            "/workflows/{id}/data/{key}",
            get(routes::get_data).put(routes::put_data),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

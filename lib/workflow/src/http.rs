//! HTTP block executor.
//!
//! Remote blocks are invoked with a JSON `POST` of the [`BlockRequest`] to
//! the executor service's endpoint. Any 2xx answer means the outputs were
//! written; everything else is a failure carrying the status and body.

use crate::catalog::{Catalog, Route};
use crate::dispatch::{BlockError, BlockExecutor, BlockRequest};
use crate::node::ServiceKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, instrument, warn};

/// Where executor services live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Base URL; a service is reached at `{base_url}/services/{executor}`.
    pub base_url: String,
    /// Explicit endpoints, keyed by block key or executor name.
    pub services: HashMap<String, String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            services: HashMap::new(),
        }
    }
}

/// Invokes remote blocks over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBlockExecutor {
    client: reqwest::Client,
    catalog: Catalog,
    config: ExecutorConfig,
}

impl HttpBlockExecutor {
    /// Creates an executor with a default client.
    #[must_use]
    pub fn new(catalog: Catalog, config: ExecutorConfig) -> Self {
        Self::with_client(reqwest::Client::new(), catalog, config)
    }

    /// Creates an executor with the given client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, catalog: Catalog, config: ExecutorConfig) -> Self {
        Self {
            client,
            catalog,
            config,
        }
    }

    /// Resolves the endpoint for a service key.
    ///
    /// Returns `Ok(None)` for passive blocks.
    ///
    /// # Errors
    ///
    /// Returns `UnknownService` if the key is not in the catalog.
    pub fn endpoint(&self, service: &ServiceKey) -> Result<Option<String>, BlockError> {
        let executor = match self.catalog.route(service.as_str()) {
            Some(Route::Remote { executor }) => executor,
            Some(Route::Passive) => return Ok(None),
            None => {
                return Err(BlockError::UnknownService {
                    service: service.clone(),
                });
            }
        };
        let url = self
            .config
            .services
            .get(service.as_str())
            .or_else(|| self.config.services.get(executor))
            .cloned()
            .unwrap_or_else(|| {
                format!(
                    "{}/services/{executor}",
                    self.config.base_url.trim_end_matches('/')
                )
            });
        Ok(Some(url))
    }
}

#[async_trait]
impl BlockExecutor for HttpBlockExecutor {
    #[instrument(
        skip(self, request),
        fields(workflow_id = %request.workflow_id, node_id = %request.node_id, service = %request.service)
    )]
    async fn execute(&self, request: &BlockRequest) -> Result<(), BlockError> {
        let Some(url) = self.endpoint(&request.service)? else {
            debug!("passive block, nothing to invoke");
            return Ok(());
        };

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| BlockError::Transport {
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "executor finished");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), %url, "executor rejected request");
        Err(BlockError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

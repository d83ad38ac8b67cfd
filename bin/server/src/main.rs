use blockflow_server::app::{AppState, DynQueue, DynStore, router};
use blockflow_server::config::{ServerConfig, StoreBackend};
use blockflow_workflow::nats::{self, NatsKvStore, NatsWakeupQueue};
use blockflow_workflow::{
    Catalog, ChannelWakeupQueue, FsObjectStore, HttpBlockExecutor, MemoryObjectStore, Worker,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!(backend = ?config.store.backend, "Loaded configuration");

    let executor = Arc::new(HttpBlockExecutor::new(
        Catalog::builtin(),
        config.executor.clone(),
    ));

    match config.store.backend {
        StoreBackend::Nats => {
            tracing::info!(url = %config.nats.url, "Connecting to NATS...");
            let jetstream = nats::connect(&config.nats)
                .await
                .expect("failed to connect to NATS");
            let store = NatsKvStore::new(&jetstream, &config.nats)
                .await
                .expect("failed to open document bucket");
            let queue = NatsWakeupQueue::new(jetstream, config.nats.clone())
                .await
                .expect("failed to open wake-up stream");

            let state = AppState::new(
                Arc::new(store),
                executor,
                Arc::new(queue.clone()),
                config.engine.clone(),
                Catalog::builtin(),
            );
            if config.worker.enabled {
                let worker = Worker::new(state.driver.clone());
                let worker_config = config.worker.clone();
                tokio::spawn(async move {
                    if let Err(e) = queue.consume(worker, &worker_config).await {
                        tracing::error!(error = %e, "Wake-up consumer stopped");
                    }
                });
            }
            serve(&config, state).await;
        }
        StoreBackend::Fs | StoreBackend::Memory => {
            let store: DynStore = match config.store.backend {
                StoreBackend::Fs => {
                    tracing::info!(root = %config.store.root.display(), "Using filesystem store");
                    Arc::new(FsObjectStore::new(config.store.root.clone()))
                }
                _ => Arc::new(MemoryObjectStore::new()),
            };
            let (queue, wakeups) = ChannelWakeupQueue::channel();
            let queue: DynQueue = Arc::new(queue);

            let state = AppState::new(
                store,
                executor,
                queue,
                config.engine.clone(),
                Catalog::builtin(),
            );
            if config.worker.enabled {
                let worker = Worker::new(state.driver.clone());
                tokio::spawn(worker.run_channel(wakeups, config.worker.clone()));
            } else {
                tracing::warn!("Worker disabled; runs will not advance in this process");
            }
            serve(&config, state).await;
        }
    }
}

async fn serve(config: &ServerConfig, state: AppState) {
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", config.listen_addr);

    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

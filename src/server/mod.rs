//! Process wiring: storage, embedding provider, dispatcher, search service and
//! the two HTTP listeners.

pub mod error;
pub mod middleware;
pub mod routes;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::ingest::Dispatcher;
use crate::search::SearchService;
use crate::store::sqlite::SqliteBackend;
use crate::store::{self, VectorBackend, VectorStoreGateway};

/// Shared state behind both routers.
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub search: SearchService,
    pub gateway: Arc<VectorStoreGateway>,
}

impl AppState {
    /// Wire the pipeline from already-built collaborators. Must run inside a
    /// Tokio runtime: the worker pool is spawned here.
    pub fn new(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        backend: Arc<dyn VectorBackend>,
    ) -> Self {
        let gateway =
            Arc::new(VectorStoreGateway::new(backend).with_metrics(&config.storage.metrics));
        let dispatcher = Dispatcher::start(config, Arc::clone(&embedder), Arc::clone(&gateway));
        let search = SearchService::new(
            embedder,
            Arc::clone(&gateway),
            Duration::from_secs(config.embedding.timeout_secs),
            &config.search,
        );
        Self {
            dispatcher,
            search,
            gateway,
        }
    }
}

/// Open the configured backend. The SQLite store also records which
/// embedding model writes to it and warns when that changes.
pub async fn open_backend(config: &Config, model_id: &str) -> Result<Arc<dyn VectorBackend>> {
    if config.storage.backend != "sqlite" {
        return store::create_backend(&config.storage);
    }

    let db_path = config.resolved_db_path();
    let conn = crate::db::open_database(&db_path)?;
    tracing::info!(db = %db_path.display(), "database ready");

    let backend = SqliteBackend::new(conn);
    if let Some(stored) = backend
        .record_embedding_model(model_id)
        .await
        .context("failed to read embedding model")?
    {
        tracing::warn!(
            stored = %stored,
            configured = %model_id,
            "embedding model changed, stored vectors are not comparable with new ones"
        );
    }
    Ok(Arc::new(backend))
}

/// Run both listeners until SIGTERM or Ctrl+C, then drain the ingest queue.
pub async fn serve(config: Config) -> Result<()> {
    let embedder = embedding::create_provider(&config.embedding)?;
    tracing::info!(
        provider = %config.embedding.provider,
        model = embedder.model_id(),
        dimensions = embedder.dimensions(),
        "embedding provider ready"
    );
    let backend = open_backend(&config, embedder.model_id()).await?;
    let state = Arc::new(AppState::new(&config, embedder, backend));

    let ingest_app = routes::ingest_router(Arc::clone(&state), config.server.max_body_bytes);
    let api_app = routes::api_router(Arc::clone(&state));

    let ingest_listener = tokio::net::TcpListener::bind(&config.server.ingest_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.ingest_addr))?;
    let api_listener = tokio::net::TcpListener::bind(&config.server.api_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.api_addr))?;
    tracing::info!(
        ingest = %config.server.ingest_addr,
        api = %config.server.api_addr,
        backend = %config.storage.backend,
        "otel-recall listening"
    );

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let wait_for_stop = |mut rx: tokio::sync::watch::Receiver<bool>| async move {
        let _ = rx.wait_for(|stop| *stop).await;
    };

    let ingest_server = axum::serve(ingest_listener, ingest_app)
        .with_graceful_shutdown(wait_for_stop(stop_rx.clone()));
    let api_server =
        axum::serve(api_listener, api_app).with_graceful_shutdown(wait_for_stop(stop_rx));

    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown requested");
        let _ = stop_tx.send(true);
    });

    let (ingest_result, api_result) =
        tokio::join!(async { ingest_server.await }, async { api_server.await });
    ingest_result.context("ingest listener failed")?;
    api_result.context("api listener failed")?;

    state.dispatcher.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

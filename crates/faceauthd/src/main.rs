use anyhow::{Context, Result};
use faceauth_core::OnnxFaceEncoder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod error;
mod http;
mod staging;
mod store;

use config::{Config, StoreBackend};
use store::{FaceStore, MemoryFaceStore, SqliteFaceStore};

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Ok(path) = dotenv {
        tracing::debug!(path = %path.display(), "loaded .env");
    }

    let config = Config::from_env();
    tracing::info!(
        addr = %config.socket_addr(),
        store = ?config.store,
        tolerance = config.tolerance,
        policy = %config.match_policy,
        "faceauthd starting"
    );

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .with_context(|| format!("creating upload dir {}", config.upload_dir.display()))?;

    let store: Arc<dyn FaceStore> = match config.store {
        StoreBackend::Sqlite => Arc::new(
            SqliteFaceStore::open(&config.db_path)
                .await
                .with_context(|| format!("opening face store {}", config.db_path.display()))?,
        ),
        StoreBackend::Memory => {
            tracing::warn!("using in-memory face store; registrations are lost on exit");
            Arc::new(MemoryFaceStore::new())
        }
    };

    let encoder = OnnxFaceEncoder::load(&config.model_dir)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))?;
    let engine = engine::spawn_engine(Box::new(encoder), config.engine_queue)
        .context("spawning engine thread")?;

    let state = Arc::new(http::AppState {
        store: store.clone(),
        engine,
        matcher: config.match_policy.matcher(),
        tolerance: config.tolerance,
        upload_dir: config.upload_dir.clone(),
        max_upload_bytes: config.max_upload_bytes,
    });

    let listener = tokio::net::TcpListener::bind(config.socket_addr())
        .await
        .with_context(|| format!("binding {}", config.socket_addr()))?;
    tracing::info!(addr = %config.socket_addr(), "faceauthd ready");

    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("faceauthd shutting down");
    store.close().await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}

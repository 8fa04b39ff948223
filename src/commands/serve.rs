//! Server bootstrap and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::background::BackgroundTasks;
use crate::config::Config;
use crate::jobs::JobOrchestrator;
use crate::llm::{ChatClient, ImageClient, ImageGenerator};
use crate::persist::PersistClient;
use crate::server::{AppState, build_app};
use crate::worker::WorkerPool;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let api_key = config.upstream.api_key();
    if api_key.is_none() {
        warn!(env = %config.upstream.api_key_env, "upstream API key not set");
    }

    let generation_timeout = Duration::from_secs(config.upstream.generation_timeout_seconds);
    let http = reqwest::Client::new();
    let chat = ChatClient::new(
        http.clone(),
        config.upstream.base_url.clone(),
        api_key.clone(),
    );
    let images: Arc<dyn ImageGenerator> = Arc::new(ImageClient::new(
        http,
        config.upstream.base_url.clone(),
        api_key,
        generation_timeout,
    ));

    let persist = PersistClient::new(
        config.persist.base_url.clone(),
        Duration::from_secs(config.persist.metadata_timeout_seconds),
        config.persist.api_key.clone(),
    )
    .context("building persistence client")?;

    let workers = if config.worker.workers > 0 {
        Some(WorkerPool::start(
            &config.worker,
            generation_timeout,
            JobOrchestrator::new(persist.clone()),
            Arc::clone(&images),
        ))
    } else {
        warn!("worker pool disabled, deferred generation unavailable");
        None
    };

    let background = BackgroundTasks::new();
    let state = AppState {
        persist,
        chat,
        images,
        workers: workers.clone(),
        background: background.clone(),
        chat_model: config.upstream.chat_model.clone(),
        image_model: config.upstream.image_model.clone(),
        generation_timeout,
        idle_timeout: Duration::from_secs(config.server.idle_timeout_seconds),
        keep_alive_interval: Duration::from_secs(config.server.keep_alive_interval_seconds),
    };
    let app = build_app(
        state,
        Duration::from_secs(config.server.request_timeout_seconds),
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(workers) = workers {
        workers.shutdown().await;
    }
    background.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}

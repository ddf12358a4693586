// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! API server
//!
//! Thin HTTP layer over [`JobDispatcher`]. Handlers only translate between
//! JSON and dispatcher calls.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check
//! - `POST /download` - Start a download job
//! - `GET /progress/:download_id` - Latest snapshot of a job
//! - `POST /cleanup` - Forget all tracked jobs
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vidpull::engine::YtDlpEngine;
//! use vidpull::jobs::{JobDispatcher, JobSettings};
//! use vidpull::server::Server;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let dispatcher = JobDispatcher::new(Arc::new(YtDlpEngine::default()), JobSettings::default());
//! let server = Server::new(5000, dispatcher);
//! server.start().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::{DEFAULT_BIND_ADDRESS, DEFAULT_PORT};
use crate::errors::ApiError;
use crate::jobs::{DispatchRequest, JobDispatcher, ProgressSnapshot, ProgressStore};

/// Maximum request body size (1 MiB). Cookie text is the largest thing a
/// client legitimately sends.
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// API server configuration.
#[derive(Clone)]
pub struct Server {
    port: u16,
    /// Address to bind to (defaults to 127.0.0.1).
    bind_address: String,
    dispatcher: JobDispatcher,
    /// Evict snapshots idle for longer than this.
    snapshot_ttl: Option<Duration>,
}

impl Server {
    /// Create a new server on `port`, bound to localhost.
    pub fn new(port: u16, dispatcher: JobDispatcher) -> Self {
        Self {
            port,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            dispatcher,
            snapshot_ttl: None,
        }
    }

    /// Server on the default port.
    pub fn with_dispatcher(dispatcher: JobDispatcher) -> Self {
        Self::new(DEFAULT_PORT, dispatcher)
    }

    /// Set the bind address.
    /// Use "0.0.0.0" to allow network access, "127.0.0.1" (default) for localhost only.
    pub fn with_bind_address(mut self, addr: impl Into<String>) -> Self {
        self.bind_address = addr.into();
        self
    }

    pub fn with_snapshot_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.snapshot_ttl = ttl;
        self
    }

    /// Build the router with all routes.
    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/download", post(download_handler))
            .route("/progress/:download_id", get(progress_handler))
            .route("/cleanup", post(cleanup_handler))
            .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
            .with_state(self.dispatcher.clone())
    }

    /// Start the server with graceful shutdown.
    pub async fn start(&self) -> Result<()> {
        let router = self.build_router();
        let addr = format!("{}:{}", self.bind_address, self.port);

        tracing::info!(engine = self.dispatcher.engine_name(), "Starting server on {}", addr);

        if self.bind_address == "0.0.0.0" {
            tracing::warn!(
                "Server is binding to 0.0.0.0 which exposes the API to the network. \
                Use 127.0.0.1 (default) for local-only access."
            );
        }

        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                anyhow::anyhow!(
                    "Port {} is already in use. \
                    Stop the other instance or pick another port with: vidpull serve --port <PORT>",
                    self.port
                )
            } else {
                anyhow::anyhow!("Failed to bind to {}: {}", addr, e)
            }
        })?;

        let sweeper = self
            .snapshot_ttl
            .map(|ttl| spawn_sweeper(self.dispatcher.store().clone(), ttl));

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }
}

/// Periodically drop finished and failed snapshots not updated within `ttl`.
///
/// Runs every `ttl / 4`, clamped to between one second and one minute.
pub fn spawn_sweeper(store: ProgressStore, ttl: Duration) -> JoinHandle<()> {
    let period = (ttl / 4).clamp(Duration::from_secs(1), Duration::from_secs(60));
    tracing::info!(ttl_secs = ttl.as_secs(), "Snapshot eviction enabled");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let evicted = store.evict_older_than(ttl);
            if evicted > 0 {
                tracing::info!(evicted, "Evicted stale snapshots");
            }
        }
    })
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    engine: String,
    jobs: usize,
}

#[derive(Serialize)]
struct DownloadResponse {
    success: bool,
    download_id: String,
    message: &'static str,
}

#[derive(Serialize)]
struct CleanupResponse {
    success: bool,
    message: &'static str,
    cleared: usize,
}

// =============================================================================
// Handlers
// =============================================================================

async fn health_handler(State(dispatcher): State<JobDispatcher>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        engine: dispatcher.engine_name().to_string(),
        jobs: dispatcher.store().len(),
    })
}

/// Start a job. Returns as soon as the job is registered.
async fn download_handler(
    State(dispatcher): State<JobDispatcher>,
    payload: Result<Json<DispatchRequest>, JsonRejection>,
) -> Result<Json<DownloadResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::invalid_request(e.body_text()))?;
    let handle = dispatcher.dispatch(request)?;

    Ok(Json(DownloadResponse {
        success: true,
        download_id: handle.id().to_string(),
        message: "Download started successfully",
    }))
}

/// Always 200; unknown ids yield the `not_found` snapshot.
async fn progress_handler(
    State(dispatcher): State<JobDispatcher>,
    Path(download_id): Path<String>,
) -> Json<ProgressSnapshot> {
    Json(dispatcher.progress(&download_id))
}

async fn cleanup_handler(State(dispatcher): State<JobDispatcher>) -> Json<CleanupResponse> {
    let cleared = dispatcher.clear();
    Json(CleanupResponse {
        success: true,
        message: "Progress tracking cleared",
        cleared,
    })
}

/// Graceful shutdown signal handler.
///
/// Waits for SIGINT/SIGTERM. Jobs still running are abandoned with the process.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!("Failed to install signal handlers: {}", e);
                std::future::pending::<()>().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
    }

    tracing::info!("Shutting down server");
}

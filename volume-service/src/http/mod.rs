// SPDX-License-Identifier: GPL-3.0-only

//! HTTP surface speaking the Docker volume plugin protocol

mod error;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::Router;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use crate::engine::Engine;

#[derive(Clone)]
pub struct AppState {
    engine: Arc<Engine>,
    default_size: String,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, default_size: impl Into<String>) -> Self {
        Self {
            engine,
            default_size: default_size.into(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::index))
        .route("/Plugin.Activate", post(routes::activate))
        .route("/VolumeDriver.Create", post(routes::create))
        .route("/VolumeDriver.Remove", post(routes::remove))
        .route("/VolumeDriver.Mount", post(routes::mount))
        .route("/VolumeDriver.Unmount", post(routes::unmount))
        .route("/VolumeDriver.Path", post(routes::path))
        .route("/VolumeDriver.Get", post(routes::get))
        .route("/VolumeDriver.List", post(routes::list))
        .route("/VolumeDriver.Capabilities", post(routes::capabilities))
        .route(
            "/physical-volume-size",
            get(routes::device_size).post(routes::device_size),
        )
        .layer(middleware::from_fn_with_state(state.clone(), ensure_group))
        .with_state(state)
}

/// Every request first makes sure the volume group is there and active.
async fn ensure_group(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let engine = state.engine.clone();
    if let Err(err) = routes::detached(async move { engine.ensure_volume_group().await }).await {
        warn!("{method} {path}: volume group check failed");
        return err.into_response();
    }

    let response = next.run(request).await;
    info!(
        "{method} {path} -> {} in {:?}",
        response.status(),
        started.elapsed()
    );
    response
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Plugin listening on {addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Plugin shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }
}

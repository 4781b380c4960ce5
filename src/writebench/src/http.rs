// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The Prometheus scrape endpoint.

use std::net::SocketAddr;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing;
use axum::Router;
use prometheus::{Encoder, TextEncoder};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{info, warn};
use wb_ore::metrics::MetricsRegistry;
use wb_ore::task;

use crate::error::SetupError;

/// Builds the router serving `/metrics` and `/api/livez`.
pub fn router(registry: MetricsRegistry) -> Router {
    Router::new()
        .route("/api/livez", routing::get(handle_liveness_check))
        .route(
            "/metrics",
            routing::get(move || async move { handle_prometheus(&registry) }),
        )
}

/// Renders every metric in `registry` in the Prometheus text format.
pub fn handle_prometheus(registry: &MetricsRegistry) -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    match encoder.encode(&registry.gather(), &mut buffer) {
        Ok(()) => (
            [(header::CONTENT_TYPE, encoder.format_type().to_owned())],
            buffer,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_liveness_check() -> impl IntoResponse {
    (StatusCode::OK, "Liveness check successful!")
}

/// A running scrape endpoint. Dropping it stops the server without waiting.
#[derive(Debug)]
pub struct MetricsServer {
    local_addr: SocketAddr,
    guard: DropGuard,
    handle: JoinHandle<()>,
}

impl MetricsServer {
    /// Binds `addr` and starts serving `registry` on it. Port 0 picks a free
    /// port; see [MetricsServer::local_addr].
    pub async fn bind(registry: MetricsRegistry, addr: SocketAddr) -> Result<Self, SetupError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| SetupError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| SetupError::Bind { addr, source })?;
        info!("serving metrics on http://{}/metrics", local_addr);

        let shutdown = CancellationToken::new();
        let handle = task::spawn(|| "metrics_http_server", {
            let shutdown = shutdown.clone();
            async move {
                let server = axum::serve(listener, router(registry))
                    .with_graceful_shutdown(async move { shutdown.cancelled().await });
                if let Err(e) = server.await {
                    warn!("metrics server exited: {}", e);
                }
            }
        });
        Ok(MetricsServer {
            local_addr,
            guard: shutdown.drop_guard(),
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting scrapes and waits for in-flight ones to finish.
    pub async fn shutdown(self) {
        drop(self.guard);
        if let Err(e) = self.handle.await {
            warn!("metrics server task failed: {}", e);
        }
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection registrar: the inbound endpoint where started schedulers and
//! workers phone home.
//!
//! Authentication is the cluster's api token as `Authorization: token <..>`,
//! compared in constant time. Unknown cluster names, missing tokens, and
//! mismatched tokens all answer 401 without leaking existence. Confirmations
//! that lose the race against a connect deadline are acknowledged and
//! ignored.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::put;
use axum::{Json, Router};
use gridway_core::Addresses;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::LifecycleEngine;

pub fn router(engine: Arc<LifecycleEngine>) -> Router {
    Router::new()
        .route(
            "/clusters/{name}/addresses",
            put(put_addresses).get(get_addresses),
        )
        .route(
            "/clusters/{name}/workers/{worker}",
            put(put_worker).delete(delete_worker),
        )
        .with_state(engine)
}

/// Serve the registrar until `shutdown` fires.
pub async fn serve(
    engine: Arc<LifecycleEngine>,
    listener: tokio::net::TcpListener,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "registrar listening");
    }
    axum::serve(listener, router(engine))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")?
        .to_str()
        .ok()?
        .strip_prefix("token ")
}

fn authorized(engine: &LifecycleEngine, headers: &HeaderMap, cluster: &str) -> bool {
    match bearer_token(headers) {
        Some(token) => engine.authenticate(cluster, token),
        None => false,
    }
}

async fn put_addresses(
    State(engine): State<Arc<LifecycleEngine>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(addresses): Json<Addresses>,
) -> StatusCode {
    if !authorized(&engine, &headers, &name) {
        return StatusCode::UNAUTHORIZED;
    }
    if engine.mark_cluster_connected(&name, addresses) {
        info!(cluster = %name, "cluster connected");
    } else {
        debug!(cluster = %name, "ignoring late cluster confirmation");
    }
    StatusCode::OK
}

async fn get_addresses(
    State(engine): State<Arc<LifecycleEngine>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Addresses>, StatusCode> {
    if !authorized(&engine, &headers, &name) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    engine
        .cluster_addresses(&name)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn put_worker(
    State(engine): State<Arc<LifecycleEngine>>,
    Path((name, worker)): Path<(String, String)>,
    headers: HeaderMap,
) -> StatusCode {
    if !authorized(&engine, &headers, &name) {
        return StatusCode::UNAUTHORIZED;
    }
    if engine.mark_worker_connected(&name, &worker) {
        info!(cluster = %name, worker = %worker, "worker connected");
    } else {
        debug!(cluster = %name, worker = %worker, "ignoring late worker confirmation");
    }
    StatusCode::OK
}

async fn delete_worker(
    State(engine): State<Arc<LifecycleEngine>>,
    Path((name, worker)): Path<(String, String)>,
    headers: HeaderMap,
) -> StatusCode {
    if !authorized(&engine, &headers, &name) {
        return StatusCode::UNAUTHORIZED;
    }
    if engine.mark_worker_gone(&name, &worker) {
        info!(cluster = %name, worker = %worker, "worker deregistered");
    }
    StatusCode::OK
}

#[cfg(test)]
#[path = "registrar_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use gridway_core::{Addresses, ClusterStatus, WorkerStatus};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;

use super::serve;
use crate::engine::LifecycleEngine;
use crate::test_support::*;

struct Registrar {
    engine: Arc<LifecycleEngine>,
    base: String,
    shutdown: CancellationToken,
    client: reqwest::Client,
}

async fn registrar() -> Registrar {
    let h = harness(ScriptedBackend::new(instant_stage(), timeouts(5.0, 5.0))).await;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let shutdown = CancellationToken::new();
    tokio::spawn(serve(h.engine.clone(), listener, shutdown.clone()));
    Registrar {
        engine: h.engine.clone(),
        base,
        shutdown,
        client: reqwest::Client::new(),
    }
}

impl Registrar {
    async fn new_cluster(&self) -> (String, String) {
        let name = self.engine.create_cluster("alice").await.unwrap();
        let token = self.engine.cluster_record(&name).unwrap().api_token;
        (name, token)
    }

    fn addresses_url(&self, name: &str) -> String {
        format!("{}/clusters/{name}/addresses", self.base)
    }

    fn worker_url(&self, name: &str, worker: &str) -> String {
        format!("{}/clusters/{name}/workers/{worker}", self.base)
    }
}

impl Drop for Registrar {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[tokio::test]
async fn put_addresses_confirms_the_cluster() {
    let r = registrar().await;
    let (name, token) = r.new_cluster().await;

    let status = r
        .client
        .put(r.addresses_url(&name))
        .header("Authorization", format!("token {token}"))
        .json(&addresses())
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, StatusCode::OK);

    let connected = r.engine.wait_for_cluster(&name).await.unwrap();
    assert_eq!(connected, addresses());
    assert_eq!(r.engine.cluster_status(&name), Some(ClusterStatus::Running));

    let fetched: Addresses = r
        .client
        .get(r.addresses_url(&name))
        .header("Authorization", format!("token {token}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched, addresses());

    r.engine.stop_cluster(&name).await.unwrap();
}

#[tokio::test]
async fn bad_credentials_are_indistinguishable() {
    let r = registrar().await;
    let (name, token) = r.new_cluster().await;

    // Wrong token, missing header, and unknown cluster all read the same.
    let wrong = r
        .client
        .put(r.addresses_url(&name))
        .header("Authorization", "token not-the-token")
        .json(&addresses())
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(wrong, StatusCode::UNAUTHORIZED);

    let missing = r
        .client
        .put(r.addresses_url(&name))
        .json(&addresses())
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(missing, StatusCode::UNAUTHORIZED);

    let unknown = r
        .client
        .put(r.addresses_url("no-such-cluster"))
        .header("Authorization", format!("token {token}"))
        .json(&addresses())
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(unknown, StatusCode::UNAUTHORIZED);

    // Nothing got marked connected.
    assert_eq!(r.engine.cluster_addresses(&name), None);
    r.engine.stop_cluster(&name).await.unwrap();
}

#[tokio::test]
async fn malformed_authorization_scheme_is_rejected() {
    let r = registrar().await;
    let (name, token) = r.new_cluster().await;

    let status = r
        .client
        .put(r.addresses_url(&name))
        .header("Authorization", format!("Bearer {token}"))
        .json(&addresses())
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    r.engine.stop_cluster(&name).await.unwrap();
}

#[tokio::test]
async fn worker_put_and_delete_round_trip() {
    let r = registrar().await;
    let (name, token) = r.new_cluster().await;
    r.engine.mark_cluster_connected(&name, addresses());
    r.engine.wait_for_cluster(&name).await.unwrap();

    let worker = r.engine.add_worker(&name).await.unwrap();

    let status = r
        .client
        .put(r.worker_url(&name, &worker))
        .header("Authorization", format!("token {token}"))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, StatusCode::OK);
    r.engine.wait_for_worker(&name, &worker).await.unwrap();

    let status = r
        .client
        .delete(r.worker_url(&name, &worker))
        .header("Authorization", format!("token {token}"))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, StatusCode::OK);

    for _ in 0..500 {
        if r.engine.worker_status(&name, &worker) == Some(WorkerStatus::Stopped) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(
        r.engine.worker_status(&name, &worker),
        Some(WorkerStatus::Stopped)
    );

    r.engine.stop_cluster(&name).await.unwrap();
}

#[tokio::test]
async fn late_confirmation_is_acknowledged_but_ignored() {
    let h = harness(ScriptedBackend::new(instant_stage(), timeouts(5.0, 0.1))).await;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let shutdown = CancellationToken::new();
    tokio::spawn(serve(h.engine.clone(), listener, shutdown.clone()));

    let name = h.engine.create_cluster("alice").await.unwrap();
    let token = h.engine.cluster_record(&name).unwrap().api_token;
    // Let the connect deadline fire first and cleanup finish.
    h.engine.wait_for_cluster(&name).await.unwrap_err();
    for _ in 0..500 {
        if h
            .engine
            .cluster_status(&name)
            .is_some_and(|s| s.is_terminal())
        {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let status = reqwest::Client::new()
        .put(format!("{base}/clusters/{name}/addresses"))
        .header("Authorization", format!("token {token}"))
        .json(&addresses())
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.engine.cluster_addresses(&name), None);
    shutdown.cancel();
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end gateway tests over the in-process backend: the full staged
//! start, phone-home through the real registrar, scaling, and shutdown.

use std::time::Duration;

use gridway_core::{ClusterStatus, WorkerStatus};
use gridway_gateway::{Gateway, GatewayConfig};

fn test_config() -> GatewayConfig {
    GatewayConfig {
        // Ephemeral port; the gateway reports the bound address.
        private_url: "http://127.0.0.1:0".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn successful_cluster_lifecycle() {
    let gateway = Gateway::start(test_config()).await.unwrap();

    let name = gateway.engine.create_cluster("alice").await.unwrap();
    let addresses = gateway.engine.wait_for_cluster(&name).await.unwrap();
    assert!(addresses.scheduler_address.contains(&name));
    assert_eq!(
        gateway.engine.cluster_status(&name),
        Some(ClusterStatus::Running)
    );

    // Scale up two workers; both phone home through the registrar.
    let w1 = gateway.engine.add_worker(&name).await.unwrap();
    let w2 = gateway.engine.add_worker(&name).await.unwrap();
    gateway.engine.wait_for_worker(&name, &w1).await.unwrap();
    gateway.engine.wait_for_worker(&name, &w2).await.unwrap();

    // Scale back down.
    gateway.engine.remove_worker(&name, &w2).await.unwrap();
    assert_eq!(
        gateway.engine.worker_status(&name, &w2),
        Some(WorkerStatus::Stopped)
    );

    gateway.engine.stop_cluster(&name).await.unwrap();
    assert_eq!(
        gateway.engine.cluster_status(&name),
        Some(ClusterStatus::Stopped)
    );

    gateway.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_active_clusters() {
    let gateway = Gateway::start(test_config()).await.unwrap();

    let name = gateway.engine.create_cluster("alice").await.unwrap();
    gateway.engine.wait_for_cluster(&name).await.unwrap();

    gateway.shutdown().await;
    assert_eq!(
        gateway.engine.cluster_status(&name),
        Some(ClusterStatus::Stopped)
    );
}

#[tokio::test]
async fn startup_rejects_contradictory_configuration() {
    let config = GatewayConfig {
        stop_clusters_on_shutdown: false,
        db_url: "sqlite://:memory:".to_string(),
        ..test_config()
    };
    assert!(Gateway::start(config).await.is_err());
}

#[tokio::test]
async fn startup_fails_on_unbindable_address() {
    // Bind a listener, then ask the gateway for the same port.
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = GatewayConfig {
        private_url: format!("http://{}", taken.local_addr().unwrap()),
        ..test_config()
    };
    assert!(Gateway::start(config).await.is_err());
}

#[tokio::test]
async fn stop_during_startup_cancels_cleanly() {
    let gateway = Gateway::start(test_config()).await.unwrap();

    let name = gateway.engine.create_cluster("alice").await.unwrap();
    // Cancel immediately; depending on timing this lands mid-start or just
    // after the handshake, and both paths must settle terminally.
    gateway.engine.stop_cluster(&name).await.unwrap();
    let status = gateway.engine.cluster_status(&name).unwrap();
    assert!(status.is_terminal(), "got {status}");

    tokio::time::sleep(Duration::from_millis(50)).await;
    gateway.shutdown().await;
}

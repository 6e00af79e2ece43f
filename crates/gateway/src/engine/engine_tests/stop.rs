// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User stops, shutdown behavior, and the connect tie-break.

use std::time::Duration;

use gridway_core::ClusterStatus;
use serde_json::json;

use super::wait_cluster_terminal;
use crate::test_support::*;

/// Position along the one-way street of the state machine; the watch
/// channel may coalesce rapid transitions but can never move backward.
fn rank(status: ClusterStatus) -> u8 {
    match status {
        ClusterStatus::Starting => 0,
        ClusterStatus::Started => 1,
        ClusterStatus::Running => 2,
        ClusterStatus::Stopping => 3,
        ClusterStatus::Stopped | ClusterStatus::Failed => 4,
    }
}

#[tokio::test]
async fn connected_cluster_runs_then_stops_cleanly() {
    let backend = ScriptedBackend::new(instant_stage(), timeouts(5.0, 5.0));
    let h = harness(backend).await;

    let name = h.engine.create_cluster("alice").await.unwrap();
    let mut status_rx = h.engine.status_watch(&name).unwrap();
    let recorder = tokio::spawn(async move {
        let mut transitions = vec![*status_rx.borrow_and_update()];
        while status_rx.changed().await.is_ok() {
            transitions.push(*status_rx.borrow_and_update());
        }
        transitions
    });

    // Confirm the handshake once the stage has been submitted.
    assert!(h.engine.mark_cluster_connected(&name, addresses()));
    let connected = h.engine.wait_for_cluster(&name).await.unwrap();
    assert_eq!(connected, addresses());
    assert_eq!(h.engine.cluster_status(&name), Some(ClusterStatus::Running));
    assert_eq!(h.engine.cluster_addresses(&name), Some(addresses()));

    h.engine.stop_cluster(&name).await.unwrap();
    assert_eq!(h.engine.cluster_status(&name), Some(ClusterStatus::Stopped));
    assert_eq!(
        h.recorded.stop_cluster_state.lock().clone(),
        Some(state_of(&[("ok", json!(1))]))
    );

    // Transitions only ever move toward terminal, never backward.
    let transitions = recorder.await.unwrap();
    for pair in transitions.windows(2) {
        assert!(
            rank(pair[0]) <= rank(pair[1]),
            "observed backward transition {} -> {}",
            pair[0],
            pair[1]
        );
    }
    assert_eq!(transitions.last(), Some(&ClusterStatus::Stopped));
}

#[tokio::test]
async fn stopping_twice_is_idempotent() {
    let backend = ScriptedBackend::new(instant_stage(), timeouts(5.0, 5.0));
    let h = harness(backend).await;

    let name = h.engine.create_cluster("alice").await.unwrap();
    h.engine.mark_cluster_connected(&name, addresses());
    h.engine.wait_for_cluster(&name).await.unwrap();

    h.engine.stop_cluster(&name).await.unwrap();
    h.engine.stop_cluster(&name).await.unwrap();
    assert_eq!(*h.recorded.stop_cluster_calls.lock(), 1);
}

#[tokio::test]
async fn shutdown_stops_every_live_cluster() {
    let backend = ScriptedBackend::new(instant_stage(), timeouts(5.0, 5.0));
    let h = harness(backend).await;

    let first = h.engine.create_cluster("alice").await.unwrap();
    let second = h.engine.create_cluster("bob").await.unwrap();
    for name in [&first, &second] {
        h.engine.mark_cluster_connected(name, addresses());
        h.engine.wait_for_cluster(name).await.unwrap();
    }

    h.engine.shutdown().await;
    assert_eq!(h.engine.cluster_status(&first), Some(ClusterStatus::Stopped));
    assert_eq!(h.engine.cluster_status(&second), Some(ClusterStatus::Stopped));

    h.pool.close().await;
    assert_eq!(h.pool.live_tasks(), 0);
}

#[tokio::test]
async fn confirmation_after_connect_timeout_is_ignored() {
    let backend = ScriptedBackend::new(instant_stage(), timeouts(5.0, 0.1));
    let h = harness(backend).await;

    let name = h.engine.create_cluster("alice").await.unwrap();
    let err = h.engine.wait_for_cluster(&name).await.unwrap_err();
    assert!(err.to_string().contains(&name));
    assert_eq!(wait_cluster_terminal(&h.engine, &name).await, ClusterStatus::Failed);

    assert!(!h.engine.mark_cluster_connected(&name, addresses()));
    assert_eq!(h.engine.cluster_addresses(&name), None);
    assert_eq!(h.engine.cluster_status(&name), Some(ClusterStatus::Failed));
}

#[tokio::test]
async fn stopping_an_unknown_cluster_is_an_error() {
    let backend = ScriptedBackend::new(instant_stage(), timeouts(5.0, 5.0));
    let h = harness(backend).await;
    assert!(h.engine.stop_cluster("ghost").await.is_err());
}

#[tokio::test]
async fn auth_accepts_only_the_cluster_token() {
    let backend = ScriptedBackend::new(instant_stage(), timeouts(5.0, 5.0));
    let h = harness(backend).await;

    let name = h.engine.create_cluster("alice").await.unwrap();
    let token = h.engine.cluster_record(&name).unwrap().api_token;

    assert!(h.engine.authenticate(&name, &token));
    assert!(!h.engine.authenticate(&name, "wrong"));
    assert!(!h.engine.authenticate("ghost", &token));

    h.engine.stop_cluster(&name).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
}

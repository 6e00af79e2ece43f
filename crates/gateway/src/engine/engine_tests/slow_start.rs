// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A start that outlives its deadline stops with the last persisted
//! snapshot.

use std::time::Duration;

use gridway_core::ClusterStatus;
use serde_json::json;

use super::wait_cluster_terminal;
use crate::test_support::*;

async fn check_slow_start(start_timeout: f64, expected: &[(&str, serde_json::Value)]) {
    let backend = ScriptedBackend::new(
        slow_stages(Duration::from_millis(200)),
        timeouts(start_timeout, 5.0),
    );
    let h = harness(backend).await;

    let name = h.engine.create_cluster("alice").await.unwrap();
    let err = h.engine.wait_for_cluster(&name).await.unwrap_err();
    assert!(err.to_string().contains(&name), "{err}");

    assert_eq!(wait_cluster_terminal(&h.engine, &name).await, ClusterStatus::Failed);
    assert_eq!(
        h.recorded.stop_cluster_state.lock().clone(),
        Some(state_of(expected)),
        "stop must receive the last snapshot persisted before the deadline"
    );
}

#[tokio::test]
async fn timeout_during_first_pause_stops_with_first_snapshot() {
    check_slow_start(0.1, &[("state_1", json!(1))]).await;
}

#[tokio::test]
async fn timeout_during_second_pause_stops_with_second_snapshot() {
    check_slow_start(0.25, &[("state_2", json!(2))]).await;
}

#[tokio::test]
async fn connect_timeout_stops_with_the_full_final_state() {
    // All three stages complete instantly; the process never phones home.
    let backend = ScriptedBackend::new(slow_stages(Duration::ZERO), timeouts(5.0, 0.1));
    let h = harness(backend).await;

    let name = h.engine.create_cluster("alice").await.unwrap();
    let err = h.engine.wait_for_cluster(&name).await.unwrap_err();
    assert!(err.to_string().contains(&name));

    assert_eq!(wait_cluster_terminal(&h.engine, &name).await, ClusterStatus::Failed);
    assert_eq!(
        h.recorded.stop_cluster_state.lock().clone(),
        Some(state_of(&[("state_3", json!(3))]))
    );
}

#[tokio::test]
async fn persisted_record_matches_the_cleanup_state() {
    let backend = ScriptedBackend::new(
        slow_stages(Duration::from_millis(200)),
        timeouts(0.1, 5.0),
    );
    let h = harness(backend).await;

    let name = h.engine.create_cluster("alice").await.unwrap();
    let _ = h.engine.wait_for_cluster(&name).await;
    wait_cluster_terminal(&h.engine, &name).await;

    let stored = h.engine.store().get_cluster(&name).await.unwrap().unwrap();
    assert_eq!(stored.status, ClusterStatus::Failed);
    assert_eq!(Some(stored.state), h.recorded.stop_cluster_state.lock().clone());
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cancelling a mid-flight start never leaks the in-flight job: cleanup runs
//! with whatever state was last captured, and late confirmations lose.

use std::time::Duration;

use gridway_core::ClusterStatus;
use serde_json::json;

use super::wait_cluster_terminal;
use crate::test_support::*;

async fn check_cancel_after(elapsed: Duration, expected: &[(&str, serde_json::Value)]) {
    let backend = ScriptedBackend::new(
        paced_stages(Duration::from_millis(200)),
        timeouts(30.0, 30.0),
    );
    let h = harness(backend).await;

    let name = h.engine.create_cluster("alice").await.unwrap();
    tokio::time::sleep(elapsed).await;
    h.engine.stop_cluster(&name).await.unwrap();

    assert_eq!(
        h.engine.cluster_status(&name),
        Some(ClusterStatus::Stopped),
        "cancellation is a clean stop"
    );
    assert_eq!(
        h.recorded.stop_cluster_state.lock().clone(),
        Some(state_of(expected))
    );
    assert_eq!(*h.recorded.stop_cluster_calls.lock(), 1);

    // The durable record agrees with the cleanup call.
    let stored = h.engine.store().get_cluster(&name).await.unwrap().unwrap();
    assert_eq!(stored.status, ClusterStatus::Stopped);
    assert_eq!(stored.state, state_of(expected));

    // A confirmation racing in after cleanup began is ignored.
    assert!(!h.engine.mark_cluster_connected(&name, addresses()));
    assert_eq!(h.engine.cluster_addresses(&name), None);
}

#[tokio::test]
async fn cancel_before_any_snapshot_cleans_up_with_empty_state() {
    check_cancel_after(Duration::from_millis(100), &[]).await;
}

#[tokio::test]
async fn cancel_after_one_snapshot_cleans_up_with_it() {
    check_cancel_after(Duration::from_millis(300), &[("state_1", json!(1))]).await;
}

#[tokio::test]
async fn cancel_after_two_snapshots_cleans_up_with_the_second() {
    check_cancel_after(Duration::from_millis(500), &[("state_2", json!(2))]).await;
}

#[tokio::test]
async fn the_submitting_waiter_sees_the_cancellation() {
    let backend = ScriptedBackend::new(
        paced_stages(Duration::from_millis(200)),
        timeouts(30.0, 30.0),
    );
    let h = harness(backend).await;

    let name = h.engine.create_cluster("alice").await.unwrap();
    let engine = h.engine.clone();
    let waiter_name = name.clone();
    let waiter = tokio::spawn(async move { engine.wait_for_cluster(&waiter_name).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    h.engine.stop_cluster(&name).await.unwrap();

    let err = waiter.await.unwrap().unwrap_err();
    assert!(err.to_string().contains(&name));
    wait_cluster_terminal(&h.engine, &name).await;
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A backend that raises mid-start stops with exactly the snapshots that
//! made it out.

use gridway_core::ClusterStatus;
use serde_json::json;

use super::wait_cluster_terminal;
use crate::test_support::*;

async fn check_failing_start(fail_stage: usize, expected: &[(&str, serde_json::Value)]) {
    let backend = ScriptedBackend::new(failing_stages(fail_stage), timeouts(5.0, 5.0));
    let h = harness(backend).await;

    let name = h.engine.create_cluster("alice").await.unwrap();
    let err = h.engine.wait_for_cluster(&name).await.unwrap_err();
    assert!(err.to_string().contains(&name));
    assert!(err.to_string().contains("Oh No"), "{err}");

    assert_eq!(wait_cluster_terminal(&h.engine, &name).await, ClusterStatus::Failed);
    assert_eq!(
        h.recorded.stop_cluster_state.lock().clone(),
        Some(state_of(expected))
    );
}

#[tokio::test]
async fn failure_before_the_first_stage_stops_with_empty_state() {
    check_failing_start(0, &[]).await;
}

#[tokio::test]
async fn failure_after_one_stage_stops_with_that_stage() {
    check_failing_start(1, &[("i", json!(0))]).await;
}

#[tokio::test]
async fn failure_after_two_stages_stops_with_the_second() {
    check_failing_start(2, &[("i", json!(1))]).await;
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker lifecycle: slow and failing starts, the gone notice, and the
//! cluster-must-be-running precondition. A worker failure never takes its
//! cluster down.

use std::time::Duration;

use gridway_core::{ClusterStatus, WorkerStatus};
use serde_json::json;

use super::wait_worker_terminal;
use crate::engine::EngineError;
use crate::test_support::*;

/// Worker stages in the shape of a slow worker start: each snapshot is
/// followed by a pause.
fn slow_worker_stages(pause: Duration) -> Vec<Step> {
    vec![
        yield_state(&[("i", json!(0))]),
        Step::Sleep(pause),
        yield_state(&[("i", json!(1))]),
        Step::Sleep(pause),
        yield_state(&[("i", json!(2))]),
        Step::Sleep(pause),
    ]
}

fn failing_worker_stages(fail_stage: usize) -> Vec<Step> {
    let mut steps = Vec::new();
    for i in 0..3 {
        if i == fail_stage {
            steps.push(Step::Fail("Oh No"));
            break;
        }
        steps.push(yield_state(&[("i", json!(i))]));
    }
    steps
}

async fn running_cluster(h: &TestHarness) -> String {
    let name = h.engine.create_cluster("alice").await.unwrap();
    assert!(h.engine.mark_cluster_connected(&name, addresses()));
    h.engine.wait_for_cluster(&name).await.unwrap();
    name
}

async fn wait_stop_worker_recorded(h: &TestHarness) -> gridway_core::BackendState {
    for _ in 0..500 {
        if let Some(state) = h.recorded.stop_worker_state.lock().clone() {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("stop_worker was never called");
}

async fn check_slow_worker_start(start_timeout: f64, expected: &[(&str, serde_json::Value)]) {
    let backend = ScriptedBackend::new(instant_stage(), worker_timeouts(start_timeout, 5.0))
        .with_worker_script(slow_worker_stages(Duration::from_millis(200)));
    let h = harness(backend).await;

    let cluster = running_cluster(&h).await;
    let worker = h.engine.add_worker(&cluster).await.unwrap();

    assert_eq!(wait_stop_worker_recorded(&h).await, state_of(expected));
    assert_eq!(
        wait_worker_terminal(&h.engine, &cluster, &worker).await,
        WorkerStatus::Failed
    );
    // The cluster is untouched by its worker's failure.
    assert_eq!(h.engine.cluster_status(&cluster), Some(ClusterStatus::Running));
}

#[tokio::test]
async fn slow_worker_start_stops_with_first_snapshot() {
    check_slow_worker_start(0.1, &[("i", json!(0))]).await;
}

#[tokio::test]
async fn slow_worker_start_stops_with_second_snapshot() {
    check_slow_worker_start(0.25, &[("i", json!(1))]).await;
}

#[tokio::test]
async fn slow_worker_connect_stops_with_the_full_state() {
    let backend = ScriptedBackend::new(instant_stage(), worker_timeouts(5.0, 0.1))
        .with_worker_script(slow_worker_stages(Duration::ZERO));
    let h = harness(backend).await;

    let cluster = running_cluster(&h).await;
    let worker = h.engine.add_worker(&cluster).await.unwrap();

    assert_eq!(
        wait_stop_worker_recorded(&h).await,
        state_of(&[("i", json!(2))])
    );
    wait_worker_terminal(&h.engine, &cluster, &worker).await;
    assert_eq!(h.engine.cluster_status(&cluster), Some(ClusterStatus::Running));
}

#[tokio::test]
async fn failing_worker_start_stops_with_last_stage() {
    for (fail_stage, expected) in [(0usize, vec![]), (1, vec![("i", json!(0))])] {
        let backend = ScriptedBackend::new(instant_stage(), worker_timeouts(5.0, 5.0))
            .with_worker_script(failing_worker_stages(fail_stage));
        let h = harness(backend).await;

        let cluster = running_cluster(&h).await;
        let worker = h.engine.add_worker(&cluster).await.unwrap();

        assert_eq!(wait_stop_worker_recorded(&h).await, state_of(&expected));
        assert_eq!(
            wait_worker_terminal(&h.engine, &cluster, &worker).await,
            WorkerStatus::Failed
        );
        assert_eq!(h.engine.cluster_status(&cluster), Some(ClusterStatus::Running));
    }
}

#[tokio::test]
async fn connected_worker_runs_until_reported_gone() {
    let backend = ScriptedBackend::new(instant_stage(), worker_timeouts(5.0, 5.0));
    let h = harness(backend).await;

    let cluster = running_cluster(&h).await;
    let worker = h.engine.add_worker(&cluster).await.unwrap();

    assert!(h.engine.mark_worker_connected(&cluster, &worker));
    h.engine.wait_for_worker(&cluster, &worker).await.unwrap();
    // Give the supervisor a beat to observe the confirmation.
    for _ in 0..100 {
        if h.engine.worker_status(&cluster, &worker) == Some(WorkerStatus::Running) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        h.engine.worker_status(&cluster, &worker),
        Some(WorkerStatus::Running)
    );

    // Scale-down notice from the registrar.
    assert!(h.engine.mark_worker_gone(&cluster, &worker));
    assert_eq!(
        wait_worker_terminal(&h.engine, &cluster, &worker).await,
        WorkerStatus::Stopped
    );
    assert_eq!(h.engine.cluster_status(&cluster), Some(ClusterStatus::Running));
}

#[tokio::test]
async fn worker_submission_requires_a_running_cluster() {
    let backend = ScriptedBackend::new(
        paced_stages(Duration::from_millis(300)),
        worker_timeouts(5.0, 5.0),
    );
    let h = harness(backend).await;

    let cluster = h.engine.create_cluster("alice").await.unwrap();
    // Still STARTING: submission is refused.
    let err = h.engine.add_worker(&cluster).await.unwrap_err();
    assert!(matches!(err, EngineError::ClusterNotRunning(_)));

    h.engine.stop_cluster(&cluster).await.unwrap();
}

#[tokio::test]
async fn stopping_a_cluster_stops_its_workers_first() {
    let backend = ScriptedBackend::new(instant_stage(), worker_timeouts(5.0, 5.0));
    let h = harness(backend).await;

    let cluster = running_cluster(&h).await;
    let worker = h.engine.add_worker(&cluster).await.unwrap();
    h.engine.mark_worker_connected(&cluster, &worker);
    h.engine.wait_for_worker(&cluster, &worker).await.unwrap();

    h.engine.stop_cluster(&cluster).await.unwrap();
    assert_eq!(
        h.engine.worker_status(&cluster, &worker),
        Some(WorkerStatus::Stopped)
    );
    assert!(h.recorded.stop_worker_state.lock().is_some());
    assert_eq!(h.engine.cluster_status(&cluster), Some(ClusterStatus::Stopped));
}

#[tokio::test]
async fn remove_worker_is_a_clean_scale_down() {
    let backend = ScriptedBackend::new(instant_stage(), worker_timeouts(5.0, 5.0));
    let h = harness(backend).await;

    let cluster = running_cluster(&h).await;
    let worker = h.engine.add_worker(&cluster).await.unwrap();
    h.engine.mark_worker_connected(&cluster, &worker);
    h.engine.wait_for_worker(&cluster, &worker).await.unwrap();

    h.engine.remove_worker(&cluster, &worker).await.unwrap();
    assert_eq!(
        h.engine.worker_status(&cluster, &worker),
        Some(WorkerStatus::Stopped)
    );
    // Idempotent.
    h.engine.remove_worker(&cluster, &worker).await.unwrap();
    assert_eq!(h.engine.cluster_status(&cluster), Some(ClusterStatus::Running));
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use gridway_backends::{BackendTimeouts, LocalBackend, LocalConfig};
use gridway_core::{
    BackendState, Cluster, ClusterStatus, EphemeralKeypairs, Worker, WorkerStatus,
};
use gridway_storage::{DbUrl, EncryptionKey, KeyChain, Store};
use serde_json::json;

use super::recover;
use crate::test_support::*;

async fn memory_store() -> Store {
    Store::connect(&DbUrl::Memory, KeyChain::default())
        .await
        .unwrap()
}

/// Persist a cluster directly in the given status, bypassing the engine.
async fn persist_cluster(store: &Store, status: ClusterStatus, state: BackendState) -> Cluster {
    let mut cluster = Cluster::new("alice", &EphemeralKeypairs);
    cluster.state = state;
    store.insert_cluster(&cluster).await.unwrap();
    store
        .update_cluster_state(&cluster.name, &cluster.state)
        .await
        .unwrap();
    store.update_cluster_status(&cluster.name, status).await.unwrap();
    cluster.status = status;
    cluster
}

#[tokio::test]
async fn started_cluster_is_treated_as_timed_out() {
    let store = memory_store().await;
    let state = state_of(&[("job_id", json!("7"))]);
    let cluster = persist_cluster(&store, ClusterStatus::Started, state.clone()).await;

    let backend = ScriptedBackend::new(instant_stage(), BackendTimeouts::default());
    let recorded = backend.recorded.clone();
    let (engine, pool) = engine_with_backend(Arc::new(backend), store.clone(), true).await;

    recover(&engine).await.unwrap();

    assert_eq!(engine.cluster_status(&cluster.name), Some(ClusterStatus::Failed));
    assert_eq!(*recorded.stop_cluster_state.lock(), Some(state));
    let stored = store.get_cluster(&cluster.name).await.unwrap().unwrap();
    assert_eq!(stored.status, ClusterStatus::Failed);
    pool.close().await;
}

#[tokio::test]
async fn mid_flight_clusters_get_stop_rerun_then_terminal() {
    for status in [ClusterStatus::Starting, ClusterStatus::Stopping] {
        let store = memory_store().await;
        let state = state_of(&[("i", json!(0))]);
        let cluster = persist_cluster(&store, status, state.clone()).await;

        let backend = ScriptedBackend::new(instant_stage(), BackendTimeouts::default());
        let recorded = backend.recorded.clone();
        let (engine, pool) = engine_with_backend(Arc::new(backend), store.clone(), true).await;

        recover(&engine).await.unwrap();

        assert_eq!(
            engine.cluster_status(&cluster.name),
            Some(ClusterStatus::Stopped),
            "{status} must resolve by re-running stop"
        );
        assert_eq!(*recorded.stop_cluster_state.lock(), Some(state.clone()));
        pool.close().await;
    }
}

#[tokio::test]
async fn running_cluster_failing_its_health_check_is_cleaned_up() {
    let store = memory_store().await;
    let state = state_of(&[("pid", json!(99))]);
    let cluster = persist_cluster(&store, ClusterStatus::Running, state.clone()).await;

    // Probes report dead.
    let backend = ScriptedBackend::new(instant_stage(), BackendTimeouts::default());
    let recorded = backend.recorded.clone();
    let (engine, pool) = engine_with_backend(Arc::new(backend), store.clone(), true).await;

    recover(&engine).await.unwrap();

    assert_eq!(engine.cluster_status(&cluster.name), Some(ClusterStatus::Stopped));
    assert_eq!(*recorded.stop_cluster_state.lock(), Some(state));
    pool.close().await;
}

#[tokio::test]
async fn healthy_running_cluster_resumes_and_dead_workers_are_dropped() {
    let store = memory_store().await;
    let cluster = persist_cluster(
        &store,
        ClusterStatus::Running,
        state_of(&[("pid", json!(1))]),
    )
    .await;
    store
        .update_cluster_addresses(&cluster.name, &addresses())
        .await
        .unwrap();

    // One worker made it to RUNNING, one died mid-connect.
    let mut live = Worker::new(&cluster.name);
    live.state = state_of(&[("pid", json!(2))]);
    store.insert_worker(&live).await.unwrap();
    store
        .update_worker_status(&cluster.name, &live.name, WorkerStatus::Running)
        .await
        .unwrap();
    let mut stuck = Worker::new(&cluster.name);
    stuck.state = state_of(&[("pid", json!(3))]);
    store.insert_worker(&stuck).await.unwrap();
    store
        .update_worker_status(&cluster.name, &stuck.name, WorkerStatus::Started)
        .await
        .unwrap();

    let backend =
        ScriptedBackend::new(instant_stage(), BackendTimeouts::default()).reporting_healthy();
    let (engine, pool) = engine_with_backend(Arc::new(backend), store.clone(), true).await;

    recover(&engine).await.unwrap();

    assert_eq!(engine.cluster_status(&cluster.name), Some(ClusterStatus::Running));
    assert_eq!(
        engine.wait_for_cluster(&cluster.name).await.unwrap(),
        addresses()
    );
    assert_eq!(
        engine.worker_status(&cluster.name, &live.name),
        Some(WorkerStatus::Running)
    );
    assert_eq!(
        engine.worker_status(&cluster.name, &stuck.name),
        Some(WorkerStatus::Stopped)
    );

    engine.stop_cluster(&cluster.name).await.unwrap();
    pool.close().await;
}

fn local_backend(temp_dir: &std::path::Path) -> Arc<LocalBackend> {
    Arc::new(LocalBackend::new(LocalConfig {
        api_url: "http://127.0.0.1:9".into(),
        scheduler_cmd: vec!["sleep".into(), "60".into()],
        worker_cmd: vec!["sleep".into(), "60".into()],
        temp_dir: temp_dir.to_path_buf(),
        timeouts: BackendTimeouts::default(),
    }))
}

fn record_pid(store_cluster: &Cluster) -> i32 {
    store_cluster.state["pid"].as_u64().map(|p| p as i32).unwrap()
}

/// Full restart: two clusters and a worker survive a durable shutdown; one
/// scheduler is killed externally; recovery keeps the survivor (and its
/// worker), drops the dead one, and the survivor remains usable.
#[tokio::test]
async fn durable_restart_keeps_healthy_clusters_and_drops_dead_ones() {
    let dir = tempfile::tempdir().unwrap();
    let db = DbUrl::File(dir.path().join("gridway.sqlite"));
    let k1 = EncryptionKey::generate();
    let k2 = EncryptionKey::generate();

    let store1 = Store::connect(&db, KeyChain::new(vec![k1.clone()]))
        .await
        .unwrap();
    let (engine1, pool1) =
        engine_with_backend(local_backend(dir.path()), store1.clone(), false).await;

    let survivor = engine1.create_cluster("alice").await.unwrap();
    engine1.mark_cluster_connected(&survivor, addresses());
    engine1.wait_for_cluster(&survivor).await.unwrap();
    let worker = engine1.add_worker(&survivor).await.unwrap();
    engine1.mark_worker_connected(&survivor, &worker);
    engine1.wait_for_worker(&survivor, &worker).await.unwrap();

    let casualty = engine1.create_cluster("alice").await.unwrap();
    engine1.mark_cluster_connected(&casualty, addresses());
    engine1.wait_for_cluster(&casualty).await.unwrap();

    // Durable shutdown: supervisors detach, records stay non-terminal.
    engine1.shutdown().await;
    pool1.close().await;

    // Kill the second cluster's scheduler out-of-band.
    let dead_record = store1.get_cluster(&casualty).await.unwrap().unwrap();
    let pid = record_pid(&dead_record);
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), nix::sys::signal::Signal::SIGTERM)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Restart with a rotated key chain: k2 first, k1 kept for reads.
    let store2 = Store::connect(&db, KeyChain::new(vec![k2, k1])).await.unwrap();
    let (engine2, pool2) =
        engine_with_backend(local_backend(dir.path()), store2.clone(), false).await;
    recover(&engine2).await.unwrap();

    assert_eq!(engine2.cluster_status(&survivor), Some(ClusterStatus::Running));
    assert_eq!(
        engine2.worker_status(&survivor, &worker),
        Some(WorkerStatus::Running)
    );
    let dead = store2.get_cluster(&casualty).await.unwrap().unwrap();
    assert!(dead.status.is_terminal());

    // The survivor still takes operations after the restart.
    let second_worker = engine2.add_worker(&survivor).await.unwrap();
    engine2.mark_worker_connected(&survivor, &second_worker);
    engine2.wait_for_worker(&survivor, &second_worker).await.unwrap();

    // Tear everything down for real this time.
    engine2.stop_cluster(&survivor).await.unwrap();
    assert_eq!(engine2.cluster_status(&survivor), Some(ClusterStatus::Stopped));
    pool2.close().await;
}

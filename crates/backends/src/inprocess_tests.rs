// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use futures_util::StreamExt;
use gridway_core::{EphemeralKeypairs, KeypairGenerator};

fn info(name: &str) -> ClusterInfo {
    let keypair = EphemeralKeypairs.new_keypair(name);
    ClusterInfo {
        name: name.to_string(),
        owner: "alice".to_string(),
        api_token: "tok".to_string(),
        tls_cert: keypair.cert,
        tls_key: keypair.key,
    }
}

// The api_url points nowhere; registration attempts fail quietly in the
// background while the bookkeeping under test proceeds.
fn backend() -> Arc<InProcessBackend> {
    Arc::new(InProcessBackend::new(
        "http://127.0.0.1:9",
        BackendTimeouts::default(),
    ))
}

#[tokio::test]
async fn start_yields_one_stage_and_tracks_the_scheduler() {
    let backend = backend();
    let cluster = info("c1");

    let mut stream = backend.clone().start_cluster(cluster.clone());
    let state = stream.next().await.unwrap().unwrap();
    assert_eq!(state["task"], serde_json::json!("c1"));
    assert!(stream.next().await.is_none(), "single-stage start");

    assert!(backend.check_cluster(&cluster, &state).await);
    assert_eq!(backend.active_schedulers(), 1);
}

#[tokio::test]
async fn stop_is_idempotent_and_reaps_workers() {
    let backend = backend();
    let cluster = info("c1");

    let mut stream = backend.clone().start_cluster(cluster.clone());
    let state = stream.next().await.unwrap().unwrap();
    drop(stream);

    let mut wstream = backend
        .clone()
        .start_worker("w1".into(), cluster.clone(), state.clone());
    let wstate = wstream.next().await.unwrap().unwrap();
    drop(wstream);
    assert!(
        backend
            .check_worker("w1", &wstate, &cluster, &state)
            .await
    );

    backend.stop_cluster(&cluster, &state).await.unwrap();
    assert!(!backend.check_cluster(&cluster, &state).await);
    assert!(
        !backend
            .check_worker("w1", &wstate, &cluster, &state)
            .await
    );

    // Second stop with the same (now stale) state is a no-op.
    backend.stop_cluster(&cluster, &state).await.unwrap();
}

#[tokio::test]
async fn stop_with_empty_state_is_safe() {
    let backend = backend();
    let cluster = info("never-started");
    backend
        .stop_cluster(&cluster, &BackendState::new())
        .await
        .unwrap();
}

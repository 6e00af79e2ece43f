// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle engine tests.

mod cancel;
mod fail_start;
mod slow_start;
mod stop;
mod workers;

use std::sync::Arc;
use std::time::Duration;

use gridway_core::{ClusterStatus, WorkerStatus};

use super::LifecycleEngine;

pub(crate) async fn wait_cluster_terminal(
    engine: &Arc<LifecycleEngine>,
    name: &str,
) -> ClusterStatus {
    for _ in 0..500 {
        if let Some(status) = engine.cluster_status(name) {
            if status.is_terminal() {
                return status;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("cluster {name} never reached a terminal status");
}

pub(crate) async fn wait_worker_terminal(
    engine: &Arc<LifecycleEngine>,
    cluster: &str,
    worker: &str,
) -> WorkerStatus {
    for _ in 0..500 {
        if let Some(status) = engine.worker_status(cluster, worker) {
            if status.is_terminal() {
                return status;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("worker {worker} never reached a terminal status");
}

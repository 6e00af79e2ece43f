// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recovery controller: reconcile persisted clusters with reality after a
//! gateway restart.
//!
//! For every non-terminal cluster in the store:
//! - RUNNING and healthy → re-install supervision, reconcile its workers;
//! - RUNNING but dead, or STARTED (submitted, never confirmed) → stop;
//! - STARTING / STOPPING with partial state → re-run stop, mark terminal.

use std::sync::Arc;

use gridway_core::{ClusterStatus, WorkerStatus};
use tracing::{info, warn};

use crate::engine::{EngineError, LifecycleEngine, StopReason};

/// Run recovery to completion. Store failures abort gateway startup;
/// per-cluster backend failures are handled and logged.
pub async fn recover(engine: &Arc<LifecycleEngine>) -> Result<(), EngineError> {
    let clusters = engine.store().active_clusters().await?;
    if clusters.is_empty() {
        return Ok(());
    }
    info!(clusters = clusters.len(), "recovering persisted clusters");
    for cluster in clusters {
        recover_cluster(engine, cluster).await?;
    }
    Ok(())
}

async fn recover_cluster(
    engine: &Arc<LifecycleEngine>,
    cluster: gridway_core::Cluster,
) -> Result<(), EngineError> {
    let name = cluster.name.clone();
    let status = cluster.status;
    let info = cluster.info();
    let state = cluster.state.clone();
    engine.adopt_cluster(cluster);

    match status {
        ClusterStatus::Running => {
            let healthy = tokio::time::timeout(
                engine.config().check_cluster_timeout,
                engine.backend().check_cluster(&info, &state),
            )
            .await
            .unwrap_or(false);

            if healthy {
                info!(cluster = %name, "recovered cluster is healthy, resuming supervision");
                reconcile_workers(engine, &name).await?;
                engine.resume_running_cluster(&name);
            } else {
                warn!(cluster = %name, "recovered cluster failed its health check, stopping");
                engine.cleanup_cluster(&name, StopReason::RecoveryDead).await?;
            }
        }
        ClusterStatus::Started => {
            // Submitted but never confirmed: treat as timed out.
            warn!(cluster = %name, "recovered cluster never connected, stopping");
            engine
                .cleanup_cluster(&name, StopReason::NeverConnected)
                .await?;
        }
        ClusterStatus::Starting | ClusterStatus::Stopping => {
            warn!(cluster = %name, status = %status, "recovered cluster mid-flight, re-running stop");
            engine
                .cleanup_cluster(&name, StopReason::RecoveryPartial)
                .await?;
        }
        ClusterStatus::Stopped | ClusterStatus::Failed => {}
    }
    Ok(())
}

/// Probe each non-terminal worker of a healthy cluster; resume the live
/// ones, clean up the dead ones.
async fn reconcile_workers(
    engine: &Arc<LifecycleEngine>,
    cluster_name: &str,
) -> Result<(), EngineError> {
    let Some((info, cluster_state, workers)) = engine.with_cluster(cluster_name, |c| {
        let workers: Vec<(String, gridway_core::BackendState, WorkerStatus)> = c
            .workers
            .values()
            .map(|w| (w.name.clone(), w.state.clone(), w.status))
            .collect();
        (c.info(), c.state.clone(), workers)
    }) else {
        return Ok(());
    };

    for (worker, worker_state, status) in workers {
        if status.is_terminal() {
            continue;
        }
        let healthy = tokio::time::timeout(
            engine.config().check_cluster_timeout,
            engine
                .backend()
                .check_worker(&worker, &worker_state, &info, &cluster_state),
        )
        .await
        .unwrap_or(false);

        if healthy && status == WorkerStatus::Running {
            info!(cluster = %cluster_name, worker = %worker, "recovered worker is healthy, resuming");
            engine.resume_running_worker(cluster_name, &worker);
        } else {
            warn!(cluster = %cluster_name, worker = %worker, "recovered worker is dead, cleaning up");
            engine
                .cleanup_worker(cluster_name, &worker, StopReason::RecoveryDead)
                .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "recovery_tests.rs"]
mod tests;

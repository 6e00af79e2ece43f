// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker supervision, symmetric to cluster supervision but scoped to one
//! worker; a worker failure leaves its cluster running.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use gridway_backends::JobWatch;
use gridway_core::{ClusterStatus, WorkerStatus};
use gridway_storage::StoreError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{LifecycleEngine, StopReason, SupervisePhase};
use crate::connect::WorkerConnect;

pub(crate) async fn run_worker(
    engine: Arc<LifecycleEngine>,
    cluster: String,
    worker: String,
    phase: SupervisePhase,
) {
    let result = match phase {
        SupervisePhase::Start => engine.drive_worker_start(&cluster, &worker).await,
        SupervisePhase::Running => engine.supervise_running_worker(&cluster, &worker).await,
    };
    if let Err(err) = result {
        warn!(
            cluster = %cluster,
            worker = %worker,
            error = %err,
            "worker supervision aborted by store failure"
        );
    }
}

enum WorkerOutcome {
    Connected,
    Fail(StopReason),
    Detached,
}

async fn job_verdict(watch: &mut Option<JobWatch>) -> bool {
    match watch {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

impl LifecycleEngine {
    pub(super) async fn drive_worker_start(
        self: &Arc<Self>,
        cluster: &str,
        worker: &str,
    ) -> Result<(), StoreError> {
        let Some((info, cluster_state)) =
            self.with_cluster(cluster, |c| (c.info(), c.state.clone()))
        else {
            return Ok(());
        };
        let Some(stop) = self.worker_stop_token(cluster, worker) else {
            return Ok(());
        };
        let detach = self.detach.clone();
        let timeouts = self.backend().timeouts();

        let mut stream =
            self.backend()
                .clone()
                .start_worker(worker.to_string(), info, cluster_state);
        let deadline = tokio::time::sleep(timeouts.worker_start);
        tokio::pin!(deadline);

        let failure = loop {
            tokio::select! {
                _ = detach.cancelled() => return Ok(()),
                _ = stop.cancelled() => break Some(StopReason::Cancelled),
                _ = &mut deadline => break Some(StopReason::StartTimeout),
                next = stream.next() => match next {
                    Some(Ok(state)) => {
                        self.store().update_worker_state(cluster, worker, &state).await?;
                        self.with_worker(cluster, worker, |w| w.state = state);
                    }
                    Some(Err(err)) => break Some(StopReason::StartFailed(err.to_string())),
                    None => break None,
                },
            }
        };
        drop(stream);

        if let Some(reason) = failure {
            return self.cleanup_worker(cluster, worker, reason).await;
        }

        self.transition_worker(cluster, worker, WorkerStatus::Started)
            .await?;

        match self
            .await_worker_connection(cluster, worker, &stop, timeouts.worker_connect)
            .await
        {
            WorkerOutcome::Connected => {
                // A worker may only come up under a running cluster.
                let cluster_running = self
                    .with_cluster(cluster, |c| c.status == ClusterStatus::Running)
                    .unwrap_or(false);
                if !cluster_running {
                    return self
                        .cleanup_worker(
                            cluster,
                            worker,
                            StopReason::StartFailed("cluster is no longer running".to_string()),
                        )
                        .await;
                }
                self.transition_worker(cluster, worker, WorkerStatus::Running)
                    .await?;
                info!(cluster = %cluster, worker = %worker, "worker running");
                self.supervise_running_worker(cluster, worker).await
            }
            WorkerOutcome::Fail(reason) => self.cleanup_worker(cluster, worker, reason).await,
            WorkerOutcome::Detached => Ok(()),
        }
    }

    async fn await_worker_connection(
        &self,
        cluster: &str,
        worker: &str,
        stop: &CancellationToken,
        connect_timeout: Duration,
    ) -> WorkerOutcome {
        let Some(mut rx) = self.hub().subscribe_worker(cluster, worker) else {
            return WorkerOutcome::Fail(StopReason::StartFailed(
                "connect slot missing".to_string(),
            ));
        };
        let detach = self.detach.clone();
        let deadline = tokio::time::sleep(connect_timeout);
        tokio::pin!(deadline);

        let state = self
            .with_worker(cluster, worker, |w| w.state.clone())
            .unwrap_or_default();
        let mut watch = self.backend().job_signal(&state);

        loop {
            let has_watch = watch.is_some();
            tokio::select! {
                _ = detach.cancelled() => return WorkerOutcome::Detached,
                _ = stop.cancelled() => return WorkerOutcome::Fail(StopReason::Cancelled),
                _ = &mut deadline => return WorkerOutcome::Fail(StopReason::ConnectTimeout),
                verdict = job_verdict(&mut watch), if has_watch => {
                    if verdict {
                        watch = None;
                    } else {
                        return WorkerOutcome::Fail(StopReason::JobDead);
                    }
                }
                changed = rx.wait_for(|v| *v != WorkerConnect::Pending) => {
                    let outcome = match changed {
                        Ok(guard) => (*guard).clone(),
                        Err(_) => return WorkerOutcome::Detached,
                    };
                    return match outcome {
                        WorkerConnect::Connected => WorkerOutcome::Connected,
                        WorkerConnect::Gone => WorkerOutcome::Fail(StopReason::Gone),
                        WorkerConnect::Failed(reason) => {
                            WorkerOutcome::Fail(StopReason::StartFailed(reason))
                        }
                        WorkerConnect::Pending => WorkerOutcome::Fail(
                            StopReason::StartFailed("connect slot reset".to_string()),
                        ),
                    };
                }
            }
        }
    }

    pub(super) async fn supervise_running_worker(
        self: &Arc<Self>,
        cluster: &str,
        worker: &str,
    ) -> Result<(), StoreError> {
        let Some(stop) = self.worker_stop_token(cluster, worker) else {
            return Ok(());
        };
        let Some(mut gone_rx) = self.hub().subscribe_worker(cluster, worker) else {
            return Ok(());
        };
        let detach = self.detach.clone();

        let reason = loop {
            let state = self
                .with_worker(cluster, worker, |w| w.state.clone())
                .unwrap_or_default();
            let mut watch = self.backend().job_signal(&state);
            let has_watch = watch.is_some();
            tokio::select! {
                _ = detach.cancelled() => return Ok(()),
                _ = stop.cancelled() => break StopReason::Cancelled,
                verdict = job_verdict(&mut watch), if has_watch => {
                    if !verdict {
                        break StopReason::JobDead;
                    }
                }
                changed = gone_rx.wait_for(|v| *v == WorkerConnect::Gone) => {
                    match changed {
                        Ok(_) => break StopReason::Gone,
                        Err(_) => return Ok(()),
                    }
                }
            }
        };
        self.cleanup_worker(cluster, worker, reason).await
    }

    /// At-most-once worker teardown with the last persisted worker state.
    /// The owning cluster stays up.
    pub(crate) async fn cleanup_worker(
        self: &Arc<Self>,
        cluster: &str,
        worker: &str,
        reason: StopReason,
    ) -> Result<(), StoreError> {
        let already_terminal = self
            .with_worker(cluster, worker, |w| w.status.is_terminal())
            .unwrap_or(true);
        if already_terminal {
            return Ok(());
        }

        let describe = reason.describe();
        info!(cluster = %cluster, worker = %worker, reason = %describe, "stopping worker");

        self.transition_worker(cluster, worker, WorkerStatus::Stopping)
            .await?;
        self.hub()
            .fail_worker(cluster, worker, &format!("worker {worker}: {describe}"));

        let snapshot = self.with_cluster(cluster, |c| {
            let worker_state = c
                .workers
                .get(worker)
                .map(|w| w.state.clone())
                .unwrap_or_default();
            (c.info(), c.state.clone(), worker_state)
        });
        let cleanup_failed = match snapshot {
            Some((info, cluster_state, worker_state)) => match self
                .backend()
                .stop_worker(worker, &worker_state, &info, &cluster_state)
                .await
            {
                Ok(()) => false,
                Err(err) => {
                    warn!(cluster = %cluster, worker = %worker, error = %err, "worker cleanup failed");
                    true
                }
            },
            None => false,
        };

        let terminal = if cleanup_failed {
            WorkerStatus::Failed
        } else {
            reason.worker_terminal()
        };
        self.transition_worker(cluster, worker, terminal).await?;
        self.worker_runtimes
            .lock()
            .remove(&(cluster.to_string(), worker.to_string()));
        info!(cluster = %cluster, worker = %worker, status = %terminal, "worker stopped");
        Ok(())
    }

    fn worker_stop_token(&self, cluster: &str, worker: &str) -> Option<CancellationToken> {
        self.worker_runtimes
            .lock()
            .get(&(cluster.to_string(), worker.to_string()))
            .map(|rt| rt.stop.clone())
    }
}

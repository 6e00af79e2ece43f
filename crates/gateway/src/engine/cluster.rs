// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster supervision: staged start, connect handshake, cleanup.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use gridway_backends::JobWatch;
use gridway_core::{Addresses, ClusterStatus};
use gridway_storage::StoreError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{LifecycleEngine, StopReason, SupervisePhase};
use crate::connect::ClusterConnect;

/// Supervisor entry point. Background supervisors never propagate errors
/// upward; persistence failures are logged and end supervision.
pub(crate) async fn run_cluster(engine: Arc<LifecycleEngine>, name: String, phase: SupervisePhase) {
    let result = match phase {
        SupervisePhase::Start => engine.drive_cluster_start(&name).await,
        SupervisePhase::Running => engine.supervise_running_cluster(&name).await,
    };
    if let Err(err) = result {
        warn!(cluster = %name, error = %err, "cluster supervision aborted by store failure");
    }
}

enum ConnectionOutcome {
    Connected(Addresses),
    Fail(StopReason),
    Detached,
}

/// Await an optional job verdict without holding up the surrounding select
/// when there is none.
async fn job_verdict(watch: &mut Option<JobWatch>) -> bool {
    match watch {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

impl LifecycleEngine {
    /// §start: drain the staged start under its deadline, then hand over to
    /// the connect wait. Every failure path funnels into
    /// [`cleanup_cluster`](Self::cleanup_cluster) with the last persisted
    /// snapshot.
    pub(super) async fn drive_cluster_start(
        self: &Arc<Self>,
        name: &str,
    ) -> Result<(), StoreError> {
        let Some(info) = self.with_cluster(name, |c| c.info()) else {
            return Ok(());
        };
        let Some(stop) = self.stop_token(name) else {
            return Ok(());
        };
        let detach = self.detach.clone();
        let timeouts = self.backend().timeouts();

        let mut stream = self.backend().clone().start_cluster(info);
        let deadline = tokio::time::sleep(timeouts.cluster_start);
        tokio::pin!(deadline);

        let failure = loop {
            tokio::select! {
                _ = detach.cancelled() => return Ok(()),
                _ = stop.cancelled() => break Some(StopReason::Cancelled),
                _ = &mut deadline => break Some(StopReason::StartTimeout),
                next = stream.next() => match next {
                    Some(Ok(state)) => {
                        // Persisted before the next stage is driven: this is
                        // the sole source of truth for cleanup.
                        self.store().update_cluster_state(name, &state).await?;
                        self.with_cluster(name, |c| c.state = state);
                    }
                    Some(Err(err)) => break Some(StopReason::StartFailed(err.to_string())),
                    None => break None,
                },
            }
        };
        // Dropping the stream tells the backend the sequence is abandoned.
        drop(stream);

        if let Some(reason) = failure {
            return self.cleanup_cluster(name, reason).await;
        }

        self.transition_cluster(name, ClusterStatus::Started).await?;

        match self
            .await_cluster_connection(name, &stop, timeouts.cluster_connect)
            .await
        {
            ConnectionOutcome::Connected(addresses) => {
                self.store().update_cluster_addresses(name, &addresses).await?;
                self.with_cluster(name, |c| c.addresses = Some(addresses));
                self.transition_cluster(name, ClusterStatus::Running).await?;
                info!(cluster = %name, "cluster running");
                self.supervise_running_cluster(name).await
            }
            ConnectionOutcome::Fail(reason) => self.cleanup_cluster(name, reason).await,
            ConnectionOutcome::Detached => Ok(()),
        }
    }

    /// Await the registrar confirmation against the connect deadline and the
    /// backend's job verdict, whichever fires first.
    async fn await_cluster_connection(
        &self,
        name: &str,
        stop: &CancellationToken,
        connect_timeout: Duration,
    ) -> ConnectionOutcome {
        let Some(mut rx) = self.hub().subscribe_cluster(name) else {
            return ConnectionOutcome::Fail(StopReason::StartFailed(
                "connect slot missing".to_string(),
            ));
        };
        let detach = self.detach.clone();
        let deadline = tokio::time::sleep(connect_timeout);
        tokio::pin!(deadline);

        let state = self.with_cluster(name, |c| c.state.clone()).unwrap_or_default();
        let mut watch = self.backend().job_signal(&state);

        loop {
            let has_watch = watch.is_some();
            tokio::select! {
                _ = detach.cancelled() => return ConnectionOutcome::Detached,
                _ = stop.cancelled() => return ConnectionOutcome::Fail(StopReason::Cancelled),
                _ = &mut deadline => return ConnectionOutcome::Fail(StopReason::ConnectTimeout),
                verdict = job_verdict(&mut watch), if has_watch => {
                    if verdict {
                        // Job is up; keep waiting for the handshake.
                        watch = None;
                    } else {
                        return ConnectionOutcome::Fail(StopReason::JobDead);
                    }
                }
                changed = rx.wait_for(|v| *v != ClusterConnect::Pending) => {
                    let outcome = match changed {
                        Ok(guard) => (*guard).clone(),
                        Err(_) => return ConnectionOutcome::Detached,
                    };
                    return match outcome {
                        ClusterConnect::Connected(addresses) => {
                            ConnectionOutcome::Connected(addresses)
                        }
                        ClusterConnect::Failed(reason) => {
                            ConnectionOutcome::Fail(StopReason::StartFailed(reason))
                        }
                        ClusterConnect::Pending => ConnectionOutcome::Fail(
                            StopReason::StartFailed("connect slot reset".to_string()),
                        ),
                    };
                }
            }
        }
    }

    /// Post-connect supervision: wait for a stop request or a backend death
    /// report, re-arming the job verdict after each "still running".
    pub(super) async fn supervise_running_cluster(
        self: &Arc<Self>,
        name: &str,
    ) -> Result<(), StoreError> {
        let Some(stop) = self.stop_token(name) else {
            return Ok(());
        };
        let detach = self.detach.clone();

        let reason = loop {
            let state = self.with_cluster(name, |c| c.state.clone()).unwrap_or_default();
            match self.backend().job_signal(&state) {
                None => {
                    tokio::select! {
                        _ = detach.cancelled() => return Ok(()),
                        _ = stop.cancelled() => break StopReason::Cancelled,
                    }
                }
                Some(watch) => {
                    tokio::select! {
                        _ = detach.cancelled() => return Ok(()),
                        _ = stop.cancelled() => break StopReason::Cancelled,
                        verdict = watch => {
                            if !verdict {
                                break StopReason::JobDead;
                            }
                            // Still running; re-arm on the next poll cycle.
                        }
                    }
                }
            }
        };
        self.cleanup_cluster(name, reason).await
    }

    /// At-most-once teardown: STOPPING, fail the pending connect slot, stop
    /// workers, hand the backend the last persisted state, mark terminal.
    pub(crate) async fn cleanup_cluster(
        self: &Arc<Self>,
        name: &str,
        reason: StopReason,
    ) -> Result<(), StoreError> {
        let describe = reason.describe();
        info!(cluster = %name, reason = %describe, "stopping cluster");

        self.transition_cluster(name, ClusterStatus::Stopping).await?;
        self.hub()
            .fail_cluster(name, &format!("cluster {name}: {describe}"));

        let workers: Vec<String> = self
            .with_cluster(name, |c| {
                c.active_workers().map(|w| w.name.clone()).collect()
            })
            .unwrap_or_default();
        for worker in workers {
            self.stop_worker_and_wait(name, &worker).await?;
        }

        let snapshot = self.with_cluster(name, |c| (c.info(), c.state.clone()));
        let cleanup_failed = match snapshot {
            Some((info, state)) => match self.backend().stop_cluster(&info, &state).await {
                Ok(()) => false,
                Err(err) => {
                    warn!(cluster = %name, error = %err, "cluster cleanup failed");
                    true
                }
            },
            None => false,
        };

        let terminal = if cleanup_failed {
            ClusterStatus::Failed
        } else {
            reason.cluster_terminal()
        };
        self.transition_cluster(name, terminal).await?;
        self.runtimes.lock().remove(name);
        info!(cluster = %name, status = %terminal, "cluster stopped");
        Ok(())
    }

    /// Stop one worker during cluster teardown. Supervised workers run their
    /// own cleanup; unsupervised ones (recovered dead) are cleaned directly.
    async fn stop_worker_and_wait(
        self: &Arc<Self>,
        cluster: &str,
        worker: &str,
    ) -> Result<(), StoreError> {
        match self.worker_runtime_handles(cluster, worker) {
            Some((stop, mut status_rx)) => {
                stop.cancel();
                let waited = tokio::time::timeout(
                    Duration::from_secs(30),
                    status_rx.wait_for(|s| s.is_terminal()),
                )
                .await;
                if waited.is_err() {
                    warn!(cluster = %cluster, worker = %worker, "worker did not stop in time");
                }
                Ok(())
            }
            None => self.cleanup_worker(cluster, worker, StopReason::Cancelled).await,
        }
    }

    fn stop_token(&self, name: &str) -> Option<CancellationToken> {
        self.runtimes.lock().get(name).map(|rt| rt.stop.clone())
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The cluster/worker lifecycle engine.
//!
//! One supervising task per non-terminal cluster and per non-terminal worker,
//! spawned into the [`TaskPool`]. Each supervisor drives the backend's staged
//! start under a deadline, persists every state snapshot before the next
//! stage, awaits the registrar's connect confirmation, and on any failure
//! runs at-most-once cleanup with the last persisted snapshot.
//!
//! In-memory records live behind a mutex and are only locked for short,
//! non-await sections; any decision that spans an await re-reads the record.

mod cluster;
mod worker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gridway_backends::ClusterBackend;
use gridway_core::{
    Addresses, Cluster, ClusterStatus, KeypairGenerator, Worker, WorkerStatus,
};
use gridway_storage::{Store, StoreError};
use parking_lot::Mutex;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::connect::{ClusterConnect, ConnectHub, WorkerConnect};
use crate::task_pool::TaskPool;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cluster {0} not found")]
    ClusterNotFound(String),

    #[error("worker {worker} not found in cluster {cluster}")]
    WorkerNotFound { cluster: String, worker: String },

    #[error("cluster {name} failed: {reason}")]
    ClusterFailed { name: String, reason: String },

    #[error("worker {worker} of cluster {cluster} failed: {reason}")]
    WorkerFailed {
        cluster: String,
        worker: String,
        reason: String,
    },

    #[error("cluster {0} is not running")]
    ClusterNotRunning(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Health-check budget per cluster at recovery.
    pub check_cluster_timeout: Duration,
    /// When false, shutdown detaches supervisors and leaves records
    /// non-terminal for the recovery controller. Requires a durable store.
    pub stop_clusters_on_shutdown: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            check_cluster_timeout: Duration::from_secs(10),
            stop_clusters_on_shutdown: true,
        }
    }
}

/// Why a supervisor is tearing its entity down.
#[derive(Debug, Clone)]
pub(crate) enum StopReason {
    /// User stop, request cancellation, or stopping shutdown.
    Cancelled,
    StartTimeout,
    StartFailed(String),
    ConnectTimeout,
    /// The aggregate poller saw the backing job fail.
    JobDead,
    /// The process deregistered itself (worker DELETE).
    Gone,
    /// Recovered as STARTED: submitted but never confirmed.
    NeverConnected,
    /// Recovered as RUNNING but failed its health check.
    RecoveryDead,
    /// Recovered mid-start or mid-stop with partial state.
    RecoveryPartial,
}

impl StopReason {
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Cancelled => "cancelled".to_string(),
            Self::StartTimeout => "start timed out".to_string(),
            Self::StartFailed(err) => format!("start failed: {err}"),
            Self::ConnectTimeout => "connect deadline elapsed".to_string(),
            Self::JobDead => "backend reported the job dead".to_string(),
            Self::Gone => "reported gone".to_string(),
            Self::NeverConnected => "never connected before the gateway restarted".to_string(),
            Self::RecoveryDead => "failed its recovery health check".to_string(),
            Self::RecoveryPartial => "recovered in a partial state".to_string(),
        }
    }

    pub(crate) fn cluster_terminal(&self) -> ClusterStatus {
        match self {
            Self::Cancelled | Self::Gone | Self::RecoveryDead | Self::RecoveryPartial => {
                ClusterStatus::Stopped
            }
            _ => ClusterStatus::Failed,
        }
    }

    pub(crate) fn worker_terminal(&self) -> WorkerStatus {
        match self {
            Self::Cancelled | Self::Gone | Self::RecoveryDead | Self::RecoveryPartial => {
                WorkerStatus::Stopped
            }
            _ => WorkerStatus::Failed,
        }
    }
}

/// Where a freshly spawned supervisor picks up.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SupervisePhase {
    Start,
    Running,
}

struct ClusterRuntime {
    stop: CancellationToken,
    status_tx: watch::Sender<ClusterStatus>,
}

struct WorkerRuntime {
    stop: CancellationToken,
    status_tx: watch::Sender<WorkerStatus>,
}

pub struct LifecycleEngine {
    store: Store,
    backend: Arc<dyn ClusterBackend>,
    keypairs: Arc<dyn KeypairGenerator>,
    pool: Arc<TaskPool>,
    hub: ConnectHub,
    clusters: Mutex<HashMap<String, Cluster>>,
    runtimes: Mutex<HashMap<String, ClusterRuntime>>,
    worker_runtimes: Mutex<HashMap<(String, String), WorkerRuntime>>,
    /// Fired on shutdown in durable mode: supervisors return without cleanup.
    detach: CancellationToken,
    cfg: EngineConfig,
}

impl LifecycleEngine {
    pub fn new(
        store: Store,
        backend: Arc<dyn ClusterBackend>,
        keypairs: Arc<dyn KeypairGenerator>,
        pool: Arc<TaskPool>,
        cfg: EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            detach: pool.cancellation_token(),
            store,
            backend,
            keypairs,
            pool,
            hub: ConnectHub::default(),
            clusters: Mutex::new(HashMap::new()),
            runtimes: Mutex::new(HashMap::new()),
            worker_runtimes: Mutex::new(HashMap::new()),
            cfg,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn backend(&self) -> &Arc<dyn ClusterBackend> {
        &self.backend
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// Create a cluster for `owner` and begin supervising its start.
    ///
    /// The record is persisted (STARTING, token and TLS keypair minted)
    /// before any externally observable side effect. Returns the cluster
    /// name immediately; [`wait_for_cluster`](Self::wait_for_cluster)
    /// surfaces the outcome.
    pub async fn create_cluster(self: &Arc<Self>, owner: &str) -> Result<String, EngineError> {
        let cluster = Cluster::new(owner, self.keypairs.as_ref());
        let name = cluster.name.clone();

        self.store.insert_cluster(&cluster).await?;

        self.hub.register_cluster(&name);
        let (status_tx, _) = watch::channel(ClusterStatus::Starting);
        self.clusters.lock().insert(name.clone(), cluster);
        self.runtimes.lock().insert(
            name.clone(),
            ClusterRuntime {
                stop: CancellationToken::new(),
                status_tx,
            },
        );

        let engine = Arc::clone(self);
        let cluster_name = name.clone();
        self.pool.spawn(&format!("cluster-{name}"), async move {
            cluster::run_cluster(engine, cluster_name, SupervisePhase::Start).await;
        });
        info!(cluster = %name, owner, "cluster submitted");
        Ok(name)
    }

    /// Await the cluster's connect handshake; the error names the cluster
    /// and carries the failure that terminated its lifecycle.
    pub async fn wait_for_cluster(&self, name: &str) -> Result<Addresses, EngineError> {
        let current = self.with_cluster(name, |c| (c.status, c.addresses.clone()));
        match current {
            None => return Err(EngineError::ClusterNotFound(name.to_string())),
            Some((ClusterStatus::Running, Some(addresses))) => return Ok(addresses),
            Some(_) => {}
        }

        let Some(mut rx) = self.hub.subscribe_cluster(name) else {
            return Err(EngineError::ClusterFailed {
                name: name.to_string(),
                reason: "no start in progress".to_string(),
            });
        };
        let outcome = match rx.wait_for(|v| *v != ClusterConnect::Pending).await {
            Ok(guard) => (*guard).clone(),
            Err(_) => ClusterConnect::Failed("gateway shutting down".to_string()),
        };
        match outcome {
            ClusterConnect::Connected(addresses) => Ok(addresses),
            ClusterConnect::Failed(reason) => Err(EngineError::ClusterFailed {
                name: name.to_string(),
                reason,
            }),
            ClusterConnect::Pending => Err(EngineError::ClusterFailed {
                name: name.to_string(),
                reason: "connect slot reset".to_string(),
            }),
        }
    }

    /// User-requested stop. Resolves once the cluster is terminal.
    pub async fn stop_cluster(&self, name: &str) -> Result<(), EngineError> {
        let Some(status) = self.with_cluster(name, |c| c.status) else {
            return Err(EngineError::ClusterNotFound(name.to_string()));
        };
        if status.is_terminal() {
            return Ok(());
        }
        let Some((stop, mut status_rx)) = self.runtime_handles(name) else {
            return Ok(());
        };
        stop.cancel();
        // A closed channel means the supervisor finished and dropped its
        // runtime, which is the same as terminal.
        let _ = status_rx.wait_for(|s| s.is_terminal()).await;
        Ok(())
    }

    /// Scale up by one worker. The cluster must be RUNNING at the instant of
    /// submission; the check and the record insert happen without an
    /// intervening await.
    pub async fn add_worker(self: &Arc<Self>, cluster_name: &str) -> Result<String, EngineError> {
        let worker = {
            let mut clusters = self.clusters.lock();
            let cluster = clusters
                .get_mut(cluster_name)
                .ok_or_else(|| EngineError::ClusterNotFound(cluster_name.to_string()))?;
            if cluster.status != ClusterStatus::Running {
                return Err(EngineError::ClusterNotRunning(cluster_name.to_string()));
            }
            let worker = Worker::new(cluster_name);
            cluster.workers.insert(worker.name.clone(), worker.clone());
            worker
        };
        let worker_name = worker.name.clone();

        if let Err(err) = self.store.insert_worker(&worker).await {
            // Roll the in-memory record back; nothing was submitted yet.
            self.with_cluster(cluster_name, |c| c.workers.remove(&worker_name));
            return Err(err.into());
        }

        self.hub.register_worker(cluster_name, &worker_name);
        let (status_tx, _) = watch::channel(WorkerStatus::Starting);
        self.worker_runtimes.lock().insert(
            (cluster_name.to_string(), worker_name.clone()),
            WorkerRuntime {
                stop: CancellationToken::new(),
                status_tx,
            },
        );

        let engine = Arc::clone(self);
        let cluster = cluster_name.to_string();
        let worker = worker_name.clone();
        self.pool
            .spawn(&format!("worker-{cluster_name}-{worker_name}"), async move {
                worker::run_worker(engine, cluster, worker, SupervisePhase::Start).await;
            });
        info!(cluster = %cluster_name, worker = %worker_name, "worker submitted");
        Ok(worker_name)
    }

    /// Await a worker's connect handshake.
    pub async fn wait_for_worker(&self, cluster: &str, worker: &str) -> Result<(), EngineError> {
        let Some(mut rx) = self.hub.subscribe_worker(cluster, worker) else {
            return Err(EngineError::WorkerNotFound {
                cluster: cluster.to_string(),
                worker: worker.to_string(),
            });
        };
        let outcome = match rx.wait_for(|v| *v != WorkerConnect::Pending).await {
            Ok(guard) => (*guard).clone(),
            Err(_) => WorkerConnect::Failed("gateway shutting down".to_string()),
        };
        match outcome {
            WorkerConnect::Connected => Ok(()),
            WorkerConnect::Gone => Err(EngineError::WorkerFailed {
                cluster: cluster.to_string(),
                worker: worker.to_string(),
                reason: "reported gone".to_string(),
            }),
            WorkerConnect::Failed(reason) => Err(EngineError::WorkerFailed {
                cluster: cluster.to_string(),
                worker: worker.to_string(),
                reason,
            }),
            WorkerConnect::Pending => Err(EngineError::WorkerFailed {
                cluster: cluster.to_string(),
                worker: worker.to_string(),
                reason: "connect slot reset".to_string(),
            }),
        }
    }

    /// Scale down one worker. Resolves once the worker is terminal.
    pub async fn remove_worker(&self, cluster: &str, worker: &str) -> Result<(), EngineError> {
        let exists = self
            .with_worker(cluster, worker, |w| w.status)
            .ok_or_else(|| EngineError::WorkerNotFound {
                cluster: cluster.to_string(),
                worker: worker.to_string(),
            })?;
        if exists.is_terminal() {
            return Ok(());
        }
        let Some((stop, mut status_rx)) = self.worker_runtime_handles(cluster, worker) else {
            return Ok(());
        };
        stop.cancel();
        let _ = status_rx.wait_for(|s| s.is_terminal()).await;
        Ok(())
    }

    /// Gateway shutdown. With `stop_clusters_on_shutdown`, every live
    /// cluster runs the same cleanup as a timeout; otherwise supervisors
    /// detach and records stay non-terminal for recovery.
    pub async fn shutdown(&self) {
        if !self.cfg.stop_clusters_on_shutdown {
            info!("shutdown: leaving clusters running for recovery");
            self.detach.cancel();
            return;
        }

        let targets: Vec<(String, CancellationToken, watch::Receiver<ClusterStatus>)> = {
            let runtimes = self.runtimes.lock();
            runtimes
                .iter()
                .map(|(name, rt)| (name.clone(), rt.stop.clone(), rt.status_tx.subscribe()))
                .collect()
        };
        if targets.is_empty() {
            return;
        }
        info!(clusters = targets.len(), "shutdown: stopping clusters");
        for (_, stop, _) in &targets {
            stop.cancel();
        }
        for (name, _, mut status_rx) in targets {
            let _ = status_rx.wait_for(|s| s.is_terminal()).await;
            info!(cluster = %name, "cluster stopped for shutdown");
        }
    }

    // ---- registrar-facing operations -------------------------------------

    /// Constant-time token check. Unknown clusters are indistinguishable
    /// from bad tokens.
    pub fn authenticate(&self, name: &str, token: &str) -> bool {
        let clusters = self.clusters.lock();
        match clusters.get(name) {
            Some(cluster) => cluster
                .api_token
                .as_bytes()
                .ct_eq(token.as_bytes())
                .into(),
            None => {
                // Burn comparable time before refusing.
                let _: bool = token.as_bytes().ct_eq(token.as_bytes()).into();
                false
            }
        }
    }

    pub fn cluster_addresses(&self, name: &str) -> Option<Addresses> {
        self.with_cluster(name, |c| c.addresses.clone()).flatten()
    }

    /// Resolve the pending connect slot with the reported addresses.
    /// Returns false for late confirmations (cleanup already begun).
    pub fn mark_cluster_connected(&self, name: &str, addresses: Addresses) -> bool {
        if self.hub.confirm_cluster(name, addresses.clone()) {
            self.with_cluster(name, |c| c.addresses = Some(addresses));
            true
        } else {
            false
        }
    }

    pub fn mark_worker_connected(&self, cluster: &str, worker: &str) -> bool {
        self.hub.confirm_worker(cluster, worker)
    }

    pub fn mark_worker_gone(&self, cluster: &str, worker: &str) -> bool {
        self.hub.worker_gone(cluster, worker)
    }

    // ---- introspection ---------------------------------------------------

    pub fn cluster_status(&self, name: &str) -> Option<ClusterStatus> {
        self.with_cluster(name, |c| c.status)
    }

    pub fn worker_status(&self, cluster: &str, worker: &str) -> Option<WorkerStatus> {
        self.with_worker(cluster, worker, |w| w.status)
    }

    pub fn cluster_record(&self, name: &str) -> Option<Cluster> {
        self.clusters.lock().get(name).cloned()
    }

    /// Subscribe to a cluster's status transitions.
    pub fn status_watch(&self, name: &str) -> Option<watch::Receiver<ClusterStatus>> {
        self.runtimes
            .lock()
            .get(name)
            .map(|rt| rt.status_tx.subscribe())
    }

    // ---- shared internals ------------------------------------------------

    pub(crate) fn with_cluster<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Cluster) -> R,
    ) -> Option<R> {
        self.clusters.lock().get_mut(name).map(f)
    }

    pub(crate) fn with_worker<R>(
        &self,
        cluster: &str,
        worker: &str,
        f: impl FnOnce(&mut Worker) -> R,
    ) -> Option<R> {
        self.clusters
            .lock()
            .get_mut(cluster)
            .and_then(|c| c.workers.get_mut(worker))
            .map(f)
    }

    pub(crate) fn hub(&self) -> &ConnectHub {
        &self.hub
    }

    fn runtime_handles(
        &self,
        name: &str,
    ) -> Option<(CancellationToken, watch::Receiver<ClusterStatus>)> {
        self.runtimes
            .lock()
            .get(name)
            .map(|rt| (rt.stop.clone(), rt.status_tx.subscribe()))
    }

    fn worker_runtime_handles(
        &self,
        cluster: &str,
        worker: &str,
    ) -> Option<(CancellationToken, watch::Receiver<WorkerStatus>)> {
        self.worker_runtimes
            .lock()
            .get(&(cluster.to_string(), worker.to_string()))
            .map(|rt| (rt.stop.clone(), rt.status_tx.subscribe()))
    }

    /// Apply and persist a cluster status transition. Forbidden moves are
    /// logged and skipped; repeating the current status is a no-op.
    pub(crate) async fn transition_cluster(
        &self,
        name: &str,
        next: ClusterStatus,
    ) -> Result<(), StoreError> {
        let applied = self.with_cluster(name, |c| {
            if c.status == next {
                return true;
            }
            c.advance(next)
        });
        match applied {
            Some(true) => {}
            Some(false) => {
                warn!(cluster = %name, to = %next, "refusing forbidden status transition");
                return Ok(());
            }
            None => return Ok(()),
        }
        if let Some(rt) = self.runtimes.lock().get(name) {
            rt.status_tx.send_replace(next);
        }
        self.store.update_cluster_status(name, next).await
    }

    pub(crate) async fn transition_worker(
        &self,
        cluster: &str,
        worker: &str,
        next: WorkerStatus,
    ) -> Result<(), StoreError> {
        let applied = self.with_worker(cluster, worker, |w| {
            if w.status == next {
                return true;
            }
            w.advance(next)
        });
        match applied {
            Some(true) => {}
            Some(false) => {
                warn!(cluster = %cluster, worker = %worker, to = %next, "refusing forbidden status transition");
                return Ok(());
            }
            None => return Ok(()),
        }
        if let Some(rt) = self
            .worker_runtimes
            .lock()
            .get(&(cluster.to_string(), worker.to_string()))
        {
            rt.status_tx.send_replace(next);
        }
        self.store.update_worker_status(cluster, worker, next).await
    }

    // ---- recovery-facing -------------------------------------------------

    /// Re-install an in-memory record and runtime for a persisted cluster.
    pub(crate) fn adopt_cluster(&self, cluster: Cluster) {
        let name = cluster.name.clone();
        let status = cluster.status;
        self.hub.register_cluster(&name);
        let (status_tx, _) = watch::channel(status);
        self.runtimes.lock().insert(
            name.clone(),
            ClusterRuntime {
                stop: CancellationToken::new(),
                status_tx,
            },
        );
        self.clusters.lock().insert(name, cluster);
    }

    /// Re-attach supervision to a recovered, healthy, RUNNING cluster.
    pub(crate) fn resume_running_cluster(self: &Arc<Self>, name: &str) {
        if let Some(addresses) = self.cluster_addresses(name) {
            self.hub.confirm_cluster(name, addresses);
        }
        let engine = Arc::clone(self);
        let cluster_name = name.to_string();
        self.pool.spawn(&format!("cluster-{name}"), async move {
            cluster::run_cluster(engine, cluster_name, SupervisePhase::Running).await;
        });
    }

    /// Re-attach supervision to a recovered, healthy, RUNNING worker.
    pub(crate) fn resume_running_worker(self: &Arc<Self>, cluster: &str, worker: &str) {
        self.hub.register_worker(cluster, worker);
        self.hub.confirm_worker(cluster, worker);
        let (status_tx, _) = watch::channel(WorkerStatus::Running);
        self.worker_runtimes.lock().insert(
            (cluster.to_string(), worker.to_string()),
            WorkerRuntime {
                stop: CancellationToken::new(),
                status_tx,
            },
        );
        let engine = Arc::clone(self);
        let cluster_name = cluster.to_string();
        let worker_name = worker.to_string();
        self.pool
            .spawn(&format!("worker-{cluster}-{worker}"), async move {
                worker::run_worker(engine, cluster_name, worker_name, SupervisePhase::Running)
                    .await;
            });
    }
}

#[cfg(test)]
#[path = "engine_tests/mod.rs"]
mod tests;

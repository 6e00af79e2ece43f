// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The abstract backend contract driven by the lifecycle engine.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::Stream;
use gridway_core::{BackendState, ClusterInfo};
use thiserror::Error;

/// A staged start: a lazy sequence of backend state snapshots.
///
/// Each yielded snapshot is the latest opaque state and is persisted by the
/// engine before the next stage is driven. Normal completion means
/// "submitted, awaiting connection"; an `Err` item means the start failed at
/// that stage. Dropping the stream abandons the sequence — the backend must
/// not rely on being polled to completion.
pub type StateStream = Pin<Box<dyn Stream<Item = Result<BackendState, BackendError>> + Send>>;

/// Verdict future from the aggregate job poller: resolves `true` while the
/// job is running and `false` once it is seen failed.
pub type JobWatch = BoxFuture<'static, bool>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to submit job (exit code {exit_code})\n  stdout: {stdout}\n  stderr: {stderr}")]
    SubmitFailed {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("launcher error: {0}")]
    Launcher(String),

    #[error("job {job_id} for {entity} failed, see logs for more information")]
    JobFailed { job_id: String, entity: String },

    #[error("start failed: {0}")]
    StartFailed(String),

    #[error("stop failed: {0}")]
    StopFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Start and connect budgets, exposed as backend configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendTimeouts {
    /// Budget covering the entire staged cluster start sequence.
    pub cluster_start: Duration,
    /// Budget for a submitted scheduler to phone home.
    pub cluster_connect: Duration,
    pub worker_start: Duration,
    pub worker_connect: Duration,
}

impl Default for BackendTimeouts {
    fn default() -> Self {
        Self {
            cluster_start: Duration::from_secs(60),
            cluster_connect: Duration::from_secs(30),
            worker_start: Duration::from_secs(60),
            worker_connect: Duration::from_secs(30),
        }
    }
}

/// Lifecycle operations every cluster backend implements.
///
/// `stop_cluster` and `stop_worker` must be idempotent and must tolerate
/// partial state (`{}` if the first start stage never completed) and jobs
/// that are already gone.
#[async_trait]
pub trait ClusterBackend: Send + Sync + 'static {
    fn timeouts(&self) -> BackendTimeouts;

    /// Begin a staged cluster start.
    fn start_cluster(self: Arc<Self>, cluster: ClusterInfo) -> StateStream;

    async fn stop_cluster(
        &self,
        cluster: &ClusterInfo,
        state: &BackendState,
    ) -> Result<(), BackendError>;

    /// Begin a staged worker start, scoped to the given cluster state.
    fn start_worker(
        self: Arc<Self>,
        worker: String,
        cluster: ClusterInfo,
        cluster_state: BackendState,
    ) -> StateStream;

    async fn stop_worker(
        &self,
        worker: &str,
        worker_state: &BackendState,
        cluster: &ClusterInfo,
        cluster_state: &BackendState,
    ) -> Result<(), BackendError>;

    /// A liveness verdict for the external job behind `state`, if this
    /// backend tracks one. The engine treats a `false` resolution like a
    /// connect timeout.
    fn job_signal(&self, state: &BackendState) -> Option<JobWatch> {
        let _ = state;
        None
    }

    /// Recovery probe: is the process behind this cluster state still alive?
    async fn check_cluster(&self, cluster: &ClusterInfo, state: &BackendState) -> bool;

    /// Recovery probe for a single worker.
    async fn check_worker(
        &self,
        worker: &str,
        worker_state: &BackendState,
        cluster: &ClusterInfo,
        cluster_state: &BackendState,
    ) -> bool;
}

/// Extract the `job_id` field most job-based backends keep in their state.
pub fn state_job_id(state: &BackendState) -> Option<&str> {
    state.get("job_id").and_then(|v| v.as_str())
}

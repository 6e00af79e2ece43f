// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Batch-queue backend: submit, cancel, and poll external jobs.
//!
//! The backend is generic over [`JobQueueCommands`], which supplies the
//! concrete command words and output parsers for one queueing system
//! ([`SlurmCommands`] ships here). Privileged operations go through the
//! trusted launcher ([`launcher`]); status polling runs directly as the
//! gateway user, aggregated over every pending job in a single command.

pub mod launcher;
mod poller;
mod slurm;

pub use launcher::{LauncherAction, LauncherRequest, LauncherResponse};
pub use slurm::{slurm_format_memory, SlurmCommands};

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use gridway_core::{BackendState, ClusterInfo};
use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::contract::{
    state_job_id, BackendError, BackendTimeouts, ClusterBackend, JobWatch, StateStream,
};
use launcher::run_as_user;
use poller::PendingJobs;

/// File names for TLS material staged into the per-cluster directory.
const TLS_CERT_FILE: &str = "grid.crt";
const TLS_KEY_FILE: &str = "grid.pem";

#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    /// Registrar base URL handed to started processes for phone-home.
    pub api_url: String,
    /// Staging root template; `{home}` and `{username}` are substituted.
    /// A subdirectory per cluster is created beneath it and removed on stop.
    pub staging_directory: String,
    /// Script run before the scheduler command.
    pub scheduler_setup: String,
    /// Script run before the worker command.
    pub worker_setup: String,
    pub status_poll_interval: Duration,
    pub submit_command: String,
    pub cancel_command: String,
    pub status_command: String,
    /// Path to the trusted `gridway-launcher` helper.
    pub launcher_path: String,
    pub scheduler_cmd: String,
    pub worker_cmd: String,
    pub scheduler_cores: u32,
    /// Scheduler memory limit in bytes.
    pub scheduler_memory: u64,
    pub worker_cores: u32,
    /// Worker memory limit in bytes.
    pub worker_memory: u64,
    pub timeouts: BackendTimeouts,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            staging_directory: "{home}/.gridway/".to_string(),
            scheduler_setup: String::new(),
            worker_setup: String::new(),
            status_poll_interval: Duration::from_millis(500),
            submit_command: "sbatch".to_string(),
            cancel_command: "scancel".to_string(),
            status_command: "squeue".to_string(),
            launcher_path: "gridway-launcher".to_string(),
            scheduler_cmd: "gridway-scheduler".to_string(),
            worker_cmd: "gridway-worker".to_string(),
            scheduler_cores: 1,
            scheduler_memory: 2 * (1 << 30),
            worker_cores: 1,
            worker_memory: 2 * (1 << 30),
            timeouts: BackendTimeouts::default(),
        }
    }
}

/// Everything a queue variant needs to build one submission.
pub struct SubmitContext<'a> {
    pub cluster: &'a ClusterInfo,
    /// `None` for the scheduler job, `Some` for a worker job.
    pub worker_name: Option<&'a str>,
    pub staging_dir: &'a Path,
    /// Environment the job runs with; variants may reference the names
    /// (e.g. Slurm's `--export`).
    pub env: &'a HashMap<String, String>,
    pub cores: u32,
    pub memory: u64,
    pub setup: &'a str,
    pub command: &'a str,
}

/// Command words and output parsers for one queueing system.
pub trait JobQueueCommands: Send + Sync + 'static {
    /// Submission command line plus the batch script fed on stdin.
    fn submit(&self, cfg: &JobQueueConfig, ctx: &SubmitContext<'_>) -> (Vec<String>, String);

    fn cancel(&self, cfg: &JobQueueConfig, job_id: &str) -> Vec<String>;

    /// Aggregate status command over the full id list.
    fn status(&self, cfg: &JobQueueConfig, job_ids: &[String]) -> Vec<String>;

    fn parse_job_id(&self, stdout: &str) -> String;

    /// Classify status output into `(running, failed)` id sets. Ids in
    /// neither set are still pending and produce no signal this tick.
    fn parse_job_states(&self, stdout: &str) -> (HashSet<String>, HashSet<String>);

    /// Substring of cancel stderr that means "already gone" (success).
    fn cancel_tolerates(&self) -> &'static str {
        "Job has finished"
    }
}

pub struct JobQueueBackend<Q: JobQueueCommands> {
    core: Arc<JobQueueCore<Q>>,
}

struct JobQueueCore<Q> {
    cfg: JobQueueConfig,
    queue: Q,
    pending: PendingJobs,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl<Q: JobQueueCommands> JobQueueBackend<Q> {
    pub fn new(cfg: JobQueueConfig, queue: Q) -> Self {
        Self {
            core: Arc::new(JobQueueCore {
                cfg,
                queue,
                pending: PendingJobs::default(),
                poller: Mutex::new(None),
            }),
        }
    }
}

impl<Q: JobQueueCommands> Drop for JobQueueBackend<Q> {
    fn drop(&mut self) {
        if let Some(handle) = self.core.poller.lock().take() {
            handle.abort();
        }
    }
}

impl<Q: JobQueueCommands> JobQueueCore<Q> {
    /// `<staging_root_template>/<cluster_name>/`, all writes confined here.
    fn staging_dir(&self, cluster: &ClusterInfo) -> PathBuf {
        let home = nix::unistd::User::from_name(&cluster.owner)
            .ok()
            .flatten()
            .map(|user| user.dir)
            .unwrap_or_else(|| PathBuf::from("/home").join(&cluster.owner));
        let root = self
            .cfg
            .staging_directory
            .replace("{home}", &home.to_string_lossy())
            .replace("{username}", &cluster.owner);
        PathBuf::from(root).join(&cluster.name)
    }

    fn base_env(&self, cluster: &ClusterInfo, staging: &Path) -> HashMap<String, String> {
        HashMap::from([
            ("GRIDWAY_API_URL".into(), self.cfg.api_url.clone()),
            ("GRIDWAY_CLUSTER_NAME".into(), cluster.name.clone()),
            ("GRIDWAY_API_TOKEN".into(), cluster.api_token.clone()),
            (
                "GRIDWAY_TLS_CERT".into(),
                staging.join(TLS_CERT_FILE).to_string_lossy().into_owned(),
            ),
            (
                "GRIDWAY_TLS_KEY".into(),
                staging.join(TLS_KEY_FILE).to_string_lossy().into_owned(),
            ),
        ])
    }

    /// Submit one job via the launcher and return its parsed job id.
    async fn submit_job(
        &self,
        cluster: &ClusterInfo,
        worker_name: Option<&str>,
    ) -> Result<String, BackendError> {
        let staging = self.staging_dir(cluster);
        let mut env = self.base_env(cluster, &staging);

        let (cores, memory, setup, command) = match worker_name {
            Some(worker) => {
                env.insert("GRIDWAY_WORKER_NAME".into(), worker.to_string());
                (
                    self.cfg.worker_cores,
                    self.cfg.worker_memory,
                    self.cfg.worker_setup.as_str(),
                    self.cfg.worker_cmd.as_str(),
                )
            }
            None => (
                self.cfg.scheduler_cores,
                self.cfg.scheduler_memory,
                self.cfg.scheduler_setup.as_str(),
                self.cfg.scheduler_cmd.as_str(),
            ),
        };

        let ctx = SubmitContext {
            cluster,
            worker_name,
            staging_dir: &staging,
            env: &env,
            cores,
            memory,
            setup,
            command,
        };
        let (cmd, script) = self.queue.submit(&self.cfg, &ctx);

        // Staging and TLS materialization happen for the scheduler job only;
        // workers share the cluster's staging directory.
        let (staging_dir, files) = if worker_name.is_none() {
            let files = HashMap::from([
                (
                    TLS_KEY_FILE.to_string(),
                    String::from_utf8_lossy(&cluster.tls_key).into_owned(),
                ),
                (
                    TLS_CERT_FILE.to_string(),
                    String::from_utf8_lossy(&cluster.tls_cert).into_owned(),
                ),
            ]);
            (Some(staging.clone()), files)
        } else {
            (None, HashMap::new())
        };

        let request = LauncherRequest {
            action: LauncherAction::Start,
            cmd,
            env,
            stdin: Some(script),
            staging_dir,
            files,
        };
        let (code, stdout, stderr) =
            run_as_user(&self.cfg.launcher_path, &cluster.owner, &request).await?;
        if code != 0 {
            return Err(BackendError::SubmitFailed {
                exit_code: code,
                stdout,
                stderr,
            });
        }
        Ok(self.queue.parse_job_id(&stdout))
    }

    /// Cancel a job via the launcher; already-finished jobs are success.
    async fn cancel_job(
        &self,
        cluster: &ClusterInfo,
        job_id: &str,
        worker_name: Option<&str>,
    ) -> Result<(), BackendError> {
        let request = LauncherRequest {
            action: LauncherAction::Stop,
            cmd: self.queue.cancel(&self.cfg, job_id),
            env: HashMap::new(),
            stdin: None,
            staging_dir: worker_name
                .is_none()
                .then(|| self.staging_dir(cluster)),
            files: HashMap::new(),
        };
        let (code, _stdout, stderr) =
            run_as_user(&self.cfg.launcher_path, &cluster.owner, &request).await?;
        if code != 0 && !stderr.contains(self.queue.cancel_tolerates()) {
            return Err(BackendError::StopFailed(format!(
                "failed to cancel job {job_id} for cluster {}: {stderr}",
                cluster.name
            )));
        }
        Ok(())
    }

    /// One aggregate status invocation, run directly as the gateway user.
    async fn query_states(
        &self,
        job_ids: &[String],
    ) -> Result<(HashSet<String>, HashSet<String>), BackendError> {
        let cmd = self.queue.status(&self.cfg, job_ids);
        let (program, args) = cmd
            .split_first()
            .ok_or_else(|| BackendError::StartFailed("empty status command".into()))?;
        let output = tokio::process::Command::new(program)
            .args(args)
            .output()
            .await?;
        if !output.status.success() {
            return Err(BackendError::StopFailed(format!(
                "status command exited with {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr),
            )));
        }
        Ok(self
            .queue
            .parse_job_states(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn poll_tick(&self) {
        let live = self.pending.snapshot();
        if live.is_empty() {
            return;
        }
        debug!(jobs = live.len(), "polling job statuses");
        let ids: Vec<String> = live.iter().map(|(id, _)| id.clone()).collect();
        match self.query_states(&ids).await {
            Ok((running, failed)) => {
                for (job_id, _slot) in live {
                    if running.contains(&job_id) {
                        self.pending.resolve(&job_id, true);
                    } else if failed.contains(&job_id) {
                        self.pending.resolve(&job_id, false);
                    }
                }
            }
            // Tolerated for one tick; pending jobs get re-polled.
            Err(err) => warn!(error = %err, "job status check failed"),
        }
    }

    fn watch_job(self: &Arc<Self>, job_id: &str) -> JobWatch {
        self.ensure_poller();
        let slot = self.pending.watch(job_id);
        Box::pin(slot.wait())
    }

    /// Lazily start the aggregate poller on first use.
    fn ensure_poller(self: &Arc<Self>) {
        let mut poller = self.poller.lock();
        if poller.is_some() {
            return;
        }
        let core = Arc::clone(self);
        *poller = Some(tokio::spawn(async move {
            loop {
                core.poll_tick().await;
                tokio::time::sleep(core.cfg.status_poll_interval).await;
            }
        }));
    }

    /// Single synchronous liveness probe used at recovery.
    async fn job_is_running_now(&self, job_id: &str) -> bool {
        match self.query_states(&[job_id.to_string()]).await {
            Ok((running, _failed)) => running.contains(job_id),
            Err(err) => {
                warn!(job_id, error = %err, "status probe failed, treating job as dead");
                false
            }
        }
    }
}

#[async_trait]
impl<Q: JobQueueCommands> ClusterBackend for JobQueueBackend<Q> {
    fn timeouts(&self) -> BackendTimeouts {
        self.core.cfg.timeouts
    }

    fn start_cluster(self: Arc<Self>, cluster: ClusterInfo) -> StateStream {
        let core = Arc::clone(&self.core);
        Box::pin(try_stream! {
            let job_id = core.submit_job(&cluster, None).await?;
            let mut state = BackendState::new();
            state.insert("job_id".into(), json!(job_id));
            yield state;

            if !core.watch_job(&job_id).await {
                Err(BackendError::JobFailed {
                    job_id,
                    entity: format!("cluster {}", cluster.name),
                })?;
            }
        })
    }

    async fn stop_cluster(
        &self,
        cluster: &ClusterInfo,
        state: &BackendState,
    ) -> Result<(), BackendError> {
        match state_job_id(state) {
            Some(job_id) => self.core.cancel_job(cluster, job_id, None).await,
            None => Ok(()),
        }
    }

    fn start_worker(
        self: Arc<Self>,
        worker: String,
        cluster: ClusterInfo,
        _cluster_state: BackendState,
    ) -> StateStream {
        let core = Arc::clone(&self.core);
        Box::pin(try_stream! {
            let job_id = core.submit_job(&cluster, Some(&worker)).await?;
            let mut state = BackendState::new();
            state.insert("job_id".into(), json!(job_id));
            yield state;

            if !core.watch_job(&job_id).await {
                Err(BackendError::JobFailed {
                    job_id,
                    entity: format!("worker {worker}"),
                })?;
            }
        })
    }

    async fn stop_worker(
        &self,
        worker: &str,
        worker_state: &BackendState,
        cluster: &ClusterInfo,
        _cluster_state: &BackendState,
    ) -> Result<(), BackendError> {
        match state_job_id(worker_state) {
            Some(job_id) => self.core.cancel_job(cluster, job_id, Some(worker)).await,
            None => Ok(()),
        }
    }

    fn job_signal(&self, state: &BackendState) -> Option<JobWatch> {
        state_job_id(state).map(|job_id| self.core.watch_job(job_id))
    }

    async fn check_cluster(&self, _cluster: &ClusterInfo, state: &BackendState) -> bool {
        match state_job_id(state) {
            Some(job_id) => self.core.job_is_running_now(job_id).await,
            None => false,
        }
    }

    async fn check_worker(
        &self,
        _worker: &str,
        worker_state: &BackendState,
        _cluster: &ClusterInfo,
        _cluster_state: &BackendState,
    ) -> bool {
        match state_job_id(worker_state) {
            Some(job_id) => self.core.job_is_running_now(job_id).await,
            None => false,
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;

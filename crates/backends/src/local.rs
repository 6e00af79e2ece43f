// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local subprocess backend.
//!
//! Schedulers and workers are plain child processes of the gateway, started
//! from configured command lines and handed their identity through the
//! environment. Backend state is the child's pid; stop sends SIGTERM.
//! Because pids survive a gateway restart, this backend supports durable
//! recovery: the liveness probes signal the recorded pid.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_stream::try_stream;
use async_trait::async_trait;
use gridway_core::{BackendState, ClusterInfo};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde_json::json;
use tracing::{debug, warn};

use crate::contract::{BackendError, BackendTimeouts, ClusterBackend, StateStream};

#[derive(Debug, Clone)]
pub struct LocalConfig {
    /// Registrar base URL handed to started processes for phone-home.
    pub api_url: String,
    pub scheduler_cmd: Vec<String>,
    pub worker_cmd: Vec<String>,
    /// Root under which per-cluster staging directories are created.
    pub temp_dir: PathBuf,
    pub timeouts: BackendTimeouts,
}

pub struct LocalBackend {
    cfg: LocalConfig,
}

impl LocalBackend {
    pub fn new(cfg: LocalConfig) -> Self {
        Self { cfg }
    }

    fn staging_dir(&self, cluster: &ClusterInfo) -> PathBuf {
        self.cfg.temp_dir.join(&cluster.name)
    }

    fn base_env(&self, cluster: &ClusterInfo) -> HashMap<String, String> {
        let staging = self.staging_dir(cluster);
        HashMap::from([
            ("GRIDWAY_API_URL".into(), self.cfg.api_url.clone()),
            ("GRIDWAY_CLUSTER_NAME".into(), cluster.name.clone()),
            ("GRIDWAY_API_TOKEN".into(), cluster.api_token.clone()),
            (
                "GRIDWAY_TLS_CERT".into(),
                staging.join("grid.crt").to_string_lossy().into_owned(),
            ),
            (
                "GRIDWAY_TLS_KEY".into(),
                staging.join("grid.pem").to_string_lossy().into_owned(),
            ),
        ])
    }

    fn prepare_staging(&self, cluster: &ClusterInfo) -> Result<PathBuf, BackendError> {
        let staging = self.staging_dir(cluster);
        std::fs::create_dir_all(&staging)?;
        std::fs::set_permissions(&staging, std::fs::Permissions::from_mode(0o700))?;
        write_private(&staging.join("grid.crt"), &cluster.tls_cert)?;
        write_private(&staging.join("grid.pem"), &cluster.tls_key)?;
        Ok(staging)
    }
}

fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

/// Spawn a detached child, logging to `log_path`. A reaper task waits on the
/// child so it does not linger as a zombie after exit.
fn spawn_process(
    cmd: &[String],
    env: &HashMap<String, String>,
    cwd: &Path,
    log_path: &Path,
) -> Result<u32, BackendError> {
    let (program, args) = cmd
        .split_first()
        .ok_or_else(|| BackendError::StartFailed("empty command line".to_string()))?;
    let log = std::fs::File::create(log_path)?;
    let mut child = tokio::process::Command::new(program)
        .args(args)
        .envs(env)
        .current_dir(cwd)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::from(log.try_clone()?))
        .stderr(std::process::Stdio::from(log))
        .spawn()
        .map_err(|e| BackendError::StartFailed(format!("failed to spawn {program}: {e}")))?;
    let pid = child
        .id()
        .ok_or_else(|| BackendError::StartFailed("child exited before pid capture".into()))?;
    tokio::spawn(async move {
        let _ = child.wait().await;
    });
    Ok(pid)
}

fn state_pid(state: &BackendState) -> Option<i32> {
    state
        .get("pid")
        .and_then(|v| v.as_u64())
        .map(|pid| pid as i32)
}

fn pid_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

fn terminate(pid: i32) {
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => debug!(pid, "sent SIGTERM"),
        Err(nix::errno::Errno::ESRCH) => debug!(pid, "process already gone"),
        Err(err) => warn!(pid, error = %err, "failed to signal process"),
    }
}

#[async_trait]
impl ClusterBackend for LocalBackend {
    fn timeouts(&self) -> BackendTimeouts {
        self.cfg.timeouts
    }

    fn start_cluster(self: Arc<Self>, cluster: ClusterInfo) -> StateStream {
        Box::pin(try_stream! {
            let staging = self.prepare_staging(&cluster)?;
            let env = self.base_env(&cluster);
            let log = staging.join(format!("scheduler-{}.log", cluster.name));
            let pid = spawn_process(&self.cfg.scheduler_cmd, &env, &staging, &log)?;
            let mut state = BackendState::new();
            state.insert("pid".into(), json!(pid));
            yield state;
        })
    }

    async fn stop_cluster(
        &self,
        cluster: &ClusterInfo,
        state: &BackendState,
    ) -> Result<(), BackendError> {
        if let Some(pid) = state_pid(state) {
            terminate(pid);
        }
        let staging = self.staging_dir(cluster);
        match tokio::fs::remove_dir_all(&staging).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    fn start_worker(
        self: Arc<Self>,
        worker: String,
        cluster: ClusterInfo,
        _cluster_state: BackendState,
    ) -> StateStream {
        Box::pin(try_stream! {
            let staging = self.staging_dir(&cluster);
            let mut env = self.base_env(&cluster);
            env.insert("GRIDWAY_WORKER_NAME".into(), worker.clone());
            let log = staging.join(format!("worker-{worker}.log"));
            let pid = spawn_process(&self.cfg.worker_cmd, &env, &staging, &log)?;
            let mut state = BackendState::new();
            state.insert("pid".into(), json!(pid));
            yield state;
        })
    }

    async fn stop_worker(
        &self,
        _worker: &str,
        worker_state: &BackendState,
        _cluster: &ClusterInfo,
        _cluster_state: &BackendState,
    ) -> Result<(), BackendError> {
        if let Some(pid) = state_pid(worker_state) {
            terminate(pid);
        }
        Ok(())
    }

    async fn check_cluster(&self, _cluster: &ClusterInfo, state: &BackendState) -> bool {
        state_pid(state).is_some_and(pid_alive)
    }

    async fn check_worker(
        &self,
        _worker: &str,
        worker_state: &BackendState,
        _cluster: &ClusterInfo,
        _cluster_state: &BackendState,
    ) -> bool {
        state_pid(worker_state).is_some_and(pid_alive)
    }
}

#[cfg(test)]
#[path = "local_tests.rs"]
mod tests;

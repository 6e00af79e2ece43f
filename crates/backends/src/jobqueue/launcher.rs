// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Launcher protocol and client.
//!
//! Privileged per-user operations (job submission, cancellation, staging
//! directory manipulation) run through a trusted helper, `gridway-launcher`,
//! invoked as the target user via `sudo -nHu` with a cleared environment.
//! One JSON request goes in on stdin; one JSON response comes back on stdout.
//! A non-zero exit of the launcher process itself is a hard error regardless
//! of the `ok` field.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::contract::BackendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LauncherAction {
    Start,
    Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LauncherRequest {
    pub action: LauncherAction,
    pub cmd: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<PathBuf>,
    /// Files to materialize under `staging_dir` before running `cmd`,
    /// relative path → content, written user-owned with mode 0600.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub files: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LauncherResponse {
    pub ok: bool,
    #[serde(default)]
    pub returncode: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl LauncherResponse {
    pub fn success(returncode: i32, stdout: String, stderr: String) -> Self {
        Self {
            ok: true,
            returncode,
            stdout,
            stderr,
            error: String::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            returncode: 0,
            stdout: String::new(),
            stderr: String::new(),
            error: error.into(),
        }
    }
}

/// Serve one launcher request. This is the whole of the helper binary; it
/// lives here so the protocol handling is unit-testable.
pub async fn handle_request(request: LauncherRequest) -> LauncherResponse {
    match handle_inner(request).await {
        Ok(response) => response,
        Err(err) => LauncherResponse::failure(err.to_string()),
    }
}

async fn handle_inner(request: LauncherRequest) -> std::io::Result<LauncherResponse> {
    if request.action == LauncherAction::Start {
        if let Some(staging_dir) = &request.staging_dir {
            std::fs::create_dir_all(staging_dir)?;
            std::fs::set_permissions(staging_dir, std::fs::Permissions::from_mode(0o700))?;
            for (rel_path, content) in &request.files {
                let rel = Path::new(rel_path);
                if !is_confined(rel) {
                    return Ok(LauncherResponse::failure(format!(
                        "file path escapes staging directory: {rel_path}"
                    )));
                }
                let path = staging_dir.join(rel);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, content)?;
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
            }
        }
    }

    let response = run_command(&request).await?;

    if request.action == LauncherAction::Stop {
        if let Some(staging_dir) = &request.staging_dir {
            match std::fs::remove_dir_all(staging_dir) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
    }

    Ok(response)
}

/// Only plain relative components: no absolute paths, no `..`.
fn is_confined(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

async fn run_command(request: &LauncherRequest) -> std::io::Result<LauncherResponse> {
    let Some((program, args)) = request.cmd.split_first() else {
        return Ok(LauncherResponse::failure("empty command"));
    };

    let mut command = tokio::process::Command::new(program);
    command
        .args(args)
        .env_clear()
        .envs(&request.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            return Ok(LauncherResponse::failure(format!(
                "failed to run {program}: {err}"
            )))
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        if let Some(input) = &request.stdin {
            stdin.write_all(input.as_bytes()).await?;
        }
        drop(stdin);
    }

    let output = child.wait_with_output().await?;
    Ok(LauncherResponse::success(
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    ))
}

/// Run a launcher request as `user` through `sudo -nHu`.
pub async fn run_as_user(
    launcher: &str,
    user: &str,
    request: &LauncherRequest,
) -> Result<(i32, String, String), BackendError> {
    let payload = serde_json::to_vec(request)
        .map_err(|e| BackendError::Launcher(format!("failed to encode request: {e}")))?;

    let mut child = tokio::process::Command::new("sudo")
        .args(["-nHu", user, launcher])
        .env_clear()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| BackendError::Launcher(format!("failed to invoke launcher: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(&payload)
            .await
            .map_err(|e| BackendError::Launcher(format!("failed to write request: {e}")))?;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| BackendError::Launcher(format!("launcher did not finish: {e}")))?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(BackendError::Launcher(format!(
            "launcher exited with {}\n  stdout: {stdout}\n  stderr: {stderr}",
            output.status.code().unwrap_or(-1),
        )));
    }

    let response: LauncherResponse = serde_json::from_str(&stdout)
        .map_err(|e| BackendError::Launcher(format!("bad launcher response: {e}")))?;
    if !response.ok {
        return Err(BackendError::Launcher(response.error));
    }
    Ok((response.returncode, response.stdout, response.stderr))
}

#[cfg(test)]
#[path = "launcher_tests.rs"]
mod tests;

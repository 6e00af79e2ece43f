// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::os::unix::fs::MetadataExt;

fn start_request(staging: Option<PathBuf>) -> LauncherRequest {
    LauncherRequest {
        action: LauncherAction::Start,
        cmd: vec!["sh".into(), "-c".into(), "cat".into()],
        env: HashMap::new(),
        stdin: Some("hello from stdin".into()),
        staging_dir: staging,
        files: HashMap::new(),
    }
}

#[tokio::test]
async fn start_runs_command_with_piped_stdin() {
    let response = handle_request(start_request(None)).await;
    assert!(response.ok, "{}", response.error);
    assert_eq!(response.returncode, 0);
    assert_eq!(response.stdout, "hello from stdin");
}

#[tokio::test]
async fn start_materializes_files_with_private_permissions() {
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("cluster-a");
    let mut request = start_request(Some(staging.clone()));
    request.files =
        HashMap::from([("grid.pem".to_string(), "-----KEY-----".to_string())]);

    let response = handle_request(request).await;
    assert!(response.ok, "{}", response.error);

    let pem = staging.join("grid.pem");
    assert_eq!(std::fs::read_to_string(&pem).unwrap(), "-----KEY-----");
    assert_eq!(std::fs::metadata(&pem).unwrap().mode() & 0o777, 0o600);
    assert_eq!(std::fs::metadata(&staging).unwrap().mode() & 0o777, 0o700);
}

#[tokio::test]
async fn file_paths_may_not_escape_staging() {
    let dir = tempfile::tempdir().unwrap();
    let mut request = start_request(Some(dir.path().join("cluster-a")));
    request.files = HashMap::from([("../evil".to_string(), "x".to_string())]);

    let response = handle_request(request).await;
    assert!(!response.ok);
    assert!(response.error.contains("escapes staging"));
}

#[tokio::test]
async fn stop_removes_the_staging_directory() {
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("cluster-a");
    std::fs::create_dir_all(&staging).unwrap();

    let response = handle_request(LauncherRequest {
        action: LauncherAction::Stop,
        cmd: vec!["true".into()],
        env: HashMap::new(),
        stdin: None,
        staging_dir: Some(staging.clone()),
        files: HashMap::new(),
    })
    .await;
    assert!(response.ok, "{}", response.error);
    assert!(!staging.exists());

    // Stopping again: the directory is already gone, still ok.
    let response = handle_request(LauncherRequest {
        action: LauncherAction::Stop,
        cmd: vec!["true".into()],
        env: HashMap::new(),
        stdin: None,
        staging_dir: Some(staging),
        files: HashMap::new(),
    })
    .await;
    assert!(response.ok);
}

#[tokio::test]
async fn command_environment_is_exactly_the_request_env() {
    let response = handle_request(LauncherRequest {
        action: LauncherAction::Start,
        cmd: vec!["sh".into(), "-c".into(), "echo \"$MARKER:$HOME\"".into()],
        env: HashMap::from([("MARKER".to_string(), "m1".to_string())]),
        stdin: None,
        staging_dir: None,
        files: HashMap::new(),
    })
    .await;
    assert!(response.ok);
    assert_eq!(response.stdout.trim_end(), "m1:");
}

#[tokio::test]
async fn missing_program_reports_failure_not_panic() {
    let response = handle_request(LauncherRequest {
        action: LauncherAction::Start,
        cmd: vec!["definitely-not-a-real-binary-4242".into()],
        env: HashMap::new(),
        stdin: None,
        staging_dir: None,
        files: HashMap::new(),
    })
    .await;
    assert!(!response.ok);
    assert!(!response.error.is_empty());
}

#[test]
fn nonzero_command_exit_is_still_an_ok_response() {
    // The launcher reports the command's exit code; interpreting it is the
    // caller's job. Only launcher-level failures set ok=false.
    let response = LauncherResponse::success(1, String::new(), "boom".into());
    let encoded = serde_json::to_string(&response).unwrap();
    let decoded: LauncherResponse = serde_json::from_str(&encoded).unwrap();
    assert!(decoded.ok);
    assert_eq!(decoded.returncode, 1);
}

#[test]
fn request_round_trips_through_json() {
    let request = LauncherRequest {
        action: LauncherAction::Start,
        cmd: vec!["sbatch".into(), "--parsable".into()],
        env: HashMap::from([("GRIDWAY_CLUSTER_NAME".to_string(), "c1".to_string())]),
        stdin: Some("#!/bin/sh\n".into()),
        staging_dir: Some("/home/alice/.gridway/c1".into()),
        files: HashMap::from([("grid.crt".to_string(), "cert".to_string())]),
    };
    let encoded = serde_json::to_string(&request).unwrap();
    let decoded: LauncherRequest = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded.action, LauncherAction::Start);
    assert_eq!(decoded.cmd, request.cmd);
    assert_eq!(decoded.staging_dir, request.staging_dir);
    assert_eq!(decoded.files, request.files);
}

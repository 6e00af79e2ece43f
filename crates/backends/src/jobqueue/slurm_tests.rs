// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use gridway_core::ClusterInfo;
use std::collections::HashMap;
use std::path::Path;

fn test_info() -> ClusterInfo {
    ClusterInfo {
        name: "c1".to_string(),
        owner: "alice".to_string(),
        api_token: "tok".to_string(),
        tls_cert: b"cert".to_vec(),
        tls_key: b"key".to_vec(),
    }
}

fn submit_line(queue: &SlurmCommands, worker: Option<&str>) -> (Vec<String>, String) {
    let cfg = JobQueueConfig::default();
    let info = test_info();
    let env = HashMap::from([
        ("GRIDWAY_CLUSTER_NAME".to_string(), "c1".to_string()),
        ("GRIDWAY_API_TOKEN".to_string(), "tok".to_string()),
    ]);
    let ctx = SubmitContext {
        cluster: &info,
        worker_name: worker,
        staging_dir: Path::new("/home/alice/.gridway/c1"),
        env: &env,
        cores: 4,
        memory: 16 * (1 << 30),
        setup: "module load gridway",
        command: "gridway-scheduler",
    };
    queue.submit(&cfg, &ctx)
}

#[yare::parameterized(
    ten_kib_floor   = { 1, "1K" },
    just_below_10k  = { 10 * 1024 - 1, "1K" },
    exactly_10k     = { 10 * 1024, "10K" },
    kib_rounds_up   = { 10 * 1024 + 1, "11K" },
    exactly_10m     = { 10 * 1024 * 1024, "10M" },
    mib_rounds_up   = { 10 * 1024 * 1024 + 1, "11M" },
    just_below_10g  = { 10 * 1024 * 1024 * 1024 - 1, "10240M" },
    exactly_10g     = { 10 * 1024 * 1024 * 1024, "10G" },
    gib_rounds_up   = { 10 * 1024 * 1024 * 1024 + 1, "11G" },
)]
fn memory_formatting(bytes: u64, expected: &str) {
    assert_eq!(slurm_format_memory(bytes), expected);
}

#[test]
fn submit_without_optional_flags() {
    let (cmd, script) = submit_line(&SlurmCommands::default(), None);
    assert_eq!(cmd[0], "sbatch");
    assert_eq!(cmd[1], "--parsable");
    assert_eq!(cmd[2], "--job-name=gridway");
    assert!(!cmd.iter().any(|f| f.starts_with("--partition=")));
    assert!(!cmd.iter().any(|f| f.starts_with("--account=")));
    assert!(!cmd.iter().any(|f| f.starts_with("--qos=")));
    assert!(cmd.contains(&"--chdir=/home/alice/.gridway/c1".to_string()));
    assert!(cmd.contains(&"--output=/home/alice/.gridway/c1/scheduler-c1.log".to_string()));
    assert!(cmd.contains(&"--cpus-per-task=4".to_string()));
    assert!(cmd.contains(&"--mem=16G".to_string()));
    assert!(script.starts_with("#!/bin/sh\n"));
    assert!(script.contains("module load gridway"));
    assert!(script.ends_with("gridway-scheduler"));
}

#[test]
fn submit_appends_each_optional_flag_only_when_set() {
    let queue = SlurmCommands {
        partition: "batch".to_string(),
        qos: "low".to_string(),
        account: "acct-1".to_string(),
    };
    let (cmd, _) = submit_line(&queue, None);
    assert!(cmd.contains(&"--partition=batch".to_string()));
    assert!(cmd.contains(&"--account=acct-1".to_string()));
    assert!(cmd.contains(&"--qos=low".to_string()));

    let only_account = SlurmCommands {
        account: "acct-1".to_string(),
        ..Default::default()
    };
    let (cmd, _) = submit_line(&only_account, None);
    assert!(cmd.contains(&"--account=acct-1".to_string()));
    assert!(!cmd.iter().any(|f| f.starts_with("--partition=")));
    assert!(!cmd.iter().any(|f| f.starts_with("--qos=")));
}

#[test]
fn submit_exports_sorted_env_names() {
    let (cmd, _) = submit_line(&SlurmCommands::default(), None);
    assert!(cmd.contains(&"--export=GRIDWAY_API_TOKEN,GRIDWAY_CLUSTER_NAME".to_string()));
}

#[test]
fn worker_jobs_log_per_worker() {
    let (cmd, _) = submit_line(&SlurmCommands::default(), Some("w-9"));
    assert!(cmd.contains(&"--output=/home/alice/.gridway/c1/worker-w-9.log".to_string()));
}

#[test]
fn cancel_and_status_lines() {
    let cfg = JobQueueConfig::default();
    let queue = SlurmCommands::default();
    assert_eq!(queue.cancel(&cfg, "1234"), ["scancel", "1234"]);
    assert_eq!(
        queue.status(&cfg, &["1".to_string(), "2".to_string()]),
        ["squeue", "-h", "--job=1,2", "-o", "%i %t"]
    );
}

#[test]
fn job_id_is_trimmed_stdout() {
    let queue = SlurmCommands::default();
    assert_eq!(queue.parse_job_id("1234\n"), "1234");
}

#[test]
fn state_classification() {
    let queue = SlurmCommands::default();
    let out = "1 R\n2 PD\n3 CG\n4 CF\n5 F\n6 CA\n\n";
    let (running, failed) = queue.parse_job_states(out);
    assert_eq!(
        running,
        HashSet::from(["1".to_string(), "3".to_string()])
    );
    assert_eq!(
        failed,
        HashSet::from(["5".to_string(), "6".to_string()])
    );
}

#[test]
fn malformed_status_lines_are_skipped() {
    let queue = SlurmCommands::default();
    let (running, failed) = queue.parse_job_states("oops\n1 R\n");
    assert_eq!(running.len(), 1);
    assert!(failed.is_empty());
}

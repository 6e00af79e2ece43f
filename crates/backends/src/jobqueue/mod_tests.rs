// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::time::Duration;

/// Queue variant whose status command is a canned shell script.
struct ScriptedQueue {
    status_script: String,
}

impl JobQueueCommands for ScriptedQueue {
    fn submit(&self, _cfg: &JobQueueConfig, _ctx: &SubmitContext<'_>) -> (Vec<String>, String) {
        (vec!["true".to_string()], String::new())
    }

    fn cancel(&self, _cfg: &JobQueueConfig, job_id: &str) -> Vec<String> {
        vec!["true".to_string(), job_id.to_string()]
    }

    fn status(&self, _cfg: &JobQueueConfig, _job_ids: &[String]) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), self.status_script.clone()]
    }

    fn parse_job_id(&self, stdout: &str) -> String {
        stdout.trim().to_string()
    }

    fn parse_job_states(
        &self,
        stdout: &str,
    ) -> (
        std::collections::HashSet<String>,
        std::collections::HashSet<String>,
    ) {
        SlurmCommands::default().parse_job_states(stdout)
    }
}

fn backend(status_script: &str) -> Arc<JobQueueBackend<ScriptedQueue>> {
    let cfg = JobQueueConfig {
        status_poll_interval: Duration::from_millis(25),
        ..Default::default()
    };
    Arc::new(JobQueueBackend::new(
        cfg,
        ScriptedQueue {
            status_script: status_script.to_string(),
        },
    ))
}

fn job_state(job_id: &str) -> BackendState {
    let mut state = BackendState::new();
    state.insert("job_id".into(), json!(job_id));
    state
}

#[tokio::test]
async fn job_signal_resolves_true_for_running_jobs() {
    let backend = backend("echo '42 R'");
    let watch = backend.job_signal(&job_state("42")).unwrap();
    let verdict = tokio::time::timeout(Duration::from_secs(2), watch)
        .await
        .unwrap();
    assert!(verdict);
}

#[tokio::test]
async fn job_signal_resolves_false_for_failed_jobs() {
    let backend = backend("echo '42 F'");
    let watch = backend.job_signal(&job_state("42")).unwrap();
    let verdict = tokio::time::timeout(Duration::from_secs(2), watch)
        .await
        .unwrap();
    assert!(!verdict);
}

#[tokio::test]
async fn pending_jobs_produce_no_signal() {
    let backend = backend("echo '42 PD'");
    let watch = backend.job_signal(&job_state("42")).unwrap();
    assert!(
        tokio::time::timeout(Duration::from_millis(200), watch)
            .await
            .is_err(),
        "pending state must not resolve the slot"
    );
}

#[tokio::test]
async fn status_command_failures_are_tolerated_per_tick() {
    let backend = backend("exit 3");
    let watch = backend.job_signal(&job_state("42")).unwrap();
    // Several ticks fail; the slot stays unresolved rather than reporting a
    // spurious verdict.
    assert!(
        tokio::time::timeout(Duration::from_millis(200), watch)
            .await
            .is_err()
    );
}

#[tokio::test]
async fn job_signal_requires_a_job_id_in_state() {
    let backend = backend("echo '42 R'");
    assert!(backend.job_signal(&BackendState::new()).is_none());
}

#[tokio::test]
async fn recovery_probe_reports_running_state() {
    let backend = backend("echo '42 R'");
    let info = ClusterInfo {
        name: "c1".to_string(),
        owner: "alice".to_string(),
        api_token: "tok".to_string(),
        tls_cert: vec![],
        tls_key: vec![],
    };
    assert!(backend.check_cluster(&info, &job_state("42")).await);
    assert!(!backend.check_cluster(&info, &job_state("43")).await);
    assert!(!backend.check_cluster(&info, &BackendState::new()).await);
}

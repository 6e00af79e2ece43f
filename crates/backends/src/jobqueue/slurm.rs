// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Slurm command words and output parsers.

use std::collections::HashSet;

use super::{JobQueueCommands, JobQueueConfig, SubmitContext};

/// Format a byte count the way Slurm's `--mem` flag expects.
///
/// Thresholds: `>= 10 GiB` in G, `>= 10 MiB` in M, `>= 10 KiB` in K,
/// anything smaller is `1K`. Ceiling rounding throughout.
pub fn slurm_format_memory(n: u64) -> String {
    if n >= 10 * (1 << 30) {
        format!("{}G", n.div_ceil(1 << 30))
    } else if n >= 10 * (1 << 20) {
        format!("{}M", n.div_ceil(1 << 20))
    } else if n >= 10 * (1 << 10) {
        format!("{}K", n.div_ceil(1 << 10))
    } else {
        "1K".to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SlurmCommands {
    /// Partition to submit jobs to; omitted when empty.
    pub partition: String,
    /// QOS string associated with each job; omitted when empty.
    pub qos: String,
    /// Account string associated with each job; omitted when empty.
    pub account: String,
}

impl JobQueueCommands for SlurmCommands {
    fn submit(&self, cfg: &JobQueueConfig, ctx: &SubmitContext<'_>) -> (Vec<String>, String) {
        let mut cmd = vec![
            cfg.submit_command.clone(),
            "--parsable".to_string(),
            "--job-name=gridway".to_string(),
        ];
        if !self.partition.is_empty() {
            cmd.push(format!("--partition={}", self.partition));
        }
        if !self.account.is_empty() {
            cmd.push(format!("--account={}", self.account));
        }
        if !self.qos.is_empty() {
            cmd.push(format!("--qos={}", self.qos));
        }

        let log_file = match ctx.worker_name {
            Some(worker) => format!("worker-{worker}.log"),
            None => format!("scheduler-{}.log", ctx.cluster.name),
        };
        let mut env_names: Vec<&str> = ctx.env.keys().map(String::as_str).collect();
        env_names.sort_unstable();

        cmd.extend([
            format!("--chdir={}", ctx.staging_dir.display()),
            format!("--output={}", ctx.staging_dir.join(log_file).display()),
            format!("--cpus-per-task={}", ctx.cores),
            format!("--mem={}", slurm_format_memory(ctx.memory)),
            format!("--export={}", env_names.join(",")),
        ]);

        let script = format!("#!/bin/sh\n{}\n{}", ctx.setup, ctx.command);
        (cmd, script)
    }

    fn cancel(&self, cfg: &JobQueueConfig, job_id: &str) -> Vec<String> {
        vec![cfg.cancel_command.clone(), job_id.to_string()]
    }

    fn status(&self, cfg: &JobQueueConfig, job_ids: &[String]) -> Vec<String> {
        vec![
            cfg.status_command.clone(),
            "-h".to_string(),
            format!("--job={}", job_ids.join(",")),
            "-o".to_string(),
            "%i %t".to_string(),
        ]
    }

    fn parse_job_id(&self, stdout: &str) -> String {
        stdout.trim().to_string()
    }

    /// `R`/`CG` are running, `PD`/`CF` are still pending (no signal yet),
    /// everything else has failed.
    fn parse_job_states(&self, stdout: &str) -> (HashSet<String>, HashSet<String>) {
        let mut running = HashSet::new();
        let mut failed = HashSet::new();
        for line in stdout.lines() {
            let mut fields = line.split_whitespace();
            let (Some(job_id), Some(state)) = (fields.next(), fields.next()) else {
                continue;
            };
            match state {
                "R" | "CG" => {
                    running.insert(job_id.to_string());
                }
                "PD" | "CF" => {}
                _ => {
                    failed.insert(job_id.to_string());
                }
            }
        }
        (running, failed)
    }
}

#[cfg(test)]
#[path = "slurm_tests.rs"]
mod tests;

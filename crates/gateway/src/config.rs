// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gateway configuration.
//!
//! Options arrive from a toml file (or defaults) and are validated once at
//! startup; contradictory combinations are fatal before anything binds or
//! spawns. Encryption keys may come from the config or from
//! `GRIDWAY_ENCRYPT_KEYS`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use gridway_backends::jobqueue::SlurmCommands;
use gridway_backends::{
    BackendTimeouts, ClusterBackend, InProcessBackend, JobQueueBackend, JobQueueConfig,
    LocalBackend, LocalConfig,
};
use gridway_storage::{DbUrl, KeyChain, SecretsError, ENCRYPT_KEYS_ENV};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid db_url: {0}")]
    InvalidDbUrl(String),

    #[error(transparent)]
    Keys(#[from] SecretsError),

    #[error("db_encrypt_keys is empty and a durable db_url is configured, set {ENCRYPT_KEYS_ENV}")]
    MissingEncryptKeys,

    #[error("stop_clusters_on_shutdown = false requires a non-volatile db_url")]
    VolatileRecovery,

    #[error("invalid url {0} (expected http://host:port)")]
    InvalidUrl(String),

    #[error("unknown cluster_manager_class: {0}")]
    UnknownBackend(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Public scheduler-proxy endpoint (served elsewhere).
    pub gateway_url: String,
    /// Registrar endpoint; started processes phone home here.
    pub private_url: String,
    /// Public REST endpoint (served elsewhere).
    pub public_url: String,
    pub db_url: String,
    /// Ordered base64 key list; first encrypts, all decrypt. Falls back to
    /// the `GRIDWAY_ENCRYPT_KEYS` environment variable when empty.
    pub db_encrypt_keys: Vec<String>,
    pub stop_clusters_on_shutdown: bool,
    /// Seconds budgeted per cluster health check at recovery.
    pub check_cluster_timeout: f64,
    pub temp_dir: PathBuf,
    /// Gateway TLS certificate for the public endpoints (served elsewhere).
    pub tls_cert: Option<PathBuf>,
    /// Backend variant: `in-process`, `local`, or `slurm`.
    pub cluster_manager_class: String,
    pub backend: BackendSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway_url: "tls://127.0.0.1:8786".to_string(),
            private_url: "http://127.0.0.1:8081".to_string(),
            public_url: "http://127.0.0.1:8000".to_string(),
            db_url: "sqlite://:memory:".to_string(),
            db_encrypt_keys: Vec::new(),
            stop_clusters_on_shutdown: true,
            check_cluster_timeout: 10.0,
            temp_dir: std::env::temp_dir().join("gridway"),
            tls_cert: None,
            cluster_manager_class: "in-process".to_string(),
            backend: BackendSettings::default(),
        }
    }
}

/// Backend-specific options; timeouts are seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub staging_directory: String,
    pub scheduler_setup: String,
    pub worker_setup: String,
    pub status_poll_interval: f64,
    pub submit_command: String,
    pub cancel_command: String,
    pub status_command: String,
    pub launcher_path: String,
    pub scheduler_cmd: String,
    pub worker_cmd: String,
    pub scheduler_cores: u32,
    pub scheduler_memory: u64,
    pub worker_cores: u32,
    pub worker_memory: u64,
    pub partition: String,
    pub qos: String,
    pub account: String,
    pub cluster_start_timeout: f64,
    pub cluster_connect_timeout: f64,
    pub worker_start_timeout: f64,
    pub worker_connect_timeout: f64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        let jq = JobQueueConfig::default();
        let timeouts = BackendTimeouts::default();
        Self {
            staging_directory: jq.staging_directory,
            scheduler_setup: String::new(),
            worker_setup: String::new(),
            status_poll_interval: 0.5,
            submit_command: jq.submit_command,
            cancel_command: jq.cancel_command,
            status_command: jq.status_command,
            launcher_path: jq.launcher_path,
            scheduler_cmd: jq.scheduler_cmd,
            worker_cmd: jq.worker_cmd,
            scheduler_cores: jq.scheduler_cores,
            scheduler_memory: jq.scheduler_memory,
            worker_cores: jq.worker_cores,
            worker_memory: jq.worker_memory,
            partition: String::new(),
            qos: String::new(),
            account: String::new(),
            cluster_start_timeout: timeouts.cluster_start.as_secs_f64(),
            cluster_connect_timeout: timeouts.cluster_connect.as_secs_f64(),
            worker_start_timeout: timeouts.worker_start.as_secs_f64(),
            worker_connect_timeout: timeouts.worker_connect.as_secs_f64(),
        }
    }
}

impl BackendSettings {
    pub fn timeouts(&self) -> BackendTimeouts {
        BackendTimeouts {
            cluster_start: Duration::from_secs_f64(self.cluster_start_timeout),
            cluster_connect: Duration::from_secs_f64(self.cluster_connect_timeout),
            worker_start: Duration::from_secs_f64(self.worker_start_timeout),
            worker_connect: Duration::from_secs_f64(self.worker_connect_timeout),
        }
    }
}

/// Settled results of validation, consumed by gateway startup.
#[derive(Debug)]
pub struct Validated {
    pub db_url: DbUrl,
    pub keys: KeyChain,
    pub private_addr: SocketAddr,
}

impl GatewayConfig {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Check the linked options and resolve derived values. Fatal at
    /// startup on any violation.
    pub fn validate(&self) -> Result<Validated, ConfigError> {
        let db_url = DbUrl::parse(&self.db_url)
            .map_err(|err| ConfigError::InvalidDbUrl(err.to_string()))?;

        let keys = if self.db_encrypt_keys.is_empty() {
            KeyChain::from_env()?
        } else {
            KeyChain::parse(&self.db_encrypt_keys.join(";"))?
        };

        if !db_url.is_volatile() && keys.is_empty() {
            return Err(ConfigError::MissingEncryptKeys);
        }
        // Durable recovery needs records that survive a restart.
        if !self.stop_clusters_on_shutdown && db_url.is_volatile() {
            return Err(ConfigError::VolatileRecovery);
        }

        let private_addr = parse_http_addr(&self.private_url)?;

        Ok(Validated {
            db_url,
            keys,
            private_addr,
        })
    }

    /// Instantiate the configured backend variant. `api_url` is the bound
    /// registrar address handed to started processes.
    pub fn build_backend(&self, api_url: &str) -> Result<Arc<dyn ClusterBackend>, ConfigError> {
        let timeouts = self.backend.timeouts();
        match self.cluster_manager_class.as_str() {
            "in-process" => Ok(Arc::new(InProcessBackend::new(api_url, timeouts))),
            "local" => Ok(Arc::new(LocalBackend::new(LocalConfig {
                api_url: api_url.to_string(),
                scheduler_cmd: split_command(&self.backend.scheduler_cmd),
                worker_cmd: split_command(&self.backend.worker_cmd),
                temp_dir: self.temp_dir.clone(),
                timeouts,
            }))),
            "slurm" => {
                let cfg = JobQueueConfig {
                    api_url: api_url.to_string(),
                    staging_directory: self.backend.staging_directory.clone(),
                    scheduler_setup: self.backend.scheduler_setup.clone(),
                    worker_setup: self.backend.worker_setup.clone(),
                    status_poll_interval: Duration::from_secs_f64(
                        self.backend.status_poll_interval,
                    ),
                    submit_command: self.backend.submit_command.clone(),
                    cancel_command: self.backend.cancel_command.clone(),
                    status_command: self.backend.status_command.clone(),
                    launcher_path: self.backend.launcher_path.clone(),
                    scheduler_cmd: self.backend.scheduler_cmd.clone(),
                    worker_cmd: self.backend.worker_cmd.clone(),
                    scheduler_cores: self.backend.scheduler_cores,
                    scheduler_memory: self.backend.scheduler_memory,
                    worker_cores: self.backend.worker_cores,
                    worker_memory: self.backend.worker_memory,
                    timeouts,
                };
                let slurm = SlurmCommands {
                    partition: self.backend.partition.clone(),
                    qos: self.backend.qos.clone(),
                    account: self.backend.account.clone(),
                };
                Ok(Arc::new(JobQueueBackend::new(cfg, slurm)))
            }
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

fn split_command(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

fn parse_http_addr(url: &str) -> Result<SocketAddr, ConfigError> {
    let rest = url
        .strip_prefix("http://")
        .ok_or_else(|| ConfigError::InvalidUrl(url.to_string()))?;
    let host_port = rest.trim_end_matches('/');
    host_port
        .parse()
        .map_err(|_| ConfigError::InvalidUrl(url.to_string()))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

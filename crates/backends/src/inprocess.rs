// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process backend: schedulers and workers are tokio tasks.
//!
//! Each "process" registers itself with the gateway's connection registrar
//! over HTTP exactly like an external one would, so the full handshake path
//! is exercised without spawning anything.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use gridway_core::{Addresses, BackendState, ClusterInfo};
use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::contract::{BackendError, BackendTimeouts, ClusterBackend, StateStream};

pub struct InProcessBackend {
    api_url: String,
    timeouts: BackendTimeouts,
    client: reqwest::Client,
    schedulers: Mutex<HashMap<String, JoinHandle<()>>>,
    workers: Mutex<HashMap<(String, String), JoinHandle<()>>>,
}

impl InProcessBackend {
    pub fn new(api_url: impl Into<String>, timeouts: BackendTimeouts) -> Self {
        Self {
            api_url: api_url.into(),
            timeouts,
            client: reqwest::Client::new(),
            schedulers: Mutex::new(HashMap::new()),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live in-process schedulers (test observability).
    pub fn active_schedulers(&self) -> usize {
        self.schedulers.lock().len()
    }

    fn spawn_scheduler(&self, cluster: &ClusterInfo) {
        let url = format!("{}/clusters/{}/addresses", self.api_url, cluster.name);
        let token = cluster.api_token.clone();
        let name = cluster.name.clone();
        let client = self.client.clone();
        let addresses = Addresses {
            scheduler_address: format!("inproc://{name}"),
            dashboard_address: String::new(),
            api_address: format!("inproc://{name}/api"),
        };
        let handle = tokio::spawn(async move {
            phone_home(&client, &url, &token, Some(&addresses)).await;
            // The "scheduler" then idles until stopped.
            std::future::pending::<()>().await;
        });
        self.schedulers.lock().insert(cluster.name.clone(), handle);
    }

    fn spawn_worker(&self, worker: &str, cluster: &ClusterInfo) {
        let url = format!(
            "{}/clusters/{}/workers/{}",
            self.api_url, cluster.name, worker
        );
        let token = cluster.api_token.clone();
        let client = self.client.clone();
        let handle = tokio::spawn(async move {
            phone_home(&client, &url, &token, None).await;
            std::future::pending::<()>().await;
        });
        self.workers
            .lock()
            .insert((cluster.name.clone(), worker.to_string()), handle);
    }
}

/// PUT the registration, retrying briefly so a registrar that is still
/// binding does not fail the handshake.
async fn phone_home(client: &reqwest::Client, url: &str, token: &str, body: Option<&Addresses>) {
    for attempt in 0..10u32 {
        let mut req = client
            .put(url)
            .header("Authorization", format!("token {token}"));
        if let Some(addresses) = body {
            req = req.json(addresses);
        }
        match req.send().await {
            Ok(resp) if resp.status().is_success() => return,
            Ok(resp) => {
                debug!(url, status = %resp.status(), "registration rejected");
                return;
            }
            Err(err) => debug!(url, attempt, error = %err, "registration attempt failed"),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[async_trait]
impl ClusterBackend for InProcessBackend {
    fn timeouts(&self) -> BackendTimeouts {
        self.timeouts
    }

    fn start_cluster(self: Arc<Self>, cluster: ClusterInfo) -> StateStream {
        Box::pin(try_stream! {
            self.spawn_scheduler(&cluster);
            let mut state = BackendState::new();
            state.insert("task".into(), json!(cluster.name));
            yield state;
        })
    }

    async fn stop_cluster(
        &self,
        cluster: &ClusterInfo,
        _state: &BackendState,
    ) -> Result<(), BackendError> {
        if let Some(handle) = self.schedulers.lock().remove(&cluster.name) {
            handle.abort();
        }
        let mut workers = self.workers.lock();
        workers.retain(|(cluster_name, _), handle| {
            if cluster_name == &cluster.name {
                handle.abort();
                false
            } else {
                true
            }
        });
        Ok(())
    }

    fn start_worker(
        self: Arc<Self>,
        worker: String,
        cluster: ClusterInfo,
        _cluster_state: BackendState,
    ) -> StateStream {
        Box::pin(try_stream! {
            self.spawn_worker(&worker, &cluster);
            let mut state = BackendState::new();
            state.insert("task".into(), json!(worker));
            yield state;
        })
    }

    async fn stop_worker(
        &self,
        worker: &str,
        _worker_state: &BackendState,
        cluster: &ClusterInfo,
        _cluster_state: &BackendState,
    ) -> Result<(), BackendError> {
        let key = (cluster.name.clone(), worker.to_string());
        if let Some(handle) = self.workers.lock().remove(&key) {
            handle.abort();
        }
        Ok(())
    }

    async fn check_cluster(&self, cluster: &ClusterInfo, _state: &BackendState) -> bool {
        self.schedulers.lock().contains_key(&cluster.name)
    }

    async fn check_worker(
        &self,
        worker: &str,
        _worker_state: &BackendState,
        cluster: &ClusterInfo,
        _cluster_state: &BackendState,
    ) -> bool {
        self.workers
            .lock()
            .contains_key(&(cluster.name.clone(), worker.to_string()))
    }
}

impl Drop for InProcessBackend {
    fn drop(&mut self) {
        for (_, handle) in self.schedulers.lock().drain() {
            handle.abort();
        }
        for (_, handle) in self.workers.lock().drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
#[path = "inprocess_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pending connect slots.
//!
//! Each starting cluster and worker gets a watch slot the registrar resolves
//! when the process phones home. The engine awaits the slot alongside its
//! connect deadline; whichever fires first wins, and a confirmation that
//! arrives after cleanup has begun is ignored.

use std::collections::HashMap;

use gridway_core::Addresses;
use parking_lot::Mutex;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ClusterConnect {
    Pending,
    Connected(Addresses),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WorkerConnect {
    Pending,
    Connected,
    /// The worker process reported itself gone (or never arrived).
    Gone,
    Failed(String),
}

#[derive(Default)]
pub(crate) struct ConnectHub {
    clusters: Mutex<HashMap<String, watch::Sender<ClusterConnect>>>,
    workers: Mutex<HashMap<(String, String), watch::Sender<WorkerConnect>>>,
}

impl ConnectHub {
    pub fn register_cluster(&self, name: &str) -> watch::Receiver<ClusterConnect> {
        let (tx, rx) = watch::channel(ClusterConnect::Pending);
        self.clusters.lock().insert(name.to_string(), tx);
        rx
    }

    pub fn subscribe_cluster(&self, name: &str) -> Option<watch::Receiver<ClusterConnect>> {
        self.clusters.lock().get(name).map(|tx| tx.subscribe())
    }

    /// Resolve a pending cluster slot with its addresses. Returns false for
    /// unknown slots and for slots already resolved (late confirmation).
    pub fn confirm_cluster(&self, name: &str, addresses: Addresses) -> bool {
        self.resolve_cluster(name, ClusterConnect::Connected(addresses))
    }

    /// Fail a pending cluster slot. No effect once resolved.
    pub fn fail_cluster(&self, name: &str, reason: &str) -> bool {
        self.resolve_cluster(name, ClusterConnect::Failed(reason.to_string()))
    }

    fn resolve_cluster(&self, name: &str, value: ClusterConnect) -> bool {
        let clusters = self.clusters.lock();
        let Some(tx) = clusters.get(name) else {
            return false;
        };
        tx.send_if_modified(|current| {
            if *current == ClusterConnect::Pending {
                *current = value;
                true
            } else {
                false
            }
        })
    }

    pub fn remove_cluster(&self, name: &str) {
        self.clusters.lock().remove(name);
    }

    pub fn register_worker(&self, cluster: &str, worker: &str) -> watch::Receiver<WorkerConnect> {
        let (tx, rx) = watch::channel(WorkerConnect::Pending);
        self.workers
            .lock()
            .insert((cluster.to_string(), worker.to_string()), tx);
        rx
    }

    pub fn subscribe_worker(
        &self,
        cluster: &str,
        worker: &str,
    ) -> Option<watch::Receiver<WorkerConnect>> {
        self.workers
            .lock()
            .get(&(cluster.to_string(), worker.to_string()))
            .map(|tx| tx.subscribe())
    }

    /// Resolve a pending worker slot. Returns false once resolved.
    pub fn confirm_worker(&self, cluster: &str, worker: &str) -> bool {
        let workers = self.workers.lock();
        let Some(tx) = workers.get(&(cluster.to_string(), worker.to_string())) else {
            return false;
        };
        tx.send_if_modified(|current| {
            if *current == WorkerConnect::Pending {
                *current = WorkerConnect::Connected;
                true
            } else {
                false
            }
        })
    }

    /// Mark a worker gone. Unlike confirmation this always lands: it is
    /// meaningful both while connecting (a failure) and while running (a
    /// death notice).
    pub fn worker_gone(&self, cluster: &str, worker: &str) -> bool {
        let workers = self.workers.lock();
        let Some(tx) = workers.get(&(cluster.to_string(), worker.to_string())) else {
            return false;
        };
        tx.send_replace(WorkerConnect::Gone);
        true
    }

    /// Fail a pending worker slot. No effect once resolved.
    pub fn fail_worker(&self, cluster: &str, worker: &str, reason: &str) -> bool {
        let workers = self.workers.lock();
        let Some(tx) = workers.get(&(cluster.to_string(), worker.to_string())) else {
            return false;
        };
        tx.send_if_modified(|current| {
            if *current == WorkerConnect::Pending {
                *current = WorkerConnect::Failed(reason.to_string());
                true
            } else {
                false
            }
        })
    }

    pub fn remove_worker(&self, cluster: &str, worker: &str) {
        self.workers
            .lock()
            .remove(&(cluster.to_string(), worker.to_string()));
    }
}

#[cfg(test)]
#[path = "connect_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster, worker, and user records.
//!
//! The lifecycle engine exclusively owns the mutable records for the duration
//! of a running gateway; the persistent store owns their durable image.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::{ClusterStatus, WorkerStatus};
use crate::tls::KeypairGenerator;

/// Opaque backend state blob, e.g. `{"job_id": "1234"}` or `{"pid": 4321}`.
///
/// Backends yield snapshots of this map during staged starts; the engine
/// persists every snapshot before driving the next stage so that cleanup
/// always targets the last externally observable side effect.
pub type BackendState = serde_json::Map<String, serde_json::Value>;

/// The address triple a started scheduler reports back to the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addresses {
    pub scheduler_address: String,
    pub dashboard_address: String,
    pub api_address: String,
}

/// A gateway user, derived from authentication. Owns zero or more clusters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
}

impl User {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Immutable cluster identity handed to backends.
///
/// The `api_token` is the only credential that may mark the cluster's
/// endpoints via the connection registrar.
#[derive(Debug, Clone)]
pub struct ClusterInfo {
    pub name: String,
    pub owner: String,
    pub api_token: String,
    pub tls_cert: Vec<u8>,
    pub tls_key: Vec<u8>,
}

/// One compute process attached to a cluster's scheduler.
#[derive(Debug, Clone)]
pub struct Worker {
    pub name: String,
    /// Name of the owning cluster (non-owning back-reference).
    pub cluster: String,
    pub status: WorkerStatus,
    pub state: BackendState,
}

impl Worker {
    pub fn new(cluster: &str) -> Self {
        Self {
            name: Uuid::new_v4().simple().to_string(),
            cluster: cluster.to_string(),
            status: WorkerStatus::Starting,
            state: BackendState::new(),
        }
    }

    /// Apply a status transition, rejecting moves the state machine forbids.
    pub fn advance(&mut self, next: WorkerStatus) -> bool {
        if self.status.can_advance_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

/// A scheduler process plus its workers, owned by a user, with a stable name.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub name: String,
    pub owner: String,
    pub api_token: String,
    pub tls_cert: Vec<u8>,
    pub tls_key: Vec<u8>,
    pub status: ClusterStatus,
    pub state: BackendState,
    pub addresses: Option<Addresses>,
    pub workers: HashMap<String, Worker>,
}

impl Cluster {
    /// Mint a new cluster record in STARTING with a fresh name, api token,
    /// and TLS keypair.
    pub fn new(owner: &str, keypairs: &dyn KeypairGenerator) -> Self {
        let name = Uuid::new_v4().simple().to_string();
        let keypair = keypairs.new_keypair(&name);
        Self {
            name,
            owner: owner.to_string(),
            api_token: Uuid::new_v4().simple().to_string(),
            tls_cert: keypair.cert,
            tls_key: keypair.key,
            status: ClusterStatus::Starting,
            state: BackendState::new(),
            addresses: None,
            workers: HashMap::new(),
        }
    }

    /// The immutable identity handed to backends.
    pub fn info(&self) -> ClusterInfo {
        ClusterInfo {
            name: self.name.clone(),
            owner: self.owner.clone(),
            api_token: self.api_token.clone(),
            tls_cert: self.tls_cert.clone(),
            tls_key: self.tls_key.clone(),
        }
    }

    /// Apply a status transition, rejecting moves the state machine forbids.
    pub fn advance(&mut self, next: ClusterStatus) -> bool {
        if self.status.can_advance_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Workers that have not reached a terminal status.
    pub fn active_workers(&self) -> impl Iterator<Item = &Worker> {
        self.workers.values().filter(|w| !w.status.is_terminal())
    }

    /// A cluster is destroyable once it and all of its workers are terminal.
    pub fn is_settled(&self) -> bool {
        self.status.is_terminal() && self.active_workers().next().is_none()
    }
}

#[cfg(test)]
#[path = "cluster_tests.rs"]
mod tests;

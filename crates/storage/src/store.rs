// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite-backed store for cluster and worker records.
//!
//! Every mutation is a single-row upsert; the lifecycle engine holds the
//! cross-row invariants, so no multi-row transactions are needed. Secret
//! columns go through the [`KeyChain`]; status and endpoint columns are
//! cleartext so an operator can inspect the database directly.

use std::path::PathBuf;
use std::str::FromStr;

use gridway_core::{Addresses, BackendState, Cluster, ClusterStatus, Worker, WorkerStatus};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::debug;

use crate::secrets::{KeyChain, SecretsError, ENCRYPT_KEYS_ENV};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid db_url: {0} (expected the sqlite:// family)")]
    InvalidUrl(String),

    #[error("a non-volatile db_url requires encryption keys, set {ENCRYPT_KEYS_ENV}")]
    MissingKeys,

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error(transparent)]
    Secrets(#[from] SecretsError),

    #[error("corrupt record for {entity}: {reason}")]
    Corrupt { entity: String, reason: String },
}

/// Parsed `db_url` configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbUrl {
    /// `sqlite://` or `sqlite://:memory:` — volatile, lost on restart.
    Memory,
    /// `sqlite:///path/to/gateway.sqlite` — durable.
    File(PathBuf),
}

impl DbUrl {
    pub fn parse(url: &str) -> Result<Self, StoreError> {
        let rest = url
            .strip_prefix("sqlite://")
            .ok_or_else(|| StoreError::InvalidUrl(url.to_string()))?;
        match rest {
            "" | ":memory:" => Ok(Self::Memory),
            path => Ok(Self::File(PathBuf::from(path))),
        }
    }

    /// Volatile stores lose all records on restart, which disables durable
    /// recovery and lifts the encryption-key requirement.
    pub fn is_volatile(&self) -> bool {
        matches!(self, Self::Memory)
    }
}

/// Handle to the persistent store. Cheap to clone; all clones share one pool.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    keys: KeyChain,
    volatile: bool,
}

impl Store {
    /// Open the store and create the schema.
    ///
    /// An empty key chain is only accepted for volatile stores; values are
    /// then written in cleartext, which is fine because they never touch
    /// disk.
    pub async fn connect(url: &DbUrl, keys: KeyChain) -> Result<Self, StoreError> {
        if !url.is_volatile() && keys.is_empty() {
            return Err(StoreError::MissingKeys);
        }

        let options = match url {
            DbUrl::Memory => SqliteConnectOptions::new().in_memory(true),
            DbUrl::File(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true),
        };

        // One connection: serializes row upserts and keeps an in-memory
        // database from splitting into one database per connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            keys,
            volatile: url.is_volatile(),
        };
        store.create_schema().await?;
        debug!(volatile = store.volatile, "store ready");
        Ok(store)
    }

    pub fn is_volatile(&self) -> bool {
        self.volatile
    }

    async fn create_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS clusters (
                name TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                status TEXT NOT NULL,
                api_token BLOB NOT NULL,
                tls_cert BLOB NOT NULL,
                tls_key BLOB NOT NULL,
                state BLOB NOT NULL,
                scheduler_address TEXT,
                dashboard_address TEXT,
                api_address TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS workers (
                cluster_name TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                state BLOB NOT NULL,
                PRIMARY KEY (cluster_name, name)
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
        if self.keys.is_empty() {
            return Ok(plaintext.to_vec());
        }
        Ok(self.keys.encrypt(plaintext)?)
    }

    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, StoreError> {
        if self.keys.is_empty() {
            return Ok(sealed.to_vec());
        }
        Ok(self.keys.decrypt(sealed)?)
    }

    fn seal_state(&self, state: &BackendState) -> Result<Vec<u8>, StoreError> {
        let json = serde_json::to_vec(state).map_err(|e| StoreError::Corrupt {
            entity: "state".into(),
            reason: e.to_string(),
        })?;
        self.seal(&json)
    }

    fn open_state(&self, entity: &str, sealed: &[u8]) -> Result<BackendState, StoreError> {
        let json = self.open(sealed)?;
        serde_json::from_slice(&json).map_err(|e| StoreError::Corrupt {
            entity: entity.to_string(),
            reason: e.to_string(),
        })
    }

    /// Insert a freshly created cluster. Must happen before any externally
    /// observable side effect referring to it.
    pub async fn insert_cluster(&self, cluster: &Cluster) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO clusters
                (name, owner, status, api_token, tls_cert, tls_key, state)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&cluster.name)
        .bind(&cluster.owner)
        .bind(cluster.status.as_str())
        .bind(self.seal(cluster.api_token.as_bytes())?)
        .bind(&cluster.tls_cert)
        .bind(self.seal(&cluster.tls_key)?)
        .bind(self.seal_state(&cluster.state)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_cluster_status(
        &self,
        name: &str,
        status: ClusterStatus,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE clusters SET status = ?1 WHERE name = ?2")
            .bind(status.as_str())
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_cluster_state(
        &self,
        name: &str,
        state: &BackendState,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE clusters SET state = ?1 WHERE name = ?2")
            .bind(self.seal_state(state)?)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_cluster_addresses(
        &self,
        name: &str,
        addresses: &Addresses,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE clusters
             SET scheduler_address = ?1, dashboard_address = ?2, api_address = ?3
             WHERE name = ?4",
        )
        .bind(&addresses.scheduler_address)
        .bind(&addresses.dashboard_address)
        .bind(&addresses.api_address)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert a freshly created worker. Must happen before its submission.
    pub async fn insert_worker(&self, worker: &Worker) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO workers (cluster_name, name, status, state)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&worker.cluster)
        .bind(&worker.name)
        .bind(worker.status.as_str())
        .bind(self.seal_state(&worker.state)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_worker_status(
        &self,
        cluster: &str,
        name: &str,
        status: WorkerStatus,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE workers SET status = ?1 WHERE cluster_name = ?2 AND name = ?3")
            .bind(status.as_str())
            .bind(cluster)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_worker_state(
        &self,
        cluster: &str,
        name: &str,
        state: &BackendState,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE workers SET state = ?1 WHERE cluster_name = ?2 AND name = ?3")
            .bind(self.seal_state(state)?)
            .bind(cluster)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fetch one cluster with all of its workers, or `None` if unknown.
    pub async fn get_cluster(&self, name: &str) -> Result<Option<Cluster>, StoreError> {
        let row = sqlx::query("SELECT * FROM clusters WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.decode_cluster(&row).await?)),
            None => Ok(None),
        }
    }

    /// All clusters whose status is non-terminal, with their workers.
    pub async fn active_clusters(&self) -> Result<Vec<Cluster>, StoreError> {
        let rows = sqlx::query("SELECT * FROM clusters WHERE status NOT IN ('STOPPED', 'FAILED')")
            .fetch_all(&self.pool)
            .await?;
        let mut clusters = Vec::with_capacity(rows.len());
        for row in rows {
            clusters.push(self.decode_cluster(&row).await?);
        }
        Ok(clusters)
    }

    async fn decode_cluster(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Cluster, StoreError> {
        let name: String = row.try_get("name")?;
        let corrupt = |reason: String| StoreError::Corrupt {
            entity: format!("cluster {name}"),
            reason,
        };

        let status_raw: String = row.try_get("status")?;
        let status =
            ClusterStatus::from_str(&status_raw).map_err(|e| corrupt(e.to_string()))?;
        let token_sealed: Vec<u8> = row.try_get("api_token")?;
        let api_token = String::from_utf8(self.open(&token_sealed)?)
            .map_err(|e| corrupt(e.to_string()))?;
        let state_sealed: Vec<u8> = row.try_get("state")?;
        let state = self.open_state(&format!("cluster {name}"), &state_sealed)?;
        let tls_key_sealed: Vec<u8> = row.try_get("tls_key")?;

        let scheduler_address: Option<String> = row.try_get("scheduler_address")?;
        let addresses = scheduler_address.map(|scheduler_address| {
            Ok::<_, sqlx::Error>(Addresses {
                scheduler_address,
                dashboard_address: row
                    .try_get::<Option<String>, _>("dashboard_address")?
                    .unwrap_or_default(),
                api_address: row
                    .try_get::<Option<String>, _>("api_address")?
                    .unwrap_or_default(),
            })
        });
        let addresses = addresses.transpose()?;

        let mut cluster = Cluster {
            owner: row.try_get("owner")?,
            api_token,
            tls_cert: row.try_get("tls_cert")?,
            tls_key: self.open(&tls_key_sealed)?,
            status,
            state,
            addresses,
            workers: Default::default(),
            name: name.clone(),
        };

        for worker in self.workers_of(&name).await? {
            cluster.workers.insert(worker.name.clone(), worker);
        }
        Ok(cluster)
    }

    /// All workers of a cluster, any status.
    pub async fn workers_of(&self, cluster: &str) -> Result<Vec<Worker>, StoreError> {
        let rows = sqlx::query("SELECT * FROM workers WHERE cluster_name = ?1")
            .bind(cluster)
            .fetch_all(&self.pool)
            .await?;
        let mut workers = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("name")?;
            let status_raw: String = row.try_get("status")?;
            let status = WorkerStatus::from_str(&status_raw).map_err(|e| StoreError::Corrupt {
                entity: format!("worker {name}"),
                reason: e.to_string(),
            })?;
            let state_sealed: Vec<u8> = row.try_get("state")?;
            workers.push(Worker {
                cluster: row.try_get("cluster_name")?,
                state: self.open_state(&format!("worker {name}"), &state_sealed)?,
                status,
                name,
            });
        }
        Ok(workers)
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

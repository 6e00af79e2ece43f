// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gateway assembly: config → store → backend → engine → registrar, with
//! recovery between store and serving.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use gridway_core::EphemeralKeypairs;
use gridway_storage::{Store, StoreError};
use thiserror::Error;
use tracing::{error, info};

use crate::config::{ConfigError, GatewayConfig};
use crate::engine::{EngineConfig, EngineError, LifecycleEngine};
use crate::task_pool::TaskPool;
use crate::{recovery, registrar};

/// Grace budget for background tasks at shutdown.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("recovery failed: {0}")]
    Recovery(#[from] EngineError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

/// A started gateway. Dropping it does not stop anything; call
/// [`shutdown`](Self::shutdown).
pub struct Gateway {
    pub engine: Arc<LifecycleEngine>,
    pool: Arc<TaskPool>,
    api_url: String,
}

impl Gateway {
    /// Validate configuration, open the store, bind the registrar, run
    /// recovery, and start serving. Any failure here is fatal to startup.
    pub async fn start(config: GatewayConfig) -> Result<Self, GatewayError> {
        let validated = config.validate()?;

        let store = Store::connect(&validated.db_url, validated.keys).await?;

        // Bind before recovery so a bad address fails fast.
        let listener = tokio::net::TcpListener::bind(validated.private_addr)
            .await
            .map_err(|source| GatewayError::Bind {
                addr: validated.private_addr,
                source,
            })?;
        let bound = listener
            .local_addr()
            .map_err(|source| GatewayError::Bind {
                addr: validated.private_addr,
                source,
            })?;
        let api_url = format!("http://{bound}");

        let backend = config.build_backend(&api_url)?;
        let pool = Arc::new(TaskPool::new(CLOSE_GRACE));
        let engine = LifecycleEngine::new(
            store,
            backend,
            Arc::new(EphemeralKeypairs),
            pool.clone(),
            EngineConfig {
                check_cluster_timeout: Duration::from_secs_f64(config.check_cluster_timeout),
                stop_clusters_on_shutdown: config.stop_clusters_on_shutdown,
            },
        );

        recovery::recover(&engine).await?;

        let serve_engine = engine.clone();
        let shutdown = pool.cancellation_token();
        pool.spawn("registrar", async move {
            if let Err(err) = registrar::serve(serve_engine, listener, shutdown).await {
                error!(error = %err, "registrar terminated");
            }
        });

        info!(api_url = %api_url, "gateway started");
        Ok(Self {
            engine,
            pool,
            api_url,
        })
    }

    /// The bound registrar base URL (resolves `:0` port requests).
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Orderly shutdown: stop (or detach) clusters, then close the pool.
    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
        self.pool.close().await;
        info!("gateway shutdown complete");
    }
}

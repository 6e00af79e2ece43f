// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `gridwayd` entry point.
//!
//! Usage: `gridwayd [config.toml]`. Exits 1 on any startup error (invalid
//! configuration, bind failure, recovery failure) and 0 on clean shutdown.

use std::path::PathBuf;
use std::process::ExitCode;

use gridway_gateway::{Gateway, GatewayConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => match GatewayConfig::from_file(&path) {
            Ok(config) => config,
            Err(err) => {
                error!(error = %err, "failed to load configuration");
                return ExitCode::from(1);
            }
        },
        None => GatewayConfig::default(),
    };

    let gateway = match Gateway::start(config).await {
        Ok(gateway) => gateway,
        Err(err) => {
            error!(error = %err, "gateway startup failed");
            return ExitCode::from(1);
        }
    };

    wait_for_signal().await;
    gateway.shutdown().await;
    ExitCode::SUCCESS
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let term = async {
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await
            }
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received interrupt, shutting down"),
        _ = term => info!("received SIGTERM, shutting down"),
    }
}

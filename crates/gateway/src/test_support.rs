// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for engine, registrar, and recovery tests.

use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use gridway_backends::{BackendError, BackendTimeouts, ClusterBackend, StateStream};
use gridway_core::{Addresses, BackendState, ClusterInfo, EphemeralKeypairs};
use gridway_storage::{DbUrl, KeyChain, Store};
use parking_lot::Mutex;
use serde_json::json;

use crate::engine::{EngineConfig, LifecycleEngine};
use crate::task_pool::TaskPool;

pub(crate) fn state_of(pairs: &[(&str, serde_json::Value)]) -> BackendState {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub(crate) fn addresses() -> Addresses {
    Addresses {
        scheduler_address: "tls://10.0.0.1:8786".into(),
        dashboard_address: "http://10.0.0.1:8787".into(),
        api_address: "http://10.0.0.1:8788".into(),
    }
}

/// One step of a scripted staged start.
#[derive(Clone)]
pub(crate) enum Step {
    Yield(BackendState),
    Sleep(Duration),
    Fail(&'static str),
}

pub(crate) fn yield_state(pairs: &[(&str, serde_json::Value)]) -> Step {
    Step::Yield(state_of(pairs))
}

/// The classic three-stage slow start: yield, pause, yield, pause, yield.
pub(crate) fn slow_stages(pause: Duration) -> Vec<Step> {
    vec![
        yield_state(&[("state_1", json!(1))]),
        Step::Sleep(pause),
        yield_state(&[("state_2", json!(2))]),
        Step::Sleep(pause),
        yield_state(&[("state_3", json!(3))]),
    ]
}

/// A start that fails after yielding `fail_stage` snapshots.
pub(crate) fn failing_stages(fail_stage: usize) -> Vec<Step> {
    let mut steps = Vec::new();
    for i in 0..3 {
        if i == fail_stage {
            steps.push(Step::Fail("Oh No"));
            break;
        }
        steps.push(yield_state(&[("i", json!(i))]));
    }
    steps
}

/// Pause-first stages, so a cancel can land before the first snapshot.
pub(crate) fn paced_stages(pause: Duration) -> Vec<Step> {
    vec![
        Step::Sleep(pause),
        yield_state(&[("state_1", json!(1))]),
        Step::Sleep(pause),
        yield_state(&[("state_2", json!(2))]),
        Step::Sleep(pause),
        yield_state(&[("state_3", json!(3))]),
    ]
}

pub(crate) fn instant_stage() -> Vec<Step> {
    vec![yield_state(&[("ok", json!(1))])]
}

#[derive(Default)]
pub(crate) struct Recording {
    pub stop_cluster_state: Mutex<Option<BackendState>>,
    pub stop_worker_state: Mutex<Option<BackendState>>,
    pub stop_cluster_calls: Mutex<usize>,
}

/// Backend whose staged starts replay a fixed script, recording the state
/// each stop call receives.
pub(crate) struct ScriptedBackend {
    pub cluster_script: Vec<Step>,
    pub worker_script: Vec<Step>,
    pub timeouts: BackendTimeouts,
    pub recorded: Arc<Recording>,
    /// What the recovery probes report.
    pub healthy: bool,
}

impl ScriptedBackend {
    pub fn new(cluster_script: Vec<Step>, timeouts: BackendTimeouts) -> Self {
        Self {
            cluster_script,
            worker_script: instant_stage(),
            timeouts,
            recorded: Arc::new(Recording::default()),
            healthy: false,
        }
    }

    pub fn with_worker_script(mut self, worker_script: Vec<Step>) -> Self {
        self.worker_script = worker_script;
        self
    }

    pub fn reporting_healthy(mut self) -> Self {
        self.healthy = true;
        self
    }
}

fn scripted_stream(script: Vec<Step>) -> StateStream {
    Box::pin(try_stream! {
        for step in script {
            match step {
                Step::Yield(state) => yield state,
                Step::Sleep(pause) => tokio::time::sleep(pause).await,
                Step::Fail(message) => {
                    Err(BackendError::StartFailed(message.to_string()))?;
                }
            }
        }
    })
}

#[async_trait]
impl ClusterBackend for ScriptedBackend {
    fn timeouts(&self) -> BackendTimeouts {
        self.timeouts
    }

    fn start_cluster(self: Arc<Self>, _cluster: ClusterInfo) -> StateStream {
        scripted_stream(self.cluster_script.clone())
    }

    async fn stop_cluster(
        &self,
        _cluster: &ClusterInfo,
        state: &BackendState,
    ) -> Result<(), BackendError> {
        *self.recorded.stop_cluster_state.lock() = Some(state.clone());
        *self.recorded.stop_cluster_calls.lock() += 1;
        Ok(())
    }

    fn start_worker(
        self: Arc<Self>,
        _worker: String,
        _cluster: ClusterInfo,
        _cluster_state: BackendState,
    ) -> StateStream {
        scripted_stream(self.worker_script.clone())
    }

    async fn stop_worker(
        &self,
        _worker: &str,
        worker_state: &BackendState,
        _cluster: &ClusterInfo,
        _cluster_state: &BackendState,
    ) -> Result<(), BackendError> {
        *self.recorded.stop_worker_state.lock() = Some(worker_state.clone());
        Ok(())
    }

    async fn check_cluster(&self, _cluster: &ClusterInfo, _state: &BackendState) -> bool {
        self.healthy
    }

    async fn check_worker(
        &self,
        _worker: &str,
        _worker_state: &BackendState,
        _cluster: &ClusterInfo,
        _cluster_state: &BackendState,
    ) -> bool {
        self.healthy
    }
}

pub(crate) struct TestHarness {
    pub engine: Arc<LifecycleEngine>,
    pub pool: Arc<TaskPool>,
    pub recorded: Arc<Recording>,
}

pub(crate) async fn harness(backend: ScriptedBackend) -> TestHarness {
    harness_with(backend, None).await
}

pub(crate) async fn harness_with(
    backend: ScriptedBackend,
    store: Option<Store>,
) -> TestHarness {
    let store = match store {
        Some(store) => store,
        None => Store::connect(&DbUrl::Memory, KeyChain::default())
            .await
            .unwrap_or_else(|_| unreachable!("in-memory store always connects")),
    };
    let recorded = backend.recorded.clone();
    let pool = Arc::new(TaskPool::new(Duration::from_secs(2)));
    let engine = LifecycleEngine::new(
        store,
        Arc::new(backend),
        Arc::new(EphemeralKeypairs),
        pool.clone(),
        EngineConfig {
            check_cluster_timeout: Duration::from_secs(1),
            stop_clusters_on_shutdown: true,
        },
    );
    TestHarness {
        engine,
        pool,
        recorded,
    }
}

/// Engine over an arbitrary backend and store, for recovery scenarios.
pub(crate) async fn engine_with_backend(
    backend: Arc<dyn ClusterBackend>,
    store: Store,
    stop_clusters_on_shutdown: bool,
) -> (Arc<LifecycleEngine>, Arc<TaskPool>) {
    let pool = Arc::new(TaskPool::new(Duration::from_secs(2)));
    let engine = LifecycleEngine::new(
        store,
        backend,
        Arc::new(EphemeralKeypairs),
        pool.clone(),
        EngineConfig {
            check_cluster_timeout: Duration::from_secs(1),
            stop_clusters_on_shutdown,
        },
    );
    (engine, pool)
}

/// Short-budget timeouts with generous connect budgets, overridden per test.
pub(crate) fn timeouts(cluster_start: f64, cluster_connect: f64) -> BackendTimeouts {
    BackendTimeouts {
        cluster_start: Duration::from_secs_f64(cluster_start),
        cluster_connect: Duration::from_secs_f64(cluster_connect),
        worker_start: Duration::from_secs(5),
        worker_connect: Duration::from_secs(5),
    }
}

pub(crate) fn worker_timeouts(worker_start: f64, worker_connect: f64) -> BackendTimeouts {
    BackendTimeouts {
        cluster_start: Duration::from_secs(5),
        cluster_connect: Duration::from_secs(5),
        worker_start: Duration::from_secs_f64(worker_start),
        worker_connect: Duration::from_secs_f64(worker_connect),
    }
}

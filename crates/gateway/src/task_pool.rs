// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide registry of background tasks.
//!
//! Every supervising task is spawned through the pool. `close()` signals
//! cancellation to all of them, awaits each under a shared grace budget, and
//! aborts whatever ignores the signal. After `close()` returns, no tracked
//! task is still executing user code.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct TaskPool {
    token: CancellationToken,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
    closed: AtomicBool,
    grace: Duration,
}

impl TaskPool {
    pub fn new(grace: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            grace,
        }
    }

    /// A child token that fires when the pool closes. Tasks observe
    /// cancellation through this.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Spawn and track a task. Finished tasks are pruned opportunistically.
    pub fn spawn(&self, name: &str, fut: impl Future<Output = ()> + Send + 'static) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|(_, handle)| !handle.is_finished());
        tasks.push((name.to_string(), tokio::spawn(fut)));
    }

    /// Number of tracked tasks still running.
    pub fn live_tasks(&self) -> usize {
        self.tasks
            .lock()
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .count()
    }

    /// Cancel every tracked task, await them within the grace budget, abort
    /// and log the ones that ignore cancellation. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.token.cancel();

        let drained: Vec<_> = self.tasks.lock().drain(..).collect();
        if drained.is_empty() {
            return;
        }
        debug!(tasks = drained.len(), "closing task pool");

        let deadline = tokio::time::Instant::now() + self.grace;
        for (name, mut handle) in drained {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(_) => {}
                Err(_) => {
                    warn!(task = %name, "task ignored cancellation past the grace; abandoning");
                    handle.abort();
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "task_pool_tests.rs"]
mod tests;

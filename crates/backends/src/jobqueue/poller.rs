// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pending-interest registry for the aggregate status poller.
//!
//! `is_job_running` hands out a slot per job id; the slot is shared between
//! every caller interested in the same job and is held weakly here, so
//! interest that nobody is awaiting disappears between ticks on its own.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;

/// One-shot verdict slot for a single job id.
pub(crate) struct JobSlot {
    tx: watch::Sender<Option<bool>>,
}

impl JobSlot {
    fn new() -> Arc<Self> {
        let (tx, _) = watch::channel(None);
        Arc::new(Self { tx })
    }

    pub(crate) fn resolve(&self, running: bool) {
        self.tx.send_replace(Some(running));
    }

    /// Await the verdict. Resolves `false` if the poller disappears.
    pub(crate) async fn wait(self: Arc<Self>) -> bool {
        let mut rx = self.tx.subscribe();
        let result = match rx.wait_for(|verdict| verdict.is_some()).await {
            Ok(verdict) => verdict.unwrap_or(false),
            Err(_) => false,
        };
        result
    }
}

/// Weak-valued map from job id to its verdict slot.
#[derive(Default)]
pub(crate) struct PendingJobs {
    slots: Mutex<HashMap<String, Weak<JobSlot>>>,
}

impl PendingJobs {
    /// Install-or-return the shared slot for `job_id`.
    pub(crate) fn watch(&self, job_id: &str) -> Arc<JobSlot> {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(job_id).and_then(Weak::upgrade) {
            return slot;
        }
        let slot = JobSlot::new();
        slots.insert(job_id.to_string(), Arc::downgrade(&slot));
        slot
    }

    /// Snapshot the live entries, dropping ones nobody awaits anymore.
    pub(crate) fn snapshot(&self) -> Vec<(String, Arc<JobSlot>)> {
        let mut slots = self.slots.lock();
        let mut live = Vec::with_capacity(slots.len());
        slots.retain(|job_id, weak| match weak.upgrade() {
            Some(slot) => {
                live.push((job_id.clone(), slot));
                true
            }
            None => false,
        });
        live
    }

    /// Resolve and retire a slot after a verdict.
    pub(crate) fn resolve(&self, job_id: &str, running: bool) {
        if let Some(weak) = self.slots.lock().remove(job_id) {
            if let Some(slot) = weak.upgrade() {
                slot.resolve(running);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

#[cfg(test)]
#[path = "poller_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster manager backends.
//!
//! The lifecycle engine drives every backend through the same
//! [`ClusterBackend`] contract: a staged, interruptible start that yields
//! state snapshots, an idempotent stop that tolerates partial state, and
//! configured timeouts. Variants:
//!
//! - [`InProcessBackend`] — schedulers and workers are tokio tasks inside the
//!   gateway process; development and tests.
//! - [`LocalBackend`] — schedulers and workers are local subprocesses owned
//!   by the gateway user.
//! - [`JobQueueBackend`] — jobs submitted to an external batch scheduler via
//!   a trusted per-user launcher; [`jobqueue::SlurmCommands`] is the shipped
//!   variant.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

mod contract;
mod inprocess;
pub mod jobqueue;
mod local;

pub use contract::{
    state_job_id, BackendError, BackendTimeouts, ClusterBackend, JobWatch, StateStream,
};
pub use inprocess::InProcessBackend;
pub use jobqueue::{JobQueueBackend, JobQueueCommands, JobQueueConfig};
pub use local::{LocalBackend, LocalConfig};

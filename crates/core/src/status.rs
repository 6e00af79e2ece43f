// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle status machines for clusters and workers.
//!
//! Both entities move through the same shape: STARTING → STARTED → RUNNING →
//! STOPPING → {STOPPED, FAILED}, with early exits into STOPPING from any
//! non-terminal state. Transitions are monotonic toward a terminal state;
//! terminal states are absorbing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when parsing a persisted status column.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown status: {0}")]
pub struct StatusParseError(pub String);

macro_rules! define_status {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "UPPERCASE")]
        pub enum $name {
            Starting,
            Started,
            Running,
            Stopping,
            Stopped,
            Failed,
        }

        impl $name {
            /// Terminal states are absorbing: no transition leaves them.
            pub fn is_terminal(self) -> bool {
                matches!(self, Self::Stopped | Self::Failed)
            }

            /// Whether the state machine permits moving from `self` to `next`.
            pub fn can_advance_to(self, next: Self) -> bool {
                match (self, next) {
                    (Self::Starting, Self::Started)
                    | (Self::Starting, Self::Stopping)
                    | (Self::Started, Self::Running)
                    | (Self::Started, Self::Stopping)
                    | (Self::Running, Self::Stopping)
                    | (Self::Stopping, Self::Stopped)
                    | (Self::Stopping, Self::Failed) => true,
                    _ => false,
                }
            }

            pub fn as_str(self) -> &'static str {
                match self {
                    Self::Starting => "STARTING",
                    Self::Started => "STARTED",
                    Self::Running => "RUNNING",
                    Self::Stopping => "STOPPING",
                    Self::Stopped => "STOPPED",
                    Self::Failed => "FAILED",
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = StatusParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    "STARTING" => Ok(Self::Starting),
                    "STARTED" => Ok(Self::Started),
                    "RUNNING" => Ok(Self::Running),
                    "STOPPING" => Ok(Self::Stopping),
                    "STOPPED" => Ok(Self::Stopped),
                    "FAILED" => Ok(Self::Failed),
                    other => Err(StatusParseError(other.to_string())),
                }
            }
        }
    };
}

define_status! {
    /// Lifecycle status of a cluster.
    ClusterStatus
}

define_status! {
    /// Lifecycle status of a single worker within a cluster.
    WorkerStatus
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;

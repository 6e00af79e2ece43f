// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn happy_path_is_permitted() {
    use ClusterStatus::*;
    let path = [Starting, Started, Running, Stopping, Stopped];
    for pair in path.windows(2) {
        assert!(pair[0].can_advance_to(pair[1]), "{} -> {}", pair[0], pair[1]);
    }
}

#[yare::parameterized(
    starting = { ClusterStatus::Starting },
    started  = { ClusterStatus::Started },
    running  = { ClusterStatus::Running },
)]
fn every_live_state_can_begin_stopping(from: ClusterStatus) {
    assert!(from.can_advance_to(ClusterStatus::Stopping));
}

#[test]
fn no_transition_leaves_a_terminal_state() {
    use ClusterStatus::*;
    for from in [Stopped, Failed] {
        for to in [Starting, Started, Running, Stopping, Stopped, Failed] {
            assert!(!from.can_advance_to(to), "{} -> {}", from, to);
        }
    }
}

#[test]
fn no_transition_moves_backward() {
    use ClusterStatus::*;
    assert!(!Stopped.can_advance_to(Starting));
    assert!(!Running.can_advance_to(Started));
    assert!(!Started.can_advance_to(Starting));
    assert!(!Stopping.can_advance_to(Running));
}

#[test]
fn stopping_resolves_only_to_terminal() {
    use ClusterStatus::*;
    assert!(Stopping.can_advance_to(Stopped));
    assert!(Stopping.can_advance_to(Failed));
    assert!(!Stopping.can_advance_to(Started));
}

#[test]
fn round_trips_through_str() {
    use std::str::FromStr;
    for status in [
        WorkerStatus::Starting,
        WorkerStatus::Started,
        WorkerStatus::Running,
        WorkerStatus::Stopping,
        WorkerStatus::Stopped,
        WorkerStatus::Failed,
    ] {
        assert_eq!(WorkerStatus::from_str(status.as_str()).unwrap(), status);
    }
    assert!(WorkerStatus::from_str("PENDING").is_err());
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

#[tokio::test]
async fn cooperative_tasks_finish_inside_the_grace() {
    let pool = TaskPool::new(Duration::from_secs(2));
    let finished = Arc::new(AtomicBool::new(false));

    let token = pool.cancellation_token();
    let flag = finished.clone();
    pool.spawn("cooperative", async move {
        token.cancelled().await;
        flag.store(true, Ordering::SeqCst);
    });

    pool.close().await;
    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(pool.live_tasks(), 0);
}

#[tokio::test]
async fn stubborn_tasks_are_abandoned_after_the_grace() {
    let pool = TaskPool::new(Duration::from_millis(100));
    pool.spawn("stubborn", async move {
        // Never checks the cancellation token.
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
    });

    let started = tokio::time::Instant::now();
    pool.close().await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(pool.live_tasks(), 0);
}

#[tokio::test]
async fn close_is_idempotent() {
    let pool = TaskPool::new(Duration::from_secs(1));
    let runs = Arc::new(AtomicUsize::new(0));

    let token = pool.cancellation_token();
    let counter = runs.clone();
    pool.spawn("once", async move {
        token.cancelled().await;
        counter.fetch_add(1, Ordering::SeqCst);
    });

    pool.close().await;
    pool.close().await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn grace_is_shared_not_per_task() {
    let pool = TaskPool::new(Duration::from_millis(150));
    for i in 0..5 {
        pool.spawn(&format!("stubborn-{i}"), async move {
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        });
    }

    let started = tokio::time::Instant::now();
    pool.close().await;
    // Five stubborn tasks share one deadline rather than stacking graces.
    assert!(started.elapsed() < Duration::from_millis(600));
}

#[tokio::test]
async fn finished_tasks_are_pruned_on_spawn() {
    let pool = TaskPool::new(Duration::from_secs(1));
    pool.spawn("quick", async {});
    tokio::time::sleep(Duration::from_millis(50)).await;
    pool.spawn("second", std::future::pending());
    assert_eq!(pool.live_tasks(), 1);
    pool.close().await;
}

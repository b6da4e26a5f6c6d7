//! Pack pool tests

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::PackPool;

#[tokio::test]
async fn test_acquire_returns_zeroed_pack() {
    let pool = PackPool::new(4);
    let pack = pool.acquire().await;

    assert_eq!(pack.ref_count(), 1);
    assert_eq!(pack.message().msg_type(), "");
    assert!(pack.raw().is_empty());
    assert_eq!(pool.available(), 3);
    assert_eq!(pool.in_flight(), 1);
}

#[tokio::test]
async fn test_recycle_returns_pack_to_pool() {
    let pool = PackPool::new(2);
    let pack = pool.acquire().await;
    pack.message_mut().set_payload("dirty");
    pack.set_raw(vec![1, 2, 3]);

    pool.recycle(pack);
    assert_eq!(pool.available(), 2);
    assert_eq!(pool.in_flight(), 0);

    // The recycled pack must come back blank.
    let pack = pool.acquire().await;
    assert_eq!(pack.message().payload(), "");
    assert!(pack.raw().is_empty());
}

#[tokio::test]
async fn test_try_acquire_exhaustion() {
    let pool = PackPool::new(2);
    let a = pool.try_acquire().expect("first pack");
    let b = pool.try_acquire().expect("second pack");
    assert!(pool.try_acquire().is_none());

    pool.recycle(a);
    assert!(pool.try_acquire().is_some());
    drop(b);
}

#[tokio::test]
async fn test_acquire_blocks_until_recycle() {
    let pool = PackPool::new(1);
    let held = pool.acquire().await;

    // Pool is dry: acquire must not complete yet.
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await })
    };
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    pool.recycle(held);
    let pack = timeout(Duration::from_secs(2), waiter)
        .await
        .expect("acquire should unblock after recycle")
        .expect("task panicked");
    assert_eq!(pack.ref_count(), 1);
}

#[tokio::test]
async fn test_fan_out_ref_count_single_return() {
    let pool = PackPool::new(3);
    let pack = pool.acquire().await;
    pack.set_ref_count(3);

    let c1 = Arc::clone(&pack);
    let c2 = Arc::clone(&pack);

    pool.recycle(c1);
    assert_eq!(pool.available(), 2, "first recycle must not return the pack");
    pool.recycle(c2);
    assert_eq!(pool.available(), 2, "second recycle must not return the pack");
    pool.recycle(pack);
    assert_eq!(pool.available(), 3, "final recycle returns the pack");
    assert_eq!(pool.in_flight(), 0);
}

#[cfg(debug_assertions)]
#[tokio::test]
#[should_panic(expected = "double recycle")]
async fn test_double_recycle_detected_in_debug() {
    let pool = PackPool::new(1);
    let pack = pool.acquire().await;
    let dup = Arc::clone(&pack);
    pool.recycle(pack);
    pool.recycle(dup);
}

#[tokio::test]
async fn test_concurrent_acquire_recycle() {
    let pool = PackPool::new(8);
    let mut tasks = Vec::new();
    for _ in 0..32 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..50 {
                let pack = pool.acquire().await;
                tokio::task::yield_now().await;
                pool.recycle(pack);
            }
        }));
    }
    for t in tasks {
        timeout(Duration::from_secs(10), t)
            .await
            .expect("workers should finish")
            .expect("worker panicked");
    }
    assert_eq!(pool.available(), 8);
    assert_eq!(pool.in_flight(), 0);
}

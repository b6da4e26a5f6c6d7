//! Retry helper tests

use std::time::Duration;

use strom_config::RetryOptions;

use crate::{PipelineError, RetryHelper};

fn fast_opts(max_retries: i32) -> RetryOptions {
    RetryOptions {
        max_delay: Duration::from_micros(1),
        delay: Duration::from_micros(1),
        max_jitter: Duration::from_micros(1),
        max_retries,
    }
}

#[tokio::test]
async fn test_bounded_retries_exhaust() {
    let mut retry = RetryHelper::new(fast_opts(1));

    // max_retries = 1 permits two slots before exhaustion, matching the
    // supervisor contract of "initial attempt plus retries".
    assert!(retry.wait().await.is_ok());
    assert!(retry.wait().await.is_ok());
    match retry.wait().await {
        Err(PipelineError::RetryExhausted { attempts: 2 }) => {}
        other => panic!("expected exhaustion after 2 attempts, got {other:?}"),
    }
}

#[tokio::test]
async fn test_reset_restores_budget() {
    let mut retry = RetryHelper::new(fast_opts(1));
    assert!(retry.wait().await.is_ok());
    assert!(retry.wait().await.is_ok());
    assert_eq!(retry.attempts(), 2);

    retry.reset();
    assert_eq!(retry.attempts(), 0);
    assert!(retry.wait().await.is_ok());
    assert!(retry.wait().await.is_ok());
    assert!(retry.wait().await.is_err());
}

#[tokio::test]
async fn test_unbounded_retries() {
    let mut retry = RetryHelper::new(fast_opts(-1));
    for _ in 0..50 {
        assert!(retry.wait().await.is_ok());
    }
    assert_eq!(retry.attempts(), 50);
}

#[tokio::test(start_paused = true)]
async fn test_delay_doubles_up_to_max() {
    let opts = RetryOptions {
        max_delay: Duration::from_millis(400),
        delay: Duration::from_millis(100),
        max_jitter: Duration::ZERO,
        max_retries: -1,
    };
    let mut retry = RetryHelper::new(opts);

    // Paused time auto-advances through sleeps; measure each slot.
    let expect = [100u64, 200, 400, 400];
    for ms in expect {
        let before = tokio::time::Instant::now();
        retry.wait().await.unwrap();
        assert_eq!(before.elapsed(), Duration::from_millis(ms));
    }
}

#[tokio::test(start_paused = true)]
async fn test_jitter_stays_within_bound() {
    let opts = RetryOptions {
        max_delay: Duration::from_millis(100),
        delay: Duration::from_millis(100),
        max_jitter: Duration::from_millis(50),
        max_retries: -1,
    };
    let mut retry = RetryHelper::new(opts);
    for _ in 0..10 {
        let before = tokio::time::Instant::now();
        retry.wait().await.unwrap();
        let slept = before.elapsed();
        assert!(slept >= Duration::from_millis(100));
        assert!(slept <= Duration::from_millis(150));
    }
}

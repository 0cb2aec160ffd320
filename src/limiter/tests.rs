use super::*;

fn one_tier(name: &str, config: BucketConfig) -> TieredRateLimiter {
    TieredRateLimiter::new(HashMap::from([(name.to_string(), config)]))
}

fn test_bucket(max_wait: Duration) -> BucketConfig {
    BucketConfig::new(10, 5, Duration::from_secs(1), max_wait)
}

#[tokio::test(start_paused = true)]
async fn test_consume_zero_is_a_noop() {
    let limiter = one_tier("read", test_bucket(Duration::from_secs(5)));
    assert!(limiter.consume_n("read", 0).await);

    let m = limiter.metrics("read").unwrap();
    assert_eq!(m.total_requests, 0);
    assert_eq!(m.available, 10);
}

#[tokio::test(start_paused = true)]
async fn test_consume_over_capacity_rejects_immediately() {
    let limiter = one_tier("read", test_bucket(Duration::from_secs(5)));
    assert!(!limiter.consume_n("read", 11).await);

    let m = limiter.metrics("read").unwrap();
    assert_eq!(m.rate_limited, 1);
    assert_eq!(m.available, 10, "rejected request must not drain the bucket");
}

#[tokio::test(start_paused = true)]
async fn test_lazy_refill_credits_and_caps() {
    let limiter = one_tier("read", test_bucket(Duration::from_secs(5)));
    assert!(limiter.consume_n("read", 10).await);
    assert_eq!(limiter.metrics("read").unwrap().available, 0);

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(limiter.metrics("read").unwrap().available, 5);

    tokio::time::advance(Duration::from_secs(2)).await;
    // 5 + 10 would exceed capacity; refill caps at 10.
    assert_eq!(limiter.metrics("read").unwrap().available, 10);
}

#[tokio::test(start_paused = true)]
async fn test_bounded_wait_rejects_when_refill_too_slow() {
    let limiter = one_tier("read", test_bucket(Duration::from_millis(500)));
    assert!(limiter.consume_n("read", 10).await);

    // Needs 8 tokens = two refill periods = 2s > 500ms budget.
    assert!(!limiter.consume_n("read", 8).await);
    let m = limiter.metrics("read").unwrap();
    assert_eq!(m.rate_limited, 1);
}

#[tokio::test(start_paused = true)]
async fn test_waiting_caller_is_served_after_refill() {
    let limiter = one_tier("read", test_bucket(Duration::from_secs(5)));
    assert!(limiter.consume_n("read", 10).await);

    // 8 tokens need two periods; the paused clock auto-advances the sleep.
    assert!(limiter.consume_n("read", 8).await);
    let m = limiter.metrics("read").unwrap();
    assert_eq!(m.accepted, 2);
    assert!(m.avg_wait_ms >= 2000.0);
}

#[tokio::test(start_paused = true)]
async fn test_counter_identity_total_is_accepted_plus_limited() {
    let limiter = one_tier("read", test_bucket(Duration::from_millis(100)));
    let _ = limiter.consume_n("read", 4).await;
    let _ = limiter.consume_n("read", 4).await;
    let _ = limiter.consume_n("read", 9).await; // would need >100ms of refill
    let _ = limiter.consume_n("read", 20).await; // over capacity

    let m = limiter.metrics("read").unwrap();
    assert_eq!(m.total_requests, m.accepted + m.rate_limited);
    assert_eq!(m.total_requests, 4);
}

#[tokio::test(start_paused = true)]
async fn test_waiters_served_in_fifo_order() {
    let limiter = std::sync::Arc::new(one_tier("read", test_bucket(Duration::from_secs(10))));
    assert!(limiter.consume_n("read", 10).await);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let first = {
        let limiter = limiter.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            assert!(limiter.consume_n("read", 5).await);
            tx.send("first").unwrap();
        })
    };
    // Let the first waiter reach the turnstile before spawning the second.
    tokio::task::yield_now().await;
    let second = {
        let limiter = limiter.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            assert!(limiter.consume_n("read", 5).await);
            tx.send("second").unwrap();
        })
    };

    first.await.unwrap();
    second.await.unwrap();
    assert_eq!(rx.recv().await, Some("first"));
    assert_eq!(rx.recv().await, Some("second"));
}

#[tokio::test(start_paused = true)]
async fn test_update_config_shrink_clamps_available() {
    let limiter = one_tier("write", test_bucket(Duration::from_secs(5)));
    limiter.update_config(
        "write",
        &BucketConfigPatch {
            capacity: Some(4),
            ..Default::default()
        },
    );
    let m = limiter.metrics("write").unwrap();
    assert_eq!(m.capacity, 4);
    assert_eq!(m.available, 4);
}

#[tokio::test(start_paused = true)]
async fn test_reset_refills_and_zeroes_counters() {
    let limiter = one_tier("read", test_bucket(Duration::from_secs(5)));
    assert!(limiter.consume_n("read", 10).await);
    assert!(!limiter.consume_n("read", 20).await);

    limiter.reset(Some("read"));
    let m = limiter.metrics("read").unwrap();
    assert_eq!(m.available, 10);
    assert_eq!(m.total_requests, 0);
    assert_eq!(m.rate_limited, 0);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_tier_falls_back_to_default() {
    let limiter = TieredRateLimiter::default();
    assert!(limiter.consume("no-such-tier").await);
    let m = limiter.metrics(DEFAULT_TIER).unwrap();
    assert_eq!(m.total_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_independent_tiers_do_not_couple() {
    let limiter = TieredRateLimiter::new(HashMap::from([
        ("read".to_string(), test_bucket(Duration::from_secs(5))),
        ("write".to_string(), test_bucket(Duration::from_secs(5))),
    ]));
    assert!(limiter.consume_n("read", 10).await);
    assert_eq!(limiter.metrics("write").unwrap().available, 10);
}

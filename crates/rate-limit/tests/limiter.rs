use std::sync::Arc;
use std::time::Duration;

use keystore::{KeyStore, MemoryStore};
use rate_limit::{LimitPolicy, RateLimiter};

fn memory_limiter() -> (Arc<KeyStore>, RateLimiter) {
    let store = Arc::new(KeyStore::Memory(MemoryStore::new()));
    let limiter = RateLimiter::new(store.clone());
    (store, limiter)
}

fn outage(store: &KeyStore, on: bool) {
    let KeyStore::Memory(memory) = store else {
        unreachable!("tests run against the memory backend");
    };
    memory.simulate_outage(on);
}

#[tokio::test]
async fn counts_down_then_denies_with_message() {
    let (_, limiter) = memory_limiter();
    let policy = LimitPolicy::new(3, Duration::from_secs(60), "slow down").unwrap();

    for expected_remaining in [2, 1, 0] {
        let result = limiter.check("user:1:chat", &policy).await;
        assert!(result.allowed);
        assert_eq!(result.remaining, expected_remaining);
        assert!(result.message.is_none());
        assert!(!result.degraded);
    }

    let denied = limiter.check("user:1:chat", &policy).await;
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    assert_eq!(denied.message.as_deref(), Some("slow down"));
}

#[tokio::test]
async fn keys_are_isolated() {
    let (_, limiter) = memory_limiter();
    let policy = LimitPolicy::new(1, Duration::from_secs(60), "slow down").unwrap();

    assert!(limiter.check("user:1:chat", &policy).await.allowed);
    assert!(!limiter.check("user:1:chat", &policy).await.allowed);

    // A different caller still has a full window.
    assert!(limiter.check("user:2:chat", &policy).await.allowed);
}

#[tokio::test]
async fn denied_attempts_are_still_recorded() {
    let (_, limiter) = memory_limiter();
    let policy = LimitPolicy::new(2, Duration::from_millis(900), "slow down").unwrap();

    limiter.check("user:3:chat", &policy).await;
    limiter.check("user:3:chat", &policy).await;

    // Keep hammering half way through the window. The denied attempts
    // themselves occupy window slots, so once the two original events
    // age out the hammered events still saturate the key.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!limiter.check("user:3:chat", &policy).await.allowed);
    assert!(!limiter.check("user:3:chat", &policy).await.allowed);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!limiter.check("user:3:chat", &policy).await.allowed);
}

#[tokio::test]
async fn window_slides_rather_than_resetting() {
    let (_, limiter) = memory_limiter();
    let policy = LimitPolicy::new(3, Duration::from_secs(1), "slow down").unwrap();

    for _ in 0..3 {
        limiter.check("user:4:chat", &policy).await;
    }
    assert!(!limiter.check("user:4:chat", &policy).await.allowed);

    tokio::time::sleep(Duration::from_millis(1100)).await;

    // Everything before the sleep has aged out. The denied attempt above
    // was itself recorded, but it too is past the window by now except
    // for nothing; only the fresh event counts.
    let result = limiter.check("user:4:chat", &policy).await;
    assert!(result.allowed);
    assert_eq!(result.remaining, 2);
}

#[tokio::test]
async fn reset_hint_lands_one_window_out() {
    let (_, limiter) = memory_limiter();
    let policy = LimitPolicy::new(3, Duration::from_secs(60), "slow down").unwrap();

    let before = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();

    let result = limiter.check("user:5:chat", &policy).await;

    assert!(result.reset_at >= before + 59);
    assert!(result.reset_at <= before + 61);
}

#[tokio::test]
async fn store_outage_fails_open() {
    let (store, limiter) = memory_limiter();
    let policy = LimitPolicy::new(3, Duration::from_secs(60), "slow down").unwrap();

    // Saturate the key while the store is healthy.
    for _ in 0..3 {
        limiter.check("user:6:chat", &policy).await;
    }
    assert!(!limiter.check("user:6:chat", &policy).await.allowed);

    outage(&store, true);

    let result = limiter.check("user:6:chat", &policy).await;
    assert!(result.allowed);
    assert_eq!(result.remaining, policy.max);
    assert!(result.degraded);

    // Recovery re-enforces the saturated window.
    outage(&store, false);
    assert!(!limiter.check("user:6:chat", &policy).await.allowed);
}

#[tokio::test]
async fn budget_check_spends_estimated_weight() {
    let (_, limiter) = memory_limiter();
    let policy = LimitPolicy::new(100, Duration::from_secs(60), "slow down")
        .unwrap()
        .with_token_policy(1000, Duration::from_secs(3600))
        .unwrap();

    let first = limiter.check_with_budget("user:7:chat", &policy, 400).await;
    assert!(first.limit.allowed);
    assert_eq!(first.weight_remaining, 600);

    let second = limiter.check_with_budget("user:7:chat", &policy, 500).await;
    assert!(second.limit.allowed);
    assert_eq!(second.weight_remaining, 100);
}

#[tokio::test]
async fn exhausted_budget_denies_without_spending() {
    let (_, limiter) = memory_limiter();
    let policy = LimitPolicy::new(100, Duration::from_secs(60), "budget gone")
        .unwrap()
        .with_token_policy(1000, Duration::from_secs(3600))
        .unwrap();

    limiter.check_with_budget("user:8:chat", &policy, 900).await;

    let denied = limiter.check_with_budget("user:8:chat", &policy, 200).await;
    assert!(!denied.limit.allowed);
    assert_eq!(denied.limit.message.as_deref(), Some("budget gone"));
    assert_eq!(denied.weight_remaining, 100);

    // The rejected charge never landed: a request that fits still goes
    // through against the same remaining budget.
    let fits = limiter.check_with_budget("user:8:chat", &policy, 100).await;
    assert!(fits.limit.allowed);
    assert_eq!(fits.weight_remaining, 0);
}

#[tokio::test]
async fn count_denial_leaves_budget_untouched() {
    let (_, limiter) = memory_limiter();
    let policy = LimitPolicy::new(1, Duration::from_secs(60), "slow down")
        .unwrap()
        .with_token_policy(1000, Duration::from_secs(3600))
        .unwrap();

    limiter.check_with_budget("user:9:chat", &policy, 300).await;

    let denied = limiter.check_with_budget("user:9:chat", &policy, 300).await;
    assert!(!denied.limit.allowed);
    assert_eq!(denied.weight_remaining, 0);

    // Widen the count constraint on the same key: only the first charge
    // is in the token window.
    let wide = LimitPolicy::new(100, Duration::from_secs(60), "slow down")
        .unwrap()
        .with_token_policy(1000, Duration::from_secs(3600))
        .unwrap();
    let next = limiter.check_with_budget("user:9:chat", &wide, 100).await;
    assert_eq!(next.weight_remaining, 600);
}

#[tokio::test]
async fn budget_denial_still_charges_the_count() {
    let (_, limiter) = memory_limiter();
    let policy = LimitPolicy::new(3, Duration::from_secs(60), "budget gone")
        .unwrap()
        .with_token_policy(100, Duration::from_secs(3600))
        .unwrap();

    limiter.check_with_budget("user:10:chat", &policy, 100).await;

    // Budget is gone; each of these is denied on weight yet still lands
    // in the count window.
    for _ in 0..2 {
        let denied = limiter.check_with_budget("user:10:chat", &policy, 50).await;
        assert!(!denied.limit.allowed);
    }

    // Count window now holds three events, so the next attempt is denied
    // on count alone even with zero weight.
    let result = limiter.check_with_budget("user:10:chat", &policy, 0).await;
    assert!(!result.limit.allowed);
    assert_eq!(result.limit.remaining, 0);
    assert_eq!(result.weight_remaining, 0);
}

#[tokio::test]
async fn policy_without_token_constraint_ignores_weight() {
    let (_, limiter) = memory_limiter();
    let policy = LimitPolicy::new(2, Duration::from_secs(60), "slow down").unwrap();

    let result = limiter.check_with_budget("user:11:uploads", &policy, 999_999).await;
    assert!(result.limit.allowed);
    assert_eq!(result.limit.remaining, 1);
    assert_eq!(result.weight_remaining, 0);
}

#[tokio::test]
async fn budget_check_fails_open_on_outage() {
    let (store, limiter) = memory_limiter();
    let policy = LimitPolicy::new(3, Duration::from_secs(60), "slow down")
        .unwrap()
        .with_token_policy(1000, Duration::from_secs(3600))
        .unwrap();

    outage(&store, true);

    let result = limiter.check_with_budget("user:12:chat", &policy, 500).await;
    assert!(result.limit.allowed);
    assert!(result.limit.degraded);
    assert_eq!(result.weight_remaining, 1000);
}

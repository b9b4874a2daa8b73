//! Admission decisions against limit policies.

use std::sync::Arc;
use std::time::Duration;

use keystore::{KeyStore, StoreError};

use crate::policy::LimitPolicy;
use crate::window::SlidingWindow;

/// Outcome of a plain admission check.
#[derive(Debug, Clone)]
pub struct LimitResult {
    /// Whether the event was admitted.
    pub allowed: bool,
    /// Events still available in the current window.
    pub remaining: u32,
    /// Unix timestamp (seconds) one full window after this check was
    /// recorded: the moment the window is guaranteed to be clear of
    /// everything up to and including this event.
    pub reset_at: u64,
    /// Denial message from the policy; only set when denied.
    pub message: Option<String>,
    /// True when the store was unreachable and the check fell open.
    pub degraded: bool,
}

/// Outcome of a dual-constraint admission check.
#[derive(Debug, Clone)]
pub struct BudgetLimitResult {
    /// The count-constraint portion of the decision.
    pub limit: LimitResult,
    /// Weighted budget still available in the token window. Zero when
    /// the policy carries no token constraint.
    pub weight_remaining: u64,
}

impl LimitResult {
    /// Result used when the store is unreachable: admit, report full
    /// capacity, and mark the decision degraded.
    fn fail_open(policy: &LimitPolicy, reset_at: u64) -> Self {
        Self {
            allowed: true,
            remaining: policy.max,
            reset_at,
            message: None,
            degraded: true,
        }
    }
}

/// Distributed rate limiter over a shared store.
///
/// Cheap to clone; all state lives in the store, so any number of
/// workers holding a limiter for the same store enforce one shared
/// limit per key.
#[derive(Clone)]
pub struct RateLimiter {
    window: SlidingWindow,
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn reset_after(window: Duration) -> u64 {
    now_secs() + window.as_secs()
}

impl RateLimiter {
    /// Create a limiter over the given store.
    pub fn new(store: Arc<KeyStore>) -> Self {
        Self {
            window: SlidingWindow::new(store),
        }
    }

    /// Check and record one event against the policy's count constraint.
    ///
    /// The event is recorded even when denied, so hammering a saturated
    /// key keeps pushing the reset time out.
    pub async fn check(&self, key: &str, policy: &LimitPolicy) -> LimitResult {
        match self.window.record(key, policy.window).await {
            Ok(sample) => {
                let allowed = sample.prior < u64::from(policy.max);
                let remaining = u64::from(policy.max)
                    .saturating_sub(sample.prior)
                    .saturating_sub(1) as u32;

                LimitResult {
                    allowed,
                    remaining,
                    reset_at: sample.recorded_at_ms / 1000 + policy.window.as_secs(),
                    message: (!allowed).then(|| policy.message.clone()),
                    degraded: false,
                }
            }
            Err(e) => {
                log::warn!("rate limit check failed for key {key}, failing open: {e}");
                LimitResult::fail_open(policy, reset_after(policy.window))
            }
        }
    }

    /// Check both the count constraint and, when the policy carries one,
    /// the weighted token budget.
    ///
    /// The count constraint is evaluated first and a count denial leaves
    /// the token window untouched. A budget denial, however, happens
    /// after the count charge has already been recorded; the charge is
    /// not rolled back. `estimated_weight` is charged up front and is
    /// the caller's estimate; no reconciliation happens afterwards.
    pub async fn check_with_budget(
        &self,
        key: &str,
        policy: &LimitPolicy,
        estimated_weight: u64,
    ) -> BudgetLimitResult {
        let limit = self.check(key, policy).await;

        let Some(token_policy) = &policy.token_policy else {
            return BudgetLimitResult {
                limit,
                weight_remaining: 0,
            };
        };

        if !limit.allowed {
            return BudgetLimitResult {
                limit,
                weight_remaining: 0,
            };
        }

        let weight_key = format!("{key}:tokens");

        match self
            .budget_charge(&weight_key, token_policy.window, token_policy.max, estimated_weight)
            .await
        {
            Ok(BudgetCharge::Charged { remaining }) => BudgetLimitResult {
                limit,
                weight_remaining: remaining,
            },
            Ok(BudgetCharge::Exhausted { remaining }) => BudgetLimitResult {
                limit: LimitResult {
                    allowed: false,
                    message: Some(policy.message.clone()),
                    ..limit
                },
                weight_remaining: remaining,
            },
            Err(e) => {
                log::warn!("token budget check failed for key {key}, failing open: {e}");
                BudgetLimitResult {
                    limit: LimitResult {
                        degraded: true,
                        ..limit
                    },
                    weight_remaining: token_policy.max,
                }
            }
        }
    }

    /// Charge `weight` against the budget window. An exhausted budget
    /// records nothing in the token window.
    ///
    /// The sum and the charge are two separate batches, so this is
    /// check-then-act: concurrent callers can read the same spent sum
    /// and jointly overshoot `max`. Best-effort by contract, unlike the
    /// count window's single-batch update.
    async fn budget_charge(
        &self,
        key: &str,
        window: Duration,
        max: u64,
        weight: u64,
    ) -> Result<BudgetCharge, StoreError> {
        let spent = self.window.weigh(key, window).await?;

        if spent + weight > max {
            return Ok(BudgetCharge::Exhausted {
                remaining: max.saturating_sub(spent),
            });
        }

        self.window.add_weight(key, window, weight).await?;

        Ok(BudgetCharge::Charged {
            remaining: max.saturating_sub(spent).saturating_sub(weight),
        })
    }
}

enum BudgetCharge {
    Charged { remaining: u64 },
    Exhausted { remaining: u64 },
}

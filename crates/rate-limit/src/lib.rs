//! Sliding-window rate limiting over a shared key-value store.
//!
//! Every stateless worker talks to the same store, so limits hold across
//! the whole fleet without in-process coordination. Two constraints are
//! supported per policy: a request count and an optional weighted token
//! budget. Store outages fail open: limits stop being enforced rather
//! than turning an infrastructure problem into a service outage.

#![deny(missing_docs)]

mod limiter;
mod policy;
mod window;

pub use limiter::{BudgetLimitResult, LimitResult, RateLimiter};
pub use policy::{LimitPolicy, PolicyError, PolicyRegistry, TokenPolicy};
pub use window::{SlidingWindow, WindowSample};

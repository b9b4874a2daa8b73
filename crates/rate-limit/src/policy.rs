//! Limit policies and the static per-resource, per-tier registry.

use std::collections::HashMap;
use std::time::Duration;

/// Errors raised for malformed policies.
///
/// These indicate a defect in the policy table, not runtime conditions,
/// and must abort startup rather than be swallowed.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// A policy allows zero events.
    #[error("policy max must be greater than zero")]
    ZeroMax,
    /// A policy has an empty window.
    #[error("policy window must be non-zero")]
    ZeroWindow,
}

/// A named admission policy: how many events fit in the window, and
/// optionally how much weighted budget.
#[derive(Debug, Clone)]
pub struct LimitPolicy {
    /// Maximum number of events per window.
    pub max: u32,
    /// Window length.
    pub window: Duration,
    /// Human-readable denial message.
    pub message: String,
    /// Optional weighted budget constraint.
    pub token_policy: Option<TokenPolicy>,
}

/// Weighted budget constraint: the sum of event weights within the
/// window may not exceed `max`.
#[derive(Debug, Clone)]
pub struct TokenPolicy {
    /// Maximum summed weight per window.
    pub max: u64,
    /// Window length.
    pub window: Duration,
}

impl LimitPolicy {
    /// Create a validated policy.
    pub fn new(max: u32, window: Duration, message: impl Into<String>) -> Result<Self, PolicyError> {
        if max == 0 {
            return Err(PolicyError::ZeroMax);
        }
        if window.is_zero() {
            return Err(PolicyError::ZeroWindow);
        }

        Ok(Self {
            max,
            window,
            message: message.into(),
            token_policy: None,
        })
    }

    /// Attach a weighted budget constraint.
    pub fn with_token_policy(mut self, max: u64, window: Duration) -> Result<Self, PolicyError> {
        if max == 0 {
            return Err(PolicyError::ZeroMax);
        }
        if window.is_zero() {
            return Err(PolicyError::ZeroWindow);
        }

        self.token_policy = Some(TokenPolicy { max, window });
        Ok(self)
    }
}

/// Static table of policies keyed by resource name and subscription
/// tier. Built once at process start; never mutated afterwards.
pub struct PolicyRegistry {
    policies: HashMap<(String, String), LimitPolicy>,
}

impl PolicyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            policies: HashMap::new(),
        }
    }

    /// The built-in policy table.
    ///
    /// Validation errors propagate so a broken table aborts startup.
    pub fn builtin() -> Result<Self, PolicyError> {
        let mut registry = Self::new();

        registry.insert(
            "chatbot",
            "free",
            LimitPolicy::new(
                20,
                Duration::from_secs(60),
                "You're sending messages too quickly. Please wait a moment.",
            )?
            .with_token_policy(10_000, Duration::from_secs(3600))?,
        );

        registry.insert(
            "chatbot",
            "premium",
            LimitPolicy::new(
                60,
                Duration::from_secs(60),
                "You're sending messages too quickly. Please wait a moment.",
            )?
            .with_token_policy(100_000, Duration::from_secs(3600))?,
        );

        registry.insert(
            "external_api",
            "free",
            LimitPolicy::new(
                30,
                Duration::from_secs(60),
                "External API quota reached. Please try again later.",
            )?
            .with_token_policy(50_000, Duration::from_secs(86_400))?,
        );

        registry.insert(
            "external_api",
            "premium",
            LimitPolicy::new(
                120,
                Duration::from_secs(60),
                "External API quota reached. Please try again later.",
            )?
            .with_token_policy(500_000, Duration::from_secs(86_400))?,
        );

        registry.insert(
            "uploads",
            "free",
            LimitPolicy::new(10, Duration::from_secs(3600), "Upload limit reached for this hour.")?,
        );

        registry.insert(
            "uploads",
            "premium",
            LimitPolicy::new(50, Duration::from_secs(3600), "Upload limit reached for this hour.")?,
        );

        Ok(registry)
    }

    /// Register a policy for a resource and tier.
    pub fn insert(&mut self, resource: impl Into<String>, tier: impl Into<String>, policy: LimitPolicy) {
        self.policies.insert((resource.into(), tier.into()), policy);
    }

    /// Look up the policy for a resource and tier.
    ///
    /// Unknown combinations return `None`; callers decide whether that
    /// means unlimited or denied.
    pub fn resolve(&self, resource: &str, tier: &str) -> Option<&LimitPolicy> {
        self.policies.get(&(resource.to_string(), tier.to_string()))
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_max_is_rejected() {
        let result = LimitPolicy::new(0, Duration::from_secs(60), "nope");
        assert!(matches!(result, Err(PolicyError::ZeroMax)));
    }

    #[test]
    fn zero_window_is_rejected() {
        let result = LimitPolicy::new(10, Duration::ZERO, "nope");
        assert!(matches!(result, Err(PolicyError::ZeroWindow)));
    }

    #[test]
    fn token_policy_is_validated_too() {
        let policy = LimitPolicy::new(10, Duration::from_secs(60), "nope").unwrap();
        assert!(matches!(
            policy.clone().with_token_policy(0, Duration::from_secs(60)),
            Err(PolicyError::ZeroMax)
        ));
        assert!(matches!(
            policy.with_token_policy(100, Duration::ZERO),
            Err(PolicyError::ZeroWindow)
        ));
    }

    #[test]
    fn builtin_table_is_valid() {
        let registry = PolicyRegistry::builtin().unwrap();

        let chatbot = registry.resolve("chatbot", "free").unwrap();
        assert_eq!(chatbot.max, 20);
        assert!(chatbot.token_policy.is_some());

        let uploads = registry.resolve("uploads", "premium").unwrap();
        assert!(uploads.token_policy.is_none());
    }

    #[test]
    fn unknown_resource_resolves_to_none() {
        let registry = PolicyRegistry::builtin().unwrap();
        assert!(registry.resolve("chatbot", "enterprise").is_none());
        assert!(registry.resolve("unknown", "free").is_none());
    }
}

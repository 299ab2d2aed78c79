use conductor_core::ConductorError;
use serde::{Deserialize, Serialize};

/// Configures in-place retries before the router moves to the next provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries per provider before moving to the next one.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries in place; every failure advances the chain.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_base_ms: 0,
            backoff_max_ms: 0,
        }
    }
}

/// Determines whether an error is transient and worth retrying on the same provider.
///
/// Returns `true` for upstream rate limiting (429), timeouts, dropped
/// connections and server errors (5xx). Client errors such as 400, 401 and
/// 404 are not expected to succeed on retry, and neither are validation
/// errors, cancellation or our own rate limiter rejecting the call: those move
/// straight to the next provider in the chain.
pub fn is_retryable(err: &ConductorError) -> bool {
    match err {
        ConductorError::Provider(_) | ConductorError::Http(_) => {}
        _ => return false,
    }

    let lower = err.to_string().to_lowercase();

    if lower.contains("rate limit exceeded") {
        return false;
    }
    if lower.contains(" 400") || lower.contains(" 401") || lower.contains(" 403") {
        return false;
    }

    lower.contains("429")
        || lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("connection")
        || lower.contains("5xx")
        || lower.contains("500")
        || lower.contains("502")
        || lower.contains("503")
        || lower.contains("504")
}

/// Computes the backoff delay for a given attempt using exponential backoff
/// capped at `backoff_max_ms`.
pub fn compute_backoff(policy: &RetryPolicy, attempt: u32) -> u64 {
    let delay = policy
        .backoff_base_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    delay.min(policy.backoff_max_ms)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn backoff_computation() {
        let policy = RetryPolicy {
            max_retries: 5,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        };

        assert_eq!(compute_backoff(&policy, 0), 500);
        assert_eq!(compute_backoff(&policy, 1), 1000);
        assert_eq!(compute_backoff(&policy, 2), 2000);
        assert_eq!(compute_backoff(&policy, 5), 16_000);
        assert_eq!(compute_backoff(&policy, 6), 30_000); // capped
        assert_eq!(compute_backoff(&policy, 64), 30_000);
    }

    #[test]
    fn is_retryable_classification() {
        // Retryable
        assert!(is_retryable(&ConductorError::Provider(
            "openai API error 429 Too Many Requests".into()
        )));
        assert!(is_retryable(&ConductorError::Provider(
            "timeout after 30s calling groq".into()
        )));
        assert!(is_retryable(&ConductorError::Http(
            "error sending request: connection refused".into()
        )));
        assert!(is_retryable(&ConductorError::Provider(
            "claude API error 503 Service Unavailable".into()
        )));

        // Not retryable
        assert!(!is_retryable(&ConductorError::Provider(
            "openai API error 400 Bad Request".into()
        )));
        assert!(!is_retryable(&ConductorError::Provider(
            "openai API error 401 Unauthorized".into()
        )));
        assert!(!is_retryable(&ConductorError::Provider(
            "rate limit exceeded for provider groq".into()
        )));
        assert!(!is_retryable(&ConductorError::Cancelled("500".into())));
        assert!(!is_retryable(&ConductorError::Validation("503".into())));
    }

    #[test]
    fn retry_policy_from_toml_uses_defaults() {
        let policy: RetryPolicy = toml::from_str("max_retries = 4").unwrap();
        assert_eq!(policy.max_retries, 4);
        assert_eq!(policy.backoff_base_ms, 500);
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Counters for one provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderUsage {
    /// Attempts, successful or not.
    pub calls: u64,
    /// Failed attempts.
    pub failures: u64,
    /// Successful calls served as a fallback for another provider.
    pub fallbacks: u64,
    /// Prompt tokens over successful calls.
    pub input_tokens: u64,
    /// Completion tokens over successful calls.
    pub output_tokens: u64,
    /// Spend over successful calls.
    pub cost: f64,
    /// Time spent in successful calls.
    pub duration_ms: u64,
}

/// Tracks calls, failures, tokens and cost for every provider the router uses.
pub struct UsageMonitor {
    usage: RwLock<BTreeMap<String, ProviderUsage>>,
}

impl UsageMonitor {
    /// An empty monitor.
    pub fn new() -> Self {
        Self {
            usage: RwLock::new(BTreeMap::new()),
        }
    }

    /// Record a successful call.
    pub async fn record_success(
        &self,
        provider: &str,
        input_tokens: u64,
        output_tokens: u64,
        cost: f64,
        duration_ms: u64,
        is_fallback: bool,
    ) {
        let mut usage = self.usage.write().await;
        let entry = usage.entry(provider.to_string()).or_default();
        entry.calls += 1;
        entry.input_tokens += input_tokens;
        entry.output_tokens += output_tokens;
        entry.cost += cost;
        entry.duration_ms += duration_ms;
        if is_fallback {
            entry.fallbacks += 1;
        }
    }

    /// Record a failed attempt.
    pub async fn record_failure(&self, provider: &str) {
        let mut usage = self.usage.write().await;
        let entry = usage.entry(provider.to_string()).or_default();
        entry.calls += 1;
        entry.failures += 1;
    }

    /// Snapshot of all providers, ordered by name.
    pub async fn snapshot(&self) -> BTreeMap<String, ProviderUsage> {
        self.usage.read().await.clone()
    }

    /// Totals across all providers.
    pub async fn aggregate(&self) -> ProviderUsage {
        let usage = self.usage.read().await;
        let mut total = ProviderUsage::default();
        for u in usage.values() {
            total.calls += u.calls;
            total.failures += u.failures;
            total.fallbacks += u.fallbacks;
            total.input_tokens += u.input_tokens;
            total.output_tokens += u.output_tokens;
            total.cost += u.cost;
            total.duration_ms += u.duration_ms;
        }
        total
    }

    /// `{"providers": {...}, "aggregate": {...}}`, as printed by `conductor run --json`.
    pub async fn to_json(&self) -> serde_json::Value {
        let providers = self.snapshot().await;
        let aggregate = self.aggregate().await;
        serde_json::json!({
            "providers": providers,
            "aggregate": aggregate,
        })
    }
}

impl Default for UsageMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_success_and_failure() {
        let monitor = UsageMonitor::new();
        monitor.record_failure("openai").await;
        monitor
            .record_success("groq", 100, 50, 0.01, 200, true)
            .await;

        let usage = monitor.snapshot().await;
        let openai = &usage["openai"];
        assert_eq!(openai.calls, 1);
        assert_eq!(openai.failures, 1);

        let groq = &usage["groq"];
        assert_eq!(groq.fallbacks, 1);
        assert_eq!(groq.input_tokens, 100);
        assert_eq!(groq.output_tokens, 50);
        assert!(!usage.contains_key("ollama"));
    }

    #[tokio::test]
    async fn test_aggregate_and_json() {
        let monitor = UsageMonitor::new();
        monitor.record_success("a", 10, 5, 0.5, 1, false).await;
        monitor.record_success("b", 20, 5, 0.25, 1, false).await;

        let total = monitor.aggregate().await;
        assert_eq!(total.calls, 2);
        assert_eq!(total.input_tokens, 30);
        assert!((total.cost - 0.75).abs() < 1e-9);

        let json = monitor.to_json().await;
        assert_eq!(json["aggregate"]["output_tokens"], 10);
        assert_eq!(json["providers"]["b"]["input_tokens"], 20);
    }
}

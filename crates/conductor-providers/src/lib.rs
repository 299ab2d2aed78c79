//! Language-model providers and the routing layer in front of them.
//!
//! A [`Provider`] wraps one inference backend (an OpenAI-compatible endpoint,
//! a local Ollama server, the Anthropic API). The [`ProviderRouter`] maps a
//! [`RoutingProfile`](conductor_core::RoutingProfile) to a concrete provider and
//! model, and at call time walks the fallback chain with retries, per-provider
//! timeouts, rate limits and cancellation.

/// Provider backends and the [`Provider`] trait.
pub mod backends;
/// Routing configuration: providers, profiles, prices and retry policy.
pub mod config;
/// Token counting and cost estimation.
pub mod estimate;
/// Retry classification and exponential backoff.
pub mod failover;
/// Per-provider token-bucket rate limiting.
pub mod rate_limit;
/// Profile-based provider selection with fallback.
pub mod router;
/// Incremental events from a streaming completion.
pub mod stream;
/// Completion request/response types.
pub mod types;
/// Per-provider usage counters.
pub mod usage;

pub use backends::Provider;
pub use config::{
    default_profiles, ModelPricing, ProfileSettings, ProviderKind, ProviderSettings,
    RateLimitSettings, RoutingConfiguration,
};
pub use estimate::{Estimator, HeuristicTokenCounter, TokenCounter};
pub use failover::RetryPolicy;
pub use router::{ModelSelection, ProviderRouter, RoutedCompletion, RoutedStream};
pub use stream::StreamEvent;
pub use types::{CompletionRequest, CompletionResponse, ProviderInfo};
pub use usage::{ProviderUsage, UsageMonitor};

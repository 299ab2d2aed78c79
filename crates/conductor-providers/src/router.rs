use crate::backends::{build_provider, Provider};
use crate::config::{ModelPricing, ProfileSettings, RoutingConfiguration};
use crate::failover::{compute_backoff, is_retryable};
use crate::rate_limit::RateLimiter;
use crate::stream::StreamEvent;
use crate::types::{CompletionRequest, CompletionResponse, ProviderInfo};
use crate::usage::UsageMonitor;
use conductor_core::{ConductorError, ConductorResult, RoutingProfile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Aborts the provider's stream task when the owning wrapper ends, including
/// when the wrapper itself is aborted.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// The provider and model chosen for a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    /// Model to request.
    pub model_id: String,
    /// Provider name from the routing configuration.
    pub provider: String,
    /// Profile the selection was made for.
    pub profile: RoutingProfile,
    /// The provider is not the profile's first choice.
    pub is_fallback: bool,
}

/// A completed call and the provider that actually served it.
#[derive(Debug, Clone)]
pub struct RoutedCompletion {
    /// The provider's answer.
    pub response: CompletionResponse,
    /// Provider and model that actually served the call.
    pub selection: ModelSelection,
    /// Spend of this call; zero for local providers.
    pub cost: f64,
}

/// A streaming call that has been accepted by a provider.
pub struct RoutedStream {
    /// Text deltas as they arrive.
    pub events: mpsc::Receiver<StreamEvent>,
    /// Resolves to the aggregated response. Aborting it stops the provider task.
    pub handle: JoinHandle<ConductorResult<CompletionResponse>>,
    /// Provider and model that actually served the call.
    pub selection: ModelSelection,
}

/// Maps routing profiles to providers and walks the fallback chain at call time.
///
/// Selection policy:
/// - `cheap`: first enabled local provider, else the fallback chain.
/// - `premium`: first enabled non-local provider, else the fallback chain.
/// - `balanced`: the provider of the profile's first preferred model, else the
///   fallback chain.
///
/// Providers are ordered by ascending priority, then name. When no chain entry
/// is enabled the default provider is used, then the first enabled provider.
pub struct ProviderRouter {
    config: RoutingConfiguration,
    providers: BTreeMap<String, Arc<dyn Provider>>,
    limiter: RateLimiter,
    usage: Arc<UsageMonitor>,
}

impl ProviderRouter {
    /// Create a router over pre-built providers.
    ///
    /// A provider is usable only when it is both registered here and enabled
    /// in the configuration under the same name.
    pub fn new(config: RoutingConfiguration, providers: Vec<Arc<dyn Provider>>) -> Self {
        let mut limiter = RateLimiter::new();
        for (name, settings) in &config.providers {
            if let Some(limit) = settings.rate_limit {
                limiter = limiter.with_limit(name, limit);
            }
        }

        let providers = providers
            .into_iter()
            .map(|p| (p.info().name.clone(), p))
            .collect();

        Self {
            config,
            providers,
            limiter,
            usage: Arc::new(UsageMonitor::new()),
        }
    }

    /// Build HTTP backends for every configured provider.
    pub fn from_config(config: RoutingConfiguration) -> ConductorResult<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ConductorError::Http(e.to_string()))?;

        let providers = config
            .providers
            .iter()
            .map(|(name, settings)| build_provider(name, settings, http.clone()))
            .collect();

        info!(
            providers = config.providers.len(),
            chain = ?config.fallback_chain,
            "Provider router configured"
        );
        Ok(Self::new(config, providers))
    }

    /// The routing configuration.
    pub fn config(&self) -> &RoutingConfiguration {
        &self.config
    }

    /// Per-provider counters for every call made through this router.
    pub fn usage(&self) -> &Arc<UsageMonitor> {
        &self.usage
    }

    /// Capabilities of a registered provider.
    pub fn provider_info(&self, name: &str) -> Option<&ProviderInfo> {
        self.providers.get(name).map(|p| p.info())
    }

    /// The provider runs on this machine.
    pub fn is_local(&self, name: &str) -> bool {
        self.provider_info(name).is_some_and(|i| i.is_local)
    }

    /// Enabled providers ordered by ascending priority, then name.
    pub fn enabled_providers(&self) -> Vec<&str> {
        let mut enabled: Vec<(&str, u32)> = self
            .config
            .providers
            .iter()
            .filter(|(name, settings)| settings.enabled && self.providers.contains_key(*name))
            .map(|(name, settings)| (name.as_str(), settings.priority))
            .collect();
        enabled.sort_by_key(|(_, priority)| *priority);
        enabled.into_iter().map(|(name, _)| name).collect()
    }

    /// At least one provider can be called.
    pub fn has_enabled_providers(&self) -> bool {
        !self.enabled_providers().is_empty()
    }

    /// Price table entry for a selection, `None` for local or unpriced models.
    pub fn pricing(&self, selection: &ModelSelection) -> Option<ModelPricing> {
        if self.is_local(&selection.provider) {
            return None;
        }
        self.config.pricing(&selection.provider, &selection.model_id)
    }

    fn call_cost(&self, provider: &str, model: &str, input: u64, output: u64) -> f64 {
        if self.is_local(provider) {
            return 0.0;
        }
        self.config
            .pricing(provider, model)
            .map(|p| p.cost(input, output))
            .unwrap_or(0.0)
    }

    // --- Selection ---

    /// Resolve the provider and model for a routing profile.
    pub fn select(&self, profile: RoutingProfile) -> ConductorResult<ModelSelection> {
        let enabled = self.enabled_providers();
        if enabled.is_empty() {
            return Err(ConductorError::Validation("no providers configured".into()));
        }

        let settings = self.config.profile(profile);

        let (first_choice, attempted) = match profile {
            RoutingProfile::Cheap => (
                enabled
                    .iter()
                    .find(|p| self.is_local(p))
                    .map(|p| (p.to_string(), None)),
                true,
            ),
            RoutingProfile::Premium => (
                enabled
                    .iter()
                    .find(|p| !self.is_local(p))
                    .map(|p| (p.to_string(), None)),
                true,
            ),
            RoutingProfile::Balanced => (
                self.preferred_provider(&settings, &enabled),
                !settings.preferred_models.is_empty(),
            ),
        };

        let (provider, model, is_fallback) = match first_choice {
            Some((provider, model)) => (provider, model, false),
            None => {
                let head = self.chain_head(&enabled).ok_or_else(|| {
                    ConductorError::Validation("no providers configured".into())
                })?;
                (head.to_string(), None, attempted)
            }
        };

        let model_id = match model {
            Some(model) => model,
            None => self.resolve_model(&provider, &settings)?,
        };

        debug!(
            profile = %profile,
            provider = %provider,
            model = %model_id,
            is_fallback,
            "Resolved model selection"
        );

        Ok(ModelSelection {
            model_id,
            provider,
            profile,
            is_fallback,
        })
    }

    /// First enabled chain entry, else the default provider, else the first
    /// enabled provider by priority.
    fn chain_head<'a>(&'a self, enabled: &[&'a str]) -> Option<&'a str> {
        self.config
            .fallback_chain
            .iter()
            .map(String::as_str)
            .find(|name| enabled.contains(name))
            .or_else(|| {
                self.config
                    .default_provider
                    .as_deref()
                    .filter(|name| enabled.contains(name))
            })
            .or_else(|| enabled.first().copied())
    }

    /// Split `provider/model` when the prefix names a configured provider.
    fn split_preference<'a>(&self, entry: &'a str) -> (Option<&'a str>, &'a str) {
        match entry.split_once('/') {
            Some((provider, model)) if self.config.providers.contains_key(provider) => {
                (Some(provider), model)
            }
            _ => (None, entry),
        }
    }

    fn preferred_provider(
        &self,
        settings: &ProfileSettings,
        enabled: &[&str],
    ) -> Option<(String, Option<String>)> {
        let entry = settings.preferred_models.first()?;
        match self.split_preference(entry) {
            (Some(provider), model) => enabled
                .contains(&provider)
                .then(|| (provider.to_string(), Some(model.to_string()))),
            (None, model) => {
                let chain = self
                    .config
                    .fallback_chain
                    .iter()
                    .map(String::as_str)
                    .filter(|name| enabled.contains(name));
                chain
                    .chain(enabled.iter().copied())
                    .find(|name| {
                        self.config
                            .providers
                            .get(*name)
                            .is_some_and(|s| s.lists_model(model))
                    })
                    .map(|name| (name.to_string(), Some(model.to_string())))
            }
        }
    }

    /// Model to use on a provider: first preferred model it lists, else its
    /// default model, else its first priced model.
    fn resolve_model(&self, provider: &str, settings: &ProfileSettings) -> ConductorResult<String> {
        let provider_settings = self.config.providers.get(provider).ok_or_else(|| {
            ConductorError::Config(format!("provider '{provider}' is not configured"))
        })?;

        for entry in &settings.preferred_models {
            match self.split_preference(entry) {
                (Some(p), model) if p == provider => return Ok(model.to_string()),
                (None, model) if provider_settings.lists_model(model) => {
                    return Ok(model.to_string())
                }
                _ => {}
            }
        }

        provider_settings
            .default_model
            .clone()
            .or_else(|| provider_settings.models.keys().next().cloned())
            .ok_or_else(|| {
                ConductorError::Config(format!("provider '{provider}' has no models configured"))
            })
    }

    /// The selected provider followed by the remaining enabled chain entries.
    fn attempt_order(&self, selection: &ModelSelection) -> Vec<String> {
        let enabled = self.enabled_providers();
        let mut order = vec![selection.provider.clone()];
        for name in &self.config.fallback_chain {
            if enabled.contains(&name.as_str()) && !order.contains(name) {
                order.push(name.clone());
            }
        }
        order
    }

    // --- Calls ---

    /// Run a completion, falling back along the chain on provider failure.
    pub async fn complete(
        &self,
        selection: &ModelSelection,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> ConductorResult<RoutedCompletion> {
        let (response, routed, elapsed) = self
            .with_fallback(selection, request, cancel, |provider, req| async move {
                provider.complete(&req).await
            })
            .await?;

        let cost = self.call_cost(
            &routed.provider,
            &routed.model_id,
            response.input_tokens,
            response.output_tokens,
        );
        self.usage
            .record_success(
                &routed.provider,
                response.input_tokens,
                response.output_tokens,
                cost,
                elapsed,
                routed.is_fallback,
            )
            .await;

        Ok(RoutedCompletion {
            response,
            selection: routed,
            cost,
        })
    }

    /// Open a streaming completion, falling back along the chain until a
    /// provider accepts the request. Failures after the stream has started are
    /// reported through the join handle.
    ///
    /// The provider's `timeout_secs` bounds the whole stream body. Cancelling
    /// `cancel` or aborting the returned handle stops the provider task.
    pub async fn stream(
        &self,
        selection: &ModelSelection,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> ConductorResult<RoutedStream> {
        let ((events, inner), routed, _) = self
            .with_fallback(selection, request, cancel, |provider, req| async move {
                provider.stream(&req).await
            })
            .await?;

        let usage = self.usage.clone();
        let provider = routed.provider.clone();
        let pricing = self.pricing(&routed);
        let is_fallback = routed.is_fallback;
        let timeout_secs = self.timeout_secs(&routed.provider);
        let cancel = cancel.clone();
        let started = Instant::now();
        let mut inner = AbortOnDrop(inner);

        let handle = tokio::spawn(async move {
            let response = tokio::select! {
                _ = cancel.cancelled() => {
                    Err(ConductorError::Cancelled(format!("stream from {provider} cancelled")))
                }
                _ = tokio::time::sleep(Duration::from_secs(timeout_secs)) => {
                    warn!(provider = %provider, timeout_secs, "Provider stream stalled");
                    Err(ConductorError::Provider(format!(
                        "timeout after {timeout_secs}s streaming from {provider}"
                    )))
                }
                joined = &mut inner.0 => match joined {
                    Ok(result) => result,
                    Err(e) => Err(ConductorError::Provider(format!("stream task failed: {e}"))),
                },
            };
            drop(inner);
            match &response {
                Ok(resp) => {
                    let cost = pricing
                        .map(|p| p.cost(resp.input_tokens, resp.output_tokens))
                        .unwrap_or(0.0);
                    usage
                        .record_success(
                            &provider,
                            resp.input_tokens,
                            resp.output_tokens,
                            cost,
                            started.elapsed().as_millis() as u64,
                            is_fallback,
                        )
                        .await;
                }
                Err(ConductorError::Cancelled(_)) => {}
                Err(_) => usage.record_failure(&provider).await,
            }
            response
        });

        Ok(RoutedStream {
            events,
            handle,
            selection: routed,
        })
    }

    /// Try each provider in [`attempt_order`](Self::attempt_order), retrying
    /// retryable errors in place with exponential backoff.
    async fn with_fallback<T, F, Fut>(
        &self,
        selection: &ModelSelection,
        request: &CompletionRequest,
        cancel: &CancellationToken,
        call: F,
    ) -> ConductorResult<(T, ModelSelection, u64)>
    where
        F: Fn(Arc<dyn Provider>, CompletionRequest) -> Fut,
        Fut: Future<Output = ConductorResult<T>>,
    {
        let policy = &self.config.retry;
        let profile_settings = self.config.profile(selection.profile);
        let mut last_err: Option<ConductorError> = None;
        let order = self.attempt_order(selection);

        for (idx, name) in order.iter().enumerate() {
            let Some(provider) = self.providers.get(name) else {
                continue;
            };

            let model_id = if idx == 0 {
                selection.model_id.clone()
            } else {
                match self.resolve_model(name, &profile_settings) {
                    Ok(model) => model,
                    Err(e) => {
                        warn!(provider = %name, error = %e, "Skipping fallback provider");
                        last_err = Some(e);
                        continue;
                    }
                }
            };
            if idx > 0 {
                warn!(
                    from = %selection.provider,
                    to = %name,
                    model = %model_id,
                    "Falling back to next provider in chain"
                );
            }

            let mut req = request.clone();
            req.model_id = model_id.clone();
            let timeout_secs = self.timeout_secs(name);

            for attempt in 0..=policy.max_retries {
                let started = Instant::now();
                let fut = call(provider.clone(), req.clone());
                match self.guarded(name, timeout_secs, cancel, fut).await {
                    Ok(value) => {
                        let routed = ModelSelection {
                            model_id: model_id.clone(),
                            provider: name.clone(),
                            profile: selection.profile,
                            is_fallback: selection.is_fallback || idx > 0,
                        };
                        return Ok((value, routed, started.elapsed().as_millis() as u64));
                    }
                    Err(e @ ConductorError::Cancelled(_)) => return Err(e),
                    Err(e) => {
                        self.usage.record_failure(name).await;

                        if !is_retryable(&e) {
                            warn!(
                                provider = %name,
                                attempt,
                                error = %e,
                                "Non-retryable error, moving to next provider"
                            );
                            last_err = Some(e);
                            break;
                        }

                        if attempt < policy.max_retries {
                            let delay = compute_backoff(policy, attempt);
                            info!(
                                provider = %name,
                                attempt,
                                delay_ms = delay,
                                error = %e,
                                "Retryable error, backing off"
                            );
                            tokio::select! {
                                _ = cancel.cancelled() => {
                                    return Err(ConductorError::Cancelled(format!(
                                        "cancelled while backing off from {name}"
                                    )));
                                }
                                _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                            }
                        }
                        last_err = Some(e);
                    }
                }
            }
        }

        let detail = last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no provider could be tried".to_string());
        Err(ConductorError::Provider(format!(
            "fallback chain exhausted after {} provider(s): {detail}",
            order.len()
        )))
    }

    fn timeout_secs(&self, name: &str) -> u64 {
        self.config
            .providers
            .get(name)
            .map(|s| s.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
    }

    /// Apply the rate limit, per-provider timeout and cancellation to one call.
    async fn guarded<T, Fut>(
        &self,
        name: &str,
        timeout_secs: u64,
        cancel: &CancellationToken,
        fut: Fut,
    ) -> ConductorResult<T>
    where
        Fut: Future<Output = ConductorResult<T>>,
    {
        if !self.limiter.check(name).await {
            let wait = self
                .limiter
                .retry_after(name)
                .await
                .map(|d| format!(", retry after {}ms", d.as_millis()))
                .unwrap_or_default();
            return Err(ConductorError::Provider(format!(
                "rate limit exceeded for provider {name}{wait}"
            )));
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                Err(ConductorError::Cancelled(format!("call to {name} cancelled")))
            }
            result = tokio::time::timeout(Duration::from_secs(timeout_secs), fut) => match result {
                Ok(inner) => inner,
                Err(_) => Err(ConductorError::Provider(format!(
                    "timeout after {timeout_secs}s calling {name}"
                ))),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::{ProviderKind, ProviderSettings, RateLimitSettings};
    use async_trait::async_trait;

    struct Static(ProviderInfo);

    #[async_trait]
    impl Provider for Static {
        fn info(&self) -> &ProviderInfo {
            &self.0
        }

        async fn complete(&self, req: &CompletionRequest) -> ConductorResult<CompletionResponse> {
            Ok(CompletionResponse {
                content: format!("{} says hi", self.0.name),
                model_used: req.model_id.clone(),
                input_tokens: 1,
                output_tokens: 1,
            })
        }

        async fn stream(
            &self,
            _req: &CompletionRequest,
        ) -> ConductorResult<(
            mpsc::Receiver<StreamEvent>,
            JoinHandle<ConductorResult<CompletionResponse>>,
        )> {
            Err(ConductorError::Provider("not streaming".into()))
        }
    }

    fn provider(name: &str, local: bool) -> Arc<dyn Provider> {
        Arc::new(Static(ProviderInfo::new(name).local(local)))
    }

    fn settings(kind: ProviderKind, priority: u32, model: &str) -> ProviderSettings {
        ProviderSettings::new(kind)
            .with_priority(priority)
            .with_default_model(model)
    }

    fn router() -> ProviderRouter {
        let config = RoutingConfiguration::default()
            .with_provider("ollama", settings(ProviderKind::Ollama, 5, "llama3.1:8b"))
            .with_provider("groq", settings(ProviderKind::Groq, 1, "llama-3.3-70b"))
            .with_provider(
                "openai",
                settings(ProviderKind::OpenAi, 2, "gpt-4o-mini")
                    .with_model("gpt-4o", ModelPricing::new(2.5, 10.0)),
            )
            .with_fallback_chain(["openai", "groq"]);
        ProviderRouter::new(
            config,
            vec![
                provider("ollama", true),
                provider("groq", false),
                provider("openai", false),
            ],
        )
    }

    #[test]
    fn test_enabled_order_by_priority() {
        assert_eq!(router().enabled_providers(), vec!["groq", "openai", "ollama"]);
    }

    #[test]
    fn test_cheap_picks_local() {
        let sel = router().select(RoutingProfile::Cheap).unwrap();
        assert_eq!(sel.provider, "ollama");
        assert_eq!(sel.model_id, "llama3.1:8b");
        assert!(!sel.is_fallback);
    }

    #[test]
    fn test_premium_picks_non_local_by_priority() {
        let sel = router().select(RoutingProfile::Premium).unwrap();
        assert_eq!(sel.provider, "groq");
        assert!(!sel.is_fallback);
    }

    #[test]
    fn test_balanced_without_preference_uses_chain_head() {
        let sel = router().select(RoutingProfile::Balanced).unwrap();
        assert_eq!(sel.provider, "openai");
        assert_eq!(sel.model_id, "gpt-4o-mini");
    }

    #[test]
    fn test_balanced_preferred_model_resolution() {
        let mut r = router();
        r.config.profiles.insert(
            "balanced".into(),
            ProfileSettings {
                preferred_models: vec!["gpt-4o".into()],
                ..Default::default()
            },
        );
        let sel = r.select(RoutingProfile::Balanced).unwrap();
        assert_eq!((sel.provider.as_str(), sel.model_id.as_str()), ("openai", "gpt-4o"));

        r.config.profiles.insert(
            "balanced".into(),
            ProfileSettings {
                preferred_models: vec!["groq/mixtral-8x7b".into()],
                ..Default::default()
            },
        );
        let sel = r.select(RoutingProfile::Balanced).unwrap();
        assert_eq!((sel.provider.as_str(), sel.model_id.as_str()), ("groq", "mixtral-8x7b"));
    }

    #[test]
    fn test_cheap_prefers_local_when_profile_is_customized() {
        let config: RoutingConfiguration = toml::from_str(
            r#"
fallback_chain = ["groq", "ollama"]

[providers.ollama]
kind = "ollama"
default_model = "llama3.1:8b"

[providers.groq]
kind = "groq"
default_model = "llama-3.3-70b"

[profiles.cheap]
max_context_tokens = 4096
"#,
        )
        .unwrap();
        let r = ProviderRouter::new(
            config,
            vec![provider("ollama", true), provider("groq", false)],
        );

        let sel = r.select(RoutingProfile::Cheap).unwrap();
        assert_eq!(sel.provider, "ollama");
        assert!(!sel.is_fallback);
        assert_eq!(r.attempt_order(&sel), vec!["ollama", "groq"]);
    }

    #[tokio::test]
    async fn test_rate_limited_call_reports_wait() {
        let mut config = RoutingConfiguration::default()
            .with_provider("groq", settings(ProviderKind::Groq, 1, "llama-3.3-70b"))
            .with_fallback_chain(["groq"])
            .with_retry(crate::failover::RetryPolicy::none());
        config.providers.get_mut("groq").unwrap().rate_limit = Some(RateLimitSettings {
            requests_per_minute: 1.0,
            burst: None,
        });
        let r = ProviderRouter::new(config, vec![provider("groq", false)]);
        let sel = r.select(RoutingProfile::Premium).unwrap();
        let req = CompletionRequest::new(&sel.model_id, "hi");
        let cancel = CancellationToken::new();

        r.complete(&sel, &req, &cancel).await.unwrap();
        let err = r.complete(&sel, &req, &cancel).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("rate limit exceeded for provider groq"));
        assert!(message.contains("retry after"));

        let usage = r.usage().snapshot().await;
        assert_eq!((usage["groq"].calls, usage["groq"].failures), (2, 1));
    }

    #[test]
    fn test_cheap_without_local_falls_back_to_chain() {
        let mut r = router();
        r.config.providers.get_mut("ollama").unwrap().enabled = false;
        let sel = r.select(RoutingProfile::Cheap).unwrap();
        assert_eq!(sel.provider, "openai");
        assert!(sel.is_fallback);
    }

    #[test]
    fn test_no_enabled_providers() {
        let r = ProviderRouter::new(RoutingConfiguration::default(), vec![]);
        assert!(!r.has_enabled_providers());
        let err = r.select(RoutingProfile::Balanced).unwrap_err();
        assert!(err.to_string().contains("no providers configured"));
    }

    #[test]
    fn test_pricing_zero_for_local() {
        let r = router();
        let sel = r.select(RoutingProfile::Cheap).unwrap();
        assert!(r.pricing(&sel).is_none());
    }

    #[test]
    fn test_attempt_order_dedups_primary() {
        let r = router();
        let sel = r.select(RoutingProfile::Cheap).unwrap();
        assert_eq!(r.attempt_order(&sel), vec!["ollama", "openai", "groq"]);
        let sel = r.select(RoutingProfile::Balanced).unwrap();
        assert_eq!(r.attempt_order(&sel), vec!["openai", "groq"]);
    }
}

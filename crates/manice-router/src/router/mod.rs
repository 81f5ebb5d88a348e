//! Router - Core request flow for Manice
//!
//! classify → resolve profile → compose → cache lookup → dispatch → cache store.
//! Provider failures never reach the caller; they become a fallback result.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use manice_llm::{
    build_adapter, FragmentStream, GenerationRequest, GenerationResult, ModelProfile,
    ModelProfiles, ModelTier, ProviderAdapter, ProviderError, ProviderErrorKind, ProviderKind,
};

use crate::cache::{CacheKey, CacheStats, ResponseCache};
use crate::classifier::ComplexityClassifier;
use crate::compose::{context_size, PromptComposer, SpreadsheetContext};
use crate::config::{Config, ConfigError};

/// Payload returned when the provider could not produce an answer
pub const FALLBACK_CONTENT: &str = r#"{"action": "error", "explanation": "AI model temporarily unavailable. Please try again.", "excel_operations": []}"#;

/// `model_used` of a fallback result
pub const FALLBACK_MODEL: &str = "fallback";

/// Placeholder latency reported by a fallback result
const FALLBACK_LATENCY_SECONDS: f64 = 0.1;

/// Router errors
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("No provider adapter configured")]
    NoProvider,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Output of [`Router::generate`]
#[derive(Debug)]
pub enum Generation {
    /// A finished result (from cache, provider or fallback)
    Complete(GenerationResult),
    /// Incremental fragments from the provider
    Stream(FragmentStream),
}

impl Generation {
    pub fn is_stream(&self) -> bool {
        matches!(self, Generation::Stream(_))
    }

    /// The finished result, if this is not a stream
    pub fn into_result(self) -> Option<GenerationResult> {
        match self {
            Generation::Complete(result) => Some(result),
            Generation::Stream(_) => None,
        }
    }
}

/// Counters since the router was built
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterStats {
    pub requests: u64,
    pub cache_hits: u64,
    pub fallbacks: u64,
    pub streams: u64,
}

/// Build the result returned in place of a provider failure
pub fn fallback_result(kind: ProviderErrorKind) -> GenerationResult {
    let mut metadata = serde_json::Map::new();
    metadata.insert("fallback".to_string(), serde_json::Value::Bool(true));
    metadata.insert("error_kind".to_string(), kind.as_str().into());

    GenerationResult {
        content: FALLBACK_CONTENT.to_string(),
        model_used: FALLBACK_MODEL.to_string(),
        provider: ProviderKind::default(),
        tokens_used: 0,
        latency_seconds: FALLBACK_LATENCY_SECONDS,
        metadata,
    }
}

/// Whether a result is a fallback rather than provider output
pub fn is_fallback(result: &GenerationResult) -> bool {
    result
        .metadata
        .get("fallback")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    fallbacks: AtomicU64,
    streams: AtomicU64,
}

/// The main Router
#[derive(Debug)]
pub struct Router {
    adapter: Arc<dyn ProviderAdapter>,
    profiles: ModelProfiles,
    classifier: ComplexityClassifier,
    composer: PromptComposer,
    cache: ResponseCache,
    counters: Counters,
}

impl Router {
    /// Get a builder for configuration
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Build the router described by a loaded configuration.
    ///
    /// The adapter for `preferred_provider` is chosen here, once.
    pub fn from_config(config: &Config, client: reqwest::Client) -> Result<Self, RouterError> {
        config.validate()?;
        let adapter = build_adapter(config.preferred_provider, &config.endpoints(), client);

        Self::builder()
            .adapter(adapter)
            .profiles(config.profiles())
            .cache_size(config.model_cache_size)
            .build()
    }

    /// Route one request.
    ///
    /// `tier` skips classification when given. With `stream` set the cache is
    /// neither read nor written and the provider's fragments are returned as-is.
    /// Never fails: provider errors turn into [`fallback_result`].
    pub async fn generate(
        &self,
        prompt: &str,
        tier: Option<ModelTier>,
        context: Option<&SpreadsheetContext>,
        stream: bool,
    ) -> Generation {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        let tier = tier.unwrap_or_else(|| self.select_tier(prompt, context));
        let profile = self.profiles.for_tier(tier);
        let enhanced_prompt = self.composer.compose(prompt, context);

        if stream {
            let request = GenerationRequest::new(enhanced_prompt, tier).streaming();
            return self.dispatch_stream(&request, profile).await;
        }

        let key = CacheKey::new(tier, &enhanced_prompt);
        if let Some(cached) = self.cache.get(&key) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(cache_key = %key, %tier, "Cache hit");
            return Generation::Complete(cached);
        }

        let request = GenerationRequest::new(enhanced_prompt, tier);
        match self.dispatch(&request, profile).await {
            Ok(result) => {
                self.cache.put(key, result.clone());
                Generation::Complete(result)
            }
            Err(e) => Generation::Complete(self.fallback(tier, &e)),
        }
    }

    /// Non-streaming generation
    pub async fn complete(
        &self,
        prompt: &str,
        tier: Option<ModelTier>,
        context: Option<&SpreadsheetContext>,
    ) -> GenerationResult {
        match self.generate(prompt, tier, context, false).await {
            Generation::Complete(result) => result,
            // generate only streams when asked to
            Generation::Stream(_) => fallback_result(ProviderErrorKind::Parse),
        }
    }

    /// Streaming generation; a provider that cannot open a stream yields a fallback
    pub async fn stream(
        &self,
        prompt: &str,
        tier: Option<ModelTier>,
        context: Option<&SpreadsheetContext>,
    ) -> Generation {
        self.generate(prompt, tier, context, true).await
    }

    /// Tier the classifier would pick for this request
    pub fn select_tier(&self, prompt: &str, context: Option<&SpreadsheetContext>) -> ModelTier {
        let size = context_size(context);
        let score = self.classifier.score(prompt, size);
        let tier = score.tier();
        tracing::debug!(
            large = score.large,
            small = score.small,
            context_size = size,
            %tier,
            "Classified request"
        );
        tier
    }

    pub fn profiles(&self) -> &ModelProfiles {
        &self.profiles
    }

    pub fn provider(&self) -> ProviderKind {
        self.adapter.kind()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
            streams: self.counters.streams.load(Ordering::Relaxed),
        }
    }

    async fn dispatch(
        &self,
        request: &GenerationRequest,
        profile: &ModelProfile,
    ) -> Result<GenerationResult, ProviderError> {
        let start = Instant::now();
        let result = tokio::time::timeout(profile.timeout(), self.adapter.call(request, profile))
            .await
            .unwrap_or_else(|_| Err(deadline_exceeded(profile)))?;

        tracing::info!(
            provider = %result.provider,
            model = %result.model_used,
            tier = %request.tier,
            tokens = result.tokens_used,
            latency_ms = start.elapsed().as_millis() as u64,
            "Generation complete"
        );
        Ok(result)
    }

    async fn dispatch_stream(
        &self,
        request: &GenerationRequest,
        profile: &ModelProfile,
    ) -> Generation {
        let call = self.adapter.call_stream(request, profile);
        let opened = tokio::time::timeout(profile.timeout(), call)
            .await
            .unwrap_or_else(|_| Err(deadline_exceeded(profile)));

        match opened {
            Ok(fragments) => {
                self.counters.streams.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    provider = %self.adapter.kind(),
                    tier = %request.tier,
                    "Stream opened"
                );
                Generation::Stream(fragments)
            }
            Err(e) => Generation::Complete(self.fallback(request.tier, &e)),
        }
    }

    fn fallback(&self, tier: ModelTier, error: &ProviderError) -> GenerationResult {
        self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            provider = %self.adapter.kind(),
            %tier,
            error = %error,
            kind = error.kind().as_str(),
            "Provider failed, returning fallback"
        );
        fallback_result(error.kind())
    }
}

fn deadline_exceeded(profile: &ModelProfile) -> ProviderError {
    ProviderError::Network(format!(
        "deadline of {}s exceeded for {}",
        profile.timeout_seconds, profile.identifier
    ))
}

/// Builder for Router
#[derive(Debug)]
pub struct RouterBuilder {
    adapter: Option<Arc<dyn ProviderAdapter>>,
    profiles: ModelProfiles,
    cache_size: usize,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self {
            adapter: None,
            profiles: ModelProfiles::default(),
            cache_size: 2,
        }
    }

    pub fn adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn profiles(mut self, profiles: ModelProfiles) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    pub fn build(self) -> Result<Router, RouterError> {
        let adapter = self.adapter.ok_or(RouterError::NoProvider)?;

        for (slot, profile, expected) in [
            ("large_model", &self.profiles.large, ModelTier::Large),
            ("small_model", &self.profiles.small, ModelTier::Small),
        ] {
            if profile.tier != expected {
                return Err(ConfigError::TierMismatch {
                    slot,
                    found: profile.tier,
                }
                .into());
            }
        }

        Ok(Router {
            adapter,
            profiles: self.profiles,
            classifier: ComplexityClassifier::new(),
            composer: PromptComposer::new(),
            cache: ResponseCache::new(self.cache_size),
            counters: Counters::default(),
        })
    }
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

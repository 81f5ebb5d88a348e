//! Mock provider adapter for testing

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::profile::ModelProfile;
use crate::provider::{
    GenerationRequest, GenerationResult, ProviderAdapter, ProviderError, ProviderErrorKind,
    ProviderKind,
};
use crate::stream::FragmentStream;

#[derive(Debug, Clone)]
enum Behavior {
    /// Cycle through canned responses
    Respond(Vec<String>),
    /// Every call fails with this kind of error
    Fail(ProviderErrorKind),
}

/// An adapter that answers without any network access.
///
/// Counts calls and records whether the last stream it handed out was released,
/// so router tests can assert on both.
#[derive(Debug, Clone)]
pub struct MockAdapter {
    kind: ProviderKind,
    behavior: Behavior,
    latency: Duration,
    calls: Arc<AtomicUsize>,
    stream_calls: Arc<AtomicUsize>,
    stream_released: Arc<AtomicBool>,
    index: Arc<AtomicUsize>,
}

impl MockAdapter {
    /// Create a mock that cycles through the given responses
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            kind: ProviderKind::Ollama,
            behavior: Behavior::Respond(responses),
            latency: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
            stream_calls: Arc::new(AtomicUsize::new(0)),
            stream_released: Arc::new(AtomicBool::new(false)),
            index: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a mock that always returns the same response
    pub fn constant(response: &str) -> Self {
        Self::new(vec![response.to_string()])
    }

    /// Create a mock whose every call fails
    pub fn failing(kind: ProviderErrorKind) -> Self {
        Self {
            behavior: Behavior::Fail(kind),
            ..Self::new(vec![])
        }
    }

    /// Report results as coming from a different backend
    pub fn as_provider(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    /// Simulated latency per call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of non-streaming calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of streaming calls so far
    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// Whether the most recent stream has released its connection
    pub fn stream_released(&self) -> bool {
        self.stream_released.load(Ordering::SeqCst)
    }

    fn error(kind: ProviderErrorKind) -> ProviderError {
        match kind {
            ProviderErrorKind::Network => ProviderError::Network("connection refused".to_string()),
            ProviderErrorKind::HttpStatus => ProviderError::HttpStatus {
                status: 500,
                body: "mock failure".to_string(),
            },
            ProviderErrorKind::Parse => ProviderError::Parse("mock returned garbage".to_string()),
        }
    }

    fn next_response(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        match &self.behavior {
            Behavior::Fail(kind) => Err(Self::error(*kind)),
            Behavior::Respond(responses) if responses.is_empty() => Ok(format!(
                "{{\"action\": \"text_response\", \"explanation\": \"echo: {}\", \"excel_operations\": []}}",
                request.prompt.len()
            )),
            Behavior::Respond(responses) => {
                let idx = self.index.fetch_add(1, Ordering::Relaxed);
                Ok(responses[idx % responses.len()].clone())
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn base_url(&self) -> &str {
        "mock://local"
    }

    async fn call(
        &self,
        request: &GenerationRequest,
        profile: &ModelProfile,
    ) -> Result<GenerationResult, ProviderError> {
        let start = Instant::now();
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let content = self.next_response(request)?;
        Ok(GenerationResult {
            tokens_used: (content.len() / 4) as u32,
            content,
            model_used: profile.identifier.clone(),
            provider: self.kind,
            latency_seconds: start.elapsed().as_secs_f64(),
            metadata: serde_json::Map::new(),
        })
    }

    async fn call_stream(
        &self,
        request: &GenerationRequest,
        _profile: &ModelProfile,
    ) -> Result<FragmentStream, ProviderError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let content = self.next_response(request)?;

        // One fragment per whitespace-separated word, keeping the separators
        let fragments: Vec<String> = content
            .split_inclusive(' ')
            .map(|s| s.to_string())
            .collect();

        self.stream_released.store(false, Ordering::SeqCst);
        let released = self.stream_released.clone();
        Ok(FragmentStream::from_fragments(fragments).on_release(move || {
            released.store(true, Ordering::SeqCst);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ModelTier;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_mock_adapter_cycles() {
        let mock = MockAdapter::new(vec!["one".to_string(), "two".to_string()]);
        let profile = ModelProfile::small();
        let request = GenerationRequest::new("x", ModelTier::Small);

        assert_eq!(mock.call(&request, &profile).await.unwrap().content, "one");
        assert_eq!(mock.call(&request, &profile).await.unwrap().content, "two");
        assert_eq!(mock.call(&request, &profile).await.unwrap().content, "one");
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn test_failing_mock() {
        let mock = MockAdapter::failing(ProviderErrorKind::HttpStatus);
        let err = mock
            .call(&GenerationRequest::new("x", ModelTier::Large), &ModelProfile::large())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ProviderErrorKind::HttpStatus);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_stream_release_is_observable() {
        let mock = MockAdapter::constant("select the whole table");
        let request = GenerationRequest::new("x", ModelTier::Small).streaming();
        let mut fragments = mock.call_stream(&request, &ModelProfile::small()).await.unwrap();

        assert_eq!(fragments.next().await.unwrap().unwrap(), "select ");
        assert!(!mock.stream_released());
        drop(fragments);
        assert!(mock.stream_released());
    }
}

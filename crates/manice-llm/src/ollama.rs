//! Ollama adapter for local inference

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::profile::ModelProfile;
use crate::provider::{
    endpoint, GenerationRequest, GenerationResult, ProviderAdapter, ProviderError, ProviderKind,
};
use crate::stream::{FragmentStream, LineBuffer};

/// Ollama API request format
#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    options: OllamaOptions,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

/// Ollama API response format (one object when not streaming, one per line when streaming)
#[derive(Debug, Deserialize)]
struct OllamaApiResponse {
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    total_duration: Option<u64>,
    #[serde(default)]
    load_duration: Option<u64>,
    #[serde(default)]
    eval_duration: Option<u64>,
}

/// Adapter for the Ollama `/api/generate` endpoint
#[derive(Debug, Clone)]
pub struct OllamaAdapter {
    /// Base URL for Ollama API
    base_url: String,
    /// HTTP client
    client: reqwest::Client,
}

impl OllamaAdapter {
    /// Create an adapter for the default local Ollama
    pub fn new() -> Self {
        Self::with_url("http://127.0.0.1:11434")
    }

    /// Create with custom base URL
    pub fn with_url(base_url: &str) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    /// Create with custom base URL and a shared HTTP client
    pub fn with_client(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.to_string(),
            client,
        }
    }

    async fn send(
        &self,
        request: &GenerationRequest,
        profile: &ModelProfile,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = endpoint(&self.base_url, "/api/generate");
        let body = OllamaRequest {
            model: &profile.model_path,
            prompt: &request.prompt,
            options: OllamaOptions {
                temperature: profile.temperature,
                num_predict: profile.max_output_tokens,
            },
            stream,
        };

        let response = self
            .client
            .post(&url)
            .timeout(profile.timeout())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Ollama request failed");
                ProviderError::transport(e)
            })?;

        if !response.status().is_success() {
            let err = ProviderError::from_status(response).await;
            tracing::error!(error = %err, "Ollama HTTP error");
            return Err(err);
        }

        Ok(response)
    }
}

impl Default for OllamaAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call(
        &self,
        request: &GenerationRequest,
        profile: &ModelProfile,
    ) -> Result<GenerationResult, ProviderError> {
        let start = Instant::now();
        let response = self.send(request, profile, false).await?;

        let text = response.text().await.map_err(ProviderError::transport)?;
        let api_response: OllamaApiResponse =
            serde_json::from_str(&text).map_err(|e| ProviderError::Parse(e.to_string()))?;

        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "total_duration".to_string(),
            api_response.total_duration.unwrap_or(0).into(),
        );
        metadata.insert(
            "load_duration".to_string(),
            api_response.load_duration.unwrap_or(0).into(),
        );
        metadata.insert(
            "eval_duration".to_string(),
            api_response.eval_duration.unwrap_or(0).into(),
        );

        Ok(GenerationResult {
            content: api_response.response,
            model_used: profile.identifier.clone(),
            provider: ProviderKind::Ollama,
            tokens_used: api_response.eval_count.unwrap_or(0),
            latency_seconds: start.elapsed().as_secs_f64(),
            metadata,
        })
    }

    async fn call_stream(
        &self,
        request: &GenerationRequest,
        profile: &ModelProfile,
    ) -> Result<FragmentStream, ProviderError> {
        let mut response = self.send(request, profile, true).await?;

        let fragments = async_stream::try_stream! {
            let mut lines = LineBuffer::default();
            'body: loop {
                let chunk = response.chunk().await.map_err(ProviderError::transport)?;
                let (batch, last) = match chunk {
                    Some(bytes) => (lines.push(&bytes), false),
                    None => (lines.finish().into_iter().collect(), true),
                };
                for line in batch {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let part: OllamaApiResponse = serde_json::from_str(&line)
                        .map_err(|e| ProviderError::Parse(e.to_string()))?;
                    if !part.response.is_empty() {
                        yield part.response;
                    }
                    if part.done {
                        break 'body;
                    }
                }
                if last {
                    break;
                }
            }
        };

        let model = profile.identifier.clone();
        Ok(FragmentStream::new(fragments).on_release(move || {
            tracing::debug!(provider = "ollama", model = %model, "Stream connection released");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ModelTier;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fixture() -> serde_json::Value {
        serde_json::json!({
            "model": "phi3:mini",
            "created_at": "2024-05-01T10:00:00Z",
            "response": "{\"action\": \"formula\"}",
            "done": true,
            "total_duration": 5_000_000_000u64,
            "load_duration": 1_000_000u64,
            "eval_count": 42,
            "eval_duration": 3_000_000_000u64
        })
    }

    #[tokio::test]
    async fn test_parses_generate_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "model": "phi3:mini",
                "stream": false,
                "options": {"num_predict": 2048}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(fixture()))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = OllamaAdapter::with_url(&server.uri());
        let profile = ModelProfile::small();
        let request = GenerationRequest::new("sum column B", ModelTier::Small);

        let result = adapter.call(&request, &profile).await.unwrap();
        assert_eq!(result.content, "{\"action\": \"formula\"}");
        assert_eq!(result.tokens_used, 42);
        assert_eq!(result.model_used, "phi3-mini");
        assert_eq!(result.provider, ProviderKind::Ollama);
        assert!(result.latency_seconds >= 0.0);
        assert_eq!(result.metadata["total_duration"], 5_000_000_000u64);
        assert_eq!(result.metadata["load_duration"], 1_000_000u64);
    }

    #[tokio::test]
    async fn test_missing_counters_default_to_zero() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"response": "ok"})),
            )
            .mount(&server)
            .await;

        let adapter = OllamaAdapter::with_url(&server.uri());
        let result = adapter
            .call(&GenerationRequest::new("hi", ModelTier::Small), &ModelProfile::small())
            .await
            .unwrap();
        assert_eq!(result.tokens_used, 0);
        assert_eq!(result.metadata["eval_duration"], 0);
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model 'phi3:mini' not found"))
            .mount(&server)
            .await;

        let adapter = OllamaAdapter::with_url(&server.uri());
        let err = adapter
            .call(&GenerationRequest::new("hi", ModelTier::Small), &ModelProfile::small())
            .await
            .unwrap_err();
        match err {
            ProviderError::HttpStatus { status, body } => {
                assert_eq!(status, 404);
                assert!(body.contains("not found"));
            }
            other => panic!("expected HttpStatus, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shape_mismatch_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
            .mount(&server)
            .await;

        let adapter = OllamaAdapter::with_url(&server.uri());
        let err = adapter
            .call(&GenerationRequest::new("hi", ModelTier::Small), &ModelProfile::small())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Parse(_)));
    }

    #[tokio::test]
    async fn test_unreachable_is_network_error() {
        // Port 9 (discard) is closed on test machines
        let adapter = OllamaAdapter::with_url("http://127.0.0.1:9");
        let err = adapter
            .call(&GenerationRequest::new("hi", ModelTier::Small), &ModelProfile::small())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));
    }

    #[tokio::test]
    async fn test_streaming_ndjson() {
        let server = MockServer::start().await;
        let body = concat!(
            "{\"response\":\"Use \",\"done\":false}\n",
            "{\"response\":\"=SUM(B:B)\",\"done\":false}\n",
            "{\"response\":\"\",\"done\":true,\"eval_count\":7}\n"
        );
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let adapter = OllamaAdapter::with_url(&server.uri());
        let request = GenerationRequest::new("sum", ModelTier::Small).streaming();
        let fragments = adapter.call_stream(&request, &ModelProfile::small()).await.unwrap();
        assert_eq!(fragments.collect_text().await.unwrap(), "Use =SUM(B:B)");
    }
}

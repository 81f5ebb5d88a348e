//! Provider adapter trait and common types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::ollama::OllamaAdapter;
use crate::openai::ChatCompletionsAdapter;
use crate::profile::{ModelProfile, ModelTier};
use crate::stream::FragmentStream;

/// The three local inference backends
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Ollama,
    LmStudio,
    Jan,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::Ollama,
        ProviderKind::LmStudio,
        ProviderKind::Jan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::LmStudio => "lm_studio",
            ProviderKind::Jan => "jan",
        }
    }

    /// Liveness endpoint, relative to the provider base URL
    pub fn health_path(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "/api/tags",
            ProviderKind::LmStudio | ProviderKind::Jan => "/v1/models",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a provider name is not one of the supported backends
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown provider: {0} (expected one of: ollama, lm_studio, jan)")]
pub struct UnknownProvider(pub String);

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(ProviderKind::Ollama),
            "lm_studio" | "lmstudio" | "lm-studio" => Ok(ProviderKind::LmStudio),
            "jan" => Ok(ProviderKind::Jan),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// Coarse classification of a provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Network,
    HttpStatus,
    Parse,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorKind::Network => "network",
            ProviderErrorKind::HttpStatus => "http_status",
            ProviderErrorKind::Parse => "parse",
        }
    }
}

/// Errors from provider adapters
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("Unexpected response shape: {0}")]
    Parse(String),
}

impl ProviderError {
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            ProviderError::Network(_) => ProviderErrorKind::Network,
            ProviderError::HttpStatus { .. } => ProviderErrorKind::HttpStatus,
            ProviderError::Parse(_) => ProviderErrorKind::Parse,
        }
    }

    pub(crate) fn transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Network(format!("timed out: {}", err))
        } else {
            ProviderError::Network(err.to_string())
        }
    }

    /// Build an `HttpStatus` error from a non-2xx response, keeping a short body excerpt
    pub(crate) async fn from_status(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > 512 {
            let mut cut = 512;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        ProviderError::HttpStatus { status, body }
    }
}

/// A request as dispatched to a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Fully composed prompt
    pub prompt: String,
    /// Tier the request was routed to
    pub tier: ModelTier,
    /// Whether the caller wants incremental fragments
    pub stream: bool,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, tier: ModelTier) -> Self {
        Self {
            prompt: prompt.into(),
            tier,
            stream: false,
        }
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }
}

/// Normalized result of one generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Generated text
    pub content: String,
    /// Identifier of the model profile that served the request
    pub model_used: String,
    /// Backend that produced the content
    pub provider: ProviderKind,
    /// Tokens reported by the backend (0 when unknown)
    pub tokens_used: u32,
    /// Wall-clock time spent on the request
    pub latency_seconds: f64,
    /// Provider-specific details
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Trait for local inference backends
#[async_trait]
pub trait ProviderAdapter: Send + Sync + fmt::Debug {
    /// Which backend this adapter talks to
    fn kind(&self) -> ProviderKind;

    /// Base URL of the backend
    fn base_url(&self) -> &str;

    /// Get the provider name
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    /// Run a non-streaming generation
    async fn call(
        &self,
        request: &GenerationRequest,
        profile: &ModelProfile,
    ) -> Result<GenerationResult, ProviderError>;

    /// Open a streaming generation.
    ///
    /// The returned stream owns the HTTP response; dropping it releases the connection.
    async fn call_stream(
        &self,
        request: &GenerationRequest,
        profile: &ModelProfile,
    ) -> Result<FragmentStream, ProviderError>;
}

/// Base URLs of the three backends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
    pub ollama_url: String,
    pub lm_studio_url: String,
    pub jan_url: String,
}

impl ProviderEndpoints {
    pub fn url_for(&self, kind: ProviderKind) -> &str {
        match kind {
            ProviderKind::Ollama => &self.ollama_url,
            ProviderKind::LmStudio => &self.lm_studio_url,
            ProviderKind::Jan => &self.jan_url,
        }
    }
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            ollama_url: "http://127.0.0.1:11434".to_string(),
            lm_studio_url: "http://127.0.0.1:1234".to_string(),
            jan_url: "http://127.0.0.1:1337".to_string(),
        }
    }
}

/// Build the adapter for the preferred provider.
///
/// Called once when configuration is loaded; the router never re-branches on the provider.
pub fn build_adapter(
    kind: ProviderKind,
    endpoints: &ProviderEndpoints,
    client: reqwest::Client,
) -> Arc<dyn ProviderAdapter> {
    let url = endpoints.url_for(kind);
    match kind {
        ProviderKind::Ollama => Arc::new(OllamaAdapter::with_client(url, client)),
        ProviderKind::LmStudio => Arc::new(ChatCompletionsAdapter::lm_studio(url, client)),
        ProviderKind::Jan => Arc::new(ChatCompletionsAdapter::jan(url, client)),
    }
}

/// Join a base URL and an absolute path without doubling the slash
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

//! OpenAI-compatible chat adapter (LM Studio and Jan)
//!
//! Both local servers expose `/v1/chat/completions` with the OpenAI schema.
//! They differ only in base URL and the persona sent as the system message.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::profile::ModelProfile;
use crate::provider::{
    endpoint, GenerationRequest, GenerationResult, ProviderAdapter, ProviderError, ProviderKind,
};
use crate::stream::{FragmentStream, LineBuffer};

const LM_STUDIO_PERSONA: &str = "You are Manice, an Excel AI assistant.";
const JAN_PERSONA: &str = "You are Manice, a helpful Excel AI assistant.";

/// Chat completions request format
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

/// Chat completions response format
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    content: String,
}

/// One `data:` payload of a streamed completion
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Adapter for OpenAI-compatible local servers
#[derive(Debug, Clone)]
pub struct ChatCompletionsAdapter {
    kind: ProviderKind,
    /// Base URL
    base_url: String,
    /// System message sent with every request
    persona: String,
    /// HTTP client
    client: reqwest::Client,
}

impl ChatCompletionsAdapter {
    /// Create an adapter for an arbitrary OpenAI-compatible backend
    pub fn new(kind: ProviderKind, base_url: &str, persona: &str, client: reqwest::Client) -> Self {
        Self {
            kind,
            base_url: base_url.to_string(),
            persona: persona.to_string(),
            client,
        }
    }

    /// LM Studio server (default port 1234)
    pub fn lm_studio(base_url: &str, client: reqwest::Client) -> Self {
        Self::new(ProviderKind::LmStudio, base_url, LM_STUDIO_PERSONA, client)
    }

    /// Jan server (default port 1337)
    pub fn jan(base_url: &str, client: reqwest::Client) -> Self {
        Self::new(ProviderKind::Jan, base_url, JAN_PERSONA, client)
    }

    /// The system message this adapter sends
    pub fn persona(&self) -> &str {
        &self.persona
    }

    async fn send(
        &self,
        request: &GenerationRequest,
        profile: &ModelProfile,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = endpoint(&self.base_url, "/v1/chat/completions");
        let body = ChatRequest {
            model: &profile.model_path,
            messages: vec![
                Message {
                    role: "system",
                    content: &self.persona,
                },
                Message {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: profile.temperature,
            max_tokens: profile.max_output_tokens,
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
                tracing::error!(
                    provider = %self.kind,
                    error = %e,
                    "Chat completion request failed"
                );
                ProviderError::transport(e)
            })?;

        if !response.status().is_success() {
            let err = ProviderError::from_status(response).await;
            tracing::error!(provider = %self.kind, error = %err, "Chat completion HTTP error");
            return Err(err);
        }

        Ok(response)
    }
}

/// One decoded line of a chat-completions event stream
#[derive(Debug, PartialEq)]
enum SseLine {
    Text(String),
    /// Comments, blank data and deltas without content
    Skip,
    /// The `[DONE]` sentinel
    Done,
}

/// Decode one SSE line. Undecodable payloads are a parse error.
fn parse_sse_line(line: &str) -> Result<SseLine, ProviderError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    if data.is_empty() {
        return Ok(SseLine::Skip);
    }
    let chunk: ChatChunk =
        serde_json::from_str(data).map_err(|e| ProviderError::Parse(e.to_string()))?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|s| !s.is_empty())
        .map_or(SseLine::Skip, SseLine::Text))
}

#[async_trait]
impl ProviderAdapter for ChatCompletionsAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
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
        let api_response: ChatResponse =
            serde_json::from_str(&text).map_err(|e| ProviderError::Parse(e.to_string()))?;

        let content = api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::Parse("response has no choices".to_string()))?;

        let usage = api_response.usage.unwrap_or_default();
        let tokens_used = usage
            .get("total_tokens")
            .and_then(|v| v.as_u64())
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0);

        Ok(GenerationResult {
            content,
            model_used: profile.identifier.clone(),
            provider: self.kind,
            tokens_used,
            latency_seconds: start.elapsed().as_secs_f64(),
            metadata: usage,
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
                    match parse_sse_line(&line)? {
                        SseLine::Text(text) => {
                            yield text;
                        }
                        SseLine::Skip => {}
                        SseLine::Done => break 'body,
                    }
                }
                if last {
                    break;
                }
            }
        };

        let kind = self.kind;
        let model = profile.identifier.clone();
        Ok(FragmentStream::new(fragments).on_release(move || {
            tracing::debug!(provider = %kind, model = %model, "Stream connection released");
        }))
    }
}

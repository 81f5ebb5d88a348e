//! Inbound request and user-facing response envelope
//!
//! The model is asked for a JSON object (see the response format in the
//! composed prompt). Decoding is two-step: a strict parse into
//! [`AssistantReply`], and if that fails the raw text becomes a
//! `text_response`.

use chrono::{DateTime, Utc};
use manice_llm::{GenerationResult, ModelTier, ProviderKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;

use crate::compose::SpreadsheetContext;
use crate::router::{fallback_result, Generation, Router};

/// A request from the Excel add-in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManiceRequest {
    pub instruction: String,
    #[serde(default)]
    pub context: Option<SpreadsheetContext>,
    /// Skip classification and use this tier
    #[serde(default)]
    pub force_model: Option<ModelTier>,
    #[serde(default)]
    pub stream: bool,
}

impl ManiceRequest {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            context: None,
            force_model: None,
            stream: false,
        }
    }

    /// The attached context, unless it is missing or carries nothing
    pub fn context(&self) -> Option<&SpreadsheetContext> {
        self.context.as_ref().filter(|c| !c.is_empty())
    }
}

/// One spreadsheet change proposed by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcelOperation {
    #[serde(rename = "type")]
    pub op_type: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Map<String, Value>>,
}

fn default_action() -> String {
    "unknown".to_string()
}

fn default_explanation() -> String {
    "Action completed".to_string()
}

/// The JSON object the model is asked to produce
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantReply {
    #[serde(default = "default_action")]
    pub action: String,
    #[serde(default = "default_explanation")]
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(default)]
    pub excel_operations: Vec<ExcelOperation>,
}

impl AssistantReply {
    /// Parse model output, falling back to a plain-text reply
    pub fn decode(content: &str) -> Self {
        match serde_json::from_str::<AssistantReply>(content.trim()) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::debug!(error = %e, "Model output is not a structured reply");
                Self::text(content)
            }
        }
    }

    pub fn text(content: &str) -> Self {
        Self {
            action: "text_response".to_string(),
            explanation: content.to_string(),
            parameters: None,
            excel_operations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_used: String,
    pub provider: ProviderKind,
    pub tokens_used: u32,
    /// Seconds
    pub response_time: f64,
}

impl From<&GenerationResult> for ModelInfo {
    fn from(result: &GenerationResult) -> Self {
        Self {
            model_used: result.model_used.clone(),
            provider: result.provider,
            tokens_used: result.tokens_used,
            response_time: result.latency_seconds,
        }
    }
}

/// What the add-in receives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManiceResponse {
    pub action: String,
    pub explanation: String,
    pub excel_operations: Vec<ExcelOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_info: Option<ModelInfo>,
    pub timestamp: DateTime<Utc>,
}

impl ManiceResponse {
    pub fn from_result(result: &GenerationResult) -> Self {
        let reply = AssistantReply::decode(&result.content);
        Self {
            action: reply.action,
            explanation: reply.explanation,
            excel_operations: reply.excel_operations,
            parameters: reply.parameters,
            model_info: Some(ModelInfo::from(result)),
            timestamp: Utc::now(),
        }
    }
}

/// Run one add-in request through the router and wrap the outcome.
///
/// With `stream` set the fragments are gathered before decoding; callers that
/// want incremental output should use [`Router::stream`] directly.
pub async fn handle(router: &Router, request: ManiceRequest) -> ManiceResponse {
    let ManiceRequest {
        instruction,
        context,
        force_model,
        stream,
    } = request;
    let context = context.filter(|c| !c.is_empty());

    let started = Instant::now();
    let generation = router
        .generate(&instruction, force_model, context.as_ref(), stream)
        .await;

    let result = match generation {
        Generation::Complete(result) => result,
        Generation::Stream(fragments) => {
            let tier = force_model
                .unwrap_or_else(|| router.select_tier(&instruction, context.as_ref()));
            match fragments.collect_text().await {
                Ok(content) => GenerationResult {
                    content,
                    model_used: router.profiles().for_tier(tier).identifier.clone(),
                    provider: router.provider(),
                    tokens_used: 0,
                    latency_seconds: started.elapsed().as_secs_f64(),
                    metadata: serde_json::Map::new(),
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Stream failed while collecting");
                    fallback_result(e.kind())
                }
            }
        }
    };

    ManiceResponse::from_result(&result)
}

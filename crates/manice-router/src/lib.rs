//! Manice Router - tiered model routing for the Manice Excel assistant
//!
//! Picks a large or small local model for each instruction, builds the
//! prompt from the spreadsheet context, answers repeats from a small FIFO
//! cache and turns every provider failure into a well-formed fallback result.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use manice_router::{MockAdapter, Router};
//!
//! #[tokio::main]
//! async fn main() {
//!     let router = Router::builder()
//!         .adapter(Arc::new(MockAdapter::constant("{\"action\": \"formula\"}")))
//!         .cache_size(4)
//!         .build()
//!         .unwrap();
//!
//!     let result = router.complete("sum column B", None, None).await;
//!     println!("{} ({})", result.content, result.model_used);
//! }
//! ```
//!
//! ## From configuration
//!
//! ```rust,ignore
//! let config = Config::load(None)?;
//! let router = Router::from_config(&config, reqwest::Client::new())?;
//! ```
//!
//! With the `standalone` feature (on by default) the [`gateway`] module
//! serves the router over HTTP.

// Public modules
pub mod cache;
pub mod classifier;
pub mod compose;
pub mod config;
pub mod envelope;
pub mod health;
pub mod router;

// Re-export key types for easy use
pub use cache::{CacheKey, CacheStats, ResponseCache};
pub use classifier::{ComplexityClassifier, ComplexityScore};
pub use compose::{context_size, PromptComposer, SpreadsheetContext};
pub use config::{Config, ConfigError};
pub use envelope::{
    handle, AssistantReply, ExcelOperation, ManiceRequest, ManiceResponse, ModelInfo,
};
pub use health::{HealthProbe, HealthReport, ProviderHealth};
pub use router::{
    fallback_result, is_fallback, Generation, Router, RouterBuilder, RouterError, RouterStats,
};

pub use manice_llm::{
    FragmentStream, GenerationResult, MockAdapter, ModelProfile, ModelProfiles, ModelTier,
    ProviderAdapter, ProviderError, ProviderKind,
};

#[cfg(feature = "standalone")]
pub mod gateway;

#[cfg(feature = "standalone")]
pub use gateway::{AppState, Server};

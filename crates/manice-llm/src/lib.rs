//! # Manice LLM
//!
//! Adapters for the local inference servers the Manice Excel assistant can
//! talk to.
//!
//! ## Supported Backends
//!
//! | Provider | Endpoint | Default URL |
//! |----------|----------|-------------|
//! | Ollama | `/api/generate` | `http://127.0.0.1:11434` |
//! | LM Studio | `/v1/chat/completions` | `http://127.0.0.1:1234` |
//! | Jan | `/v1/chat/completions` | `http://127.0.0.1:1337` |
//! | Mock | none | testing only |
//!
//! Every adapter turns a [`GenerationRequest`] plus a [`ModelProfile`] into a
//! normalized [`GenerationResult`], or a [`ProviderError`] classified as
//! network, HTTP status or parse failure.
//!
//! ## Quick Start
//!
//! ```rust
//! use manice_llm::{GenerationRequest, MockAdapter, ModelProfile, ModelTier, ProviderAdapter};
//!
//! #[tokio::main]
//! async fn main() {
//!     let adapter = MockAdapter::constant("{\"action\": \"formula\"}");
//!     let request = GenerationRequest::new("sum column B", ModelTier::Small);
//!
//!     let result = adapter.call(&request, &ModelProfile::small()).await.unwrap();
//!     println!("{} via {}", result.content, result.provider);
//! }
//! ```
//!
//! ## With Ollama
//!
//! ```rust,ignore
//! use manice_llm::{OllamaAdapter, ProviderAdapter};
//!
//! let ollama = OllamaAdapter::with_url("http://127.0.0.1:11434");
//! let result = ollama.call(&request, &ModelProfile::large()).await?;
//! ```

pub mod mock;
pub mod ollama;
pub mod openai;
pub mod profile;
pub mod provider;
pub mod stream;

pub use mock::MockAdapter;
pub use ollama::OllamaAdapter;
pub use openai::ChatCompletionsAdapter;
pub use profile::{ModelProfile, ModelProfiles, ModelTier};
pub use provider::{
    build_adapter, GenerationRequest, GenerationResult, ProviderAdapter, ProviderEndpoints,
    ProviderError, ProviderErrorKind, ProviderKind, UnknownProvider,
};
pub use stream::FragmentStream;

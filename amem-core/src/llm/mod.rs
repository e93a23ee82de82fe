//! LLM client abstraction.
//!
//! The attribute synthesizer and the LLM-backed embedder talk to a
//! generative backend through [`LLMClient`]. [`OpenAIClient`] speaks the
//! OpenAI chat and embeddings protocol and works with any compatible
//! server via [`ClientConfig::with_base_url`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use amem_core::llm::{ChatMessage, ClientConfig, CompletionRequest, LLMClient, OpenAIClient};
//!
//! let client = OpenAIClient::new(
//!     ClientConfig::from_env()?.with_default_model("gpt-4o-mini"),
//! )?;
//!
//! let request = CompletionRequest::new().with_message(ChatMessage::user("Hello"));
//! let response = client.complete(request).await?;
//! ```

mod client;
mod types;

pub use client::{ClientConfig, LLMClient, OpenAIClient};
pub use types::{
    ChatMessage, ChatRole, CompletionRequest, CompletionResponse, EmbeddingRequest,
    EmbeddingResponse, FinishReason, Provider, ResponseFormat, TokenUsage,
};

//! LLM client trait and the OpenAI-compatible implementation.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

use super::types::{
    ChatMessage, CompletionRequest, CompletionResponse, EmbeddingRequest, EmbeddingResponse,
    FinishReason, Provider, ResponseFormat, TokenUsage,
};

const COLLABORATOR: &str = "llm";

/// LLM client trait for making completions and embeddings.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Complete a prompt.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Create embeddings for texts.
    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse>;

    /// Get the provider for this client.
    fn provider(&self) -> Provider;
}

/// Configuration for LLM clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub api_key: String,
    /// Base URL override, e.g. a self-hosted or regional endpoint
    pub base_url: Option<String>,
    /// Chat model used when a request does not name one
    pub default_model: Option<String>,
    /// Embedding model used when a request does not name one
    pub embedding_model: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            default_model: None,
            embedding_model: None,
            timeout_secs: 120,
        }
    }

    /// Build from `OPENAI_API_KEY` and optional `OPENAI_BASE_URL`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Config("OPENAI_API_KEY is not set".to_string()))?;
        let mut config = Self::new(api_key);
        config.base_url = std::env::var("OPENAI_BASE_URL").ok();
        Ok(config)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Client for OpenAI and any server exposing the same protocol.
pub struct OpenAIClient {
    config: ClientConfig,
    http: Client,
}

impl OpenAIClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";
    const DEFAULT_MODEL: &'static str = "gpt-4o-mini";
    const DEFAULT_EMBEDDING_MODEL: &'static str = "text-embedding-3-small";

    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { config, http })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url(), path);
        debug!(url = %url, "LLM request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::collaborator_timeout(COLLABORATOR, self.config.timeout_secs * 1000)
                } else {
                    Error::collaborator(COLLABORATOR, format!("HTTP request failed: {}", e))
                }
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            Error::collaborator(COLLABORATOR, format!("Failed to read response: {}", e))
        })?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiError>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(Error::collaborator(
                COLLABORATOR,
                format!("API error ({}): {}", status, message),
            ));
        }

        serde_json::from_str(&text).map_err(|e| {
            Error::collaborator(COLLABORATOR, format!("Failed to parse response: {}", e))
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<WireFormat>,
}

#[derive(Debug, Serialize)]
struct WireFormat {
    #[serde(rename = "type")]
    kind: ResponseFormat,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    id: String,
    model: String,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ReplyMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    model: String,
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl ChatRequest {
    fn from_request(request: CompletionRequest, model: String) -> Self {
        let response_format = match request.response_format {
            ResponseFormat::Text => None,
            kind => Some(WireFormat { kind }),
        };
        Self {
            model,
            messages: request.transcript(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format,
        }
    }
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let model = request
            .model
            .clone()
            .or_else(|| self.config.default_model.clone())
            .unwrap_or_else(|| Self::DEFAULT_MODEL.to_string());

        let body = ChatRequest::from_request(request, model);
        let response: ChatResponse = self.post_json("chat/completions", &body).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::collaborator(COLLABORATOR, "No choices in response"))?;

        Ok(CompletionResponse {
            id: response.id,
            model: response.model,
            content: choice.message.content.unwrap_or_default(),
            finish_reason: choice.finish_reason.as_deref().map(FinishReason::parse),
            usage: response.usage,
        })
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        let expected = request.texts.len();
        let body = EmbeddingsRequest {
            model: request
                .model
                .or_else(|| self.config.embedding_model.clone())
                .unwrap_or_else(|| Self::DEFAULT_EMBEDDING_MODEL.to_string()),
            input: request.texts,
        };

        let response: EmbeddingsResponse = self.post_json("embeddings", &body).await?;
        if response.data.len() != expected {
            return Err(Error::collaborator(
                COLLABORATOR,
                format!(
                    "expected {} embeddings, got {}",
                    expected,
                    response.data.len()
                ),
            ));
        }

        let mut data = response.data;
        data.sort_by_key(|d| d.index);

        Ok(EmbeddingResponse {
            model: response.model,
            embeddings: data.into_iter().map(|d| d.embedding).collect(),
            usage: response.usage,
        })
    }

    fn provider(&self) -> Provider {
        if self.config.base_url.is_some() {
            Provider::OpenAICompatible
        } else {
            Provider::OpenAI
        }
    }
}

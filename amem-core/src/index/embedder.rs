//! Text embedders used by the in-memory index.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::llm::{EmbeddingRequest, LLMClient};

/// Turns text into vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed each text; the output has one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "have", "i", "in", "is", "it",
    "my", "of", "on", "or", "that", "the", "this", "to", "was", "with",
];

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[\p{L}\p{N}]+").expect("valid token regex"))
}

/// Lowercased content words of `text`, stopwords removed.
pub fn content_tokens(text: &str) -> Vec<String> {
    token_pattern()
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|t| t.chars().count() > 1 && !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Deterministic bag-of-words embedder using feature hashing.
///
/// Needs no model or network, which makes it suitable for tests and
/// offline agents. Texts sharing content words get positive cosine
/// similarity; texts sharing none score zero.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub const DEFAULT_DIMENSION: usize = 512;

    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(bytes) % self.dimension as u64) as usize
    }

    /// Embed a single text synchronously.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in content_tokens(text) {
            vector[self.bucket(&token)] += 1.0;
        }
        normalize(&mut vector);
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Embedder backed by an LLM provider's embeddings endpoint.
pub struct LlmEmbedder {
    client: Arc<dyn LLMClient>,
    model: Option<String>,
}

impl LlmEmbedder {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self {
            client,
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[async_trait]
impl Embedder for LlmEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .embed(EmbeddingRequest {
                model: self.model.clone(),
                texts: texts.to_vec(),
            })
            .await?;

        if response.embeddings.len() != texts.len() {
            return Err(Error::collaborator(
                "embedder",
                format!(
                    "expected {} vectors, got {}",
                    texts.len(),
                    response.embeddings.len()
                ),
            ));
        }
        Ok(response.embeddings)
    }
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
}

/// Cosine similarity clamped to `[0, 1]`. Mismatched or zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_tokens() {
        assert_eq!(
            content_tokens("Backpropagation in Neural nets!"),
            vec!["backpropagation", "neural", "nets"]
        );
    }

    #[test]
    fn test_hashing_is_deterministic() {
        let embedder = HashingEmbedder::default();
        assert_eq!(
            embedder.embed_one("same text here"),
            embedder.embed_one("same text here")
        );
        assert_eq!(embedder.embed_one("x").len(), HashingEmbedder::DEFAULT_DIMENSION);
    }

    #[test]
    fn test_shared_words_raise_similarity() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed_one("Deep learning neural networks");
        let b = embedder.embed_one("Backpropagation in neural networks");
        let c = embedder.embed_one("Growing tomatoes in the garden");

        let related = cosine_similarity(&a, &b);
        let unrelated = cosine_similarity(&a, &c);
        assert!(related > 0.4, "related = {}", related);
        assert!(unrelated < related);
    }

    #[test]
    fn test_cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-6);
    }
}

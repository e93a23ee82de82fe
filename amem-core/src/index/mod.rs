//! Embedding index: nearest-neighbor search over note content.
//!
//! The evolution engine and the retrieval service treat the index as an
//! opaque oracle behind [`EmbeddingIndex`]. The facade keeps it in step
//! with the note store on every create, content update and delete.

mod embedder;
mod memory;

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::memory::NoteId;

pub use embedder::{content_tokens, cosine_similarity, Embedder, HashingEmbedder, LlmEmbedder};
pub use memory::InMemoryEmbeddingIndex;

/// A note id with its similarity to a query, in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredId {
    pub id: NoteId,
    pub score: f32,
}

impl ScoredId {
    pub fn new(id: NoteId, score: f32) -> Self {
        Self {
            id,
            score: if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) },
        }
    }

    /// Clamp a score taken from an index implementation into `[0, 1]`,
    /// mapping NaN to 0.
    pub fn normalized(self) -> Self {
        Self::new(self.id, self.score)
    }

    /// Descending score, then ascending id.
    pub fn rank_order(a: &Self, b: &Self) -> Ordering {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Vector similarity search over note content.
#[async_trait]
pub trait EmbeddingIndex: Send + Sync {
    /// Up to `k` stored notes most similar to `text`, best first.
    async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredId>>;

    /// Insert or replace the vector for a note.
    async fn upsert(&self, id: NoteId, text: &str) -> Result<()>;

    /// Forget a note. Removing an unknown id is not an error.
    async fn remove(&self, id: NoteId) -> Result<()>;
}

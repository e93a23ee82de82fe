//! Brute-force in-memory embedding index.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::embedder::{cosine_similarity, Embedder};
use super::{EmbeddingIndex, ScoredId};
use crate::error::{Error, Result};
use crate::memory::NoteId;

/// Embedding index that keeps every vector in memory and scans on query.
///
/// Adequate for the few thousand notes a single agent accumulates.
pub struct InMemoryEmbeddingIndex<E: Embedder> {
    embedder: E,
    vectors: RwLock<HashMap<NoteId, Vec<f32>>>,
}

impl<E: Embedder> InMemoryEmbeddingIndex<E> {
    pub fn new(embedder: E) -> Self {
        Self {
            embedder,
            vectors: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: NoteId) -> bool {
        self.vectors
            .read()
            .map(|v| v.contains_key(&id))
            .unwrap_or(false)
    }

    async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        self.embedder
            .embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::collaborator("embedder", "no vector returned"))
    }
}

fn lock_error<T>(e: std::sync::PoisonError<T>) -> Error {
    Error::Internal(format!("Failed to lock index: {}", e))
}

#[async_trait]
impl<E: Embedder> EmbeddingIndex for InMemoryEmbeddingIndex<E> {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredId>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query = self.embed_single(text).await?;

        let mut scored: Vec<ScoredId> = {
            let vectors = self.vectors.read().map_err(lock_error)?;
            vectors
                .iter()
                .map(|(id, vector)| ScoredId::new(*id, cosine_similarity(&query, vector)))
                .collect()
        };

        scored.sort_by(ScoredId::rank_order);
        scored.truncate(k);
        Ok(scored)
    }

    async fn upsert(&self, id: NoteId, text: &str) -> Result<()> {
        let vector = self.embed_single(text).await?;
        self.vectors.write().map_err(lock_error)?.insert(id, vector);
        Ok(())
    }

    async fn remove(&self, id: NoteId) -> Result<()> {
        self.vectors.write().map_err(lock_error)?.remove(&id);
        Ok(())
    }
}

//! Similarity search with one-hop link expansion.
//!
//! Direct hits come from the embedding index. Each direct hit's links are
//! then followed one hop, surfacing notes the index ranked too low but
//! that evolution judged related.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::evolution::ConsistencyWarning;
use crate::index::{EmbeddingIndex, ScoredId};
use crate::memory::{MemoryNote, NoteId, NoteStore};

/// How a search result was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum HitOrigin {
    /// Returned by the index
    Direct,
    /// Linked from the direct hit `via`
    Linked { via: NoteId },
}

/// A search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub note: MemoryNote,
    /// Index score, or the score of the direct hit that surfaced it
    pub score: f32,
    pub origin: HitOrigin,
}

impl SearchHit {
    pub fn id(&self) -> NoteId {
        self.note.id
    }

    pub fn is_direct(&self) -> bool {
        self.origin == HitOrigin::Direct
    }
}

/// Per-call search settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    /// Direct hits requested from the index
    pub k: usize,
    /// Override the configured link expansion
    pub expand: Option<bool>,
}

impl SearchOptions {
    pub fn new(k: usize) -> Self {
        Self { k, expand: None }
    }

    pub fn with_expand(mut self, expand: bool) -> Self {
        self.expand = Some(expand);
        self
    }
}

/// Read-only search over the store and index.
pub struct RetrievalService {
    store: Arc<dyn NoteStore>,
    index: Arc<dyn EmbeddingIndex>,
    config: EngineConfig,
}

impl RetrievalService {
    pub fn new(
        store: Arc<dyn NoteStore>,
        index: Arc<dyn EmbeddingIndex>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            index,
            config,
        }
    }

    #[instrument(skip(self, query), fields(k = options.k))]
    pub async fn search(&self, query: &str, options: SearchOptions) -> Result<Vec<SearchHit>> {
        if options.k == 0 {
            return Ok(Vec::new());
        }

        let index = &self.index;
        let mut scored: Vec<ScoredId> = self
            .config
            .index_policy
            .call("index", || index.query(query, options.k))
            .await?
            .into_iter()
            .map(ScoredId::normalized)
            .collect();
        scored.sort_by(ScoredId::rank_order);
        scored.truncate(options.k);

        let mut seen = HashSet::new();
        let mut hits = Vec::with_capacity(scored.len());
        for ScoredId { id, score } in scored {
            if score < self.config.search_min_score || !seen.insert(id) {
                continue;
            }
            match self.resolve(id) {
                Some(note) => hits.push(SearchHit {
                    note,
                    score,
                    origin: HitOrigin::Direct,
                }),
                None => ConsistencyWarning::UnresolvableHit { id }.emit(),
            }
        }

        let expand = options.expand.unwrap_or(self.config.expand_search);
        if expand {
            let limit = options.k.saturating_mul(self.config.expansion_factor);
            let expanded = self.expand(&hits, &mut seen, limit);
            debug!(direct = hits.len(), expanded = expanded.len(), "Expanded search hits");
            hits.extend(expanded);
        }
        Ok(hits)
    }

    /// Follow links one hop from the direct hits, up to `limit` results in total.
    fn expand(
        &self,
        direct: &[SearchHit],
        seen: &mut HashSet<NoteId>,
        limit: usize,
    ) -> Vec<SearchHit> {
        let mut expanded = Vec::new();
        'hits: for hit in direct {
            for &link in &hit.note.links {
                if direct.len() + expanded.len() >= limit {
                    break 'hits;
                }
                if !seen.insert(link) {
                    continue;
                }
                match self.resolve(link) {
                    Some(note) => expanded.push(SearchHit {
                        note,
                        score: hit.score,
                        origin: HitOrigin::Linked { via: hit.id() },
                    }),
                    None => ConsistencyWarning::DanglingLink {
                        from: hit.id(),
                        to: link,
                    }
                    .emit(),
                }
            }
        }

        expanded.sort_by(|a, b| {
            ScoredId::rank_order(&ScoredId::new(a.id(), a.score), &ScoredId::new(b.id(), b.score))
        });
        expanded
    }

    fn resolve(&self, id: NoteId) -> Option<MemoryNote> {
        match self.store.get(id) {
            Ok(note) => Some(note),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                debug!(note = %id, error = %e, "Failed to read search hit");
                None
            }
        }
    }
}

//! The public memory facade.
//!
//! [`MemorySystem`] keeps the note store and embedding index in step and
//! runs an evolution pass after every content-affecting write. Evolution
//! problems are logged and recorded in note history; they never fail the
//! add or update that triggered them.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::evolution::{ConsistencyWarning, EvolutionEngine, EvolutionReport, NoteLocks};
use crate::index::{EmbeddingIndex, HashingEmbedder, InMemoryEmbeddingIndex, LlmEmbedder};
use crate::llm::LLMClient;
use crate::memory::{
    validate_timestamp, InMemoryNoteStore, MemoryNote, NewNote, NoteId, NoteStore, NoteUpdate,
    Provenance,
};
use crate::retrieval::{RetrievalService, SearchHit, SearchOptions};
use crate::synth::{AttributeSynthesizer, HeuristicSynthesizer, LlmSynthesizer};

/// Agent memory with automatic linking.
pub struct MemorySystem {
    store: Arc<dyn NoteStore>,
    index: Arc<dyn EmbeddingIndex>,
    synthesizer: Arc<dyn AttributeSynthesizer>,
    locks: Arc<NoteLocks>,
    engine: EvolutionEngine,
    retrieval: RetrievalService,
    config: EngineConfig,
}

impl MemorySystem {
    /// Assemble a system from its collaborators. Fails on invalid config.
    pub fn new(
        store: Arc<dyn NoteStore>,
        index: Arc<dyn EmbeddingIndex>,
        synthesizer: Arc<dyn AttributeSynthesizer>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let locks = Arc::new(NoteLocks::new());
        let engine = EvolutionEngine::new(
            Arc::clone(&store),
            Arc::clone(&index),
            Arc::clone(&synthesizer),
            Arc::clone(&locks),
            config.clone(),
        );
        let retrieval = RetrievalService::new(Arc::clone(&store), Arc::clone(&index), config.clone());
        Ok(Self {
            store,
            index,
            synthesizer,
            locks,
            engine,
            retrieval,
            config,
        })
    }

    /// Process-local system needing no network: in-memory store, hashing
    /// embedder and the heuristic synthesizer.
    pub fn offline(config: EngineConfig) -> Result<Self> {
        Self::new(
            Arc::new(InMemoryNoteStore::new()),
            Arc::new(InMemoryEmbeddingIndex::new(HashingEmbedder::default())),
            Arc::new(HeuristicSynthesizer::new()),
            config,
        )
    }

    /// System whose embeddings and attributes come from an LLM provider.
    pub fn with_llm(
        store: Arc<dyn NoteStore>,
        client: Arc<dyn LLMClient>,
        config: EngineConfig,
    ) -> Result<Self> {
        Self::new(
            store,
            Arc::new(InMemoryEmbeddingIndex::new(LlmEmbedder::new(Arc::clone(&client)))),
            Arc::new(LlmSynthesizer::new(client)),
            config,
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn NoteStore> {
        &self.store
    }

    /// Store a new note and link it into the graph.
    #[instrument(skip(self, new), fields(content_len = new.content.len()))]
    pub async fn add(&self, new: NewNote) -> Result<NoteId> {
        if new.content.trim().is_empty() {
            return Err(Error::InvalidInput("note content must not be empty".into()));
        }
        if let Some(timestamp) = &new.timestamp {
            validate_timestamp(timestamp)?;
        }

        let note = self.prepare(new).await;
        let id = self.store.create(&note)?;
        self.sync_index(id, &note.content).await;
        info!(note = %id, "Added note");

        self.evolve_quietly(id).await;
        Ok(id)
    }

    /// Build the record for a new note, synthesizing omitted attributes.
    async fn prepare(&self, new: NewNote) -> MemoryNote {
        let mut note = MemoryNote::new(new.content.clone());
        note.category = self.config.default_category.clone();
        if let Some(category) = new.category.clone() {
            note = note.with_category(category);
        }
        if let Some(timestamp) = new.timestamp.clone() {
            note = note.with_timestamp(timestamp);
        }

        if new.needs_synthesis() {
            let synthesizer = &self.synthesizer;
            let content = new.content.as_str();
            match self
                .config
                .synthesizer_policy
                .call("synthesizer", || synthesizer.synthesize(content))
                .await
            {
                Ok(attributes) => {
                    if !attributes.context.trim().is_empty() {
                        note.context = attributes.context.trim().to_string();
                        note.provenance.context = Provenance::Synthesized;
                    }
                    if !attributes.keywords.is_empty() {
                        note.merge_keywords(&attributes.keywords);
                        note.provenance.keywords = Provenance::Synthesized;
                    }
                    if !attributes.tags.is_empty() {
                        note.merge_tags(&attributes.tags);
                        note.provenance.tags = Provenance::Synthesized;
                    }
                }
                Err(e) => warn!(error = %e, "Attribute synthesis failed, using defaults"),
            }
        }

        if let Some(context) = new.context {
            note = note.with_context(context);
        }
        if let Some(keywords) = new.keywords {
            note = note.with_keywords(keywords);
        }
        if let Some(tags) = new.tags {
            note = note.with_tags(tags);
        }
        note
    }

    /// Fetch a note by id.
    pub fn read(&self, id: NoteId) -> Result<MemoryNote> {
        self.store.get(id)
    }

    /// Overwrite the fields given in `update`, then re-evolve if needed.
    #[instrument(skip(self, update))]
    pub async fn update(&self, id: NoteId, update: NoteUpdate) -> Result<()> {
        if let Some(content) = &update.content {
            if content.trim().is_empty() {
                return Err(Error::InvalidInput("note content must not be empty".into()));
            }
        }
        if let Some(timestamp) = &update.timestamp {
            validate_timestamp(timestamp)?;
        }

        let content = {
            let _lock = self.locks.lock(id).await?;
            let mut note = self.store.get(id)?;
            let changed = update.apply_to(&mut note);
            if update.is_empty() {
                return Ok(());
            }
            if !changed.is_empty() {
                note.updated_at = Utc::now();
            }
            self.store.put(&note)?;
            debug!(changed = ?changed, "Updated note");
            update.content.as_ref().map(|_| note.content)
        };

        if let Some(content) = content {
            self.sync_index(id, &content).await;
        }
        if update.triggers_evolution() {
            self.evolve_quietly(id).await;
        }
        Ok(())
    }

    /// Delete a note and every link to it. Returns false if it was absent.
    pub async fn delete(&self, id: NoteId) -> Result<bool> {
        self.engine.delete_with_repair(id).await
    }

    /// Top `k` matches for `query`, plus notes linked to them.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        self.retrieval.search(query, SearchOptions::new(k)).await
    }

    pub async fn search_with(&self, query: &str, options: SearchOptions) -> Result<Vec<SearchHit>> {
        self.retrieval.search(query, options).await
    }

    /// All notes by ascending id.
    pub fn list(&self) -> Result<Vec<MemoryNote>> {
        self.store.list()
    }

    /// Run an evolution pass for `id` and return its report.
    pub async fn evolve(&self, id: NoteId) -> Result<EvolutionReport> {
        self.engine.evolve(id).await
    }

    /// Re-embed every stored note. Returns the number indexed.
    pub async fn reindex(&self) -> Result<usize> {
        let notes = self.store.list()?;
        let index = &self.index;
        for note in &notes {
            self.config
                .index_policy
                .call("index", || index.upsert(note.id, &note.content))
                .await?;
        }
        info!(notes = notes.len(), "Rebuilt embedding index");
        Ok(notes.len())
    }

    async fn sync_index(&self, id: NoteId, content: &str) {
        let index = &self.index;
        if let Err(e) = self
            .config
            .index_policy
            .call("index", || index.upsert(id, content))
            .await
        {
            ConsistencyWarning::IndexOutOfSync {
                id,
                reason: e.to_string(),
            }
            .emit();
        }
    }

    async fn evolve_quietly(&self, id: NoteId) {
        if let Err(e) = self.engine.evolve(id).await {
            warn!(note = %id, error = %e, "Evolution pass failed");
        }
    }
}

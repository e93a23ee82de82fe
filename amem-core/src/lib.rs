//! # amem-core
//!
//! Agentic memory for LLM agents: notes that link and refine themselves as
//! new knowledge arrives.
//!
//! ## Core Components
//!
//! - **Memory**: notes, provenance and the note stores (in-memory, SQLite)
//! - **Index**: embedding index seam with an in-memory implementation
//! - **Synth**: attribute synthesizer seam (heuristic or LLM-backed)
//! - **Evolution**: the link/refine pass and deletion repair
//! - **Retrieval**: similarity search with one-hop link expansion
//! - **System**: the [`MemorySystem`] facade tying them together
//!
//! ## Example
//!
//! ```rust,ignore
//! use amem_core::{EngineConfig, MemorySystem, NewNote};
//!
//! let memory = MemorySystem::offline(EngineConfig::default())?;
//! let n1 = memory.add(NewNote::new("Deep learning neural networks")).await?;
//! let n2 = memory.add(NewNote::new("Backpropagation in neural networks")).await?;
//!
//! assert!(memory.read(n2)?.has_link(n1));
//! for hit in memory.search("neural networks", 5).await? {
//!     println!("{} ({:.2}): {}", hit.note.id, hit.score, hit.note.content);
//! }
//! ```

pub mod config;
pub mod error;
pub mod evolution;
pub mod index;
pub mod llm;
pub mod memory;
pub mod retrieval;
pub mod retry;
pub mod synth;
pub mod system;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use evolution::{ConsistencyWarning, EvolutionEngine, EvolutionReport, NoteLocks};
pub use index::{
    EmbeddingIndex, Embedder, HashingEmbedder, InMemoryEmbeddingIndex, LlmEmbedder, ScoredId,
};
pub use llm::{ClientConfig, LLMClient, OpenAIClient};
pub use memory::{
    EvolutionEvent, InMemoryNoteStore, MemoryNote, NewNote, NoteAttribute, NoteId, NoteStore,
    NoteUpdate, Provenance, SqliteNoteStore,
};
pub use retrieval::{HitOrigin, RetrievalService, SearchHit, SearchOptions};
pub use retry::CollaboratorPolicy;
pub use synth::{
    AttributeSynthesizer, HeuristicSynthesizer, LinkDecision, LlmSynthesizer, RelevanceJudgment,
    SynthesizedAttributes,
};
pub use system::MemorySystem;

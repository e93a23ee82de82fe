//! Attribute synthesis: generated note attributes and pairwise relevance.
//!
//! The synthesizer is a capability interface with fixed result types. Its
//! output never reaches a note directly: the evolution engine merges it
//! under the provenance rules in [`crate::memory::MemoryNote`], so a
//! pinned field cannot be overwritten by generated text.

mod heuristic;
mod llm;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::memory::MemoryNote;

pub use heuristic::HeuristicSynthesizer;
pub use llm::{extract_json, LlmSynthesizer};

/// Attributes generated for a fresh note.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizedAttributes {
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Outcome of judging a subject note against a candidate neighbor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkDecision {
    /// The notes share an actionable relationship
    Link,
    /// Similar vectors, unrelated meaning
    NoLink,
}

/// A relevance judgment with the attribute changes proposed alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelevanceJudgment {
    pub decision: LinkDecision,
    #[serde(default)]
    pub proposed_keywords: Vec<String>,
    #[serde(default)]
    pub proposed_tags: Vec<String>,
    #[serde(default)]
    pub proposed_context_subject: Option<String>,
    #[serde(default)]
    pub proposed_context_candidate: Option<String>,
}

impl RelevanceJudgment {
    pub fn link() -> Self {
        Self {
            decision: LinkDecision::Link,
            proposed_keywords: Vec::new(),
            proposed_tags: Vec::new(),
            proposed_context_subject: None,
            proposed_context_candidate: None,
        }
    }

    pub fn no_link() -> Self {
        Self {
            decision: LinkDecision::NoLink,
            ..Self::link()
        }
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.proposed_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.proposed_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_subject_context(mut self, context: impl Into<String>) -> Self {
        self.proposed_context_subject = Some(context.into());
        self
    }

    pub fn with_candidate_context(mut self, context: impl Into<String>) -> Self {
        self.proposed_context_candidate = Some(context.into());
        self
    }

    pub fn is_link(&self) -> bool {
        self.decision == LinkDecision::Link
    }
}

/// Generative backend producing note attributes and relevance judgments.
#[async_trait]
pub trait AttributeSynthesizer: Send + Sync {
    /// Generate context, keywords and tags for note content.
    async fn synthesize(&self, content: &str) -> Result<SynthesizedAttributes>;

    /// Decide whether `subject` and `candidate` should be linked.
    async fn judge(
        &self,
        subject: &MemoryNote,
        candidate: &MemoryNote,
    ) -> Result<RelevanceJudgment>;
}

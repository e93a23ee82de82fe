//! Offline synthesizer based on content-word overlap.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;

use super::{AttributeSynthesizer, RelevanceJudgment, SynthesizedAttributes};
use crate::error::Result;
use crate::index::content_tokens;
use crate::memory::MemoryNote;

const MAX_CONTEXT_CHARS: usize = 160;

/// Deterministic synthesizer that needs no model.
///
/// Keywords are the most frequent content words; two notes are linked when
/// they share at least `min_shared_terms` words across content, keywords
/// and tags. It never proposes context rewrites.
#[derive(Debug, Clone)]
pub struct HeuristicSynthesizer {
    max_keywords: usize,
    max_tags: usize,
    min_shared_terms: usize,
}

impl Default for HeuristicSynthesizer {
    fn default() -> Self {
        Self {
            max_keywords: 5,
            max_tags: 3,
            min_shared_terms: 1,
        }
    }
}

impl HeuristicSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_shared_terms(mut self, min: usize) -> Self {
        self.min_shared_terms = min.max(1);
        self
    }

    pub fn with_max_keywords(mut self, max: usize) -> Self {
        self.max_keywords = max;
        self
    }

    fn ranked_terms(&self, content: &str) -> Vec<String> {
        let tokens = content_tokens(content);
        let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
        for (position, token) in tokens.iter().enumerate() {
            counts.entry(token.as_str()).or_insert((0, position)).0 += 1;
        }
        let mut ranked: Vec<(&str, usize, usize)> = counts
            .into_iter()
            .map(|(term, (count, first))| (term, count, first))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
        ranked.into_iter().map(|(term, _, _)| term.to_string()).collect()
    }

    fn terms(note: &MemoryNote) -> BTreeSet<String> {
        let mut terms: BTreeSet<String> = content_tokens(&note.content).into_iter().collect();
        terms.extend(note.keywords.iter().map(|k| k.to_lowercase()));
        terms.extend(note.tags.iter().map(|t| t.to_lowercase()));
        terms
    }
}

fn first_sentence(content: &str) -> String {
    let trimmed = content.trim();
    let end = trimmed
        .find(|c| matches!(c, '.' | '!' | '?' | '\n'))
        .unwrap_or(trimmed.len());
    trimmed[..end].chars().take(MAX_CONTEXT_CHARS).collect()
}

#[async_trait]
impl AttributeSynthesizer for HeuristicSynthesizer {
    async fn synthesize(&self, content: &str) -> Result<SynthesizedAttributes> {
        let ranked = self.ranked_terms(content);
        Ok(SynthesizedAttributes {
            context: first_sentence(content),
            keywords: ranked.iter().take(self.max_keywords).cloned().collect(),
            tags: ranked.into_iter().take(self.max_tags).collect(),
        })
    }

    async fn judge(
        &self,
        subject: &MemoryNote,
        candidate: &MemoryNote,
    ) -> Result<RelevanceJudgment> {
        let subject_terms = Self::terms(subject);
        let shared: Vec<String> = Self::terms(candidate)
            .intersection(&subject_terms)
            .cloned()
            .collect();

        if shared.len() < self.min_shared_terms {
            return Ok(RelevanceJudgment::no_link());
        }
        Ok(RelevanceJudgment::link()
            .with_tags(shared.iter().take(self.max_tags).cloned())
            .with_keywords(shared))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_synthesize_ranks_by_frequency() {
        let synth = HeuristicSynthesizer::new();
        let attrs = synth
            .synthesize("Rust ownership. Ownership rules borrow checking in Rust and ownership!")
            .await
            .unwrap();

        assert_eq!(attrs.context, "Rust ownership");
        assert_eq!(attrs.keywords[0], "ownership");
        assert_eq!(attrs.keywords[1], "rust");
        assert_eq!(attrs.tags.len(), 3);
    }

    #[tokio::test]
    async fn test_synthesize_empty_content() {
        let attrs = HeuristicSynthesizer::new().synthesize("  ").await.unwrap();
        assert_eq!(attrs, SynthesizedAttributes::default());
    }

    #[tokio::test]
    async fn test_judge_links_on_shared_terms() {
        let synth = HeuristicSynthesizer::new();
        let n1 = MemoryNote::new("Deep learning neural networks");
        let n2 = MemoryNote::new("Backpropagation in neural nets");
        let food = MemoryNote::new("My favorite food is chicken wings");

        let judgment = synth.judge(&n2, &n1).await.unwrap();
        assert!(judgment.is_link());
        assert_eq!(judgment.proposed_keywords, vec!["neural"]);
        assert!(judgment.proposed_context_subject.is_none());

        assert!(!synth.judge(&n2, &food).await.unwrap().is_link());
    }

    #[tokio::test]
    async fn test_judge_respects_min_shared_terms() {
        let synth = HeuristicSynthesizer::new().with_min_shared_terms(2);
        let n1 = MemoryNote::new("Deep learning neural networks");
        let n2 = MemoryNote::new("Backpropagation in neural nets");
        assert!(!synth.judge(&n2, &n1).await.unwrap().is_link());

        let tagged = n2.with_tags(["learning"]);
        assert!(synth.judge(&tagged, &n1).await.unwrap().is_link());
    }
}

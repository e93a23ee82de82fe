//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::memory::DEFAULT_CATEGORY;
use crate::retry::CollaboratorPolicy;

/// Default number of neighbors considered per evolution pass.
pub const DEFAULT_NEIGHBOR_COUNT: usize = 5;

/// Default maximum concurrent relevance judgments.
pub const DEFAULT_MAX_PARALLEL: usize = 5;

/// Configuration for evolution and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Candidates retrieved per evolution pass (`k`)
    pub neighbor_count: usize,
    /// Minimum similarity for a candidate to be judged (`τ`)
    pub link_threshold: f32,
    /// Maximum concurrent relevance judgments within one pass
    pub max_parallel_judgments: usize,
    /// Deadline for the judgment phase of one pass, in milliseconds
    pub evolution_deadline_ms: u64,
    /// Timeout/retry budget for embedding index calls
    pub index_policy: CollaboratorPolicy,
    /// Timeout/retry budget for attribute synthesizer calls
    pub synthesizer_policy: CollaboratorPolicy,
    /// Whether search follows links one hop from direct hits
    pub expand_search: bool,
    /// Search returns at most `k * expansion_factor` notes
    pub expansion_factor: usize,
    /// Direct search hits scoring below this are dropped
    pub search_min_score: f32,
    /// Category given to notes created without one
    pub default_category: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            neighbor_count: DEFAULT_NEIGHBOR_COUNT,
            link_threshold: 0.3,
            max_parallel_judgments: DEFAULT_MAX_PARALLEL,
            evolution_deadline_ms: 120_000,
            index_policy: CollaboratorPolicy::default().with_timeout_ms(10_000),
            synthesizer_policy: CollaboratorPolicy::default(),
            expand_search: true,
            expansion_factor: 2,
            search_min_score: 0.0,
            default_category: DEFAULT_CATEGORY.to_string(),
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document; omitted fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_neighbor_count(mut self, k: usize) -> Self {
        self.neighbor_count = k;
        self
    }

    pub fn with_link_threshold(mut self, threshold: f32) -> Self {
        self.link_threshold = threshold;
        self
    }

    pub fn with_max_parallel_judgments(mut self, max: usize) -> Self {
        self.max_parallel_judgments = max.max(1);
        self
    }

    pub fn with_evolution_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.evolution_deadline_ms = deadline_ms;
        self
    }

    pub fn with_index_policy(mut self, policy: CollaboratorPolicy) -> Self {
        self.index_policy = policy;
        self
    }

    pub fn with_synthesizer_policy(mut self, policy: CollaboratorPolicy) -> Self {
        self.synthesizer_policy = policy;
        self
    }

    pub fn with_expand_search(mut self, expand: bool) -> Self {
        self.expand_search = expand;
        self
    }

    pub fn with_expansion_factor(mut self, factor: usize) -> Self {
        self.expansion_factor = factor;
        self
    }

    pub fn with_search_min_score(mut self, min_score: f32) -> Self {
        self.search_min_score = min_score;
        self
    }

    pub fn with_default_category(mut self, category: impl Into<String>) -> Self {
        self.default_category = category.into();
        self
    }

    /// Reject settings the engine cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.neighbor_count == 0 {
            return Err(Error::Config("neighbor_count must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.link_threshold) {
            return Err(Error::Config(format!(
                "link_threshold must be within [0, 1], got {}",
                self.link_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.search_min_score) {
            return Err(Error::Config(format!(
                "search_min_score must be within [0, 1], got {}",
                self.search_min_score
            )));
        }
        if self.expansion_factor == 0 {
            return Err(Error::Config("expansion_factor must be at least 1".into()));
        }
        if self.max_parallel_judgments == 0 {
            return Err(Error::Config("max_parallel_judgments must be at least 1".into()));
        }
        if self.default_category.trim().is_empty() {
            return Err(Error::Config("default_category must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(EngineConfig::default()
            .with_neighbor_count(0)
            .validate()
            .is_err());
        assert!(EngineConfig::default()
            .with_link_threshold(1.5)
            .validate()
            .is_err());
        assert!(EngineConfig::default()
            .with_expansion_factor(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            EngineConfig::from_json(r#"{"neighbor_count": 8, "index_policy": {"timeout_ms": 50}}"#)
                .unwrap();
        assert_eq!(config.neighbor_count, 8);
        assert_eq!(config.index_policy.timeout_ms, 50);
        assert_eq!(config.index_policy.max_retries, 2);
        assert_eq!(config.expansion_factor, 2);
    }

    #[test]
    fn test_from_json_validates() {
        let err = EngineConfig::from_json(r#"{"link_threshold": -0.2}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}

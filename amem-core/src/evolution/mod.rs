//! Memory evolution: linking new knowledge into the existing note graph.
//!
//! After every content-affecting write, an evolution pass retrieves the
//! subject's nearest neighbors, asks the synthesizer whether each is
//! related, and commits symmetric links plus merged attributes. Deletion
//! runs the inverse repair so no note keeps a link to a deleted note.
//!
//! The engine is the only writer of link sets. Every write holds the
//! per-note locks in [`NoteLocks`].

mod engine;
mod locks;
mod proptest;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::memory::{NoteAttribute, NoteId, SkippedCandidate};

pub use engine::EvolutionEngine;
pub use locks::{LockSet, NoteLocks};

/// Outcome of one evolution pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvolutionReport {
    pub subject: NoteId,
    /// Candidates returned by the index, excluding the subject
    pub considered: usize,
    /// Candidates discarded for scoring under the link threshold
    pub below_threshold: usize,
    /// Neighbors newly linked to the subject
    pub linked: Vec<NoteId>,
    /// Neighbors whose attributes changed
    pub updated: Vec<NoteId>,
    /// Judged relevant-by-similarity but unrelated
    pub rejected: Vec<NoteId>,
    /// Subject attributes changed by the pass
    pub changed: Vec<NoteAttribute>,
    pub skipped: Vec<SkippedCandidate>,
    /// Some candidates could not be processed
    pub partial: bool,
    /// Set when the pass aborted before judging, e.g. a failed index query
    pub failure: Option<String>,
}

impl EvolutionReport {
    pub fn new(subject: NoteId) -> Self {
        Self {
            subject,
            ..Self::default()
        }
    }

    /// True when the pass changed nothing.
    pub fn is_noop(&self) -> bool {
        self.linked.is_empty() && self.updated.is_empty() && self.changed.is_empty()
    }

    pub(crate) fn skip(&mut self, id: NoteId, reason: impl Into<String>) {
        self.skipped.push(SkippedCandidate {
            id,
            reason: reason.into(),
        });
        self.partial = true;
    }

    pub(crate) fn abort(&mut self, reason: impl Into<String>) {
        self.failure = Some(reason.into());
        self.partial = true;
    }
}

/// A detected divergence between the link graph, the store and the index.
///
/// Never raised as an error; logged where it is found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyWarning {
    /// `from` still links to `to` after `to` was deleted
    StaleLink {
        from: NoteId,
        to: NoteId,
        reason: String,
    },
    /// A link target could not be read
    DanglingLink { from: NoteId, to: NoteId },
    /// The index returned an id the store does not know
    UnresolvableHit { id: NoteId },
    /// The index could not be updated for a note
    IndexOutOfSync { id: NoteId, reason: String },
}

impl ConsistencyWarning {
    pub fn emit(&self) {
        warn!(warning = %self, "Consistency warning");
    }
}

impl fmt::Display for ConsistencyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaleLink { from, to, reason } => {
                write!(f, "note {} keeps stale link to {}: {}", from, to, reason)
            }
            Self::DanglingLink { from, to } => {
                write!(f, "note {} links to missing note {}", from, to)
            }
            Self::UnresolvableHit { id } => write!(f, "index returned unknown note {}", id),
            Self::IndexOutOfSync { id, reason } => {
                write!(f, "index out of sync for note {}: {}", id, reason)
            }
        }
    }
}

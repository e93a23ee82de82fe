//! Note records, provenance and evolution history types.

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{Error, Result};

/// Logical timestamp format carried by every note (`YYYYMMDDHHmm`).
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M";

/// Category assigned when the caller does not supply one.
pub const DEFAULT_CATEGORY: &str = "Uncategorized";

/// Unique identifier for a note.
///
/// Ids are assigned by the note store in increasing order and are never
/// reused, so ordering by id is ordering by creation.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NoteId(pub u64);

impl NoteId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for NoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NoteId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Where a field's current value came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Supplied by the caller; evolution must not replace it.
    Pinned,
    /// Produced by the attribute synthesizer.
    Synthesized,
    /// Filled with a default because nothing else was available.
    #[default]
    Defaulted,
}

impl Provenance {
    pub fn is_pinned(&self) -> bool {
        matches!(self, Self::Pinned)
    }
}

/// Per-field provenance of a note's descriptive attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldProvenance {
    pub context: Provenance,
    pub keywords: Provenance,
    pub tags: Provenance,
    pub category: Provenance,
}

/// A note attribute, used to describe what an evolution pass changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteAttribute {
    Content,
    Timestamp,
    Keywords,
    Tags,
    Context,
    Category,
    Links,
}

impl std::fmt::Display for NoteAttribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Content => write!(f, "content"),
            Self::Timestamp => write!(f, "timestamp"),
            Self::Keywords => write!(f, "keywords"),
            Self::Tags => write!(f, "tags"),
            Self::Context => write!(f, "context"),
            Self::Category => write!(f, "category"),
            Self::Links => write!(f, "links"),
        }
    }
}

/// A candidate that an evolution pass dropped, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedCandidate {
    pub id: NoteId,
    pub reason: String,
}

/// One entry in a note's evolution history.
///
/// History is informational: it is appended, never rewritten or replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionEvent {
    /// When the pass committed
    pub at: DateTime<Utc>,
    /// Note whose write triggered the pass
    pub trigger: NoteId,
    /// Neighbors newly linked to this note
    #[serde(default)]
    pub linked: Vec<NoteId>,
    /// Neighbors whose attributes were changed by the pass
    #[serde(default)]
    pub updated: Vec<NoteId>,
    /// Attributes of this note that the pass changed
    #[serde(default)]
    pub changed: Vec<NoteAttribute>,
    /// Candidates dropped by the pass
    #[serde(default)]
    pub skipped: Vec<SkippedCandidate>,
    /// Whether some candidates could not be processed
    #[serde(default)]
    pub partial: bool,
    /// Why the pass stopped before judging any candidate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl EvolutionEvent {
    pub fn new(trigger: NoteId) -> Self {
        Self {
            at: Utc::now(),
            trigger,
            linked: Vec::new(),
            updated: Vec::new(),
            changed: Vec::new(),
            skipped: Vec::new(),
            partial: false,
            failure: None,
        }
    }

    /// True when the pass recorded nothing but its own occurrence.
    pub fn is_noop(&self) -> bool {
        self.linked.is_empty() && self.updated.is_empty() && self.changed.is_empty()
    }
}

/// A memory note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryNote {
    /// Store-assigned id (zero until created)
    pub id: NoteId,
    /// Text body
    pub content: String,
    /// Logical time, `YYYYMMDDHHmm`
    pub timestamp: String,
    pub keywords: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    /// Short summary of the note
    pub context: String,
    pub category: String,
    /// Linked neighbors; only the evolution engine writes this
    pub links: BTreeSet<NoteId>,
    pub evolution_history: Vec<EvolutionEvent>,
    pub provenance: FieldProvenance,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryNote {
    /// Create an unsaved note with default attributes.
    pub fn new(content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: NoteId::default(),
            content: content.into(),
            timestamp: current_timestamp(),
            keywords: BTreeSet::new(),
            tags: BTreeSet::new(),
            context: String::new(),
            category: DEFAULT_CATEGORY.to_string(),
            links: BTreeSet::new(),
            evolution_history: Vec::new(),
            provenance: FieldProvenance::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self.provenance.tags = Provenance::Pinned;
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self.provenance.keywords = Provenance::Pinned;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self.provenance.context = Provenance::Pinned;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self.provenance.category = Provenance::Pinned;
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    pub fn has_link(&self, id: NoteId) -> bool {
        self.links.contains(&id)
    }

    /// Add a link. Returns whether the set changed; self-links are refused.
    pub fn link(&mut self, id: NoteId) -> bool {
        if id == self.id {
            return false;
        }
        self.links.insert(id)
    }

    /// Remove a link. Returns whether the set changed.
    pub fn unlink(&mut self, id: NoteId) -> bool {
        self.links.remove(&id)
    }

    /// Union keywords into the note. Returns whether anything was added.
    pub fn merge_keywords<'a>(&mut self, keywords: impl IntoIterator<Item = &'a String>) -> bool {
        merge_into(&mut self.keywords, keywords)
    }

    /// Union tags into the note. Returns whether anything was added.
    pub fn merge_tags<'a>(&mut self, tags: impl IntoIterator<Item = &'a String>) -> bool {
        merge_into(&mut self.tags, tags)
    }

    /// Replace the context unless it is pinned. Returns whether it changed.
    pub fn refine_context(&mut self, context: &str) -> bool {
        let context = context.trim();
        if self.provenance.context.is_pinned() || context.is_empty() || self.context == context {
            return false;
        }
        self.context = context.to_string();
        self.provenance.context = Provenance::Synthesized;
        true
    }
}

fn merge_into<'a>(
    target: &mut BTreeSet<String>,
    items: impl IntoIterator<Item = &'a String>,
) -> bool {
    let mut changed = false;
    for item in items {
        let item = item.trim();
        if !item.is_empty() && !target.contains(item) {
            target.insert(item.to_string());
            changed = true;
        }
    }
    changed
}

/// Caller input for creating a note.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewNote {
    pub content: String,
    pub tags: Option<Vec<String>>,
    pub keywords: Option<Vec<String>>,
    pub context: Option<String>,
    pub category: Option<String>,
    pub timestamp: Option<String>,
}

impl NewNote {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = Some(keywords.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Whether the synthesizer is needed to fill omitted attributes.
    pub fn needs_synthesis(&self) -> bool {
        self.context.is_none() || self.keywords.is_none() || self.tags.is_none()
    }
}

/// Caller input for updating a note. Only `Some` fields are written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoteUpdate {
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub keywords: Option<Vec<String>>,
    pub context: Option<String>,
    pub category: Option<String>,
    pub timestamp: Option<String>,
}

impl NoteUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = Some(keywords.into_iter().map(Into::into).collect());
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.tags.is_none()
            && self.keywords.is_none()
            && self.context.is_none()
            && self.category.is_none()
            && self.timestamp.is_none()
    }

    /// Whether this update must trigger an evolution pass.
    pub fn triggers_evolution(&self) -> bool {
        self.content.is_some()
            || self.tags.is_some()
            || self.keywords.is_some()
            || self.category.is_some()
    }

    /// Apply caller fields to a note, pinning everything written.
    ///
    /// Returns the attributes that actually changed.
    pub fn apply_to(&self, note: &mut MemoryNote) -> Vec<NoteAttribute> {
        let mut changed = Vec::new();

        if let Some(content) = &self.content {
            if note.content != *content {
                note.content = content.clone();
                changed.push(NoteAttribute::Content);
            }
        }
        if let Some(timestamp) = &self.timestamp {
            if note.timestamp != *timestamp {
                note.timestamp = timestamp.clone();
                changed.push(NoteAttribute::Timestamp);
            }
        }
        if let Some(keywords) = &self.keywords {
            let keywords: BTreeSet<String> = keywords.iter().cloned().collect();
            if note.keywords != keywords {
                note.keywords = keywords;
                changed.push(NoteAttribute::Keywords);
            }
            note.provenance.keywords = Provenance::Pinned;
        }
        if let Some(tags) = &self.tags {
            let tags: BTreeSet<String> = tags.iter().cloned().collect();
            if note.tags != tags {
                note.tags = tags;
                changed.push(NoteAttribute::Tags);
            }
            note.provenance.tags = Provenance::Pinned;
        }
        if let Some(context) = &self.context {
            if note.context != *context {
                note.context = context.clone();
                changed.push(NoteAttribute::Context);
            }
            note.provenance.context = Provenance::Pinned;
        }
        if let Some(category) = &self.category {
            if note.category != *category {
                note.category = category.clone();
                changed.push(NoteAttribute::Category);
            }
            note.provenance.category = Provenance::Pinned;
        }

        changed
    }
}

/// Current local time in the note timestamp format.
pub fn current_timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Check that a timestamp matches `YYYYMMDDHHmm` and is a real date.
pub fn validate_timestamp(timestamp: &str) -> Result<()> {
    if timestamp.len() != 12 || !timestamp.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidInput(format!(
            "timestamp must be YYYYMMDDHHmm, got {:?}",
            timestamp
        )));
    }
    NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
        .map(|_| ())
        .map_err(|e| Error::InvalidInput(format!("invalid timestamp {:?}: {}", timestamp, e)))
}

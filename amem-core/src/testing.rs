//! Scripted collaborators for unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::index::{EmbeddingIndex, ScoredId};
use crate::memory::{InMemoryNoteStore, MemoryNote, NoteId, NoteStore};
use crate::synth::{AttributeSynthesizer, RelevanceJudgment, SynthesizedAttributes};

/// Panic unless every link is symmetric, non-reflexive and resolvable.
pub(crate) fn assert_links_symmetric(store: &dyn NoteStore) {
    let notes: BTreeMap<NoteId, MemoryNote> = store
        .list()
        .unwrap()
        .into_iter()
        .map(|n| (n.id, n))
        .collect();
    for note in notes.values() {
        assert!(!note.has_link(note.id), "note {} links to itself", note.id);
        for link in &note.links {
            let other = notes
                .get(link)
                .unwrap_or_else(|| panic!("note {} links to missing note {}", note.id, link));
            assert!(
                other.has_link(note.id),
                "link {} -> {} has no reverse",
                note.id,
                link
            );
        }
    }
}

/// Embedding index with hand-assigned similarities.
///
/// A query whose text equals a stored note's content scores every other
/// note by its scripted pair score (default 0) and the note itself 1.0.
/// Other queries use [`ScriptedIndex::set_query`] results verbatim.
/// Scores are returned unclamped, as a misbehaving index would.
#[derive(Default)]
pub(crate) struct ScriptedIndex {
    texts: Mutex<BTreeMap<NoteId, String>>,
    pairs: Mutex<HashMap<(NoteId, NoteId), f32>>,
    queries: Mutex<HashMap<String, Vec<ScoredId>>>,
    removed: Mutex<Vec<NoteId>>,
    fail_queries: AtomicBool,
    fail_upserts: AtomicBool,
    fail_removes: AtomicBool,
}

impl ScriptedIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_score(&self, a: NoteId, b: NoteId, score: f32) {
        let mut pairs = self.pairs.lock().unwrap();
        pairs.insert((a, b), score);
        pairs.insert((b, a), score);
    }

    pub(crate) fn set_query(&self, text: &str, hits: &[(NoteId, f32)]) {
        self.queries.lock().unwrap().insert(
            text.to_string(),
            hits.iter().map(|&(id, score)| ScoredId { id, score }).collect(),
        );
    }

    pub(crate) fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_removes(&self, fail: bool) {
        self.fail_removes.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn removed(&self) -> Vec<NoteId> {
        self.removed.lock().unwrap().clone()
    }

    pub(crate) fn contains(&self, id: NoteId) -> bool {
        self.texts.lock().unwrap().contains_key(&id)
    }
}

#[async_trait]
impl EmbeddingIndex for ScriptedIndex {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredId>> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(Error::collaborator("index", "scripted query failure"));
        }
        if let Some(hits) = self.queries.lock().unwrap().get(text) {
            return Ok(hits.iter().take(k).copied().collect());
        }

        let texts = self.texts.lock().unwrap();
        let pairs = self.pairs.lock().unwrap();
        let subject = texts
            .iter()
            .find(|(_, stored)| stored.as_str() == text)
            .map(|(id, _)| *id);

        let mut hits: Vec<ScoredId> = texts
            .keys()
            .map(|&id| {
                let score = match subject {
                    Some(s) if s == id => 1.0,
                    Some(s) => pairs.get(&(s, id)).copied().unwrap_or(0.0),
                    None => 0.0,
                };
                ScoredId { id, score }
            })
            .collect();
        hits.sort_by(ScoredId::rank_order);
        hits.truncate(k);
        Ok(hits)
    }

    async fn upsert(&self, id: NoteId, text: &str) -> Result<()> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(Error::collaborator("index", "scripted upsert failure"));
        }
        self.texts.lock().unwrap().insert(id, text.to_string());
        Ok(())
    }

    async fn remove(&self, id: NoteId) -> Result<()> {
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(Error::collaborator("index", "scripted remove failure"));
        }
        self.texts.lock().unwrap().remove(&id);
        self.removed.lock().unwrap().push(id);
        Ok(())
    }
}

/// Synthesizer with scripted judgments, failures and delays.
#[derive(Default)]
pub(crate) struct ScriptedSynthesizer {
    judgments: Mutex<HashMap<(NoteId, NoteId), RelevanceJudgment>>,
    link_all: AtomicBool,
    failing: Mutex<HashSet<NoteId>>,
    delays: Mutex<HashMap<NoteId, Duration>>,
    attributes: Mutex<Option<SynthesizedAttributes>>,
    fail_synthesize: AtomicBool,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedSynthesizer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Judge `a` and `b` related in both directions.
    pub(crate) fn link(&self, a: NoteId, b: NoteId) {
        let mut judgments = self.judgments.lock().unwrap();
        judgments.insert((a, b), RelevanceJudgment::link());
        judgments.insert((b, a), RelevanceJudgment::link());
    }

    /// Script the judgment for `subject` against `candidate` only.
    pub(crate) fn link_with(&self, subject: NoteId, candidate: NoteId, judgment: RelevanceJudgment) {
        self.judgments
            .lock()
            .unwrap()
            .insert((subject, candidate), judgment);
    }

    /// Judge every unscripted pair related.
    pub(crate) fn link_all(&self) {
        self.link_all.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_for(&self, candidate: NoteId) {
        self.failing.lock().unwrap().insert(candidate);
    }

    pub(crate) fn delay_for(&self, candidate: NoteId, delay: Duration) {
        self.delays.lock().unwrap().insert(candidate, delay);
    }

    pub(crate) fn set_attributes(&self, attributes: SynthesizedAttributes) {
        *self.attributes.lock().unwrap() = Some(attributes);
    }

    pub(crate) fn fail_synthesize(&self, fail: bool) {
        self.fail_synthesize.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn judge_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AttributeSynthesizer for ScriptedSynthesizer {
    async fn synthesize(&self, content: &str) -> Result<SynthesizedAttributes> {
        if self.fail_synthesize.load(Ordering::SeqCst) {
            return Err(Error::collaborator("synthesizer", "scripted synthesis failure"));
        }
        let scripted = self.attributes.lock().unwrap().clone();
        Ok(scripted.unwrap_or_else(|| SynthesizedAttributes {
            context: format!("About: {}", content),
            keywords: vec!["synthesized".to_string()],
            tags: vec!["auto".to_string()],
        }))
    }

    async fn judge(
        &self,
        subject: &MemoryNote,
        candidate: &MemoryNote,
    ) -> Result<RelevanceJudgment> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let delay = self.delays.lock().unwrap().get(&candidate.id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.lock().unwrap().contains(&candidate.id) {
            return Err(Error::collaborator("synthesizer", "scripted judgment failure"));
        }
        let scripted = self
            .judgments
            .lock()
            .unwrap()
            .get(&(subject.id, candidate.id))
            .cloned();
        Ok(match scripted {
            Some(judgment) => judgment,
            None if self.link_all.load(Ordering::SeqCst) => RelevanceJudgment::link(),
            None => RelevanceJudgment::no_link(),
        })
    }
}

/// In-memory store whose writes can be made to fail per note.
#[derive(Default)]
pub(crate) struct FlakyStore {
    inner: InMemoryNoteStore,
    failing: Mutex<HashSet<NoteId>>,
}

impl FlakyStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_writes_for(&self, id: NoteId) {
        self.failing.lock().unwrap().insert(id);
    }

    fn check(&self, id: NoteId) -> Result<()> {
        if self.failing.lock().unwrap().contains(&id) {
            return Err(Error::Storage(format!("scripted write failure for note {}", id)));
        }
        Ok(())
    }
}

impl NoteStore for FlakyStore {
    fn create(&self, note: &MemoryNote) -> Result<NoteId> {
        self.inner.create(note)
    }

    fn get(&self, id: NoteId) -> Result<MemoryNote> {
        self.inner.get(id)
    }

    fn put(&self, note: &MemoryNote) -> Result<()> {
        self.check(note.id)?;
        self.inner.put(note)
    }

    fn put_many(&self, notes: &[MemoryNote]) -> Result<()> {
        for note in notes {
            self.check(note.id)?;
        }
        self.inner.put_many(notes)
    }

    fn delete(&self, id: NoteId) -> Result<bool> {
        self.inner.delete(id)
    }

    fn list(&self) -> Result<Vec<MemoryNote>> {
        self.inner.list()
    }
}

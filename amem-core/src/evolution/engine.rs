//! The evolution pass and deletion repair.

use std::iter;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

use super::locks::NoteLocks;
use super::{ConsistencyWarning, EvolutionReport};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::index::{EmbeddingIndex, ScoredId};
use crate::memory::{EvolutionEvent, MemoryNote, NoteAttribute, NoteId, NoteStore};
use crate::synth::{AttributeSynthesizer, RelevanceJudgment};

/// Lock attempts before a delete gives up on a note whose links keep moving.
const MAX_DELETE_ATTEMPTS: usize = 16;

/// Runs evolution passes and link repair against a note store.
pub struct EvolutionEngine {
    store: Arc<dyn NoteStore>,
    index: Arc<dyn EmbeddingIndex>,
    synthesizer: Arc<dyn AttributeSynthesizer>,
    locks: Arc<NoteLocks>,
    config: EngineConfig,
}

/// A candidate the synthesizer judged related to the subject.
struct Accepted {
    candidate: NoteId,
    judgment: RelevanceJudgment,
}

impl EvolutionEngine {
    pub fn new(
        store: Arc<dyn NoteStore>,
        index: Arc<dyn EmbeddingIndex>,
        synthesizer: Arc<dyn AttributeSynthesizer>,
        locks: Arc<NoteLocks>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            index,
            synthesizer,
            locks,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one evolution pass with `subject_id` as the subject.
    ///
    /// Fails only if the subject cannot be read or the index cannot be
    /// queried. A failed query is still recorded in the subject's history
    /// as a partial pass. Per-candidate failures are recorded in the report.
    #[instrument(skip(self), fields(k = self.config.neighbor_count))]
    pub async fn evolve(&self, subject_id: NoteId) -> Result<EvolutionReport> {
        let subject = self.store.get(subject_id)?;
        let mut report = EvolutionReport::new(subject_id);

        let candidates = match self.candidates(&subject, &mut report).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(subject = %subject_id, error = %e, "Evolution candidate query failed");
                report.abort(format!("index query failed: {}", e));
                self.record_aborted(subject_id, &report).await;
                return Err(e);
            }
        };
        let accepted = self.judge_all(&subject, candidates, &mut report).await;
        self.commit(subject_id, accepted, &mut report).await?;

        info!(
            considered = report.considered,
            linked = report.linked.len(),
            updated = report.updated.len(),
            skipped = report.skipped.len(),
            partial = report.partial,
            "Evolution pass complete"
        );
        Ok(report)
    }

    /// Nearest neighbors of the subject that clear the link threshold.
    async fn candidates(
        &self,
        subject: &MemoryNote,
        report: &mut EvolutionReport,
    ) -> Result<Vec<MemoryNote>> {
        let k = self.config.neighbor_count;
        let index = &self.index;
        let content = subject.content.as_str();

        let mut hits: Vec<ScoredId> = self
            .config
            .index_policy
            .call("index", || index.query(content, k + 1))
            .await?
            .into_iter()
            .map(ScoredId::normalized)
            .collect();
        hits.retain(|hit| hit.id != subject.id);
        hits.sort_by(ScoredId::rank_order);
        hits.truncate(k);
        report.considered = hits.len();

        let mut candidates = Vec::with_capacity(hits.len());
        for hit in hits {
            if hit.score < self.config.link_threshold {
                report.below_threshold += 1;
                continue;
            }
            match self.store.get(hit.id) {
                Ok(note) => candidates.push(note),
                Err(e) if e.is_not_found() => {
                    ConsistencyWarning::UnresolvableHit { id: hit.id }.emit();
                    report.skip(hit.id, "note no longer exists");
                }
                Err(e) => report.skip(hit.id, format!("read failed: {}", e)),
            }
        }
        debug!(
            candidates = candidates.len(),
            below_threshold = report.below_threshold,
            "Retrieved evolution candidates"
        );
        Ok(candidates)
    }

    /// Judge all candidates concurrently, bounded by the parallelism limit
    /// and the pass deadline.
    async fn judge_all(
        &self,
        subject: &MemoryNote,
        candidates: Vec<MemoryNote>,
        report: &mut EvolutionReport,
    ) -> Vec<Accepted> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let semaphore = Semaphore::new(self.config.max_parallel_judgments);
        let deadline = Instant::now() + Duration::from_millis(self.config.evolution_deadline_ms);
        let policy = &self.config.synthesizer_policy;
        let synthesizer = &self.synthesizer;
        let semaphore = &semaphore;

        let tasks = candidates.into_iter().map(|candidate| async move {
            let outcome = timeout_at(deadline, async {
                match semaphore.acquire().await {
                    Ok(_permit) => {
                        policy
                            .call("synthesizer", || synthesizer.judge(subject, &candidate))
                            .await
                    }
                    Err(e) => Err(Error::Internal(format!(
                        "Judgment semaphore closed: {}",
                        e
                    ))),
                }
            })
            .await;
            (candidate.id, outcome)
        });

        let mut accepted = Vec::new();
        for (candidate, outcome) in join_all(tasks).await {
            match outcome {
                Ok(Ok(judgment)) if judgment.is_link() => accepted.push(Accepted {
                    candidate,
                    judgment,
                }),
                Ok(Ok(_)) => report.rejected.push(candidate),
                Ok(Err(e)) => {
                    warn!(candidate = %candidate, error = %e, "Relevance judgment failed");
                    report.skip(candidate, e.to_string());
                }
                Err(_) => {
                    warn!(candidate = %candidate, "Relevance judgment missed the evolution deadline");
                    report.skip(candidate, "evolution deadline exceeded");
                }
            }
        }
        accepted
    }

    /// Write links and merged attributes for accepted candidates, then
    /// append the subject's history event.
    async fn commit(
        &self,
        subject_id: NoteId,
        accepted: Vec<Accepted>,
        report: &mut EvolutionReport,
    ) -> Result<()> {
        let lock_ids = accepted
            .iter()
            .map(|a| a.candidate)
            .chain(iter::once(subject_id));
        let _locks = self.locks.lock_many(lock_ids).await?;

        // Judgments ran unlocked; work from the records as they are now.
        let base = self.store.get(subject_id)?;
        let mut pairs = Vec::with_capacity(accepted.len());
        for Accepted {
            candidate,
            judgment,
        } in accepted
        {
            match self.store.get(candidate) {
                Ok(neighbor) => pairs.push((neighbor, judgment)),
                Err(e) if e.is_not_found() => {
                    report.skip(candidate, "note deleted during evolution")
                }
                Err(e) => report.skip(candidate, format!("read failed: {}", e)),
            }
        }

        let mut tentative = report.clone();
        let mut subject = base.clone();
        let mut batch = Vec::with_capacity(pairs.len() + 1);
        for (neighbor, judgment) in &pairs {
            if let Some(written) = apply_link(&mut subject, neighbor, judgment, &mut tentative) {
                batch.push(written);
            }
        }
        tentative.changed = changed_attributes(&base, &subject);
        batch.insert(0, finish_subject(subject, &tentative));

        match self.store.put_many(&batch) {
            Ok(()) => {
                *report = tentative;
                return Ok(());
            }
            Err(e) if pairs.is_empty() => return Err(e),
            Err(e) => {
                warn!(error = %e, "Combined evolution commit failed, committing candidates separately");
            }
        }

        let mut subject = base.clone();
        for (neighbor, judgment) in &pairs {
            let mut trial = subject.clone();
            let mut trial_report = report.clone();
            let mut writes = vec![];
            if let Some(written) = apply_link(&mut trial, neighbor, judgment, &mut trial_report) {
                writes.push(written);
            }
            writes.insert(0, trial.clone());

            match self.store.put_many(&writes) {
                Ok(()) => {
                    subject = trial;
                    *report = trial_report;
                }
                Err(e) => {
                    warn!(candidate = %neighbor.id, error = %e, "Evolution commit failed");
                    report.skip(neighbor.id, format!("commit failed: {}", e));
                }
            }
        }

        report.changed = changed_attributes(&base, &subject);
        let subject = finish_subject(subject, report);
        if let Err(e) = self.store.put(&subject) {
            warn!(subject = %subject_id, error = %e, "Failed to record evolution history");
        }
        Ok(())
    }

    /// Append the history event of a pass that never reached judging.
    async fn record_aborted(&self, subject_id: NoteId, report: &EvolutionReport) {
        if let Err(e) = self.append_history(subject_id, report).await {
            warn!(subject = %subject_id, error = %e, "Failed to record evolution history");
        }
    }

    async fn append_history(&self, subject_id: NoteId, report: &EvolutionReport) -> Result<()> {
        let _lock = self.locks.lock(subject_id).await?;
        let subject = self.store.get(subject_id)?;
        self.store.put(&finish_subject(subject, report))
    }

    /// Delete a note and remove every link pointing at it.
    ///
    /// Returns false, with no side effects, if the note does not exist.
    #[instrument(skip(self))]
    pub async fn delete_with_repair(&self, id: NoteId) -> Result<bool> {
        for attempt in 1..=MAX_DELETE_ATTEMPTS {
            let links = match self.store.get(id) {
                Ok(note) => note.links,
                Err(e) if e.is_not_found() => return Ok(false),
                Err(e) => return Err(e),
            };
            let locks = self
                .locks
                .lock_many(links.iter().copied().chain(iter::once(id)))
                .await?;

            let subject = match self.store.get(id) {
                Ok(note) => note,
                Err(e) if e.is_not_found() => return Ok(false),
                Err(e) => return Err(e),
            };
            if !subject.links.iter().all(|link| locks.contains(*link)) {
                debug!(attempt, "Links changed while locking, retrying delete");
                continue;
            }

            for &neighbor_id in &subject.links {
                self.unlink_neighbor(neighbor_id, id);
            }

            let removed = self.store.delete(id)?;
            drop(locks);

            let index = &self.index;
            if let Err(e) = self
                .config
                .index_policy
                .call("index", || index.remove(id))
                .await
            {
                ConsistencyWarning::IndexOutOfSync {
                    id,
                    reason: e.to_string(),
                }
                .emit();
            }

            info!(links_repaired = subject.links.len(), "Deleted note");
            return Ok(removed);
        }

        Err(Error::Internal(format!(
            "could not lock note {} and its neighbors after {} attempts",
            id, MAX_DELETE_ATTEMPTS
        )))
    }

    fn unlink_neighbor(&self, neighbor_id: NoteId, deleted: NoteId) {
        let mut neighbor = match self.store.get(neighbor_id) {
            Ok(note) => note,
            Err(e) if e.is_not_found() => {
                ConsistencyWarning::DanglingLink {
                    from: deleted,
                    to: neighbor_id,
                }
                .emit();
                return;
            }
            Err(e) => {
                ConsistencyWarning::StaleLink {
                    from: neighbor_id,
                    to: deleted,
                    reason: e.to_string(),
                }
                .emit();
                return;
            }
        };

        if !neighbor.unlink(deleted) {
            return;
        }
        neighbor.updated_at = Utc::now();
        if let Err(e) = self.store.put(&neighbor) {
            ConsistencyWarning::StaleLink {
                from: neighbor_id,
                to: deleted,
                reason: e.to_string(),
            }
            .emit();
        }
    }
}

/// Apply one accepted judgment to the subject and a copy of the neighbor.
///
/// Returns the neighbor record to write, if it changed.
fn apply_link(
    subject: &mut MemoryNote,
    neighbor: &MemoryNote,
    judgment: &RelevanceJudgment,
    report: &mut EvolutionReport,
) -> Option<MemoryNote> {
    let mut updated = neighbor.clone();

    let linked = subject.link(updated.id);
    updated.link(subject.id);

    subject.merge_keywords(&judgment.proposed_keywords);
    subject.merge_tags(&judgment.proposed_tags);
    updated.merge_keywords(&judgment.proposed_keywords);
    updated.merge_tags(&judgment.proposed_tags);
    if let Some(context) = &judgment.proposed_context_subject {
        subject.refine_context(context);
    }
    if let Some(context) = &judgment.proposed_context_candidate {
        updated.refine_context(context);
    }

    if linked && !report.linked.contains(&updated.id) {
        report.linked.push(updated.id);
    }

    let changed = changed_attributes(neighbor, &updated);
    if changed.is_empty() {
        return None;
    }
    if changed.iter().any(|a| *a != NoteAttribute::Links) && !report.updated.contains(&updated.id)
    {
        report.updated.push(updated.id);
    }

    let mut event = EvolutionEvent::new(subject.id);
    if changed.contains(&NoteAttribute::Links) {
        event.linked.push(subject.id);
    }
    event.changed = changed;
    updated.evolution_history.push(event);
    updated.updated_at = Utc::now();
    Some(updated)
}

/// Attributes an evolution pass may touch that differ between two records.
fn changed_attributes(before: &MemoryNote, after: &MemoryNote) -> Vec<NoteAttribute> {
    let mut changed = Vec::new();
    if before.keywords != after.keywords {
        changed.push(NoteAttribute::Keywords);
    }
    if before.tags != after.tags {
        changed.push(NoteAttribute::Tags);
    }
    if before.context != after.context {
        changed.push(NoteAttribute::Context);
    }
    if before.links != after.links {
        changed.push(NoteAttribute::Links);
    }
    changed
}

/// Append the pass's history event to the subject.
fn finish_subject(mut subject: MemoryNote, report: &EvolutionReport) -> MemoryNote {
    let mut event = EvolutionEvent::new(report.subject);
    event.linked = report.linked.clone();
    event.updated = report.updated.clone();
    event.changed = report.changed.clone();
    event.skipped = report.skipped.clone();
    event.partial = report.partial;
    event.failure = report.failure.clone();

    if !report.changed.is_empty() {
        subject.updated_at = Utc::now();
    }
    subject.evolution_history.push(event);
    subject
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryNoteStore, Provenance};
    use crate::retry::CollaboratorPolicy;
    use crate::testing::{
        assert_links_symmetric, FlakyStore, ScriptedIndex, ScriptedSynthesizer,
    };
    use pretty_assertions::assert_eq;

    struct Fixture {
        store: Arc<dyn NoteStore>,
        index: Arc<ScriptedIndex>,
        synth: Arc<ScriptedSynthesizer>,
        engine: EvolutionEngine,
    }

    fn fixture_with(store: Arc<dyn NoteStore>, config: EngineConfig) -> Fixture {
        let index = Arc::new(ScriptedIndex::new());
        let synth = Arc::new(ScriptedSynthesizer::new());
        let engine = EvolutionEngine::new(
            Arc::clone(&store),
            index.clone(),
            synth.clone(),
            Arc::new(NoteLocks::new()),
            config,
        );
        Fixture {
            store,
            index,
            synth,
            engine,
        }
    }

    fn fixture(config: EngineConfig) -> Fixture {
        fixture_with(Arc::new(InMemoryNoteStore::new()), config)
    }

    impl Fixture {
        async fn seed(&self, note: MemoryNote) -> NoteId {
            let id = self.store.create(&note).unwrap();
            self.index.upsert(id, &note.content).await.unwrap();
            id
        }

        fn get(&self, id: NoteId) -> MemoryNote {
            self.store.get(id).unwrap()
        }
    }

    #[tokio::test]
    async fn test_related_notes_are_linked_both_ways() {
        let f = fixture(EngineConfig::default());
        let n1 = f.seed(MemoryNote::new("Deep learning neural networks")).await;
        let n2 = f.seed(MemoryNote::new("Backpropagation in neural nets")).await;
        f.index.set_score(n1, n2, 0.8);
        f.synth.link_with(
            n2,
            n1,
            RelevanceJudgment::link()
                .with_keywords(["neural"])
                .with_tags(["ml"])
                .with_candidate_context("Neural network fundamentals"),
        );

        let report = f.engine.evolve(n2).await.unwrap();
        assert_eq!(report.considered, 1);
        assert_eq!(report.linked, vec![n1]);
        assert_eq!(report.updated, vec![n1]);
        assert!(!report.partial);

        let first = f.get(n1);
        let second = f.get(n2);
        assert!(first.has_link(n2));
        assert!(second.has_link(n1));
        assert!(first.tags.contains("ml") && second.tags.contains("ml"));
        assert_eq!(first.context, "Neural network fundamentals");
        assert_eq!(first.provenance.context, Provenance::Synthesized);

        assert_eq!(second.evolution_history.len(), 1);
        assert_eq!(second.evolution_history[0].linked, vec![n1]);
        assert_eq!(first.evolution_history.len(), 1);
        assert_eq!(first.evolution_history[0].trigger, n2);
        assert_links_symmetric(f.store.as_ref());
    }

    #[tokio::test]
    async fn test_threshold_skips_judgment() {
        let f = fixture(EngineConfig::default().with_link_threshold(0.5));
        let n1 = f.seed(MemoryNote::new("Gardening tips")).await;
        let n2 = f.seed(MemoryNote::new("Tomato varieties")).await;
        f.index.set_score(n1, n2, 0.49);
        f.synth.link(n1, n2);

        let report = f.engine.evolve(n2).await.unwrap();
        assert_eq!(report.below_threshold, 1);
        assert!(report.linked.is_empty());
        assert_eq!(f.synth.judge_calls(), 0);
        assert!(f.get(n1).links.is_empty());
    }

    #[tokio::test]
    async fn test_nan_score_counts_as_below_threshold() {
        let f = fixture(EngineConfig::default().with_link_threshold(0.9));
        let n1 = f.seed(MemoryNote::new("first")).await;
        let n2 = f.seed(MemoryNote::new("second")).await;
        f.index.set_score(n1, n2, f32::NAN);
        f.synth.link_all();

        let report = f.engine.evolve(n2).await.unwrap();
        assert_eq!(report.below_threshold, 1);
        assert!(report.linked.is_empty());
        assert_eq!(f.synth.judge_calls(), 0);
        assert!(f.get(n1).links.is_empty());
        assert!(f.get(n2).links.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_candidate_is_not_linked() {
        let f = fixture(EngineConfig::default());
        let n1 = f.seed(MemoryNote::new("Python list comprehension")).await;
        let n2 = f.seed(MemoryNote::new("Python the snake")).await;
        f.index.set_score(n1, n2, 0.9);

        let report = f.engine.evolve(n2).await.unwrap();
        assert_eq!(report.rejected, vec![n1]);
        assert!(report.is_noop());
        assert!(f.get(n1).evolution_history.is_empty());
    }

    #[tokio::test]
    async fn test_re_evolution_is_idempotent() {
        let f = fixture(EngineConfig::default());
        let n1 = f.seed(MemoryNote::new("Rust ownership rules")).await;
        let n2 = f.seed(MemoryNote::new("Rust borrow checker")).await;
        f.index.set_score(n1, n2, 0.7);
        f.synth.link_with(
            n2,
            n1,
            RelevanceJudgment::link()
                .with_keywords(["rust"])
                .with_subject_context("Borrow checking in Rust"),
        );

        f.engine.evolve(n2).await.unwrap();
        let first_after = f.get(n1);
        let second_after = f.get(n2);

        let report = f.engine.evolve(n2).await.unwrap();
        assert!(report.is_noop());
        assert!(report.linked.is_empty());

        let first = f.get(n1);
        let second = f.get(n2);
        assert_eq!(first, first_after);
        assert_eq!(second.links, second_after.links);
        assert_eq!(second.keywords, second_after.keywords);
        assert_eq!(second.context, second_after.context);
        assert_eq!(second.evolution_history.len(), 2);
        assert!(second.evolution_history[1].is_noop());
    }

    #[tokio::test]
    async fn test_pinned_context_survives_evolution() {
        let f = fixture(EngineConfig::default());
        let n1 = f.seed(MemoryNote::new("Chicken wings recipe")).await;
        let n2 = f
            .seed(MemoryNote::new("My favorite food is chicken wings").with_context("Food preference"))
            .await;
        f.index.set_score(n1, n2, 0.9);
        f.synth.link_with(
            n2,
            n1,
            RelevanceJudgment::link()
                .with_subject_context("Cooking")
                .with_candidate_context("A recipe for a favorite food"),
        );

        let report = f.engine.evolve(n2).await.unwrap();
        assert_eq!(report.changed, vec![NoteAttribute::Links]);

        let second = f.get(n2);
        assert_eq!(second.context, "Food preference");
        assert_eq!(second.provenance.context, Provenance::Pinned);
        assert_eq!(f.get(n1).context, "A recipe for a favorite food");
    }

    #[tokio::test]
    async fn test_fan_out_is_bounded_by_k() {
        let f = fixture(EngineConfig::default().with_neighbor_count(3));
        let mut ids = Vec::new();
        for i in 0..8 {
            ids.push(f.seed(MemoryNote::new(format!("note number {}", i))).await);
        }
        let subject = ids[7];
        for &other in &ids[..7] {
            f.index.set_score(subject, other, 0.9);
        }
        f.synth.link_all();

        let report = f.engine.evolve(subject).await.unwrap();
        assert_eq!(report.considered, 3);
        assert_eq!(report.linked.len(), 3);
        assert_eq!(f.get(subject).links.len(), 3);
        assert_links_symmetric(f.store.as_ref());
    }

    #[tokio::test]
    async fn test_failed_judgment_drops_only_that_candidate() {
        let config = EngineConfig::default()
            .with_synthesizer_policy(CollaboratorPolicy::no_retry(1_000));
        let f = fixture(config);
        let subject = f.seed(MemoryNote::new("subject")).await;
        let good = f.seed(MemoryNote::new("good neighbor")).await;
        let bad = f.seed(MemoryNote::new("bad neighbor")).await;
        f.index.set_score(subject, good, 0.9);
        f.index.set_score(subject, bad, 0.8);
        f.synth.link_all();
        f.synth.fail_for(bad);

        let report = f.engine.evolve(subject).await.unwrap();
        assert_eq!(report.linked, vec![good]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].id, bad);
        assert!(report.partial);

        let history = &f.get(subject).evolution_history;
        assert!(history[0].partial);
        assert!(f.get(bad).links.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_skips_slow_judgment() {
        let config = EngineConfig::default()
            .with_evolution_deadline_ms(1_000)
            .with_synthesizer_policy(CollaboratorPolicy::no_retry(60_000));
        let f = fixture(config);
        let subject = f.seed(MemoryNote::new("subject")).await;
        let fast = f.seed(MemoryNote::new("fast neighbor")).await;
        let slow = f.seed(MemoryNote::new("slow neighbor")).await;
        f.index.set_score(subject, fast, 0.9);
        f.index.set_score(subject, slow, 0.8);
        f.synth.link_all();
        f.synth.delay_for(slow, Duration::from_secs(30));

        let report = f.engine.evolve(subject).await.unwrap();
        assert_eq!(report.linked, vec![fast]);
        assert_eq!(report.skipped[0].id, slow);
        assert_eq!(report.skipped[0].reason, "evolution deadline exceeded");
        assert!(report.partial);
    }

    #[tokio::test(start_paused = true)]
    async fn test_judgments_respect_parallel_limit() {
        let f = fixture(
            EngineConfig::default()
                .with_neighbor_count(6)
                .with_max_parallel_judgments(2),
        );
        let subject = f.seed(MemoryNote::new("subject")).await;
        for i in 0..6 {
            let id = f.seed(MemoryNote::new(format!("neighbor {}", i))).await;
            f.index.set_score(subject, id, 0.9);
            f.synth.delay_for(id, Duration::from_millis(100));
        }
        f.synth.link_all();

        let report = f.engine.evolve(subject).await.unwrap();
        assert_eq!(report.linked.len(), 6);
        assert_eq!(f.synth.peak_in_flight(), 2);
    }

    #[tokio::test]
    async fn test_commit_failure_falls_back_per_candidate() {
        let store = Arc::new(FlakyStore::new());
        let f = fixture_with(store.clone(), EngineConfig::default());
        let subject = f.seed(MemoryNote::new("subject")).await;
        let ok = f.seed(MemoryNote::new("writable neighbor")).await;
        let broken = f.seed(MemoryNote::new("read-only neighbor")).await;
        f.index.set_score(subject, ok, 0.9);
        f.index.set_score(subject, broken, 0.8);
        f.synth.link_all();
        store.fail_writes_for(broken);

        let report = f.engine.evolve(subject).await.unwrap();
        assert_eq!(report.linked, vec![ok]);
        assert_eq!(report.skipped[0].id, broken);
        assert!(report.skipped[0].reason.starts_with("commit failed"));

        let written = f.get(subject);
        assert_eq!(written.links.iter().copied().collect::<Vec<_>>(), vec![ok]);
        assert_eq!(written.evolution_history.len(), 1);
        assert_links_symmetric(f.store.as_ref());
    }

    #[tokio::test]
    async fn test_missing_subject_is_not_found() {
        let f = fixture(EngineConfig::default());
        let err = f.engine.evolve(NoteId(42)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_index_failure_is_recorded_as_partial_pass() {
        let config = EngineConfig::default().with_index_policy(CollaboratorPolicy::no_retry(1_000));
        let f = fixture(config);
        let subject = f.seed(MemoryNote::new("subject")).await;
        f.index.fail_queries(true);

        let err = f.engine.evolve(subject).await.unwrap_err();
        assert!(err.is_retryable());

        let history = f.get(subject).evolution_history;
        assert_eq!(history.len(), 1);
        assert!(history[0].partial);
        assert!(history[0].is_noop());
        let failure = history[0].failure.as_deref().unwrap();
        assert!(failure.starts_with("index query failed"), "{}", failure);
    }

    #[tokio::test]
    async fn test_delete_repairs_neighbors() {
        let f = fixture(EngineConfig::default());
        let n1 = f.seed(MemoryNote::new("hub")).await;
        let n2 = f.seed(MemoryNote::new("spoke one")).await;
        let n3 = f.seed(MemoryNote::new("spoke two")).await;
        f.index.set_score(n1, n2, 0.9);
        f.index.set_score(n1, n3, 0.9);
        f.synth.link_all();
        f.engine.evolve(n1).await.unwrap();
        assert_eq!(f.get(n1).links.len(), 2);

        assert!(f.engine.delete_with_repair(n1).await.unwrap());
        assert!(f.store.get(n1).unwrap_err().is_not_found());
        assert!(f.get(n2).links.is_empty());
        assert!(f.get(n3).links.is_empty());
        assert_eq!(f.index.removed(), vec![n1]);
        assert_links_symmetric(f.store.as_ref());

        assert!(!f.engine.delete_with_repair(n1).await.unwrap());
        assert_eq!(f.index.removed(), vec![n1]);
    }

    #[tokio::test]
    async fn test_delete_continues_past_failed_neighbor_write() {
        let store = Arc::new(FlakyStore::new());
        let f = fixture_with(store.clone(), EngineConfig::default());
        let n1 = f.seed(MemoryNote::new("hub")).await;
        let n2 = f.seed(MemoryNote::new("spoke")).await;
        f.index.set_score(n1, n2, 0.9);
        f.synth.link_all();
        f.engine.evolve(n1).await.unwrap();

        store.fail_writes_for(n2);
        assert!(f.engine.delete_with_repair(n1).await.unwrap());
        assert!(f.store.get(n1).unwrap_err().is_not_found());
        // Left stale; reported as a consistency warning.
        assert!(f.get(n2).has_link(n1));
    }

    #[tokio::test]
    async fn test_delete_tolerates_index_failure() {
        let config = EngineConfig::default().with_index_policy(CollaboratorPolicy::no_retry(1_000));
        let f = fixture(config);
        let n1 = f.seed(MemoryNote::new("doomed")).await;
        f.index.fail_removes(true);

        assert!(f.engine.delete_with_repair(n1).await.unwrap());
        assert!(f.store.get(n1).unwrap_err().is_not_found());
    }
}

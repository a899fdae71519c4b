//! Analysis coordinator: drives the six-phase similarity pipeline.
//!
//! Phases: enumerate eligible documents, rebuild stale signatures, build
//! the LSH index, enumerate candidate pairs, score and group, persist the
//! snapshot. The coordinator checks the cancel token at phase boundaries
//! and every `checkpoint_interval` documents, emits progress on the event
//! bus, and records the run lifecycle (`pending -> running -> completed |
//! failed | cancelled`) in the store. A failed run never touches the
//! previous group snapshot.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use rayon::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use dedupe_core::grouping::{self, GroupingDoc};
use dedupe_core::lsh::LshIndex;
use dedupe_core::minhash::Signature;
use dedupe_core::normalize::TextProfile;
use dedupe_core::scoring::{combine, ConfidenceBreakdown, ScoringData};
use dedupe_core::DedupeConfig;
use dedupe_storage::{
    AnalysisParameters, AnalysisRun, DedupeStore, Document, DocumentContent, GroupSnapshotEntry,
    MemberEntry, RunStatus, StoredSignature,
};

use crate::error::{EngineError, Result};
use crate::events::{AnalysisOutcome, AnalysisProgress, EventBody, EventBus};
use crate::SharedConfig;

/// Signature rebuild batch: bounds how many full OCR bodies are resident
/// during phase 2.
const REBUILD_BATCH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Enumerate,
    BuildSignatures,
    BuildIndex,
    EnumerateCandidates,
    ScoreAndGroup,
    Persist,
}

impl Phase {
    fn as_str(&self) -> &'static str {
        match self {
            Phase::Enumerate => "Enumerating documents",
            Phase::BuildSignatures => "Building signatures",
            Phase::BuildIndex => "Building LSH index",
            Phase::EnumerateCandidates => "Enumerating candidate pairs",
            Phase::ScoreAndGroup => "Scoring and grouping",
            Phase::Persist => "Persisting snapshot",
        }
    }
}

/// Everything later phases need per document, keyed by dense index.
struct Corpus {
    ids: Vec<Uuid>,
    signatures: Vec<Signature>,
    scoring: Vec<ScoringData>,
    facts: Vec<GroupingDoc>,
}

impl Corpus {
    fn len(&self) -> usize {
        self.ids.len()
    }
}

pub struct AnalysisCoordinator {
    store: Arc<dyn DedupeStore>,
    bus: Arc<EventBus>,
    config: SharedConfig,
    running: AtomicBool,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn check_cancel(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(EngineError::Cancelled)
    } else {
        Ok(())
    }
}

impl AnalysisCoordinator {
    pub fn new(store: Arc<dyn DedupeStore>, bus: Arc<EventBus>, config: SharedConfig) -> Self {
        Self {
            store,
            bus,
            config,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// True when the last completed run used different confidence weights
    /// than the active configuration; the persisted snapshot no longer
    /// reflects current scoring.
    pub async fn snapshot_stale(&self) -> Result<bool> {
        let active = self.config.read().weights.fingerprint();
        Ok(self
            .store
            .latest_run()
            .await?
            .filter(|run| run.status == RunStatus::Completed)
            .map(|run| run.weights_fingerprint != active)
            .unwrap_or(false))
    }

    /// Run one analysis. Fails with `AlreadyRunning` while another run is
    /// in `running`; otherwise always returns the terminal run record
    /// (completed, failed, or cancelled).
    pub async fn run(
        &self,
        parameters: AnalysisParameters,
        cancel: CancellationToken,
    ) -> Result<AnalysisRun> {
        if let Some(threshold) = parameters.threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(EngineError::InvalidConfig(format!(
                    "analysis threshold must be in 0.0..=1.0, got {threshold}"
                )));
            }
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::AlreadyRunning("analysis"));
        }
        let _guard = RunningGuard(&self.running);

        let config = self.config.read().clone();
        let mut run = AnalysisRun::new(parameters, config.weights.fingerprint());
        self.store.create_run(&run).await?;

        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        self.store.update_run(&run).await?;
        info!("analysis {}: started ({:?})", run.id, run.parameters);

        let outcome = self.execute(&mut run, &config, &cancel).await;
        run.completed_at = Some(Utc::now());
        match outcome {
            Ok(groups_found) => {
                run.status = RunStatus::Completed;
                run.groups_found = groups_found;
                info!(
                    "analysis {}: completed ({} documents, {} groups)",
                    run.id, run.documents_processed, run.groups_found
                );
            }
            Err(EngineError::Cancelled) => {
                run.status = RunStatus::Cancelled;
                info!("analysis {}: cancelled", run.id);
            }
            Err(err) => {
                run.status = RunStatus::Failed;
                run.error = Some(err.to_string());
                warn!("analysis {}: failed: {err}", run.id);
            }
        }
        self.store.update_run(&run).await?;
        self.bus.publish(EventBody::AnalysisCompleted(AnalysisOutcome {
            run_id: run.id,
            status: run.status,
            documents_processed: run.documents_processed,
            groups_found: run.groups_found,
            error: run.error.clone(),
        }));
        Ok(run)
    }

    async fn execute(
        &self,
        run: &mut AnalysisRun,
        config: &DedupeConfig,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let parameters = run.parameters;

        // Phase 1: enumerate eligible documents.
        check_cancel(cancel)?;
        let mut documents = self.store.list_eligible_documents(config.min_words).await?;
        if let Some(limit) = parameters.limit {
            documents.truncate(limit);
        }
        let total = documents.len() as u64;
        run.documents_processed = total;
        self.store.update_run(run).await?;
        self.emit(run.id, Phase::Enumerate, 0, total);

        if documents.len() < 2 {
            // Nothing to pair; persist the empty snapshot so retired groups
            // disappear.
            self.emit(run.id, Phase::Persist, total, total);
            self.store.replace_group_snapshot(run.id, &[]).await?;
            return Ok(0);
        }

        // Phase 2: build or refresh signatures, then load the bounded
        // per-document data every later phase works from.
        let corpus = self.build_corpus(run.id, config, &parameters, &documents, cancel).await?;

        // Phase 3: LSH index.
        check_cancel(cancel)?;
        let params = config.minhash_params();
        let mut index = LshIndex::new(params, config.lsh_bands, config.lsh_rows)?;
        for (i, signature) in corpus.signatures.iter().enumerate() {
            index.insert(i as u32, signature)?;
            if (i + 1) % config.checkpoint_interval == 0 {
                check_cancel(cancel)?;
                self.emit(run.id, Phase::BuildIndex, (i + 1) as u64, total);
            }
        }
        self.emit(run.id, Phase::BuildIndex, total, total);

        // Phase 4: enumerate candidates, deduplicating cross-band repeats.
        check_cancel(cancel)?;
        let mut pairs: HashSet<(u32, u32)> = HashSet::new();
        index.for_each_candidate(|a, b| {
            pairs.insert((a, b));
        });
        let mut pairs: Vec<(u32, u32)> = pairs.into_iter().collect();
        pairs.sort_unstable();
        self.emit(run.id, Phase::EnumerateCandidates, pairs.len() as u64, pairs.len() as u64);
        info!(
            "analysis {}: {} candidate pairs from {} buckets",
            run.id,
            pairs.len(),
            index.bucket_count()
        );

        // Phase 5: score candidates and group the survivors.
        let overall_threshold = parameters
            .threshold
            .unwrap_or_else(|| config.overall_threshold());
        let weights = config.weights;
        let quick = parameters.quick;
        let sample_size = config.fuzzy_sample_size;

        let mut edges: Vec<(u32, u32)> = Vec::new();
        for (done, &(a, b)) in pairs.iter().enumerate() {
            if (done + 1) % config.checkpoint_interval == 0 {
                check_cancel(cancel)?;
                self.emit(run.id, Phase::ScoreAndGroup, done as u64, pairs.len() as u64);
            }
            let jaccard = corpus.signatures[a as usize]
                .estimate_jaccard(&corpus.signatures[b as usize])?;
            if jaccard < config.lsh_threshold {
                continue;
            }
            let breakdown = combine(
                &corpus.scoring[a as usize],
                &corpus.scoring[b as usize],
                jaccard,
                &weights,
                quick,
                sample_size,
            );
            if breakdown.overall < overall_threshold {
                continue;
            }
            if !quick && breakdown.fuzzy < config.min_fuzzy_ratio {
                continue;
            }
            edges.push((a, b));
        }

        let pair_score = |primary: u32, member: u32| -> ConfidenceBreakdown {
            let jaccard = corpus.signatures[primary as usize]
                .estimate_jaccard(&corpus.signatures[member as usize])
                .unwrap_or(0.0);
            combine(
                &corpus.scoring[primary as usize],
                &corpus.scoring[member as usize],
                jaccard,
                &weights,
                quick,
                sample_size,
            )
        };
        let drafts = grouping::build_groups(corpus.len(), &edges, &corpus.facts, pair_score);
        self.emit(run.id, Phase::ScoreAndGroup, pairs.len() as u64, pairs.len() as u64);

        // Phase 6: atomic snapshot replace.
        check_cancel(cancel)?;
        self.emit(run.id, Phase::Persist, 0, drafts.len() as u64);
        let entries: Vec<GroupSnapshotEntry> = drafts
            .iter()
            .map(|draft| GroupSnapshotEntry {
                key: draft.key.clone(),
                confidence_score: draft.confidence_score,
                confidence_breakdown: draft.confidence_breakdown,
                primary_document_id: corpus.ids[draft.primary_index as usize],
                members: draft
                    .members
                    .iter()
                    .map(|member| MemberEntry {
                        document_id: corpus.ids[member.index as usize],
                        is_primary: member.is_primary,
                        similarity_to_primary: member.similarity_to_primary,
                    })
                    .collect(),
            })
            .collect();
        self.store.replace_group_snapshot(run.id, &entries).await?;
        self.emit(run.id, Phase::Persist, entries.len() as u64, entries.len() as u64);

        Ok(entries.len() as u64)
    }

    /// Phase 2: ensure every document has a signature built with the active
    /// parameters, then assemble the in-memory corpus. OCR bodies are
    /// loaded in bounded batches; only the fuzzy sample survives in memory.
    async fn build_corpus(
        &self,
        run_id: Uuid,
        config: &DedupeConfig,
        parameters: &AnalysisParameters,
        documents: &[Document],
        cancel: &CancellationToken,
    ) -> Result<Corpus> {
        let params = config.minhash_params();
        let total = documents.len() as u64;

        let mut ids = Vec::with_capacity(documents.len());
        let mut signatures: Vec<Option<Signature>> = vec![None; documents.len()];
        let mut scoring = Vec::with_capacity(documents.len());
        let mut facts = Vec::with_capacity(documents.len());
        let mut stale: Vec<usize> = Vec::new();

        for (i, document) in documents.iter().enumerate() {
            if (i + 1) % config.checkpoint_interval == 0 {
                check_cancel(cancel)?;
                self.emit(run_id, Phase::BuildSignatures, i as u64, total);
            }

            let content = self.store.get_content(document.id).await?.ok_or_else(|| {
                EngineError::not_found(format!("content for document {}", document.id))
            })?;

            let existing = self.store.get_signature(document.id).await?;
            match existing {
                Some(stored) if !parameters.force_rebuild && stored.signature.params == params => {
                    signatures[i] = Some(stored.signature);
                }
                _ => stale.push(i),
            }

            ids.push(document.id);
            scoring.push(ScoringData {
                title: document.title.clone(),
                original_filename: document.original_filename.clone(),
                file_size: document.file_size,
                text_sample: truncate_chars(&content.normalized_text, config.fuzzy_sample_size)
                    .to_string(),
            });
            facts.push(GroupingDoc {
                upstream_id: document.upstream_id,
                created_at: document.created_at,
                metadata_completeness: document.metadata_completeness(),
                text_len: content.full_text.chars().count(),
            });
        }

        if !stale.is_empty() {
            info!(
                "analysis {run_id}: rebuilding {} of {} signatures",
                stale.len(),
                documents.len()
            );
        }

        // Rebuild stale signatures in bounded batches: load texts, hash in
        // parallel, persist, release.
        for batch in stale.chunks(REBUILD_BATCH) {
            check_cancel(cancel)?;

            let mut texts: Vec<(usize, String)> = Vec::with_capacity(batch.len());
            for &i in batch {
                let content = self.store.get_content(documents[i].id).await?.ok_or_else(|| {
                    EngineError::not_found(format!("content for document {}", documents[i].id))
                })?;
                texts.push((i, content.full_text));
            }

            let built: Vec<(usize, TextProfile, Signature)> = texts
                .par_iter()
                .map(|(i, text)| {
                    let profile =
                        TextProfile::build(text, config.shingle_size, config.min_words);
                    let signature = Signature::build(&profile.shingles, params);
                    (*i, profile, signature)
                })
                .collect();

            for (i, profile, signature) in built {
                let document_id = documents[i].id;
                self.store
                    .replace_content(&DocumentContent {
                        document_id,
                        full_text: texts
                            .iter()
                            .find(|(j, _)| *j == i)
                            .map(|(_, t)| t.clone())
                            .unwrap_or_default(),
                        word_count: profile.word_count,
                        normalized_text: profile.normalized_text.clone(),
                        shingle_count: profile.shingles.len(),
                    })
                    .await?;
                self.store
                    .replace_signature(&StoredSignature {
                        document_id,
                        signature: signature.clone(),
                    })
                    .await?;
                scoring[i].text_sample =
                    truncate_chars(&profile.normalized_text, config.fuzzy_sample_size).to_string();
                signatures[i] = Some(signature);
            }
        }
        self.emit(run_id, Phase::BuildSignatures, total, total);

        let signatures: Vec<Signature> = signatures
            .into_iter()
            .map(|s| s.ok_or_else(|| EngineError::Internal(anyhow::anyhow!("signature missing"))))
            .collect::<Result<_>>()?;

        Ok(Corpus {
            ids,
            signatures,
            scoring,
            facts,
        })
    }

    fn emit(&self, run_id: Uuid, phase: Phase, current: u64, total: u64) {
        self.bus.publish(EventBody::AnalysisUpdate(AnalysisProgress {
            run_id,
            current,
            total,
            current_step: phase.as_str().to_string(),
        }));
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

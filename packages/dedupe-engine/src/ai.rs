//! AI metadata enrichment: provider port, job runner, and the apply path.
//!
//! The engine never talks to a model directly. A `SuggestionProvider` is
//! injected and, given a document's text and current metadata, returns
//! per-field suggestions with confidences. The runner persists suggestions
//! per document, the reviewer records per-field decisions, and `apply`
//! pushes accepted (or edited) values upstream and mirrors them locally.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use dedupe_storage::{
    AiJob, AiJobStatus, AiResult, DedupeStore, Document, FieldDecision, MetadataSuggestion,
    SuggestionDecisions,
};

use crate::error::{EngineError, Result};
use crate::events::{AiJobProgress, EventBody, EventBus};
use crate::upstream::{DocumentPatch, PaperlessClient};

/// Capability the core expects from the AI collaborator: document text in,
/// structured suggestion record out. Prompting is the provider's business.
#[async_trait]
pub trait SuggestionProvider: Send + Sync {
    async fn suggest(&self, document: &Document, content: &str) -> Result<MetadataSuggestion>;
}

pub struct AiJobRunner {
    store: Arc<dyn DedupeStore>,
    client: Arc<dyn PaperlessClient>,
    provider: Arc<dyn SuggestionProvider>,
    bus: Arc<EventBus>,
}

impl AiJobRunner {
    pub fn new(
        store: Arc<dyn DedupeStore>,
        client: Arc<dyn PaperlessClient>,
        provider: Arc<dyn SuggestionProvider>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            client,
            provider,
            bus,
        }
    }

    /// Run one enrichment job over a set of documents. Item failures are
    /// counted; the job only fails outright when every item failed.
    pub async fn run_job(
        &self,
        document_ids: &[Uuid],
        cancel: CancellationToken,
    ) -> Result<AiJob> {
        let mut job = AiJob::new(document_ids.len() as u64);
        self.store.create_ai_job(&job).await?;

        job.status = AiJobStatus::Running;
        self.store.update_ai_job(&job).await?;
        self.emit_update(&job);
        info!("ai job {}: {} documents", job.id, document_ids.len());

        let mut cancelled = false;
        for document_id in document_ids {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            match self.suggest_one(job.id, *document_id).await {
                Ok(()) => job.processed += 1,
                Err(err) => {
                    warn!("ai job {}: document {document_id} failed: {err}", job.id);
                    job.failed += 1;
                    if job.error.is_none() {
                        job.error = Some(format!("document {document_id}: {err}"));
                    }
                }
            }
            self.store.update_ai_job(&job).await?;
            self.emit_update(&job);
        }

        job.status = if cancelled {
            AiJobStatus::Cancelled
        } else if job.processed == 0 && job.failed > 0 {
            AiJobStatus::Failed
        } else {
            job.error = None;
            AiJobStatus::Completed
        };
        job.completed_at = Some(Utc::now());
        self.store.update_ai_job(&job).await?;
        self.bus.publish(EventBody::AiJobCompleted(AiJobProgress {
            job_id: job.id,
            status: job.status,
            total: job.total,
            processed: job.processed,
            failed: job.failed,
        }));
        Ok(job)
    }

    async fn suggest_one(&self, job_id: Uuid, document_id: Uuid) -> Result<()> {
        let document = self.store.get_document(document_id).await?;
        let content = self
            .store
            .get_content(document_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("content for document {document_id}")))?;

        let suggestion = self.provider.suggest(&document, &content.full_text).await?;
        self.store
            .put_ai_result(&AiResult {
                job_id,
                document_id,
                suggestion,
                decisions: SuggestionDecisions::default(),
                applied: false,
            })
            .await?;
        Ok(())
    }

    /// Record the reviewer's per-field decisions.
    pub async fn decide(
        &self,
        job_id: Uuid,
        document_id: Uuid,
        decisions: SuggestionDecisions,
    ) -> Result<AiResult> {
        let mut result = self
            .store
            .get_ai_result(job_id, document_id)
            .await?
            .ok_or_else(|| {
                EngineError::not_found(format!("ai result for document {document_id}"))
            })?;
        result.decisions = decisions;
        self.store.put_ai_result(&result).await?;
        Ok(result)
    }

    /// Push accepted and edited fields upstream, mirror them locally, and
    /// mark the result applied.
    pub async fn apply(&self, job_id: Uuid, document_id: Uuid) -> Result<()> {
        let mut result = self
            .store
            .get_ai_result(job_id, document_id)
            .await?
            .ok_or_else(|| {
                EngineError::not_found(format!("ai result for document {document_id}"))
            })?;
        let mut document = self.store.get_document(document_id).await?;

        let patch = build_patch(&result.suggestion, &result.decisions);
        if !patch.is_empty() {
            self.client
                .update_document(document.upstream_id, &patch)
                .await?;

            if let Some(title) = &patch.title {
                document.title = title.clone();
            }
            if let Some(correspondent) = &patch.correspondent {
                document.correspondent = Some(correspondent.clone());
            }
            if let Some(document_type) = &patch.document_type {
                document.document_type = Some(document_type.clone());
            }
            for tag in &patch.add_tags {
                if !document.tags.contains(tag) {
                    document.tags.push(tag.clone());
                }
            }
            self.store.upsert_document(&document).await?;
        }

        result.applied = true;
        self.store.put_ai_result(&result).await?;
        Ok(())
    }

    fn emit_update(&self, job: &AiJob) {
        self.bus.publish(EventBody::AiJobUpdate(AiJobProgress {
            job_id: job.id,
            status: job.status,
            total: job.total,
            processed: job.processed,
            failed: job.failed,
        }));
    }
}

/// Fold suggestions and decisions into an upstream patch. A field appears
/// only when it was accepted (suggested value) or edited (override value).
fn build_patch(suggestion: &MetadataSuggestion, decisions: &SuggestionDecisions) -> DocumentPatch {
    fn resolve<T: Clone>(
        suggested: &Option<dedupe_storage::FieldSuggestion<T>>,
        decision: &Option<FieldDecision<T>>,
    ) -> Option<T> {
        match decision {
            Some(FieldDecision::Accept) => suggested.as_ref().map(|s| s.value.clone()),
            Some(FieldDecision::Edit { value }) => Some(value.clone()),
            Some(FieldDecision::Reject) | None => None,
        }
    }

    DocumentPatch {
        title: resolve(&suggestion.title, &decisions.title),
        correspondent: resolve(&suggestion.correspondent, &decisions.correspondent),
        document_type: resolve(&suggestion.document_type, &decisions.document_type),
        created: resolve(&suggestion.created_date, &decisions.created_date),
        add_tags: resolve(&suggestion.tags, &decisions.tags).unwrap_or_default(),
        remove_tags: Vec::new(),
    }
}

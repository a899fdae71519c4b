//! Incremental sync of upstream documents and OCR content.
//!
//! Pages through the upstream catalog, detecting per-document change with
//! the upstream `modified` timestamp first and a SHA-256 content
//! fingerprint second, so OCR is only re-fetched and signatures only
//! rebuilt when something actually changed. Memory stays bounded to one
//! page of OCR bodies; concurrency is capped by the upstream client.
//!
//! Exactly one sync runs at a time. Cancellation is cooperative between
//! pages. Documents the upstream no longer lists are marked orphaned, never
//! deleted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use dedupe_core::minhash::Signature;
use dedupe_core::normalize::TextProfile;
use dedupe_core::DedupeConfig;
use dedupe_storage::{DedupeStore, Document, DocumentContent, StoredSignature};

use crate::error::{EngineError, Result};
use crate::events::{EventBody, EventBus, SyncProgress, SyncReport};
use crate::upstream::{PaperlessClient, UpstreamDocument};
use crate::SharedConfig;

const MAX_REPORT_ERRORS: usize = 100;

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Re-fetch OCR even when the upstream `modified` timestamp is
    /// unchanged.
    pub force_refresh: bool,
}

enum DocOutcome {
    Created,
    Updated,
    Unchanged,
}

pub struct SyncEngine {
    store: Arc<dyn DedupeStore>,
    client: Arc<dyn PaperlessClient>,
    bus: Arc<EventBus>,
    config: SharedConfig,
    running: AtomicBool,
}

/// Resets the running flag when a sync exits by any path.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn DedupeStore>,
        client: Arc<dyn PaperlessClient>,
        bus: Arc<EventBus>,
        config: SharedConfig,
    ) -> Self {
        Self {
            store,
            client,
            bus,
            config,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run a full sync pass. Fails with `AlreadyRunning` when a sync is in
    /// progress.
    pub async fn run(&self, options: SyncOptions, cancel: CancellationToken) -> Result<SyncReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::AlreadyRunning("sync"));
        }
        let _guard = RunningGuard(&self.running);

        // Config is read once at entry and held for the whole pass.
        let config = self.config.read().clone();
        let operation_id = Uuid::new_v4();
        let mut report = SyncReport {
            operation_id,
            ..Default::default()
        };
        let mut seen_upstream_ids: Vec<i64> = Vec::new();
        let mut page = 1u32;

        info!(
            "sync {operation_id}: starting (force_refresh={})",
            options.force_refresh
        );

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let listed = match self.client.list_documents(page, config.page_size).await {
                Ok(listed) => listed,
                Err(err) => {
                    warn!("sync {operation_id}: page {page} listing failed: {err}");
                    push_error(&mut report, format!("page {page}: {err}"));
                    self.bus.publish(EventBody::SyncCompleted(report));
                    return Err(err);
                }
            };
            report.pages += 1;

            // One page of OCR bodies in flight at a time; the client's
            // semaphore caps upstream concurrency inside the page.
            let outcomes = futures::future::join_all(listed.documents.iter().map(|doc| async {
                (
                    doc.id,
                    self.process_document(&config, doc, options.force_refresh)
                        .await,
                )
            }))
            .await;

            for (upstream_id, outcome) in outcomes {
                seen_upstream_ids.push(upstream_id);
                match outcome {
                    Ok(DocOutcome::Created) => report.created += 1,
                    Ok(DocOutcome::Updated) => report.updated += 1,
                    Ok(DocOutcome::Unchanged) => report.unchanged += 1,
                    Err(EngineError::Storage(err)) => {
                        // Storage failures are not item-level noise; abort
                        // the pass.
                        push_error(&mut report, format!("document {upstream_id}: {err}"));
                        self.bus.publish(EventBody::SyncCompleted(report));
                        return Err(EngineError::Storage(err));
                    }
                    Err(err) => {
                        report.failed += 1;
                        push_error(&mut report, format!("document {upstream_id}: {err}"));
                    }
                }
            }

            let processed = report.created + report.updated + report.unchanged + report.failed;
            self.bus.publish(EventBody::SyncUpdate(SyncProgress {
                operation_id,
                current: processed,
                total: Some(listed.total),
                current_step: format!("Synced page {page}"),
            }));

            if !listed.has_next {
                break;
            }
            page += 1;
        }

        // Orphan detection needs a complete pass; a cancelled sync has not
        // seen every page.
        if !report.cancelled {
            report.orphaned = self.store.mark_orphaned_except(&seen_upstream_ids).await?;
        }

        info!(
            "sync {operation_id}: finished ({} created, {} updated, {} unchanged, {} orphaned, {} failed{})",
            report.created,
            report.updated,
            report.unchanged,
            report.orphaned,
            report.failed,
            if report.cancelled { ", cancelled" } else { "" }
        );
        self.bus.publish(EventBody::SyncCompleted(report.clone()));
        Ok(report)
    }

    async fn process_document(
        &self,
        config: &DedupeConfig,
        upstream: &UpstreamDocument,
        force_refresh: bool,
    ) -> Result<DocOutcome> {
        let existing = self
            .store
            .get_document_by_upstream_id(upstream.id)
            .await?;

        match existing {
            None => {
                let text = self.client.get_content(upstream.id).await?;
                let fingerprint = content_fingerprint(&text, config.max_ocr_length);
                let document = build_document(Uuid::new_v4(), upstream, fingerprint);
                self.store.upsert_document(&document).await?;
                self.ingest_content(config, document.id, &text).await?;
                Ok(DocOutcome::Created)
            }
            Some(local)
                if !force_refresh
                    && local.modified_at == upstream.modified
                    && !local.orphaned =>
            {
                Ok(DocOutcome::Unchanged)
            }
            Some(local) if !force_refresh && local.modified_at == upstream.modified => {
                // Upstream lists it again after an orphan interval; the
                // metadata upsert clears the flag.
                let document = build_document(local.id, upstream, local.content_fingerprint);
                self.store.upsert_document(&document).await?;
                Ok(DocOutcome::Updated)
            }
            Some(local) => {
                let text = self.client.get_content(upstream.id).await?;
                let fingerprint = content_fingerprint(&text, config.max_ocr_length);
                let content_changed = fingerprint != local.content_fingerprint;

                let document = build_document(local.id, upstream, fingerprint);
                self.store.upsert_document(&document).await?;
                if content_changed {
                    self.ingest_content(config, local.id, &text).await?;
                }
                Ok(DocOutcome::Updated)
            }
        }
    }

    /// Store content and rebuild the signature for one document.
    async fn ingest_content(
        &self,
        config: &DedupeConfig,
        document_id: Uuid,
        text: &str,
    ) -> Result<()> {
        let text = truncate_chars(text, config.max_ocr_length);
        let profile = TextProfile::build(text, config.shingle_size, config.min_words);
        let signature = Signature::build(&profile.shingles, config.minhash_params());

        self.store
            .replace_content(&DocumentContent {
                document_id,
                full_text: text.to_string(),
                word_count: profile.word_count,
                normalized_text: profile.normalized_text,
                shingle_count: profile.shingles.len(),
            })
            .await?;
        self.store
            .replace_signature(&StoredSignature {
                document_id,
                signature,
            })
            .await?;
        Ok(())
    }
}

fn push_error(report: &mut SyncReport, message: String) {
    if report.errors.len() < MAX_REPORT_ERRORS {
        report.errors.push(message);
    }
}

fn build_document(id: Uuid, upstream: &UpstreamDocument, fingerprint: String) -> Document {
    Document {
        id,
        upstream_id: upstream.id,
        title: upstream.title.clone(),
        created_at: upstream.created,
        modified_at: upstream.modified,
        correspondent: upstream.correspondent.clone(),
        document_type: upstream.document_type.clone(),
        tags: upstream.tags.clone(),
        original_filename: upstream.original_file_name.clone(),
        archive_filename: upstream.archive_file_name.clone(),
        file_size: upstream.file_size,
        archive_serial_number: upstream.archive_serial_number,
        content_fingerprint: fingerprint,
        orphaned: false,
        last_synced_at: Utc::now(),
    }
}

/// SHA-256 hex over the stored (capped) OCR text.
fn content_fingerprint(text: &str, max_chars: usize) -> String {
    let text = truncate_chars(text, max_chars);
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

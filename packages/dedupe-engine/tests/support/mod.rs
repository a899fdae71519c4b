//! Shared fixtures for the engine integration tests: a scripted in-memory
//! upstream, a fault-injecting store wrapper, and corpus builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use dedupe_core::minhash::Signature;
use dedupe_core::normalize::TextProfile;
use dedupe_core::DedupeConfig;
use dedupe_engine::error::{EngineError, Result};
use dedupe_engine::upstream::{
    with_retry, DocumentPage, DocumentPatch, PaperlessClient, RetryPolicy, UpstreamDocument,
};
use dedupe_storage::{
    AiJob, AiResult, AnalysisRun, BatchOperation, DedupeStore, Document, DocumentContent,
    DuplicateGroup, GroupFilter, GroupSnapshotEntry, GroupWithMembers, SqliteStore,
    StorageError, StoredSignature,
};

/// Install a test subscriber once so `RUST_LOG=debug cargo test` shows the
/// engine's tracing output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── Scripted upstream ──────────────────────────────────────────────────────

/// How a scripted delete should misbehave.
pub enum DeleteScript {
    /// Fail with 500 this many times, then succeed.
    TransientTimes(u32),
    /// Always fail with this 4xx status.
    Permanent(u16),
}

/// In-memory upstream with per-document failure scripts. Delete calls run
/// through the production retry helper (fast policy) so the retry path is
/// exercised end to end.
pub struct MemoryPaperlessClient {
    pub documents: RwLock<Vec<UpstreamDocument>>,
    pub contents: RwLock<HashMap<i64, String>>,
    pub delete_scripts: Mutex<HashMap<i64, DeleteScript>>,
    pub deleted: RwLock<Vec<i64>>,
    pub patches: RwLock<Vec<(i64, DocumentPatch)>>,
    retry: RetryPolicy,
}

impl MemoryPaperlessClient {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(Vec::new()),
            contents: RwLock::new(HashMap::new()),
            delete_scripts: Mutex::new(HashMap::new()),
            deleted: RwLock::new(Vec::new()),
            patches: RwLock::new(Vec::new()),
            retry: RetryPolicy {
                base_delay: Duration::from_millis(1),
                ..Default::default()
            },
        }
    }

    pub fn add_document(&self, document: UpstreamDocument, content: String) {
        self.contents.write().insert(document.id, content);
        self.documents.write().push(document);
    }

    pub fn script_delete(&self, upstream_id: i64, script: DeleteScript) {
        self.delete_scripts.lock().insert(upstream_id, script);
    }

    fn try_delete(&self, upstream_id: i64) -> Result<()> {
        let mut scripts = self.delete_scripts.lock();
        match scripts.get_mut(&upstream_id) {
            Some(DeleteScript::TransientTimes(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                return Err(EngineError::transient(Some(500), "scripted 500"));
            }
            Some(DeleteScript::Permanent(status)) => {
                return Err(EngineError::permanent(*status, "scripted permanent failure"));
            }
            _ => {}
        }
        drop(scripts);

        self.documents.write().retain(|d| d.id != upstream_id);
        self.contents.write().remove(&upstream_id);
        self.deleted.write().push(upstream_id);
        Ok(())
    }
}

#[async_trait]
impl PaperlessClient for MemoryPaperlessClient {
    async fn list_documents(&self, page: u32, page_size: u32) -> Result<DocumentPage> {
        let documents = self.documents.read();
        let size = page_size as usize;
        let start = (page as usize - 1) * size;
        Ok(DocumentPage {
            total: documents.len() as u64,
            has_next: start + size < documents.len(),
            documents: documents.iter().skip(start).take(size).cloned().collect(),
        })
    }

    async fn get_content(&self, upstream_id: i64) -> Result<String> {
        self.contents
            .read()
            .get(&upstream_id)
            .cloned()
            .ok_or_else(|| EngineError::permanent(404, "no content"))
    }

    async fn delete_document(&self, upstream_id: i64) -> Result<()> {
        let this = self;
        with_retry(&self.retry, "delete_document", || async move {
            this.try_delete(upstream_id)
        })
        .await
    }

    async fn update_document(&self, upstream_id: i64, patch: &DocumentPatch) -> Result<()> {
        self.patches.write().push((upstream_id, patch.clone()));
        Ok(())
    }
}

// ── Fault-injecting store wrapper ──────────────────────────────────────────

/// Delegates everything to SQLite, with two hooks: fail the next snapshot
/// replace (atomicity tests) and fire a cancel token from inside the
/// eligibility listing (deterministic mid-run cancellation).
pub struct HookedStore {
    pub inner: SqliteStore,
    pub fail_next_replace: Mutex<bool>,
    pub cancel_on_list: Mutex<Option<CancellationToken>>,
}

impl HookedStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteStore::open_in_memory().unwrap(),
            fail_next_replace: Mutex::new(false),
            cancel_on_list: Mutex::new(None),
        }
    }
}

#[async_trait]
impl DedupeStore for HookedStore {
    async fn upsert_document(&self, document: &Document) -> dedupe_storage::Result<()> {
        self.inner.upsert_document(document).await
    }
    async fn get_document(&self, id: Uuid) -> dedupe_storage::Result<Document> {
        self.inner.get_document(id).await
    }
    async fn get_document_by_upstream_id(
        &self,
        upstream_id: i64,
    ) -> dedupe_storage::Result<Option<Document>> {
        self.inner.get_document_by_upstream_id(upstream_id).await
    }
    async fn list_documents(&self) -> dedupe_storage::Result<Vec<Document>> {
        self.inner.list_documents().await
    }
    async fn list_eligible_documents(
        &self,
        min_words: usize,
    ) -> dedupe_storage::Result<Vec<Document>> {
        if let Some(token) = self.cancel_on_list.lock().take() {
            token.cancel();
        }
        self.inner.list_eligible_documents(min_words).await
    }
    async fn mark_orphaned_except(&self, seen: &[i64]) -> dedupe_storage::Result<u64> {
        self.inner.mark_orphaned_except(seen).await
    }
    async fn delete_document(&self, id: Uuid) -> dedupe_storage::Result<()> {
        self.inner.delete_document(id).await
    }
    async fn replace_content(&self, content: &DocumentContent) -> dedupe_storage::Result<()> {
        self.inner.replace_content(content).await
    }
    async fn get_content(&self, id: Uuid) -> dedupe_storage::Result<Option<DocumentContent>> {
        self.inner.get_content(id).await
    }
    async fn replace_signature(&self, signature: &StoredSignature) -> dedupe_storage::Result<()> {
        self.inner.replace_signature(signature).await
    }
    async fn get_signature(&self, id: Uuid) -> dedupe_storage::Result<Option<StoredSignature>> {
        self.inner.get_signature(id).await
    }
    async fn replace_group_snapshot(
        &self,
        run_id: Uuid,
        groups: &[GroupSnapshotEntry],
    ) -> dedupe_storage::Result<()> {
        if std::mem::take(&mut *self.fail_next_replace.lock()) {
            return Err(StorageError::transaction("injected persist failure"));
        }
        self.inner.replace_group_snapshot(run_id, groups).await
    }
    async fn get_group(&self, id: &str) -> dedupe_storage::Result<GroupWithMembers> {
        self.inner.get_group(id).await
    }
    async fn list_groups(
        &self,
        filter: &GroupFilter,
    ) -> dedupe_storage::Result<Vec<GroupWithMembers>> {
        self.inner.list_groups(filter).await
    }
    async fn count_groups(&self) -> dedupe_storage::Result<u64> {
        self.inner.count_groups().await
    }
    async fn mark_reviewed(&self, id: &str, reviewed: bool) -> dedupe_storage::Result<()> {
        self.inner.mark_reviewed(id, reviewed).await
    }
    async fn mark_resolved(&self, id: &str, resolved: bool) -> dedupe_storage::Result<()> {
        self.inner.mark_resolved(id, resolved).await
    }
    async fn delete_group(&self, id: &str) -> dedupe_storage::Result<()> {
        self.inner.delete_group(id).await
    }
    async fn create_run(&self, run: &AnalysisRun) -> dedupe_storage::Result<()> {
        self.inner.create_run(run).await
    }
    async fn update_run(&self, run: &AnalysisRun) -> dedupe_storage::Result<()> {
        self.inner.update_run(run).await
    }
    async fn get_run(&self, id: Uuid) -> dedupe_storage::Result<AnalysisRun> {
        self.inner.get_run(id).await
    }
    async fn latest_run(&self) -> dedupe_storage::Result<Option<AnalysisRun>> {
        self.inner.latest_run().await
    }
    async fn create_operation(&self, operation: &BatchOperation) -> dedupe_storage::Result<()> {
        self.inner.create_operation(operation).await
    }
    async fn update_operation(&self, operation: &BatchOperation) -> dedupe_storage::Result<()> {
        self.inner.update_operation(operation).await
    }
    async fn get_operation(&self, id: Uuid) -> dedupe_storage::Result<BatchOperation> {
        self.inner.get_operation(id).await
    }
    async fn list_operations(&self, limit: usize) -> dedupe_storage::Result<Vec<BatchOperation>> {
        self.inner.list_operations(limit).await
    }
    async fn create_ai_job(&self, job: &AiJob) -> dedupe_storage::Result<()> {
        self.inner.create_ai_job(job).await
    }
    async fn update_ai_job(&self, job: &AiJob) -> dedupe_storage::Result<()> {
        self.inner.update_ai_job(job).await
    }
    async fn get_ai_job(&self, id: Uuid) -> dedupe_storage::Result<AiJob> {
        self.inner.get_ai_job(id).await
    }
    async fn put_ai_result(&self, result: &AiResult) -> dedupe_storage::Result<()> {
        self.inner.put_ai_result(result).await
    }
    async fn get_ai_result(
        &self,
        job_id: Uuid,
        document_id: Uuid,
    ) -> dedupe_storage::Result<Option<AiResult>> {
        self.inner.get_ai_result(job_id, document_id).await
    }
    async fn list_ai_results(&self, job_id: Uuid) -> dedupe_storage::Result<Vec<AiResult>> {
        self.inner.list_ai_results(job_id).await
    }
    async fn get_setting(&self, key: &str) -> dedupe_storage::Result<Option<serde_json::Value>> {
        self.inner.get_setting(key).await
    }
    async fn put_setting(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> dedupe_storage::Result<()> {
        self.inner.put_setting(key, value).await
    }
}

// ── Corpus builders ────────────────────────────────────────────────────────

/// `count` distinct words sharing a vocabulary prefix.
pub fn words(marker: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{marker}{i}")).collect()
}

pub fn join(words: &[String]) -> String {
    words.join(" ")
}

/// Same word multiset with the last `k` words reversed: token-sort fuzzy
/// similarity stays 1.0 while the shingle jaccard drops with `k`.
pub fn with_tail_reversed(words: &[String], k: usize) -> String {
    let mut out = words.to_vec();
    let len = out.len();
    out[len - k..].reverse();
    join(&out)
}

pub struct SeedSpec<'a> {
    pub upstream_id: i64,
    pub title: &'a str,
    pub text: &'a str,
    pub created_day: u32,
    pub file_size: Option<u64>,
}

/// Insert a document with content and a fresh signature, the way a sync
/// pass would.
pub async fn seed(store: &dyn DedupeStore, config: &DedupeConfig, spec: SeedSpec<'_>) -> Uuid {
    let id = Uuid::new_v4();
    let document = Document {
        id,
        upstream_id: spec.upstream_id,
        title: spec.title.to_string(),
        created_at: Utc
            .with_ymd_and_hms(2024, 3, spec.created_day, 12, 0, 0)
            .unwrap(),
        modified_at: Utc.with_ymd_and_hms(2024, 3, spec.created_day, 12, 0, 0).unwrap(),
        correspondent: None,
        document_type: None,
        tags: vec![],
        original_filename: None,
        archive_filename: None,
        file_size: spec.file_size,
        archive_serial_number: None,
        content_fingerprint: format!("fp-{}", spec.upstream_id),
        orphaned: false,
        last_synced_at: Utc::now(),
    };
    store.upsert_document(&document).await.unwrap();

    let profile = TextProfile::build(spec.text, config.shingle_size, config.min_words);
    store
        .replace_content(&DocumentContent {
            document_id: id,
            full_text: spec.text.to_string(),
            word_count: profile.word_count,
            normalized_text: profile.normalized_text.clone(),
            shingle_count: profile.shingles.len(),
        })
        .await
        .unwrap();
    store
        .replace_signature(&StoredSignature {
            document_id: id,
            signature: Signature::build(&profile.shingles, config.minhash_params()),
        })
        .await
        .unwrap();
    id
}

/// The group (if any) containing `document_id`.
pub async fn group_of(
    store: &dyn DedupeStore,
    document_id: Uuid,
) -> Option<(DuplicateGroup, Vec<Uuid>)> {
    for group in store.list_groups(&GroupFilter::default()).await.unwrap() {
        if group.members.iter().any(|m| m.document_id == document_id) {
            let members = group.members.iter().map(|m| m.document_id).collect();
            return Some((group.group, members));
        }
    }
    None
}

pub fn upstream_doc(id: i64, title: &str) -> UpstreamDocument {
    UpstreamDocument {
        id,
        title: title.to_string(),
        created: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        modified: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        correspondent: None,
        document_type: None,
        tags: vec![],
        original_file_name: None,
        archive_file_name: None,
        file_size: Some(4_096),
        archive_serial_number: None,
    }
}

pub fn arc_store() -> (Arc<SqliteStore>, Arc<dyn DedupeStore>) {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    (store.clone(), store)
}

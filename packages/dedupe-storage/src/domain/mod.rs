//! Domain layer: entities and the `DedupeStore` port trait.
//!
//! # Domain Models
//!
//! - `Document`: synced upstream document metadata (never deleted by sync;
//!   marked orphaned when the upstream drops it)
//! - `DocumentContent`: OCR text + normalized form, 1:1 with Document
//! - `StoredSignature`: MinHash signature + its algorithm parameters
//! - `DuplicateGroup` / `DuplicateMember`: one analysis snapshot's groups
//! - `AnalysisRun`, `BatchOperation`, `AiJob` / `AiResult`: operation state
//!
//! # Port Trait
//!
//! - `DedupeStore`: the single storage abstraction the engine depends on

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dedupe_core::grouping::MemberSimilarity;
use dedupe_core::minhash::Signature;
use dedupe_core::scoring::ConfidenceBreakdown;

use crate::error::{Result, StorageError};

// ═══════════════════════════════════════════════════════════════════════════
// Documents
// ═══════════════════════════════════════════════════════════════════════════

/// Synced metadata for one upstream document.
///
/// Created on sync insert; updated when the upstream `modified_at` advances
/// or the content fingerprint changes. The core never deletes a document on
/// its own; when the upstream stops listing it, it is marked orphaned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub upstream_id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub correspondent: Option<String>,
    pub document_type: Option<String>,
    pub tags: Vec<String>,
    pub original_filename: Option<String>,
    pub archive_filename: Option<String>,
    pub file_size: Option<u64>,
    pub archive_serial_number: Option<i64>,
    /// SHA-256 hex over the raw OCR text.
    pub content_fingerprint: String,
    pub orphaned: bool,
    pub last_synced_at: DateTime<Utc>,
}

impl Document {
    /// Count of populated metadata fields, used as a primary-selection
    /// tiebreaker.
    pub fn metadata_completeness(&self) -> u32 {
        let mut n = 0;
        if !self.title.trim().is_empty() {
            n += 1;
        }
        if self.correspondent.as_deref().is_some_and(|s| !s.is_empty()) {
            n += 1;
        }
        if self.document_type.as_deref().is_some_and(|s| !s.is_empty()) {
            n += 1;
        }
        if !self.tags.is_empty() {
            n += 1;
        }
        n
    }
}

/// OCR text for one document, bounded to the configured cap. Rewritten
/// whenever the content fingerprint changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentContent {
    pub document_id: Uuid,
    pub full_text: String,
    pub word_count: usize,
    pub normalized_text: String,
    pub shingle_count: usize,
}

/// Persisted MinHash signature. The embedded params identify the
/// permutation family; the analysis coordinator rebuilds on any mismatch
/// with the active configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSignature {
    pub document_id: Uuid,
    pub signature: Signature,
}

// ═══════════════════════════════════════════════════════════════════════════
// Duplicate groups
// ═══════════════════════════════════════════════════════════════════════════

/// One duplicate group in the current snapshot.
///
/// The `id` is the stable hash of the sorted member upstream ids, so a
/// re-analysis producing the same membership produces the same id and the
/// `reviewed`/`resolved` flags carry over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub id: String,
    pub confidence_score: f64,
    pub confidence_breakdown: ConfidenceBreakdown,
    pub reviewed: bool,
    pub resolved: bool,
    pub primary_document_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Join relation between a group and a document. Exactly one member per
/// group carries `is_primary`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateMember {
    pub group_id: String,
    pub document_id: Uuid,
    pub is_primary: bool,
    pub similarity_to_primary: MemberSimilarity,
}

/// A group with its members loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupWithMembers {
    pub group: DuplicateGroup,
    pub members: Vec<DuplicateMember>,
}

impl GroupWithMembers {
    pub fn non_primary_members(&self) -> impl Iterator<Item = &DuplicateMember> {
        self.members.iter().filter(|m| !m.is_primary)
    }
}

/// Input to `replace_group_snapshot`: one group as produced by an analysis
/// run, before review state is folded in.
#[derive(Debug, Clone)]
pub struct GroupSnapshotEntry {
    pub key: String,
    pub confidence_score: f64,
    pub confidence_breakdown: ConfidenceBreakdown,
    pub primary_document_id: Uuid,
    pub members: Vec<MemberEntry>,
}

#[derive(Debug, Clone)]
pub struct MemberEntry {
    pub document_id: Uuid,
    pub is_primary: bool,
    pub similarity_to_primary: MemberSimilarity,
}

/// Read-projection filter for group listings.
#[derive(Debug, Clone, Default)]
pub struct GroupFilter {
    pub reviewed: Option<bool>,
    pub resolved: Option<bool>,
    pub min_confidence: Option<f64>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Analysis runs
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            _ => Err(StorageError::serialization(format!(
                "Invalid run status: {s}"
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisParameters {
    /// Overall-score threshold override (0..1); config default when None.
    pub threshold: Option<f64>,
    pub force_rebuild: bool,
    pub limit: Option<usize>,
    /// Quick mode: score by jaccard alone.
    pub quick: bool,
}

impl Default for AnalysisParameters {
    fn default() -> Self {
        Self {
            threshold: None,
            force_rebuild: false,
            limit: None,
            quick: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub id: Uuid,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub documents_processed: u64,
    pub groups_found: u64,
    pub error: Option<String>,
    pub parameters: AnalysisParameters,
    /// Fingerprint of the confidence weights the run used; a mismatch with
    /// the active config marks the snapshot stale.
    pub weights_fingerprint: u64,
}

impl AnalysisRun {
    pub fn new(parameters: AnalysisParameters, weights_fingerprint: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: RunStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            documents_processed: 0,
            groups_found: 0,
            error: None,
            parameters,
            weights_fingerprint,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Batch operations
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Delete,
    Tag,
    Untag,
    UpdateMetadata,
    ResolveDuplicates,
    MarkReviewed,
}

impl BatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::Delete => "delete",
            BatchKind::Tag => "tag",
            BatchKind::Untag => "untag",
            BatchKind::UpdateMetadata => "update_metadata",
            BatchKind::ResolveDuplicates => "resolve_duplicates",
            BatchKind::MarkReviewed => "mark_reviewed",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "delete" => Ok(BatchKind::Delete),
            "tag" => Ok(BatchKind::Tag),
            "untag" => Ok(BatchKind::Untag),
            "update_metadata" => Ok(BatchKind::UpdateMetadata),
            "resolve_duplicates" => Ok(BatchKind::ResolveDuplicates),
            "mark_reviewed" => Ok(BatchKind::MarkReviewed),
            _ => Err(StorageError::serialization(format!(
                "Invalid batch kind: {s}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    PartiallyCompleted,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::PartiallyCompleted => "partially_completed",
            BatchStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(BatchStatus::Pending),
            "in_progress" => Ok(BatchStatus::InProgress),
            "completed" => Ok(BatchStatus::Completed),
            "failed" => Ok(BatchStatus::Failed),
            "partially_completed" => Ok(BatchStatus::PartiallyCompleted),
            "cancelled" => Ok(BatchStatus::Cancelled),
            _ => Err(StorageError::serialization(format!(
                "Invalid batch status: {s}"
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchStatus::Pending | BatchStatus::InProgress)
    }
}

/// A long-running bulk operation. Counters and the bounded error ring are
/// owned by a single worker; partial failures finish as
/// `partially_completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOperation {
    pub id: Uuid,
    pub kind: BatchKind,
    pub status: BatchStatus,
    pub total_items: u64,
    pub processed: u64,
    pub failed: u64,
    /// First N error strings; later errors are counted but not retained.
    pub errors: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub parameters: serde_json::Value,
}

impl BatchOperation {
    pub fn new(kind: BatchKind, total_items: u64, parameters: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            status: BatchStatus::Pending,
            total_items,
            processed: 0,
            failed: 0,
            errors: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
            parameters,
        }
    }

    /// Terminal status from the final counters.
    pub fn final_status(&self, cancelled: bool) -> BatchStatus {
        if cancelled {
            BatchStatus::Cancelled
        } else if self.failed == 0 {
            BatchStatus::Completed
        } else if self.processed == 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::PartiallyCompleted
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// AI enrichment (optional collaborator; the core stores status only)
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiJobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl AiJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiJobStatus::Pending => "pending",
            AiJobStatus::Running => "running",
            AiJobStatus::Completed => "completed",
            AiJobStatus::Failed => "failed",
            AiJobStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(AiJobStatus::Pending),
            "running" => Ok(AiJobStatus::Running),
            "completed" => Ok(AiJobStatus::Completed),
            "failed" => Ok(AiJobStatus::Failed),
            "cancelled" => Ok(AiJobStatus::Cancelled),
            _ => Err(StorageError::serialization(format!(
                "Invalid AI job status: {s}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiJob {
    pub id: Uuid,
    pub status: AiJobStatus,
    pub total: u64,
    pub processed: u64,
    pub failed: u64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AiJob {
    pub fn new(total: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: AiJobStatus::Pending,
            total,
            processed: 0,
            failed: 0,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// A suggested value with the model's confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSuggestion<T> {
    pub value: T,
    pub confidence: f64,
}

/// Per-document metadata suggestions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataSuggestion {
    pub title: Option<FieldSuggestion<String>>,
    pub correspondent: Option<FieldSuggestion<String>>,
    pub document_type: Option<FieldSuggestion<String>>,
    pub tags: Option<FieldSuggestion<Vec<String>>>,
    pub created_date: Option<FieldSuggestion<NaiveDate>>,
}

/// Reviewer decision on one suggested field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum FieldDecision<T> {
    Accept,
    Reject,
    /// Accept with an override value.
    Edit { value: T },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionDecisions {
    pub title: Option<FieldDecision<String>>,
    pub correspondent: Option<FieldDecision<String>>,
    pub document_type: Option<FieldDecision<String>>,
    pub tags: Option<FieldDecision<Vec<String>>>,
    pub created_date: Option<FieldDecision<NaiveDate>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiResult {
    pub job_id: Uuid,
    pub document_id: Uuid,
    pub suggestion: MetadataSuggestion,
    pub decisions: SuggestionDecisions,
    pub applied: bool,
}

// ═══════════════════════════════════════════════════════════════════════════
// Port Trait: DedupeStore
// ═══════════════════════════════════════════════════════════════════════════

/// Storage abstraction for the deduplication engine.
///
/// All writes are transactional per call. `replace_group_snapshot` is the
/// one multi-entity operation: it replaces the entire group snapshot in a
/// single transaction, preserving review state for groups whose id is
/// unchanged, and is serialized against the batch orchestrator's
/// single-group updates by the implementation's group-write lock.
#[async_trait]
pub trait DedupeStore: Send + Sync {
    // ── Documents ──────────────────────────────────────────────────────────

    /// Insert or update by `upstream_id`. Clears the orphaned flag.
    async fn upsert_document(&self, document: &Document) -> Result<()>;

    async fn get_document(&self, id: Uuid) -> Result<Document>;

    async fn get_document_by_upstream_id(&self, upstream_id: i64) -> Result<Option<Document>>;

    async fn list_documents(&self) -> Result<Vec<Document>>;

    /// Documents eligible for analysis: not orphaned, content present, and
    /// word count at or above `min_words`.
    async fn list_eligible_documents(&self, min_words: usize) -> Result<Vec<Document>>;

    /// Mark every document whose upstream id is not in `seen` as orphaned.
    /// Returns the number of newly orphaned documents.
    async fn mark_orphaned_except(&self, seen_upstream_ids: &[i64]) -> Result<u64>;

    /// Delete a document, cascading to its content, signature, and group
    /// memberships. A group left with fewer than two members is deleted; a
    /// group losing its primary promotes the closest remaining member.
    async fn delete_document(&self, id: Uuid) -> Result<()>;

    // ── Content & signatures ───────────────────────────────────────────────

    async fn replace_content(&self, content: &DocumentContent) -> Result<()>;

    async fn get_content(&self, document_id: Uuid) -> Result<Option<DocumentContent>>;

    async fn replace_signature(&self, signature: &StoredSignature) -> Result<()>;

    async fn get_signature(&self, document_id: Uuid) -> Result<Option<StoredSignature>>;

    // ── Groups ─────────────────────────────────────────────────────────────

    /// Atomically replace the group snapshot. Groups absent from `groups`
    /// are deleted (cascading members); groups with an unchanged id keep
    /// their `reviewed`/`resolved` flags.
    async fn replace_group_snapshot(
        &self,
        run_id: Uuid,
        groups: &[GroupSnapshotEntry],
    ) -> Result<()>;

    async fn get_group(&self, id: &str) -> Result<GroupWithMembers>;

    async fn list_groups(&self, filter: &GroupFilter) -> Result<Vec<GroupWithMembers>>;

    async fn count_groups(&self) -> Result<u64>;

    async fn mark_reviewed(&self, id: &str, reviewed: bool) -> Result<()>;

    async fn mark_resolved(&self, id: &str, resolved: bool) -> Result<()>;

    async fn delete_group(&self, id: &str) -> Result<()>;

    // ── Analysis runs ──────────────────────────────────────────────────────

    async fn create_run(&self, run: &AnalysisRun) -> Result<()>;

    async fn update_run(&self, run: &AnalysisRun) -> Result<()>;

    async fn get_run(&self, id: Uuid) -> Result<AnalysisRun>;

    /// Most recently created run, if any.
    async fn latest_run(&self) -> Result<Option<AnalysisRun>>;

    // ── Batch operations ───────────────────────────────────────────────────

    async fn create_operation(&self, operation: &BatchOperation) -> Result<()>;

    async fn update_operation(&self, operation: &BatchOperation) -> Result<()>;

    async fn get_operation(&self, id: Uuid) -> Result<BatchOperation>;

    async fn list_operations(&self, limit: usize) -> Result<Vec<BatchOperation>>;

    // ── AI jobs ────────────────────────────────────────────────────────────

    async fn create_ai_job(&self, job: &AiJob) -> Result<()>;

    async fn update_ai_job(&self, job: &AiJob) -> Result<()>;

    async fn get_ai_job(&self, id: Uuid) -> Result<AiJob>;

    async fn put_ai_result(&self, result: &AiResult) -> Result<()>;

    async fn get_ai_result(&self, job_id: Uuid, document_id: Uuid) -> Result<Option<AiResult>>;

    async fn list_ai_results(&self, job_id: Uuid) -> Result<Vec<AiResult>>;

    // ── Settings ───────────────────────────────────────────────────────────

    async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>>;

    async fn put_setting(&self, key: &str, value: &serde_json::Value) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> Document {
        Document {
            id: Uuid::new_v4(),
            upstream_id: 42,
            title: "Quarterly report".to_string(),
            created_at: Utc::now(),
            modified_at: Utc::now(),
            correspondent: Some("ACME".to_string()),
            document_type: None,
            tags: vec!["finance".to_string()],
            original_filename: Some("report.pdf".to_string()),
            archive_filename: None,
            file_size: Some(2048),
            archive_serial_number: None,
            content_fingerprint: "abc".to_string(),
            orphaned: false,
            last_synced_at: Utc::now(),
        }
    }

    #[test]
    fn test_metadata_completeness() {
        let mut doc = sample_document();
        assert_eq!(doc.metadata_completeness(), 3); // title, correspondent, tags

        doc.document_type = Some("invoice".to_string());
        assert_eq!(doc.metadata_completeness(), 4);

        doc.title = "  ".to_string();
        doc.tags.clear();
        assert_eq!(doc.metadata_completeness(), 2);
    }

    #[test]
    fn test_run_status_roundtrip() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(RunStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(RunStatus::from_str("bogus").is_err());
    }

    #[test]
    fn test_batch_kind_roundtrip() {
        for kind in [
            BatchKind::Delete,
            BatchKind::Tag,
            BatchKind::Untag,
            BatchKind::UpdateMetadata,
            BatchKind::ResolveDuplicates,
            BatchKind::MarkReviewed,
        ] {
            assert_eq!(BatchKind::from_str(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn test_batch_final_status() {
        let mut op = BatchOperation::new(BatchKind::Delete, 10, serde_json::Value::Null);

        op.processed = 10;
        assert_eq!(op.final_status(false), BatchStatus::Completed);

        op.processed = 7;
        op.failed = 3;
        assert_eq!(op.final_status(false), BatchStatus::PartiallyCompleted);

        op.processed = 0;
        op.failed = 10;
        assert_eq!(op.final_status(false), BatchStatus::Failed);

        assert_eq!(op.final_status(true), BatchStatus::Cancelled);
    }

    #[test]
    fn test_field_decision_serde() {
        let decision: FieldDecision<String> = FieldDecision::Edit {
            value: "Corrected title".to_string(),
        };
        let json = serde_json::to_string(&decision).unwrap();
        assert!(json.contains("edit"));

        let back: FieldDecision<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, decision);

        let accept: FieldDecision<String> =
            serde_json::from_str(r#"{"decision":"accept"}"#).unwrap();
        assert_eq!(accept, FieldDecision::Accept);
    }

    #[test]
    fn test_suggestion_serde_roundtrip() {
        let suggestion = MetadataSuggestion {
            title: Some(FieldSuggestion {
                value: "Electricity invoice".to_string(),
                confidence: 0.93,
            }),
            created_date: Some(FieldSuggestion {
                value: NaiveDate::from_ymd_opt(2024, 3, 14).unwrap(),
                confidence: 0.8,
            }),
            ..Default::default()
        };
        let json = serde_json::to_string(&suggestion).unwrap();
        let back: MetadataSuggestion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, suggestion);
    }

    #[test]
    fn test_group_non_primary_members() {
        let primary = Uuid::new_v4();
        let other = Uuid::new_v4();
        let sim = MemberSimilarity {
            overall: 0.9,
            jaccard: 0.9,
            fuzzy: 0.9,
            metadata: 0.9,
        };
        let group = GroupWithMembers {
            group: DuplicateGroup {
                id: "k".to_string(),
                confidence_score: 0.9,
                confidence_breakdown: ConfidenceBreakdown::default(),
                reviewed: false,
                resolved: false,
                primary_document_id: primary,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            members: vec![
                DuplicateMember {
                    group_id: "k".to_string(),
                    document_id: primary,
                    is_primary: true,
                    similarity_to_primary: sim,
                },
                DuplicateMember {
                    group_id: "k".to_string(),
                    document_id: other,
                    is_primary: false,
                    similarity_to_primary: sim,
                },
            ],
        };
        let non_primary: Vec<_> = group.non_primary_members().collect();
        assert_eq!(non_primary.len(), 1);
        assert_eq!(non_primary[0].document_id, other);
    }
}

//! Batch orchestrator: long-running, cancellable bulk operations.
//!
//! Each submitted operation gets one worker task; at most
//! `MAX_CONCURRENT_OPERATIONS` workers run at a time, the rest queue on the
//! semaphore. Items are applied independently with per-item failure
//! accounting; the terminal status is `completed`, `failed`, or
//! `partially_completed`. Progress events are throttled to once per second
//! or per 1% progress. Cancellation is cooperative between items; in-flight
//! upstream calls are never interrupted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use dedupe_storage::{BatchKind, BatchOperation, BatchStatus, DedupeStore, ErrorKind};

use crate::error::{EngineError, Result};
use crate::events::{BatchProgress, EventBody, EventBus};
use crate::upstream::{DocumentPatch, PaperlessClient};

pub const MAX_CONCURRENT_OPERATIONS: usize = 2;
pub const MAX_OPERATION_ERRORS: usize = 100;

const EMIT_MIN_INTERVAL: Duration = Duration::from_secs(1);

/// A typed batch request. The serialized form is stored as the operation's
/// `parameters`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchCommand {
    Delete {
        document_ids: Vec<Uuid>,
    },
    Tag {
        document_ids: Vec<Uuid>,
        tags: Vec<String>,
    },
    Untag {
        document_ids: Vec<Uuid>,
        tags: Vec<String>,
    },
    UpdateMetadata {
        document_ids: Vec<Uuid>,
        patch: DocumentPatch,
    },
    ResolveDuplicates {
        group_ids: Vec<String>,
        mark_reviewed: bool,
    },
    MarkReviewed {
        group_ids: Vec<String>,
    },
}

impl BatchCommand {
    pub fn kind(&self) -> BatchKind {
        match self {
            BatchCommand::Delete { .. } => BatchKind::Delete,
            BatchCommand::Tag { .. } => BatchKind::Tag,
            BatchCommand::Untag { .. } => BatchKind::Untag,
            BatchCommand::UpdateMetadata { .. } => BatchKind::UpdateMetadata,
            BatchCommand::ResolveDuplicates { .. } => BatchKind::ResolveDuplicates,
            BatchCommand::MarkReviewed { .. } => BatchKind::MarkReviewed,
        }
    }

    pub fn total_items(&self) -> u64 {
        match self {
            BatchCommand::Delete { document_ids }
            | BatchCommand::Tag { document_ids, .. }
            | BatchCommand::Untag { document_ids, .. }
            | BatchCommand::UpdateMetadata { document_ids, .. } => document_ids.len() as u64,
            BatchCommand::ResolveDuplicates { group_ids, .. }
            | BatchCommand::MarkReviewed { group_ids } => group_ids.len() as u64,
        }
    }
}

enum Target {
    Document(Uuid),
    Group(String),
}

fn targets(command: &BatchCommand) -> Vec<Target> {
    match command {
        BatchCommand::Delete { document_ids }
        | BatchCommand::Tag { document_ids, .. }
        | BatchCommand::Untag { document_ids, .. }
        | BatchCommand::UpdateMetadata { document_ids, .. } => {
            document_ids.iter().copied().map(Target::Document).collect()
        }
        BatchCommand::ResolveDuplicates { group_ids, .. }
        | BatchCommand::MarkReviewed { group_ids } => {
            group_ids.iter().cloned().map(Target::Group).collect()
        }
    }
}

/// Emit at most once per `EMIT_MIN_INTERVAL` or per 1% progress.
struct ProgressThrottle {
    last_emit: Instant,
    last_done: u64,
    total: u64,
}

impl ProgressThrottle {
    fn new(total: u64) -> Self {
        Self {
            last_emit: Instant::now(),
            last_done: 0,
            total,
        }
    }

    fn should_emit(&mut self, done: u64) -> bool {
        let one_percent = (self.total / 100).max(1);
        if self.last_emit.elapsed() >= EMIT_MIN_INTERVAL || done - self.last_done >= one_percent {
            self.last_emit = Instant::now();
            self.last_done = done;
            true
        } else {
            false
        }
    }
}

pub struct BatchOrchestrator {
    store: Arc<dyn DedupeStore>,
    client: Arc<dyn PaperlessClient>,
    bus: Arc<EventBus>,
    permits: Arc<Semaphore>,
    live: Arc<DashMap<Uuid, CancellationToken>>,
    handles: DashMap<Uuid, JoinHandle<()>>,
}

impl BatchOrchestrator {
    pub fn new(
        store: Arc<dyn DedupeStore>,
        client: Arc<dyn PaperlessClient>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            client,
            bus,
            permits: Arc::new(Semaphore::new(MAX_CONCURRENT_OPERATIONS)),
            live: Arc::new(DashMap::new()),
            handles: DashMap::new(),
        }
    }

    /// Enqueue an operation and return its id. The worker runs
    /// asynchronously; watch `batch_update`/`batch_completed` events or poll
    /// the store for progress.
    pub async fn submit(&self, command: BatchCommand) -> Result<Uuid> {
        let operation = BatchOperation::new(
            command.kind(),
            command.total_items(),
            serde_json::to_value(&command).map_err(|e| EngineError::Internal(e.into()))?,
        );
        let id = operation.id;
        self.store.create_operation(&operation).await?;

        let token = CancellationToken::new();
        self.live.insert(id, token.clone());

        let worker = BatchWorker {
            store: self.store.clone(),
            client: self.client.clone(),
            bus: self.bus.clone(),
        };
        let permits = self.permits.clone();
        let live = self.live.clone();
        let handle = tokio::spawn(async move {
            let _permit = match permits.acquire().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            worker.run(operation, command, token).await;
            live.remove(&id);
        });
        self.handles.insert(id, handle);
        Ok(id)
    }

    /// Request cooperative cancellation. The worker stops between items.
    pub fn cancel(&self, id: Uuid) -> Result<()> {
        match self.live.get(&id) {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(EngineError::not_found(format!("batch operation {id}"))),
        }
    }

    /// Await a worker's completion (test and shutdown aid).
    pub async fn join(&self, id: Uuid) -> Result<()> {
        if let Some((_, handle)) = self.handles.remove(&id) {
            handle
                .await
                .map_err(|e| EngineError::Internal(anyhow::anyhow!("worker panicked: {e}")))?;
        }
        Ok(())
    }
}

struct BatchWorker {
    store: Arc<dyn DedupeStore>,
    client: Arc<dyn PaperlessClient>,
    bus: Arc<EventBus>,
}

impl BatchWorker {
    async fn run(&self, mut operation: BatchOperation, command: BatchCommand, token: CancellationToken) {
        operation.status = BatchStatus::InProgress;
        if let Err(err) = self.store.update_operation(&operation).await {
            warn!("batch {}: cannot mark in_progress: {err}", operation.id);
        }
        self.emit_update(&operation);
        info!(
            "batch {}: {} over {} items",
            operation.id,
            operation.kind.as_str(),
            operation.total_items
        );

        let items = targets(&command);
        let mut throttle = ProgressThrottle::new(operation.total_items);
        let mut cancelled = false;

        for target in items {
            if token.is_cancelled() {
                cancelled = true;
                break;
            }
            match self.apply(&command, &target).await {
                Ok(()) => operation.processed += 1,
                Err(err) => {
                    operation.failed += 1;
                    if operation.errors.len() < MAX_OPERATION_ERRORS {
                        operation.errors.push(match &target {
                            Target::Document(id) => format!("document {id}: {err}"),
                            Target::Group(id) => format!("group {id}: {err}"),
                        });
                    }
                }
            }
            let done = operation.processed + operation.failed;
            if throttle.should_emit(done) {
                if let Err(err) = self.store.update_operation(&operation).await {
                    warn!("batch {}: progress write failed: {err}", operation.id);
                }
                self.emit_update(&operation);
            }
        }

        operation.status = operation.final_status(cancelled);
        operation.completed_at = Some(chrono::Utc::now());
        if let Err(err) = self.store.update_operation(&operation).await {
            warn!("batch {}: final write failed: {err}", operation.id);
        }
        info!(
            "batch {}: {} ({} ok, {} failed)",
            operation.id,
            operation.status.as_str(),
            operation.processed,
            operation.failed
        );
        self.bus
            .publish(EventBody::BatchCompleted(progress_of(&operation)));
    }

    fn emit_update(&self, operation: &BatchOperation) {
        self.bus
            .publish(EventBody::BatchUpdate(progress_of(operation)));
    }

    async fn apply(&self, command: &BatchCommand, target: &Target) -> Result<()> {
        match (command, target) {
            (BatchCommand::Delete { .. }, Target::Document(id)) => self.delete_document(*id).await,
            (BatchCommand::Tag { tags, .. }, Target::Document(id)) => {
                self.retag_document(*id, tags, &[]).await
            }
            (BatchCommand::Untag { tags, .. }, Target::Document(id)) => {
                self.retag_document(*id, &[], tags).await
            }
            (BatchCommand::UpdateMetadata { patch, .. }, Target::Document(id)) => {
                self.update_metadata(*id, patch).await
            }
            (
                BatchCommand::ResolveDuplicates { mark_reviewed, .. },
                Target::Group(group_id),
            ) => self.resolve_group(group_id, *mark_reviewed).await,
            (BatchCommand::MarkReviewed { .. }, Target::Group(group_id)) => {
                Ok(self.store.mark_reviewed(group_id, true).await?)
            }
            _ => Err(EngineError::Internal(anyhow::anyhow!(
                "target does not match operation kind"
            ))),
        }
    }

    async fn delete_document(&self, id: Uuid) -> Result<()> {
        let document = self.store.get_document(id).await?;
        self.client.delete_document(document.upstream_id).await?;
        self.store.delete_document(id).await?;
        Ok(())
    }

    async fn retag_document(&self, id: Uuid, add: &[String], remove: &[String]) -> Result<()> {
        let mut document = self.store.get_document(id).await?;
        let patch = DocumentPatch {
            add_tags: add.to_vec(),
            remove_tags: remove.to_vec(),
            ..Default::default()
        };
        self.client
            .update_document(document.upstream_id, &patch)
            .await?;

        for tag in add {
            if !document.tags.contains(tag) {
                document.tags.push(tag.clone());
            }
        }
        document.tags.retain(|tag| !remove.contains(tag));
        self.store.upsert_document(&document).await?;
        Ok(())
    }

    async fn update_metadata(&self, id: Uuid, patch: &DocumentPatch) -> Result<()> {
        let mut document = self.store.get_document(id).await?;
        self.client
            .update_document(document.upstream_id, patch)
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
        self.store.upsert_document(&document).await?;
        Ok(())
    }

    /// Resolve one group: keep the primary, delete every other member
    /// upstream, then locally. Any non-primary failure leaves the group in
    /// place (minus the members already removed) and fails the item.
    async fn resolve_group(&self, group_id: &str, mark_reviewed: bool) -> Result<()> {
        let group = self.store.get_group(group_id).await?;

        // The primary must still exist locally before anything is deleted.
        let primary = group
            .members
            .iter()
            .find(|member| member.is_primary)
            .ok_or_else(|| EngineError::conflict(format!("group {group_id} has no primary")))?;
        self.store.get_document(primary.document_id).await?;

        let mut first_error: Option<EngineError> = None;
        for member in group.non_primary_members() {
            let document = match self.store.get_document(member.document_id).await {
                Ok(document) => document,
                Err(err) => {
                    first_error.get_or_insert(err.into());
                    continue;
                }
            };
            match self.client.delete_document(document.upstream_id).await {
                Ok(()) => {
                    // Local delete cascades membership; the group collapses
                    // on its own once fewer than two members remain.
                    self.store.delete_document(member.document_id).await?;
                }
                Err(err) => {
                    warn!(
                        "batch resolve {group_id}: keeping document {} ({err})",
                        document.upstream_id
                    );
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            None => {
                // All non-primaries gone. The collapse path usually removed
                // the group already; delete explicitly in case it survived.
                match self.store.delete_group(group_id).await {
                    Ok(()) => {}
                    Err(err) if err.kind == ErrorKind::GroupNotFound => {}
                    Err(err) => return Err(err.into()),
                }
                Ok(())
            }
            Some(err) => {
                if mark_reviewed {
                    // The survivors were looked at even though resolution
                    // failed; flip the flag if the group still exists.
                    if let Err(mark_err) = self.store.mark_reviewed(group_id, true).await {
                        warn!("batch resolve {group_id}: mark_reviewed failed: {mark_err}");
                    }
                }
                Err(err)
            }
        }
    }
}

fn progress_of(operation: &BatchOperation) -> BatchProgress {
    BatchProgress {
        operation_id: operation.id,
        kind: operation.kind,
        status: operation.status,
        total_items: operation.total_items,
        processed: operation.processed,
        failed: operation.failed,
    }
}

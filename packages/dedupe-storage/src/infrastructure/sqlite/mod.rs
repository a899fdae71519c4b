//! SQLite adapter for `DedupeStore`.
//!
//! Single connection behind a mutex: SQLite serializes writers anyway, and
//! the mutex doubles as the group-write lock that keeps the analysis
//! coordinator's snapshot replace and the batch orchestrator's single-group
//! updates from interleaving. WAL mode keeps concurrent readers cheap for
//! on-disk databases.

mod schema;

use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};
use uuid::Uuid;

use dedupe_core::minhash::{MinHashParams, Signature};

use crate::domain::{
    AiJob, AiJobStatus, AiResult, AnalysisRun, BatchKind, BatchOperation, BatchStatus,
    DedupeStore, Document, DocumentContent, DuplicateGroup, DuplicateMember, GroupFilter,
    GroupSnapshotEntry, GroupWithMembers, RunStatus, StoredSignature,
};
use crate::error::{Result, StorageError};

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) an on-disk database.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        // PRAGMA journal_mode returns a row, so query it instead of execute.
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        Self::init(conn)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        schema::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

// ── Row mapping ────────────────────────────────────────────────────────────

const DOC_COLUMNS: &str = "id, upstream_id, title, created_at, modified_at, correspondent, \
     document_type, tags, original_filename, archive_filename, file_size, \
     archive_serial_number, content_fingerprint, orphaned, last_synced_at";

/// Wrap a conversion error so it can flow through rusqlite row mappers.
fn conv<T, E>(r: std::result::Result<T, E>) -> rusqlite::Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    r.map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    let id: String = row.get(0)?;
    let tags: String = row.get(7)?;
    let file_size: Option<i64> = row.get(10)?;
    Ok(Document {
        id: conv(Uuid::parse_str(&id))?,
        upstream_id: row.get(1)?,
        title: row.get(2)?,
        created_at: row.get(3)?,
        modified_at: row.get(4)?,
        correspondent: row.get(5)?,
        document_type: row.get(6)?,
        tags: conv(serde_json::from_str(&tags))?,
        original_filename: row.get(8)?,
        archive_filename: row.get(9)?,
        file_size: file_size.map(|v| v as u64),
        archive_serial_number: row.get(11)?,
        content_fingerprint: row.get(12)?,
        orphaned: row.get(13)?,
        last_synced_at: row.get(14)?,
    })
}

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<DuplicateGroup> {
    let breakdown: String = row.get(2)?;
    let primary: String = row.get(5)?;
    Ok(DuplicateGroup {
        id: row.get(0)?,
        confidence_score: row.get(1)?,
        confidence_breakdown: conv(serde_json::from_str(&breakdown))?,
        reviewed: row.get(3)?,
        resolved: row.get(4)?,
        primary_document_id: conv(Uuid::parse_str(&primary))?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

const GROUP_COLUMNS: &str = "id, confidence_score, confidence_breakdown, reviewed, resolved, \
     primary_document_id, created_at, updated_at";

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<DuplicateMember> {
    let document_id: String = row.get(1)?;
    let similarity: String = row.get(3)?;
    Ok(DuplicateMember {
        group_id: row.get(0)?,
        document_id: conv(Uuid::parse_str(&document_id))?,
        is_primary: row.get(2)?,
        similarity_to_primary: conv(serde_json::from_str(&similarity))?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<AnalysisRun> {
    let id: String = row.get(0)?;
    let status: String = row.get(1)?;
    let parameters: String = row.get(8)?;
    let fingerprint: i64 = row.get(9)?;
    Ok(AnalysisRun {
        id: conv(Uuid::parse_str(&id))?,
        status: conv(RunStatus::from_str(&status))?,
        created_at: row.get(2)?,
        started_at: row.get(3)?,
        completed_at: row.get(4)?,
        documents_processed: row.get::<_, i64>(5)? as u64,
        groups_found: row.get::<_, i64>(6)? as u64,
        error: row.get(7)?,
        parameters: conv(serde_json::from_str(&parameters))?,
        weights_fingerprint: fingerprint as u64,
    })
}

fn operation_from_row(row: &Row<'_>) -> rusqlite::Result<BatchOperation> {
    let id: String = row.get(0)?;
    let kind: String = row.get(1)?;
    let status: String = row.get(2)?;
    let errors: String = row.get(6)?;
    let parameters: String = row.get(9)?;
    Ok(BatchOperation {
        id: conv(Uuid::parse_str(&id))?,
        kind: conv(BatchKind::from_str(&kind))?,
        status: conv(BatchStatus::from_str(&status))?,
        total_items: row.get::<_, i64>(3)? as u64,
        processed: row.get::<_, i64>(4)? as u64,
        failed: row.get::<_, i64>(5)? as u64,
        errors: conv(serde_json::from_str(&errors))?,
        created_at: row.get(7)?,
        completed_at: row.get(8)?,
        parameters: conv(serde_json::from_str(&parameters))?,
    })
}

fn ai_job_from_row(row: &Row<'_>) -> rusqlite::Result<AiJob> {
    let id: String = row.get(0)?;
    let status: String = row.get(1)?;
    Ok(AiJob {
        id: conv(Uuid::parse_str(&id))?,
        status: conv(AiJobStatus::from_str(&status))?,
        total: row.get::<_, i64>(2)? as u64,
        processed: row.get::<_, i64>(3)? as u64,
        failed: row.get::<_, i64>(4)? as u64,
        error: row.get(5)?,
        created_at: row.get(6)?,
        completed_at: row.get(7)?,
    })
}

fn ai_result_from_row(row: &Row<'_>) -> rusqlite::Result<AiResult> {
    let job_id: String = row.get(0)?;
    let document_id: String = row.get(1)?;
    let suggestion: String = row.get(2)?;
    let decisions: String = row.get(3)?;
    Ok(AiResult {
        job_id: conv(Uuid::parse_str(&job_id))?,
        document_id: conv(Uuid::parse_str(&document_id))?,
        suggestion: conv(serde_json::from_str(&suggestion))?,
        decisions: conv(serde_json::from_str(&decisions))?,
        applied: row.get(4)?,
    })
}

fn load_members(conn: &Connection, group_id: &str) -> Result<Vec<DuplicateMember>> {
    let mut stmt = conn.prepare(
        "SELECT group_id, document_id, is_primary, similarity_to_primary \
         FROM duplicate_members WHERE group_id = ?1 ORDER BY document_id",
    )?;
    let members = stmt
        .query_map([group_id], member_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(members)
}

/// Delete a group when it has fewer than two members; promote a new primary
/// when the old one is gone. Returns true when the group was deleted.
fn collapse_group_if_needed(conn: &Connection, group_id: &str) -> Result<bool> {
    let members = load_members(conn, group_id)?;
    if members.len() < 2 {
        conn.execute("DELETE FROM duplicate_groups WHERE id = ?1", [group_id])?;
        debug!("group {group_id} collapsed below two members, deleted");
        return Ok(true);
    }

    if !members.iter().any(|m| m.is_primary) {
        // Old primary was removed: promote the closest remaining member.
        let promoted = members
            .iter()
            .max_by(|a, b| {
                a.similarity_to_primary
                    .overall
                    .total_cmp(&b.similarity_to_primary.overall)
            })
            .expect("members is non-empty");
        conn.execute(
            "UPDATE duplicate_members SET is_primary = 1 \
             WHERE group_id = ?1 AND document_id = ?2",
            params![group_id, promoted.document_id.to_string()],
        )?;
        conn.execute(
            "UPDATE duplicate_groups SET primary_document_id = ?1, updated_at = ?2 \
             WHERE id = ?3",
            params![promoted.document_id.to_string(), Utc::now(), group_id],
        )?;
        debug!(
            "group {group_id} lost its primary, promoted {}",
            promoted.document_id
        );
    }
    Ok(false)
}

// ── Trait implementation ───────────────────────────────────────────────────

#[async_trait]
impl DedupeStore for SqliteStore {
    async fn upsert_document(&self, document: &Document) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO documents (id, upstream_id, title, created_at, modified_at, \
                 correspondent, document_type, tags, original_filename, archive_filename, \
                 file_size, archive_serial_number, content_fingerprint, orphaned, last_synced_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 0, ?14) \
             ON CONFLICT(upstream_id) DO UPDATE SET \
                 title = excluded.title, \
                 created_at = excluded.created_at, \
                 modified_at = excluded.modified_at, \
                 correspondent = excluded.correspondent, \
                 document_type = excluded.document_type, \
                 tags = excluded.tags, \
                 original_filename = excluded.original_filename, \
                 archive_filename = excluded.archive_filename, \
                 file_size = excluded.file_size, \
                 archive_serial_number = excluded.archive_serial_number, \
                 content_fingerprint = excluded.content_fingerprint, \
                 orphaned = 0, \
                 last_synced_at = excluded.last_synced_at",
            params![
                document.id.to_string(),
                document.upstream_id,
                document.title,
                document.created_at,
                document.modified_at,
                document.correspondent,
                document.document_type,
                serde_json::to_string(&document.tags)?,
                document.original_filename,
                document.archive_filename,
                document.file_size.map(|v| v as i64),
                document.archive_serial_number,
                document.content_fingerprint,
                document.last_synced_at,
            ],
        )?;
        Ok(())
    }

    async fn get_document(&self, id: Uuid) -> Result<Document> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {DOC_COLUMNS} FROM documents WHERE id = ?1"),
            [id.to_string()],
            document_from_row,
        )
        .optional()?
        .ok_or_else(|| StorageError::document_not_found(id))
    }

    async fn get_document_by_upstream_id(&self, upstream_id: i64) -> Result<Option<Document>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                &format!("SELECT {DOC_COLUMNS} FROM documents WHERE upstream_id = ?1"),
                [upstream_id],
                document_from_row,
            )
            .optional()?)
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare(&format!("SELECT {DOC_COLUMNS} FROM documents ORDER BY upstream_id"))?;
        let docs = stmt
            .query_map([], document_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(docs)
    }

    async fn list_eligible_documents(&self, min_words: usize) -> Result<Vec<Document>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {DOC_COLUMNS} FROM documents d \
             JOIN document_content c ON c.document_id = d.id \
             WHERE d.orphaned = 0 AND c.word_count >= ?1 \
             ORDER BY d.upstream_id"
        ))?;
        let docs = stmt
            .query_map([min_words as i64], document_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(docs)
    }

    async fn mark_orphaned_except(&self, seen_upstream_ids: &[i64]) -> Result<u64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "CREATE TEMP TABLE IF NOT EXISTS seen_upstream (id INTEGER PRIMARY KEY)",
            [],
        )?;
        tx.execute("DELETE FROM seen_upstream", [])?;
        {
            let mut insert = tx.prepare("INSERT OR IGNORE INTO seen_upstream (id) VALUES (?1)")?;
            for id in seen_upstream_ids {
                insert.execute([id])?;
            }
        }
        let changed = tx.execute(
            "UPDATE documents SET orphaned = 1 \
             WHERE orphaned = 0 AND upstream_id NOT IN (SELECT id FROM seen_upstream)",
            [],
        )?;
        tx.execute("DELETE FROM seen_upstream", [])?;
        tx.commit()?;
        Ok(changed as u64)
    }

    async fn delete_document(&self, id: Uuid) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let affected_groups: Vec<String> = {
            let mut stmt =
                tx.prepare("SELECT group_id FROM duplicate_members WHERE document_id = ?1")?;
            let rows = stmt
                .query_map([id.to_string()], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let deleted = tx.execute("DELETE FROM documents WHERE id = ?1", [id.to_string()])?;
        if deleted == 0 {
            return Err(StorageError::document_not_found(id));
        }
        // Content, signature, and memberships cascade via foreign keys;
        // groups that dropped below two members collapse here.
        for group_id in &affected_groups {
            collapse_group_if_needed(&tx, group_id)?;
        }

        tx.commit()?;
        Ok(())
    }

    async fn replace_content(&self, content: &DocumentContent) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO document_content \
                 (document_id, full_text, word_count, normalized_text, shingle_count) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                content.document_id.to_string(),
                content.full_text,
                content.word_count as i64,
                content.normalized_text,
                content.shingle_count as i64,
            ],
        )?;
        Ok(())
    }

    async fn get_content(&self, document_id: Uuid) -> Result<Option<DocumentContent>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT document_id, full_text, word_count, normalized_text, shingle_count \
                 FROM document_content WHERE document_id = ?1",
                [document_id.to_string()],
                |row| {
                    let id: String = row.get(0)?;
                    Ok(DocumentContent {
                        document_id: conv(Uuid::parse_str(&id))?,
                        full_text: row.get(1)?,
                        word_count: row.get::<_, i64>(2)? as usize,
                        normalized_text: row.get(3)?,
                        shingle_count: row.get::<_, i64>(4)? as usize,
                    })
                },
            )
            .optional()?)
    }

    async fn replace_signature(&self, signature: &StoredSignature) -> Result<()> {
        let conn = self.conn.lock();
        let blob = bincode::serialize(&signature.signature.values)?;
        let params_ref = &signature.signature.params;
        conn.execute(
            "INSERT OR REPLACE INTO signatures \
                 (document_id, permutations, num_hashes, seed, shingle_size) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                signature.document_id.to_string(),
                blob,
                params_ref.num_hashes as i64,
                params_ref.seed as i64,
                params_ref.shingle_size as i64,
            ],
        )?;
        Ok(())
    }

    async fn get_signature(&self, document_id: Uuid) -> Result<Option<StoredSignature>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT permutations, num_hashes, seed, shingle_size \
                 FROM signatures WHERE document_id = ?1",
                [document_id.to_string()],
                |row| {
                    let blob: Vec<u8> = row.get(0)?;
                    let num_hashes: i64 = row.get(1)?;
                    let seed: i64 = row.get(2)?;
                    let shingle_size: i64 = row.get(3)?;
                    Ok((blob, num_hashes, seed, shingle_size))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((blob, num_hashes, seed, shingle_size)) => {
                let values: Vec<u64> = bincode::deserialize(&blob)?;
                Ok(Some(StoredSignature {
                    document_id,
                    signature: Signature {
                        values,
                        params: MinHashParams {
                            num_hashes: num_hashes as usize,
                            seed: seed as u64,
                            shingle_size: shingle_size as usize,
                        },
                    },
                }))
            }
        }
    }

    async fn replace_group_snapshot(
        &self,
        run_id: Uuid,
        groups: &[GroupSnapshotEntry],
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = Utc::now();

        // Review state survives for groups whose identity is unchanged.
        let existing: HashMap<String, (bool, bool)> = {
            let mut stmt = tx.prepare("SELECT id, reviewed, resolved FROM duplicate_groups")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, (row.get(1)?, row.get(2)?)))
                })?
                .collect::<rusqlite::Result<HashMap<_, _>>>()?;
            rows
        };

        let new_keys: HashSet<&str> = groups.iter().map(|g| g.key.as_str()).collect();
        let mut retired = 0usize;
        for key in existing.keys() {
            if !new_keys.contains(key.as_str()) {
                tx.execute("DELETE FROM duplicate_groups WHERE id = ?1", [key])?;
                retired += 1;
            }
        }

        for entry in groups {
            let breakdown = serde_json::to_string(&entry.confidence_breakdown)?;
            if existing.contains_key(&entry.key) {
                tx.execute(
                    "UPDATE duplicate_groups SET confidence_score = ?1, \
                         confidence_breakdown = ?2, primary_document_id = ?3, updated_at = ?4 \
                     WHERE id = ?5",
                    params![
                        entry.confidence_score,
                        breakdown,
                        entry.primary_document_id.to_string(),
                        now,
                        entry.key,
                    ],
                )?;
                // Same key means the same member set, but the similarity
                // figures may have moved with the weights.
                tx.execute(
                    "DELETE FROM duplicate_members WHERE group_id = ?1",
                    [&entry.key],
                )?;
            } else {
                tx.execute(
                    "INSERT INTO duplicate_groups (id, confidence_score, confidence_breakdown, \
                         reviewed, resolved, primary_document_id, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, 0, 0, ?4, ?5, ?5)",
                    params![
                        entry.key,
                        entry.confidence_score,
                        breakdown,
                        entry.primary_document_id.to_string(),
                        now,
                    ],
                )?;
            }

            let mut insert = tx.prepare_cached(
                "INSERT INTO duplicate_members \
                     (group_id, document_id, is_primary, similarity_to_primary) \
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for member in &entry.members {
                insert.execute(params![
                    entry.key,
                    member.document_id.to_string(),
                    member.is_primary,
                    serde_json::to_string(&member.similarity_to_primary)?,
                ])?;
            }
        }

        tx.commit()?;
        info!(
            "run {run_id}: snapshot replaced, {} groups ({} retired, {} carried over)",
            groups.len(),
            retired,
            groups.iter().filter(|g| existing.contains_key(&g.key)).count()
        );
        Ok(())
    }

    async fn get_group(&self, id: &str) -> Result<GroupWithMembers> {
        let conn = self.conn.lock();
        let group = conn
            .query_row(
                &format!("SELECT {GROUP_COLUMNS} FROM duplicate_groups WHERE id = ?1"),
                [id],
                group_from_row,
            )
            .optional()?
            .ok_or_else(|| StorageError::group_not_found(id))?;
        let members = load_members(&conn, id)?;
        Ok(GroupWithMembers { group, members })
    }

    async fn list_groups(&self, filter: &GroupFilter) -> Result<Vec<GroupWithMembers>> {
        let conn = self.conn.lock();

        let mut sql = format!("SELECT {GROUP_COLUMNS} FROM duplicate_groups WHERE 1 = 1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(reviewed) = filter.reviewed {
            sql.push_str(" AND reviewed = ?");
            args.push(Box::new(reviewed));
        }
        if let Some(resolved) = filter.resolved {
            sql.push_str(" AND resolved = ?");
            args.push(Box::new(resolved));
        }
        if let Some(min_confidence) = filter.min_confidence {
            sql.push_str(" AND confidence_score >= ?");
            args.push(Box::new(min_confidence));
        }
        sql.push_str(" ORDER BY confidence_score DESC, id");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            args.push(Box::new(limit as i64));
            if let Some(offset) = filter.offset {
                sql.push_str(" OFFSET ?");
                args.push(Box::new(offset as i64));
            }
        }

        let mut stmt = conn.prepare(&sql)?;
        let groups = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                group_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(groups.len());
        for group in groups {
            let members = load_members(&conn, &group.id)?;
            out.push(GroupWithMembers { group, members });
        }
        Ok(out)
    }

    async fn count_groups(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM duplicate_groups", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    async fn mark_reviewed(&self, id: &str, reviewed: bool) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE duplicate_groups SET reviewed = ?1, updated_at = ?2 WHERE id = ?3",
            params![reviewed, Utc::now(), id],
        )?;
        if changed == 0 {
            return Err(StorageError::group_not_found(id));
        }
        Ok(())
    }

    async fn mark_resolved(&self, id: &str, resolved: bool) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE duplicate_groups SET resolved = ?1, updated_at = ?2 WHERE id = ?3",
            params![resolved, Utc::now(), id],
        )?;
        if changed == 0 {
            return Err(StorageError::group_not_found(id));
        }
        Ok(())
    }

    async fn delete_group(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute("DELETE FROM duplicate_groups WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(StorageError::group_not_found(id));
        }
        Ok(())
    }

    async fn create_run(&self, run: &AnalysisRun) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO analysis_runs (id, status, created_at, started_at, completed_at, \
                 documents_processed, groups_found, error, parameters, weights_fingerprint) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                run.id.to_string(),
                run.status.as_str(),
                run.created_at,
                run.started_at,
                run.completed_at,
                run.documents_processed as i64,
                run.groups_found as i64,
                run.error,
                serde_json::to_string(&run.parameters)?,
                run.weights_fingerprint as i64,
            ],
        )?;
        Ok(())
    }

    async fn update_run(&self, run: &AnalysisRun) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE analysis_runs SET status = ?1, started_at = ?2, completed_at = ?3, \
                 documents_processed = ?4, groups_found = ?5, error = ?6 \
             WHERE id = ?7",
            params![
                run.status.as_str(),
                run.started_at,
                run.completed_at,
                run.documents_processed as i64,
                run.groups_found as i64,
                run.error,
                run.id.to_string(),
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::run_not_found(run.id));
        }
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<AnalysisRun> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, status, created_at, started_at, completed_at, documents_processed, \
                 groups_found, error, parameters, weights_fingerprint \
             FROM analysis_runs WHERE id = ?1",
            [id.to_string()],
            run_from_row,
        )
        .optional()?
        .ok_or_else(|| StorageError::run_not_found(id))
    }

    async fn latest_run(&self) -> Result<Option<AnalysisRun>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT id, status, created_at, started_at, completed_at, documents_processed, \
                     groups_found, error, parameters, weights_fingerprint \
                 FROM analysis_runs ORDER BY created_at DESC LIMIT 1",
                [],
                run_from_row,
            )
            .optional()?)
    }

    async fn create_operation(&self, operation: &BatchOperation) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO batch_operations (id, kind, status, total_items, processed, failed, \
                 errors, created_at, completed_at, parameters) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                operation.id.to_string(),
                operation.kind.as_str(),
                operation.status.as_str(),
                operation.total_items as i64,
                operation.processed as i64,
                operation.failed as i64,
                serde_json::to_string(&operation.errors)?,
                operation.created_at,
                operation.completed_at,
                serde_json::to_string(&operation.parameters)?,
            ],
        )?;
        Ok(())
    }

    async fn update_operation(&self, operation: &BatchOperation) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE batch_operations SET status = ?1, processed = ?2, failed = ?3, \
                 errors = ?4, completed_at = ?5 \
             WHERE id = ?6",
            params![
                operation.status.as_str(),
                operation.processed as i64,
                operation.failed as i64,
                serde_json::to_string(&operation.errors)?,
                operation.completed_at,
                operation.id.to_string(),
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::operation_not_found(operation.id));
        }
        Ok(())
    }

    async fn get_operation(&self, id: Uuid) -> Result<BatchOperation> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, kind, status, total_items, processed, failed, errors, created_at, \
                 completed_at, parameters \
             FROM batch_operations WHERE id = ?1",
            [id.to_string()],
            operation_from_row,
        )
        .optional()?
        .ok_or_else(|| StorageError::operation_not_found(id))
    }

    async fn list_operations(&self, limit: usize) -> Result<Vec<BatchOperation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, kind, status, total_items, processed, failed, errors, created_at, \
                 completed_at, parameters \
             FROM batch_operations ORDER BY created_at DESC LIMIT ?1",
        )?;
        let ops = stmt
            .query_map([limit as i64], operation_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ops)
    }

    async fn create_ai_job(&self, job: &AiJob) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO ai_jobs (id, status, total, processed, failed, error, created_at, \
                 completed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                job.id.to_string(),
                job.status.as_str(),
                job.total as i64,
                job.processed as i64,
                job.failed as i64,
                job.error,
                job.created_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    }

    async fn update_ai_job(&self, job: &AiJob) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE ai_jobs SET status = ?1, processed = ?2, failed = ?3, error = ?4, \
                 completed_at = ?5 \
             WHERE id = ?6",
            params![
                job.status.as_str(),
                job.processed as i64,
                job.failed as i64,
                job.error,
                job.completed_at,
                job.id.to_string(),
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::job_not_found(job.id));
        }
        Ok(())
    }

    async fn get_ai_job(&self, id: Uuid) -> Result<AiJob> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, status, total, processed, failed, error, created_at, completed_at \
             FROM ai_jobs WHERE id = ?1",
            [id.to_string()],
            ai_job_from_row,
        )
        .optional()?
        .ok_or_else(|| StorageError::job_not_found(id))
    }

    async fn put_ai_result(&self, result: &AiResult) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO ai_results (job_id, document_id, suggestion, decisions, \
                 applied) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                result.job_id.to_string(),
                result.document_id.to_string(),
                serde_json::to_string(&result.suggestion)?,
                serde_json::to_string(&result.decisions)?,
                result.applied,
            ],
        )?;
        Ok(())
    }

    async fn get_ai_result(&self, job_id: Uuid, document_id: Uuid) -> Result<Option<AiResult>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT job_id, document_id, suggestion, decisions, applied \
                 FROM ai_results WHERE job_id = ?1 AND document_id = ?2",
                params![job_id.to_string(), document_id.to_string()],
                ai_result_from_row,
            )
            .optional()?)
    }

    async fn list_ai_results(&self, job_id: Uuid) -> Result<Vec<AiResult>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT job_id, document_id, suggestion, decisions, applied \
             FROM ai_results WHERE job_id = ?1 ORDER BY document_id",
        )?;
        let results = stmt
            .query_map([job_id.to_string()], ai_result_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(results)
    }

    async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn.lock();
        let value: Option<String> = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        match value {
            None => Ok(None),
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        }
    }

    async fn put_setting(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, serde_json::to_string(value)?],
        )?;
        Ok(())
    }
}

//! Schema and forward-only migrations.
//!
//! Each entry in `MIGRATIONS` is one schema version, applied in order inside
//! its own transaction. Existing entries are frozen; schema changes append a
//! new entry.

use rusqlite::Connection;

use crate::error::Result;

pub const MIGRATIONS: &[&str] = &[
    // v1: initial schema
    r#"
    CREATE TABLE documents (
        id                    TEXT PRIMARY KEY,
        upstream_id           INTEGER NOT NULL UNIQUE,
        title                 TEXT NOT NULL,
        created_at            TEXT NOT NULL,
        modified_at           TEXT NOT NULL,
        correspondent         TEXT,
        document_type         TEXT,
        tags                  TEXT NOT NULL,
        original_filename     TEXT,
        archive_filename      TEXT,
        file_size             INTEGER,
        archive_serial_number INTEGER,
        content_fingerprint   TEXT NOT NULL,
        orphaned              INTEGER NOT NULL DEFAULT 0,
        last_synced_at        TEXT NOT NULL
    );
    CREATE INDEX idx_documents_upstream_id ON documents(upstream_id);

    CREATE TABLE document_content (
        document_id     TEXT PRIMARY KEY REFERENCES documents(id) ON DELETE CASCADE,
        full_text       TEXT NOT NULL,
        word_count      INTEGER NOT NULL,
        normalized_text TEXT NOT NULL,
        shingle_count   INTEGER NOT NULL
    );

    CREATE TABLE signatures (
        document_id  TEXT PRIMARY KEY REFERENCES documents(id) ON DELETE CASCADE,
        permutations BLOB NOT NULL,
        num_hashes   INTEGER NOT NULL,
        seed         INTEGER NOT NULL,
        shingle_size INTEGER NOT NULL
    );

    CREATE TABLE duplicate_groups (
        id                   TEXT PRIMARY KEY,
        confidence_score     REAL NOT NULL,
        confidence_breakdown TEXT NOT NULL,
        reviewed             INTEGER NOT NULL DEFAULT 0,
        resolved             INTEGER NOT NULL DEFAULT 0,
        primary_document_id  TEXT NOT NULL,
        created_at           TEXT NOT NULL,
        updated_at           TEXT NOT NULL
    );

    CREATE TABLE duplicate_members (
        group_id              TEXT NOT NULL REFERENCES duplicate_groups(id) ON DELETE CASCADE,
        document_id           TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
        is_primary            INTEGER NOT NULL DEFAULT 0,
        similarity_to_primary TEXT NOT NULL,
        PRIMARY KEY (group_id, document_id)
    );
    CREATE INDEX idx_members_document_id ON duplicate_members(document_id);

    CREATE TABLE analysis_runs (
        id                  TEXT PRIMARY KEY,
        status              TEXT NOT NULL,
        created_at          TEXT NOT NULL,
        started_at          TEXT,
        completed_at        TEXT,
        documents_processed INTEGER NOT NULL DEFAULT 0,
        groups_found        INTEGER NOT NULL DEFAULT 0,
        error               TEXT,
        parameters          TEXT NOT NULL,
        weights_fingerprint INTEGER NOT NULL
    );

    CREATE TABLE batch_operations (
        id           TEXT PRIMARY KEY,
        kind         TEXT NOT NULL,
        status       TEXT NOT NULL,
        total_items  INTEGER NOT NULL,
        processed    INTEGER NOT NULL DEFAULT 0,
        failed       INTEGER NOT NULL DEFAULT 0,
        errors       TEXT NOT NULL,
        created_at   TEXT NOT NULL,
        completed_at TEXT,
        parameters   TEXT NOT NULL
    );

    CREATE TABLE ai_jobs (
        id           TEXT PRIMARY KEY,
        status       TEXT NOT NULL,
        total        INTEGER NOT NULL,
        processed    INTEGER NOT NULL DEFAULT 0,
        failed       INTEGER NOT NULL DEFAULT 0,
        error        TEXT,
        created_at   TEXT NOT NULL,
        completed_at TEXT
    );

    CREATE TABLE ai_results (
        job_id      TEXT NOT NULL REFERENCES ai_jobs(id) ON DELETE CASCADE,
        document_id TEXT NOT NULL,
        suggestion  TEXT NOT NULL,
        decisions   TEXT NOT NULL,
        applied     INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (job_id, document_id)
    );

    CREATE TABLE settings (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    "#,
];

/// Apply pending migrations. Idempotent.
pub fn migrate(conn: &mut Connection) -> Result<u32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let current: u32 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
            row.get(0)
        })?;

    for (idx, sql) in MIGRATIONS.iter().enumerate() {
        let version = idx as u32 + 1;
        if version <= current {
            continue;
        }
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
        tx.commit()?;
        tracing::info!("applied schema migration v{version}");
    }

    Ok(MIGRATIONS.len() as u32)
}

//! Persistent store for the deduplication engine.
//!
//! ## Core Principles
//!
//! 1. **Documents own their content and signature** (1:1, rewritten when the
//!    content fingerprint changes); groups reference documents weakly through
//!    a join relation.
//! 2. **Group identity is stable**: a group's id is derived from its member
//!    set, so re-analysis with unchanged membership keeps review state.
//! 3. **Snapshot replace is atomic**: readers see the pre-run or post-run
//!    group snapshot, never a partial one.
//!
//! ## Layout
//!
//! - `domain`: entities and the `DedupeStore` port trait
//! - `infrastructure::sqlite`: rusqlite adapter (WAL, versioned migrations)

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{
    AiJob, AiJobStatus, AiResult, AnalysisParameters, AnalysisRun, BatchKind, BatchOperation,
    BatchStatus, DedupeStore, Document, DocumentContent, DuplicateGroup, DuplicateMember,
    FieldDecision, FieldSuggestion, GroupFilter, GroupSnapshotEntry, GroupWithMembers,
    MemberEntry, MetadataSuggestion, RunStatus, StoredSignature, SuggestionDecisions,
};
pub use infrastructure::sqlite::SqliteStore;

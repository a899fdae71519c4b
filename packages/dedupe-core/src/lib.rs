//! Similarity pipeline for near-duplicate document detection.
//!
//! The pipeline runs in fixed stages over extracted OCR text:
//!
//! 1. Normalize text and emit k-word shingles (`normalize`)
//! 2. Build MinHash permutation signatures over shingle sets (`minhash`)
//! 3. Band signatures into an LSH index and enumerate candidate pairs (`lsh`)
//! 4. Score candidates with a weighted multi-factor combiner (`fuzzy`, `scoring`)
//! 5. Cluster surviving edges with union-find and pick a primary (`grouping`)
//!
//! Everything in this crate is deterministic: the same input corpus and the
//! same `DedupeConfig` always produce the same signatures, candidates, and
//! group keys. Orchestration, persistence, and upstream IO live in the
//! `dedupe-storage` and `dedupe-engine` crates.

pub mod config;
pub mod error;
pub mod fuzzy;
pub mod grouping;
pub mod hash;
pub mod lsh;
pub mod minhash;
pub mod normalize;
pub mod scoring;

pub use config::{ConfidenceWeights, DedupeConfig};
pub use error::{CoreError, Result};
pub use grouping::{GroupDraft, MemberDraft, MemberSimilarity, UnionFind};
pub use lsh::LshIndex;
pub use minhash::{MinHashParams, Signature};
pub use normalize::TextProfile;
pub use scoring::{combine, ConfidenceBreakdown, ScoringData};

//! Runtime configuration for the deduplication pipeline.
//!
//! One struct carries every recognized key: upstream connection, similarity
//! parameters, and confidence weights. Subsystems clone the active config at
//! phase entry and hold it constant for the phase, so mid-run edits only take
//! effect on the next run.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::hash;

/// Relative weights for the multi-factor confidence combiner.
///
/// Weights are interpreted by ratio (sum-normalized), so they do not need to
/// total 100. A component with weight 0 is excluded from the weighted mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceWeights {
    pub jaccard: u32,
    pub fuzzy: u32,
    pub metadata: u32,
    pub filename: u32,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            jaccard: 40,
            fuzzy: 30,
            metadata: 15,
            filename: 15,
        }
    }
}

impl ConfidenceWeights {
    pub fn sum(&self) -> u64 {
        self.jaccard as u64 + self.fuzzy as u64 + self.metadata as u64 + self.filename as u64
    }

    /// Stable hash over the weight vector. A completed analysis run records
    /// this; a later mismatch marks the persisted snapshot stale.
    pub fn fingerprint(&self) -> u64 {
        hash::hash_u64s(&[
            self.jaccard as u64,
            self.fuzzy as u64,
            self.metadata as u64,
            self.filename as u64,
        ])
    }

    pub fn validate(&self) -> Result<()> {
        if self.sum() == 0 {
            return Err(CoreError::invalid_config(
                "confidence weights sum to zero; at least one weight must be positive",
            ));
        }
        Ok(())
    }
}

/// All recognized configuration keys and their effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupeConfig {
    /// Upstream base address (paperless-ngx).
    pub paperless_url: String,
    /// Upstream auth; token preferred over username/password.
    pub paperless_api_token: Option<String>,
    pub paperless_username: Option<String>,
    pub paperless_password: Option<String>,

    /// Percent (50-100) minimum overall score for persisting a group.
    /// Values below 50 are silently clamped to 50.
    pub fuzzy_match_threshold: u32,
    /// Minimum fuzzy token-sort ratio for a candidate edge to survive.
    pub min_fuzzy_ratio: f64,
    /// MinHash-estimated jaccard floor for candidate pairs (0.1-1.0).
    pub lsh_threshold: f64,
    /// MinHash signature length H (64-256, power of two).
    pub minhash_num_perm: usize,
    /// Seed for the permutation family. Changing it invalidates signatures.
    pub minhash_seed: u64,
    /// LSH band count B. H = B x R must hold.
    pub lsh_bands: usize,
    /// LSH rows per band R.
    pub lsh_rows: usize,
    /// Shingle window size in words.
    pub shingle_size: usize,
    /// Documents with fewer normalized words are analysis-ineligible.
    pub min_words: usize,
    /// Cap on stored OCR text, in characters.
    pub max_ocr_length: usize,
    /// Fuzzy scorer input truncation, in characters.
    pub fuzzy_sample_size: usize,

    pub weights: ConfidenceWeights,

    /// Upstream catalog page size.
    pub page_size: u32,
    /// Upstream request concurrency cap.
    pub max_concurrent_requests: usize,
    /// Per-call upstream deadline, seconds.
    pub request_timeout_secs: u64,
    /// Cancellation/progress checkpoint cadence, in documents.
    pub checkpoint_interval: usize,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            paperless_url: String::new(),
            paperless_api_token: None,
            paperless_username: None,
            paperless_password: None,
            fuzzy_match_threshold: 75,
            min_fuzzy_ratio: 0.5,
            lsh_threshold: 0.7,
            minhash_num_perm: 128,
            minhash_seed: 0x9d0c_5bc4_df1a_3e27,
            lsh_bands: 16,
            lsh_rows: 8,
            shingle_size: 3,
            min_words: 20,
            max_ocr_length: 500_000,
            fuzzy_sample_size: 5_000,
            weights: ConfidenceWeights::default(),
            page_size: 100,
            max_concurrent_requests: 4,
            request_timeout_secs: 30,
            checkpoint_interval: 50,
        }
    }
}

impl DedupeConfig {
    /// Validate ranges. Rejected at write time; a stored config is always
    /// valid.
    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;

        if !(64..=256).contains(&self.minhash_num_perm) {
            return Err(CoreError::invalid_config(format!(
                "minhash_num_perm must be in 64..=256, got {}",
                self.minhash_num_perm
            )));
        }
        if !self.minhash_num_perm.is_power_of_two() {
            return Err(CoreError::invalid_config(format!(
                "minhash_num_perm must be a power of two, got {}",
                self.minhash_num_perm
            )));
        }
        if self.lsh_bands == 0 || self.lsh_rows == 0 {
            return Err(CoreError::invalid_config(
                "lsh_bands and lsh_rows must be positive",
            ));
        }
        if self.lsh_bands * self.lsh_rows != self.minhash_num_perm {
            return Err(CoreError::InvalidPartition {
                num_hashes: self.minhash_num_perm,
                bands: self.lsh_bands,
                rows: self.lsh_rows,
            });
        }
        if !(0.1..=1.0).contains(&self.lsh_threshold) {
            return Err(CoreError::invalid_config(format!(
                "lsh_threshold must be in 0.1..=1.0, got {}",
                self.lsh_threshold
            )));
        }
        if self.fuzzy_match_threshold > 100 {
            return Err(CoreError::invalid_config(format!(
                "fuzzy_match_threshold must be at most 100, got {}",
                self.fuzzy_match_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.min_fuzzy_ratio) {
            return Err(CoreError::invalid_config(format!(
                "min_fuzzy_ratio must be in 0.0..=1.0, got {}",
                self.min_fuzzy_ratio
            )));
        }
        if self.shingle_size == 0 {
            return Err(CoreError::invalid_config("shingle_size must be positive"));
        }
        if self.page_size == 0 {
            return Err(CoreError::invalid_config("page_size must be positive"));
        }
        if self.max_concurrent_requests == 0 {
            return Err(CoreError::invalid_config(
                "max_concurrent_requests must be positive",
            ));
        }
        if self.checkpoint_interval == 0 {
            return Err(CoreError::invalid_config(
                "checkpoint_interval must be positive",
            ));
        }
        Ok(())
    }

    /// Minimum overall score for persisting a group, as a 0..1 fraction.
    /// Percent values below 50 are clamped up rather than rejected.
    pub fn overall_threshold(&self) -> f64 {
        self.fuzzy_match_threshold.clamp(50, 100) as f64 / 100.0
    }

    /// Signature parameters currently in effect. A persisted signature with
    /// different parameters is stale and must be rebuilt.
    pub fn minhash_params(&self) -> crate::minhash::MinHashParams {
        crate::minhash::MinHashParams {
            num_hashes: self.minhash_num_perm,
            seed: self.minhash_seed,
            shingle_size: self.shingle_size,
        }
    }
}

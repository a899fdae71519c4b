//! MinHash signature construction and jaccard estimation.
//!
//! A signature is the element-wise minimum of H independent 64-bit linear
//! congruential hashes over a shingle set. Two signatures built with the same
//! parameters estimate the jaccard similarity of their underlying sets with
//! error on the order of 1/sqrt(H).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::hash;

/// Parameters a signature was built with. Signatures with differing
/// parameters must never be compared; the analysis coordinator rebuilds when
/// any of these change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MinHashParams {
    pub num_hashes: usize,
    pub seed: u64,
    pub shingle_size: usize,
}

impl Default for MinHashParams {
    fn default() -> Self {
        Self {
            num_hashes: 128,
            seed: 0x9d0c_5bc4_df1a_3e27,
            shingle_size: 3,
        }
    }
}

impl std::fmt::Display for MinHashParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "H={} seed={:#x} k={}",
            self.num_hashes, self.seed, self.shingle_size
        )
    }
}

/// MinHash permutation signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub values: Vec<u64>,
    pub params: MinHashParams,
}

impl Signature {
    /// Build a signature over a shingle set. An empty set produces the
    /// all-max sentinel, which never matches anything.
    pub fn build(shingles: &HashSet<u64>, params: MinHashParams) -> Self {
        let mut values = vec![u64::MAX; params.num_hashes];
        if shingles.is_empty() {
            return Self { values, params };
        }

        let coefficients = permutation_coefficients(params);
        for &shingle in shingles {
            for (slot, &(a, b)) in values.iter_mut().zip(coefficients.iter()) {
                let h = a.wrapping_mul(shingle).wrapping_add(b);
                if h < *slot {
                    *slot = h;
                }
            }
        }
        Self { values, params }
    }

    /// True for the empty-set sentinel.
    pub fn is_empty_sentinel(&self) -> bool {
        self.values.iter().all(|&v| v == u64::MAX)
    }

    /// Estimated jaccard similarity: fraction of matching positions.
    /// Sentinel signatures estimate 0 against everything, including each
    /// other.
    pub fn estimate_jaccard(&self, other: &Signature) -> Result<f64> {
        if self.params != other.params {
            return Err(CoreError::params_mismatch(format!(
                "cannot compare [{}] with [{}]",
                self.params, other.params
            )));
        }
        if self.is_empty_sentinel() || other.is_empty_sentinel() {
            return Ok(0.0);
        }

        let matching = self
            .values
            .iter()
            .zip(other.values.iter())
            .filter(|(a, b)| a == b)
            .count();
        Ok(matching as f64 / self.values.len() as f64)
    }
}

/// Per-permutation (a, b) pairs for h_i(x) = a_i * x + b_i (wrapping).
/// Derived deterministically from (seed, i); a_i is forced odd so the
/// multiplication is a bijection on u64.
fn permutation_coefficients(params: MinHashParams) -> Vec<(u64, u64)> {
    (0..params.num_hashes as u64)
        .map(|i| {
            let a = hash::mix64(params.seed ^ hash::mix64(i)) | 1;
            let b = hash::mix64(params.seed.wrapping_add(hash::mix64(i ^ 0xa5a5_a5a5_a5a5_a5a5)));
            (a, b)
        })
        .collect()
}

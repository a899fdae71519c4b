//! Locality-sensitive hashing over MinHash signatures.
//!
//! Each signature is split into B bands of R rows; each band's row tuple is
//! hashed into a bucket key `(band_index, band_hash)`. Documents sharing at
//! least one bucket are candidate pairs. For a pair with jaccard s, the
//! candidate probability follows the S-curve `1 - (1 - s^R)^B`; the default
//! B=16, R=8 puts the knee near 0.7-0.8.

use std::collections::HashMap;

use crate::error::{CoreError, Result};
use crate::hash;
use crate::minhash::{MinHashParams, Signature};

/// In-memory LSH index over dense document indices.
///
/// Callers key documents by a dense `u32` row index for the duration of a
/// run and translate back to document ids afterwards. The index is derived
/// state: it is rebuilt from persisted signatures on every analysis run.
pub struct LshIndex {
    params: MinHashParams,
    bands: usize,
    rows: usize,
    buckets: HashMap<(u32, u64), Vec<u32>>,
    len: usize,
}

impl LshIndex {
    /// Create an index for signatures built with `params`, partitioned into
    /// `bands` x `rows`. The partition must cover the signature exactly.
    pub fn new(params: MinHashParams, bands: usize, rows: usize) -> Result<Self> {
        if bands == 0 || rows == 0 || bands * rows != params.num_hashes {
            return Err(CoreError::InvalidPartition {
                num_hashes: params.num_hashes,
                bands,
                rows,
            });
        }
        Ok(Self {
            params,
            bands,
            rows,
            buckets: HashMap::new(),
            len: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Insert a document's signature. Sentinel (empty-set) signatures are
    /// skipped entirely so ineligible documents never become candidates.
    pub fn insert(&mut self, doc: u32, signature: &Signature) -> Result<()> {
        if signature.params != self.params {
            return Err(CoreError::params_mismatch(format!(
                "index built for [{}], signature is [{}]",
                self.params, signature.params
            )));
        }
        if signature.is_empty_sentinel() {
            return Ok(());
        }

        for band in 0..self.bands {
            let rows = &signature.values[band * self.rows..(band + 1) * self.rows];
            let band_hash = hash::hash_u64s(rows);
            self.buckets
                .entry((band as u32, band_hash))
                .or_default()
                .push(doc);
        }
        self.len += 1;
        Ok(())
    }

    /// Stream candidate pairs bucket by bucket, `a < b` within each pair.
    ///
    /// A pair sharing several buckets is emitted once per shared bucket;
    /// callers own cross-band deduplication so enumeration never has to
    /// materialize the full pair set here.
    pub fn for_each_candidate<F: FnMut(u32, u32)>(&self, mut visit: F) {
        for members in self.buckets.values() {
            if members.len() < 2 {
                continue;
            }
            for (i, &a) in members.iter().enumerate() {
                for &b in &members[i + 1..] {
                    if a < b {
                        visit(a, b);
                    } else {
                        visit(b, a);
                    }
                }
            }
        }
    }

    /// Collect deduplicated candidate pairs. Convenience for small corpora
    /// and tests; the coordinator uses `for_each_candidate` with its own
    /// seen-set.
    pub fn candidate_pairs(&self) -> Vec<(u32, u32)> {
        let mut seen = std::collections::HashSet::new();
        self.for_each_candidate(|a, b| {
            seen.insert((a, b));
        });
        let mut pairs: Vec<_> = seen.into_iter().collect();
        pairs.sort_unstable();
        pairs
    }
}

/// Probability that a pair with jaccard `s` shares at least one bucket:
/// `1 - (1 - s^rows)^bands`.
pub fn candidate_probability(s: f64, bands: usize, rows: usize) -> f64 {
    1.0 - (1.0 - s.powi(rows as i32)).powi(bands as i32)
}

//! Multi-factor confidence scoring for candidate pairs.
//!
//! The combiner folds four component scores into a weighted mean:
//! MinHash-estimated jaccard, token-sort fuzzy similarity over normalized
//! text, file-size ratio, and filename similarity. Weights come from the
//! active configuration; components with zero weight are excluded.

use serde::{Deserialize, Serialize};

use crate::config::ConfidenceWeights;
use crate::fuzzy;

/// Per-document inputs for pair scoring. Bounded by construction: the text
/// sample is already truncated to the fuzzy sample size, so holding one per
/// corpus document is cheap even for 500 KB OCR bodies.
#[derive(Debug, Clone, Default)]
pub struct ScoringData {
    pub title: String,
    pub original_filename: Option<String>,
    pub file_size: Option<u64>,
    pub text_sample: String,
}

impl ScoringData {
    /// Name used for filename similarity: original filename when present,
    /// else the title.
    fn display_name(&self) -> &str {
        self.original_filename.as_deref().unwrap_or(&self.title)
    }
}

/// Component and combined scores for one pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    pub overall: f64,
    pub jaccard: f64,
    pub fuzzy: f64,
    pub metadata: f64,
    pub filename: f64,
}

impl ConfidenceBreakdown {
    /// Breakdown for a document compared with itself.
    pub fn identity() -> Self {
        Self {
            overall: 1.0,
            jaccard: 1.0,
            fuzzy: 1.0,
            metadata: 1.0,
            filename: 1.0,
        }
    }
}

/// Combine component scores for a pair. `quick` bypasses the fuzzy,
/// metadata, and filename components and returns the jaccard estimate as
/// the overall score.
pub fn combine(
    a: &ScoringData,
    b: &ScoringData,
    estimated_jaccard: f64,
    weights: &ConfidenceWeights,
    quick: bool,
    fuzzy_sample_size: usize,
) -> ConfidenceBreakdown {
    if quick {
        return ConfidenceBreakdown {
            overall: estimated_jaccard,
            jaccard: estimated_jaccard,
            ..Default::default()
        };
    }

    let fuzzy_score = fuzzy::token_sort_ratio(&a.text_sample, &b.text_sample, fuzzy_sample_size);
    let metadata_score = file_size_ratio(a.file_size, b.file_size);
    let filename_score =
        fuzzy::token_sort_ratio(a.display_name(), b.display_name(), fuzzy_sample_size);

    let components = [
        (weights.jaccard, estimated_jaccard),
        (weights.fuzzy, fuzzy_score),
        (weights.metadata, metadata_score),
        (weights.filename, filename_score),
    ];

    let weight_sum: u64 = components
        .iter()
        .filter(|(w, _)| *w > 0)
        .map(|(w, _)| *w as u64)
        .sum();
    let overall = if weight_sum == 0 {
        0.0
    } else {
        components
            .iter()
            .filter(|(w, _)| *w > 0)
            .map(|(w, s)| *w as f64 * s)
            .sum::<f64>()
            / weight_sum as f64
    };

    ConfidenceBreakdown {
        overall,
        jaccard: estimated_jaccard,
        fuzzy: fuzzy_score,
        metadata: metadata_score,
        filename: filename_score,
    }
}

/// Metadata similarity: min/max file-size ratio when both sizes are known,
/// else 0.
fn file_size_ratio(a: Option<u64>, b: Option<u64>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) if a > 0 && b > 0 => a.min(b) as f64 / a.max(b) as f64,
        _ => 0.0,
    }
}

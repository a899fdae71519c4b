//! Union-find grouping, primary selection, and stable group identity.
//!
//! Surviving candidate edges are clustered into connected components over
//! dense document indices. Each component of size >= 2 becomes a group
//! draft: a deterministic primary, per-member similarity to that primary,
//! and a stable key derived from the member set so re-analysis with
//! unchanged membership keeps the same identity (and with it the
//! reviewed/resolved flags).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::scoring::ConfidenceBreakdown;

/// Union-find with path compression and union-by-rank over dense indices.
pub struct UnionFind {
    parent: Vec<u32>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n as u32).collect(),
            rank: vec![0; n],
        }
    }

    pub fn find(&mut self, x: u32) -> u32 {
        let mut root = x;
        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }
        // Path compression.
        let mut cur = x;
        while self.parent[cur as usize] != root {
            let next = self.parent[cur as usize];
            self.parent[cur as usize] = root;
            cur = next;
        }
        root
    }

    /// Returns false when both were already in the same set.
    pub fn union(&mut self, a: u32, b: u32) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return false;
        }
        let (hi, lo) = if self.rank[ra as usize] >= self.rank[rb as usize] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[lo as usize] = hi;
        if self.rank[hi as usize] == self.rank[lo as usize] {
            self.rank[hi as usize] += 1;
        }
        true
    }

    /// Connected components as root -> sorted members.
    pub fn components(&mut self) -> HashMap<u32, Vec<u32>> {
        let mut map: HashMap<u32, Vec<u32>> = HashMap::new();
        for x in 0..self.parent.len() as u32 {
            map.entry(self.find(x)).or_default().push(x);
        }
        map
    }
}

/// Per-document facts the grouping stage needs: primary-selection tie-break
/// data plus the upstream id that feeds the group key.
#[derive(Debug, Clone)]
pub struct GroupingDoc {
    pub upstream_id: i64,
    pub created_at: DateTime<Utc>,
    /// Count of populated metadata fields (title, correspondent, type,
    /// non-empty tags).
    pub metadata_completeness: u32,
    pub text_len: usize,
}

/// A member's similarity to its group primary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemberSimilarity {
    pub overall: f64,
    pub jaccard: f64,
    pub fuzzy: f64,
    pub metadata: f64,
}

impl From<ConfidenceBreakdown> for MemberSimilarity {
    fn from(b: ConfidenceBreakdown) -> Self {
        Self {
            overall: b.overall,
            jaccard: b.jaccard,
            fuzzy: b.fuzzy,
            metadata: b.metadata,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemberDraft {
    pub index: u32,
    pub is_primary: bool,
    pub similarity_to_primary: MemberSimilarity,
}

/// One duplicate group produced by a single analysis run, still keyed by
/// dense indices. The engine translates indices back to document ids when
/// persisting.
#[derive(Debug, Clone)]
pub struct GroupDraft {
    /// Stable identity: hex SHA-256 over the sorted member upstream ids.
    pub key: String,
    pub primary_index: u32,
    /// Overall score of the (primary, worst other member) pair.
    pub confidence_score: f64,
    pub confidence_breakdown: ConfidenceBreakdown,
    pub members: Vec<MemberDraft>,
}

/// Stable group identity over the member multiset.
pub fn group_key(upstream_ids: &[i64]) -> String {
    let mut sorted = upstream_ids.to_vec();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    for id in sorted {
        hasher.update(id.to_le_bytes());
    }
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Deterministic primary selection: newest `created_at`, then most complete
/// metadata, then longest text, then largest `upstream_id` as the total
/// tiebreaker.
pub fn select_primary(members: &[u32], docs: &[GroupingDoc]) -> u32 {
    *members
        .iter()
        .max_by_key(|&&i| {
            let d = &docs[i as usize];
            (
                d.created_at,
                d.metadata_completeness,
                d.text_len,
                d.upstream_id,
            )
        })
        .expect("components have at least one member")
}

/// Cluster edges into group drafts.
///
/// `edges` are pairs that already passed the score thresholds. `pair_score`
/// computes a full breakdown for (primary, member) pairs, which are not
/// necessarily among the surviving edges.
pub fn build_groups<F>(
    num_docs: usize,
    edges: &[(u32, u32)],
    docs: &[GroupingDoc],
    mut pair_score: F,
) -> Vec<GroupDraft>
where
    F: FnMut(u32, u32) -> ConfidenceBreakdown,
{
    debug_assert_eq!(num_docs, docs.len());

    let mut uf = UnionFind::new(num_docs);
    for &(a, b) in edges {
        uf.union(a, b);
    }

    let mut groups = Vec::new();
    for (_, mut members) in uf.components() {
        if members.len() < 2 {
            continue;
        }
        members.sort_unstable();

        let primary = select_primary(&members, docs);
        let mut worst: Option<ConfidenceBreakdown> = None;

        let member_drafts: Vec<MemberDraft> = members
            .iter()
            .map(|&index| {
                if index == primary {
                    return MemberDraft {
                        index,
                        is_primary: true,
                        similarity_to_primary: ConfidenceBreakdown::identity().into(),
                    };
                }
                let breakdown = pair_score(primary, index);
                if worst.is_none() || breakdown.overall < worst.unwrap().overall {
                    worst = Some(breakdown);
                }
                MemberDraft {
                    index,
                    is_primary: false,
                    similarity_to_primary: breakdown.into(),
                }
            })
            .collect();

        let worst = worst.unwrap_or_default();
        let upstream_ids: Vec<i64> = members
            .iter()
            .map(|&i| docs[i as usize].upstream_id)
            .collect();

        groups.push(GroupDraft {
            key: group_key(&upstream_ids),
            primary_index: primary,
            confidence_score: worst.overall,
            confidence_breakdown: worst,
            members: member_drafts,
        });
    }

    groups.sort_by(|a, b| a.key.cmp(&b.key));
    groups
}

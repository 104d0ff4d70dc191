//! # Permutation Tables
//!
//! Orderings of the 8 base trio indexes used by the cyclic growth rules.
//! Base trio `i + 4` is the negation of base trio `i`; the two are never
//! allowed next to each other.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};
use super::trio::TrioIndex;

pub const NB_VALID_NEXT: usize = 12;
pub const NB_PERMUTATIONS: usize = 12;

/// True when one base index is the negation of the other.
fn is_negation_pair(a: TrioIndex, b: TrioIndex) -> bool {
    a.0.abs_diff(b.0) == 4
}

/// Two sequences are the same permutation iff one is a rotation of the other.
pub fn same_permutation(p1: &[TrioIndex], p2: &[TrioIndex]) -> bool {
    if p1.len() != p2.len() || p1.is_empty() {
        return p1.len() == p2.len();
    }
    let n = p1.len();
    let Some(offset) = p2.iter().position(|&t| t == p1[0]) else {
        return false;
    };
    (0..n).all(|idx| p2[(offset + idx) % n] == p1[idx])
}

// ============================================================================
// Backtracking builder
// ============================================================================

struct PermBuilder {
    size: usize,
    collector: Vec<Vec<TrioIndex>>,
}

impl PermBuilder {
    fn fill(&mut self, pos: usize, current: &mut Vec<TrioIndex>) {
        if pos == self.size {
            if !self.collector.iter().any(|kept| same_permutation(kept, current)) {
                self.collector.push(current.clone());
            }
            return;
        }
        for i in 0..4u8 {
            let candidate = TrioIndex(if pos % 2 == 0 { i } else { i + 4 });
            if current[..pos].contains(&candidate) {
                continue;
            }
            if pos > 0 && is_negation_pair(current[pos - 1], candidate) {
                continue;
            }
            if pos == self.size - 1 && is_negation_pair(current[0], candidate) {
                continue;
            }
            current[pos] = candidate;
            self.fill(pos + 1, current);
        }
    }
}

fn build_permutations<const N: usize>(first: Option<TrioIndex>) -> Result<Vec<[TrioIndex; N]>> {
    let mut builder = PermBuilder { size: N, collector: Vec::with_capacity(NB_PERMUTATIONS) };
    let mut current = vec![TrioIndex(0); N];
    match first {
        Some(t) => {
            current[0] = t;
            builder.fill(1, &mut current);
        }
        None => builder.fill(0, &mut current),
    }
    if builder.collector.len() != NB_PERMUTATIONS {
        return Err(Error::Inconsistent(format!(
            "expected {} permutations of length {}, built {}",
            NB_PERMUTATIONS, N, builder.collector.len()
        )));
    }
    builder
        .collector
        .into_iter()
        .map(|p| {
            <[TrioIndex; N]>::try_from(p)
                .map_err(|p| Error::Inconsistent(format!("permutation {:?} has wrong length", p)))
        })
        .collect()
}

// ============================================================================
// PermutationTables
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermutationTables {
    /// `(i, j)` with `i` in 0..4 and `j` in 4..8, `j != i + 4`.
    pub valid_next: [[TrioIndex; 2]; NB_VALID_NEXT],
    pub mod4: Vec<[TrioIndex; 4]>,
    pub mod8: Vec<[TrioIndex; 8]>,
}

impl PermutationTables {
    pub fn derive() -> Result<Self> {
        let mut valid_next = [[TrioIndex(0); 2]; NB_VALID_NEXT];
        let mut idx = 0;
        for i in 0..4u8 {
            for j in 4..8u8 {
                if is_negation_pair(TrioIndex(i), TrioIndex(j)) {
                    continue;
                }
                valid_next[idx] = [TrioIndex(i), TrioIndex(j)];
                idx += 1;
            }
        }

        let mod4 = build_permutations::<4>(None)?;
        let mod8 = build_permutations::<8>(Some(TrioIndex(0)))?;
        Ok(Self { valid_next, mod4, mod8 })
    }

    pub fn is_valid_next(&self, a: TrioIndex, b: TrioIndex) -> bool {
        let key = if a.0 < b.0 { [a, b] } else { [b, a] };
        self.valid_next.contains(&key)
    }
}

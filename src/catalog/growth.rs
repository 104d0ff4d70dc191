//! # Growth Rules
//!
//! A growth rule picks the base trio of every main point. The 52 rules are
//! split into 5 families: constant (1), alternating over a valid successor
//! pair (2), three-way alternation on odd cells (3), and cycling through a
//! length 4 (4) or length 8 (8) permutation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::point::Point;
use crate::{Error, Result};
use super::permutation::PermutationTables;
use super::trio::TrioIndex;

pub const NB_GROWTH_RULES: usize = 52;

// ============================================================================
// GrowthFamily
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum GrowthFamily {
    Constant = 1,
    Alternating = 2,
    ThreeWay = 3,
    Cycle4 = 4,
    Cycle8 = 8,
}

impl GrowthFamily {
    pub const ALL: [GrowthFamily; 5] = [
        GrowthFamily::Constant,
        GrowthFamily::Alternating,
        GrowthFamily::ThreeWay,
        GrowthFamily::Cycle4,
        GrowthFamily::Cycle8,
    ];

    pub fn value(self) -> u8 {
        self as u8
    }

    /// Number of rule instances in this family.
    pub fn nb_indexes(self) -> usize {
        match self {
            GrowthFamily::Constant | GrowthFamily::ThreeWay => 8,
            GrowthFamily::Alternating | GrowthFamily::Cycle4 | GrowthFamily::Cycle8 => 12,
        }
    }

    /// Number of distinct offsets a rule of this family reacts to.
    pub fn max_offset(self) -> usize {
        self.value() as usize
    }
}

impl From<GrowthFamily> for u8 {
    fn from(f: GrowthFamily) -> u8 {
        f.value()
    }
}

impl TryFrom<u8> for GrowthFamily {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        GrowthFamily::ALL
            .into_iter()
            .find(|f| f.value() == v)
            .ok_or_else(|| Error::UnknownGrowthRule(format!("family {}", v)))
    }
}

// ============================================================================
// GrowthRule
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GrowthRuleId(pub u8);

impl fmt::Display for GrowthRuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GrowthRule {
    pub id: GrowthRuleId,
    pub family: GrowthFamily,
    pub index: usize,
}

impl GrowthRule {
    /// The base trio this rule assigns to `main_point` under `offset`.
    pub fn trio_at(&self, tables: &PermutationTables, offset: usize, main_point: Point) -> Result<TrioIndex> {
        if !main_point.is_main_point() {
            return Err(Error::NotMainPoint(main_point));
        }
        let d = main_point.cell_distance() as usize;
        let idx = self.index;
        let trio = match self.family {
            GrowthFamily::Constant => TrioIndex(idx as u8),
            GrowthFamily::ThreeWay => {
                if d % 2 == 0 {
                    TrioIndex(idx as u8)
                } else {
                    let m = ((d - 1) / 2 + offset) % 3;
                    if idx < 4 {
                        tables.valid_next[3 * idx + m][1]
                    } else {
                        tables
                            .valid_next
                            .iter()
                            .filter(|pair| pair[1].0 as usize == idx)
                            .nth(m)
                            .map(|pair| pair[0])
                            .ok_or_else(|| Error::Inconsistent(format!(
                                "no valid successor #{} ends with {} for {}", m, idx, self
                            )))?
                    }
                }
            }
            GrowthFamily::Alternating => tables.valid_next[idx][(d + offset) % 2],
            GrowthFamily::Cycle4 => tables.mod4[idx][(d + offset) % 4],
            GrowthFamily::Cycle8 => tables.mod8[idx][(d + offset) % 8],
        };
        Ok(trio)
    }
}

impl fmt::Display for GrowthRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GrowthRule{}-{}-Idx{:02}", self.id, self.family.value(), self.index)
    }
}

// ============================================================================
// GrowthRules
// ============================================================================

/// All 52 rules, ids assigned in family order then index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrowthRules {
    rules: Vec<GrowthRule>,
}

impl GrowthRules {
    pub fn derive() -> Result<Self> {
        let mut rules = Vec::with_capacity(NB_GROWTH_RULES);
        for family in GrowthFamily::ALL {
            for index in 0..family.nb_indexes() {
                rules.push(GrowthRule { id: GrowthRuleId(rules.len() as u8), family, index });
            }
        }
        if rules.len() != NB_GROWTH_RULES {
            return Err(Error::Inconsistent(format!(
                "expected {} growth rules, built {}", NB_GROWTH_RULES, rules.len()
            )));
        }
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GrowthRule> {
        self.rules.iter()
    }

    pub fn get(&self, id: GrowthRuleId) -> Result<&GrowthRule> {
        self.rules
            .get(id.0 as usize)
            .ok_or_else(|| Error::UnknownGrowthRule(id.to_string()))
    }

    pub fn by_family(&self, family: u8, index: usize) -> Result<&GrowthRule> {
        let family = GrowthFamily::try_from(family)?;
        self.rules
            .iter()
            .find(|r| r.family == family && r.index == index)
            .ok_or_else(|| Error::UnknownGrowthRule(format!("family {} index {}", family.value(), index)))
    }
}

//! # Connection Catalog
//!
//! The 50 signed connection vectors of the lattice. They are the base-trio
//! vectors plus every "bridging" vector that links a point to the trio of its
//! neighboring main point, each paired with its negation.

use std::cmp::Ordering;
use std::fmt;

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};

use crate::point::{Point, UnitDirection};
use crate::{Error, Result};
use super::trio::BaseTrio;

/// Number of connection magnitudes; ids run over `±1..=±25`.
pub const NB_CONNECTIONS: usize = 25;

// ============================================================================
// ConnectionId
// ============================================================================

/// Signed connection number. The sign distinguishes a vector from its
/// negation; 0 is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub i8);

impl ConnectionId {
    pub const INVALID: ConnectionId = ConnectionId(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0 && self.0.unsigned_abs() as usize <= NB_CONNECTIONS
    }

    pub fn neg(self) -> Self {
        ConnectionId(-self.0)
    }

    pub fn magnitude(self) -> u8 {
        self.0.unsigned_abs()
    }

    /// Connections 4..=9 are the squared-distance-2 base vectors.
    pub fn is_base(self) -> bool {
        (4..=9).contains(&self.magnitude())
    }

    /// Squared length implied by the magnitude.
    pub fn squared_distance(self) -> i64 {
        match self.magnitude() {
            1..=3 => 1,
            4..=9 => 2,
            10..=13 => 3,
            _ => 5,
        }
    }

    /// Position in the catalog: `CP01, CN01, CP02, CN02, ...`.
    fn catalog_index(self) -> usize {
        let m = self.magnitude() as usize;
        if self.0 > 0 { 2 * m - 2 } else { 2 * m - 1 }
    }

    /// Ascending magnitude, positive before negative.
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.magnitude()
            .cmp(&other.magnitude())
            .then_with(|| other.0.signum().cmp(&self.0.signum()))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 0 {
            write!(f, "CP{:02}", self.0)
        } else {
            write!(f, "CN{:02}", -i16::from(self.0))
        }
    }
}

// ============================================================================
// ConnectionDetails
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionDetails {
    pub id: ConnectionId,
    pub vector: Point,
    pub squared_distance: i64,
}

impl ConnectionDetails {
    pub fn neg_id(&self) -> ConnectionId {
        self.id.neg()
    }

    pub fn is_base(&self) -> bool {
        self.id.is_base()
    }

    /// The two unit directions a base connection moves along, in x, y, z order.
    pub fn directions(&self) -> Result<[UnitDirection; 2]> {
        if !self.is_base() {
            return Err(Error::Inconsistent(format!(
                "cannot extract unit directions on non base connection {}", self.id
            )));
        }
        let mut res = [UnitDirection::PlusX; 2];
        let mut idx = 0;
        for (axis, &c) in self.vector.0.iter().enumerate() {
            if c != 0 {
                if idx == 2 {
                    return Err(Error::Inconsistent(format!(
                        "base connection {} has more than 2 directions", self.id
                    )));
                }
                res[idx] = UnitDirection::from_axis(axis, c > 0);
                idx += 1;
            }
        }
        if idx != 2 {
            return Err(Error::Inconsistent(format!(
                "base connection {} has {} directions", self.id, idx
            )));
        }
        Ok(res)
    }
}

impl fmt::Display for ConnectionDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} {}", self.id, self.vector, self.squared_distance)
    }
}

// ============================================================================
// ConnectionCatalog
// ============================================================================

/// The 50 connections, stored as `[CP01, CN01, CP02, CN02, ...]`.
#[derive(Debug, Clone)]
pub struct ConnectionCatalog {
    ordered: Vec<ConnectionDetails>,
    by_vector: HashMap<Point, usize>,
}

impl ConnectionCatalog {
    pub(crate) fn derive(base: &[BaseTrio; 8]) -> Result<Self> {
        let mut vectors: Vec<Point> = Vec::with_capacity(2 * NB_CONNECTIONS);
        let mut seen: HashSet<Point> = HashSet::new();
        let mut add = |v: Point| -> Result<()> {
            let ds = v.distance_squared();
            if ds == 0 {
                return Err(Error::Inconsistent("zero vector cannot be a connection".into()));
            }
            if !matches!(ds, 1 | 2 | 3 | 5) {
                return Err(Error::Inconsistent(format!(
                    "vector {} of ds={} cannot be a connection", v, ds
                )));
            }
            for p in [v, -v] {
                if seen.insert(p) {
                    vectors.push(p);
                }
            }
            Ok(())
        };

        for tr in base {
            for &v in &tr.0 {
                add(v)?;
            }
            for tb in base {
                for v in tr.bridges(tb)? {
                    add(v)?;
                }
            }
        }

        vectors.sort_by(compare_vectors);

        let mut numbered: HashMap<Point, ConnectionId> = HashMap::new();
        let mut next_id: i8 = 1;
        for &v in &vectors {
            if numbered.contains_key(&v) {
                continue;
            }
            let pos = match v.0.iter().find(|&&c| c != 0) {
                Some(&c) if c > 0 => v,
                _ => -v,
            };
            numbered.insert(pos, ConnectionId(next_id));
            numbered.insert(-pos, ConnectionId(-next_id));
            next_id += 1;
        }

        if numbered.len() != 2 * NB_CONNECTIONS {
            return Err(Error::Inconsistent(format!(
                "expected {} connections, derived {}", 2 * NB_CONNECTIONS, numbered.len()
            )));
        }

        let mut ordered: Vec<ConnectionDetails> = numbered
            .into_iter()
            .map(|(vector, id)| ConnectionDetails {
                id,
                vector,
                squared_distance: vector.distance_squared(),
            })
            .collect();
        ordered.sort_by(|a, b| a.id.canonical_cmp(&b.id));

        for cd in &ordered {
            if cd.id.squared_distance() != cd.squared_distance {
                return Err(Error::Inconsistent(format!(
                    "connection {} has squared distance {} but its id implies {}",
                    cd.id, cd.squared_distance, cd.id.squared_distance()
                )));
            }
        }

        let by_vector = ordered.iter().enumerate().map(|(i, cd)| (cd.vector, i)).collect();
        Ok(Self { ordered, by_vector })
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectionDetails> {
        self.ordered.iter()
    }

    pub fn get(&self, id: ConnectionId) -> Result<&ConnectionDetails> {
        if !id.is_valid() {
            return Err(Error::UnknownConnection(id.to_string()));
        }
        self.ordered
            .get(id.catalog_index())
            .ok_or_else(|| Error::UnknownConnection(id.to_string()))
    }

    pub fn by_vector(&self, vector: Point) -> Option<&ConnectionDetails> {
        self.by_vector.get(&vector).map(|&i| &self.ordered[i])
    }

    /// The connection going from `from` to `to`.
    pub fn between(&self, from: Point, to: Point) -> Result<&ConnectionDetails> {
        let v = to - from;
        self.by_vector(v)
            .ok_or_else(|| Error::UnknownConnection(format!("vector {} from {} to {}", v, from, to)))
    }
}

/// Squared distance ascending, then larger absolute values first per axis,
/// then larger signed values first per axis.
fn compare_vectors(a: &Point, b: &Point) -> Ordering {
    a.distance_squared()
        .cmp(&b.distance_squared())
        .then_with(|| {
            a.0.iter()
                .zip(b.0.iter())
                .map(|(x, y)| y.abs().cmp(&x.abs()))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| {
            a.0.iter()
                .zip(b.0.iter())
                .map(|(x, y)| y.cmp(x))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        })
}

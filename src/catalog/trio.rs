//! # Trio Catalog
//!
//! A trio is a triple of connections usable as the local basis at a lattice
//! point. The 8 base trios are generated from one seed by symmetry; the other
//! 192 are the trios found at the points between two main points.

use std::cmp::Ordering;
use std::fmt;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::point::{Point, UnitDirection, X_FIRST, Y_FIRST, Z_FIRST};
use crate::{Error, Result};
use super::connection::{ConnectionCatalog, ConnectionDetails, ConnectionId};

pub const NB_TRIOS: usize = 200;
pub const NB_BASE_TRIOS: usize = 8;

/// Sorted squared-distance triples, indexed by DS index.
pub const DS_INDEX_TABLE: [[i64; 3]; 7] = [
    [2, 2, 2],
    [1, 1, 2],
    [1, 2, 3],
    [1, 2, 5],
    [2, 3, 3],
    [2, 3, 5],
    [2, 5, 5],
];

// ============================================================================
// TrioIndex
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrioIndex(pub u8);

impl TrioIndex {
    pub const NIL: TrioIndex = TrioIndex(255);

    pub fn is_base(self) -> bool {
        (self.0 as usize) < NB_BASE_TRIOS
    }

    pub fn is_nil(self) -> bool {
        self == Self::NIL
    }
}

impl fmt::Display for TrioIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{:03}", self.0)
    }
}

// ============================================================================
// Base trios
// ============================================================================

/// Three base connecting vectors summing to zero. Slot 0 holds the vector
/// with z = 0, slot 1 the one with y = 0 and slot 2 the one with x = 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BaseTrio(pub [Point; 3]);

impl BaseTrio {
    pub fn from_vectors(points: [Point; 3]) -> Result<Self> {
        let mut res = [Point::default(); 3];
        let mut filled = [false; 3];
        for p in points {
            if !p.is_base_connecting_vector() {
                return Err(Error::Inconsistent(format!(
                    "trying to create a base trio out of non base vector {}", p
                )));
            }
            let zero_axis = p.0.iter().position(|&c| c == 0).ok_or_else(|| {
                Error::Inconsistent(format!("base vector {} has no zero coordinate", p))
            })?;
            let slot = 2 - zero_axis;
            if filled[slot] {
                return Err(Error::Inconsistent(format!(
                    "two vectors share zero axis {} in {:?}", zero_axis, points
                )));
            }
            res[slot] = p;
            filled[slot] = true;
        }
        Ok(Self(res))
    }

    fn map(&self, f: impl Fn(Point) -> Point) -> Result<Self> {
        Self::from_vectors([f(self.0[0]), f(self.0[1]), f(self.0[2])])
    }

    pub fn rot_plus_x(&self) -> Result<Self> {
        self.map(Point::rot_plus_x)
    }

    pub fn neg(&self) -> Result<Self> {
        self.map(|p| -p)
    }

    /// The member whose component on `ud`'s axis equals `ud`'s sign.
    pub fn vector_towards(&self, ud: UnitDirection) -> Result<Point> {
        self.0
            .iter()
            .copied()
            .find(|p| p.0[ud.axis()] == ud.sign())
            .ok_or_else(|| Error::Inconsistent(format!("base trio {:?} has no {} vector", self.0, ud)))
    }

    /// The vector from the point reached by `from` (a member of this trio)
    /// to the point reached from the neighboring main point along `ud` using
    /// `other`'s vector pointing back.
    fn bridge(&self, from: Point, ud: UnitDirection, other: &BaseTrio) -> Result<Point> {
        Ok(ud.first_point() + other.vector_towards(ud.opposite())? - from)
    }

    /// The 6 bridging vectors +X, -X, +Y, -Y, +Z, -Z between this trio at the
    /// origin and `other` at each neighboring main point.
    pub fn bridges(&self, other: &BaseTrio) -> Result<[Point; 6]> {
        let mut res = [Point::default(); 6];
        for ud in UnitDirection::ALL {
            let from = self.vector_towards(ud)?;
            res[ud.index()] = self.bridge(from, ud, other)?;
        }
        Ok(res)
    }
}

/// The 8 base trios: the seed, its 3 successive +X rotations, then their
/// negations.
pub fn base_trios() -> Result<[BaseTrio; NB_BASE_TRIOS]> {
    let seed = BaseTrio::from_vectors([
        Point::new(1, 1, 0),
        Point::new(-1, 0, -1),
        Point::new(0, -1, 1),
    ])?;
    let mut res = [seed; NB_BASE_TRIOS];
    for i in 1..4 {
        res[i] = res[i - 1].rot_plus_x()?;
    }
    for i in 0..4 {
        res[i + 4] = res[i].neg()?;
    }
    Ok(res)
}

// ============================================================================
// TrioDetails
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrioDetails {
    pub id: TrioIndex,
    pub conns: [ConnectionDetails; 3],
}

impl TrioDetails {
    fn new(mut conns: [ConnectionDetails; 3]) -> Self {
        conns.sort_by(|a, b| a.id.canonical_cmp(&b.id));
        Self { id: TrioIndex::NIL, conns }
    }

    pub fn conn_ids(&self) -> [ConnectionId; 3] {
        [self.conns[0].id, self.conns[1].id, self.conns[2].id]
    }

    pub fn is_base(&self) -> bool {
        self.id.is_base()
    }

    /// Position of the squared-distance triple in [`DS_INDEX_TABLE`].
    pub fn ds_index(&self) -> Option<usize> {
        let ds = [
            self.conns[0].squared_distance,
            self.conns[1].squared_distance,
            self.conns[2].squared_distance,
        ];
        DS_INDEX_TABLE.iter().position(|row| *row == ds)
    }

    pub fn has_connection(&self, id: ConnectionId) -> bool {
        self.conns.iter().any(|cd| cd.id == id)
    }

    pub fn has_connections(&self, a: ConnectionId, b: ConnectionId, c: ConnectionId) -> bool {
        self.has_connection(a) && self.has_connection(b) && self.has_connection(c)
    }

    pub fn connection_index(&self, id: ConnectionId) -> Option<usize> {
        self.conns.iter().position(|cd| cd.id == id)
    }

    /// The two connections other than `id`.
    pub fn other_connections(&self, id: ConnectionId) -> Result<[ConnectionDetails; 2]> {
        let idx = self.connection_index(id).ok_or_else(|| {
            Error::UnknownConnection(format!("{} is not part of {}", id, self))
        })?;
        Ok(match idx {
            0 => [self.conns[1], self.conns[2]],
            1 => [self.conns[0], self.conns[2]],
            _ => [self.conns[0], self.conns[1]],
        })
    }

    /// The remaining connection once `a` and `b` are used.
    pub fn last_other_connection(&self, a: ConnectionId, b: ConnectionId) -> Result<ConnectionDetails> {
        self.conns
            .iter()
            .copied()
            .find(|cd| cd.id != a && cd.id != b)
            .filter(|_| self.has_connection(a) && self.has_connection(b) && a != b)
            .ok_or_else(|| Error::UnknownConnection(format!("{} and {} in {}", a, b, self)))
    }

    /// On a base trio, the connection moving toward `ud`.
    pub fn find_connection(&self, ud: UnitDirection) -> Result<&ConnectionDetails> {
        if !self.is_base() {
            return Err(Error::Inconsistent(format!(
                "cannot look for {} connection on non base trio {}", ud, self.id
            )));
        }
        self.conns
            .iter()
            .find(|cd| cd.vector.0[ud.axis()] == ud.sign())
            .ok_or_else(|| Error::Inconsistent(format!("no {} connection in {}", ud, self)))
    }

    /// On a base trio, the connection moving away from `ud`.
    pub fn opposite_connection(&self, ud: UnitDirection) -> Result<&ConnectionDetails> {
        self.find_connection(ud.opposite())
    }

    fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.conns
            .iter()
            .zip(other.conns.iter())
            .map(|(a, b)| a.id.canonical_cmp(&b.id))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl fmt::Display for TrioDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}, {}, {}", self.id, self.conns[0].id, self.conns[1].id, self.conns[2].id)
    }
}

// ============================================================================
// TrioCatalog
// ============================================================================

#[derive(Debug, Clone)]
pub struct TrioCatalog {
    trios: Vec<TrioDetails>,
    by_conns: HashMap<[ConnectionId; 3], TrioIndex>,
}

impl TrioCatalog {
    pub(crate) fn derive(base: &[BaseTrio; NB_BASE_TRIOS], connections: &ConnectionCatalog) -> Result<Self> {
        let make = |vectors: [Point; 3]| -> Result<TrioDetails> {
            match vectors.map(|v| connections.by_vector(v)) {
                [Some(a), Some(b), Some(c)] => Ok(TrioDetails::new([*a, *b, *c])),
                _ => Err(Error::UnknownConnection(format!(
                    "trying to create trio with vectors {:?} not all connections", vectors
                ))),
            }
        };

        let mut all: Vec<TrioDetails> = Vec::with_capacity(NB_TRIOS);
        let mut seen: HashMap<[ConnectionId; 3], usize> = HashMap::new();
        let mut add_unique = |td: TrioDetails, all: &mut Vec<TrioDetails>| {
            if !seen.contains_key(&td.conn_ids()) {
                seen.insert(td.conn_ids(), all.len());
                all.push(td);
            }
        };

        for (i, tr) in base.iter().enumerate() {
            let mut td = make(tr.0)?;
            td.id = TrioIndex(i as u8);
            add_unique(td, &mut all);
        }

        for ta in base {
            for tb in base {
                for tc in base {
                    for td in next_trios(ta, tb, tc, &make)? {
                        add_unique(td, &mut all);
                    }
                }
            }
        }

        if all.len() != NB_TRIOS {
            return Err(Error::Inconsistent(format!(
                "expected {} trios, derived {}", NB_TRIOS, all.len()
            )));
        }

        let mut keyed = Vec::with_capacity(all.len());
        for td in all {
            let ds = td.ds_index().ok_or_else(|| {
                Error::Inconsistent(format!("no DS index for trio {}", td))
            })?;
            keyed.push((ds, td));
        }
        keyed.sort_by(|(ds1, t1), (ds2, t2)| {
            ds1.cmp(ds2).then_with(|| {
                if *ds1 == 0 { t1.id.cmp(&t2.id) } else { t1.canonical_cmp(t2) }
            })
        });

        let mut trios = Vec::with_capacity(NB_TRIOS);
        for (i, (_, mut td)) in keyed.into_iter().enumerate() {
            let idx = TrioIndex(i as u8);
            if i < NB_BASE_TRIOS {
                if td.id != idx {
                    return Err(Error::Inconsistent(format!(
                        "incorrect id for base trio {} at {}", td, i
                    )));
                }
            } else if !td.id.is_nil() {
                return Err(Error::Inconsistent(format!(
                    "non base trio {} sorted at {}", td, i
                )));
            }
            td.id = idx;
            trios.push(td);
        }

        let by_conns = trios.iter().map(|td| (td.conn_ids(), td.id)).collect();
        Ok(Self { trios, by_conns })
    }

    pub fn len(&self) -> usize {
        self.trios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trios.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrioDetails> {
        self.trios.iter()
    }

    pub fn get(&self, idx: TrioIndex) -> Result<&TrioDetails> {
        self.trios
            .get(idx.0 as usize)
            .ok_or_else(|| Error::UnknownTrio(idx.to_string()))
    }

    /// The trio made of exactly these three connections, in any order.
    pub fn with_connections(&self, a: ConnectionId, b: ConnectionId, c: ConnectionId) -> Result<&TrioDetails> {
        let mut key = [a, b, c];
        key.sort_by(|x, y| x.canonical_cmp(y));
        let idx = self.by_conns.get(&key).ok_or_else(|| {
            Error::UnknownTrio(format!("no trio with connections {}, {}, {}", a, b, c))
        })?;
        self.get(*idx)
    }
}

/// Candidate trios at the point reached from the origin by each vector of
/// `ta`, when the neighboring main points carry `tb` and `tc`.
fn next_trios(
    ta: &BaseTrio,
    tb: &BaseTrio,
    tc: &BaseTrio,
    make: &impl Fn([Point; 3]) -> Result<TrioDetails>,
) -> Result<Vec<TrioDetails>> {
    let same_bc = tb == tc;
    let mut res = Vec::with_capacity(6);

    // slot 0 has no Z, slot 1 no Y, slot 2 no X
    let axes: [[usize; 2]; 3] = [[0, 1], [0, 2], [1, 2]];
    let firsts = [X_FIRST, Y_FIRST, Z_FIRST];
    for (slot, [a1, a2]) in axes.into_iter().enumerate() {
        let v = ta.0[slot];
        let bridge = |axis: usize, other: &BaseTrio| -> Result<Point> {
            let positive = v.0[axis] > 0;
            let ud = UnitDirection::from_axis(axis, positive);
            let first = if positive { firsts[axis] } else { -firsts[axis] };
            Ok(first + other.vector_towards(ud.opposite())? - v)
        };
        let b1 = bridge(a1, tb)?;
        let b2 = bridge(a2, tb)?;
        if same_bc {
            res.push(make([-v, b1, b2])?);
        } else {
            let c1 = bridge(a1, tc)?;
            let c2 = bridge(a2, tc)?;
            res.push(make([-v, b1, c2])?);
            res.push(make([-v, c1, b2])?);
        }
    }
    Ok(res)
}

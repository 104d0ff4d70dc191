//! # Local Cells
//!
//! Around every main point, a growth rule assigns base trios to the point
//! itself, its 6 face neighbors and its 12 edge neighbors. That 19-trio
//! [`CellSignature`] fully determines how paths cross the cell, so it is
//! memoized: each distinct (rule, signature) gets a stable [`CellId`], and
//! each cell id owns one [`PathBuilderTree`] computed on first use.
//!
//! ```text
//! (rule, offset, main point) ──signature──▶ CellId ──memo──▶ PathBuilderTree
//! ```

pub mod builder;

use std::fmt;
use std::sync::{Arc, OnceLock};

use hashbrown::{HashMap, HashSet};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogSet, GrowthFamily, GrowthRuleId, TrioIndex};
use crate::point::{Point, UnitDirection, THREE};
use crate::{Error, Result};
use builder::{BuilderRef, PathBuilderTree};

/// Distinct cells over all 52 growth rules.
pub const TOTAL_CELLS: usize = 5192;

const MAX_DISCOVERY_RADIUS: i32 = 30;

/// Edge neighbors in signature order.
pub const EDGE_DIRECTIONS: [(UnitDirection, UnitDirection); 12] = {
    use UnitDirection::*;
    [
        (PlusX, PlusY), (PlusX, MinusY), (PlusX, PlusZ), (PlusX, MinusZ),
        (MinusX, PlusY), (MinusX, MinusY), (MinusX, PlusZ), (MinusX, MinusZ),
        (PlusY, PlusZ), (PlusY, MinusZ), (MinusY, PlusZ), (MinusY, MinusZ),
    ]
};

// ============================================================================
// Identifiers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId(pub u16);

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{:04}", self.0)
    }
}

/// Trio assignments around one main point, ordered center, faces, edges so
/// the derived ordering is the lexicographic one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellSignature {
    pub center: TrioIndex,
    pub faces: [TrioIndex; 6],
    pub edges: [TrioIndex; 12],
}

impl CellSignature {
    pub fn compute(catalogs: &CatalogSet, rule: GrowthRuleId, offset: usize, main_point: Point) -> Result<Self> {
        let rule = catalogs.growth_rules().get(rule)?;
        let tables = catalogs.permutations();
        let at = |p: Point| rule.trio_at(tables, offset, p);

        let center = at(main_point)?;
        let mut faces = [TrioIndex::NIL; 6];
        for ud in UnitDirection::ALL {
            faces[ud.index()] = at(main_point + ud.first_point())?;
        }
        let mut edges = [TrioIndex::NIL; 12];
        for (i, (ud1, ud2)) in EDGE_DIRECTIONS.iter().enumerate() {
            edges[i] = at(main_point + ud1.first_point() + ud2.first_point())?;
        }
        Ok(Self { center, faces, edges })
    }

    pub fn face(&self, ud: UnitDirection) -> TrioIndex {
        self.faces[ud.index()]
    }

    pub fn edge(&self, ud1: UnitDirection, ud2: UnitDirection) -> Result<TrioIndex> {
        Ok(self.edges[middle_edge_index(ud1, ud2)?])
    }
}

/// Position of the edge neighbor reached by `ud1` then `ud2` in
/// [`EDGE_DIRECTIONS`]. The two directions must lie on different axes.
pub fn middle_edge_index(ud1: UnitDirection, ud2: UnitDirection) -> Result<usize> {
    if ud1.axis() == ud2.axis() {
        return Err(Error::Inconsistent(format!(
            "cannot find middle edge for {} and {} on the same axis", ud1, ud2
        )));
    }
    let (a, b) = if ud1 < ud2 { (ud1, ud2) } else { (ud2, ud1) };
    let b = b.index();
    Ok(match a {
        UnitDirection::PlusX => b - 2,
        UnitDirection::MinusX => 4 + b - 2,
        UnitDirection::PlusY => 8 + b - 4,
        UnitDirection::MinusY => 10 + b - 4,
        _ => {
            return Err(Error::Inconsistent(format!("no middle edge for {} and {}", ud1, ud2)));
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellKey {
    pub rule: GrowthRuleId,
    pub signature: CellSignature,
}

// ============================================================================
// Cell directory
// ============================================================================

/// Every (rule, signature) reachable under any offset, numbered from 1.
#[derive(Debug)]
struct CellDirectory {
    by_key: HashMap<CellKey, CellId>,
    keys: Vec<CellKey>,
}

impl CellDirectory {
    fn discover(catalogs: &CatalogSet) -> Result<Self> {
        let mut keys = Vec::with_capacity(TOTAL_CELLS);
        let mut per_family: HashMap<GrowthFamily, usize> = HashMap::new();

        for rule in catalogs.growth_rules().iter() {
            let mut found: HashSet<CellSignature> = HashSet::new();
            for offset in 0..rule.family.max_offset() {
                found.extend(discover_offset(catalogs, rule.id, offset)?);
            }
            let mut sorted: Vec<CellSignature> = found.into_iter().collect();
            sorted.sort();
            *per_family.entry(rule.family).or_default() += sorted.len();
            tracing::debug!(rule = %rule, cells = sorted.len(), "discovered cells");
            keys.extend(sorted.into_iter().map(|signature| CellKey { rule: rule.id, signature }));
        }

        if keys.len() != TOTAL_CELLS {
            return Err(Error::Inconsistent(format!(
                "expected {} cells, discovered {}", TOTAL_CELLS, keys.len()
            )));
        }
        for family in GrowthFamily::ALL {
            tracing::info!(
                family = family.value(),
                cells = per_family.get(&family).copied().unwrap_or(0),
                "cell discovery"
            );
        }

        let by_key = keys
            .iter()
            .enumerate()
            .map(|(i, key)| (*key, CellId(i as u16 + 1)))
            .collect();
        Ok(Self { by_key, keys })
    }

    fn key(&self, id: CellId) -> Result<&CellKey> {
        (id.0 as usize)
            .checked_sub(1)
            .and_then(|i| self.keys.get(i))
            .ok_or_else(|| Error::UnknownCell(id.to_string()))
    }
}

/// Signatures of the main points in cubes of growing radius around the
/// origin, until one more ring brings nothing new.
fn discover_offset(catalogs: &CatalogSet, rule: GrowthRuleId, offset: usize) -> Result<HashSet<CellSignature>> {
    let mut found = HashSet::new();
    let mut last_count = 0;
    for radius in 0..=MAX_DISCOVERY_RADIUS {
        for x in -radius..=radius {
            for y in -radius..=radius {
                for z in -radius..=radius {
                    if x.abs().max(y.abs()).max(z.abs()) != radius {
                        continue;
                    }
                    let p = Point::new(x, y, z).mul(THREE);
                    found.insert(CellSignature::compute(catalogs, rule, offset, p)?);
                }
            }
        }
        if radius >= 2 && found.len() == last_count {
            return Ok(found);
        }
        last_count = found.len();
    }
    Err(Error::Inconsistent(format!(
        "cell discovery for rule {} offset {} did not settle within radius {}",
        rule, offset, MAX_DISCOVERY_RADIUS
    )))
}

// ============================================================================
// LocalCellCache
// ============================================================================

/// Cell directory plus lazily synthesized builder trees, shared by every
/// growth run over the same catalogs.
pub struct LocalCellCache {
    catalogs: Arc<CatalogSet>,
    directory: OnceLock<CellDirectory>,
    discovery: Mutex<()>,
    trees: RwLock<HashMap<CellId, Arc<PathBuilderTree>>>,
}

impl LocalCellCache {
    pub fn new(catalogs: Arc<CatalogSet>) -> Self {
        Self {
            catalogs,
            directory: OnceLock::new(),
            discovery: Mutex::new(()),
            trees: RwLock::new(HashMap::new()),
        }
    }

    pub fn catalogs(&self) -> &Arc<CatalogSet> {
        &self.catalogs
    }

    fn directory(&self) -> Result<&CellDirectory> {
        if let Some(dir) = self.directory.get() {
            return Ok(dir);
        }
        let _guard = self.discovery.lock();
        if let Some(dir) = self.directory.get() {
            return Ok(dir);
        }
        let dir = CellDirectory::discover(&self.catalogs)?;
        Ok(self.directory.get_or_init(|| dir))
    }

    pub fn nb_cells(&self) -> Result<usize> {
        Ok(self.directory()?.keys.len())
    }

    /// All cell keys in id order; the key of cell `i` is at `i - 1`.
    pub fn cell_keys(&self) -> Result<&[CellKey]> {
        Ok(&self.directory()?.keys)
    }

    pub fn cell_key(&self, id: CellId) -> Result<CellKey> {
        self.directory()?.key(id).copied()
    }

    pub fn cell_id(&self, rule: GrowthRuleId, offset: usize, main_point: Point) -> Result<CellId> {
        let signature = CellSignature::compute(&self.catalogs, rule, offset, main_point)?;
        let key = CellKey { rule, signature };
        self.directory()?
            .by_key
            .get(&key)
            .copied()
            .ok_or_else(|| Error::UnknownCell(format!("rule {} offset {} at {}", rule, offset, main_point)))
    }

    /// The tree of `id` if it was already synthesized.
    pub fn cached_tree(&self, id: CellId) -> Option<Arc<PathBuilderTree>> {
        self.trees.read().get(&id).cloned()
    }

    /// The tree of `id`, synthesizing it on first request. Two callers racing
    /// on the same id may both compute it; the first insert wins.
    pub fn tree(&self, id: CellId) -> Result<Arc<PathBuilderTree>> {
        if let Some(tree) = self.cached_tree(id) {
            return Ok(tree);
        }
        let key = self.cell_key(id)?;
        let computed = Arc::new(PathBuilderTree::synthesize(&self.catalogs, id, &key)?);
        let mut trees = self.trees.write();
        Ok(Arc::clone(trees.entry(id).or_insert(computed)))
    }

    pub fn nb_cached_trees(&self) -> usize {
        self.trees.read().len()
    }

    /// Root builder of the cell at `main_point`.
    pub fn builder_for(&self, rule: GrowthRuleId, offset: usize, main_point: Point) -> Result<BuilderRef> {
        let id = self.cell_id(rule, offset, main_point)?;
        Ok(BuilderRef::root(self.tree(id)?))
    }
}

impl fmt::Debug for LocalCellCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCellCache")
            .field("discovered", &self.directory.get().is_some())
            .field("cached_trees", &self.nb_cached_trees())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cache() -> LocalCellCache {
        LocalCellCache::new(Arc::new(CatalogSet::derive().unwrap()))
    }

    #[test]
    fn test_middle_edge_index() {
        use UnitDirection::*;
        for (i, (a, b)) in EDGE_DIRECTIONS.iter().enumerate() {
            assert_eq!(middle_edge_index(*a, *b).unwrap(), i);
            assert_eq!(middle_edge_index(*b, *a).unwrap(), i);
        }
        assert!(middle_edge_index(PlusX, MinusX).is_err());
        assert!(middle_edge_index(PlusZ, PlusZ).is_err());
    }

    #[test]
    fn test_constant_rule_signature() {
        let set = CatalogSet::derive().unwrap();
        let rule = set.growth_rules().by_family(1, 2).unwrap().id;
        let sig = CellSignature::compute(&set, rule, 0, Point::new(3, -3, 0)).unwrap();
        assert_eq!(sig.center, TrioIndex(2));
        assert!(sig.faces.iter().chain(sig.edges.iter()).all(|t| *t == TrioIndex(2)));
    }

    #[test]
    fn test_discovery_totals() {
        let cache = cache();
        assert_eq!(cache.nb_cells().unwrap(), TOTAL_CELLS);
        let keys = cache.cell_keys().unwrap();
        let count = |family: u8| {
            keys.iter()
                .filter(|k| cache.catalogs().growth_rules().get(k.rule).unwrap().family.value() == family)
                .count()
        };
        assert_eq!(count(1), 8);
        assert_eq!(count(2), 24);
        assert_eq!(count(3), 1272);
        assert_eq!(count(4), 1296);
        assert_eq!(count(8), 2592);
    }

    #[test]
    fn test_cell_ids_are_stable_and_sorted() {
        let cache = cache();
        let keys = cache.cell_keys().unwrap();
        for w in keys.windows(2) {
            assert!(w[0].rule < w[1].rule || (w[0].rule == w[1].rule && w[0].signature < w[1].signature));
        }
        let first = cache.cell_key(CellId(1)).unwrap();
        assert_eq!(first.rule, GrowthRuleId(0));
        assert!(cache.cell_key(CellId(0)).is_err());
        assert!(cache.cell_key(CellId(TOTAL_CELLS as u16 + 1)).is_err());
    }

    #[test]
    fn test_far_points_resolve_to_known_cells() {
        let cache = cache();
        let rule = cache.catalogs().growth_rules().by_family(8, 3).unwrap().id;
        for offset in 0..8 {
            for p in [Point::new(-27, 42, 9), Point::new(99, -99, 3), Point::new(0, 0, -300)] {
                assert!(cache.cell_id(rule, offset, p).is_ok());
            }
        }
        assert!(cache.cell_id(rule, 0, Point::new(1, 0, 0)).is_err());
    }

    #[test]
    fn test_tree_memoized() {
        let cache = cache();
        let id = CellId(1);
        assert!(cache.cached_tree(id).is_none());
        let a = cache.tree(id).unwrap();
        let b = cache.cached_tree(id).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.nb_cached_trees(), 1);
    }
}

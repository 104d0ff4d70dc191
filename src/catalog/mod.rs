//! # Lattice Catalogs
//!
//! The fixed, symmetry-derived tables every growth run shares:
//!
//! | Table | Module | Size |
//! |-------|--------|------|
//! | Connections | `connection` | 50 |
//! | Trios | `trio` | 200 |
//! | Permutations | `permutation` | 12 pairs, 12 + 12 cycles |
//! | Growth rules | `growth` | 52 |
//!
//! Everything here is derived once, single-threaded, and read-only afterwards.
//! A [`CatalogEnv`] owns the lazily computed [`CatalogSet`] and hands out
//! `Arc` clones of it.

pub mod connection;
pub mod trio;
pub mod permutation;
pub mod growth;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::point::Point;
use crate::Result;

pub use connection::{ConnectionCatalog, ConnectionDetails, ConnectionId, NB_CONNECTIONS};
pub use trio::{BaseTrio, TrioCatalog, TrioDetails, TrioIndex, NB_BASE_TRIOS, NB_TRIOS};
pub use permutation::PermutationTables;
pub use growth::{GrowthFamily, GrowthRule, GrowthRuleId, GrowthRules, NB_GROWTH_RULES};

// ============================================================================
// CatalogSet
// ============================================================================

/// Connections, trios, permutations and growth rules, fully derived.
#[derive(Debug, Clone)]
pub struct CatalogSet {
    base: [BaseTrio; NB_BASE_TRIOS],
    connections: ConnectionCatalog,
    trios: TrioCatalog,
    permutations: PermutationTables,
    growth_rules: GrowthRules,
}

impl CatalogSet {
    /// Run the full derivation. Deterministic: two calls produce identical
    /// catalogs.
    pub fn derive() -> Result<Self> {
        let base = trio::base_trios()?;
        let connections = ConnectionCatalog::derive(&base)?;
        let trios = TrioCatalog::derive(&base, &connections)?;
        let permutations = PermutationTables::derive()?;
        let growth_rules = GrowthRules::derive()?;
        tracing::info!(
            connections = connections.len(),
            trios = trios.len(),
            growth_rules = growth_rules.len(),
            "lattice catalogs derived"
        );
        Ok(Self { base, connections, trios, permutations, growth_rules })
    }

    pub fn base_trios(&self) -> &[BaseTrio; NB_BASE_TRIOS] {
        &self.base
    }

    pub fn connections(&self) -> &ConnectionCatalog {
        &self.connections
    }

    pub fn trios(&self) -> &TrioCatalog {
        &self.trios
    }

    pub fn permutations(&self) -> &PermutationTables {
        &self.permutations
    }

    pub fn growth_rules(&self) -> &GrowthRules {
        &self.growth_rules
    }

    pub fn connection(&self, id: ConnectionId) -> Result<&ConnectionDetails> {
        self.connections.get(id)
    }

    pub fn trio(&self, idx: TrioIndex) -> Result<&TrioDetails> {
        self.trios.get(idx)
    }

    /// Base trio index assigned by `rule` to `main_point`.
    pub fn trio_at(&self, rule: GrowthRuleId, offset: usize, main_point: Point) -> Result<TrioIndex> {
        self.growth_rules.get(rule)?.trio_at(&self.permutations, offset, main_point)
    }
}

// ============================================================================
// CatalogEnv
// ============================================================================

/// Owner of a lazily derived [`CatalogSet`]. The first call to
/// [`CatalogEnv::catalogs`] runs the derivation; later calls share it.
#[derive(Debug, Default)]
pub struct CatalogEnv {
    computed: Mutex<Option<Arc<CatalogSet>>>,
}

impl CatalogEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn catalogs(&self) -> Result<Arc<CatalogSet>> {
        let mut guard = self.computed.lock();
        if let Some(set) = guard.as_ref() {
            return Ok(Arc::clone(set));
        }
        let set = Arc::new(CatalogSet::derive()?);
        *guard = Some(Arc::clone(&set));
        Ok(set)
    }

    pub fn is_computed(&self) -> bool {
        self.computed.lock().is_some()
    }
}

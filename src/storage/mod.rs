//! # Catalog Store
//!
//! The contract between the lattice catalogs and whatever keeps a copy of
//! them. Catalogs are persisted once as four flat tables:
//!
//! | Table | Row | Expected rows |
//! |-------|-----|---------------|
//! | connections | [`ConnectionRow`] | 50 |
//! | trios | [`TrioRow`] | 200 |
//! | growth rules | [`GrowthRuleRow`] | 52 |
//! | cells | [`CellRow`] | 5192 |
//!
//! Inserts are idempotent: a row already present with the same content is
//! skipped, a row present with different content is an error.
//!
//! ## Implementations
//!
//! | Store | Module | Description |
//! |-------|--------|-------------|
//! | `MemoryStore` | `memory` | In-memory, for tests and embedding |

pub mod memory;

use std::fmt;

use async_trait::async_trait;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::catalog::{
    CatalogSet, ConnectionDetails, GrowthRule, GrowthRuleId, TrioDetails,
    NB_CONNECTIONS, NB_GROWTH_RULES, NB_TRIOS,
};
use crate::cell::{CellId, CellKey, CellSignature, LocalCellCache, TOTAL_CELLS};
use crate::{Error, Result};

pub use memory::MemoryStore;

// ============================================================================
// Tables and rows
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CatalogTable {
    Connections,
    Trios,
    GrowthRules,
    Cells,
}

impl CatalogTable {
    pub const ALL: [CatalogTable; 4] = [
        CatalogTable::Connections,
        CatalogTable::Trios,
        CatalogTable::GrowthRules,
        CatalogTable::Cells,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CatalogTable::Connections => "connection_details",
            CatalogTable::Trios => "trio_details",
            CatalogTable::GrowthRules => "growth_rules",
            CatalogTable::Cells => "local_cells",
        }
    }

    pub fn expected_count(self) -> usize {
        match self {
            CatalogTable::Connections => 2 * NB_CONNECTIONS,
            CatalogTable::Trios => NB_TRIOS,
            CatalogTable::GrowthRules => NB_GROWTH_RULES,
            CatalogTable::Cells => TOTAL_CELLS,
        }
    }
}

impl fmt::Display for CatalogTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionRow {
    pub id: i8,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub squared_distance: i64,
}

impl From<&ConnectionDetails> for ConnectionRow {
    fn from(cd: &ConnectionDetails) -> Self {
        Self {
            id: cd.id.0,
            x: cd.vector.x(),
            y: cd.vector.y(),
            z: cd.vector.z(),
            squared_distance: cd.squared_distance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrioRow {
    pub id: u8,
    pub conns: [i8; 3],
}

impl From<&TrioDetails> for TrioRow {
    fn from(td: &TrioDetails) -> Self {
        Self { id: td.id.0, conns: td.conn_ids().map(|c| c.0) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GrowthRuleRow {
    pub id: u8,
    pub family: u8,
    pub index: u8,
}

impl From<&GrowthRule> for GrowthRuleRow {
    fn from(rule: &GrowthRule) -> Self {
        Self { id: rule.id.0, family: rule.family.value(), index: rule.index as u8 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellRow {
    pub id: u16,
    pub rule: u8,
    pub signature: CellSignature,
}

impl CellRow {
    pub fn new(id: CellId, key: &CellKey) -> Self {
        Self { id: id.0, rule: key.rule.0, signature: key.signature }
    }

    pub fn key(&self) -> CellKey {
        CellKey { rule: GrowthRuleId(self.rule), signature: self.signature }
    }
}

// ============================================================================
// CatalogStore trait
// ============================================================================

/// Bulk, idempotent persistence of the catalog tables. Every insert returns
/// the number of rows actually added.
#[async_trait]
pub trait CatalogStore: Send + Sync + 'static {
    async fn insert_connections(&self, rows: &[ConnectionRow]) -> Result<usize>;

    async fn insert_trios(&self, rows: &[TrioRow]) -> Result<usize>;

    async fn insert_growth_rules(&self, rows: &[GrowthRuleRow]) -> Result<usize>;

    async fn insert_cells(&self, rows: &[CellRow]) -> Result<usize>;

    async fn count(&self, table: CatalogTable) -> Result<usize>;

    /// All cell rows, ordered by id.
    async fn cells(&self) -> Result<Vec<CellRow>>;

    /// Every table holds exactly its expected number of rows.
    async fn verify_counts(&self) -> Result<()> {
        for table in CatalogTable::ALL {
            let got = self.count(table).await?;
            if got != table.expected_count() {
                return Err(Error::CountMismatch {
                    table: table.name().to_string(),
                    expected: table.expected_count(),
                    got,
                });
            }
        }
        Ok(())
    }
}

/// Rows added per table by one [`persist_catalogs`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistReport {
    pub connections: usize,
    pub trios: usize,
    pub growth_rules: usize,
    pub cells: usize,
}

impl PersistReport {
    pub fn total(&self) -> usize {
        self.connections + self.trios + self.growth_rules + self.cells
    }
}

/// Save all four catalog tables and check the resulting counts. Running it
/// again on the same store adds nothing.
pub async fn persist_catalogs<S: CatalogStore + ?Sized>(
    store: &S,
    catalogs: &CatalogSet,
    cells: &LocalCellCache,
) -> Result<PersistReport> {
    let connections: Vec<ConnectionRow> = catalogs.connections().iter().map(ConnectionRow::from).collect();
    let trios: Vec<TrioRow> = catalogs.trios().iter().map(TrioRow::from).collect();
    let rules: Vec<GrowthRuleRow> = catalogs.growth_rules().iter().map(GrowthRuleRow::from).collect();
    let cell_rows: Vec<CellRow> = cells
        .cell_keys()?
        .iter()
        .enumerate()
        .map(|(i, key)| CellRow::new(CellId(i as u16 + 1), key))
        .collect();

    let report = PersistReport {
        connections: store.insert_connections(&connections).await?,
        trios: store.insert_trios(&trios).await?,
        growth_rules: store.insert_growth_rules(&rules).await?,
        cells: store.insert_cells(&cell_rows).await?,
    };
    store.verify_counts().await?;
    tracing::info!(added = report.total(), "catalogs persisted");
    Ok(report)
}

/// Rebuild the cell id table from a store.
pub async fn load_cells<S: CatalogStore + ?Sized>(store: &S) -> Result<HashMap<CellId, CellKey>> {
    let rows = store.cells().await?;
    let mut res = HashMap::with_capacity(rows.len());
    for row in rows {
        if res.insert(CellId(row.id), row.key()).is_some() {
            return Err(Error::Storage(format!("duplicate cell id {}", row.id)));
        }
    }
    Ok(res)
}

//! In-memory catalog store.
//!
//! Reference implementation of [`CatalogStore`]: one map per table behind a
//! `parking_lot::RwLock`. Each bulk insert holds its table's write lock for
//! the whole batch, so a batch is applied entirely or not at all.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::{Error, Result};
use super::{CatalogStore, CatalogTable, CellRow, ConnectionRow, GrowthRuleRow, TrioRow};

// ============================================================================
// MemoryStore
// ============================================================================

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    connections: RwLock<HashMap<i8, ConnectionRow>>,
    trios: RwLock<HashMap<u8, TrioRow>>,
    growth_rules: RwLock<HashMap<u8, GrowthRuleRow>>,
    cells: RwLock<HashMap<u16, CellRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Insert the rows missing from `table`. Fails without touching the table if
/// a row conflicts with a stored one or with another row of the batch.
fn insert_rows<K, R>(
    table: &RwLock<HashMap<K, R>>,
    name: CatalogTable,
    rows: &[R],
    key: impl Fn(&R) -> K,
) -> Result<usize>
where
    K: Eq + Hash + Copy + Debug,
    R: Clone + PartialEq,
{
    let mut guard = table.write();
    let mut fresh: HashMap<K, &R> = HashMap::new();
    for row in rows {
        let k = key(row);
        match guard.get(&k).or_else(|| fresh.get(&k).copied()) {
            Some(existing) if existing == row => {}
            Some(_) => {
                return Err(Error::Storage(format!("{}: row {:?} differs from an earlier one", name, k)));
            }
            None => {
                fresh.insert(k, row);
            }
        }
    }
    let added = fresh.len();
    guard.extend(fresh.into_iter().map(|(k, r)| (k, r.clone())));
    tracing::debug!(table = %name, added, skipped = rows.len() - added, "bulk insert");
    Ok(added)
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn insert_connections(&self, rows: &[ConnectionRow]) -> Result<usize> {
        insert_rows(&self.inner.connections, CatalogTable::Connections, rows, |r| r.id)
    }

    async fn insert_trios(&self, rows: &[TrioRow]) -> Result<usize> {
        insert_rows(&self.inner.trios, CatalogTable::Trios, rows, |r| r.id)
    }

    async fn insert_growth_rules(&self, rows: &[GrowthRuleRow]) -> Result<usize> {
        insert_rows(&self.inner.growth_rules, CatalogTable::GrowthRules, rows, |r| r.id)
    }

    async fn insert_cells(&self, rows: &[CellRow]) -> Result<usize> {
        insert_rows(&self.inner.cells, CatalogTable::Cells, rows, |r| r.id)
    }

    async fn count(&self, table: CatalogTable) -> Result<usize> {
        Ok(match table {
            CatalogTable::Connections => self.inner.connections.read().len(),
            CatalogTable::Trios => self.inner.trios.read().len(),
            CatalogTable::GrowthRules => self.inner.growth_rules.read().len(),
            CatalogTable::Cells => self.inner.cells.read().len(),
        })
    }

    async fn cells(&self) -> Result<Vec<CellRow>> {
        let mut rows: Vec<CellRow> = self.inner.cells.read().values().copied().collect();
        rows.sort_by_key(|r| r.id);
        Ok(rows)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("connections", &self.inner.connections.read().len())
            .field("trios", &self.inner.trios.read().len())
            .field("growth_rules", &self.inner.growth_rules.read().len())
            .field("cells", &self.inner.cells.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(id: u8) -> GrowthRuleRow {
        GrowthRuleRow { id, family: 1, index: id }
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let store = MemoryStore::new();
        assert_eq!(store.insert_growth_rules(&[row(0), row(1)]).await.unwrap(), 2);
        assert_eq!(store.insert_growth_rules(&[row(0), row(1), row(2)]).await.unwrap(), 1);
        assert_eq!(store.count(CatalogTable::GrowthRules).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_conflicting_row_rejects_batch() {
        let store = MemoryStore::new();
        store.insert_growth_rules(&[row(0)]).await.unwrap();
        let bad = GrowthRuleRow { id: 0, family: 8, index: 0 };
        let res = store.insert_growth_rules(&[row(5), bad]).await;
        assert!(matches!(res, Err(Error::Storage(_))));
        assert_eq!(store.count(CatalogTable::GrowthRules).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_conflict_inside_one_batch() {
        let store = MemoryStore::new();
        let bad = GrowthRuleRow { id: 3, family: 2, index: 0 };
        let res = store.insert_growth_rules(&[row(2), row(3), bad]).await;
        assert!(matches!(res, Err(Error::Storage(_))));
        assert_eq!(store.count(CatalogTable::GrowthRules).await.unwrap(), 0);

        // Repeating an identical row in one batch is fine.
        assert_eq!(store.insert_growth_rules(&[row(3), row(3)]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_verify_counts_on_empty_store() {
        let store = MemoryStore::new();
        match store.verify_counts().await {
            Err(Error::CountMismatch { table, expected, got }) => {
                assert_eq!(table, "connection_details");
                assert_eq!(expected, 50);
                assert_eq!(got, 0);
            }
            other => panic!("expected count mismatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_clones_share_tables() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.insert_trios(&[TrioRow { id: 0, conns: [1, 2, 3] }]).await.unwrap();
        assert_eq!(other.count(CatalogTable::Trios).await.unwrap(), 1);
    }
}

//! End-to-end tests for catalog persistence and graph export.

use std::sync::Arc;

use lattice_growth::export::{graph_rows, write_json_lines};
use lattice_growth::point::ORIGIN;
use lattice_growth::storage::{load_cells, persist_catalogs, CatalogTable, CellRow, PersistReport};
use lattice_growth::{
    CatalogEnv, CatalogStore, CellId, Error, GrowthConfig, LocalCellCache, MemoryStore, PathGraph,
    PathNodeRow,
};
use pretty_assertions::assert_eq;

// ============================================================================
// 1. Persist once, persist again: nothing added the second time
// ============================================================================

#[tokio::test]
async fn test_persist_catalogs_is_idempotent() {
    let env = CatalogEnv::new();
    let catalogs = env.catalogs().unwrap();
    let cells = LocalCellCache::new(Arc::clone(&catalogs));
    let store = MemoryStore::new();

    let first = persist_catalogs(&store, &catalogs, &cells).await.unwrap();
    assert_eq!(
        first,
        PersistReport { connections: 50, trios: 200, growth_rules: 52, cells: 5192 }
    );
    let second = persist_catalogs(&store, &catalogs, &cells).await.unwrap();
    assert_eq!(second, PersistReport::default());

    store.verify_counts().await.unwrap();
    for table in CatalogTable::ALL {
        assert_eq!(store.count(table).await.unwrap(), table.expected_count());
    }
}

// ============================================================================
// 2. Cells read back from the store match the cache
// ============================================================================

#[tokio::test]
async fn test_load_cells_rebuilds_directory() {
    let env = CatalogEnv::new();
    let catalogs = env.catalogs().unwrap();
    let cells = LocalCellCache::new(Arc::clone(&catalogs));
    let store = MemoryStore::new();
    persist_catalogs(&store, &catalogs, &cells).await.unwrap();

    let loaded = load_cells(&store).await.unwrap();
    assert_eq!(loaded.len(), 5192);
    for id in [1u16, 2, 100, 2600, 5192] {
        assert_eq!(loaded[&CellId(id)], cells.cell_key(CellId(id)).unwrap());
    }
}

// ============================================================================
// 3. Partial stores fail verification
// ============================================================================

#[tokio::test]
async fn test_partial_store_fails_verification() {
    let env = CatalogEnv::new();
    let catalogs = env.catalogs().unwrap();
    let cells = LocalCellCache::new(Arc::clone(&catalogs));
    let store = MemoryStore::new();
    persist_catalogs(&store, &catalogs, &cells).await.unwrap();

    let partial = MemoryStore::new();
    let rows: Vec<CellRow> = store.cells().await.unwrap().into_iter().take(10).collect();
    partial.insert_cells(&rows).await.unwrap();
    assert!(matches!(partial.verify_counts().await, Err(Error::CountMismatch { .. })));
}

// ============================================================================
// 4. Graph export
// ============================================================================

#[test]
fn test_export_graph_as_json_lines() {
    let env = CatalogEnv::new();
    let cells = Arc::new(LocalCellCache::new(env.catalogs().unwrap()));
    let rule = cells.catalogs().growth_rules().by_family(4, 4).unwrap().id;
    let graph = PathGraph::new(cells, rule, 2, ORIGIN, GrowthConfig::default()).unwrap();
    graph.request_max_distance(5).unwrap();

    let mut out = Vec::new();
    let written = write_json_lines(&graph, &mut out).unwrap();
    assert_eq!(written, graph.nb_nodes());

    let text = String::from_utf8(out).unwrap();
    let rows: Vec<PathNodeRow> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(rows, graph_rows(&graph));
    assert!(rows.windows(2).all(|w| w[0].distance <= w[1].distance));
    for row in &rows {
        let node = graph.node(lattice_growth::PathNodeId(row.id)).unwrap();
        assert_eq!(row.mask, node.mask());
        assert_eq!(row.point, node.point().0);
    }
}

//! Path graph export: one JSON object per node.
//!
//! ```text
//! PathGraph → graph_rows() → PathNodeRow → write_json_lines() → .jsonl
//! ```
//!
//! Each row carries the node id, its point, distance, trio, the packed
//! 16-bit connection mask and the ids of the up to 3 linked nodes, in slot
//! order.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::path::{ConnectionState, PathGraph, PathNode};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathNodeRow {
    pub id: u64,
    pub point: [i32; 3],
    pub distance: u32,
    pub trio: u8,
    pub mask: u16,
    pub links: [Option<u64>; 3],
}

impl From<&PathNode> for PathNodeRow {
    fn from(node: &PathNode) -> Self {
        Self {
            id: node.id().0,
            point: node.point().0,
            distance: node.distance(),
            trio: node.trio().0,
            mask: node.mask(),
            links: node.links().map(|l| l.map(|id| id.0)),
        }
    }
}

impl PathNodeRow {
    pub fn state(&self, slot: usize) -> ConnectionState {
        ConnectionState::from_mask(self.mask, slot)
    }
}

/// Rows of every node, by distance then point.
pub fn graph_rows(graph: &PathGraph) -> Vec<PathNodeRow> {
    graph
        .nodes_between(0, graph.max_distance())
        .iter()
        .map(|n| PathNodeRow::from(n.as_ref()))
        .collect()
}

/// Write one JSON line per node. Returns the number of rows written.
pub fn write_json_lines(graph: &PathGraph, writer: &mut dyn Write) -> Result<usize> {
    let rows = graph_rows(graph);
    for row in &rows {
        serde_json::to_writer(&mut *writer, row)?;
        writeln!(writer)?;
    }
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::catalog::{CatalogSet, GrowthRuleId};
    use crate::cell::LocalCellCache;
    use crate::config::GrowthConfig;
    use crate::point::ORIGIN;
    use pretty_assertions::assert_eq;

    fn graph() -> PathGraph {
        let cells = Arc::new(LocalCellCache::new(Arc::new(CatalogSet::derive().unwrap())));
        let graph = PathGraph::new(cells, GrowthRuleId(0), 0, ORIGIN, GrowthConfig::default()).unwrap();
        graph.request_max_distance(2).unwrap();
        graph
    }

    #[test]
    fn test_root_row() {
        let graph = graph();
        let rows = graph_rows(&graph);
        assert_eq!(rows.len(), 10);
        let root = rows[0];
        assert_eq!(root.id, 1);
        assert_eq!(root.point, [0, 0, 0]);
        assert_eq!(root.mask, 0x222);
        assert!(root.links.iter().all(Option::is_some));
    }

    #[test]
    fn test_json_lines() {
        let graph = graph();
        let mut out = Vec::new();
        assert_eq!(write_json_lines(&graph, &mut out).unwrap(), 10);
        let text = String::from_utf8(out).unwrap();
        let rows: Vec<PathNodeRow> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(rows, graph_rows(&graph));
        for row in rows.iter().filter(|r| r.distance > 0) {
            let incoming = (0..3).filter(|s| row.state(*s) == ConnectionState::Incoming).count();
            assert_eq!(incoming, 1);
        }
    }
}

//! # Path Builder Trees
//!
//! Inside one cell, every path leaving the main point goes through exactly
//! two more steps before reaching a neighboring cell:
//!
//! ```text
//!            ┌── Last ──▶ next main point
//! Root ── Intermediate
//!            └── Last ──▶ next main point
//! ```
//!
//! A [`PathBuilderTree`] stores the 10 builders of one cell in a flat array:
//! slot 0 is the root, slots 1..=3 the intermediates (one per root
//! connection), slots 4..=9 the lasts (two per intermediate). A
//! [`BuilderRef`] points at one slot of one shared tree.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::catalog::{CatalogSet, ConnectionDetails, ConnectionId, GrowthRuleId, TrioIndex};
use crate::point::Point;
use crate::{Error, Result};
use super::{CellId, CellKey, LocalCellCache};

pub const NB_BUILDER_SLOTS: usize = 10;
pub const ROOT_SLOT: u8 = 0;

pub fn intermediate_slot(i: usize) -> u8 {
    1 + i as u8
}

pub fn last_slot(i: usize, j: usize) -> u8 {
    4 + 2 * i as u8 + j as u8
}

// ============================================================================
// Builders
// ============================================================================

/// Outgoing connection of a builder and the slot it leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathLink {
    pub conn: ConnectionId,
    pub slot: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathNodeBuilder {
    Root { trio: TrioIndex, links: [PathLink; 3] },
    Intermediate { trio: TrioIndex, links: [PathLink; 2] },
    /// Leaves the cell: `next_main` reaches the neighboring main point,
    /// `next_inter` an intermediate point of the neighboring cell.
    Last { trio: TrioIndex, next_main: ConnectionId, next_inter: ConnectionId },
}

impl PathNodeBuilder {
    pub fn trio(&self) -> TrioIndex {
        match self {
            PathNodeBuilder::Root { trio, .. }
            | PathNodeBuilder::Intermediate { trio, .. }
            | PathNodeBuilder::Last { trio, .. } => *trio,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PathNodeBuilder::Root { .. } => "root",
            PathNodeBuilder::Intermediate { .. } => "intermediate",
            PathNodeBuilder::Last { .. } => "last",
        }
    }

    fn links(&self) -> &[PathLink] {
        match self {
            PathNodeBuilder::Root { links, .. } => links,
            PathNodeBuilder::Intermediate { links, .. } => links,
            PathNodeBuilder::Last { .. } => &[],
        }
    }

    fn outgoing(&self) -> SmallVec<[ConnectionId; 3]> {
        match self {
            PathNodeBuilder::Last { next_main, next_inter, .. } => SmallVec::from_slice(&[*next_main, *next_inter]),
            _ => self.links().iter().map(|l| l.conn).collect(),
        }
    }
}

// ============================================================================
// PathBuilderTree
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathBuilderTree {
    pub cell: CellId,
    pub rule: GrowthRuleId,
    nodes: SmallVec<[PathNodeBuilder; NB_BUILDER_SLOTS]>,
}

impl PathBuilderTree {
    /// Build the tree of one cell from its 19 trio assignments. The
    /// geometry is computed as if the cell's main point were the origin.
    pub fn synthesize(catalogs: &CatalogSet, cell: CellId, key: &CellKey) -> Result<Self> {
        let sig = &key.signature;
        let connections = catalogs.connections();
        let center = catalogs.trio(sig.center)?;

        let mut root_links = [PathLink { conn: ConnectionId::INVALID, slot: 0 }; 3];
        let mut intermediates: SmallVec<[PathNodeBuilder; 3]> = SmallVec::new();
        let mut lasts: SmallVec<[PathNodeBuilder; 6]> = SmallVec::new();

        for (i, cd) in center.conns.iter().enumerate() {
            let inter_point = cd.vector;
            let mut inter_links = [PathLink { conn: ConnectionId::INVALID, slot: 0 }; 2];

            for (j, ud) in cd.directions()?.into_iter().enumerate() {
                let face = catalogs.trio(sig.face(ud))?;
                let back: &ConnectionDetails = face.opposite_connection(ud)?;
                let last_point = ud.first_point() + back.vector;
                let to_last = connections.between(inter_point, last_point)?.id;
                let next_main = back.neg_id();

                let back_dirs = back.directions()?;
                if !back_dirs.contains(&ud.opposite()) {
                    return Err(Error::Inconsistent(format!(
                        "{} of face {} does not come back along {}", back.id, face.id, ud
                    )));
                }
                let [first, second] = back_dirs;
                let bu = if first == ud.opposite() { second } else { first };
                let edge = catalogs.trio(sig.edge(ud, bu)?)?;
                let into_inter = edge.opposite_connection(bu)?;
                let target = ud.first_point() + bu.first_point() + into_inter.vector;
                let next_inter = connections.between(last_point, target)?.id;

                let trio = catalogs.trios().with_connections(to_last.neg(), next_inter, next_main)?.id;
                lasts.push(PathNodeBuilder::Last { trio, next_main, next_inter });
                inter_links[j] = PathLink { conn: to_last, slot: last_slot(i, j) };
            }

            let trio = catalogs
                .trios()
                .with_connections(cd.neg_id(), inter_links[0].conn, inter_links[1].conn)?
                .id;
            intermediates.push(PathNodeBuilder::Intermediate { trio, links: inter_links });
            root_links[i] = PathLink { conn: cd.id, slot: intermediate_slot(i) };
        }

        let mut nodes = SmallVec::new();
        nodes.push(PathNodeBuilder::Root { trio: center.id, links: root_links });
        nodes.extend(intermediates);
        nodes.extend(lasts);

        let tree = Self { cell, rule: key.rule, nodes };
        tree.verify(catalogs)?;
        Ok(tree)
    }

    /// Every builder uses connections of its own trio, each at most once,
    /// and every link points at a builder that starts with the reverse
    /// connection.
    pub fn verify(&self, catalogs: &CatalogSet) -> Result<()> {
        if self.nodes.len() != NB_BUILDER_SLOTS {
            return Err(Error::Inconsistent(format!(
                "cell {} has {} builders", self.cell, self.nodes.len()
            )));
        }
        for (slot, node) in self.nodes.iter().enumerate() {
            let trio = catalogs.trio(node.trio())?;
            let outgoing = node.outgoing();
            for (k, conn) in outgoing.iter().enumerate() {
                if !trio.has_connection(*conn) || outgoing[..k].contains(conn) {
                    return Err(Error::Inconsistent(format!(
                        "cell {} slot {}: {} builder cannot use {} on {}",
                        self.cell, slot, node.kind(), conn, trio
                    )));
                }
            }
            for link in node.links() {
                let target = self.node(link.slot)?;
                if !catalogs.trio(target.trio())?.has_connection(link.conn.neg()) {
                    return Err(Error::Inconsistent(format!(
                        "cell {} slot {}: link {} lands on a trio without {}",
                        self.cell, slot, link.conn, link.conn.neg()
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn node(&self, slot: u8) -> Result<&PathNodeBuilder> {
        self.nodes
            .get(slot as usize)
            .ok_or_else(|| Error::Navigation(format!("cell {} has no slot {}", self.cell, slot)))
    }

    pub fn nodes(&self) -> &[PathNodeBuilder] {
        &self.nodes
    }

    pub fn root(&self) -> Result<&PathNodeBuilder> {
        self.node(ROOT_SLOT)
    }
}

// ============================================================================
// BuilderRef
// ============================================================================

/// One slot of a shared [`PathBuilderTree`].
#[derive(Clone, PartialEq, Eq)]
pub struct BuilderRef {
    tree: Arc<PathBuilderTree>,
    slot: u8,
}

impl BuilderRef {
    pub fn root(tree: Arc<PathBuilderTree>) -> Self {
        Self { tree, slot: ROOT_SLOT }
    }

    pub fn at(tree: Arc<PathBuilderTree>, slot: u8) -> Result<Self> {
        tree.node(slot)?;
        Ok(Self { tree, slot })
    }

    pub fn tree(&self) -> &Arc<PathBuilderTree> {
        &self.tree
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    pub fn builder(&self) -> &PathNodeBuilder {
        // Slots are checked on construction.
        &self.tree.nodes[self.slot as usize]
    }

    pub fn trio(&self) -> TrioIndex {
        self.builder().trio()
    }

    pub fn is_root(&self) -> bool {
        self.slot == ROOT_SLOT
    }

    /// Follow `conn` from `from` (a point relative to the growth root).
    /// Returns the builder of the reached point and the point itself.
    /// From a last builder the step leaves the cell, so the neighbor cell's
    /// tree is looked up (and synthesized if needed) in `cache`.
    pub fn next(
        &self,
        cache: &LocalCellCache,
        offset: usize,
        from: Point,
        conn: ConnectionId,
    ) -> Result<(BuilderRef, Point)> {
        match *self.builder() {
            PathNodeBuilder::Root { links, .. } => self.follow(&links, cache, from, conn),
            PathNodeBuilder::Intermediate { links, .. } => self.follow(&links, cache, from, conn),
            PathNodeBuilder::Last { next_main, next_inter, .. } => {
                let catalogs = cache.catalogs();
                let main_point = from.nearest_main_point();
                let expected = from + catalogs.connection(next_main)?.vector;
                if main_point != expected {
                    return Err(Error::Navigation(format!(
                        "last point {} of cell {} expected main point {} got {}",
                        from, self.tree.cell, expected, main_point
                    )));
                }
                let next_root = cache.builder_for(self.tree.rule, offset, main_point)?;
                if conn == next_main {
                    return Ok((next_root, main_point));
                }
                if conn == next_inter {
                    let (inter, back) = next_root.next(cache, offset, main_point, next_main.neg())?;
                    if back != from {
                        return Err(Error::Navigation(format!(
                            "cell {} at {} does not lead back to {} via {}",
                            next_root.tree.cell, main_point, from, next_main.neg()
                        )));
                    }
                    return inter.next(cache, offset, from, conn);
                }
                Err(Error::Navigation(format!(
                    "last builder of cell {} has no connection {}", self.tree.cell, conn
                )))
            }
        }
    }

    fn follow(
        &self,
        links: &[PathLink],
        cache: &LocalCellCache,
        from: Point,
        conn: ConnectionId,
    ) -> Result<(BuilderRef, Point)> {
        let link = links.iter().find(|l| l.conn == conn).ok_or_else(|| {
            Error::Navigation(format!(
                "{} builder of cell {} has no connection {}",
                self.builder().kind(), self.tree.cell, conn
            ))
        })?;
        let vector = cache.catalogs().connection(conn)?.vector;
        Ok((BuilderRef::at(Arc::clone(&self.tree), link.slot)?, from + vector))
    }
}

impl fmt::Debug for BuilderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BuilderRef({} slot {} {})", self.tree.cell, self.slot, self.builder().kind())
    }
}

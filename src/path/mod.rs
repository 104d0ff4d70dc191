//! # Path Growth
//!
//! A [`PathGraph`] grows a tree of lattice points outward from a main point,
//! one distance at a time. Step `d → d+1` visits every node of frontier `d`
//! in parallel and resolves each of its unset slots:
//!
//! ```text
//! navigate builder ──▶ target point
//!   in a retained frontier (d-1, d)   → Blocked
//!   in frontier d+1                   → link
//!   anywhere else in the graph        → Blocked
//!   new                               → create at d+1, then link
//! ```
//!
//! A link sets `Incoming` on the target and `Outgoing` on the origin. Every
//! node except the root ends up with exactly one incoming slot; a link that
//! cannot be made blocks the origin slot and growth carries on.

pub mod node;

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::catalog::GrowthRuleId;
use crate::cell::LocalCellCache;
use crate::config::GrowthConfig;
use crate::index::ConcurrentPointIndex;
use crate::point::{Point, ORIGIN};
use crate::{Error, Result};

pub use node::{ConnectionState, LinkError, PathNode, PathNodeId};

type Frontier = ConcurrentPointIndex<Point, Arc<PathNode>>;

/// Expected size of frontier `d + 1` given the size of frontier `d`.
/// Frontiers grow roughly with the square of the distance.
pub fn predicted_size(d: u32, size: usize) -> usize {
    match d {
        0 => 3,
        1 => 6,
        _ => {
            let d = d as f64;
            let ratio = 1.0 + 2.0 / d + 1.0 / (d * d);
            let ratio = ratio * if d <= 16.0 {
                1.11
            } else if d <= 32.0 {
                1.04
            } else {
                1.02
            };
            (size as f64 * ratio) as usize
        }
    }
}

// ============================================================================
// Step statistics
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrowthStats {
    pub from_distance: u32,
    pub to_distance: u32,
    /// Nodes in the new frontier.
    pub nodes: usize,
    pub linked: usize,
    pub blocked: usize,
    /// Links refused because the target already had its incoming link.
    pub conflicts: usize,
    /// Frontier bookkeeping faults (distance mismatch, slot taken twice).
    pub faults: usize,
    pub contention: usize,
    pub hash_conflicts: usize,
}

#[derive(Default)]
struct StepCounters {
    linked: AtomicUsize,
    blocked: AtomicUsize,
    conflicts: AtomicUsize,
    faults: AtomicUsize,
    contention: AtomicUsize,
}

impl StepCounters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn into_stats(self, from_distance: u32, nodes: usize, hash_conflicts: usize) -> GrowthStats {
        GrowthStats {
            from_distance,
            to_distance: from_distance + 1,
            nodes,
            linked: self.linked.into_inner(),
            blocked: self.blocked.into_inner(),
            conflicts: self.conflicts.into_inner(),
            faults: self.faults.into_inner(),
            contention: self.contention.into_inner(),
            hash_conflicts,
        }
    }
}

// ============================================================================
// PathGraph
// ============================================================================

struct GrowthState {
    /// Most recent frontier indexes, oldest first. The last one is the
    /// frontier at `max_distance`.
    frontiers: VecDeque<Frontier>,
    /// Distance a step failed from. Slots of that frontier may already link
    /// to nodes that were never settled, so the graph grows no further.
    failed_from: Option<u32>,
}

pub struct PathGraph {
    cells: Arc<LocalCellCache>,
    rule: GrowthRuleId,
    offset: usize,
    root_point: Point,
    config: GrowthConfig,
    next_id: AtomicU64,
    growth: Mutex<GrowthState>,
    levels: RwLock<Vec<Vec<Arc<PathNode>>>>,
    settled: RwLock<HashMap<Point, Arc<PathNode>>>,
    by_id: RwLock<HashMap<PathNodeId, Arc<PathNode>>>,
    stats: Mutex<Vec<GrowthStats>>,
}

impl PathGraph {
    /// A graph holding only its root, at `root_point`. The root must be a
    /// main point; builders are looked up relative to it.
    pub fn new(
        cells: Arc<LocalCellCache>,
        rule: GrowthRuleId,
        offset: usize,
        root_point: Point,
        config: GrowthConfig,
    ) -> Result<Self> {
        config.validate()?;
        if !root_point.is_main_point() {
            return Err(Error::NotMainPoint(root_point));
        }
        let catalogs = Arc::clone(cells.catalogs());
        let rule_details = catalogs.growth_rules().get(rule)?;
        let builder = cells.builder_for(rule, offset, ORIGIN)?;

        let root = Arc::new(PathNode::new(&catalogs, PathNodeId(1), root_point, 0, builder)?);
        let frontier = Frontier::new(1, config.index_buckets, config.max_cas_retries);
        frontier.load_or_store(root_point, Arc::clone(&root))?;

        let mut settled = HashMap::new();
        settled.insert(root_point, Arc::clone(&root));
        let mut by_id = HashMap::new();
        by_id.insert(root.id(), Arc::clone(&root));

        tracing::info!(rule = %rule_details, offset, root = %root_point, "path graph created");

        Ok(Self {
            cells,
            rule,
            offset,
            root_point,
            config,
            next_id: AtomicU64::new(2),
            growth: Mutex::new(GrowthState { frontiers: VecDeque::from([frontier]), failed_from: None }),
            levels: RwLock::new(vec![vec![root]]),
            settled: RwLock::new(settled),
            by_id: RwLock::new(by_id),
            stats: Mutex::new(Vec::new()),
        })
    }

    pub fn rule(&self) -> GrowthRuleId {
        self.rule
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn config(&self) -> &GrowthConfig {
        &self.config
    }

    pub fn cells(&self) -> &Arc<LocalCellCache> {
        &self.cells
    }

    pub fn root(&self) -> Arc<PathNode> {
        Arc::clone(&self.levels.read()[0][0])
    }

    pub fn max_distance(&self) -> u32 {
        (self.levels.read().len() - 1) as u32
    }

    /// Grow until frontier `distance` exists. Concurrent callers are
    /// serialized; asking for a distance already reached is a no-op.
    /// Stops early if a frontier comes out empty.
    ///
    /// A failed step poisons the graph: the nodes already grown stay
    /// readable, but every later request fails.
    pub fn request_max_distance(&self, distance: u32) -> Result<u32> {
        self.grow_to(distance, |graph, state| graph.step(state))
    }

    /// True once a growth step has failed.
    pub fn is_poisoned(&self) -> bool {
        self.growth.lock().failed_from.is_some()
    }

    fn grow_to<S>(&self, distance: u32, mut step: S) -> Result<u32>
    where
        S: FnMut(&Self, &mut GrowthState) -> Result<GrowthStats>,
    {
        let mut state = self.growth.lock();
        if let Some(from) = state.failed_from {
            return Err(Error::Growth(format!("graph poisoned by a failed step from distance {}", from)));
        }
        while self.max_distance() < distance {
            let from = self.max_distance();
            let stats = match step(self, &mut *state) {
                Ok(stats) => stats,
                Err(e) => {
                    tracing::error!(from, error = %e, "growth step failed");
                    state.failed_from = Some(from);
                    return Err(e);
                }
            };
            if stats.nodes == 0 {
                tracing::warn!(distance = stats.to_distance, "growth stopped on an empty frontier");
                break;
            }
        }
        Ok(self.max_distance())
    }

    fn step(&self, state: &mut GrowthState) -> Result<GrowthStats> {
        let from_distance = self.max_distance();
        let current = state
            .frontiers
            .back()
            .ok_or_else(|| Error::Growth("no frontier to grow from".into()))?;

        let next = Frontier::new(
            predicted_size(from_distance, current.len()),
            self.config.index_buckets,
            self.config.max_cas_retries,
        );
        let counters = StepCounters::default();
        {
            let settled = self.settled.read();
            current.range(self.config.nb_workers, |_, node| {
                self.extend(node, &state.frontiers, &next, &settled, &counters)
            })?;
        }

        let mut level: Vec<Arc<PathNode>> = next.iter().map(|(_, n)| Arc::clone(n)).collect();
        level.sort_by_key(|n| n.point());
        {
            let mut settled = self.settled.write();
            let mut by_id = self.by_id.write();
            for node in &level {
                settled.insert(node.point(), Arc::clone(node));
                by_id.insert(node.id(), Arc::clone(node));
            }
        }

        let stats = counters.into_stats(from_distance, level.len(), next.hash_conflicts());

        self.levels.write().push(level);
        state.frontiers.push_back(next);
        while state.frontiers.len() > self.config.retention {
            state.frontiers.pop_front();
        }

        tracing::debug!(
            from = stats.from_distance,
            to = stats.to_distance,
            nodes = stats.nodes,
            blocked = stats.blocked,
            conflicts = stats.conflicts,
            "growth step"
        );
        self.stats.lock().push(stats.clone());
        Ok(stats)
    }

    /// Resolve every unset slot of one frontier node.
    fn extend(
        &self,
        node: &Arc<PathNode>,
        retained: &VecDeque<Frontier>,
        next: &Frontier,
        settled: &HashMap<Point, Arc<PathNode>>,
        counters: &StepCounters,
    ) -> Result<()> {
        let catalogs = self.cells.catalogs();
        for slot in 0..3 {
            if node.state(slot) != ConnectionState::Unset {
                continue;
            }
            let conn = node.connection(slot);
            let (builder, relative) =
                node.builder().next(&self.cells, self.offset, node.point() - self.root_point, conn)?;
            let point = relative + self.root_point;

            if retained.iter().any(|f| f.contains(&point)) {
                self.block(node, slot, counters);
                continue;
            }
            let target = match next.load(&point) {
                Some(existing) => Arc::clone(existing),
                None => {
                    if settled.contains_key(&point) {
                        self.block(node, slot, counters);
                        continue;
                    }
                    let id = PathNodeId(self.next_id.fetch_add(1, Ordering::Relaxed));
                    let tentative = Arc::new(PathNode::new(catalogs, id, point, node.distance() + 1, builder)?);
                    let inserted = next.load_or_store(point, tentative);
                    match self.settle_insert(node, slot, inserted, counters)? {
                        Some(winner) => winner,
                        None => continue,
                    }
                }
            };

            match target.set_incoming(conn.neg(), node) {
                Ok(_) => match node.set_outgoing(slot, target.id()) {
                    Ok(()) => StepCounters::bump(&counters.linked),
                    Err(e) => {
                        tracing::error!(node = %node, slot, error = %e, "outgoing slot taken twice");
                        StepCounters::bump(&counters.faults);
                    }
                },
                Err(e @ LinkError::DistanceMismatch { .. }) => {
                    tracing::error!(node = %node, target = %target, error = %e, "frontier distance fault");
                    StepCounters::bump(&counters.faults);
                    self.block(node, slot, counters);
                }
                Err(e) => {
                    tracing::debug!(node = %node, target = %target, error = %e, "link refused");
                    StepCounters::bump(&counters.conflicts);
                    self.block(node, slot, counters);
                }
            }
        }
        Ok(())
    }

    /// Node to link once a new target went into the next frontier.
    /// Contention blocks the origin slot; any other error aborts the step.
    fn settle_insert(
        &self,
        node: &PathNode,
        slot: usize,
        inserted: Result<(&Arc<PathNode>, bool)>,
        counters: &StepCounters,
    ) -> Result<Option<Arc<PathNode>>> {
        match inserted {
            Ok((winner, _)) => Ok(Some(Arc::clone(winner))),
            Err(Error::Contention { attempts }) => {
                tracing::warn!(node = %node, attempts, "frontier insert gave up");
                StepCounters::bump(&counters.contention);
                self.block(node, slot, counters);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn block(&self, node: &PathNode, slot: usize, counters: &StepCounters) {
        match node.set_blocked(slot) {
            Ok(()) => StepCounters::bump(&counters.blocked),
            Err(e) => {
                tracing::error!(node = %node, slot, error = %e, "cannot block slot");
                StepCounters::bump(&counters.faults);
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn nodes_at(&self, distance: u32) -> Vec<Arc<PathNode>> {
        self.levels.read().get(distance as usize).cloned().unwrap_or_default()
    }

    pub fn count_at(&self, distance: u32) -> usize {
        self.levels.read().get(distance as usize).map_or(0, Vec::len)
    }

    /// Nodes with `from <= distance <= to`, nearest first.
    pub fn nodes_between(&self, from: u32, to: u32) -> Vec<Arc<PathNode>> {
        let levels = self.levels.read();
        levels
            .iter()
            .enumerate()
            .filter(|(d, _)| (from as usize..=to as usize).contains(d))
            .flat_map(|(_, level)| level.iter().cloned())
            .collect()
    }

    pub fn count_between(&self, from: u32, to: u32) -> usize {
        let levels = self.levels.read();
        levels
            .iter()
            .enumerate()
            .filter(|(d, _)| (from as usize..=to as usize).contains(d))
            .map(|(_, level)| level.len())
            .sum()
    }

    pub fn nb_nodes(&self) -> usize {
        self.by_id.read().len()
    }

    pub fn node(&self, id: PathNodeId) -> Option<Arc<PathNode>> {
        self.by_id.read().get(&id).cloned()
    }

    pub fn node_at(&self, point: Point) -> Option<Arc<PathNode>> {
        self.settled.read().get(&point).cloned()
    }

    pub fn stats(&self) -> Vec<GrowthStats> {
        self.stats.lock().clone()
    }

    /// Human readable summary, one line per distance.
    pub fn dump_info(&self) -> String {
        let mut out = String::new();
        let rule = self
            .cells
            .catalogs()
            .growth_rules()
            .get(self.rule)
            .map(|r| r.to_string())
            .unwrap_or_else(|_| self.rule.to_string());
        let _ = writeln!(
            out,
            "{} offset {} root {}: {} nodes up to distance {}",
            rule,
            self.offset,
            self.root_point,
            self.nb_nodes(),
            self.max_distance()
        );
        let levels = self.levels.read();
        for (d, level) in levels.iter().enumerate() {
            let blocked: usize = level.iter().map(|n| n.count_state(ConnectionState::Blocked)).sum();
            let _ = writeln!(out, "  d={:3} nodes={:6} blocked={:6}", d, level.len(), blocked);
        }
        out
    }
}

impl std::fmt::Debug for PathGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathGraph")
            .field("rule", &self.rule)
            .field("offset", &self.offset)
            .field("root", &self.root_point)
            .field("max_distance", &self.max_distance())
            .field("nodes", &self.nb_nodes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogSet;
    use pretty_assertions::assert_eq;

    fn cells() -> Arc<LocalCellCache> {
        Arc::new(LocalCellCache::new(Arc::new(CatalogSet::derive().unwrap())))
    }

    fn counts(graph: &PathGraph) -> Vec<usize> {
        (0..=graph.max_distance()).map(|d| graph.count_at(d)).collect()
    }

    #[test]
    fn test_predicted_size() {
        assert_eq!(predicted_size(0, 1), 3);
        assert_eq!(predicted_size(1, 3), 6);
        // 6 * 2.25 * 1.11 = 14.985
        assert_eq!(predicted_size(2, 6), 14);
        assert_eq!(predicted_size(20, 1000), 1146);
        assert_eq!(predicted_size(40, 1000), 1071);
    }

    #[test]
    fn test_root_must_be_main_point() {
        let res = PathGraph::new(cells(), GrowthRuleId(0), 0, Point::new(1, 0, 0), GrowthConfig::default());
        assert!(matches!(res, Err(Error::NotMainPoint(_))));
    }

    #[test]
    fn test_new_graph_has_only_root() {
        let graph = PathGraph::new(cells(), GrowthRuleId(0), 0, ORIGIN, GrowthConfig::default()).unwrap();
        let root = graph.root();
        assert_eq!(root.id(), PathNodeId(1));
        assert_eq!(root.distance(), 0);
        assert_eq!(root.states(), [ConnectionState::Unset; 3]);
        assert_eq!(graph.max_distance(), 0);
        assert_eq!(counts(&graph), vec![1]);
    }

    #[test]
    fn test_first_steps_of_constant_rule() {
        let graph = PathGraph::new(cells(), GrowthRuleId(0), 0, ORIGIN, GrowthConfig::default()).unwrap();
        assert_eq!(graph.request_max_distance(4).unwrap(), 4);
        assert_eq!(counts(&graph), vec![1, 3, 6, 12, 24]);
        assert_eq!(graph.root().states(), [ConnectionState::Outgoing; 3]);
        assert_eq!(graph.count_between(0, 2), 10);
        assert_eq!(graph.nodes_between(1, 1).len(), 3);
        assert_eq!(graph.nb_nodes(), 46);
        assert_eq!(graph.stats().len(), 4);
    }

    #[test]
    fn test_request_is_idempotent() {
        let graph = PathGraph::new(cells(), GrowthRuleId(0), 0, ORIGIN, GrowthConfig::default()).unwrap();
        graph.request_max_distance(3).unwrap();
        let before = counts(&graph);
        assert_eq!(graph.request_max_distance(2).unwrap(), 3);
        assert_eq!(counts(&graph), before);
    }

    #[test]
    fn test_worker_count_does_not_change_shape() {
        let cells = cells();
        let rule = cells.catalogs().growth_rules().by_family(4, 2).unwrap().id;
        let single = PathGraph::new(
            Arc::clone(&cells), rule, 1, ORIGIN, GrowthConfig::default().with_workers(1),
        ).unwrap();
        let many = PathGraph::new(
            Arc::clone(&cells), rule, 1, ORIGIN, GrowthConfig::default().with_workers(8).with_index_buckets(4),
        ).unwrap();
        single.request_max_distance(8).unwrap();
        many.request_max_distance(8).unwrap();
        assert_eq!(counts(&single), counts(&many));
        for d in 0..=8 {
            let a: Vec<Point> = single.nodes_at(d).iter().map(|n| n.point()).collect();
            let b: Vec<Point> = many.nodes_at(d).iter().map(|n| n.point()).collect();
            assert_eq!(a, b);
        }
        let blocked = |g: &PathGraph| g.stats().iter().map(|s| s.blocked).sum::<usize>();
        assert_eq!(blocked(&single), blocked(&many));
    }

    #[test]
    fn test_translated_root_grows_same_shape() {
        let cells = cells();
        let rule = cells.catalogs().growth_rules().by_family(8, 4).unwrap().id;
        let shift = Point::new(9, -3, 6);
        let here = PathGraph::new(Arc::clone(&cells), rule, 0, ORIGIN, GrowthConfig::default()).unwrap();
        let there = PathGraph::new(Arc::clone(&cells), rule, 0, shift, GrowthConfig::default()).unwrap();
        here.request_max_distance(6).unwrap();
        there.request_max_distance(6).unwrap();
        assert_eq!(counts(&here), counts(&there));
        let moved: Vec<Point> = here.nodes_at(6).iter().map(|n| n.point() + shift).collect();
        let direct: Vec<Point> = there.nodes_at(6).iter().map(|n| n.point()).collect();
        assert_eq!(moved, direct);
    }

    #[test]
    fn test_lookup_by_id_and_point() {
        let graph = PathGraph::new(cells(), GrowthRuleId(3), 0, ORIGIN, GrowthConfig::default()).unwrap();
        graph.request_max_distance(3).unwrap();
        for node in graph.nodes_at(3) {
            assert!(Arc::ptr_eq(&graph.node(node.id()).unwrap(), &node));
            assert!(Arc::ptr_eq(&graph.node_at(node.point()).unwrap(), &node));
        }
        assert!(graph.node(PathNodeId(0)).is_none());
        assert!(graph.dump_info().contains("d=  3"));
    }

    #[test]
    fn test_contention_blocks_origin_slot() {
        let graph = PathGraph::new(cells(), GrowthRuleId(0), 0, ORIGIN, GrowthConfig::default()).unwrap();
        let root = graph.root();
        let counters = StepCounters::default();
        let winner = graph
            .settle_insert(&root, 1, Err(Error::Contention { attempts: 11 }), &counters)
            .unwrap();
        assert!(winner.is_none());
        assert_eq!(root.state(1), ConnectionState::Blocked);

        let res = graph.settle_insert(&root, 2, Err(Error::CapacityExceeded(7)), &counters);
        assert!(matches!(res, Err(Error::CapacityExceeded(7))));
        assert_eq!(root.state(2), ConnectionState::Unset);

        let stats = counters.into_stats(0, 0, 0);
        assert_eq!(stats.contention, 1);
        assert_eq!(stats.blocked, 1);

        // Growth carries on around the blocked slot.
        graph.request_max_distance(1).unwrap();
        assert_eq!(counts(&graph), vec![1, 2]);
        assert_eq!(root.count_state(ConnectionState::Blocked), 1);
        assert_eq!(root.count_state(ConnectionState::Outgoing), 2);
    }

    #[test]
    fn test_failed_step_poisons_graph() {
        let graph = PathGraph::new(cells(), GrowthRuleId(0), 0, ORIGIN, GrowthConfig::default()).unwrap();
        let res = graph.grow_to(4, |g, state| {
            if g.max_distance() == 2 {
                return Err(Error::Growth("lost frontier".into()));
            }
            g.step(state)
        });
        assert!(matches!(res, Err(Error::Growth(msg)) if msg == "lost frontier"));
        assert!(graph.is_poisoned());
        assert_eq!(counts(&graph), vec![1, 3, 6]);

        assert!(matches!(graph.request_max_distance(4), Err(Error::Growth(_))));
        assert!(matches!(graph.request_max_distance(1), Err(Error::Growth(_))));
        assert_eq!(graph.max_distance(), 2);
        assert_eq!(graph.nb_nodes(), 10);
    }
}

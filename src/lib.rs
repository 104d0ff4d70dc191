//! # lattice-growth: Lattice Catalogs and Path Growth
//!
//! A discrete 3D lattice built from a symmetry-derived set of 50 connection
//! vectors and 200 connection triples ("trios"), and a concurrent engine that
//! grows tree-shaped path graphs outward from a root point under one of 52
//! growth rules.
//!
//! ## Design Principles
//!
//! 1. **Catalogs are values**: `CatalogSet` is derived once and shared by `Arc`
//! 2. **Cells are memoized**: every main point maps to one of 5192 local cells,
//!    and each cell owns a fixed 10-record path builder template
//! 3. **Frontiers are lock-free**: each growth step fans out over a
//!    `ConcurrentPointIndex` keyed by lattice point
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lattice_growth::{CatalogEnv, GrowthConfig, LocalCellCache, PathGraph, point::ORIGIN};
//!
//! # fn example() -> lattice_growth::Result<()> {
//! let env = CatalogEnv::new();
//! let catalogs = env.catalogs()?;
//! let cells = Arc::new(LocalCellCache::new(catalogs.clone()));
//! let rule = catalogs.growth_rules().by_family(8, 0)?.id;
//!
//! let graph = PathGraph::new(cells, rule, 0, ORIGIN, GrowthConfig::default())?;
//! graph.request_max_distance(12)?;
//! println!("{} nodes at d=12", graph.count_at(12));
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod point;
pub mod catalog;
pub mod cell;
pub mod index;
pub mod path;
pub mod config;
pub mod storage;
pub mod export;

// ============================================================================
// Re-exports: Geometry and catalogs
// ============================================================================

pub use point::{Point, UnitDirection};
pub use catalog::{
    CatalogEnv, CatalogSet, ConnectionCatalog, ConnectionDetails, ConnectionId,
    TrioCatalog, TrioDetails, TrioIndex,
    PermutationTables, GrowthRule, GrowthRuleId, GrowthRules, GrowthFamily,
};

// ============================================================================
// Re-exports: Cells, index and growth
// ============================================================================

pub use cell::{CellId, CellKey, CellSignature, LocalCellCache};
pub use cell::builder::{BuilderRef, PathBuilderTree, PathNodeBuilder};
pub use index::ConcurrentPointIndex;
pub use path::{PathGraph, PathNode, PathNodeId, ConnectionState, GrowthStats};
pub use config::GrowthConfig;

// ============================================================================
// Re-exports: Boundaries
// ============================================================================

pub use storage::{CatalogStore, MemoryStore};
pub use export::PathNodeRow;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Catalog inconsistency: {0}")]
    Inconsistent(String),

    #[error("Point {0} is not a main lattice point")]
    NotMainPoint(Point),

    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    #[error("Unknown trio: {0}")]
    UnknownTrio(String),

    #[error("Unknown cell: {0}")]
    UnknownCell(String),

    #[error("Unknown growth rule: {0}")]
    UnknownGrowthRule(String),

    #[error("Path builder navigation failed: {0}")]
    Navigation(String),

    #[error("Point index contention after {attempts} attempts")]
    Contention { attempts: usize },

    #[error("Arena capacity exceeded at index {0}")]
    CapacityExceeded(usize),

    #[error("Growth error: {0}")]
    Growth(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Count mismatch for {table}: expected {expected}, got {got}")]
    CountMismatch { table: String, expected: usize, got: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

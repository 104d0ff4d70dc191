//! Path nodes and their connection slots.
//!
//! A node has one slot per connection of its trio. Each slot moves once out
//! of `Unset`: to `Incoming` on the target side of a link, to `Outgoing` or
//! `Blocked` on the origin side. The three slot states are packed in a
//! 16-bit mask, 4 bits per slot with the state in the low 2 bits, and
//! updated by compare-and-swap.

use std::fmt;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogSet, ConnectionId, TrioIndex};
use crate::cell::builder::BuilderRef;
use crate::point::Point;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathNodeId(pub u64);

impl fmt::Display for PathNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

const NO_LINK: u64 = 0;

// ============================================================================
// ConnectionState
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConnectionState {
    Unset = 0,
    Incoming = 1,
    Outgoing = 2,
    Blocked = 3,
}

impl ConnectionState {
    const BITS_PER_SLOT: usize = 4;
    const STATE_BITS: u16 = 0b11;

    pub fn from_mask(mask: u16, slot: usize) -> Self {
        match (mask >> (slot * Self::BITS_PER_SLOT)) & Self::STATE_BITS {
            0 => ConnectionState::Unset,
            1 => ConnectionState::Incoming,
            2 => ConnectionState::Outgoing,
            _ => ConnectionState::Blocked,
        }
    }

    pub fn set_in_mask(self, mask: u16, slot: usize) -> u16 {
        let shift = slot * Self::BITS_PER_SLOT;
        (mask & !(Self::STATE_BITS << shift)) | ((self as u16) << shift)
    }
}

/// Why a slot could not take a link. Handled inside the engine by blocking
/// the origin slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    ConnectionNotFound(ConnectionId),
    NotAvailable { slot: usize, state: ConnectionState },
    AlreadyLinked,
    DistanceMismatch { from: u32, to: u32 },
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::ConnectionNotFound(c) => write!(f, "connection {} not in trio", c),
            LinkError::NotAvailable { slot, state } => write!(f, "slot {} is {:?}", slot, state),
            LinkError::AlreadyLinked => write!(f, "node already has an incoming link"),
            LinkError::DistanceMismatch { from, to } => {
                write!(f, "cannot link distance {} to distance {}", from, to)
            }
        }
    }
}

// ============================================================================
// PathNode
// ============================================================================

pub struct PathNode {
    id: PathNodeId,
    point: Point,
    distance: u32,
    trio: TrioIndex,
    conns: [ConnectionId; 3],
    builder: BuilderRef,
    mask: AtomicU16,
    links: [AtomicU64; 3],
}

impl PathNode {
    pub fn new(
        catalogs: &CatalogSet,
        id: PathNodeId,
        point: Point,
        distance: u32,
        builder: BuilderRef,
    ) -> Result<Self> {
        let trio = builder.trio();
        let conns = catalogs.trio(trio)?.conn_ids();
        Ok(Self {
            id,
            point,
            distance,
            trio,
            conns,
            builder,
            mask: AtomicU16::new(0),
            links: std::array::from_fn(|_| AtomicU64::new(NO_LINK)),
        })
    }

    pub fn id(&self) -> PathNodeId {
        self.id
    }

    pub fn point(&self) -> Point {
        self.point
    }

    pub fn distance(&self) -> u32 {
        self.distance
    }

    pub fn trio(&self) -> TrioIndex {
        self.trio
    }

    pub fn builder(&self) -> &BuilderRef {
        &self.builder
    }

    pub fn connection(&self, slot: usize) -> ConnectionId {
        self.conns[slot]
    }

    pub fn slot_of(&self, conn: ConnectionId) -> Option<usize> {
        self.conns.iter().position(|c| *c == conn)
    }

    pub fn mask(&self) -> u16 {
        self.mask.load(Ordering::Acquire)
    }

    pub fn state(&self, slot: usize) -> ConnectionState {
        ConnectionState::from_mask(self.mask(), slot)
    }

    pub fn states(&self) -> [ConnectionState; 3] {
        let mask = self.mask();
        std::array::from_fn(|slot| ConnectionState::from_mask(mask, slot))
    }

    pub fn linked(&self, slot: usize) -> Option<PathNodeId> {
        match self.links[slot].load(Ordering::Acquire) {
            NO_LINK => None,
            id => Some(PathNodeId(id)),
        }
    }

    pub fn links(&self) -> [Option<PathNodeId>; 3] {
        std::array::from_fn(|slot| self.linked(slot))
    }

    pub fn count_state(&self, state: ConnectionState) -> usize {
        self.states().iter().filter(|s| **s == state).count()
    }

    /// Take `from` as the single incoming link through `conn`, the reverse
    /// of the connection `from` used. Returns the slot taken.
    pub fn set_incoming(&self, conn: ConnectionId, from: &PathNode) -> std::result::Result<usize, LinkError> {
        if self.distance != from.distance + 1 {
            return Err(LinkError::DistanceMismatch { from: from.distance, to: self.distance });
        }
        let slot = self.slot_of(conn).ok_or(LinkError::ConnectionNotFound(conn))?;
        let mut current = self.mask.load(Ordering::Acquire);
        loop {
            let state = ConnectionState::from_mask(current, slot);
            if state != ConnectionState::Unset {
                return Err(LinkError::NotAvailable { slot, state });
            }
            if (0..3).any(|s| ConnectionState::from_mask(current, s) == ConnectionState::Incoming) {
                return Err(LinkError::AlreadyLinked);
            }
            let next = ConnectionState::Incoming.set_in_mask(current, slot);
            match self.mask.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.links[slot].store(from.id.0, Ordering::Release);
        Ok(slot)
    }

    pub fn set_outgoing(&self, slot: usize, to: PathNodeId) -> std::result::Result<(), LinkError> {
        self.transition(slot, ConnectionState::Outgoing)?;
        self.links[slot].store(to.0, Ordering::Release);
        Ok(())
    }

    pub fn set_blocked(&self, slot: usize) -> std::result::Result<(), LinkError> {
        self.transition(slot, ConnectionState::Blocked)
    }

    fn transition(&self, slot: usize, to: ConnectionState) -> std::result::Result<(), LinkError> {
        let mut current = self.mask.load(Ordering::Acquire);
        loop {
            let state = ConnectionState::from_mask(current, slot);
            if state != ConnectionState::Unset {
                return Err(LinkError::NotAvailable { slot, state });
            }
            let next = to.set_in_mask(current, slot);
            match self.mask.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }
}

impl fmt::Debug for PathNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathNode")
            .field("id", &self.id)
            .field("point", &self.point)
            .field("distance", &self.distance)
            .field("trio", &self.trio)
            .field("states", &self.states())
            .field("links", &self.links())
            .finish()
    }
}

impl fmt::Display for PathNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} d={} {}", self.id, self.point, self.distance, self.trio)
    }
}

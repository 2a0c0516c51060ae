//! Tile ownership strategies
//!
//! A policy maps a tile index to the `(node, thread)` that owns it using only
//! the tile index and the cluster shape, so any node can work out the whole
//! ownership table without talking to the others. Each policy also lists the
//! tiles of one worker as an arithmetic progression, which keeps
//! [`OwnedTiles`] lazy and cheap to restart.

use crate::core::types::{NodeId, ThreadId, TileIndex};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Counts a policy needs to place tiles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decomposition {
    /// Tiles in the matrix
    pub tile_count: usize,
    /// Nodes in the cluster
    pub node_count: usize,
    /// Worker threads per node
    pub thread_count: usize,
}

/// Strategy assigning tiles to workers
///
/// Implementations must be pure: the same inputs always give the same owner,
/// every tile has exactly one owner, and `tiles_of` yields exactly the tiles
/// for which `owner` names that worker, in ascending order.
pub trait DistributionPolicy: fmt::Debug + Send + Sync {
    /// Owner of `tile`; `tile` is below `shape.tile_count`
    fn owner(&self, tile: TileIndex, shape: &Decomposition) -> (NodeId, ThreadId);

    /// Tiles owned by `(node, thread)`
    fn tiles_of(&self, node: NodeId, thread: ThreadId, shape: &Decomposition) -> OwnedTiles;
}

/// Tile `i` goes to node `i mod nodes`; a node's `k`-th tile goes to thread `k mod threads`
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobin;

impl DistributionPolicy for RoundRobin {
    fn owner(&self, tile: TileIndex, shape: &Decomposition) -> (NodeId, ThreadId) {
        let node = tile % shape.node_count;
        let local = tile / shape.node_count;
        (node, local % shape.thread_count)
    }

    fn tiles_of(&self, node: NodeId, thread: ThreadId, shape: &Decomposition) -> OwnedTiles {
        let first = node + thread * shape.node_count;
        OwnedTiles::new(first, shape.tile_count, shape.node_count * shape.thread_count)
    }
}

/// Each node owns one contiguous run of tiles, split contiguously across its threads
///
/// When tiles do not divide evenly, the earlier nodes (and threads) take one
/// extra tile each.
#[derive(Debug, Clone, Copy, Default)]
pub struct Contiguous;

impl DistributionPolicy for Contiguous {
    fn owner(&self, tile: TileIndex, shape: &Decomposition) -> (NodeId, ThreadId) {
        let node = part_of(tile, shape.tile_count, shape.node_count);
        let run = split(shape.tile_count, shape.node_count, node);
        let thread = part_of(tile - run.start, run.len(), shape.thread_count);
        (node, thread)
    }

    fn tiles_of(&self, node: NodeId, thread: ThreadId, shape: &Decomposition) -> OwnedTiles {
        let run = split(shape.tile_count, shape.node_count, node);
        let own = split(run.len(), shape.thread_count, thread);
        OwnedTiles::new(run.start + own.start, run.start + own.end, 1)
    }
}

/// `idx`-th of `parts` near-equal contiguous pieces of `0..count`
fn split(count: usize, parts: usize, idx: usize) -> std::ops::Range<usize> {
    let base = count / parts;
    let extra = count % parts;
    let start = idx * base + idx.min(extra);
    let len = base + usize::from(idx < extra);
    start..start + len
}

/// Which piece of [`split`] holds `item`
fn part_of(item: usize, count: usize, parts: usize) -> usize {
    let base = count / parts;
    let extra = count % parts;
    let boundary = extra * (base + 1);
    if item < boundary {
        item / (base + 1)
    } else {
        extra + (item - boundary) / base
    }
}

/// Configurable choice between the built-in policies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Distribution {
    /// See [`RoundRobin`]
    #[default]
    RoundRobin,
    /// See [`Contiguous`]
    Contiguous,
}

impl Distribution {
    /// Boxed policy for this choice
    pub fn policy(self) -> Box<dyn DistributionPolicy> {
        match self {
            Distribution::RoundRobin => Box::new(RoundRobin),
            Distribution::Contiguous => Box::new(Contiguous),
        }
    }
}

impl std::str::FromStr for Distribution {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "round-robin" => Ok(Distribution::RoundRobin),
            "contiguous" => Ok(Distribution::Contiguous),
            other => Err(format!(
                "Invalid distribution: {}. Valid options: round-robin, contiguous",
                other
            )),
        }
    }
}

/// Lazy, finite, restartable sequence of the tiles one worker owns
///
/// Cloning yields an independent iterator from the current position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedTiles {
    next: usize,
    end: usize,
    step: usize,
}

impl OwnedTiles {
    fn new(first: usize, end: usize, step: usize) -> Self {
        Self { next: first.min(end), end, step }
    }

    /// An iterator yielding nothing
    pub fn empty() -> Self {
        Self { next: 0, end: 0, step: 1 }
    }
}

impl Iterator for OwnedTiles {
    type Item = TileIndex;

    fn next(&mut self) -> Option<TileIndex> {
        if self.next >= self.end {
            return None;
        }
        let tile = self.next;
        self.next = self.next.saturating_add(self.step).min(self.end);
        Some(tile)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end - self.next).div_ceil(self.step);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for OwnedTiles {}

impl std::iter::FusedIterator for OwnedTiles {}

//! Partitioned input format
//!
//! Splits the matrix into row tiles, decides which `(node, thread)` owns each
//! tile and serves decoded blocks to their owners through the node's scratch
//! pool.
//!
//! Ownership lives in [`TilePlan`], which is plain arithmetic over immutable
//! inputs: any thread on any node can ask who owns any tile without locking
//! or talking to other nodes. [`PartitionedInput`] adds the I/O side for one
//! node.

pub mod block;
pub mod codec;
pub mod policy;

pub use block::MatrixBlock;
pub use policy::{Contiguous, Decomposition, Distribution, DistributionPolicy, OwnedTiles, RoundRobin};

use crate::core::error::{Error, Result};
use crate::core::types::{NodeId, ThreadId, TileIndex};
use crate::geometry::MatrixGeometry;
use crate::scratch::{ScratchLease, ScratchManager, ScratchStats, SourceFile};
use crate::system::metrics::Metrics;
use crate::topology::ClusterTopology;
use std::ops::Range;
use tracing::{debug, info};

/// Where one tile lives in the source file and who owns it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockAssignment {
    /// Tile index
    pub tile: TileIndex,
    /// Owning node
    pub owner_node: NodeId,
    /// Owning thread within the node
    pub owner_thread: ThreadId,
    /// Global rows `[start, end)`
    pub rows: Range<usize>,
    /// Source file bytes `[start, end)`
    pub bytes: Range<u64>,
}

/// Deterministic tile ownership for a matrix on a cluster shape
#[derive(Debug)]
pub struct TilePlan {
    geometry: MatrixGeometry,
    shape: Decomposition,
    policy: Box<dyn DistributionPolicy>,
}

impl TilePlan {
    /// Plan tiles of `geometry` over the nodes and threads of `topology`
    pub fn new(
        topology: &ClusterTopology,
        geometry: MatrixGeometry,
        policy: Box<dyn DistributionPolicy>,
    ) -> Self {
        let shape = Decomposition {
            tile_count: geometry.tile_count(),
            node_count: topology.node_count(),
            thread_count: topology.thread_count(),
        };
        Self { geometry, shape, policy }
    }

    /// Plan tiles from bare counts, without a scratch directory
    pub fn with_counts(
        node_count: usize,
        thread_count: usize,
        geometry: MatrixGeometry,
        policy: Box<dyn DistributionPolicy>,
    ) -> Result<Self> {
        if node_count < 1 || thread_count < 1 {
            return Err(Error::config(format!(
                "need at least one node and thread, got {} × {}",
                node_count, thread_count
            )));
        }
        let shape = Decomposition {
            tile_count: geometry.tile_count(),
            node_count,
            thread_count,
        };
        Ok(Self { geometry, shape, policy })
    }

    /// Matrix being planned
    pub fn geometry(&self) -> &MatrixGeometry {
        &self.geometry
    }

    /// Cluster shape and tile count
    pub fn decomposition(&self) -> Decomposition {
        self.shape
    }

    /// Number of tiles
    pub fn tile_count(&self) -> usize {
        self.shape.tile_count
    }

    /// Owner of `tile`
    pub fn owner(&self, tile: TileIndex) -> Result<(NodeId, ThreadId)> {
        if tile >= self.shape.tile_count {
            return Err(Error::out_of_range(format!(
                "tile {} of {} does not exist",
                tile, self.shape.tile_count
            )));
        }
        Ok(self.policy.owner(tile, &self.shape))
    }

    /// Rows, bytes and owner of `tile`
    pub fn assignment(&self, tile: TileIndex) -> Result<BlockAssignment> {
        let (owner_node, owner_thread) = self.owner(tile)?;
        let rows = self.geometry.tile_rows(tile)?;
        let bytes = self.geometry.byte_range_of(rows.start, rows.end)?;
        Ok(BlockAssignment {
            tile,
            owner_node,
            owner_thread,
            rows,
            bytes,
        })
    }

    /// Assignments of every tile, in tile order
    pub fn assignments(&self) -> impl Iterator<Item = BlockAssignment> + '_ {
        (0..self.shape.tile_count).filter_map(move |tile| self.assignment(tile).ok())
    }

    /// Tiles owned by `(node, thread)`
    pub fn owned_tiles(&self, node: NodeId, thread: ThreadId) -> Result<OwnedTiles> {
        self.check_worker(node, thread)?;
        Ok(self.policy.tiles_of(node, thread, &self.shape))
    }

    fn check_worker(&self, node: NodeId, thread: ThreadId) -> Result<()> {
        if node >= self.shape.node_count {
            return Err(Error::out_of_range(format!(
                "node {} outside cluster of {}",
                node, self.shape.node_count
            )));
        }
        if thread >= self.shape.thread_count {
            return Err(Error::out_of_range(format!(
                "thread {} outside {} threads per node",
                thread, self.shape.thread_count
            )));
        }
        Ok(())
    }
}

/// One node's view of the partitioned matrix
///
/// Shared by reference between the node's worker threads.
#[derive(Debug)]
pub struct PartitionedInput {
    node_id: NodeId,
    plan: TilePlan,
    source: SourceFile,
    scratch: ScratchManager,
}

impl PartitionedInput {
    /// Open the matrix described by `geometry` for `node_id`
    pub fn open(
        topology: &ClusterTopology,
        geometry: MatrixGeometry,
        node_id: NodeId,
        policy: Box<dyn DistributionPolicy>,
    ) -> Result<Self> {
        let path = geometry
            .source()
            .ok_or_else(|| Error::geometry("geometry has no backing file; use MatrixGeometry::describe"))?
            .to_path_buf();
        let scratch = ScratchManager::new(topology, node_id)?;
        let source = SourceFile::open(&path)?;
        let plan = TilePlan::new(topology, geometry, policy);

        let owned: usize = (0..topology.thread_count())
            .filter_map(|t| plan.owned_tiles(node_id, t).ok())
            .map(|tiles| tiles.len())
            .sum();
        info!(node = node_id, tiles = plan.tile_count(), owned, "partitioned input opened");
        Ok(Self {
            node_id,
            plan,
            source,
            scratch,
        })
    }

    /// Node this input serves
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Tile ownership plan
    pub fn plan(&self) -> &TilePlan {
        &self.plan
    }

    /// Matrix geometry
    pub fn geometry(&self) -> &MatrixGeometry {
        self.plan.geometry()
    }

    /// Tiles owned by `(node, thread)`; any node may ask about any worker
    pub fn owned_tiles(&self, node: NodeId, thread: ThreadId) -> Result<OwnedTiles> {
        self.plan.owned_tiles(node, thread)
    }

    /// Stage and decode `tile` for its owner
    ///
    /// Fails with [`Error::OutOfRange`] without touching the disk if
    /// `(node, thread)` is not this node's owner of `tile`. The returned guard
    /// holds a scratch region until it is dropped or released.
    pub fn request_block(&self, node: NodeId, thread: ThreadId, tile: TileIndex) -> Result<BlockGuard<'_>> {
        self.plan.check_worker(node, thread)?;
        if node != self.node_id {
            return Err(Error::out_of_range(format!(
                "node {} cannot serve blocks for node {}",
                self.node_id, node
            )));
        }
        let assignment = self.plan.assignment(tile)?;
        if (assignment.owner_node, assignment.owner_thread) != (node, thread) {
            Metrics::global().partition.ownership_rejections.inc();
            return Err(Error::out_of_range(format!(
                "tile {} belongs to node {} thread {}, not node {} thread {}",
                tile, assignment.owner_node, assignment.owner_thread, node, thread
            )));
        }

        let lease = self.scratch.acquire(&self.source, assignment.bytes.clone())?;
        let guard = BlockGuard {
            lease,
            assignment,
            geometry: self.plan.geometry(),
        };
        // Validate the staged bytes now so a bad stage fails here, not mid-iteration.
        guard.block()?;

        Metrics::global().partition.blocks_served.inc();
        debug!(node, thread, tile, rows = ?guard.assignment.rows, "block served");
        Ok(guard)
    }

    /// Run `f` on a block and release it afterwards, whatever `f` returns
    pub fn with_block<T>(
        &self,
        node: NodeId,
        thread: ThreadId,
        tile: TileIndex,
        f: impl FnOnce(&MatrixBlock<'_>) -> Result<T>,
    ) -> Result<T> {
        let guard = self.request_block(node, thread, tile)?;
        let result = f(&guard.block()?);
        guard.release()?;
        result
    }

    /// Scratch pool statistics for this node
    pub fn scratch_stats(&self) -> ScratchStats {
        self.scratch.stats()
    }

    /// Wake blocked requests and refuse new ones; see [`ScratchManager::shutdown`]
    pub fn shutdown(&self) {
        self.scratch.shutdown();
    }
}

/// A staged tile leased to its owner
///
/// Dropping the guard returns the scratch region; blocks borrowed from it
/// cannot outlive it.
#[derive(Debug)]
pub struct BlockGuard<'a> {
    lease: ScratchLease<'a>,
    assignment: BlockAssignment,
    geometry: &'a MatrixGeometry,
}

impl<'a> BlockGuard<'a> {
    /// Decoded view of the staged tile
    pub fn block(&self) -> Result<MatrixBlock<'_>> {
        MatrixBlock::new(
            self.assignment.tile,
            self.assignment.rows.clone(),
            self.geometry.point_count(),
            self.geometry.byte_order(),
            self.geometry.entry_kind(),
            self.lease.bytes()?,
        )
    }

    /// Where the tile came from
    pub fn assignment(&self) -> &BlockAssignment {
        &self.assignment
    }

    /// Scratch slot holding the tile
    pub fn slot(&self) -> usize {
        self.lease.slot()
    }

    /// Return the scratch region now rather than on drop
    pub fn release(mut self) -> Result<()> {
        self.lease.release()
    }
}

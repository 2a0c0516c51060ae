//! One pass over a node's tiles with one OS thread per worker
//!
//! Stands in for the optimisation loop: every worker walks its own tiles,
//! reduces each block to a [`TileSummary`] and sends it over a channel to the
//! calling thread, which folds them into a [`NodeSummary`].

use crate::core::error::{Error, Result};
use crate::core::types::{NodeId, ThreadId, TileIndex};
use crate::partition::{MatrixBlock, PartitionedInput};
use crossbeam::channel;
use parking_lot::Mutex;
use std::io;
use std::ops::Range;
use std::thread;
use tracing::{debug, error, info};

/// Reduction of one decoded block
#[derive(Debug, Clone, PartialEq)]
pub struct TileSummary {
    /// Tile reduced
    pub tile: TileIndex,
    /// Worker that reduced it
    pub thread: ThreadId,
    /// Global rows covered
    pub rows: Range<usize>,
    /// Entries seen
    pub entries: u64,
    /// Smallest raw entry
    pub min: i32,
    /// Largest raw entry
    pub max: i32,
    /// Sum of normalised distances
    pub distance_sum: f64,
}

impl TileSummary {
    /// Reduce `block`
    pub fn of(block: &MatrixBlock<'_>, thread: ThreadId) -> Self {
        let mut summary = Self {
            tile: block.tile(),
            thread,
            rows: block.row_range(),
            entries: 0,
            min: i32::MAX,
            max: i32::MIN,
            distance_sum: 0.0,
        };
        for row in 0..block.rows() {
            for col in 0..block.columns() {
                let value = block.get(row, col);
                summary.entries += 1;
                summary.min = summary.min.min(value);
                summary.max = summary.max.max(value);
                summary.distance_sum += block.distance(row, col);
            }
        }
        summary
    }
}

/// Reduction of every tile a node owns
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSummary {
    /// Node reduced
    pub node: NodeId,
    /// Per-tile results, sorted by tile
    pub tiles: Vec<TileSummary>,
}

impl NodeSummary {
    /// Total rows covered
    pub fn rows(&self) -> usize {
        self.tiles.iter().map(|t| t.rows.len()).sum()
    }

    /// Total entries seen
    pub fn entries(&self) -> u64 {
        self.tiles.iter().map(|t| t.entries).sum()
    }

    /// Smallest raw entry, if any tile was reduced
    pub fn min(&self) -> Option<i32> {
        self.tiles.iter().map(|t| t.min).min()
    }

    /// Largest raw entry, if any tile was reduced
    pub fn max(&self) -> Option<i32> {
        self.tiles.iter().map(|t| t.max).max()
    }

    /// Mean normalised distance
    pub fn mean_distance(&self) -> f64 {
        let entries = self.entries();
        if entries == 0 {
            return 0.0;
        }
        self.tiles.iter().map(|t| t.distance_sum).sum::<f64>() / entries as f64
    }
}

/// Run one pass over `input`'s tiles with one worker thread per configured thread
///
/// The first worker error is recorded, then shuts the scratch pool down so
/// the others stop instead of waiting for regions that will never come back.
/// That first error is the one returned, not the shutdown errors it causes.
pub fn sweep(input: &PartitionedInput) -> Result<NodeSummary> {
    let node = input.node_id();
    let thread_count = input.plan().decomposition().thread_count;
    let (tx, rx) = channel::unbounded::<TileSummary>();
    let first_error: Mutex<Option<Error>> = Mutex::new(None);
    let fail = |e: Error| {
        first_error.lock().get_or_insert(e);
        input.shutdown();
    };

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(thread_count);
        for thread in 0..thread_count {
            let tx = tx.clone();
            let fail = &fail;
            let spawned = thread::Builder::new()
                .name(format!("damds-worker-{}", thread))
                .spawn_scoped(scope, move || {
                    if let Err(e) = work(input, node, thread, &tx) {
                        error!(node, thread, error = %e, "worker failed");
                        fail(e);
                    }
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    fail(Error::from(e));
                    break;
                }
            }
        }
        drop(tx);

        for handle in handles {
            if handle.join().is_err() {
                fail(Error::Io(io::Error::new(io::ErrorKind::Other, "worker thread panicked")));
            }
        }
    });

    if let Some(e) = first_error.into_inner() {
        return Err(e);
    }
    let mut tiles: Vec<TileSummary> = rx.iter().collect();
    tiles.sort_by_key(|t| t.tile);

    let summary = NodeSummary { node, tiles };
    info!(
        node,
        tiles = summary.tiles.len(),
        rows = summary.rows(),
        entries = summary.entries(),
        mean_distance = summary.mean_distance(),
        "node pass complete"
    );
    Ok(summary)
}

fn work(
    input: &PartitionedInput,
    node: NodeId,
    thread: ThreadId,
    tx: &channel::Sender<TileSummary>,
) -> Result<usize> {
    let mut done = 0;
    for tile in input.owned_tiles(node, thread)? {
        let summary = input.with_block(node, thread, tile, |block| Ok(TileSummary::of(block, thread)))?;
        debug!(node, thread, tile, entries = summary.entries, "tile reduced");
        // The receiver outlives every worker, so a send can only fail after a panic there.
        let _ = tx.send(summary);
        done += 1;
    }
    Ok(done)
}

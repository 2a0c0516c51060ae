//! Cluster topology state
//!
//! How many nodes take part in a run, how many worker threads each runs, how
//! many scratch regions each node may map at once and where the scratch files
//! live. Built once at startup and read-only afterwards.

use crate::core::error::{Error, Result};
use once_cell::sync::OnceCell;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// Run-wide decomposition parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTopology {
    node_count: usize,
    thread_count: usize,
    mmaps_per_node: usize,
    scratch_dir: PathBuf,
}

impl ClusterTopology {
    /// Validate and build a topology
    ///
    /// Fails with [`Error::Config`] if any count is zero and with
    /// [`Error::Path`] if `scratch_dir` is not a writable directory.
    pub fn new(
        node_count: usize,
        thread_count: usize,
        mmaps_per_node: usize,
        scratch_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        if node_count < 1 {
            return Err(Error::config(format!("node count must be at least 1, got {}", node_count)));
        }
        if thread_count < 1 {
            return Err(Error::config(format!("thread count must be at least 1, got {}", thread_count)));
        }
        if mmaps_per_node < 1 {
            return Err(Error::config(format!("mmaps per node must be at least 1, got {}", mmaps_per_node)));
        }

        let scratch_dir = scratch_dir.into();
        probe_writable(&scratch_dir)?;

        Ok(Self {
            node_count,
            thread_count,
            mmaps_per_node,
            scratch_dir,
        })
    }

    /// Number of participating nodes
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Worker threads per node
    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Scratch regions each node may map at once
    pub fn mmaps_per_node(&self) -> usize {
        self.mmaps_per_node
    }

    /// Directory holding scratch files
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Total worker threads across the cluster
    pub fn workers(&self) -> usize {
        self.node_count * self.thread_count
    }
}

/// Create and remove a file in `dir` to prove it accepts writes
fn probe_writable(dir: &Path) -> Result<()> {
    static PROBE_SEQ: AtomicUsize = AtomicUsize::new(0);

    if !dir.is_dir() {
        return Err(Error::path(dir, "scratch directory does not exist"));
    }

    let probe = dir.join(format!(
        ".damds-probe-{}-{}",
        std::process::id(),
        PROBE_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&probe)
        .map_err(|e| Error::path(dir, format!("scratch directory is not writable: {}", e)))?;
    std::fs::remove_file(&probe)
        .map_err(|e| Error::path(dir, format!("cannot clean up write probe: {}", e)))?;

    debug!(dir = ?dir, "scratch directory is writable");
    Ok(())
}

/// Write-once holder for a [`ClusterTopology`]
///
/// The first successful `initialize` wins; later calls fail with
/// [`Error::AlreadyInitialized`] and leave the stored topology untouched.
#[derive(Debug, Default)]
pub struct TopologyCell {
    cell: OnceCell<ClusterTopology>,
}

impl TopologyCell {
    /// Create an empty cell
    pub const fn new() -> Self {
        Self { cell: OnceCell::new() }
    }

    /// Validate the parameters and store the topology
    pub fn initialize(
        &self,
        node_count: usize,
        thread_count: usize,
        mmaps_per_node: usize,
        scratch_dir: impl Into<PathBuf>,
    ) -> Result<&ClusterTopology> {
        if self.cell.get().is_some() {
            return Err(Error::already_initialized("cluster topology"));
        }
        let topology = ClusterTopology::new(node_count, thread_count, mmaps_per_node, scratch_dir)?;
        self.cell
            .set(topology)
            .map_err(|_| Error::already_initialized("cluster topology"))?;

        let topology = self.get()?;
        info!(
            nodes = topology.node_count,
            threads = topology.thread_count,
            mmaps = topology.mmaps_per_node,
            scratch_dir = ?topology.scratch_dir,
            "cluster topology initialized"
        );
        Ok(topology)
    }

    /// The stored topology, or a configuration error if none was set
    pub fn get(&self) -> Result<&ClusterTopology> {
        self.cell
            .get()
            .ok_or_else(|| Error::config("cluster topology has not been initialized"))
    }

    /// Whether a topology has been stored
    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

static PROCESS_TOPOLOGY: TopologyCell = TopologyCell::new();

/// Initialize the process-wide topology used by the binary
pub fn initialize(
    node_count: usize,
    thread_count: usize,
    mmaps_per_node: usize,
    scratch_dir: impl Into<PathBuf>,
) -> Result<&'static ClusterTopology> {
    PROCESS_TOPOLOGY.initialize(node_count, thread_count, mmaps_per_node, scratch_dir)
}

/// The process-wide topology
pub fn global() -> Result<&'static ClusterTopology> {
    PROCESS_TOPOLOGY.get()
}

//! Scratch / memory-map manager
//!
//! Each node owns a fixed pool of `mmaps_per_node` scratch regions. A region
//! is a file in the scratch directory mapped with [`MmapMut`]; acquiring one
//! copies a byte range of the source matrix into it and hands it out as a
//! [`ScratchLease`]. When every region is leased, `acquire` blocks until a
//! lease is released. Leases release themselves on drop, so a worker that
//! bails out with `?` or panics still returns its region.
//!
//! Region lifecycle: `Free → Staging → Ready → InUse → Free`. A staging
//! failure parks the region in `Faulted`; its mapping and backing file are
//! thrown away and rebuilt the next time the region is acquired.

pub mod source;

pub use source::SourceFile;

use crate::core::error::{Error, Result};
use crate::core::types::NodeId;
use crate::system::metrics::{Metrics, Timer};
use crate::topology::ClusterTopology;
use memmap2::MmapMut;
use parking_lot::{Condvar, Mutex};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Lifecycle state of one scratch region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionState {
    /// Available; may still hold bytes from its previous lease
    Free,
    /// Being filled from the source file
    Staging,
    /// Filled and about to be handed out
    Ready,
    /// Leased to a worker
    InUse,
    /// Last staging failed; rebuilt on next acquire
    Faulted,
}

/// Which bytes a region currently holds
#[derive(Debug, Clone, PartialEq, Eq)]
struct StagedKey {
    source: u64,
    range: Range<u64>,
}

/// Mapping and backing file of a region, moved into a lease while leased
#[derive(Debug)]
struct Backing {
    map: MmapMut,
    capacity: u64,
}

#[derive(Debug)]
struct Slot {
    state: RegionState,
    path: PathBuf,
    backing: Option<Backing>,
    staged: Option<StagedKey>,
}

#[derive(Debug)]
struct Pool {
    slots: Vec<Slot>,
    closed: bool,
    stages: u64,
    stage_hits: u64,
}

impl Pool {
    /// Pick a region for `key`: one already holding it, then any free one, then a faulted one
    fn pick(&self, key: &StagedKey) -> Option<usize> {
        let free = |s: &Slot| s.state == RegionState::Free;
        self.slots
            .iter()
            .position(|s| free(s) && s.staged.as_ref() == Some(key))
            .or_else(|| self.slots.iter().position(|s| free(s) && s.staged.is_none()))
            .or_else(|| self.slots.iter().position(free))
            .or_else(|| self.slots.iter().position(|s| s.state == RegionState::Faulted))
    }

    fn count(&self, state: RegionState) -> usize {
        self.slots.iter().filter(|s| s.state == state).count()
    }
}

/// Point-in-time view of a node's scratch pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchStats {
    /// Regions in the pool
    pub capacity: usize,
    /// Regions available to acquire
    pub free: usize,
    /// Regions leased or being staged
    pub in_use: usize,
    /// Regions waiting to be rebuilt after a failed stage
    pub faulted: usize,
    /// Acquires that copied bytes from the source
    pub stages: u64,
    /// Acquires served from bytes a region already held
    pub stage_hits: u64,
}

/// Fixed pool of memory-mapped scratch regions for one node
#[derive(Debug)]
pub struct ScratchManager {
    node_id: NodeId,
    dir: PathBuf,
    pool: Mutex<Pool>,
    available: Condvar,
}

impl ScratchManager {
    /// Create the pool for `node_id` with `topology.mmaps_per_node()` regions
    ///
    /// Backing files are created lazily on first use in `topology.scratch_dir()`.
    pub fn new(topology: &ClusterTopology, node_id: NodeId) -> Result<Self> {
        if node_id >= topology.node_count() {
            return Err(Error::out_of_range(format!(
                "node {} outside cluster of {}",
                node_id,
                topology.node_count()
            )));
        }

        let dir = topology.scratch_dir().to_path_buf();
        let slots = (0..topology.mmaps_per_node())
            .map(|k| Slot {
                state: RegionState::Free,
                path: dir.join(format!("damds-node{}-slot{}.scratch", node_id, k)),
                backing: None,
                staged: None,
            })
            .collect();

        debug!(node = node_id, regions = topology.mmaps_per_node(), dir = ?dir, "scratch pool created");
        Ok(Self {
            node_id,
            dir,
            pool: Mutex::new(Pool {
                slots,
                closed: false,
                stages: 0,
                stage_hits: 0,
            }),
            available: Condvar::new(),
        })
    }

    /// Node this pool belongs to
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Directory holding the backing files
    pub fn scratch_dir(&self) -> &Path {
        &self.dir
    }

    /// Number of regions in the pool
    pub fn capacity(&self) -> usize {
        self.pool.lock().slots.len()
    }

    /// Current pool statistics
    pub fn stats(&self) -> ScratchStats {
        let pool = self.pool.lock();
        ScratchStats {
            capacity: pool.slots.len(),
            free: pool.count(RegionState::Free),
            in_use: pool.count(RegionState::Staging)
                + pool.count(RegionState::Ready)
                + pool.count(RegionState::InUse),
            faulted: pool.count(RegionState::Faulted),
            stages: pool.stages,
            stage_hits: pool.stage_hits,
        }
    }

    /// State of every region, in slot order
    pub fn region_states(&self) -> Vec<RegionState> {
        self.pool.lock().slots.iter().map(|s| s.state).collect()
    }

    /// Stage `range` of `source` into a region and lease it
    ///
    /// Blocks while every region is leased. Fails with
    /// [`Error::ScratchExhausted`] if the scratch directory can no longer back
    /// a region, with [`Error::Io`] if reading the source fails twice or the
    /// pool has been shut down.
    pub fn acquire(&self, source: &SourceFile, range: Range<u64>) -> Result<ScratchLease<'_>> {
        if range.start > range.end {
            return Err(Error::out_of_range(format!("inverted byte range {:?}", range)));
        }
        let key = StagedKey {
            source: source.id(),
            range: range.clone(),
        };

        let metrics = &Metrics::global().scratch;
        let wait = Timer::start(metrics.acquire_wait.clone());
        let mut pool = self.pool.lock();
        let slot = loop {
            if pool.closed {
                return Err(shut_down_error());
            }
            if let Some(slot) = pool.pick(&key) {
                break slot;
            }
            trace!(node = self.node_id, "all scratch regions busy, waiting");
            self.available.wait(&mut pool);
        };
        wait.finish();

        let entry = &mut pool.slots[slot];
        let hit = entry.state == RegionState::Free && entry.staged.as_ref() == Some(&key);
        if entry.state == RegionState::Faulted {
            entry.backing = None;
            discard_file(&entry.path);
        }
        entry.state = RegionState::Staging;
        entry.staged = None;
        let backing = entry.backing.take();
        let path = entry.path.clone();
        drop(pool);

        let staged = if hit {
            backing.ok_or_else(|| Error::decode("staged region lost its mapping"))
        } else {
            self.stage(&path, backing, source, &range)
        };

        let mut pool = self.pool.lock();
        let entry = &mut pool.slots[slot];
        match staged {
            Ok(backing) => {
                entry.state = RegionState::Ready;
                if hit {
                    pool.stage_hits += 1;
                    metrics.stage_hits.inc();
                } else {
                    pool.stages += 1;
                    metrics.tiles_staged.inc();
                    metrics.bytes_staged.inc_by(range.end - range.start);
                }
                pool.slots[slot].state = RegionState::InUse;
                metrics.regions_in_use.inc();
                debug!(node = self.node_id, slot, ?range, hit, "scratch region leased");
                Ok(ScratchLease {
                    manager: self,
                    slot,
                    key,
                    backing: Some(backing),
                })
            }
            Err(e) => {
                entry.state = RegionState::Faulted;
                metrics.stage_faults.inc();
                warn!(node = self.node_id, slot, ?range, error = %e, "staging failed, region faulted");
                drop(pool);
                self.available.notify_one();
                Err(e)
            }
        }
    }

    /// Return `lease` to the pool
    ///
    /// A second release of the same lease fails with [`Error::DoubleRelease`]
    /// and leaves the pool untouched.
    pub fn release(&self, lease: &mut ScratchLease<'_>) -> Result<()> {
        if !std::ptr::eq(lease.manager, self) {
            return Err(Error::out_of_range(format!(
                "scratch region {} belongs to another pool",
                lease.slot
            )));
        }
        let backing = lease
            .backing
            .take()
            .ok_or(Error::DoubleRelease { slot: lease.slot })?;
        self.give_back(lease.slot, backing, lease.key.clone());
        Ok(())
    }

    /// Wake every blocked `acquire` and refuse new ones
    ///
    /// Blocked and later callers get an [`Error::Io`] of kind `Other`, which
    /// is not retryable.
    /// Outstanding leases can still be released.
    pub fn shutdown(&self) {
        self.pool.lock().closed = true;
        self.available.notify_all();
        debug!(node = self.node_id, "scratch pool shut down");
    }

    fn give_back(&self, slot: usize, backing: Backing, key: StagedKey) {
        let mut pool = self.pool.lock();
        let entry = &mut pool.slots[slot];
        entry.state = RegionState::Free;
        entry.backing = Some(backing);
        entry.staged = Some(key);
        drop(pool);

        Metrics::global().scratch.regions_in_use.dec();
        trace!(node = self.node_id, slot, "scratch region released");
        self.available.notify_one();
    }

    /// Copy `range` of `source` into a region, retrying once on transient I/O errors
    fn stage(
        &self,
        path: &Path,
        mut backing: Option<Backing>,
        source: &SourceFile,
        range: &Range<u64>,
    ) -> Result<Backing> {
        let len = range.end - range.start;
        let mut mapped = match backing.take() {
            Some(b) if b.capacity >= len.max(1) => b,
            _ => self.map_region(path, len.max(1))?,
        };

        retry_once(|| source.read_range(range.clone(), &mut mapped.map[..len as usize]))?;
        Ok(mapped)
    }

    /// Create (or grow) the backing file and map it
    fn map_region(&self, path: &Path, capacity: u64) -> Result<Backing> {
        let exhausted = |source: io::Error| Error::ScratchExhausted {
            dir: self.dir.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(exhausted)?;
        // A sparse file would only run out of space on first touch through the
        // mapping, which is SIGBUS rather than an error.
        preallocate(&mut file, capacity).map_err(exhausted)?;

        // SAFETY: backing files are private to this pool and only touched through this mapping.
        let map = unsafe { MmapMut::map_mut(&file)? };
        debug!(path = ?path, capacity, "scratch region mapped");
        Ok(Backing { map, capacity })
    }
}

impl Drop for ScratchManager {
    fn drop(&mut self) {
        let pool = self.pool.get_mut();
        for slot in pool.slots.iter_mut() {
            slot.backing = None;
            discard_file(&slot.path);
        }
    }
}

fn discard_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = ?path, error = %e, "cannot remove scratch file"),
    }
}

/// Write `len` zero bytes from the start of `file` so every block is allocated
fn preallocate(file: &mut File, len: u64) -> io::Result<()> {
    const CHUNK: usize = 64 * 1024;
    let zeros = [0u8; CHUNK];
    let mut left = len;
    while left > 0 {
        let n = left.min(CHUNK as u64) as usize;
        file.write_all(&zeros[..n])?;
        left -= n as u64;
    }
    file.flush()
}

fn shut_down_error() -> Error {
    Error::Io(io::Error::new(io::ErrorKind::Other, "scratch pool shut down"))
}

/// Run `op`, and once more if it fails with a retryable error
fn retry_once<T>(mut op: impl FnMut() -> Result<T>) -> Result<T> {
    match op() {
        Err(e) if e.is_retryable() => {
            warn!(error = %e, "transient I/O error while staging, retrying once");
            Metrics::global().scratch.stage_retries.inc();
            op()
        }
        other => other,
    }
}

/// Exclusive lease on one scratch region holding staged bytes
///
/// Dropping the lease returns the region to its pool.
#[derive(Debug)]
pub struct ScratchLease<'a> {
    manager: &'a ScratchManager,
    slot: usize,
    key: StagedKey,
    backing: Option<Backing>,
}

impl<'a> ScratchLease<'a> {
    /// Slot index within the node's pool
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Source byte range staged in this region
    pub fn range(&self) -> Range<u64> {
        self.key.range.clone()
    }

    /// Whether the lease has already been returned
    pub fn is_released(&self) -> bool {
        self.backing.is_none()
    }

    /// The staged bytes
    pub fn bytes(&self) -> Result<&[u8]> {
        let len = (self.key.range.end - self.key.range.start) as usize;
        self.backing
            .as_ref()
            .map(|b| &b.map[..len])
            .ok_or_else(|| Error::out_of_range(format!("scratch region {} has been released", self.slot)))
    }

    /// Return the region to its pool; see [`ScratchManager::release`]
    pub fn release(&mut self) -> Result<()> {
        self.manager.release(self)
    }
}

impl Drop for ScratchLease<'_> {
    fn drop(&mut self) {
        if let Some(backing) = self.backing.take() {
            self.manager.give_back(self.slot, backing, self.key.clone());
        }
    }
}

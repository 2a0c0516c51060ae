//! DAMDS Loader - Partitioned out-of-core distance matrix loading
//!
//! Loads a flat binary matrix of 16-bit distances for a deterministic-annealing
//! MDS run spread over a cluster. Each node works out which row tiles its
//! threads own, stages those tiles through a bounded pool of memory-mapped
//! scratch regions and decodes them under the configured byte order, so the
//! full matrix is never held in memory.
#![warn(missing_docs)]

// Configure global allocator for maximum performance
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

// Core foundational modules
pub mod core;

// Main functional modules
pub mod topology;
pub mod geometry;
pub mod partition;
pub mod scratch;
pub mod runner;
pub mod system;

// Re-export commonly used items for convenience
pub use crate::core::{ByteOrder, Config, EntryKind, Error, Result};
pub use geometry::MatrixGeometry;
pub use partition::{BlockAssignment, BlockGuard, MatrixBlock, PartitionedInput, TilePlan};
pub use scratch::{ScratchLease, ScratchManager};
pub use topology::ClusterTopology;

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize tracing and metrics
///
/// `default_level` applies when `RUST_LOG` is unset.
pub fn init(default_level: &str, json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_thread_names(true);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| Error::config(format!("cannot install log subscriber: {}", e)))?;

    tracing::info!("Initializing {} v{}", NAME, VERSION);

    // Initialize metrics registry
    system::metrics::init_registry();

    Ok(())
}

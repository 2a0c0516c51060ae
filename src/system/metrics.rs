//! Metrics collection and monitoring for the loader
//!
//! Prometheus counters for scratch staging, registered once per process in a
//! crate-local registry.

use crate::core::error::{Error, Result};
use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::time::Instant;

/// Global metrics registry
static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Scratch staging metrics
pub struct ScratchMetrics {
    /// Tiles copied from the source file into a scratch region
    pub tiles_staged: IntCounter,
    /// Acquires served from bytes a region already held
    pub stage_hits: IntCounter,
    /// Bytes copied into scratch regions
    pub bytes_staged: IntCounter,
    /// Staging attempts repeated after a transient I/O error
    pub stage_retries: IntCounter,
    /// Staging attempts that left a region faulted
    pub stage_faults: IntCounter,
    /// Regions currently leased to workers
    pub regions_in_use: IntGauge,
    /// Time spent waiting for a free region
    pub acquire_wait: Histogram,
}

/// Block request metrics
pub struct PartitionMetrics {
    /// Blocks handed to workers
    pub blocks_served: IntCounter,
    /// Requests refused because the caller does not own the tile
    pub ownership_rejections: IntCounter,
}

/// Centralized metrics collection for all loader components
pub struct Metrics {
    /// Scratch manager metrics
    pub scratch: ScratchMetrics,
    /// Partitioned input metrics
    pub partition: PartitionMetrics,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> Result<Self> {
        Ok(Self {
            scratch: ScratchMetrics::new()?,
            partition: PartitionMetrics::new()?,
        })
    }

    /// Get the global metrics instance
    pub fn global() -> &'static Metrics {
        static INSTANCE: Lazy<Metrics> = Lazy::new(|| {
            Metrics::new().expect("Failed to initialize metrics")
        });
        &INSTANCE
    }
}

fn counter(name: &str, help: &str) -> Result<IntCounter> {
    let counter = IntCounter::new(name, help).map_err(metrics_error)?;
    REGISTRY.register(Box::new(counter.clone())).map_err(metrics_error)?;
    Ok(counter)
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::config(format!("metrics registration failed: {}", e))
}

impl ScratchMetrics {
    fn new() -> Result<Self> {
        let regions_in_use = IntGauge::new("damds_regions_in_use", "Scratch regions currently leased")
            .map_err(metrics_error)?;
        REGISTRY.register(Box::new(regions_in_use.clone())).map_err(metrics_error)?;

        let acquire_wait = Histogram::with_opts(HistogramOpts::new(
            "damds_acquire_wait_seconds",
            "Time spent waiting for a free scratch region",
        ))
        .map_err(metrics_error)?;
        REGISTRY.register(Box::new(acquire_wait.clone())).map_err(metrics_error)?;

        Ok(Self {
            tiles_staged: counter("damds_tiles_staged_total", "Tiles staged into scratch regions")?,
            stage_hits: counter("damds_stage_hits_total", "Acquires served without restaging")?,
            bytes_staged: counter("damds_bytes_staged_total", "Bytes staged into scratch regions")?,
            stage_retries: counter("damds_stage_retries_total", "Staging attempts retried")?,
            stage_faults: counter("damds_stage_faults_total", "Staging attempts that faulted")?,
            regions_in_use,
            acquire_wait,
        })
    }
}

impl PartitionMetrics {
    fn new() -> Result<Self> {
        Ok(Self {
            blocks_served: counter("damds_blocks_served_total", "Blocks handed to workers")?,
            ownership_rejections: counter(
                "damds_ownership_rejections_total",
                "Block requests for tiles the caller does not own",
            )?,
        })
    }
}

/// Timer for measuring operation duration with automatic histogram recording
pub struct Timer {
    /// Start time of the operation
    start: Instant,
    /// Histogram to record the duration when finished
    histogram: Histogram,
}

impl Timer {
    /// Start a new timer
    pub fn start(histogram: Histogram) -> Self {
        Self {
            start: Instant::now(),
            histogram,
        }
    }

    /// Record the elapsed time and consume the timer
    pub fn finish(self) {
        let duration = self.start.elapsed();
        self.histogram.observe(duration.as_secs_f64());
    }
}

/// Initialize the metrics registry by creating the global metrics instance
pub fn init_registry() {
    let _ = Metrics::global();
}

/// Get the Prometheus registry
pub fn registry() -> &'static Registry {
    &REGISTRY
}

/// Collect and return all metrics as a Prometheus-formatted string
pub fn collect_metrics() -> String {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = registry().gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_metrics_render() {
        init_registry();
        Metrics::global().partition.blocks_served.inc_by(0);
        let text = collect_metrics();
        assert!(text.contains("damds_blocks_served_total"));
        assert!(text.contains("damds_regions_in_use"));
    }
}

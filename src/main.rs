//! DAMDS Loader
//!
//! Loads this node's share of a DAMDS distance matrix and runs one pass over
//! it with one thread per worker, reporting what each node saw.

use clap::{Arg, ArgMatches, Command};
use damds_loader::partition::PartitionedInput;
use damds_loader::{core::Config, runner, topology, Error, MatrixGeometry, Result};
use tracing::info;

fn main() -> Result<()> {
    // Parse command line arguments
    let matches = Command::new("damds-loader")
        .version(damds_loader::VERSION)
        .about("Partitioned out-of-core distance matrix loader for DAMDS.")
        .arg(
            Arg::new("configFile")
                .short('c')
                .long("configFile")
                .value_name("FILE")
                .required(true)
                .help("Configuration file path")
        )
        .arg(
            Arg::new("nodeCount")
                .short('n')
                .long("nodeCount")
                .value_name("N")
                .required(true)
                .help("Number of nodes")
        )
        .arg(
            Arg::new("threadCount")
                .short('t')
                .long("threadCount")
                .value_name("N")
                .required(true)
                .help("Number of threads per node")
        )
        .arg(
            Arg::new("mmaps")
                .long("mmaps")
                .value_name("N")
                .help("Number of memory mapped scratch regions per node (default 1)")
        )
        .arg(
            Arg::new("mmapScratchDir")
                .long("mmapScratchDir")
                .value_name("DIR")
                .help("Scratch directory for memory mapped regions (default .)")
        )
        .arg(
            Arg::new("node-id")
                .long("node-id")
                .value_name("RANK")
                .default_value("0")
                .help("Rank of this process within the cluster")
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)")
        )
        .get_matches();

    // Load configuration
    let config_path = matches
        .get_one::<String>("configFile")
        .ok_or_else(|| Error::config("missing --configFile"))?;
    let mut config = Config::from_file(config_path)?;
    config.apply_env_overrides()?;

    // Apply CLI overrides
    apply_cli_overrides(&mut config, &matches)?;
    config.validate()?;

    // Initialize logging
    damds_loader::init(&config.logging.level, config.logging.format == "json")?;

    let node_id: usize = parse_arg(&matches, "node-id")?.unwrap_or(0);
    if node_id >= config.cluster.node_count {
        return Err(Error::config(format!(
            "node id {} outside cluster of {}",
            node_id, config.cluster.node_count
        )));
    }

    info!("== DAMDS run started on {} ==", chrono::Local::now());
    info!("Configuration: {:#?}", config);

    let topology = topology::initialize(
        config.cluster.node_count,
        config.cluster.thread_count,
        config.cluster.mmaps_per_node,
        &config.cluster.scratch_dir,
    )?;

    let geometry = MatrixGeometry::describe(
        &config.matrix.distance_matrix_file,
        config.matrix.number_data_points,
        config.matrix.byte_order(),
        config.matrix.entry_kind(),
        config.matrix.block_size,
    )?;

    let input = PartitionedInput::open(topology, geometry, node_id, config.matrix.distribution.policy())?;
    let summary = runner::sweep(&input)?;

    let stats = input.scratch_stats();
    info!(
        node = summary.node,
        tiles = summary.tiles.len(),
        rows = summary.rows(),
        min = ?summary.min(),
        max = ?summary.max(),
        mean_distance = summary.mean_distance(),
        stages = stats.stages,
        stage_hits = stats.stage_hits,
        "== DAMDS run finished on {} ==",
        chrono::Local::now()
    );
    tracing::debug!("Metrics:\n{}", damds_loader::system::metrics::collect_metrics());

    Ok(())
}

/// Apply command line argument overrides to configuration
fn apply_cli_overrides(config: &mut Config, matches: &ArgMatches) -> Result<()> {
    if let Some(nodes) = parse_arg(matches, "nodeCount")? {
        config.cluster.node_count = nodes;
    }

    if let Some(threads) = parse_arg(matches, "threadCount")? {
        config.cluster.thread_count = threads;
    }

    if let Some(mmaps) = parse_arg(matches, "mmaps")? {
        config.cluster.mmaps_per_node = mmaps;
    }

    if let Some(dir) = matches.get_one::<String>("mmapScratchDir") {
        config.cluster.scratch_dir = dir.into();
    }

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }

    Ok(())
}

/// Parse an optional numeric argument
fn parse_arg(matches: &ArgMatches, name: &str) -> Result<Option<usize>> {
    matches
        .get_one::<String>(name)
        .map(|value| {
            value
                .parse()
                .map_err(|e| Error::config(format!("Invalid {}: {}", name, e)))
        })
        .transpose()
}

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ripsim::model::topology::Topology;
use ripsim::runtime::config::{load_sim_config, SimConfig};
use ripsim::runtime::simulation::Simulation;
use ripsim::runtime::snapshot::DirectorySnapshotLogger;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ripsim")]
#[command(about = "Distance-vector routing simulator over a static topology")]
struct Args {
    /// Topology description file ([ROUTERS] format).
    #[arg(long)]
    topology: PathBuf,
    /// Optional simulation parameters (yaml); defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the snapshot output directory.
    #[arg(long)]
    logs_dir: Option<PathBuf>,
    /// Override the tick budget.
    #[arg(long)]
    max_ticks: Option<u64>,
    #[arg(long, default_value = "INFO")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let mut cfg = match &args.config {
        Some(path) => load_sim_config(path)?,
        None => SimConfig::default(),
    };
    if let Some(logs_dir) = args.logs_dir {
        cfg.logs_dir = logs_dir;
    }
    if let Some(max_ticks) = args.max_ticks {
        cfg.max_ticks = max_ticks.max(1);
    }

    let topology = Topology::load(&args.topology)?;
    info!(
        routers = topology.len(),
        topology = %args.topology.display(),
        "topology loaded"
    );

    let sink = Arc::new(DirectorySnapshotLogger::new(cfg.logs_dir.clone())?);
    let simulation = Simulation::new(topology, cfg, sink)?;

    let stop = simulation.stop_flag();
    ctrlc::set_handler(move || {
        stop.store(true, Ordering::Relaxed);
    })
    .context("failed to install signal handler")?;

    let report = simulation.run();

    for (router, table) in &report.tables {
        info!(
            router = *router,
            routes = table.routes.len(),
            "final routing table"
        );
    }
    for (router, error) in &report.failures {
        warn!(router = *router, "router failed during the run: {error}");
    }
    if !report.failures.is_empty() {
        anyhow::bail!("{} router(s) failed during the run", report.failures.len());
    }
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let level = level.parse::<Level>()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .compact()
        .init();
    Ok(())
}

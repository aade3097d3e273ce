//! toposyncd entry point: config, logging, and scan wiring.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use topo_graph::{BatchingSink, TopoGraph};
use topo_types::{DeviceDescriptor, NeighborSink, NodeIdAllocator, SessionFactory, SessionSettings};
use toposyncd::scan::{DiscoveryOrchestrator, OrchestratorSettings};
use toposyncd::{fetch_devices, Config, DrainStats, MockLab, ProbeStats, SnmpSessionFactory};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "toposyncd", about = "LLDP fleet topology discovery daemon")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = "/etc/toposyncd/config.json")]
    config: PathBuf,

    /// Scan the built-in fixture lab instead of the real fleet.
    #[arg(long)]
    mock: bool,

    /// Default log level when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    init_logging(&args.log_level, &config.logfile)?;

    info!(config = %args.config.display(), mock = args.mock, "toposyncd starting");
    run(args, config).await?;
    info!("scan completed");
    Ok(())
}

fn init_logging(level: &str, logfile: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if logfile.is_empty() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(logfile)
            .with_context(|| format!("failed to open log file {logfile}"))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(false)
            .with_writer(Arc::new(file))
            .init();
    }
    Ok(())
}

async fn run(args: Args, config: Config) -> anyhow::Result<()> {
    let mut ids = NodeIdAllocator::new();
    let (devices, lab) = if args.mock {
        let lab = MockLab::lab();
        (lab.devices(), Some(lab))
    } else {
        if config.url.is_empty() {
            anyhow::bail!("config url must be set for a non-mock scan");
        }
        (fetch_devices(&config.url, &mut ids).await?, None)
    };
    info!(devices = devices.len(), "device inventory ready");

    // Devices are stored before neighbor discovery; the address-to-node-id
    // map lets the sink translate resolved records into link writes.
    let graph = TopoGraph::connect(&config.neoserver, &config.neouser, &config.neopassword).await?;
    let node_ids: HashMap<String, i64> = devices
        .iter()
        .map(|d| (d.management_address.clone(), d.node_id))
        .collect();
    graph.save_devices(&devices).await?;

    let sink = Arc::new(BatchingSink::new(graph, node_ids, config.savebatch));
    let settings = OrchestratorSettings {
        probe_capacity: config.max_probes,
        ..OrchestratorSettings::default()
    };

    let summary = match lab {
        Some(lab) => run_scan(devices, Arc::new(lab), sink, settings, config.drain_workers).await?,
        None => {
            let factory = SnmpSessionFactory::new(SessionSettings {
                community: config.community.clone(),
                ..SessionSettings::default()
            });
            run_scan(devices, Arc::new(factory), sink, settings, config.drain_workers).await?
        }
    };

    info!(
        probed = summary.probes.probed,
        probe_failures = summary.probes.failed,
        saved = summary.drain.saved,
        save_failures = summary.drain.failed,
        still_pending = summary.still_pending,
        "scan summary"
    );
    Ok(())
}

struct ScanSummary {
    probes: ProbeStats,
    drain: DrainStats,
    still_pending: usize,
}

async fn run_scan<F, S>(
    devices: Vec<DeviceDescriptor>,
    factory: Arc<F>,
    sink: Arc<S>,
    settings: OrchestratorSettings,
    drain_workers: usize,
) -> anyhow::Result<ScanSummary>
where
    F: SessionFactory,
    S: NeighborSink + 'static,
{
    let mut orchestrator = DiscoveryOrchestrator::new(devices, factory, settings);
    let probes = orchestrator.run_probes()?;
    let resolution = orchestrator.run_resolution()?;
    let drain = orchestrator.drain(sink, drain_workers)?;

    let probe_stats = probes.await.context("probe pool failed")?;
    resolution.await.context("resolution tasks failed")?;
    let drain_stats = drain.await.context("result drain failed")?;

    Ok(ScanSummary {
        probes: probe_stats,
        drain: drain_stats,
        still_pending: orchestrator.still_pending(),
    })
}

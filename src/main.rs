//! svcsim - run a simulated fleet and report its synthetic request stream.

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use svcsim::{Fleet, MetricsSink, SimConfig, SimError, TracingSink, REQUEST_TIME_METRIC};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// svcsim CLI
#[derive(Parser)]
#[command(name = "svcsim")]
#[command(about = "Synthetic load-and-failure simulator", long_about = None)]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, env = "SVCSIM_CONFIG")]
    config: Option<String>,

    /// Nodes in the simulation
    #[arg(short, long, env = "SVCSIM_NODES")]
    nodes: Option<usize>,

    /// Requests per second across the fleet
    #[arg(short, long, env = "SVCSIM_RPS")]
    rps: Option<u32>,

    /// Run rolling-deploy rotations back to back
    #[arg(long)]
    deploy: bool,

    /// Seconds between summary reports
    #[arg(long, default_value_t = 10)]
    report_interval: u64,

    /// Log level
    #[arg(long, env = "SVCSIM_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "SVCSIM_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), SimError> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());

    if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let mut config = match cli.config.as_deref() {
        Some(path) => SimConfig::from_json_file(path)?,
        None => SimConfig::default(),
    };
    if let Some(nodes) = cli.nodes {
        config.nodes = nodes;
    }
    if let Some(rps) = cli.rps {
        config.base_rps = rps;
    }
    config.validate()?;

    let sink = Arc::new(MetricsSink::new()?);
    // Individual requests are traced at `trace` level, e.g. RUST_LOG=svcsim=trace.
    let (fleet, _tasks) = Fleet::launch(&config, Arc::new((Arc::clone(&sink), TracingSink)))?;

    if cli.deploy {
        let fleet = fleet.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = fleet.deploy().await {
                    tracing::error!(error = %e, "deploy rotation aborted");
                    break;
                }
            }
        });
    }

    let mut report = tokio::time::interval(Duration::from_secs(cli.report_interval.max(1)));
    loop {
        tokio::select! {
            _ = report.tick() => {
                for (key, stats) in sink.snapshot() {
                    tracing::info!(
                        metric = REQUEST_TIME_METRIC,
                        node = %key.node,
                        code = key.code,
                        error = key.error,
                        count = stats.count,
                        mean_ms = stats.mean_ms(),
                        "series"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(nodes = fleet.len(), "shutting down");
                return Ok(());
            }
        }
    }
}

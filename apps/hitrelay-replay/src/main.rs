use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{error, info};

mod config;
mod driver;
mod error;
mod scenario;

use config::ReplayConfig;
use driver::{replay, ReplayReport};
use error::ReplayError;
use hitrelay_core::{IdAllocator, RandomEntropy};
use hitrelay_node::service::HitRelay;
use hitrelay_transport::endpoint::{ChannelEndpoint, InMemoryEndpoint};
use hitrelay_transport::ping::InMemoryPingHost;
use hitrelay_transport::primitives::{HitPrimitives, InMemoryPrimitives};
use hitrelay_transport::{LoadOutcome, TransportHealthSnapshot};
use hitrelay_transport_http::{HttpChannelEndpoint, HttpPingHost, HttpPrimitives};
use scenario::Scenario;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Path to the scenario file
    #[arg(long, short, global = true)]
    scenario: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay the scenario (default)
    Run,
    /// Parse the scenario and print its plan
    Check,
}

#[tokio::main]
async fn main() {
    let filter = std::env::var("HITRELAY_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let Some(scenario_path) = cli.scenario.clone() else {
        error!("no scenario given; pass --scenario <file>");
        std::process::exit(2);
    };

    let result = match cli.command {
        Some(Commands::Check) => check(&scenario_path),
        Some(Commands::Run) | None => run(cli.config, &scenario_path).await,
    };
    if let Err(err) = result {
        error!("{err}");
        std::process::exit(1);
    }
}

fn check(scenario_path: &Path) -> Result<(), ReplayError> {
    let scenario = Scenario::load(scenario_path)?;
    for line in scenario.describe() {
        println!("{line}");
    }
    println!("last event at step {}", scenario.last_event_step());
    Ok(())
}

async fn run(config_path: Option<PathBuf>, scenario_path: &Path) -> Result<(), ReplayError> {
    let config = ReplayConfig::new(config_path)?;
    let scenario = Scenario::load(scenario_path)?;
    let ids = match config.seed {
        Some(seed) => IdAllocator::new(RandomEntropy::seeded(seed)),
        None => IdAllocator::new(RandomEntropy::from_entropy()),
    };
    info!(
        senders = scenario.senders.len(),
        pings = scenario.pings.len(),
        dry_run = config.dry_run,
        "starting replay"
    );

    if config.dry_run {
        let mut endpoint = InMemoryEndpoint::default();
        endpoint.set_auto_complete(true);
        let mut ping_host = InMemoryPingHost::default();
        ping_host.set_auto_settle(Some(LoadOutcome::Loaded));
        let mut relay = HitRelay::new(
            InMemoryPrimitives::default(),
            endpoint,
            ping_host,
            config.relay_config(),
            ids,
        );
        let report = replay(&mut relay, &scenario, &config).await?;
        log_report(
            &report,
            relay.primitives.health_snapshot(),
            relay.registry.endpoint().health_snapshot(),
        );
    } else {
        let http = config.http_config();
        let mut relay = HitRelay::new(
            HttpPrimitives::new(&http)?,
            HttpChannelEndpoint::new(&http)?,
            HttpPingHost::new(&http)?,
            config.relay_config(),
            ids,
        );
        let report = replay(&mut relay, &scenario, &config).await?;
        log_report(
            &report,
            relay.primitives.health_snapshot(),
            relay.registry.endpoint().health_snapshot(),
        );
    }
    Ok(())
}

fn log_report(
    report: &ReplayReport,
    primitives: TransportHealthSnapshot,
    endpoint: TransportHealthSnapshot,
) {
    info!(
        hits_sent = report.hits_sent,
        hits_exhausted = report.hits_exhausted,
        pings_sent = report.pings_sent,
        drained = report.drained,
        final_step = report.final_step,
        "replay finished"
    );
    info!(stats = ?report.stats, "relay stats");
    info!(
        queued = primitives.outbound_queued,
        ok = primitives.outbound_send_ok,
        err = primitives.outbound_send_err,
        last_error = ?primitives.last_error,
        "primitive transport health"
    );
    info!(
        queued = endpoint.outbound_queued,
        ok = endpoint.outbound_send_ok,
        err = endpoint.outbound_send_err,
        received = endpoint.inbound_received,
        dropped = endpoint.inbound_dropped,
        last_error = ?endpoint.last_error,
        "channel endpoint health"
    );
}

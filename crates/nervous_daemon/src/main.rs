pub mod api;
pub mod config;
pub mod deliveries;
pub mod executor;
pub mod maintenance;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use nervous_core::{DeliveryResult, Disposition, Fabric, WebhookEvent};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::ApiState;
use crate::config::{Config, LogFormat, LoggingConfig};
use crate::deliveries::DeliveryLedger;
use crate::executor::ChannelExecutor;

#[derive(Parser)]
#[command(name = "nervous")]
#[command(about = "Self-healing webhook routing fabric")]
struct Cli {
    /// Config file (defaults to ~/.nervous/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server and the maintenance schedule
    Serve {
        /// API port (overrides [api].port)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Feed a JSON-lines event file through the fabric and print the status
    Replay {
        /// Input file, one event per line
        file: PathBuf,
        /// Destination neuron for every event
        #[arg(long)]
        destination: String,
        /// Acknowledge every routed delivery as successful
        #[arg(long)]
        ack: bool,
    },
    /// Print the effective configuration
    ShowConfig,
}

fn init_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("invalid [logging].level")?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("setting default subscriber failed: {}", e))
}

async fn serve(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    let (executor, actions) = ChannelExecutor::new();
    let dispatcher = executor::spawn_dispatcher(actions);
    let fabric = Arc::new(Fabric::new(config.fabric.clone(), Arc::new(executor))?);
    let defaults = fabric.immune().create_default_antibodies();
    info!(antibodies = defaults.len(), "Default antibodies ready");

    let ledger = Arc::new(DeliveryLedger::new());
    let schedule = if config.maintenance.enabled {
        let every = Duration::from_secs(config.fabric.maintenance.interval_secs);
        info!(interval_secs = every.as_secs(), "Maintenance schedule started");
        Some(maintenance::spawn_schedule(fabric.clone(), ledger.clone(), every))
    } else {
        warn!("Maintenance schedule disabled; use POST /api/maintenance");
        None
    };

    let result = if config.api.enabled {
        let state = ApiState {
            fabric: fabric.clone(),
            ledger,
            default_destination: config.api.default_destination.clone().into(),
        };
        api::run_api_server(state, port.unwrap_or(config.api.port), config.api.public).await
    } else {
        info!("API disabled, running maintenance only");
        tokio::signal::ctrl_c().await.map_err(anyhow::Error::from)
    };

    if let Some(schedule) = schedule {
        schedule.abort();
    }
    drop(fabric);
    dispatcher.abort();
    result
}

async fn replay(config: Config, file: PathBuf, destination: String, ack: bool) -> anyhow::Result<()> {
    let content = fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;

    let mut events = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<WebhookEvent>(line) {
            Ok(event) => events.push(event),
            Err(e) => warn!(line = line_no + 1, error = %e, "Skipping unparseable line"),
        }
    }
    info!(events = events.len(), file = %file.display(), "Replaying events");

    let (executor, actions) = ChannelExecutor::new();
    let dispatcher = executor::spawn_dispatcher(actions);
    let fabric = Fabric::new(config.fabric, Arc::new(executor))?;
    fabric.immune().create_default_antibodies();

    let outcomes = fabric.process_batch(events, &destination.into())?;
    if ack {
        for outcome in outcomes {
            if let Disposition::Routed { ticket } = outcome.disposition {
                fabric.complete_delivery(ticket, DeliveryResult::success(0.0))?;
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&fabric.status())?);
    drop(fabric);
    let actions = dispatcher.await?;
    info!(actions = actions, "Replay complete");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let path = cli.config.unwrap_or_else(Config::default_path);
    let config = Config::load_or_create(&path)?;
    init_logging(&config.logging)?;
    info!(config_path = %path.display(), "Configuration loaded");

    let result = match cli.command {
        Commands::Serve { port } => serve(config, port).await,
        Commands::Replay {
            file,
            destination,
            ack,
        } => replay(config, file, destination, ack).await,
        Commands::ShowConfig => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    };

    if let Err(e) = &result {
        error!(error = %format!("{:#}", e), "Fatal Error");
    }
    result
}

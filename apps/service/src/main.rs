use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use uuid::Uuid;

use lookout_service::Engine;
use lookout_service::config::Config;

#[derive(Parser)]
#[command(name = "lookout-service")]
#[command(about = "Uptime check dispatcher and on-call rotation service")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "LOOKOUT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Trigger a dispatcher batch on a fixed interval until interrupted
    Run {
        /// Seconds between batches (overrides config file)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Run a single batch and print the report as JSON
    Once,
    /// Print who is currently on call for a schedule
    OnCall { schedule_id: Uuid },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logger::init_tracing();

    let config = Config::from_config(args.config.as_ref()).context("Failed to load configuration")?;

    match args.command {
        Command::Config => {
            println!("{config}");
        }
        Command::Once => {
            let engine = Engine::open(&config).await?;
            let report = engine.dispatcher.run_batch().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::OnCall { schedule_id } => {
            let engine = Engine::open(&config).await?;
            match engine.on_call.current_on_call(schedule_id, Utc::now()).await? {
                Some(view) => println!("{}", serde_json::to_string_pretty(&view)?),
                None => anyhow::bail!("Schedule {schedule_id} not found"),
            }
        }
        Command::Run { interval } => {
            let engine = Engine::open(&config).await?;
            let seconds = interval.unwrap_or(config.dispatcher.trigger_interval_seconds).max(1);

            info!(
                interval_seconds = seconds,
                max_concurrency = config.dispatcher.max_concurrency,
                "Starting check dispatcher"
            );
            let handle = engine.dispatcher.clone().spawn_periodic(Duration::from_secs(seconds));

            tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
            warn!("Shutdown requested, stopping dispatcher");
            handle.abort();
        }
    }

    Ok(())
}

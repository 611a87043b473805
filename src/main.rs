use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use clap::{Args, Parser, Subcommand};
use punch_relay::app::Application;
use punch_relay::logging::init_logging;
use punch_relay::shutdown::{wait_for_shutdown_signal, ShutdownManager};
use relay_config::{AppConfig, ConfigPatch, LogLevel, OutputFormat};
use relay_domain::PUNCH_TIME_FORMAT;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "punch-relay")]
#[command(version)]
#[command(about = "Relays attendance punches from a time-clock terminal to a remote API")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file, created with defaults when missing
    #[arg(short, long, global = true, default_value = "relay.toml")]
    config: PathBuf,

    /// Overrides logging.level
    #[arg(short, long, global = true)]
    log_level: Option<LogLevel>,

    /// Overrides logging.format
    #[arg(long, global = true)]
    log_format: Option<OutputFormat>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the periodic relay until Ctrl+C or SIGTERM
    Run,
    /// Run one sync cycle now
    Sync,
    /// Print the service status as JSON
    Status,
    /// Check terminal and API reachability
    Test {
        /// Terminal address to test instead of the configured one
        #[arg(long)]
        address: Option<String>,
    },
    /// Print the punches of a time range as JSON
    Fetch {
        /// Range start, "YYYY-MM-DD HH:MM:SS"
        #[arg(long)]
        from: String,
        /// Range end, "YYYY-MM-DD HH:MM:SS"
        #[arg(long)]
        to: String,
    },
    /// Inspect or change the persisted configuration
    Config(ConfigCommands),
}

#[derive(Args, Debug)]
struct ConfigCommands {
    #[command(subcommand)]
    action: ConfigActions,
}

#[derive(Subcommand, Debug)]
enum ConfigActions {
    /// Print the effective configuration
    Show,
    /// Update keys, e.g. `api.url=http://10.0.0.5:8000/api/pointages`
    Set {
        #[arg(required = true)]
        pairs: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let file_logging = if cli.config.exists() {
        AppConfig::load(Some(cli.config.as_path())).map(|c| c.logging).unwrap_or_default()
    } else {
        Default::default()
    };
    init_logging(
        cli.log_level.unwrap_or(file_logging.level),
        cli.log_format.unwrap_or(file_logging.format),
    )?;

    let app = Application::open(&cli.config).await?;

    match cli.command {
        Commands::Run => run(app).await,
        Commands::Sync => {
            let clean = app.service().force_sync().await;
            print_json(&app.service().status().await)?;
            Ok(if clean { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Commands::Status => {
            print_json(&app.service().status().await)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Test { address } => {
            let report = app.service().test_connections(address).await;
            print_json(&report)?;
            Ok(if report.device && report.api {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Fetch { from, to } => {
            let start = parse_local(&from)?;
            let end = parse_local(&to)?;
            let records = app.service().fetch_between(start, end).await?;
            print_json(&records)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config(ConfigCommands { action }) => {
            let config = match action {
                ConfigActions::Show => app.store().snapshot().await,
                ConfigActions::Set { pairs } => {
                    let patch = ConfigPatch::parse_pairs(&pairs)?;
                    app.service().update_config(&patch).await?
                }
            };
            print!("{}", config.to_toml()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(app: Application) -> Result<ExitCode> {
    info!("Starting punch relay");

    let shutdown_manager = ShutdownManager::new();
    let app = Arc::new(app);
    let mut app_handle = {
        let app = Arc::clone(&app);
        let shutdown_rx = shutdown_manager.subscribe().await;
        tokio::spawn(async move { app.run(shutdown_rx).await })
    };

    let result = tokio::select! {
        joined = &mut app_handle => joined,
        _ = wait_for_shutdown_signal() => {
            info!("Shutting down");
            shutdown_manager.shutdown().await;
            let grace = Duration::from_secs(
                app.store().snapshot().await.service.shutdown_grace_seconds + 5,
            );
            match tokio::time::timeout(grace, &mut app_handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!("Shutdown timed out, exiting anyway");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
    };

    match result.context("relay task panicked")? {
        Ok(()) => {
            info!("Punch relay stopped");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!("Punch relay failed: {:#}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn parse_local(raw: &str) -> Result<DateTime<Local>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), PUNCH_TIME_FORMAT)
        .with_context(|| format!("invalid time '{raw}', expected YYYY-MM-DD HH:MM:SS"))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| anyhow!("'{raw}' does not exist in the local time zone"))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

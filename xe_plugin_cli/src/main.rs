//! xe-plugin - install, update and remove XpressEngine plugins.

mod error;
mod formatter;

use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use error::CliError;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;
use xe_plugin_core::{Config, OperationOutcome, Orchestrator, Report};

#[derive(Debug, Parser)]
#[command(name = "xe-plugin")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Install, update and remove plugins through the dependency tool", long_about = None)]
struct Cli {
    /// Sets the level of verbosity
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Run without a console: enforce the time limit and ignore hangups
    #[arg(long, global = true)]
    detached: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Install or update plugins from the marketplace
    InstallOrUpdate {
        /// Plugins as `id` or `id:version`
        #[arg(value_name = "TARGET", required = true)]
        targets: Vec<String>,
    },

    /// Activate an installed plugin
    Activate {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Run the update step of an activated plugin
    Update {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Remove installed plugins
    Remove {
        #[arg(value_name = "ID", required = true)]
        ids: Vec<String>,
    },

    /// Show the last operation
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if cli.detached {
        config.interactive = false;
    }
    let orchestrator = Orchestrator::from_config(&config).await?;

    match cli.command {
        Commands::InstallOrUpdate { targets } => {
            let outcome = orchestrator.install_or_update(&targets).await?;
            formatter::print_outcome(&Report::from_state(outcome.state()));
            orchestrator.apply_changes(&outcome).await?;
            Ok(exit_code(&outcome))
        }
        Commands::Remove { ids } => {
            let outcome = orchestrator.remove(&ids).await?;
            formatter::print_outcome(&Report::from_state(outcome.state()));
            Ok(exit_code(&outcome))
        }
        Commands::Activate { id } => {
            if orchestrator.activate_plugin(&id).await? {
                println!("Plugin {} activated", id.green());
            } else {
                println!("Plugin {} is already activated", id);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Update { id } => {
            orchestrator.update_plugin(&id).await?;
            println!("Plugin {} updated", id.green());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status { json } => {
            let state = orchestrator.status().await?;
            let report = Report::from_state(&state);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                formatter::print_status(&state, &report);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn exit_code(outcome: &OperationOutcome) -> ExitCode {
    ExitCode::from(outcome.exit_code() as u8)
}

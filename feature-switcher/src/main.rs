mod config;
mod telemetry;

use clap::{Parser, Subcommand};
use config::{Config, ConfigError};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "feature-switcher", about = "Feature flag node and manager services")]
struct Cli {
    /// Path to the YAML config file.
    #[arg(long, short)]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Serve the feature registry of one environment.
    Node,
    /// Serve the aggregated view over all known nodes.
    Manager,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Telemetry(#[from] telemetry::TelemetryError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("node failed: {0}")]
    Node(#[from] node::NodeError),
    #[error("manager failed: {0}")]
    Manager(#[from] manager::ManagerError),
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        tracing::error!(error = %e, "Exiting");
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = Config::from_file(&cli.config)?;
    let _telemetry = telemetry::init(&config.common)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match cli.command {
        CliCommand::Node => {
            let node_config = config.node()?;
            runtime.block_on(node::run(node_config))?;
        }
        CliCommand::Manager => {
            let manager_config = config.manager()?;
            runtime.block_on(manager::run(manager_config))?;
        }
    }

    Ok(())
}

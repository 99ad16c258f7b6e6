//! Storyloom CLI: the main entry point.
//!
//! Commands:
//! - `onboard`: Write the default config file
//! - `turn`: Run one turn and print the outcome JSON
//! - `gateway`: Start the HTTP gateway
//! - `roles`: List the persona registry
//! - `config`: Show, locate or validate the configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "storyloom",
    about = "Storyloom: storytelling and storyboard agent for the media canvas",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the configuration directory and config file
    Onboard,

    /// Run a single turn through the pipeline
    Turn {
        /// User message appended to the request
        #[arg(short, long)]
        message: Option<String>,

        /// Path to a TurnRequest JSON file
        #[arg(short, long)]
        request: Option<PathBuf>,
    },

    /// Start the HTTP gateway server
    Gateway {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List the available roles
    Roles,

    /// Configuration commands (defaults to `show`)
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration with secrets redacted
    Show,
    /// Print the config file path
    Path,
    /// Load and validate the configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so `turn` output stays valid JSON
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Turn { message, request } => commands::turn::run(message, request).await?,
        Commands::Gateway { port } => commands::gateway::run(port).await?,
        Commands::Roles => commands::roles::run(),
        Commands::Config { action } => match action.unwrap_or(ConfigAction::Show) {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Validate => commands::config_cmd::validate().await?,
        },
    }

    Ok(())
}

//! Predictive Horizontal Pod Autoscaler CLI
//!
//! A command-line tool for inspecting autoscalers, their traffic history
//! and the health of the controller.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{autoscalers, debug, history};

/// Predictive Horizontal Pod Autoscaler CLI
#[derive(Parser)]
#[command(name = "phpa")]
#[command(author, version, about = "CLI for the Predictive Horizontal Pod Autoscaler", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via PHPA_API_URL env var)
    #[arg(long, env = "PHPA_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Get autoscalers and their history
    #[command(subcommand)]
    Get(GetCommands),

    /// Debug and troubleshooting commands
    #[command(subcommand)]
    Debug(DebugCommands),
}

#[derive(Subcommand)]
pub enum GetCommands {
    /// List managed autoscalers
    Autoscalers {
        /// Filter by namespace
        #[arg(long, short)]
        namespace: Option<String>,
    },

    /// Show recorded traffic history for an autoscaler
    History {
        /// Autoscaler (format: namespace/name or just name)
        autoscaler: String,

        /// Only show the history of this model type
        #[arg(long, short)]
        model: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum DebugCommands {
    /// Show controller health and readiness
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;

    let client = client::ApiClient::new(&config.resolve_api_url(cli.api_url))?;
    let default_namespace = config
        .default_namespace
        .clone()
        .unwrap_or_else(|| "default".to_string());

    match cli.command {
        Commands::Get(get_cmd) => match get_cmd {
            GetCommands::Autoscalers { namespace } => {
                autoscalers::get_autoscalers(&client, namespace, cli.format).await?;
            }
            GetCommands::History { autoscaler, model } => {
                history::get_history(&client, &autoscaler, &default_namespace, model, cli.format)
                    .await?;
            }
        },
        Commands::Debug(debug_cmd) => match debug_cmd {
            DebugCommands::Health => {
                debug::show_health(&client, cli.format).await?;
            }
        },
    }

    Ok(())
}

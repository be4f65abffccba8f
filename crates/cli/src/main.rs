//! Replica Governor CLI
//!
//! A command-line tool for inspecting a running governor: its decision
//! journal, the last polled cluster status and component health. It can
//! also ask the governor for an immediate failover.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{cluster, decisions, failover, health};

/// Replica Governor CLI
#[derive(Parser)]
#[command(name = "rgctl")]
#[command(author, version, about = "CLI for the Replica Governor", long_about = None)]
pub struct Cli {
    /// Governor API URL (can also be set via RG_API_URL env var)
    #[arg(long, env = "RG_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show recent scaling and failover decisions
    Decisions {
        /// Filter by lane (scaling, failover)
        #[arg(long, short)]
        lane: Option<String>,

        /// Maximum number of decisions to show
        #[arg(long, short = 'n', default_value_t = 20)]
        limit: usize,
    },

    /// Show the last polled primary/replica status
    Cluster,

    /// Show governor component health and readiness
    Health,

    /// Promote the best replica to primary now
    Failover {
        /// Confirm the promotion
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize client
    let client = client::ApiClient::new(&cli.api_url)?;

    // Execute command
    match cli.command {
        Commands::Decisions { lane, limit } => {
            decisions::show_decisions(&client, lane, limit, cli.format).await?;
        }
        Commands::Cluster => {
            cluster::show_cluster(&client, cli.format).await?;
        }
        Commands::Health => {
            health::show_health(&client, cli.format).await?;
        }
        Commands::Failover { yes } => {
            failover::run_failover(&client, yes, cli.format).await?;
        }
    }

    Ok(())
}

//! Parameter Exchange Agent
//!
//! Reads and writes the region-scoped parameters stacks use to hand resource
//! identifiers to each other, against the same state file as the deployer.
//!
//! # Usage
//! ```bash
//! # List parameters published in the edge region
//! param-exchange --account 581911119805 list --region us-east-1
//!
//! # Read one
//! param-exchange --account 581911119805 get --region us-east-1 --key CognitoCertArn
//!
//! # Seed one by hand
//! param-exchange --account 581911119805 put --region us-east-1 --key SubdomainLambdaArn --value arn:...
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use edgesite_engine::{ParameterExchange, Scope, SimulatedCloud};

// ============================================================
// CLI Definition
// ============================================================

#[derive(Parser)]
#[command(name = "param-exchange")]
#[command(about = "Edgesite Parameter Exchange Agent", long_about = None)]
#[command(version)]
struct Cli {
    /// Account owning the parameters
    #[arg(long, env = "EDGESITE_ACCOUNT")]
    account: String,

    /// Cloud state file
    #[arg(long, default_value = ".edgesite/state.json", env = "EDGESITE_STATE")]
    state: PathBuf,

    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List parameters in a region
    List {
        #[arg(long)]
        region: String,
    },

    /// Read a parameter
    Get {
        #[arg(long)]
        region: String,

        #[arg(long)]
        key: String,
    },

    /// Write a parameter
    Put {
        #[arg(long)]
        region: String,

        #[arg(long)]
        key: String,

        #[arg(long)]
        value: String,
    },
}

// ============================================================
// Main Entry Point
// ============================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(parent) = cli.state.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let cloud = SimulatedCloud::open(&cli.state)
        .await
        .with_context(|| format!("Failed to open state file {}", cli.state.display()))?;

    match cli.command {
        Commands::List { region } => {
            let client = exchange(&cloud, &cli.account, &region);
            let parameters = client
                .list(&region)
                .await
                .with_context(|| format!("Failed to list parameters in {}", region))?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&parameters)?);
                return Ok(());
            }

            println!("\n{:<36} {:<8} {:<20} {:<60}", "NAME", "VERSION", "WRITER", "VALUE");
            println!("{}", "-".repeat(127));

            for parameter in &parameters {
                println!(
                    "{:<36} {:<8} {:<20} {:<60}",
                    truncate(&parameter.name, 36),
                    parameter.version,
                    parameter.writer.as_deref().unwrap_or("-"),
                    truncate(&parameter.value, 60)
                );
            }

            info!(region = %region, count = parameters.len(), "Listed parameters");
        }

        Commands::Get { region, key } => {
            let client = exchange(&cloud, &cli.account, &region);
            let value = client
                .get(&region, &key)
                .await
                .with_context(|| format!("Failed to read {} in {}", key, region))?;

            if cli.json {
                println!("{}", serde_json::json!({ "key": key, "region": region, "value": value }));
            } else {
                println!("{}", value);
            }
        }

        Commands::Put { region, key, value } => {
            let client = exchange(&cloud, &cli.account, &region);
            let write = client
                .put(&region, &key, &value)
                .await
                .with_context(|| format!("Failed to write {} in {}", key, region))?;
            cloud.persist().await?;

            if write.changed {
                println!("Wrote {} (version {})", key, write.version);
            } else {
                println!("{} unchanged (version {})", key, write.version);
            }
        }
    }

    Ok(())
}

/// Exchange client calling from `region` of `account`
fn exchange<'a>(
    cloud: &'a SimulatedCloud,
    account: &str,
    region: &str,
) -> ParameterExchange<'a, SimulatedCloud> {
    ParameterExchange::new(cloud, Scope::new(account, region))
}

/// Truncate string for display
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

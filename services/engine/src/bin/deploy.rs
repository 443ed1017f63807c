//! Edgesite Deploy - Standalone Binary
//!
//! Deploys the certificate, edge function and website stacks in dependency
//! order against the cloud recorded in a state file.
//!
//! # Usage
//! ```bash
//! # Register the hosted zone for the apex
//! edgesite-deploy zone register example.com
//!
//! # Show the deploy order
//! edgesite-deploy --config edgesite.toml plan
//!
//! # Deploy everything, or selected stacks
//! edgesite-deploy --config edgesite.toml deploy
//! edgesite-deploy --config edgesite.toml deploy --stack WebsiteStack
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use edgesite_engine::provider::HostedZoneLookup;
use edgesite_engine::stacks::StackReport;
use edgesite_engine::{DeployConfig, DeploymentPlan, Orchestrator, SimulatedCloud};

// ============================================================
// CLI Definition
// ============================================================

#[derive(Parser, Debug)]
#[command(name = "edgesite-deploy", version, about = "Deploy an edge-distributed static website")]
struct Cli {
    /// Deployment configuration file
    #[arg(long, default_value = "edgesite.toml", env = "EDGESITE_CONFIG")]
    config: PathBuf,

    /// Cloud state file
    #[arg(long, default_value = ".edgesite/state.json", env = "EDGESITE_STATE")]
    state: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deploy stacks in dependency order
    Deploy {
        /// Only deploy these stacks (still in plan order)
        #[arg(long = "stack")]
        stacks: Vec<String>,
    },

    /// Print the deploy order and each stack's dependencies
    Plan,

    /// Manage hosted zones
    Zone {
        #[command(subcommand)]
        command: ZoneCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ZoneCommands {
    /// Register an externally owned hosted zone
    Register {
        /// Apex domain (e.g., example.com)
        domain: String,

        /// Registrar does not delegate to the zone yet; DNS validation will not complete
        #[arg(long)]
        undelegated: bool,
    },

    /// List DNS records in the zone for an apex domain
    List {
        domain: String,
    },
}

// ============================================================
// Main Entry Point
// ============================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .json()
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
        Commands::Deploy { stacks } => {
            let config = DeployConfig::load(&cli.config)
                .with_context(|| format!("Failed to load {}", cli.config.display()))?;
            let plan = DeploymentPlan::new(config.build_stacks()?)?;

            info!(order = ?plan.order(), "Starting deploy");

            let orchestrator = Orchestrator::new(&cloud, plan)
                .with_stack_timeout(config.timeouts.stack())
                .with_checkpoint(&cloud);
            let summary = orchestrator.deploy(&stacks).await.context("Deploy failed")?;

            for report in &summary.reports {
                print_report(report);
            }

            println!(
                "\nRun {}: {} stack(s), {} resource change(s)",
                summary.run_id,
                summary.reports.len(),
                summary.changed_resources()
            );
        }

        Commands::Plan => {
            let config = DeployConfig::load(&cli.config)
                .with_context(|| format!("Failed to load {}", cli.config.display()))?;
            let plan = DeploymentPlan::new(config.build_stacks()?)?;

            println!("\n{:<4} {:<20} {:<28} {:<40}", "#", "STACK", "SCOPE", "AFTER");
            println!("{}", "-".repeat(92));

            for (i, name) in plan.order().into_iter().enumerate() {
                let Some(stack) = plan.stack(name) else {
                    continue;
                };
                println!(
                    "{:<4} {:<20} {:<28} {:<40}",
                    i + 1,
                    name,
                    stack.scope().to_string(),
                    plan.dependencies(stack).join(", ")
                );
            }
        }

        Commands::Zone { command } => match command {
            ZoneCommands::Register {
                domain,
                undelegated,
            } => {
                let zone = cloud.register_zone(&domain, !undelegated).await;
                cloud.persist().await?;

                println!("Registered zone {} ({})", zone.name, zone.id);
                for ns in &zone.name_servers {
                    println!("  NS {}", ns);
                }
            }

            ZoneCommands::List { domain } => {
                let zone = cloud.lookup_zone(&domain).await?;
                let snapshot = cloud.snapshot().await;
                let records = snapshot
                    .hosted_zones
                    .get(&zone.id)
                    .map(|z| z.records.values().cloned().collect::<Vec<_>>())
                    .unwrap_or_default();

                println!("\n{:<6} {:<40} {:<50} {:<16}", "TYPE", "NAME", "TARGET", "OWNER");
                println!("{}", "-".repeat(115));

                for record in &records {
                    println!(
                        "{:<6} {:<40} {:<50} {:<16}",
                        record.record_type.to_string(),
                        truncate(&record.name, 40),
                        truncate(&record.target.to_string(), 50),
                        record.owner.as_deref().unwrap_or("-")
                    );
                }

                info!(zone = %zone.name, count = records.len(), "Listed records");
            }
        },
    }

    Ok(())
}

fn print_report(report: &StackReport) {
    println!("\n{} ({})", report.stack, report.scope);
    println!("{:<10} {:<22} {:<34} {:<40}", "ACTION", "KIND", "LOGICAL ID", "PHYSICAL ID");
    println!("{}", "-".repeat(108));

    for change in &report.changes {
        println!(
            "{:<10} {:<22} {:<34} {:<40}",
            change.action.to_string(),
            change.kind,
            truncate(&change.logical_id, 34),
            truncate(&change.physical_id, 40)
        );
    }

    for parameter in &report.published {
        println!(
            "  published {} (version {}{})",
            parameter.name,
            parameter.version,
            if parameter.changed { "" } else { ", unchanged" }
        );
    }

    for (name, value) in &report.outputs {
        println!("  {} = {}", name, value);
    }
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

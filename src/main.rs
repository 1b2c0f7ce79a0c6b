//! ==============================================================================
//! main.rs - sensor fleet control entry point
//! ==============================================================================
//!
//! purpose:
//!     command line front end for the control node. every subcommand runs one
//!     engine operation against the selected address list and exits.
//!
//! subcommands:
//!     lists                         address lists, selected one marked
//!     set <address>...              replace the slots of the selected list
//!     status                        probe every slot, sorted table
//!     report <kind> [--json]        system | configuration | readings | latency | combination
//!     export <kind>                 logs | databases | everything
//!
//! startup sequence:
//!     1. parse args
//!     2. load configuration (--config or config/fleet.toml)
//!     3. init logging
//!     4. build the fleet handle and select the address list
//!     5. run the subcommand
//!
//! ==============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use sensor_fleet::config::FleetConfig;
use sensor_fleet::probe::{format_latency, latency_colour};
use sensor_fleet::{logging, ExportKind, Fleet, ReportKind};

#[derive(Parser)]
#[command(name = "sensor-fleet")]
#[command(about = "Probe, report on and export a fleet of sensor nodes.")]
struct CommandLine {
    /// Configuration file (default: config/fleet.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Address list to work with (default: the first list)
    #[arg(long, global = true)]
    list: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the address lists
    #[command(alias = "l")]
    Lists,
    /// Replace the addresses of the selected list
    Set { addresses: Vec<String> },
    /// Probe every node in the list
    #[command(alias = "s")]
    Status,
    /// Build a fleet report
    #[command(alias = "r")]
    Report {
        kind: ReportKind,
        /// Emit the structured report as JSON instead of HTML
        #[arg(long)]
        json: bool,
        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Build an export bundle
    #[command(alias = "e")]
    Export {
        kind: ExportKind,
        /// Destination file (default: the bundle's download name)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CommandLine::parse();

    // step 1: load configuration
    let config = match &cli.config {
        Some(path) => FleetConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => FleetConfig::load_or_default(),
    };

    // step 2: logging
    logging::init(&config.logging.level);
    tracing::info!("[STARTUP] sensor fleet control v{}", env!("CARGO_PKG_VERSION"));
    config.print_summary();

    // step 3: fleet handle + selected list
    let fleet = Fleet::new(config).context("creating the https client")?;
    let names = fleet.list_names().await.context("reading address lists")?;
    let selected = match &cli.list {
        Some(name) => name.clone(),
        None => names.first().cloned().context("no address list available")?,
    };
    fleet
        .select(&selected)
        .await
        .with_context(|| format!("selecting address list {}", selected))?;

    // step 4: run
    match cli.command {
        Commands::Lists => {
            for name in &names {
                let marker = if *name == selected { "*" } else { " " };
                println!("{} {}", marker, name);
            }
        }
        Commands::Set { addresses } => {
            fleet.set_addresses(addresses).await?;
            println!("{}: {} slots saved", selected, fleet.raw_addresses().await.len());
        }
        Commands::Status => status(&fleet).await?,
        Commands::Report { kind, json, out } => report(&fleet, kind, json, out.as_deref()).await?,
        Commands::Export { kind, out } => export(&fleet, kind, out).await?,
    }
    Ok(())
}

// ==============================================================================
// subcommands
// ==============================================================================

async fn status(fleet: &Fleet) -> Result<()> {
    let results = fleet.check_status(true).await?;
    println!("{:<24} {:<24} {:<8} {:>9}  {}", "NAME", "ADDRESS", "STATUS", "LATENCY", "BAND");
    for result in &results {
        let (state, latency, band) = if result.reachable {
            (
                "online",
                format_latency(result.latency),
                latency_colour(Some(result.latency)),
            )
        } else {
            ("offline", "-".to_string(), latency_colour(None))
        };
        println!(
            "{:<24} {:<24} {:<8} {:>9}  {}",
            result.display_key(),
            result.address,
            state,
            latency,
            band
        );
    }
    let online = results.iter().filter(|r| r.reachable).count();
    tracing::info!("[STATUS] {}/{} nodes online", online, results.len());
    Ok(())
}

async fn report(fleet: &Fleet, kind: ReportKind, json: bool, out: Option<&Path>) -> Result<()> {
    let report = fleet
        .run_report(kind)
        .await?
        .with_context(|| format!("a {} report is already being built", kind))?;

    let document = if json { report.to_json()? } else { report.to_html() };
    match out {
        Some(path) => {
            std::fs::write(path, document).with_context(|| format!("writing {}", path.display()))?;
            tracing::info!("[REPORT] written to {}", path.display());
        }
        None => println!("{}", document),
    }
    Ok(())
}

async fn export(fleet: &Fleet, kind: ExportKind, out: Option<PathBuf>) -> Result<()> {
    let bundle = fleet
        .run_export(kind)
        .await?
        .with_context(|| format!("a {} export is already being built", kind))?;

    let path = out.unwrap_or_else(|| PathBuf::from(&bundle.download_name));
    bundle
        .artifact
        .save_to(&path)
        .with_context(|| format!("writing {}", path.display()))?;

    println!("{} ({:?}, {} entries)", path.display(), bundle.storage, bundle.included.len());
    for name in &bundle.included {
        println!("  + {}", name);
    }
    for address in &bundle.skipped {
        println!("  - {} (no response)", address);
    }
    Ok(())
}

//! Smartcard Image - command line front end
//!
//! ```bash
//! # Write card images, configurations and images.json
//! smartcard-image transform keystores/ simulator/
//!
//! # Report certificates expiring within the next 3 months
//! smartcard-image forecast keystores/ --months 3 --output target/smartcard-summary.html
//! ```
//!
//! Logging honours `RUST_LOG` (default `info`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use smartcard_image::configs::AppConfig;
use smartcard_image::pipeline::Transformer;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "smartcard-image")]
#[command(about = "Transform PKCS#12 test identities into card simulator images")]
#[command(version)]
struct Args {
    /// Configuration file (defaults to ./config.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write card images, simulation configurations and images.json
    Transform {
        /// Directory searched recursively for .p12 keystores
        source: PathBuf,
        /// Output root
        destination: PathBuf,
    },
    /// Report certificates that expire soon
    Forecast {
        /// Directory searched recursively for .p12 keystores
        source: PathBuf,
        /// Warning window in months of 30 days
        #[arg(short, long)]
        months: Option<u32>,
        /// HTML report file
        #[arg(short, long, default_value = "smartcard-summary.html")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::load()?,
    };

    match args.command {
        Command::Transform {
            source,
            destination,
        } => {
            println!("=== Smartcard Image Transformation ===\n");
            let report = Transformer::new(config)?
                .run(&source, &destination)
                .with_context(|| format!("Failed to transform {}", source.display()))?;

            println!("✓ {} keystores read", report.keystores);
            println!("✓ {} card images written", report.images.len());
            println!("✓ {} configurations written", report.configurations.len());
            println!("✓ Manifest written to {}", report.manifest.display());
            if !report.is_success() {
                for (iccsn, error) in &report.failed {
                    println!("✗ {}: {}", iccsn, error);
                }
                std::process::exit(1);
            }
        }
        Command::Forecast {
            source,
            months,
            output,
        } => {
            let months = months.unwrap_or(config.forecast.months);
            println!("=== Smartcard Expiry Forecast ({} months) ===\n", months);
            let forecast = Transformer::new(config)?
                .forecast(&source, months)
                .with_context(|| format!("Failed to read keystores from {}", source.display()))?;
            forecast.write(&output)?;

            for card in &forecast.cards {
                let mark = if card.is_expiring() { "✗" } else { "✓" };
                println!("{} {} {}", mark, card.card_type, card.iccsn);
            }
            println!("\nReport written to {}", output.display());
            if forecast.has_expiring() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

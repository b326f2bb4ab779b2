//! Reduction planner CLI
//!
//! Computes work-group sizes for reduction kernels against device presets
//! or TOML device descriptions.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use bitnet_reduction_planner::ReductionConfig;

mod commands;
mod output;

use commands::{PlanCommand, SizeCommand};
use output::OutputFormat;

/// Work-group size planner for data-parallel reductions
#[derive(Parser)]
#[command(name = "reduction-plan")]
#[command(about = "Plan work-group sizes for reduction kernels")]
#[command(long_about = r#"
Computes the work-group size and count a reduction kernel should be launched
with, given the number of work-items and the limits of the target device.

Examples:
  # Split 160 work-items on a generic GPU
  reduction-plan plan --work-items 160

  # Usable maximum on an NVIDIA preset with 8 bytes of local memory per item
  reduction-plan max --device nvidia --local-mem-per-item 8

  # Preferred size with a custom device description
  reduction-plan preferred --device-file device.toml --format json

Environment:
  BITNET_REDUCTION_PREFERRED_WG_SIZE   e.g. cpu:16,gpu:256,acc:64
  BITNET_REDUCTION_KERNEL_BUNDLES      backend list, all or none
  BITNET_REDUCTION_REGISTER_CLAMP      1/0
"#)]
#[command(version)]
#[command(author = "BitNet Contributors")]
struct Cli {
    /// Configuration file path (TOML with a [reduction] table)
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true, default_value = "warn")]
    log_level: String,

    /// Output format
    #[arg(long, value_enum, global = true, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan a reduction launch over N work-items
    Plan(PlanCommand),

    /// Device-level maximum usable work-group size
    Max(SizeCommand),

    /// Preferred work-group size for the device class
    Preferred(SizeCommand),

    /// List built-in device presets
    Presets,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    let config = ReductionConfig::load(cli.config.as_deref())
        .context("Failed to load reduction configuration")?;
    debug!(?config, "loaded configuration");

    match cli.command {
        Commands::Plan(cmd) => cmd.execute(&config, cli.format),
        Commands::Max(cmd) => cmd.execute_max(&config, cli.format),
        Commands::Preferred(cmd) => cmd.execute_preferred(&config, cli.format),
        Commands::Presets => commands::list_presets(cli.format),
    }
}

/// Logs go to stderr so JSON on stdout stays parseable.
fn setup_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

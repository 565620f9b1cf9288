use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kaiso_reconcile::{ReconcileConfig, ReconcilePipeline};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "kaiso")]
#[command(about = "Reconcile reburial-permit links against the municipality directory")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create an empty staging file.
    Init,
    /// Print the candidates found in INPUT as JSON.
    Extract { input: Option<PathBuf> },
    /// Extract, reconcile, merge into staging and write the audit.
    Reconcile { input: Option<PathBuf> },
    /// Audit the current staging file without merging.
    Audit,
    /// Add UNKNOWN records for directory entries staging has never seen.
    Seed,
    /// Check every staged URL and write reports/link_health.md.
    CheckLinks,
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing()?;

    let config = ReconcileConfig::from_env();
    info!(workspace = %config.workspace_root.display(), "kaiso starting");
    let pipeline = ReconcilePipeline::new(config).context("loading rule tables")?;

    match cli.command {
        Commands::Init => {
            let path = pipeline.init_staging().await?;
            println!("initialised staging: {}", path.display());
        }
        Commands::Extract { input } => {
            let candidates = pipeline.extract(input.as_deref()).await?;
            let json =
                serde_json::to_string_pretty(&candidates).context("serializing candidates")?;
            println!("{json}");
        }
        Commands::Reconcile { input } => {
            let summary = pipeline.run(input.as_deref()).await?;
            println!("reconcile complete: {}", summary.summary_line());
        }
        Commands::Audit => {
            let report = pipeline.audit().await?;
            println!("audit complete: {}", report.summary_line());
        }
        Commands::Seed => {
            let added = pipeline.seed().await?;
            println!("seed complete: added={added}");
        }
        Commands::CheckLinks => {
            let summary = pipeline.check_links().await?;
            println!("link check complete: {}", summary.summary_line());
        }
    }

    Ok(())
}

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the hotspot acquisition tool.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use hotspot_sync_acquisition::importer::{Importer, PostgisStore};
use hotspot_sync_acquisition::ledger::DatabaseLedger;
use hotspot_sync_acquisition::orchestrator::UpdateOrchestrator;
use hotspot_sync_acquisition_models::{AcquisitionWindow, RunSummary};
use hotspot_sync_config::Config;
use hotspot_sync_database::{db, run_migrations};
use hotspot_sync_dataset::ShapeZipReader;
use hotspot_sync_wfs::{FeatureServiceClient, ReqwestTransport};

#[derive(Parser)]
#[command(
    name = "hotspot_sync_acquisition",
    about = "Wildfire hotspot acquisition and reconciliation"
)]
struct Cli {
    /// TOML configuration file (defaults to `HOTSPOT_SYNC_CONFIG`, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Print the run summary as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire the window following the last imported one, up to yesterday
    AcquireCurrent,
    /// Re-acquire recent windows whose stored count fell short of the service
    ReconcilePast {
        /// Number of recent ledger windows to check (overrides the configured lookback)
        #[arg(long)]
        lookback: Option<u32>,
    },
    /// Acquire an explicit window, which must end before today
    Backfill {
        /// First day of the window (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,
        /// Last day of the window, inclusive (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,
    },
    /// Report incomplete windows without reloading them
    Check {
        /// Number of recent ledger windows to check (overrides the configured lookback)
        #[arg(long)]
        lookback: Option<u32>,
    },
    /// Run database migrations
    Migrate,
}

fn report(summary: &RunSummary, json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        println!("{summary}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    let db = db::connect(&config.database.connection_url()).await?;

    if matches!(cli.command, Commands::Migrate) {
        log::info!("Running database migrations...");
        run_migrations(db.as_ref()).await?;
        log::info!("Migrations complete.");
        return Ok(());
    }

    run_migrations(db.as_ref()).await?;

    let credentials = config
        .service
        .credentials()
        .map(|(user, pass)| (user.to_string(), pass.to_string()));
    let transport = ReqwestTransport::new(credentials)?;
    let source = FeatureServiceClient::new(transport, config.service.clone())?;
    let ledger = DatabaseLedger::new(db.as_ref());
    let importer = Importer::new(
        ShapeZipReader,
        PostgisStore::new(db.as_ref(), config.store.clone(), config.origin_tag()),
    );

    let mut orchestrator = UpdateOrchestrator::new(
        source,
        ledger,
        importer,
        config.acquisition.output_dir.clone(),
    );
    let today = chrono::Local::now().date_naive();
    let lookback = |arg: Option<u32>| arg.unwrap_or(config.acquisition.lookback);

    let summary = match cli.command {
        Commands::AcquireCurrent => orchestrator.acquire_current(today).await?,
        Commands::ReconcilePast { lookback: arg } => {
            orchestrator.reconcile_past(lookback(arg)).await?
        }
        Commands::Backfill { start, end } => {
            let window = AcquisitionWindow::new(start, end)?;
            orchestrator.backfill(window, today).await?
        }
        Commands::Check { lookback: arg } => orchestrator.check(lookback(arg)).await?,
        Commands::Migrate => return Ok(()),
    };

    report(&summary, cli.json)?;

    // Close the connection before a non-zero exit skips destructors.
    drop(orchestrator);
    drop(db);

    if !summary.is_success() {
        log::error!("{} finished with failures", summary.kind);
        std::process::exit(1);
    }

    Ok(())
}

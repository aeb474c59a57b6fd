use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use folio_core::TitleScorerKind;
use folio_sync::{report_recent_runs, today, SyncConfig, SyncPipeline};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "folio")]
#[command(about = "Folio book catalog harvester")]
struct Cli {
    /// Override FOLIO_TITLE_SCORER (main_title, token_sort, jaro_winkler).
    #[arg(long, global = true)]
    title_scorer: Option<TitleScorerKind>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Extract, transform and load once.
    Run,
    Extract,
    Transform,
    Load,
    Migrate,
    /// Run the pipeline on FOLIO_SYNC_CRON until interrupted.
    Schedule,
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
}

fn init_tracing() {
    let use_json = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if use_json {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = SyncConfig::from_env();
    if let Some(kind) = cli.title_scorer {
        config.title_scorer = kind;
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let summary = SyncPipeline::new(config)?.run_once().await?;
            println!(
                "sync complete: run_id={} pages={} kept={} removed={} rows={} reports={}",
                summary.run_id,
                summary.extract.staged_pages.len(),
                summary.transform.records_after,
                summary.transform.duplicates_removed,
                summary.load.rows_after,
                summary.transform.reports_dir
            );
        }
        Commands::Extract => {
            let summary = SyncPipeline::new(config)?.extract(Uuid::new_v4()).await?;
            println!(
                "extract complete: staged={} failed={} cleared={}",
                summary.staged_pages.len(),
                summary.failed_pages.len(),
                summary.cleared_pages
            );
        }
        Commands::Transform => {
            let summary = SyncPipeline::new(config)?
                .transform(Uuid::new_v4(), today())
                .await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("serializing transform summary")?
            );
        }
        Commands::Load => {
            let summary = SyncPipeline::new(config)?.load(today()).await?;
            println!(
                "load complete: upserted={} rows_before={} rows_after={}",
                summary.upserted, summary.rows_before, summary.rows_after
            );
        }
        Commands::Migrate => {
            SyncPipeline::new(config)?.migrate().await?;
            println!("migrations applied");
        }
        Commands::Schedule => {
            config.scheduler_enabled = true;
            let pipeline = Arc::new(SyncPipeline::new(config)?);
            let Some(mut sched) = pipeline.maybe_build_scheduler().await? else {
                return Ok(());
            };
            sched.start().await.context("starting scheduler")?;
            info!("scheduler running; press ctrl-c to stop");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Report { runs } => {
            println!("{}", report_recent_runs(runs, &config.reports_root())?);
        }
    }

    Ok(())
}

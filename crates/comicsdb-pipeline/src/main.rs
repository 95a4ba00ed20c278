//! ComicsDB pipeline CLI
//!
//! Invokes one pipeline job (or the reconciliation fan-out) and exits
//! non-zero unless every run ended in `Success`. Job failures are recorded on
//! the run ledger, never surfaced as a crash.

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use comicsdb_common::logging::{init_logging, LogConfig, LogLevel};
use comicsdb_pipeline::catalog::CatalogStore;
use comicsdb_pipeline::marvel::{MarvelClient, MarvelStore};
use comicsdb_pipeline::merge::MergeBatch;
use comicsdb_pipeline::runs::{self, LogNotifier};
use comicsdb_pipeline::{
    CloudFilesJob, CloudStorage, MarvelSyncJob, PipelineConfig, MIGRATOR,
};

#[derive(Parser, Debug)]
#[command(name = "comicsdb-pipeline")]
#[command(author, version, about = "ComicsDB catalog ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    job: JobCommand,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// External task id to record on the run
    #[arg(long)]
    task_id: Option<String>,
}

#[derive(Parser, Debug)]
enum JobCommand {
    /// Ingest comic archives from the cloud bucket
    CloudFiles {
        /// Bucket key prefix to crawl
        #[arg(long, default_value = "content/")]
        prefix: String,

        /// Treat the listing as authoritative and delete unseen catalog rows
        #[arg(long)]
        full: bool,

        /// Extract first pages as issue covers
        #[arg(long)]
        load_covers: bool,

        /// Chain the reconciliation batch after the run
        #[arg(long)]
        merge_after: bool,
    },

    /// Mirror the Marvel API into local tables, then reconcile
    MarvelSync,

    /// Run reconciliation jobs
    Merge {
        /// One entity, or "all" for the full sequenced batch
        #[arg(default_value = "all")]
        entity: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env().unwrap_or_default();
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    log_config.log_file_prefix = "comicsdb-pipeline".to_string();
    init_logging(&log_config)?;

    let config = PipelineConfig::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("Could not connect to database")?;
    MIGRATOR
        .run(&pool)
        .await
        .context("Could not apply migrations")?;

    let succeeded = run_command(cli, config, pool).await?;
    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_command(cli: Cli, config: PipelineConfig, pool: PgPool) -> Result<bool> {
    let notifier = LogNotifier;

    match cli.job {
        JobCommand::CloudFiles {
            prefix,
            full,
            load_covers,
            merge_after,
        } => {
            let storage = CloudStorage::new(config.storage);
            let catalog = CatalogStore::new(pool.clone());
            let mut job =
                CloudFilesJob::new(storage, catalog, prefix, full, load_covers, merge_after)
                    .context("Could not build file key matcher")?;

            let mut ok =
                runs::execute(pool.clone(), &notifier, &mut job, cli.task_id.as_deref()).await;
            if let Some(batch) = job.take_scheduled_merge() {
                ok &= batch.execute(pool, &notifier).await;
            }
            Ok(ok)
        },

        JobCommand::MarvelSync => {
            let client = MarvelClient::new(config.marvel.clone())
                .context("Could not build API client")?;
            let store = MarvelStore::new(pool.clone());
            let mut job = MarvelSyncJob::new(client, store, config.marvel.page_limit);

            let mut ok =
                runs::execute(pool.clone(), &notifier, &mut job, cli.task_id.as_deref()).await;
            if let Some(batch) = job.take_scheduled_merge() {
                ok &= batch.execute(pool, &notifier).await;
            }
            Ok(ok)
        },

        JobCommand::Merge { entity } => {
            if entity == "all" {
                let batch = MergeBatch::schedule(&pool).await?;
                return Ok(batch.execute(pool, &notifier).await);
            }

            let kind = match entity.as_str() {
                "title" => comicsdb_pipeline::JobKind::TitleMerge,
                "issue" => comicsdb_pipeline::JobKind::IssueMerge,
                "character" => comicsdb_pipeline::JobKind::CharacterMerge,
                "event" => comicsdb_pipeline::JobKind::EventMerge,
                "creator" => comicsdb_pipeline::JobKind::CreatorMerge,
                other => anyhow::bail!("Unknown merge entity: {other}"),
            };
            info!(%kind, "Running single merge job");

            let store = comicsdb_pipeline::merge::MergeStore::new(pool.clone());
            let mut job = comicsdb_pipeline::merge::MergeJob::for_kind(kind, store)
                .context("Not a merge job kind")?;
            Ok(runs::execute(pool, &notifier, &mut job, cli.task_id.as_deref()).await)
        },
    }
}

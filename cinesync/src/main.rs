//! # cinesync
//!
//! Incremental, resumable ingestion of the TMDB catalog into PostgreSQL.
//!
//! Every item's progress lives in `processing_state`, so `cinesync sync`
//! can be interrupted at any point and simply run again.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use chrono::NaiveDate;
use cinesync::{
    config::{Config, ConfigLoad, ConfigLoader, ConfigLoaderOptions},
    output,
};
use cinesync_core::{
    DailyExportSource, FileListingSource, ListingSource, PostgresCatalogWriter,
    PostgresStateStore, ReportingRepository, RunCoordinator, StateStore, SyncOptions,
    TmdbClient, database,
};
use cinesync_model::ContentType;
use clap::{Args as ClapArgs, Parser, Subcommand};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "cinesync", version)]
#[command(about = "Incremental, resumable TMDB catalog ingestion into PostgreSQL")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
struct GlobalArgs {
    /// Path to a cinesync.toml configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Load environment variables from this file instead of ./.env
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    /// Parallel workers (overrides config)
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(1..))]
    concurrency: Option<u32>,

    /// Failures allowed before an item becomes terminal (overrides config)
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(1..))]
    max_retries: Option<u32>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply database migrations and exit
    Migrate,
    /// List, seed and drain content types (movies then TV series by default)
    Sync(SyncArgs),
    /// Track ids without fetching them
    Seed(SeedArgs),
    /// Show processing status counts
    Status {
        #[arg(long = "content-type", short = 't')]
        content_type: Option<ContentType>,
    },
    /// List items that exhausted their retries
    Failures {
        #[arg(long = "content-type", short = 't')]
        content_type: ContentType,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Return every failed item to pending with a fresh retry budget
    RetryFailed {
        #[arg(long = "content-type", short = 't')]
        content_type: Option<ContentType>,
    },
    /// Re-queue completed entities older than the refresh window
    Refresh {
        #[arg(long = "content-type", short = 't')]
        content_type: ContentType,
        #[arg(long, default_value_t = 10_000)]
        limit: usize,
    },
    /// Read-only reports over ingested data
    #[command(subcommand)]
    Report(ReportCommand),
}

#[derive(ClapArgs, Debug, Clone)]
struct SyncArgs {
    /// Content types to process, in order (repeatable)
    #[arg(long = "content-type", short = 't')]
    content_types: Vec<ContentType>,

    /// Drain already tracked items without downloading a listing
    #[arg(long, default_value_t = false)]
    skip_listing: bool,

    /// Daily export to use (YYYY-MM-DD); defaults to yesterday UTC
    #[arg(long, conflicts_with = "ids_file")]
    export_date: Option<NaiveDate>,

    /// Read ids from a local export or one-id-per-line file instead;
    /// needs exactly one --content-type
    #[arg(long, requires = "content_types")]
    ids_file: Option<PathBuf>,
}

#[derive(ClapArgs, Debug, Clone)]
struct SeedArgs {
    #[arg(long = "content-type", short = 't')]
    content_type: ContentType,

    /// Comma-separated ids
    #[arg(
        long,
        value_delimiter = ',',
        required_unless_present = "ids_file",
        conflicts_with = "ids_file"
    )]
    ids: Vec<i64>,

    #[arg(long)]
    ids_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum ReportCommand {
    /// Best rated titles with a minimum number of votes
    TopRated {
        /// Rank TV series instead of movies
        #[arg(long, default_value_t = false)]
        series: bool,
        #[arg(long, default_value_t = 1_000)]
        min_votes: i64,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// People credited on the most titles
    Prolific {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Completions per hour
    Timeline {
        #[arg(long, default_value_t = 24)]
        hours: u32,
    },
    /// Failed items grouped by kind
    Failures,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_runtime_config(&cli.global)?;
    let json = cli.global.json;

    match cli.command {
        Command::Migrate => run_migrate(&config).await,
        Command::Sync(args) => run_sync(&config, args, json).await,
        Command::Seed(args) => run_seed(&config, args, json).await,
        Command::Status { content_type } => run_status(&config, content_type, json).await,
        Command::Failures {
            content_type,
            limit,
        } => run_failures(&config, content_type, limit, json).await,
        Command::RetryFailed { content_type } => {
            let reset = store_coordinator(&config)
                .await?
                .retry_failed(content_type)
                .await?;
            print_count(json, "reset", reset);
            Ok(())
        }
        Command::Refresh {
            content_type,
            limit,
        } => {
            let scheduled = store_coordinator(&config)
                .await?
                .refresh_stale(content_type, limit)
                .await?;
            print_count(json, "scheduled", scheduled);
            Ok(())
        }
        Command::Report(report) => run_report(&config, report, json).await,
    }
}

fn load_runtime_config(args: &GlobalArgs) -> anyhow::Result<Config> {
    let ConfigLoad { config, warnings } = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: args.config.clone(),
        env_file: args.env_file.clone(),
        concurrency: args.concurrency.map(|c| c as usize),
        max_retries: args.max_retries,
    })
    .load()
    .context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Run summaries stay visible; per-query sqlx noise does not. Override via RUST_LOG.
                "info,ingest=info,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file loaded");
    }

    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }

    info!(
        engine.max_retries = config.engine.max_retries,
        engine.concurrency = config.engine.concurrency,
        engine.batch_size = config.engine.batch_size,
        engine.liveness_timeout_secs = config.engine.liveness_timeout_secs,
        engine.not_found_policy = ?config.engine.not_found_policy,
        tmdb.requests_per_second = config.tmdb.requests_per_second,
        database.max_connections = config.database.max_connections,
        "engine configuration in effect"
    );

    Ok(config)
}

async fn connect(config: &Config) -> anyhow::Result<PgPool> {
    let url = config
        .database_url()
        .context("no database configured; set DATABASE_URL or DB_HOST/DB_NAME/DB_USER")?;
    database::connect(url, config.database.max_connections)
        .await
        .context("failed to connect to PostgreSQL")
}

async fn verified_store(config: &Config) -> anyhow::Result<(PgPool, PostgresStateStore)> {
    let pool = connect(config).await?;
    let state = PostgresStateStore::connect_verified(pool.clone())
        .await
        .context("state store is not ready")?;
    Ok((pool, state))
}

async fn coordinator(config: &Config) -> anyhow::Result<RunCoordinator> {
    let client = TmdbClient::new(&config.tmdb).context("failed to build TMDB client")?;
    let (pool, state) = verified_store(config).await?;

    Ok(RunCoordinator::new(
        Arc::new(state),
        Arc::new(client),
        Arc::new(PostgresCatalogWriter::new(pool)),
        config.engine.clone(),
    ))
}

/// Coordinator for commands that only touch the database; no API key needed.
async fn store_coordinator(config: &Config) -> anyhow::Result<RunCoordinator> {
    let (pool, state) = verified_store(config).await?;
    Ok(RunCoordinator::without_client(
        Arc::new(state),
        Arc::new(PostgresCatalogWriter::new(pool)),
        config.engine.clone(),
    ))
}

/// Content types a sync walks. A local ids file carries no content type,
/// so it must name exactly one.
fn sync_content_types(args: &SyncArgs) -> anyhow::Result<Vec<ContentType>> {
    if args.ids_file.is_some() {
        anyhow::ensure!(
            args.content_types.len() == 1,
            "--ids-file needs exactly one --content-type, got {}",
            args.content_types.len()
        );
    }
    if args.content_types.is_empty() {
        Ok(vec![ContentType::Movie, ContentType::TvSeries])
    } else {
        Ok(args.content_types.clone())
    }
}

/// Ctrl-C stops dispatching; in-flight items finish or release their lease.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight items");
            trigger.cancel();
        }
    });
    token
}

fn print_count(json: bool, label: &str, count: u64) {
    if json {
        println!("{}", serde_json::json!({ label: count }));
    } else {
        println!("{label} {count} item(s)");
    }
}

async fn run_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = connect(config).await?;
    database::migrate(&pool)
        .await
        .context("database migration failed")?;
    info!("Database migrations applied successfully");
    Ok(())
}

async fn run_sync(config: &Config, args: SyncArgs, json: bool) -> anyhow::Result<()> {
    let content_types = sync_content_types(&args)?;
    let listing: Arc<dyn ListingSource> = match &args.ids_file {
        Some(path) => Arc::new(FileListingSource::new(path.clone())),
        None => {
            let mut source = DailyExportSource::new(&config.tmdb)
                .context("failed to build daily export source")?;
            if let Some(date) = args.export_date {
                source = source.with_date(date);
            }
            Arc::new(source)
        }
    };
    let coordinator = coordinator(config).await?.with_listing(listing);
    let cancel = cancel_on_ctrl_c();

    let mut summaries = Vec::with_capacity(content_types.len());
    for content_type in content_types {
        if cancel.is_cancelled() {
            warn!(%content_type, "skipped after interrupt");
            break;
        }
        let summary = coordinator
            .sync(
                content_type,
                SyncOptions {
                    skip_listing: args.skip_listing,
                },
                &cancel,
            )
            .await
            .with_context(|| format!("sync of {content_type} failed"))?;
        if !json {
            print!("{}", output::sync_summary(&summary));
        }
        summaries.push(summary);
    }

    if json {
        println!("{}", output::json(&summaries)?);
    }
    Ok(())
}

async fn run_seed(config: &Config, args: SeedArgs, json: bool) -> anyhow::Result<()> {
    let ids = match &args.ids_file {
        Some(path) => FileListingSource::new(path.clone())
            .list_ids(args.content_type)
            .await
            .with_context(|| format!("failed to read ids from {}", path.display()))?,
        None => args.ids,
    };
    let outcome = store_coordinator(config)
        .await?
        .seed(args.content_type, &ids)
        .await?;

    if json {
        println!("{}", output::json(&outcome)?);
    } else {
        println!(
            "seeded {} new {} id(s), {} already tracked",
            outcome.inserted, args.content_type, outcome.already_tracked
        );
    }
    Ok(())
}

async fn run_status(
    config: &Config,
    content_type: Option<ContentType>,
    json: bool,
) -> anyhow::Result<()> {
    let reporting = ReportingRepository::new(connect(config).await?);
    let mut rows = reporting.status_counts(config.engine.max_retries).await?;
    if let Some(content_type) = content_type {
        rows.retain(|row| row.content_type == content_type);
    }

    if json {
        println!("{}", output::json(&rows)?);
    } else {
        print!("{}", output::status(&rows));
    }
    Ok(())
}

async fn run_failures(
    config: &Config,
    content_type: ContentType,
    limit: usize,
    json: bool,
) -> anyhow::Result<()> {
    let state = PostgresStateStore::new(connect(config).await?);
    let failures = state
        .terminal_failures(content_type, config.engine.max_retries, limit)
        .await?;

    if json {
        println!("{}", output::json(&failures)?);
    } else if failures.is_empty() {
        println!("no terminal failures for {content_type}");
    } else {
        print!("{}", output::failures(&failures));
    }
    Ok(())
}

async fn run_report(config: &Config, report: ReportCommand, json: bool) -> anyhow::Result<()> {
    let reporting = ReportingRepository::new(connect(config).await?);

    let (rendered, value) = match report {
        ReportCommand::TopRated {
            series,
            min_votes,
            limit,
        } => {
            let rows = if series {
                reporting.top_rated_series(min_votes, limit).await?
            } else {
                reporting.top_rated_movies(min_votes, limit).await?
            };
            (output::top_rated(&rows), output::json(&rows)?)
        }
        ReportCommand::Prolific { limit } => {
            let rows = reporting.prolific_people(limit).await?;
            (output::prolific(&rows), output::json(&rows)?)
        }
        ReportCommand::Timeline { hours } => {
            let rows = reporting.completion_timeline(hours).await?;
            (output::timeline(&rows), output::json(&rows)?)
        }
        ReportCommand::Failures => {
            let rows = reporting
                .failure_breakdown(config.engine.max_retries)
                .await?;
            (output::breakdown(&rows), output::json(&rows)?)
        }
    };

    if json {
        println!("{value}");
    } else {
        print!("{rendered}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn sync_accepts_repeated_content_types() {
        let cli = Cli::try_parse_from([
            "cinesync",
            "--concurrency",
            "4",
            "sync",
            "-t",
            "tv",
            "-t",
            "person",
            "--skip-listing",
        ])
        .expect("parses");
        assert_eq!(cli.global.concurrency, Some(4));
        match cli.command {
            Command::Sync(args) => {
                assert_eq!(
                    args.content_types,
                    vec![ContentType::TvSeries, ContentType::Person]
                );
                assert!(args.skip_listing);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn seed_requires_ids_or_a_file() {
        assert!(Cli::try_parse_from(["cinesync", "seed", "-t", "movie"]).is_err());
        let cli = Cli::try_parse_from(["cinesync", "seed", "-t", "movie", "--ids", "550,680"])
            .expect("parses");
        match cli.command {
            Command::Seed(args) => assert_eq!(args.ids, vec![550, 680]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn ids_file_needs_exactly_one_content_type() {
        assert!(Cli::try_parse_from(["cinesync", "sync", "--ids-file", "movies.ndjson"]).is_err());

        let cli = Cli::try_parse_from([
            "cinesync",
            "sync",
            "--ids-file",
            "movies.ndjson",
            "-t",
            "movie",
            "-t",
            "tv",
        ])
        .expect("parses");
        let Command::Sync(args) = cli.command else {
            panic!("expected sync");
        };
        let err = sync_content_types(&args).expect_err("two content types rejected");
        assert!(err.to_string().contains("exactly one"));

        let cli = Cli::try_parse_from([
            "cinesync",
            "sync",
            "--ids-file",
            "movies.ndjson",
            "-t",
            "movie",
        ])
        .expect("parses");
        let Command::Sync(args) = cli.command else {
            panic!("expected sync");
        };
        assert_eq!(
            sync_content_types(&args).expect("one content type"),
            vec![ContentType::Movie]
        );
    }

    #[test]
    fn sync_without_content_types_walks_movies_then_series() {
        let cli = Cli::try_parse_from(["cinesync", "sync"]).expect("parses");
        let Command::Sync(args) = cli.command else {
            panic!("expected sync");
        };
        assert_eq!(
            sync_content_types(&args).expect("defaults"),
            vec![ContentType::Movie, ContentType::TvSeries]
        );
    }

    #[test]
    fn zero_concurrency_is_rejected_at_parse_time() {
        assert!(Cli::try_parse_from(["cinesync", "--concurrency", "0", "status"]).is_err());
    }
}

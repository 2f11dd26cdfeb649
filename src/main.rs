//! SUREBET — UK & Ireland racing form scorer
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the database, and dispatches the requested pipeline stage
//! (or the whole daily chain) under a per-stage advisory lock.

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use surebet::config::AppConfig;
use surebet::engine::{Ingestor, Learner, Promoter, Scorer, Settler};
use surebet::exchange::BetfairClient;
use surebet::store::RaceStore;

#[derive(Parser)]
#[command(name = "surebet", version, about = "Daily racing scorer and learner")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Race date to process (YYYY-MM-DD, defaults to today)
    #[arg(long)]
    date: Option<NaiveDate>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the day's WIN markets and upsert runner rows
    Ingest {
        #[arg(long)]
        dry_run: bool,
    },
    /// Score every ingested runner for the day
    Score {
        #[arg(long)]
        dry_run: bool,
    },
    /// Compute coverage and flag qualifying picks
    Promote {
        #[arg(long)]
        dry_run: bool,
    },
    /// Settle closed markets into terminal outcomes
    Settle {
        #[arg(long)]
        dry_run: bool,
    },
    /// Evaluate the settled window and adjust weights
    Learn {
        /// Trailing window in days (defaults to config)
        #[arg(long)]
        window_days: Option<i64>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Run ingest, score and promote in sequence
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    let cfg = AppConfig::load(&cli.config)?;

    init_logging();

    let date = cli.date.unwrap_or_else(|| Utc::now().date_naive());
    let store = RaceStore::open(&cfg.store.db_path).await?;

    info!(%date, db = %cfg.store.db_path, "surebet starting");

    match cli.command {
        Command::Ingest { dry_run } => {
            let client = BetfairClient::new(&cfg.exchange)?;
            with_lock(&store, "ingest", date, || async {
                let summary = Ingestor::new(&client, &store, cfg.exchange.countries.clone())
                    .run(date, dry_run)
                    .await?;
                info!(
                    markets = summary.markets,
                    runners = summary.runners,
                    removed = summary.removed,
                    dry_run,
                    "Ingest complete"
                );
                Ok(())
            })
            .await
        }
        Command::Score { dry_run } => {
            with_lock(&store, "score", date, || async {
                let summary = Scorer::new(&store).run(date, dry_run).await?;
                info!(scored = summary.scored, skipped = summary.skipped, dry_run, "Scoring complete");
                Ok(())
            })
            .await
        }
        Command::Promote { dry_run } => {
            with_lock(&store, "promote", date, || async {
                let summary = Promoter::new(&store).run(date, dry_run).await?;
                info!(
                    races = summary.races,
                    valid_races = summary.valid_races,
                    ambiguous = summary.ambiguous_races,
                    promoted = summary.promoted,
                    flag_writes = summary.flag_writes,
                    dry_run,
                    "Promotion complete"
                );
                Ok(())
            })
            .await
        }
        Command::Settle { dry_run } => {
            let client = BetfairClient::new(&cfg.exchange)?;
            with_lock(&store, "settle", date, || async {
                let summary = Settler::new(&client, &store).run(date, dry_run).await?;
                info!(
                    settled = summary.settled,
                    already_settled = summary.already_settled,
                    left_pending = summary.left_pending,
                    missing = summary.missing,
                    dry_run,
                    "Settlement complete"
                );
                if summary.missing > 0 {
                    warn!(missing = summary.missing, "Closed markets had absent selections");
                }
                Ok(())
            })
            .await
        }
        Command::Learn { window_days, dry_run } => {
            let window = window_days.unwrap_or(cfg.pipeline.learning_window_days);
            with_lock(&store, "learn", date, || async {
                let note = Learner::new(&store).run(date, window, dry_run).await?;
                info!(
                    settled = note.settled_count,
                    adjustments = note.adjustments.len(),
                    dry_run,
                    "Learning complete"
                );
                Ok(())
            })
            .await
        }
        Command::Run => {
            let client = BetfairClient::new(&cfg.exchange)?;
            with_lock(&store, "run", date, || async {
                let ingest = Ingestor::new(&client, &store, cfg.exchange.countries.clone())
                    .run(date, false)
                    .await?;
                info!(markets = ingest.markets, runners = ingest.runners, "Ingest complete");

                let score = Scorer::new(&store).run(date, false).await?;
                info!(scored = score.scored, skipped = score.skipped, "Scoring complete");

                let promote = Promoter::new(&store).run(date, false).await?;
                info!(
                    valid_races = promote.valid_races,
                    promoted = promote.promoted,
                    "Promotion complete"
                );

                for pick in store.flagged_picks(date).await? {
                    info!(pick = %pick, "Today's pick");
                }
                Ok(())
            })
            .await
        }
    }
}

/// Run `body` under the advisory stage lock for (stage, date). Another
/// holder means another process is mid-stage; bail rather than race it.
async fn with_lock<F, Fut>(store: &RaceStore, stage: &str, date: NaiveDate, body: F) -> Result<()>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    if !store.try_stage_lock(stage, date).await? {
        bail!("Stage '{stage}' already running for {date}");
    }
    let result = body().await;
    store
        .release_stage_lock(stage, date)
        .await
        .with_context(|| format!("Failed to release '{stage}' lock for {date}"))?;
    result
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("surebet=info"));

    let json_logging = std::env::var("SUREBET_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}

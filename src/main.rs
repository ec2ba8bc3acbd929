use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use feedpoll::config;
use feedpoll::db;
use feedpoll::fetch::HttpFetcher;
use feedpoll::poller::{PollOptions, Poller};
use feedpoll::store::SqliteStore;

#[derive(Debug, Parser)]
#[command(author, version, about = "Poll due feeds once and record new items")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Only poll the feed with this name
    #[arg(long)]
    feed_name: Option<String>,

    /// Poll feeds even if their update frequency has not elapsed
    #[arg(long)]
    ignore_poll_times: bool,

    /// Record items without a guid even if published before the cutoff
    #[arg(long)]
    ignore_publication_times: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.default_log_directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    cfg.ensure_dirs()?;
    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    db::ensure_user(&pool, cfg.app.user_id).await?;

    let store = SqliteStore::new(pool);
    let fetcher = HttpFetcher::new(&cfg.fetch)?;
    let options = PollOptions {
        feed_name: args.feed_name,
        ignore_poll_times: args.ignore_poll_times,
        ignore_publication_times: args.ignore_publication_times,
        user_id: cfg.app.user_id,
    };

    let report = Poller::new(&store, &fetcher, options).run().await?;
    info!(
        polled = report.feeds_polled,
        failed = report.feeds_failed,
        recorded = report.items_recorded,
        "poll run complete"
    );
    Ok(())
}

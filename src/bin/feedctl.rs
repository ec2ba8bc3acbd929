use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use feedpoll::config;
use feedpoll::db::{self, SortOrder};
use feedpoll::feed::{channel_from_stored, write_feed_xml};
use feedpoll::model::ReadState;
use feedpoll::sanitize::sanitize;

#[derive(Debug, Parser)]
#[command(author, version, about = "Manage feeds and read stored items")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Subscribe to a feed
    AddFeed {
        #[arg(long)]
        name: String,
        #[arg(long)]
        uri: String,
        /// Minimum seconds between polls
        #[arg(long, default_value = "3600")]
        frequency: i64,
        /// Mark newly recorded items read
        #[arg(long)]
        archive: bool,
    },
    /// List every feed with its polling state
    ListFeeds,
    /// Enable or disable polling and listing of a feed
    SetActive {
        name: String,
        #[arg(action = clap::ArgAction::Set)]
        active: bool,
    },
    /// List stored items for the configured user
    Items {
        /// unread, read or read-later
        #[arg(long, default_value = "unread", value_parser = parse_state)]
        state: ReadState,
        #[arg(long, default_value = "1")]
        page: i64,
        #[arg(long, default_value = "50")]
        page_size: i64,
        /// asc or desc by publication date
        #[arg(long, default_value = "desc", value_parser = parse_order)]
        order: SortOrder,
    },
    /// Show one item in full
    Show { item_id: i64 },
    /// Set the read state of items
    Mark {
        #[arg(value_parser = parse_state)]
        state: ReadState,
        #[arg(required = true)]
        item_ids: Vec<i64>,
    },
    /// Write the last fetched payload of a feed to stdout
    Payload { name: String },
    /// Write a feed's recorded items as an RSS 2.0 file
    Export {
        name: String,
        #[arg(long)]
        output: PathBuf,
        /// Most recent items to include
        #[arg(long, default_value = "50")]
        limit: i64,
    },
}

fn parse_state(s: &str) -> Result<ReadState, String> {
    ReadState::parse_state(s).ok_or_else(|| format!("unknown state {:?}", s))
}

fn parse_order(s: &str) -> Result<SortOrder, String> {
    match s {
        "asc" => Ok(SortOrder::Ascending),
        "desc" => Ok(SortOrder::Descending),
        _ => Err(format!("unknown order {:?}", s)),
    }
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
    let user_id = cfg.app.user_id;
    db::ensure_user(&pool, user_id).await?;

    match args.command {
        Command::AddFeed {
            name,
            uri,
            frequency,
            archive,
        } => {
            if frequency <= 0 {
                bail!("frequency must be > 0");
            }
            let id = db::insert_feed(&pool, &name, &uri, frequency, archive).await?;
            println!("added feed {} ({})", name, id);
        }
        Command::ListFeeds => {
            for feed in db::list_feeds(&pool).await? {
                let last = feed
                    .last_poll_time
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{}\t{}\t{}\tevery {}s\tlast poll {}{}{}",
                    feed.id,
                    feed.name,
                    feed.uri,
                    feed.update_frequency_seconds,
                    last,
                    if feed.archive { "\tarchive" } else { "" },
                    if feed.active { "" } else { "\tinactive" },
                );
            }
        }
        Command::SetActive { name, active } => {
            let feed = db::get_feed_by_name(&pool, &name)
                .await?
                .ok_or_else(|| anyhow!("no feed named {}", name))?;
            db::set_feed_active(&pool, feed.id, active).await?;
        }
        Command::Items {
            state,
            page,
            page_size,
            order,
        } => {
            let total = db::count_items(&pool, user_id, state).await?;
            let items = db::list_items(&pool, user_id, state, order, page, page_size).await?;
            println!("{} {} item(s), page {}", total, state.as_str(), page);
            for item in items {
                println!(
                    "{}\t{}\t[{}] {}\n\t{}",
                    item.id,
                    item.publication_date.format("%Y-%m-%d %H:%M"),
                    item.feed_name,
                    sanitize(&item.title),
                    item.link,
                );
            }
        }
        Command::Show { item_id } => {
            let item = db::get_item(&pool, item_id, user_id)
                .await?
                .ok_or_else(|| anyhow!("item {} not found", item_id))?;
            println!("{}", sanitize(&item.title));
            println!(
                "{} | {} | {}",
                item.feed_name,
                item.publication_date.to_rfc3339(),
                item.state.as_str()
            );
            println!("{}\n", item.link);
            println!("{}", sanitize(&item.description));
        }
        Command::Mark { state, item_ids } => {
            for id in item_ids {
                db::set_item_read_state(&pool, id, user_id, state).await?;
            }
        }
        Command::Payload { name } => {
            let feed = db::get_feed_by_name(&pool, &name)
                .await?
                .ok_or_else(|| anyhow!("no feed named {}", name))?;
            let payload = db::last_payload(&pool, feed.id)
                .await?
                .ok_or_else(|| anyhow!("feed {} has no stored payload", name))?;
            std::io::stdout().write_all(&payload)?;
        }
        Command::Export {
            name,
            output,
            limit,
        } => {
            let feed = db::get_feed_by_name(&pool, &name)
                .await?
                .ok_or_else(|| anyhow!("no feed named {}", name))?;
            let items = db::list_feed_items(&pool, feed.id, limit).await?;
            let xml = write_feed_xml(&channel_from_stored(&feed, &items));
            std::fs::write(&output, xml)
                .with_context(|| format!("failed to write {}", output.display()))?;
            info!(feed = %name, items = items.len(), path = %output.display(), "wrote feed");
        }
    }
    Ok(())
}

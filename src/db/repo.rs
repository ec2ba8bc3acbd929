use super::model::{ItemView, SortOrder};
use crate::model::{Feed, NewItem, ReadState, StoredItem};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;

const FEED_COLUMNS: &str =
    "id, name, uri, update_frequency_seconds, last_poll_time, archive, active";

const ITEM_COLUMNS: &str = "id, feed_id, title, description, link, publication_date, guid";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url: {}", normalized))?
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn from_unix(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| anyhow!("timestamp {} out of range", secs))
}

fn feed_from_row(row: &SqliteRow) -> Result<Feed> {
    let last_poll_time = row
        .try_get::<Option<i64>, _>("last_poll_time")?
        .map(from_unix)
        .transpose()?;
    Ok(Feed {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        uri: row.try_get("uri")?,
        update_frequency_seconds: row.try_get("update_frequency_seconds")?,
        last_poll_time,
        archive: row.try_get("archive")?,
        active: row.try_get("active")?,
    })
}

fn item_from_row(row: &SqliteRow) -> Result<StoredItem> {
    Ok(StoredItem {
        id: row.try_get("id")?,
        feed_id: row.try_get("feed_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        link: row.try_get("link")?,
        publication_date: from_unix(row.try_get("publication_date")?)?,
        guid: row.try_get("guid")?,
    })
}

/// Make sure a user row exists so read-state rows can reference it.
#[instrument(skip_all)]
pub async fn ensure_user(pool: &Pool, user_id: i64) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO users (id, name) VALUES (?, ?)")
        .bind(user_id)
        .bind(format!("user-{}", user_id))
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn insert_feed(
    pool: &Pool,
    name: &str,
    uri: &str,
    update_frequency_seconds: i64,
    archive: bool,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO feeds (name, uri, update_frequency_seconds, archive) VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(name)
    .bind(uri)
    .bind(update_frequency_seconds)
    .bind(archive)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert feed {}", name))?;
    Ok(rec.get::<i64, _>("id"))
}

#[instrument(skip_all)]
pub async fn set_feed_active(pool: &Pool, feed_id: i64, active: bool) -> Result<()> {
    let res = sqlx::query("UPDATE feeds SET active = ? WHERE id = ?")
        .bind(active)
        .bind(feed_id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(anyhow!("feed {} not found", feed_id));
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_feed_by_name(pool: &Pool, name: &str) -> Result<Option<Feed>> {
    let row = sqlx::query(&format!("SELECT {} FROM feeds WHERE name = ?", FEED_COLUMNS))
        .bind(name)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(feed_from_row).transpose()
}

/// Active feeds ordered by name.
#[instrument(skip_all)]
pub async fn list_active_feeds(pool: &Pool) -> Result<Vec<Feed>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM feeds WHERE active = 1 ORDER BY name",
        FEED_COLUMNS
    ))
    .fetch_all(pool)
    .await?;
    rows.iter().map(feed_from_row).collect()
}

/// Every feed, active or not, ordered by name.
#[instrument(skip_all)]
pub async fn list_feeds(pool: &Pool) -> Result<Vec<Feed>> {
    let rows = sqlx::query(&format!("SELECT {} FROM feeds ORDER BY name", FEED_COLUMNS))
        .fetch_all(pool)
        .await?;
    rows.iter().map(feed_from_row).collect()
}

#[instrument(skip_all)]
pub async fn max_publication_date(pool: &Pool, feed_id: i64) -> Result<Option<DateTime<Utc>>> {
    let secs: Option<i64> =
        sqlx::query_scalar("SELECT MAX(publication_date) FROM items WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(pool)
            .await?;
    secs.map(from_unix).transpose()
}

#[instrument(skip_all)]
pub async fn item_exists_by_guid(pool: &Pool, feed_id: i64, guid: &str) -> Result<bool> {
    let id: Option<i64> = sqlx::query_scalar("SELECT id FROM items WHERE feed_id = ? AND guid = ?")
        .bind(feed_id)
        .bind(guid)
        .fetch_optional(pool)
        .await?;
    Ok(id.is_some())
}

#[instrument(skip_all)]
pub async fn item_exists_by_link(pool: &Pool, feed_id: i64, link: &str) -> Result<bool> {
    let id: Option<i64> = sqlx::query_scalar("SELECT id FROM items WHERE feed_id = ? AND link = ?")
        .bind(feed_id)
        .bind(link)
        .fetch_optional(pool)
        .await?;
    Ok(id.is_some())
}

/// Link is unique per feed, so this returns at most one item.
#[instrument(skip_all)]
pub async fn find_item_by_link(
    pool: &Pool,
    feed_id: i64,
    link: &str,
) -> Result<Option<StoredItem>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM items WHERE feed_id = ? AND link = ?",
        ITEM_COLUMNS
    ))
    .bind(feed_id)
    .bind(link)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(item_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn insert_item(pool: &Pool, feed_id: i64, item: &NewItem<'_>) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO items (feed_id, title, description, link, publication_date, guid) VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(feed_id)
    .bind(item.title)
    .bind(item.description)
    .bind(item.link)
    .bind(item.publication_date.timestamp())
    .bind(item.guid)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert item with link {}", item.link))?;
    Ok(rec.get("id"))
}

/// Record a GUID on an item stored before GUIDs were tracked.
#[instrument(skip_all)]
pub async fn backfill_item_guid(pool: &Pool, item_id: i64, guid: &str) -> Result<()> {
    let res = sqlx::query("UPDATE items SET guid = ? WHERE id = ? AND guid IS NULL")
        .bind(guid)
        .bind(item_id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(anyhow!("item {} not found or already has a guid", item_id));
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_feed_last_poll_time(pool: &Pool, feed_id: i64, at: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE feeds SET last_poll_time = ? WHERE id = ?")
        .bind(at.timestamp())
        .bind(feed_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_feed_last_payload(pool: &Pool, feed_id: i64, payload: &[u8]) -> Result<()> {
    sqlx::query("UPDATE feeds SET last_payload = ? WHERE id = ?")
        .bind(payload)
        .bind(feed_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn last_payload(pool: &Pool, feed_id: i64) -> Result<Option<Vec<u8>>> {
    let payload: Option<Option<Vec<u8>>> =
        sqlx::query_scalar("SELECT last_payload FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(pool)
            .await?;
    Ok(payload.flatten())
}

/// Upsert the state of an item for a user.
#[instrument(skip_all)]
pub async fn set_item_read_state(
    pool: &Pool,
    item_id: i64,
    user_id: i64,
    state: ReadState,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO item_states (user_id, item_id, state) VALUES (?, ?, ?) \
         ON CONFLICT (user_id, item_id) DO UPDATE SET state = excluded.state, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(user_id)
    .bind(item_id)
    .bind(state.as_str())
    .execute(pool)
    .await
    .with_context(|| format!("unable to set read state on item {}", item_id))?;
    Ok(())
}

fn item_view_from_row(row: &SqliteRow) -> Result<ItemView> {
    let state: String = row.try_get("state")?;
    Ok(ItemView {
        id: row.try_get("id")?,
        feed_id: row.try_get("feed_id")?,
        feed_name: row.try_get("feed_name")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        link: row.try_get("link")?,
        publication_date: from_unix(row.try_get("publication_date")?)?,
        state: ReadState::parse_state(&state)
            .ok_or_else(|| anyhow!("unknown read state {}", state))?,
    })
}

/// Number of items from active feeds in `state` for the user.
#[instrument(skip_all)]
pub async fn count_items(pool: &Pool, user_id: i64, state: ReadState) -> Result<i64> {
    let cnt: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM items i \
         JOIN feeds f ON f.id = i.feed_id \
         LEFT JOIN item_states s ON s.item_id = i.id AND s.user_id = ? \
         WHERE f.active = 1 AND COALESCE(s.state, 'unread') = ?",
    )
    .bind(user_id)
    .bind(state.as_str())
    .fetch_one(pool)
    .await?;
    Ok(cnt)
}

/// One page (1-based) of items from active feeds in `state` for the user.
#[instrument(skip_all)]
pub async fn list_items(
    pool: &Pool,
    user_id: i64,
    state: ReadState,
    order: SortOrder,
    page: i64,
    page_size: i64,
) -> Result<Vec<ItemView>> {
    if page < 1 {
        return Err(anyhow!("invalid page number {}", page));
    }
    let query = format!(
        "SELECT i.id, i.feed_id, f.name AS feed_name, i.title, i.description, i.link, \
                i.publication_date, COALESCE(s.state, 'unread') AS state \
         FROM items i \
         JOIN feeds f ON f.id = i.feed_id \
         LEFT JOIN item_states s ON s.item_id = i.id AND s.user_id = ? \
         WHERE f.active = 1 AND COALESCE(s.state, 'unread') = ? \
         ORDER BY i.publication_date {}, f.name, i.title \
         LIMIT ? OFFSET ?",
        order.as_sql()
    );
    let rows = sqlx::query(&query)
        .bind(user_id)
        .bind(state.as_str())
        .bind(page_size)
        .bind((page - 1) * page_size)
        .fetch_all(pool)
        .await?;
    rows.iter().map(item_view_from_row).collect()
}

/// A single item with the user's state, regardless of feed activity.
#[instrument(skip_all)]
pub async fn get_item(pool: &Pool, item_id: i64, user_id: i64) -> Result<Option<ItemView>> {
    let row = sqlx::query(
        "SELECT i.id, i.feed_id, f.name AS feed_name, i.title, i.description, i.link, \
                i.publication_date, COALESCE(s.state, 'unread') AS state \
         FROM items i \
         JOIN feeds f ON f.id = i.feed_id \
         LEFT JOIN item_states s ON s.item_id = i.id AND s.user_id = ? \
         WHERE i.id = ?",
    )
    .bind(user_id)
    .bind(item_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(item_view_from_row).transpose()
}

/// Most recent items of one feed, newest first.
#[instrument(skip_all)]
pub async fn list_feed_items(pool: &Pool, feed_id: i64, limit: i64) -> Result<Vec<StoredItem>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM items WHERE feed_id = ? ORDER BY publication_date DESC, id DESC LIMIT ?",
        ITEM_COLUMNS
    ))
    .bind(feed_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(item_from_row).collect()
}

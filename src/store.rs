//! Persistence gateway consumed by the poller and the admission rules.
//!
//! The trait keeps ingestion testable against fakes; [`SqliteStore`] is the
//! production implementation over `db::repo`.
use crate::db::{self, Pool};
use crate::model::{Feed, NewItem, ReadState, StoredItem};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Active feeds ordered by name.
    async fn list_active_feeds(&self) -> Result<Vec<Feed>>;
    async fn max_publication_date(&self, feed_id: i64) -> Result<Option<DateTime<Utc>>>;
    async fn item_exists_by_guid(&self, feed_id: i64, guid: &str) -> Result<bool>;
    async fn item_exists_by_link(&self, feed_id: i64, link: &str) -> Result<bool>;
    async fn find_item_by_link(&self, feed_id: i64, link: &str) -> Result<Option<StoredItem>>;
    async fn insert_item(&self, feed_id: i64, item: &NewItem<'_>) -> Result<i64>;
    async fn backfill_item_guid(&self, item_id: i64, guid: &str) -> Result<()>;
    async fn set_feed_last_poll_time(&self, feed_id: i64, at: DateTime<Utc>) -> Result<()>;
    async fn set_feed_last_payload(&self, feed_id: i64, payload: &[u8]) -> Result<()>;
    /// Insert or update the user's state for an item.
    async fn set_item_read_state(&self, item_id: i64, user_id: i64, state: ReadState) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl FeedStore for SqliteStore {
    async fn list_active_feeds(&self) -> Result<Vec<Feed>> {
        db::list_active_feeds(&self.pool).await
    }

    async fn max_publication_date(&self, feed_id: i64) -> Result<Option<DateTime<Utc>>> {
        db::max_publication_date(&self.pool, feed_id).await
    }

    async fn item_exists_by_guid(&self, feed_id: i64, guid: &str) -> Result<bool> {
        db::item_exists_by_guid(&self.pool, feed_id, guid).await
    }

    async fn item_exists_by_link(&self, feed_id: i64, link: &str) -> Result<bool> {
        db::item_exists_by_link(&self.pool, feed_id, link).await
    }

    async fn find_item_by_link(&self, feed_id: i64, link: &str) -> Result<Option<StoredItem>> {
        db::find_item_by_link(&self.pool, feed_id, link).await
    }

    async fn insert_item(&self, feed_id: i64, item: &NewItem<'_>) -> Result<i64> {
        db::insert_item(&self.pool, feed_id, item).await
    }

    async fn backfill_item_guid(&self, item_id: i64, guid: &str) -> Result<()> {
        db::backfill_item_guid(&self.pool, item_id, guid).await
    }

    async fn set_feed_last_poll_time(&self, feed_id: i64, at: DateTime<Utc>) -> Result<()> {
        db::set_feed_last_poll_time(&self.pool, feed_id, at).await
    }

    async fn set_feed_last_payload(&self, feed_id: i64, payload: &[u8]) -> Result<()> {
        db::set_feed_last_payload(&self.pool, feed_id, payload).await
    }

    async fn set_item_read_state(
        &self,
        item_id: i64,
        user_id: i64,
        state: ReadState,
    ) -> Result<()> {
        db::set_item_read_state(&self.pool, item_id, user_id, state).await
    }
}

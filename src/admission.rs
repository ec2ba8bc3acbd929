//! Item admission: decides whether a parsed item is new for its feed.
//!
//! Identifier matching comes first. Link and publication-date matching is
//! the fallback for items without a guid. The rules consult the store but
//! never rely on a constraint violation to detect a duplicate.

use crate::feed::Item;
use crate::model::{Feed, NewItem, ReadState};
use crate::poller::PollError;
use crate::store::FeedStore;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info, warn};

/// A fetched batch that cannot be admitted as a whole.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SanityViolation {
    #[error("item {index} ({title:?}) has no link")]
    MissingLink { index: usize, title: String },
    #[error("link {0} appears more than once in the batch")]
    DuplicateLink(String),
    #[error("guid {0} appears more than once in the batch")]
    DuplicateGuid(String),
}

/// Reject batches with a blank link, or a link or guid repeated in the batch.
pub fn sanity_check(items: &[Item]) -> Result<(), SanityViolation> {
    let mut links = HashSet::new();
    let mut guids = HashSet::new();
    for (index, item) in items.iter().enumerate() {
        if item.link.is_empty() {
            return Err(SanityViolation::MissingLink {
                index,
                title: item.title.clone(),
            });
        }
        if !links.insert(item.link.as_str()) {
            return Err(SanityViolation::DuplicateLink(item.link.clone()));
        }
        if let Some(guid) = item.guid.as_deref() {
            if !guids.insert(guid) {
                return Err(SanityViolation::DuplicateGuid(guid.to_string()));
            }
        }
    }
    Ok(())
}

/// Newest stored publication date for the feed, else its last poll time.
///
/// `None` only for a feed with no items that was never polled.
pub async fn cutoff_time(
    store: &dyn FeedStore,
    feed: &Feed,
) -> Result<Option<DateTime<Utc>>, PollError> {
    let newest = store.max_publication_date(feed.id).await?;
    Ok(newest.or(feed.last_poll_time))
}

/// Whether `item` should be recorded for `feed`.
///
/// `pub_date` is the item's date with the poll timestamp already substituted
/// when the feed gave none. May backfill a guid onto an older stored row.
pub async fn should_record(
    store: &dyn FeedStore,
    feed: &Feed,
    item: &Item,
    pub_date: DateTime<Utc>,
    cutoff: Option<DateTime<Utc>>,
    ignore_publication_times: bool,
) -> Result<bool, PollError> {
    if feed.never_polled() {
        // Rows only exist here if an earlier first poll was interrupted.
        if store.item_exists_by_link(feed.id, &item.link).await? {
            return Ok(false);
        }
        return match item.guid.as_deref() {
            Some(guid) => Ok(!store.item_exists_by_guid(feed.id, guid).await?),
            None => Ok(true),
        };
    }

    if let Some(guid) = item.guid.as_deref() {
        return admit_by_guid(store, feed, item, guid).await;
    }

    if store.item_exists_by_link(feed.id, &item.link).await? {
        debug!(feed = %feed.name, link = %item.link, "already stored by link");
        return Ok(false);
    }

    if ignore_publication_times {
        return Ok(true);
    }
    match cutoff {
        Some(cutoff) if pub_date < cutoff => {
            info!(
                feed = %feed.name,
                title = %item.title,
                link = %item.link,
                published = %pub_date,
                %cutoff,
                "skipping item published before cutoff"
            );
            Ok(false)
        }
        _ => Ok(true),
    }
}

async fn admit_by_guid(
    store: &dyn FeedStore,
    feed: &Feed,
    item: &Item,
    guid: &str,
) -> Result<bool, PollError> {
    if store.item_exists_by_guid(feed.id, guid).await? {
        debug!(feed = %feed.name, %guid, "already stored by guid");
        return Ok(false);
    }

    // Rows stored before guids were tracked are matched by link once.
    let Some(stored) = store.find_item_by_link(feed.id, &item.link).await? else {
        return Ok(true);
    };
    match stored.guid.as_deref() {
        None => {
            store.backfill_item_guid(stored.id, guid).await?;
            info!(
                feed = %feed.name,
                item_id = stored.id,
                %guid,
                "backfilled guid onto stored item"
            );
            Ok(false)
        }
        Some(existing) if existing == guid => Err(PollError::Invariant(format!(
            "item {} in feed {} carries guid {} but was not found by it",
            stored.id, feed.name, guid
        ))),
        Some(existing) => {
            warn!(
                feed = %feed.name,
                link = %item.link,
                stored_guid = %existing,
                %guid,
                "link already stored under a different guid; skipping"
            );
            Ok(false)
        }
    }
}

/// Insert an admitted item. First-poll and archive feeds mark it read for `user_id`.
pub async fn record_item(
    store: &dyn FeedStore,
    feed: &Feed,
    item: &Item,
    pub_date: DateTime<Utc>,
    user_id: i64,
) -> Result<i64, PollError> {
    let new_item = NewItem {
        title: &item.title,
        description: &item.description,
        link: &item.link,
        publication_date: pub_date,
        guid: item.guid.as_deref(),
    };
    let item_id = store.insert_item(feed.id, &new_item).await?;
    if feed.never_polled() || feed.archive {
        store
            .set_item_read_state(item_id, user_id, ReadState::Read)
            .await?;
    }
    info!(feed = %feed.name, item_id, title = %item.title, "recorded item");
    Ok(item_id)
}

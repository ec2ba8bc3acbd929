//! Poll scheduler: decides which feeds are due and runs each one through
//! fetch, payload capture, decode, admission and the poll-time update.
//!
//! A feed's `last_poll_time` only moves after every item has been handled,
//! so a failure part way leaves the feed due on the next run.

use crate::admission::{self, SanityViolation};
use crate::feed::{self, DecodeError};
use crate::fetch::{FetchError, Fetcher};
use crate::model::Feed;
use crate::store::FeedStore;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("unable to decode feed: {0}")]
    Decode(#[from] DecodeError),
    #[error("rejected batch: {0}")]
    Sanity(#[from] SanityViolation),
    #[error("persistence error: {0:#}")]
    Persistence(#[from] anyhow::Error),
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error("no active feed named {0}")]
    FeedNotFound(String),
}

/// Per-run switches, normally taken from the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollOptions {
    /// Restrict the run to the active feed with this name.
    pub feed_name: Option<String>,
    /// Poll every feed regardless of its update frequency.
    pub ignore_poll_times: bool,
    /// Admit guid-less items regardless of the cutoff.
    pub ignore_publication_times: bool,
    /// User whose read state is set on auto-read items.
    pub user_id: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub feeds_considered: usize,
    pub feeds_polled: usize,
    pub feeds_failed: usize,
    pub items_recorded: usize,
}

/// Outcome of one successful feed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedOutcome {
    pub fetched: usize,
    pub recorded: usize,
}

/// Due when forced, never polled, or at least `update_frequency_seconds` old.
pub fn is_due(feed: &Feed, now: DateTime<Utc>, ignore_poll_times: bool) -> bool {
    if ignore_poll_times {
        return true;
    }
    match feed.last_poll_time {
        None => true,
        Some(last) => (now - last).num_seconds() >= feed.update_frequency_seconds,
    }
}

pub struct Poller<'a> {
    store: &'a dyn FeedStore,
    fetcher: &'a dyn Fetcher,
    options: PollOptions,
}

impl<'a> Poller<'a> {
    pub fn new(store: &'a dyn FeedStore, fetcher: &'a dyn Fetcher, options: PollOptions) -> Self {
        Self {
            store,
            fetcher,
            options,
        }
    }

    /// Poll every due feed in name order. Feed failures are logged and
    /// counted; only failing to list feeds, or an unknown feed filter,
    /// aborts the run.
    pub async fn run(&self) -> Result<PollReport, PollError> {
        let mut feeds = self.store.list_active_feeds().await?;
        if let Some(name) = self.options.feed_name.as_deref() {
            feeds.retain(|f| f.name == name);
            if feeds.is_empty() {
                return Err(PollError::FeedNotFound(name.to_string()));
            }
        }

        let mut report = PollReport {
            feeds_considered: feeds.len(),
            ..Default::default()
        };
        for feed in &feeds {
            let now = Utc::now();
            if !is_due(feed, now, self.options.ignore_poll_times) {
                info!(
                    feed = %feed.name,
                    last_poll = ?feed.last_poll_time,
                    frequency = feed.update_frequency_seconds,
                    "not due; skipping"
                );
                continue;
            }

            info!(feed = %feed.name, uri = %feed.uri, "polling feed");
            match self.poll_feed(feed).await {
                Ok(outcome) => {
                    report.feeds_polled += 1;
                    report.items_recorded += outcome.recorded;
                }
                Err(e) => {
                    report.feeds_failed += 1;
                    error!(feed = %feed.name, error = %e, "failed to poll feed");
                }
            }
        }

        info!(
            "updated {}/{} feed(s), recorded {} item(s)",
            report.feeds_polled, report.feeds_considered, report.items_recorded
        );
        Ok(report)
    }

    /// One complete cycle for a single feed.
    pub async fn poll_feed(&self, feed: &Feed) -> Result<FeedOutcome, PollError> {
        let poll_ts = Utc::now();

        let payload = match self.fetcher.fetch(&feed.uri).await {
            Ok(body) => body,
            Err(FetchError::Status { uri, status, body }) => {
                self.store.set_feed_last_payload(feed.id, &body).await?;
                return Err(FetchError::Status { uri, status, body }.into());
            }
            Err(e) => return Err(e.into()),
        };
        self.store.set_feed_last_payload(feed.id, &payload).await?;

        let channel = feed::parse_feed_xml(&payload)?;
        admission::sanity_check(&channel.items)?;
        info!(feed = %feed.name, items = channel.items.len(), "fetched items");

        let cutoff = admission::cutoff_time(self.store, feed).await?;
        let mut recorded = 0;
        for item in &channel.items {
            let pub_date = item.pub_date.unwrap_or(poll_ts);
            let admit = admission::should_record(
                self.store,
                feed,
                item,
                pub_date,
                cutoff,
                self.options.ignore_publication_times,
            )
            .await?;
            if admit {
                admission::record_item(self.store, feed, item, pub_date, self.options.user_id)
                    .await?;
                recorded += 1;
            }
        }

        let fetched = channel.items.len();
        info!(feed = %feed.name, "added {}/{} item(s)", recorded, fetched);
        if fetched > 0 && recorded == fetched {
            warn!(
                feed = %feed.name,
                "recorded all items from feed ({}/{}); it may need polling more often",
                recorded, fetched
            );
        }

        self.store.set_feed_last_poll_time(feed.id, poll_ts).await?;
        Ok(FeedOutcome { fetched, recorded })
    }
}

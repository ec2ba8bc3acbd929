use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use feedpoll::db::{self, Pool};
use feedpoll::fetch::{FetchError, Fetcher};
use feedpoll::model::{Feed, NewItem, ReadState, StoredItem};
use feedpoll::poller::{PollError, PollOptions, Poller};
use feedpoll::store::{FeedStore, SqliteStore};

async fn setup_pool() -> Pool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

enum Reply {
    Body(Vec<u8>),
    Status(u16, Vec<u8>),
}

/// Serves canned payloads by URI and remembers what was requested.
#[derive(Default)]
struct FakeFetcher {
    replies: Mutex<HashMap<String, Vec<u8>>>,
    failures: Mutex<HashMap<String, (u16, Vec<u8>)>>,
    calls: Mutex<Vec<String>>,
}

impl FakeFetcher {
    fn serve(&self, uri: &str, reply: Reply) {
        match reply {
            Reply::Body(body) => {
                self.replies.lock().unwrap().insert(uri.to_string(), body);
            }
            Reply::Status(status, body) => {
                self.failures
                    .lock()
                    .unwrap()
                    .insert(uri.to_string(), (status, body));
            }
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.lock().unwrap().push(uri.to_string());
        if let Some((status, body)) = self.failures.lock().unwrap().get(uri) {
            return Err(FetchError::Status {
                uri: uri.to_string(),
                status: *status,
                body: body.clone(),
            });
        }
        let body = self.replies.lock().unwrap().get(uri).cloned();
        Ok(body.unwrap_or_else(|| panic!("unexpected fetch of {}", uri)))
    }
}

/// Delegates to SQLite but can fail inserts for one link or hide guid matches.
struct FaultyStore {
    inner: SqliteStore,
    fail_insert_link: Option<String>,
    hide_guid_matches: bool,
}

#[async_trait]
impl FeedStore for FaultyStore {
    async fn list_active_feeds(&self) -> Result<Vec<Feed>> {
        self.inner.list_active_feeds().await
    }
    async fn max_publication_date(&self, feed_id: i64) -> Result<Option<DateTime<Utc>>> {
        self.inner.max_publication_date(feed_id).await
    }
    async fn item_exists_by_guid(&self, feed_id: i64, guid: &str) -> Result<bool> {
        if self.hide_guid_matches {
            return Ok(false);
        }
        self.inner.item_exists_by_guid(feed_id, guid).await
    }
    async fn item_exists_by_link(&self, feed_id: i64, link: &str) -> Result<bool> {
        self.inner.item_exists_by_link(feed_id, link).await
    }
    async fn find_item_by_link(&self, feed_id: i64, link: &str) -> Result<Option<StoredItem>> {
        self.inner.find_item_by_link(feed_id, link).await
    }
    async fn insert_item(&self, feed_id: i64, item: &NewItem<'_>) -> Result<i64> {
        if self.fail_insert_link.as_deref() == Some(item.link) {
            return Err(anyhow!("disk I/O error"));
        }
        self.inner.insert_item(feed_id, item).await
    }
    async fn backfill_item_guid(&self, item_id: i64, guid: &str) -> Result<()> {
        self.inner.backfill_item_guid(item_id, guid).await
    }
    async fn set_feed_last_poll_time(&self, feed_id: i64, at: DateTime<Utc>) -> Result<()> {
        self.inner.set_feed_last_poll_time(feed_id, at).await
    }
    async fn set_feed_last_payload(&self, feed_id: i64, payload: &[u8]) -> Result<()> {
        self.inner.set_feed_last_payload(feed_id, payload).await
    }
    async fn set_item_read_state(
        &self,
        item_id: i64,
        user_id: i64,
        state: ReadState,
    ) -> Result<()> {
        self.inner.set_item_read_state(item_id, user_id, state).await
    }
}

struct Entry<'a> {
    link: &'a str,
    guid: Option<&'a str>,
    pub_date: Option<DateTime<Utc>>,
}

fn entry(link: &str) -> Entry<'_> {
    Entry {
        link,
        guid: None,
        pub_date: None,
    }
}

impl<'a> Entry<'a> {
    fn guid(mut self, guid: &'a str) -> Self {
        self.guid = Some(guid);
        self
    }

    fn at(mut self, at: DateTime<Utc>) -> Self {
        self.pub_date = Some(at);
        self
    }
}

fn rss(entries: &[Entry<'_>]) -> Vec<u8> {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<rss version=\"2.0\"><channel><title>Test</title><link>https://example.com/</link>\n",
    );
    for e in entries {
        xml.push_str("<item>");
        xml.push_str(&format!("<title>Item {}</title><link>{}</link>", e.link, e.link));
        xml.push_str("<description>&lt;p&gt;body&lt;/p&gt;</description>");
        if let Some(guid) = e.guid {
            xml.push_str(&format!("<guid>{}</guid>", guid));
        }
        if let Some(at) = e.pub_date {
            xml.push_str(&format!("<pubDate>{}</pubDate>", at.to_rfc2822()));
        }
        xml.push_str("</item>\n");
    }
    xml.push_str("</channel></rss>\n");
    xml.into_bytes()
}

fn opts() -> PollOptions {
    PollOptions {
        user_id: 1,
        ..Default::default()
    }
}

fn forced() -> PollOptions {
    PollOptions {
        ignore_poll_times: true,
        ..opts()
    }
}

async fn add_feed(pool: &Pool, name: &str, archive: bool) -> Feed {
    let uri = format!("https://example.com/{}.xml", name);
    db::insert_feed(pool, name, &uri, 3600, archive).await.unwrap();
    db::get_feed_by_name(pool, name).await.unwrap().unwrap()
}

async fn reload(pool: &Pool, name: &str) -> Feed {
    db::get_feed_by_name(pool, name).await.unwrap().unwrap()
}

async fn links(pool: &Pool, feed_id: i64) -> Vec<String> {
    sqlx::query_scalar("SELECT link FROM items WHERE feed_id = ? ORDER BY id")
        .bind(feed_id)
        .fetch_all(pool)
        .await
        .unwrap()
}

fn secs(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(at.timestamp(), 0).unwrap()
}

#[tokio::test]
async fn first_poll_records_everything_read_and_sets_poll_time() {
    let pool = setup_pool().await;
    let feed = add_feed(&pool, "news", false).await;
    let fetcher = FakeFetcher::default();
    fetcher.serve(&feed.uri, Reply::Body(rss(&[entry("a"), entry("b")])));
    let store = SqliteStore::new(pool.clone());

    let before = secs(Utc::now());
    let report = Poller::new(&store, &fetcher, opts()).run().await.unwrap();
    let after = Utc::now();

    assert_eq!(report.feeds_considered, 1);
    assert_eq!(report.feeds_polled, 1);
    assert_eq!(report.feeds_failed, 0);
    assert_eq!(report.items_recorded, 2);
    assert_eq!(links(&pool, feed.id).await, vec!["a", "b"]);
    assert_eq!(db::count_items(&pool, 1, ReadState::Read).await.unwrap(), 2);
    assert_eq!(db::count_items(&pool, 1, ReadState::Unread).await.unwrap(), 0);

    let polled = reload(&pool, "news").await.last_poll_time.unwrap();
    assert!(polled >= before && polled <= after);
    assert_eq!(
        db::last_payload(&pool, feed.id).await.unwrap(),
        Some(rss(&[entry("a"), entry("b")]))
    );
}

#[tokio::test]
async fn repeat_poll_of_same_items_inserts_nothing_but_advances_poll_time() {
    let pool = setup_pool().await;
    let feed = add_feed(&pool, "news", false).await;
    let fetcher = FakeFetcher::default();
    fetcher.serve(&feed.uri, Reply::Body(rss(&[entry("a"), entry("b")])));
    let store = SqliteStore::new(pool.clone());
    Poller::new(&store, &fetcher, opts()).run().await.unwrap();

    let old = Utc::now() - Duration::days(2);
    db::set_feed_last_poll_time(&pool, feed.id, old).await.unwrap();

    let report = Poller::new(&store, &fetcher, opts()).run().await.unwrap();
    assert_eq!(report.feeds_polled, 1);
    assert_eq!(report.items_recorded, 0);
    assert_eq!(links(&pool, feed.id).await.len(), 2);
    assert!(reload(&pool, "news").await.last_poll_time.unwrap() > secs(old));
}

#[tokio::test]
async fn same_payload_twice_is_idempotent_with_guids_and_dates() {
    let pool = setup_pool().await;
    let feed = add_feed(&pool, "news", false).await;
    let t = Utc::now() - Duration::hours(5);
    let payload = rss(&[
        entry("a").guid("g-a").at(t),
        entry("b").at(t - Duration::hours(1)),
        entry("c"),
    ]);
    let fetcher = FakeFetcher::default();
    fetcher.serve(&feed.uri, Reply::Body(payload));
    let store = SqliteStore::new(pool.clone());

    let first = Poller::new(&store, &fetcher, forced()).run().await.unwrap();
    let second = Poller::new(&store, &fetcher, forced()).run().await.unwrap();
    assert_eq!(first.items_recorded, 3);
    assert_eq!(second.items_recorded, 0);
    assert_eq!(second.feeds_failed, 0);
    assert_eq!(links(&pool, feed.id).await, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn guid_match_wins_over_new_link() {
    let pool = setup_pool().await;
    let feed = add_feed(&pool, "news", false).await;
    let t = Utc::now() - Duration::days(1);
    db::insert_item(
        &pool,
        feed.id,
        &NewItem {
            title: "old",
            description: "",
            link: "http://example.com/post",
            publication_date: t,
            guid: Some("post-1"),
        },
    )
    .await
    .unwrap();
    db::set_feed_last_poll_time(&pool, feed.id, t).await.unwrap();

    let fetcher = FakeFetcher::default();
    fetcher.serve(
        &feed.uri,
        Reply::Body(rss(&[entry("https://example.com/post")
            .guid("post-1")
            .at(Utc::now())])),
    );
    let store = SqliteStore::new(pool.clone());
    let report = Poller::new(&store, &fetcher, forced()).run().await.unwrap();

    assert_eq!(report.items_recorded, 0);
    assert_eq!(links(&pool, feed.id).await, vec!["http://example.com/post"]);
}

#[tokio::test]
async fn guid_is_backfilled_onto_item_stored_without_one() {
    let pool = setup_pool().await;
    let feed = add_feed(&pool, "news", false).await;
    let t = Utc::now() - Duration::days(1);
    db::insert_item(
        &pool,
        feed.id,
        &NewItem {
            title: "a",
            description: "",
            link: "a",
            publication_date: t,
            guid: None,
        },
    )
    .await
    .unwrap();
    db::set_feed_last_poll_time(&pool, feed.id, t).await.unwrap();

    let fetcher = FakeFetcher::default();
    fetcher.serve(
        &feed.uri,
        Reply::Body(rss(&[entry("a").guid("g1")])),
    );
    let store = SqliteStore::new(pool.clone());
    let report = Poller::new(&store, &fetcher, forced()).run().await.unwrap();

    assert_eq!(report.items_recorded, 0);
    assert_eq!(report.feeds_polled, 1);
    let stored = db::find_item_by_link(&pool, feed.id, "a").await.unwrap().unwrap();
    assert_eq!(stored.guid.as_deref(), Some("g1"));
    assert_eq!(links(&pool, feed.id).await.len(), 1);
}

#[tokio::test]
async fn cutoff_falls_back_to_last_poll_time() {
    let pool = setup_pool().await;
    let feed = add_feed(&pool, "news", false).await;
    let cutoff = Utc::now() - Duration::days(1);
    db::set_feed_last_poll_time(&pool, feed.id, cutoff).await.unwrap();

    let payload = rss(&[
        entry("old").at(cutoff - Duration::hours(1)),
        entry("new").at(cutoff + Duration::hours(1)),
    ]);
    let fetcher = FakeFetcher::default();
    fetcher.serve(&feed.uri, Reply::Body(payload));
    let store = SqliteStore::new(pool.clone());
    let report = Poller::new(&store, &fetcher, forced()).run().await.unwrap();

    assert_eq!(report.items_recorded, 1);
    assert_eq!(links(&pool, feed.id).await, vec!["new"]);
    // Polled before, not archive: left unread.
    assert_eq!(db::count_items(&pool, 1, ReadState::Unread).await.unwrap(), 1);
}

#[tokio::test]
async fn cutoff_uses_newest_stored_publication_date() {
    let pool = setup_pool().await;
    let feed = add_feed(&pool, "news", false).await;
    let newest = Utc::now() - Duration::hours(2);
    db::insert_item(
        &pool,
        feed.id,
        &NewItem {
            title: "stored",
            description: "",
            link: "stored",
            publication_date: newest,
            guid: None,
        },
    )
    .await
    .unwrap();
    db::set_feed_last_poll_time(&pool, feed.id, newest - Duration::days(3))
        .await
        .unwrap();

    let payload = rss(&[
        entry("older").at(newest - Duration::hours(1)),
        entry("newer").at(newest + Duration::minutes(30)),
    ]);
    let fetcher = FakeFetcher::default();
    fetcher.serve(&feed.uri, Reply::Body(payload));
    let store = SqliteStore::new(pool.clone());
    Poller::new(&store, &fetcher, forced()).run().await.unwrap();

    assert_eq!(links(&pool, feed.id).await, vec!["stored", "newer"]);
}

#[tokio::test]
async fn ignore_publication_times_admits_old_items() {
    let pool = setup_pool().await;
    let feed = add_feed(&pool, "news", false).await;
    let cutoff = Utc::now() - Duration::days(1);
    db::set_feed_last_poll_time(&pool, feed.id, cutoff).await.unwrap();
    let fetcher = FakeFetcher::default();
    fetcher.serve(
        &feed.uri,
        Reply::Body(rss(&[entry("new").at(cutoff - Duration::hours(1))])),
    );
    let store = SqliteStore::new(pool.clone());

    let report = Poller::new(&store, &fetcher, forced()).run().await.unwrap();
    assert_eq!(report.items_recorded, 0);

    let options = PollOptions {
        ignore_publication_times: true,
        ..forced()
    };
    let report = Poller::new(&store, &fetcher, options).run().await.unwrap();
    assert_eq!(report.items_recorded, 1);
    assert_eq!(links(&pool, feed.id).await, vec!["new"]);
}

#[tokio::test]
async fn duplicate_links_reject_whole_batch() {
    let pool = setup_pool().await;
    let feed = add_feed(&pool, "news", false).await;
    let payload = rss(&[entry("a"), entry("b"), entry("a")]);
    let fetcher = FakeFetcher::default();
    fetcher.serve(&feed.uri, Reply::Body(payload.clone()));
    let store = SqliteStore::new(pool.clone());

    let report = Poller::new(&store, &fetcher, opts()).run().await.unwrap();
    assert_eq!(report.feeds_failed, 1);
    assert_eq!(report.feeds_polled, 0);
    assert!(links(&pool, feed.id).await.is_empty());
    assert!(reload(&pool, "news").await.never_polled());
    assert_eq!(db::last_payload(&pool, feed.id).await.unwrap(), Some(payload));

    let err = Poller::new(&store, &fetcher, opts())
        .poll_feed(&feed)
        .await
        .unwrap_err();
    assert!(matches!(err, PollError::Sanity(_)));
}

#[tokio::test]
async fn failing_feed_does_not_stop_the_run() {
    let pool = setup_pool().await;
    let broken = add_feed(&pool, "a-broken", false).await;
    let garbled = add_feed(&pool, "b-garbled", false).await;
    let good = add_feed(&pool, "c-good", false).await;
    let fetcher = FakeFetcher::default();
    fetcher.serve(&broken.uri, Reply::Status(503, b"maintenance".to_vec()));
    fetcher.serve(&garbled.uri, Reply::Body(b"<html>not a feed</html>".to_vec()));
    fetcher.serve(&good.uri, Reply::Body(rss(&[entry("x")])));
    let store = SqliteStore::new(pool.clone());

    let report = Poller::new(&store, &fetcher, opts()).run().await.unwrap();
    assert_eq!(report.feeds_considered, 3);
    assert_eq!(report.feeds_failed, 2);
    assert_eq!(report.feeds_polled, 1);
    assert_eq!(fetcher.calls(), vec![broken.uri.clone(), garbled.uri.clone(), good.uri.clone()]);

    // Error bodies and unparseable payloads are kept for inspection.
    assert_eq!(
        db::last_payload(&pool, broken.id).await.unwrap(),
        Some(b"maintenance".to_vec())
    );
    assert_eq!(
        db::last_payload(&pool, garbled.id).await.unwrap(),
        Some(b"<html>not a feed</html>".to_vec())
    );
    assert!(reload(&pool, "a-broken").await.never_polled());
    assert!(reload(&pool, "b-garbled").await.never_polled());
    assert!(!reload(&pool, "c-good").await.never_polled());
}

#[tokio::test]
async fn failed_insert_leaves_feed_due_and_retry_is_clean() {
    let pool = setup_pool().await;
    let feed = add_feed(&pool, "news", false).await;
    let fetcher = FakeFetcher::default();
    fetcher.serve(&feed.uri, Reply::Body(rss(&[entry("a"), entry("b")])));
    let faulty = FaultyStore {
        inner: SqliteStore::new(pool.clone()),
        fail_insert_link: Some("b".into()),
        hide_guid_matches: false,
    };

    let err = Poller::new(&faulty, &fetcher, opts())
        .poll_feed(&feed)
        .await
        .unwrap_err();
    assert!(matches!(err, PollError::Persistence(_)));
    assert!(err.to_string().contains("disk I/O error"));
    assert!(reload(&pool, "news").await.never_polled());
    assert_eq!(links(&pool, feed.id).await, vec!["a"]);

    let store = SqliteStore::new(pool.clone());
    let report = Poller::new(&store, &fetcher, opts()).run().await.unwrap();
    assert_eq!(report.feeds_failed, 0);
    assert_eq!(report.items_recorded, 1);
    assert_eq!(links(&pool, feed.id).await, vec!["a", "b"]);
}

#[tokio::test]
async fn stored_guid_found_only_by_link_is_an_invariant_violation() {
    let pool = setup_pool().await;
    let feed = add_feed(&pool, "news", false).await;
    let t = Utc::now() - Duration::days(1);
    db::insert_item(
        &pool,
        feed.id,
        &NewItem {
            title: "a",
            description: "",
            link: "a",
            publication_date: t,
            guid: Some("g1"),
        },
    )
    .await
    .unwrap();
    db::set_feed_last_poll_time(&pool, feed.id, t).await.unwrap();
    let feed = reload(&pool, "news").await;

    let fetcher = FakeFetcher::default();
    fetcher.serve(
        &feed.uri,
        Reply::Body(rss(&[entry("a").guid("g1")])),
    );
    let lying = FaultyStore {
        inner: SqliteStore::new(pool.clone()),
        fail_insert_link: None,
        hide_guid_matches: true,
    };

    let err = Poller::new(&lying, &fetcher, opts())
        .poll_feed(&feed)
        .await
        .unwrap_err();
    assert!(matches!(err, PollError::Invariant(_)));
    assert_eq!(reload(&pool, "news").await.last_poll_time, Some(secs(t)));
}

#[tokio::test]
async fn archive_feed_marks_new_items_read() {
    let pool = setup_pool().await;
    let feed = add_feed(&pool, "archive", true).await;
    db::set_feed_last_poll_time(&pool, feed.id, Utc::now() - Duration::days(1))
        .await
        .unwrap();
    let fetcher = FakeFetcher::default();
    fetcher.serve(&feed.uri, Reply::Body(rss(&[entry("a")])));
    let store = SqliteStore::new(pool.clone());

    let report = Poller::new(&store, &fetcher, opts()).run().await.unwrap();
    assert_eq!(report.items_recorded, 1);
    assert_eq!(db::count_items(&pool, 1, ReadState::Read).await.unwrap(), 1);
}

#[tokio::test]
async fn missing_pub_date_uses_poll_timestamp() {
    let pool = setup_pool().await;
    let feed = add_feed(&pool, "news", false).await;
    let fetcher = FakeFetcher::default();
    fetcher.serve(&feed.uri, Reply::Body(rss(&[entry("a")])));
    let store = SqliteStore::new(pool.clone());

    Poller::new(&store, &fetcher, opts()).run().await.unwrap();
    let stored = db::find_item_by_link(&pool, feed.id, "a").await.unwrap().unwrap();
    let polled = reload(&pool, "news").await.last_poll_time.unwrap();
    assert_eq!(stored.publication_date, polled);
}

#[tokio::test]
async fn feeds_not_due_are_not_fetched() {
    let pool = setup_pool().await;
    let feed = add_feed(&pool, "news", false).await;
    db::set_feed_last_poll_time(&pool, feed.id, Utc::now()).await.unwrap();
    let fetcher = FakeFetcher::default();
    let store = SqliteStore::new(pool.clone());

    let report = Poller::new(&store, &fetcher, opts()).run().await.unwrap();
    assert_eq!(report.feeds_considered, 1);
    assert_eq!(report.feeds_polled, 0);
    assert!(fetcher.calls().is_empty());
}

#[tokio::test]
async fn feed_name_filter_restricts_and_validates() {
    let pool = setup_pool().await;
    add_feed(&pool, "one", false).await;
    let two = add_feed(&pool, "two", false).await;
    let inactive = add_feed(&pool, "three", false).await;
    db::set_feed_active(&pool, inactive.id, false).await.unwrap();
    let fetcher = FakeFetcher::default();
    fetcher.serve(&two.uri, Reply::Body(rss(&[entry("t")])));
    let store = SqliteStore::new(pool.clone());

    let options = PollOptions {
        feed_name: Some("two".into()),
        ..opts()
    };
    let report = Poller::new(&store, &fetcher, options).run().await.unwrap();
    assert_eq!(report.feeds_considered, 1);
    assert_eq!(fetcher.calls(), vec![two.uri.clone()]);

    for name in ["missing", "three"] {
        let options = PollOptions {
            feed_name: Some(name.into()),
            ..opts()
        };
        let err = Poller::new(&store, &fetcher, options).run().await.unwrap_err();
        assert!(matches!(err, PollError::FeedNotFound(n) if n == name));
    }
}

//! View models used by reader queries.
//!
//! Keep these structs focused on the data returned by queries. Ingestion
//! decisions live in `admission` and `poller`.

use crate::model::ReadState;
use chrono::{DateTime, Utc};

/// Ordering of reader listings by publication date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

impl SortOrder {
    pub(crate) fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}

/// A stored item joined with its feed name and the reader's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemView {
    pub id: i64,
    pub feed_id: i64,
    pub feed_name: String,
    pub title: String,
    pub description: String,
    pub link: String,
    pub publication_date: DateTime<Utc>,
    pub state: ReadState,
}

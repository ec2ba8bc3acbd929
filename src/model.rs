use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-user state of a stored item. A missing row means `Unread`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ReadState {
    #[default]
    Unread,
    Read,
    ReadLater,
}

impl ReadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadState::Unread => "unread",
            ReadState::Read => "read",
            ReadState::ReadLater => "read-later",
        }
    }

    pub fn parse_state(s: &str) -> Option<Self> {
        match s {
            "unread" => Some(ReadState::Unread),
            "read" => Some(ReadState::Read),
            "read-later" => Some(ReadState::ReadLater),
            _ => None,
        }
    }
}

/// A configured subscription together with its polling state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Feed {
    pub id: i64,
    pub name: String,
    pub uri: String,
    pub update_frequency_seconds: i64,
    /// `None` until the first successful poll.
    pub last_poll_time: Option<DateTime<Utc>>,
    /// Newly admitted items go straight to `Read`.
    pub archive: bool,
    pub active: bool,
}

impl Feed {
    pub fn never_polled(&self) -> bool {
        self.last_poll_time.is_none()
    }
}

/// A persisted item row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredItem {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub description: String,
    pub link: String,
    pub publication_date: DateTime<Utc>,
    pub guid: Option<String>,
}

/// Values copied out of an admitted feed item for insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub link: &'a str,
    pub publication_date: DateTime<Utc>,
    pub guid: Option<&'a str>,
}

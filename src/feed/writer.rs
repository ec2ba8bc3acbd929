use super::{Channel, Item};
use crate::model::{Feed, StoredItem};
use chrono::{DateTime, Utc};
use std::fmt::Write;

/// Serialize a channel as an RSS 2.0.1 document (`<rss version="2.0">`).
///
/// Items without a guid use their link, so readers of the output can always
/// deduplicate by guid. Dates are RFC 1123 with a numeric offset; the channel
/// `pubDate` doubles as `lastBuildDate`.
pub fn write_feed_xml(channel: &Channel) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<rss version=\"2.0\">\n  <channel>\n");
    element(&mut out, 4, "title", &channel.title);
    element(&mut out, 4, "link", &channel.link);
    element(&mut out, 4, "description", &channel.description);
    if let Some(at) = channel.pub_date {
        element(&mut out, 4, "pubDate", &rfc1123z(at));
        element(&mut out, 4, "lastBuildDate", &rfc1123z(at));
    }
    for item in &channel.items {
        write_item(&mut out, item);
    }
    out.push_str("  </channel>\n</rss>\n");
    out
}

/// A channel describing a subscribed feed and some of its stored items.
pub fn channel_from_stored(feed: &Feed, items: &[StoredItem]) -> Channel {
    Channel {
        title: feed.name.clone(),
        link: feed.uri.clone(),
        description: String::new(),
        pub_date: feed.last_poll_time,
        items: items
            .iter()
            .map(|i| Item {
                title: i.title.clone(),
                link: i.link.clone(),
                description: i.description.clone(),
                pub_date: Some(i.publication_date),
                guid: i.guid.clone(),
            })
            .collect(),
    }
}

fn write_item(out: &mut String, item: &Item) {
    out.push_str("    <item>\n");
    element(out, 6, "title", &item.title);
    element(out, 6, "link", &item.link);
    element(out, 6, "description", &item.description);
    if let Some(at) = item.pub_date {
        element(out, 6, "pubDate", &rfc1123z(at));
    }
    element(out, 6, "guid", item.guid.as_deref().unwrap_or(&item.link));
    out.push_str("    </item>\n");
}

fn element(out: &mut String, indent: usize, name: &str, text: &str) {
    // Writing to a String cannot fail.
    let _ = writeln!(
        out,
        "{:indent$}<{name}>{}</{name}>",
        "",
        html_escape::encode_text(text),
        indent = indent,
        name = name
    );
}

fn rfc1123z(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S %z").to_string()
}

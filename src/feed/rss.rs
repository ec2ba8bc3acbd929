use super::date::parse_timestamp;
use super::{
    child_text, children_named, first_child, non_empty, Channel, Dialect, DialectMismatch, Item,
};
use roxmltree::{Document, Node};

/// RSS 0.9x/2.0: `<rss><channel><item>...`. The root tag is matched
/// case-insensitively since some feeds emit `<RSS>`.
pub(super) fn parse(doc: &Document<'_>) -> Result<Channel, DialectMismatch> {
    let root = doc.root_element();
    let root_name = root.tag_name().name();
    if !root_name.eq_ignore_ascii_case("rss") {
        return Err(DialectMismatch::new(
            Dialect::Rss,
            format!("base tag is <{}>, not <rss>", root_name),
        ));
    }

    let channel = first_child(root, "channel")
        .ok_or_else(|| DialectMismatch::new(Dialect::Rss, "missing <channel>"))?;

    let pub_date = {
        let raw = child_text(channel, "pubDate");
        if raw.trim().is_empty() {
            child_text(channel, "lastBuildDate")
        } else {
            raw
        }
    };

    Ok(Channel {
        title: child_text(channel, "title").trim().to_string(),
        link: child_text(channel, "link").trim().to_string(),
        description: child_text(channel, "description"),
        pub_date: parse_timestamp(&pub_date),
        items: children_named(channel, "item").map(parse_item).collect(),
    })
}

fn parse_item(node: Node<'_, '_>) -> Item {
    Item {
        title: child_text(node, "title").trim().to_string(),
        link: child_text(node, "link").trim().to_string(),
        description: child_text(node, "description"),
        pub_date: parse_timestamp(&item_date(node)),
        guid: non_empty(child_text(node, "guid")),
    }
}

/// `pubDate`, or a Dublin Core `dc:date` when a feed only carries that.
fn item_date(node: Node<'_, '_>) -> String {
    let raw = child_text(node, "pubDate");
    if !raw.trim().is_empty() {
        return raw;
    }
    children_named(node, "date")
        .next()
        .map(super::element_text)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn parse_str(xml: &str) -> Result<Channel, DialectMismatch> {
        let doc = Document::parse(xml).unwrap();
        parse(&doc)
    }

    #[test]
    fn parses_channel_and_items() {
        let ch = parse_str(
            r#"<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom">
<channel>
  <title>Example</title>
  <atom:link href="https://example.com/feed" rel="self"/>
  <link>https://example.com/</link>
  <description>An example</description>
  <pubDate>Sat, 29 Jun 2013 18:20:00 GMT</pubDate>
  <item>
    <title>AT&amp;amp;T news</title>
    <link> https://example.com/1 </link>
    <description><![CDATA[<p>Body</p>]]></description>
    <pubDate>Sun, 30 Jun 2013 21:26:26 +0000</pubDate>
    <guid isPermaLink="false">item-1</guid>
  </item>
  <item>
    <title>Second</title>
    <link>https://example.com/2</link>
    <guid>  </guid>
  </item>
</channel>
</rss>"#,
        )
        .unwrap();

        assert_eq!(ch.title, "Example");
        assert_eq!(ch.link, "https://example.com/");
        assert_eq!(ch.description, "An example");
        assert_eq!(ch.pub_date, Some(Utc.with_ymd_and_hms(2013, 6, 29, 18, 20, 0).unwrap()));
        assert_eq!(ch.items.len(), 2);

        let first = &ch.items[0];
        assert_eq!(first.title, "AT&amp;T news");
        assert_eq!(first.link, "https://example.com/1");
        assert_eq!(first.description, "<p>Body</p>");
        assert_eq!(first.pub_date, Some(Utc.with_ymd_and_hms(2013, 6, 30, 21, 26, 26).unwrap()));
        assert_eq!(first.guid.as_deref(), Some("item-1"));

        let second = &ch.items[1];
        assert_eq!(second.guid, None);
        assert_eq!(second.pub_date, None);
        assert_eq!(second.description, "");
    }

    #[test]
    fn uppercase_root_is_accepted() {
        let ch = parse_str("<RSS><channel><title>T</title></channel></RSS>").unwrap();
        assert_eq!(ch.title, "T");
        assert!(ch.items.is_empty());
    }

    #[test]
    fn dc_date_is_used_without_pub_date() {
        let ch = parse_str(
            r#"<rss xmlns:dc="http://purl.org/dc/elements/1.1/"><channel>
<item><link>l</link><dc:date>2015-03-03T21:29:00+00:00</dc:date></item>
</channel></rss>"#,
        )
        .unwrap();
        assert_eq!(
            ch.items[0].pub_date,
            Some(Utc.with_ymd_and_hms(2015, 3, 3, 21, 29, 0).unwrap())
        );
    }

    #[test]
    fn wrong_root_or_missing_channel_is_a_mismatch() {
        let err = parse_str("<feed/>").unwrap_err();
        assert_eq!(err.dialect, Dialect::Rss);
        assert!(err.reason.contains("<feed>"));

        let err = parse_str("<rss version=\"2.0\"/>").unwrap_err();
        assert!(err.reason.contains("channel"));
    }
}

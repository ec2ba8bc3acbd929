use super::date::parse_timestamp;
use super::{
    child_text, children_named, element_text, non_empty, Channel, Dialect, DialectMismatch, Item,
};
use roxmltree::{Document, Node};

/// RSS 1.0: `<rdf:RDF>` with a `<channel>` and sibling `<item>` elements.
pub(super) fn parse(doc: &Document<'_>) -> Result<Channel, DialectMismatch> {
    let root = doc.root_element();
    let root_name = root.tag_name().name();
    if !root_name.eq_ignore_ascii_case("rdf") {
        return Err(DialectMismatch::new(
            Dialect::Rdf,
            format!("base tag is <{}>, not <rdf:RDF>", root_name),
        ));
    }

    let channel = children_named(root, "channel")
        .next()
        .ok_or_else(|| DialectMismatch::new(Dialect::Rdf, "missing <channel>"))?;

    Ok(Channel {
        title: child_text(channel, "title").trim().to_string(),
        link: child_text(channel, "link").trim().to_string(),
        description: child_text(channel, "description"),
        pub_date: parse_timestamp(&dc_date(channel)),
        items: children_named(root, "item").map(parse_item).collect(),
    })
}

fn parse_item(node: Node<'_, '_>) -> Item {
    Item {
        title: child_text(node, "title").trim().to_string(),
        link: child_text(node, "link").trim().to_string(),
        description: child_text(node, "description"),
        pub_date: parse_timestamp(&dc_date(node)),
        // RSS 1.0 defines no guid, but some producers add one anyway.
        guid: non_empty(child_text(node, "guid")),
    }
}

fn dc_date(node: Node<'_, '_>) -> String {
    children_named(node, "date")
        .next()
        .map(element_text)
        .unwrap_or_default()
}

use super::date::parse_timestamp;
use super::{element_text, first_child_ns, non_empty, Channel, Dialect, DialectMismatch, Item};
use roxmltree::{Document, Node};

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";

/// Atom (RFC 4287). Only a `feed` root in the Atom namespace matches.
pub(super) fn parse(doc: &Document<'_>) -> Result<Channel, DialectMismatch> {
    let root = doc.root_element();
    let tag = root.tag_name();
    if tag.name() != "feed" || tag.namespace() != Some(ATOM_NS) {
        return Err(DialectMismatch::new(
            Dialect::Atom,
            format!(
                "expected element type <feed> in namespace {}, found <{}>",
                ATOM_NS,
                tag.name()
            ),
        ));
    }

    // The channel link is the rel="self" one, never a guess.
    let link = atom_children(root, "link")
        .find(|l| l.attribute("rel") == Some("self"))
        .and_then(|l| l.attribute("href"))
        .unwrap_or_default()
        .trim()
        .to_string();

    Ok(Channel {
        title: text(root, "title").trim().to_string(),
        link,
        description: text(root, "subtitle"),
        pub_date: parse_timestamp(&text(root, "updated")),
        items: atom_children(root, "entry").map(parse_entry).collect(),
    })
}

fn parse_entry(entry: Node<'_, '_>) -> Item {
    let link = atom_children(entry, "link")
        .next()
        .and_then(|l| l.attribute("href"))
        .unwrap_or_default()
        .trim()
        .to_string();

    let updated = text(entry, "updated");
    let pub_date = parse_timestamp(&updated).or_else(|| parse_timestamp(&text(entry, "published")));

    let description = match first_child_ns(entry, Some(ATOM_NS), "content") {
        Some(node) => element_text(node),
        None => text(entry, "summary"),
    };

    Item {
        title: text(entry, "title").trim().to_string(),
        link,
        description,
        pub_date,
        guid: non_empty(text(entry, "id")),
    }
}

fn atom_children<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children().filter(move |c| {
        c.is_element() && c.tag_name().name() == name && c.tag_name().namespace() == Some(ATOM_NS)
    })
}

fn text(node: Node<'_, '_>, name: &str) -> String {
    first_child_ns(node, Some(ATOM_NS), name)
        .map(element_text)
        .unwrap_or_default()
}

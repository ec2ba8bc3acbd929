//! Format decoder: turns a raw feed payload into one normalized [`Channel`].
//!
//! Three dialects are tried in a fixed order (RSS, RDF, Atom). Each attempt
//! either yields a channel or a [`DialectMismatch`]; only when all three fail
//! does the caller see an error, and that error carries every attempt.

mod atom;
mod charset;
pub mod date;
mod rdf;
mod rss;
mod writer;

use chrono::{DateTime, Utc};
use roxmltree::{Document, Node, ParsingOptions};
use std::fmt;
use thiserror::Error;
use tracing::debug;

pub use writer::{channel_from_stored, write_feed_xml};

/// Every payload must start with this exact prolog prefix.
pub const XML_PREFIX: &[u8] = br#"<?xml version="1.0" encoding=""#;

/// A feed parsed from any supported dialect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Channel {
    pub title: String,
    pub link: String,
    pub description: String,
    pub pub_date: Option<DateTime<Utc>>,
    pub items: Vec<Item>,
}

/// One item/entry, normalized across dialects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Item {
    pub title: String,
    pub link: String,
    pub description: String,
    /// `None` when absent or in an unrecognized format.
    pub pub_date: Option<DateTime<Utc>>,
    /// `None` when absent or blank.
    pub guid: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Rss,
    Rdf,
    Atom,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dialect::Rss => "RSS",
            Dialect::Rdf => "RDF",
            Dialect::Atom => "Atom",
        })
    }
}

/// A single dialect did not match the document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{dialect}: {reason}")]
pub struct DialectMismatch {
    pub dialect: Dialect,
    pub reason: String,
}

impl DialectMismatch {
    pub(crate) fn new(dialect: Dialect, reason: impl Into<String>) -> Self {
        Self {
            dialect,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("unable to parse as RSS, RDF, or Atom ({rss}; {rdf}; {atom})")]
    NoDialect {
        rss: DialectMismatch,
        rdf: DialectMismatch,
        atom: DialectMismatch,
    },
}

/// Parse a raw payload into a channel.
pub fn parse_feed_xml(data: &[u8]) -> Result<Channel, DecodeError> {
    looks_like_xml(data)?;
    let text = charset::decode_to_utf8(data)?;
    // DOCTYPE preambles (Netscape RSS 0.91) are common; external DTDs are not fetched.
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let doc = Document::parse_with_options(&text, options)
        .map_err(|e| DecodeError::MalformedInput(format!("XML error: {}", e)))?;

    let rss = match rss::parse(&doc) {
        Ok(ch) => return Ok(parsed(Dialect::Rss, ch)),
        Err(e) => e,
    };
    let rdf = match rdf::parse(&doc) {
        Ok(ch) => return Ok(parsed(Dialect::Rdf, ch)),
        Err(e) => e,
    };
    let atom = match atom::parse(&doc) {
        Ok(ch) => return Ok(parsed(Dialect::Atom, ch)),
        Err(e) => e,
    };
    Err(DecodeError::NoDialect { rss, rdf, atom })
}

fn parsed(dialect: Dialect, channel: Channel) -> Channel {
    debug!(%dialect, title = %channel.title, items = channel.items.len(), "parsed channel");
    channel
}

/// Cheap check before handing anything to the XML parser.
fn looks_like_xml(data: &[u8]) -> Result<(), DecodeError> {
    if data.len() < XML_PREFIX.len() {
        return Err(DecodeError::MalformedInput(
            "buffer is too short to have XML header".into(),
        ));
    }
    if !data.starts_with(XML_PREFIX) {
        return Err(DecodeError::MalformedInput(
            "buffer does not have XML header".into(),
        ));
    }
    Ok(())
}

/// Element children of `node` whose local name is `name`, in any namespace.
pub(crate) fn children_named<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children()
        .filter(move |c| c.is_element() && c.tag_name().name() == name)
}

/// First child named `name` in the same namespace as `node`.
///
/// Keeps foreign elements such as `<atom:link>` inside an RSS channel from
/// shadowing the dialect's own fields.
pub(crate) fn first_child<'a, 'input>(
    node: Node<'a, 'input>,
    name: &str,
) -> Option<Node<'a, 'input>> {
    first_child_ns(node, node.tag_name().namespace(), name)
}

pub(crate) fn first_child_ns<'a, 'input>(
    node: Node<'a, 'input>,
    ns: Option<&str>,
    name: &str,
) -> Option<Node<'a, 'input>> {
    node.children().find(|c| {
        c.is_element() && c.tag_name().name() == name && c.tag_name().namespace() == ns
    })
}

/// All text beneath `node`, CDATA included.
pub(crate) fn element_text(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect()
}

/// Text of the first child named `name`, or empty.
pub(crate) fn child_text(node: Node<'_, '_>, name: &str) -> String {
    first_child(node, name).map(element_text).unwrap_or_default()
}

pub(crate) fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

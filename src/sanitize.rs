//! Text sanitizer for display: feed titles and descriptions arrive as HTML
//! fragments of varying quality.
use once_cell::sync::Lazy;
use regex::Regex;

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<.*?>").expect("tag regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Strip markup, decode entities, and collapse runs of whitespace.
///
/// Tags are removed before entities are decoded, so `&lt;p&gt;` survives as
/// the literal text `<p>`.
pub fn sanitize(text: &str) -> String {
    let stripped = TAG.replace_all(text, "");
    let decoded = html_escape::decode_html_entities(&stripped);
    WHITESPACE.replace_all(&decoded, " ").trim().to_string()
}

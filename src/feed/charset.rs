use super::{DecodeError, XML_PREFIX};
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};
use std::borrow::Cow;
use tracing::{debug, warn};

/// Transcode `data` to UTF-8 according to the encoding named in its prolog.
///
/// The caller has already checked that `data` starts with [`XML_PREFIX`]. If
/// the document was not UTF-8, the declaration is rewritten to say so, since
/// the returned text no longer matches the original label.
pub(crate) fn decode_to_utf8(data: &[u8]) -> Result<Cow<'_, str>, DecodeError> {
    let label = declared_encoding(data)?;
    let encoding = Encoding::for_label(label.as_bytes()).ok_or_else(|| {
        DecodeError::MalformedInput(format!("unsupported encoding {:?}", label))
    })?;

    // A payload that begins with an ASCII prolog cannot really be UTF-16.
    let encoding = if encoding == UTF_16LE || encoding == UTF_16BE {
        UTF_8
    } else {
        encoding
    };

    let (text, had_errors) = encoding.decode_without_bom_handling(data);
    if had_errors {
        warn!(
            encoding = encoding.name(),
            label = %label,
            "payload has bytes invalid for its declared encoding; replaced with U+FFFD"
        );
    }
    if encoding == UTF_8 && label.eq_ignore_ascii_case("utf-8") {
        return Ok(text);
    }

    debug!(encoding = encoding.name(), label = %label, "transcoding feed payload");
    let start = XML_PREFIX.len();
    let end = start + label.len();
    Ok(Cow::Owned(format!("{}UTF-8{}", &text[..start], &text[end..])))
}

/// The label between `encoding="` and the closing quote.
fn declared_encoding(data: &[u8]) -> Result<String, DecodeError> {
    let rest = &data[XML_PREFIX.len()..];
    let len = rest
        .iter()
        .take(64)
        .position(|&b| b == b'"')
        .ok_or_else(|| DecodeError::MalformedInput("unterminated encoding declaration".into()))?;
    let label = std::str::from_utf8(&rest[..len])
        .map_err(|_| DecodeError::MalformedInput("encoding label is not ASCII".into()))?;
    if label.is_empty() || !label.is_ascii() {
        return Err(DecodeError::MalformedInput(format!(
            "invalid encoding label {:?}",
            label
        )));
    }
    Ok(label.to_string())
}

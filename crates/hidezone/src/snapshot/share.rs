//! Share strings: base64 of the snapshot JSON, optionally inside a URL.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};

use super::{decode, encode, Snapshot};
use crate::error::SnapshotError;

/// URL query parameter carrying a share string.
pub const SHARE_PARAM: &str = "hz";

pub fn encode_share(snapshot: &Snapshot) -> String {
    STANDARD.encode(encode(snapshot))
}

/// `base` with the share string appended as the `hz` query parameter.
pub fn share_url(base: &str, snapshot: &Snapshot) -> String {
    let sep = if base.contains('?') { '&' } else { '?' };
    format!(
        "{base}{sep}{SHARE_PARAM}={}",
        utf8_percent_encode(&encode_share(snapshot), NON_ALPHANUMERIC)
    )
}

/// Accepts base64 (standard or URL-safe, padded or not), a URL carrying an
/// `hz` parameter, or raw snapshot JSON.
pub fn decode_share(input: &str) -> Result<Snapshot, SnapshotError> {
    let input = input.trim();
    let payload = match extract_param(input) {
        Some(raw) => unescape(raw)?,
        None => input.to_string(),
    };
    for engine in [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD] {
        if let Ok(bytes) = engine.decode(payload.as_bytes()) {
            let text = String::from_utf8(bytes)
                .map_err(|_| SnapshotError::invalid("share string is not UTF-8"))?;
            return decode(&text);
        }
    }
    if payload.starts_with('{') {
        return decode(&payload);
    }
    Err(SnapshotError::invalid(
        "share string is neither base64 nor JSON",
    ))
}

/// Value of `hz=` in a query string, if present.
fn extract_param(input: &str) -> Option<&str> {
    if input.starts_with('{') {
        return None;
    }
    let query = &input[input.find('?')? + 1..];
    let query = query.split('#').next().unwrap_or(query);
    query.split('&').find_map(|pair| {
        pair.strip_prefix(SHARE_PARAM)
            .and_then(|rest| rest.strip_prefix('='))
    })
}

/// Un-escape a query value. Form encoding turns a literal '+' into a space,
/// which never occurs in base64, so spaces are mapped back.
fn unescape(raw: &str) -> Result<String, SnapshotError> {
    let text = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|_| SnapshotError::invalid("share URL is not UTF-8"))?;
    Ok(text.replace(' ', "+"))
}

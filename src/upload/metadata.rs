//! Metadata sanitization
//!
//! S3 user metadata travels in HTTP headers, which are ASCII-only. Values
//! are trimmed and every UTF-16 code unit above 7-bit ASCII is replaced
//! with its `\uXXXX` escape so non-ASCII metadata round-trips instead of
//! being corrupted in transit. Characters outside the BMP escape as their
//! surrogate pair, two `\uXXXX` units, which is what a standard `\uXXXX`
//! decoder reassembles.

use std::collections::HashMap;

/// Sanitize user metadata into a wire-safe form.
///
/// Entries with `None` values are dropped; remaining values are trimmed of
/// surrounding whitespace and unicode-escaped. Keys pass through unchanged.
pub fn sanitize(metadata: &HashMap<String, Option<String>>) -> HashMap<String, String> {
    metadata
        .iter()
        .filter_map(|(key, value)| {
            value
                .as_ref()
                .map(|v| (key.clone(), escape_unicode(v.trim())))
        })
        .collect()
}

/// Replace every UTF-16 code unit > 127 by `\uXXXX` (lowercase hex,
/// zero-padded to four digits). Units <= 127 are ASCII and pass through.
pub fn escape_unicode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for unit in s.encode_utf16() {
        if unit > 127 {
            out.push_str(&format!("\\u{:04x}", unit));
        } else {
            out.push(unit as u8 as char);
        }
    }
    out
}

/*
 * grammar.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Busta, a streaming SOAP MTOM/XOP message codec.
 *
 * Busta is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Busta is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Busta.  If not, see <http://www.gnu.org/licenses/>.
 */

//! MIME grammar (RFC 2045 token, RFC 2046 boundary) and content-ID forms.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::MtomError;

/// URI scheme prefix for content-ID references from the infoset.
pub const CONTENT_ID_SCHEME: &str = "cid:";

/// Checks if a character is valid in an RFC 2045 token.
#[inline]
pub fn is_token_char(c: u8) -> bool {
    matches!(c,
        b'0'..=b'9' | b'A'..=b'Z' | b'a'..=b'z' |
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' |
        b'^' | b'_' | b'`' | b'{' | b'|' | b'}' | b'~'
    )
}

/// Checks if the string is a valid RFC 2045 token (1+ token chars).
pub fn is_token(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(is_token_char)
}

/// Checks if a character is valid in a MIME boundary (RFC 2046).
#[inline]
pub fn is_boundary_char(c: u8) -> bool {
    matches!(c,
        b'0'..=b'9' | b'A'..=b'Z' | b'a'..=b'z' |
        b'\'' | b'(' | b')' | b'+' | b'_' | b',' | b'-' | b'.' |
        b'/' | b':' | b'=' | b'?' | b' '
    ) // space allowed except as last char
}

/// Validates MIME boundary: 1-70 chars from the boundary set, no trailing space (RFC 2046).
pub fn is_valid_boundary(boundary: &str) -> bool {
    let b = boundary.as_bytes();
    (1..=70).contains(&b.len())
        && b.iter().copied().all(is_boundary_char)
        && *b.last().unwrap_or(&b' ') != b' '
}

/// Quote a parameter value for a content-type header if it is not a plain token.
pub fn quote_parameter_value(value: &str) -> String {
    if is_token(value) {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Normalize an infoset reference (a cid: URI or a bracketed content-ID) to
/// the bracketed form used as the part registry key. cid: URIs are
/// percent-decoded; a bare bracketed value is taken as-is.
pub fn normalize_reference(uri: &str) -> Result<String, MtomError> {
    if uri.is_empty() {
        return Err(MtomError::protocol("empty URI in xop:Include href"));
    }
    if let Some(rest) = uri.strip_prefix(CONTENT_ID_SCHEME) {
        let decoded = percent_decode_str(rest)
            .decode_utf8()
            .map_err(|e| MtomError::format_with_source(format!("invalid cid: URI '{}'", uri), e))?;
        return Ok(format!("<{}>", decoded));
    }
    if uri.starts_with('<') {
        if uri.ends_with('>') {
            return Ok(uri.to_string());
        }
        return Err(MtomError::protocol(format!(
            "invalid content-ID reference '{}'",
            uri
        )));
    }
    Err(MtomError::protocol(format!(
        "URI '{}' is not a cid: URI or a bracketed content-ID",
        uri
    )))
}

/// Normalize a `start` content-type parameter to bracketed form. An opening
/// bracket without a closing one is malformed; an unbracketed value is wrapped.
pub fn normalize_start(start: &str) -> Result<String, MtomError> {
    if start.starts_with('<') {
        if start.ends_with('>') {
            Ok(start.to_string())
        } else {
            Err(MtomError::protocol(format!("invalid start URI '{}'", start)))
        }
    } else {
        Ok(format!("<{}>", start))
    }
}

// Percent-encode everything outside the RFC 3986 unreserved set.
const CID_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Build the cid: URI for a bracketed content-ID, percent-encoding the id.
pub fn reference_for_content_id(content_id: &str) -> String {
    let bare = content_id
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(content_id);
    format!(
        "{}{}",
        CONTENT_ID_SCHEME,
        utf8_percent_encode(bare, CID_ENCODE_SET)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_validation() {
        assert!(is_valid_boundary("simple-boundary"));
        assert!(is_valid_boundary("uuid:0657db2d+id=1"));
        assert!(!is_valid_boundary(""));
        assert!(!is_valid_boundary(&"x".repeat(71)));
        assert!(!is_valid_boundary("trailing "));
        assert!(!is_valid_boundary("bad\"char"));
    }

    #[test]
    fn normalize_reference_forms() {
        assert_eq!(normalize_reference("cid:a@b").unwrap(), "<a@b>");
        assert_eq!(normalize_reference("<a@b>").unwrap(), "<a@b>");
        assert_eq!(normalize_reference("cid:a%40b").unwrap(), "<a@b>");
        assert!(normalize_reference("<unclosed").is_err());
        assert!(normalize_reference("http://example.com/x").is_err());
        assert!(normalize_reference("").is_err());
    }

    #[test]
    fn normalize_start_brackets() {
        assert_eq!(normalize_start("a@b").unwrap(), "<a@b>");
        assert_eq!(normalize_start("<a@b>").unwrap(), "<a@b>");
        assert!(normalize_start("<oops").is_err());
    }

    #[test]
    fn reference_round_trips_through_normalize() {
        let cid = "<part0.1a2b@busta.invalid>";
        let href = reference_for_content_id(cid);
        assert!(href.starts_with("cid:"));
        assert_eq!(normalize_reference(&href).unwrap(), cid);
    }

    #[test]
    fn quoting() {
        assert_eq!(quote_parameter_value("token"), "token");
        assert_eq!(
            quote_parameter_value("application/xop+xml"),
            "\"application/xop+xml\""
        );
        assert_eq!(quote_parameter_value("a\"b"), "\"a\\\"b\"");
    }
}

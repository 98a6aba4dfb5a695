/*
 * headers.rs
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

//! Per-part header model: the fixed recognized set (Content-Type,
//! Content-Transfer-Encoding, Content-ID, MIME-Version) needed to classify
//! MIME parts. Unrecognized headers are consumed but not retained.

use crate::error::MtomError;
use crate::mime::grammar::is_token;

/// Content-Type header value: media type/subtype plus parameters in
/// declaration order, looked up case-insensitively.
#[derive(Debug, Clone)]
pub struct ContentTypeHeader {
    media_type: String,
    media_subtype: String,
    parameters: Vec<(String, String)>,
}

impl ContentTypeHeader {
    /// Parse a Content-Type header value. Malformed syntax is a format error.
    pub fn parse(value: &str) -> Result<Self, MtomError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(MtomError::format("empty content-type header"));
        }
        let (type_part, params_part) = match value.find(';') {
            Some(i) => {
                let (a, b) = value.split_at(i);
                (a.trim(), &b[1..])
            }
            None => (value, ""),
        };
        let slash = type_part
            .find('/')
            .ok_or_else(|| MtomError::format(format!("invalid media type '{}'", type_part)))?;
        let media_type = type_part[..slash].trim();
        let media_subtype = type_part[slash + 1..].trim();
        if !is_token(media_type) || !is_token(media_subtype) {
            return Err(MtomError::format(format!(
                "invalid media type '{}'",
                type_part
            )));
        }
        let parameters = parse_parameters(params_part)?;
        Ok(Self {
            media_type: media_type.to_string(),
            media_subtype: media_subtype.to_string(),
            parameters,
        })
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn media_subtype(&self) -> &str {
        &self.media_subtype
    }

    pub fn is_media(&self, primary: &str, sub: &str) -> bool {
        self.media_type.eq_ignore_ascii_case(primary) && self.media_subtype.eq_ignore_ascii_case(sub)
    }

    /// First parameter with the given name (case-insensitive).
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn parameters(&self) -> &[(String, String)] {
        &self.parameters
    }
}

/// Parse a semicolon-separated parameter list (name=value; name="value").
fn parse_parameters(input: &str) -> Result<Vec<(String, String)>, MtomError> {
    let mut parameters = Vec::new();
    let bytes = input.as_bytes();
    let len = bytes.len();
    let mut pos = 0;

    while pos < len {
        while pos < len && (bytes[pos] == b';' || bytes[pos].is_ascii_whitespace()) {
            pos += 1;
        }
        if pos >= len {
            break;
        }
        let eq = bytes[pos..]
            .iter()
            .position(|&b| b == b'=')
            .ok_or_else(|| MtomError::format(format!("invalid content-type parameter in '{}'", input)))?;
        let name = input[pos..pos + eq].trim();
        if !is_token(name) {
            return Err(MtomError::format(format!(
                "invalid content-type parameter name '{}'",
                name
            )));
        }
        pos += eq + 1;
        let value = if pos < len && bytes[pos] == b'"' {
            pos += 1;
            let mut v = String::new();
            let mut closed = false;
            while pos < len {
                let c = bytes[pos];
                if c == b'\\' && pos + 1 < len {
                    v.push(bytes[pos + 1] as char);
                    pos += 2;
                } else if c == b'"' {
                    pos += 1;
                    closed = true;
                    break;
                } else {
                    v.push(c as char);
                    pos += 1;
                }
            }
            if !closed {
                return Err(MtomError::format(format!(
                    "unterminated quoted parameter value in '{}'",
                    input
                )));
            }
            v
        } else {
            let end = bytes[pos..]
                .iter()
                .position(|&b| b == b';')
                .map(|i| pos + i)
                .unwrap_or(len);
            let v = input[pos..end].trim().to_string();
            pos = end;
            if !is_token(&v) {
                return Err(MtomError::format(format!(
                    "invalid content-type parameter value '{}'",
                    v
                )));
            }
            v
        };
        parameters.push((name.to_string(), value));
    }
    Ok(parameters)
}

/// Content-Transfer-Encoding classification. Anything outside the three
/// identity encodings is Other and rejected wherever it matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentTransferEncoding {
    SevenBit,
    EightBit,
    Binary,
    Other,
}

/// Content-Transfer-Encoding header: classification plus the raw value for
/// error reporting.
#[derive(Debug, Clone)]
pub struct ContentTransferEncodingHeader {
    value: String,
    encoding: ContentTransferEncoding,
}

impl ContentTransferEncodingHeader {
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        let encoding = if value.eq_ignore_ascii_case("7bit") {
            ContentTransferEncoding::SevenBit
        } else if value.eq_ignore_ascii_case("8bit") {
            ContentTransferEncoding::EightBit
        } else if value.eq_ignore_ascii_case("binary") {
            ContentTransferEncoding::Binary
        } else {
            ContentTransferEncoding::Other
        };
        Self {
            value: value.to_string(),
            encoding,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn encoding(&self) -> ContentTransferEncoding {
        self.encoding
    }
}

/// MIME-Version header (RFC 2045). Only 1.0 exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeVersion {
    Version1_0,
}

impl MimeVersion {
    pub fn as_str(&self) -> &'static str {
        "1.0"
    }

    pub fn parse(s: &str) -> Option<Self> {
        if s.trim() == "1.0" {
            Some(MimeVersion::Version1_0)
        } else {
            None
        }
    }
}

impl std::fmt::Display for MimeVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The headers of one MIME part (or of the message itself), restricted to
/// the recognized set. `buffered_size` is the byte count charged against the
/// decode quota while reading the header block; it is credited back when the
/// owning part is released.
#[derive(Debug, Clone, Default)]
pub struct MimeHeaders {
    content_type: Option<ContentTypeHeader>,
    content_transfer_encoding: Option<ContentTransferEncodingHeader>,
    content_id: Option<String>,
    mime_version: Option<String>,
    buffered_size: usize,
}

impl MimeHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one unfolded header line's name and value. Recognized headers
    /// are parsed eagerly; unknown names are dropped.
    pub fn insert(&mut self, name: &str, value: &str) -> Result<(), MtomError> {
        if name.eq_ignore_ascii_case("content-type") {
            self.content_type = Some(ContentTypeHeader::parse(value)?);
        } else if name.eq_ignore_ascii_case("content-transfer-encoding") {
            self.content_transfer_encoding = Some(ContentTransferEncodingHeader::parse(value));
        } else if name.eq_ignore_ascii_case("content-id") {
            self.content_id = Some(value.trim().to_string());
        } else if name.eq_ignore_ascii_case("mime-version") {
            self.mime_version = Some(value.trim().to_string());
        }
        Ok(())
    }

    pub fn content_type(&self) -> Option<&ContentTypeHeader> {
        self.content_type.as_ref()
    }

    pub fn content_transfer_encoding(&self) -> Option<&ContentTransferEncodingHeader> {
        self.content_transfer_encoding.as_ref()
    }

    pub fn content_id(&self) -> Option<&str> {
        self.content_id.as_deref()
    }

    /// Raw MIME-Version value, if the header was present.
    pub fn mime_version(&self) -> Option<&str> {
        self.mime_version.as_deref()
    }

    pub fn buffered_size(&self) -> usize {
        self.buffered_size
    }

    pub(crate) fn add_buffered_size(&mut self, bytes: usize) {
        self.buffered_size += bytes;
    }
}

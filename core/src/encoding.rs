/*
 * encoding.rs
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

//! Text encodings for the XML root part (UTF-8, UTF-16LE, UTF-16BE) and
//! the charset table used to resolve content-type charset parameters.

use crate::error::MtomError;

/// A concrete text encoding for the XML infoset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
}

/// All encodings the codec can read or write.
pub const SUPPORTED_ENCODINGS: [TextEncoding; 3] = [
    TextEncoding::Utf8,
    TextEncoding::Utf16Le,
    TextEncoding::Utf16Be,
];

/// Result of resolving a charset name against the charset table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharsetMatch {
    /// Maps to a concrete encoding.
    Known(TextEncoding),
    /// Recognized but ambiguous ("utf-16" without endianness); caller autodetects.
    Autodetect,
    /// Not in the table.
    Unknown,
}

impl TextEncoding {
    /// Charset name written into content-type headers.
    pub fn charset(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Utf16Le => "utf-16LE",
            TextEncoding::Utf16Be => "utf-16BE",
        }
    }

    fn encoding_rs(&self) -> &'static encoding_rs::Encoding {
        match self {
            TextEncoding::Utf8 => encoding_rs::UTF_8,
            TextEncoding::Utf16Le => encoding_rs::UTF_16LE,
            TextEncoding::Utf16Be => encoding_rs::UTF_16BE,
        }
    }

    /// Decode bytes in this encoding, removing a leading BOM if present.
    /// Invalid sequences are a format error: the root part must be clean XML text.
    pub fn decode(&self, bytes: &[u8]) -> Result<String, MtomError> {
        let (text, had_errors) = self.encoding_rs().decode_with_bom_removal(bytes);
        if had_errors {
            return Err(MtomError::format(format!(
                "root part is not valid {} text",
                self.charset()
            )));
        }
        Ok(text.into_owned())
    }

    /// Encode a string in this encoding. encoding_rs defines no UTF-16
    /// encoder, so the UTF-16 arms convert code units directly.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 => text.as_bytes().to_vec(),
            TextEncoding::Utf16Le => {
                let mut out = Vec::with_capacity(text.len() * 2);
                for unit in text.encode_utf16() {
                    out.extend_from_slice(&unit.to_le_bytes());
                }
                out
            }
            TextEncoding::Utf16Be => {
                let mut out = Vec::with_capacity(text.len() * 2);
                for unit in text.encode_utf16() {
                    out.extend_from_slice(&unit.to_be_bytes());
                }
                out
            }
        }
    }
}

/// Resolve a charset name: exact match against the table first, then
/// case-insensitive. "utf-16" is recognized but ambiguous.
pub fn match_charset(charset: &str) -> CharsetMatch {
    match charset {
        "utf-8" => return CharsetMatch::Known(TextEncoding::Utf8),
        "utf-16LE" => return CharsetMatch::Known(TextEncoding::Utf16Le),
        "utf-16BE" => return CharsetMatch::Known(TextEncoding::Utf16Be),
        "utf-16" => return CharsetMatch::Autodetect,
        _ => {}
    }
    if charset.eq_ignore_ascii_case("utf-8") {
        CharsetMatch::Known(TextEncoding::Utf8)
    } else if charset.eq_ignore_ascii_case("utf-16le") {
        CharsetMatch::Known(TextEncoding::Utf16Le)
    } else if charset.eq_ignore_ascii_case("utf-16be") {
        CharsetMatch::Known(TextEncoding::Utf16Be)
    } else if charset.eq_ignore_ascii_case("utf-16") {
        CharsetMatch::Autodetect
    } else {
        CharsetMatch::Unknown
    }
}

/// Resolve a root-part charset against the caller's candidate encodings.
/// Failure enumerates the candidate set.
pub fn resolve_root_charset(
    charset: &str,
    candidates: &[TextEncoding],
) -> Result<TextEncoding, MtomError> {
    for candidate in candidates {
        if candidate.charset().eq_ignore_ascii_case(charset) {
            return Ok(*candidate);
        }
    }
    // Alternate names for the UTF-16 variants.
    let alias = if charset.eq_ignore_ascii_case("utf-16LE") {
        Some(TextEncoding::Utf16Le)
    } else if charset.eq_ignore_ascii_case("utf-16BE") {
        Some(TextEncoding::Utf16Be)
    } else {
        None
    };
    if let Some(enc) = alias {
        if candidates.contains(&enc) {
            return Ok(enc);
        }
    }
    let expected = candidates
        .iter()
        .map(|e| e.charset())
        .collect::<Vec<_>>()
        .join(" | ");
    Err(MtomError::protocol(format!(
        "unexpected charset '{}' on root part; expected one of: {}",
        charset, expected
    )))
}

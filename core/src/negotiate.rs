/*
 * negotiate.rs
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

//! Content-type negotiation: classifies inbound content-types as
//! MTOM-multipart, plain-text XML, or unsupported, and resolves declared
//! charsets to concrete encodings without full grammar parsing when a fast
//! path applies.

use std::io::Read;
use std::io::Write;

use tracing::debug;

use crate::encoding::{match_charset, CharsetMatch, TextEncoding, SUPPORTED_ENCODINGS};
use crate::error::MtomError;
use crate::mime::ContentTypeHeader;
use crate::xop::{
    DecodeLimits, MtomReader, MtomWriter, ReaderQuotas, WriterOptions, XmlTextCursor,
};

/// Protocol message version; fixes the plain-text media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageVersion {
    Soap11,
    Soap12,
    None,
}

impl MessageVersion {
    /// Media type of the version's direct (non-multipart) representation.
    pub fn media_type(&self) -> &'static str {
        match self {
            MessageVersion::Soap11 => "text/xml",
            MessageVersion::Soap12 => "application/soap+xml",
            MessageVersion::None => "application/xml",
        }
    }
}

/// The MTOM message media type (parameters vary per message).
pub const MTOM_MEDIA_TYPE: &str = "multipart/related";

/// A reader handed out by the codec: the MTOM façade for multipart input,
/// the plain text cursor for direct XML.
pub enum MessageReader<R: Read> {
    Mtom(MtomReader<R>),
    Text(XmlTextCursor),
}

impl<R: Read> std::fmt::Debug for MessageReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageReader::Mtom(_) => f.debug_tuple("Mtom").finish(),
            MessageReader::Text(_) => f.debug_tuple("Text").finish(),
        }
    }
}

/// Encode/decode entry point for one message version: owns the quotas, the
/// write encoding, and the precomputed content-type → encoding table.
/// Cheap to construct; not shared across threads.
pub struct MessageCodec {
    version: MessageVersion,
    write_encoding: TextEncoding,
    quotas: ReaderQuotas,
    limits: DecodeLimits,
    content_map: Vec<(String, TextEncoding)>,
}

impl MessageCodec {
    pub fn new(
        version: MessageVersion,
        write_encoding: TextEncoding,
        quotas: ReaderQuotas,
        limits: DecodeLimits,
    ) -> Self {
        let content_map = SUPPORTED_ENCODINGS
            .iter()
            .map(|enc| {
                (
                    format!("{}; charset={}", version.media_type(), enc.charset()),
                    *enc,
                )
            })
            .collect();
        Self {
            version,
            write_encoding,
            quotas,
            limits,
            content_map,
        }
    }

    pub fn version(&self) -> MessageVersion {
        self.version
    }

    pub fn write_encoding(&self) -> TextEncoding {
        self.write_encoding
    }

    pub fn quotas(&self) -> &ReaderQuotas {
        &self.quotas
    }

    pub fn limits(&self) -> &DecodeLimits {
        &self.limits
    }

    /// Content-type of the version's direct representation in the write
    /// encoding.
    pub fn text_content_type(&self) -> String {
        format!(
            "{}; charset={}",
            self.version.media_type(),
            self.write_encoding.charset()
        )
    }

    /// True when the candidate names an MTOM multipart package.
    pub fn is_mtom_content_type(&self, content_type: &str) -> bool {
        content_type_matches(content_type, MTOM_MEDIA_TYPE, MTOM_MEDIA_TYPE)
    }

    /// True when the candidate names the version's direct XML representation.
    pub fn is_text_content_type(&self, content_type: &str) -> bool {
        content_type_matches(
            content_type,
            &self.text_content_type(),
            self.version.media_type(),
        )
    }

    /// Whether this codec can decode a message with the given content-type.
    /// A malformed candidate is simply unsupported, never an error.
    pub fn is_content_type_supported(&self, content_type: &str) -> bool {
        self.is_mtom_content_type(content_type) || self.is_text_content_type(content_type)
    }

    /// Resolve a content-type's declared charset to a concrete encoding.
    /// None means no (or an ambiguous) charset: the caller autodetects.
    /// Exact table hits and a `charset=` scan avoid full grammar parsing.
    pub fn encoding_from_content_type(
        &self,
        content_type: &str,
    ) -> Result<Option<TextEncoding>, MtomError> {
        for (known, encoding) in &self.content_map {
            if known == content_type {
                return Ok(Some(*encoding));
            }
        }
        let bytes = content_type.as_bytes();
        let semi = match content_type.find(';') {
            // No parameters at all: nothing declares an encoding.
            None => return Ok(None),
            Some(i) => i,
        };

        // Optimize for charset being the first parameter: "; charset=".
        let mut charset_value_index = None;
        if content_type.len() > semi + 11
            && bytes[semi + 2] == b'c'
            && bytes[semi + 2..semi + 10].eq_ignore_ascii_case(b"charset=")
        {
            charset_value_index = Some(semi + 10);
        } else if let Some(rel) = find_ignore_case(&content_type[semi + 1..], "charset=") {
            // charset= somewhere later: valid only if preceded by nothing but
            // linear whitespace back to a semicolon.
            let param_index = semi + 1 + rel;
            let mut i = param_index as isize - 1;
            while i >= semi as isize {
                let c = bytes[i as usize];
                if c == b';' {
                    charset_value_index = Some(param_index + 8);
                    break;
                }
                if c == b'\n' {
                    if i as usize == semi || bytes[i as usize - 1] != b'\r' {
                        break;
                    }
                    i -= 2;
                    continue;
                }
                if c != b' ' && c != b'\t' {
                    break;
                }
                i -= 1;
            }
        }

        if let Some(index) = charset_value_index {
            let rest = &content_type[index..];
            let mut charset = match rest.find(';') {
                Some(j) => &rest[..j],
                None => rest,
            };
            if charset.len() > 2 && charset.starts_with('"') && charset.ends_with('"') {
                charset = &charset[1..charset.len() - 1];
            }
            match match_charset(charset) {
                CharsetMatch::Known(enc) => return Ok(Some(enc)),
                CharsetMatch::Autodetect => return Ok(None),
                CharsetMatch::Unknown => {}
            }
        }

        // The heuristics failed: fall back to full grammar parsing.
        let parsed = ContentTypeHeader::parse(content_type)
            .map_err(|e| MtomError::protocol(format!("malformed content-type header: {}", e)))?;
        match parsed.parameter("charset") {
            None => Ok(None),
            Some(cs) if cs.is_empty() => Ok(None),
            Some(cs) => match match_charset(cs) {
                CharsetMatch::Known(enc) => Ok(Some(enc)),
                CharsetMatch::Autodetect => Ok(None),
                CharsetMatch::Unknown => Err(MtomError::protocol(format!(
                    "unrecognized charset '{}' in content-type",
                    cs
                ))),
            },
        }
    }

    /// Hand out the reader matching the content-type: the MTOM façade for
    /// multipart packages, the plain text cursor for direct XML.
    pub fn reader_for<R: Read>(
        &self,
        mut stream: R,
        content_type: &str,
    ) -> Result<MessageReader<R>, MtomError> {
        if self.is_mtom_content_type(content_type) {
            debug!(content_type, "creating MTOM reader");
            return Ok(MessageReader::Mtom(MtomReader::from_stream(
                stream,
                Some(content_type),
                &SUPPORTED_ENCODINGS,
                self.quotas.clone(),
                self.limits.clone(),
            )?));
        }
        if self.is_text_content_type(content_type) {
            debug!(content_type, "creating text reader");
            let mut bytes = Vec::new();
            stream
                .read_to_end(&mut bytes)
                .map_err(|e| MtomError::format_with_source("error reading message body", e))?;
            if bytes.len() > self.limits.max_buffer_size {
                return Err(MtomError::quota(
                    "MIME buffer quota exceeded",
                    self.limits.max_buffer_size,
                ));
            }
            let encoding = self
                .encoding_from_content_type(content_type)?
                .unwrap_or_else(|| sniff_encoding(&bytes));
            return Ok(MessageReader::Text(XmlTextCursor::from_bytes(
                &bytes,
                encoding,
                self.quotas.clone(),
            )?));
        }
        Err(MtomError::protocol(format!(
            "content-type '{}' is not supported",
            content_type
        )))
    }

    /// MTOM writer streaming into `sink`; start-info declares the inner
    /// message's own content-type.
    pub fn writer_for<W: Write>(&self, sink: W) -> Result<MtomWriter<W>, MtomError> {
        MtomWriter::new(
            sink,
            WriterOptions {
                encoding: self.write_encoding,
                start_info: Some(self.text_content_type()),
                ..WriterOptions::default()
            },
        )
    }

    /// MTOM writer producing one bounded in-memory buffer.
    pub fn buffered_writer(&self, max_size: usize) -> Result<MtomWriter<Vec<u8>>, MtomError> {
        MtomWriter::to_buffer(
            max_size,
            WriterOptions {
                encoding: self.write_encoding,
                start_info: Some(self.text_content_type()),
                ..WriterOptions::default()
            },
        )
    }
}

/// BOM-based detection for bodies whose content-type omits the charset.
fn sniff_encoding(bytes: &[u8]) -> TextEncoding {
    match encoding_rs::Encoding::for_bom(bytes) {
        Some((enc, _)) if enc == encoding_rs::UTF_16LE => TextEncoding::Utf16Le,
        Some((enc, _)) if enc == encoding_rs::UTF_16BE => TextEncoding::Utf16Be,
        _ => TextEncoding::Utf8,
    }
}

/// Candidate match against one supported content-type: exact first, then a
/// prefix up to ';' (case-sensitively, then case-insensitively with linear
/// whitespace tolerated), finally a full parse comparing media type and
/// charset membership.
fn content_type_matches(candidate: &str, supported: &str, supported_media: &str) -> bool {
    if candidate == supported {
        return true;
    }
    let bytes = candidate.as_bytes();
    if candidate.len() > supported.len()
        && candidate.starts_with(supported)
        && bytes[supported.len()] == b';'
    {
        return true;
    }
    if candidate.len() >= supported.len()
        && bytes[..supported.len()].eq_ignore_ascii_case(supported.as_bytes())
    {
        if candidate.len() == supported.len() {
            return true;
        }
        let mut i = supported.len();
        let mut ch = bytes[i];
        if ch == b';' {
            return true;
        }
        // LWS = [CRLF]? (SP | HT)+ may appear before the semicolon.
        if ch == b'\r' && candidate.len() > i + 1 && bytes[i + 1] == b'\n' {
            i += 2;
            if i == candidate.len() {
                return true;
            }
            ch = bytes[i];
        }
        if ch == b' ' || ch == b'\t' {
            i += 1;
            while i < candidate.len() {
                ch = bytes[i];
                if ch != b' ' && ch != b'\t' {
                    break;
                }
                i += 1;
            }
        }
        if ch == b';' || i == candidate.len() {
            return true;
        }
    }
    // The candidate may carry parameters the supported form does not:
    // compare the stripped media type and check the charset is usable.
    match ContentTypeHeader::parse(candidate) {
        Err(_) => false,
        Ok(parsed) => {
            let media = format!("{}/{}", parsed.media_type(), parsed.media_subtype());
            if !supported_media.is_empty() && !supported_media.eq_ignore_ascii_case(&media) {
                return false;
            }
            match parsed.parameter("charset") {
                None => true,
                Some(cs) if cs.is_empty() => true,
                Some(cs) => match_charset(cs) != CharsetMatch::Unknown,
            }
        }
    }
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    (0..=h.len() - n.len()).find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> MessageCodec {
        MessageCodec::new(
            MessageVersion::Soap12,
            TextEncoding::Utf8,
            ReaderQuotas::default(),
            DecodeLimits::default(),
        )
    }

    #[test]
    fn media_types_per_version() {
        assert_eq!(MessageVersion::Soap11.media_type(), "text/xml");
        assert_eq!(MessageVersion::Soap12.media_type(), "application/soap+xml");
        assert_eq!(MessageVersion::None.media_type(), "application/xml");
    }

    #[test]
    fn mtom_content_types_are_supported() {
        let c = codec();
        assert!(c.is_content_type_supported("multipart/related"));
        assert!(c.is_content_type_supported(
            "multipart/related; type=\"application/xop+xml\"; boundary=abc"
        ));
        assert!(c.is_content_type_supported("Multipart/Related; boundary=x"));
    }

    #[test]
    fn text_content_types_are_supported() {
        let c = codec();
        assert!(c.is_content_type_supported("application/soap+xml; charset=utf-8"));
        assert!(c.is_content_type_supported("application/soap+xml"));
        assert!(c.is_content_type_supported("APPLICATION/SOAP+XML; charset=utf-16LE"));
        // Linear whitespace before the semicolon.
        assert!(c.is_content_type_supported("application/soap+xml; charset=utf-8 ; a=b"));
    }

    #[test]
    fn unsupported_and_malformed_content_types() {
        let c = codec();
        assert!(!c.is_content_type_supported("text/plain"));
        assert!(!c.is_content_type_supported("application/json"));
        // Unknown charset on a matching media type.
        assert!(!c.is_content_type_supported("application/soap+xml; charset=ebcdic"));
        // Malformed: no throw, just unsupported.
        assert!(!c.is_content_type_supported("not a content type"));
        assert!(!c.is_content_type_supported(""));
    }

    #[test]
    fn soap11_rejects_soap12_media() {
        let c = MessageCodec::new(
            MessageVersion::Soap11,
            TextEncoding::Utf8,
            ReaderQuotas::default(),
            DecodeLimits::default(),
        );
        assert!(c.is_content_type_supported("text/xml; charset=utf-8"));
        assert!(!c.is_content_type_supported("application/soap+xml; charset=utf-8"));
    }

    #[test]
    fn encoding_fast_path_first_parameter() {
        let c = codec();
        assert_eq!(
            c.encoding_from_content_type("application/soap+xml; charset=utf-8")
                .unwrap(),
            Some(TextEncoding::Utf8)
        );
        assert_eq!(
            c.encoding_from_content_type("application/soap+xml; charset=\"utf-16BE\"")
                .unwrap(),
            Some(TextEncoding::Utf16Be)
        );
    }

    #[test]
    fn encoding_scan_later_parameter() {
        let c = codec();
        assert_eq!(
            c.encoding_from_content_type("application/soap+xml; action=\"urn:a\"; charset=utf-16LE")
                .unwrap(),
            Some(TextEncoding::Utf16Le)
        );
    }

    #[test]
    fn encoding_without_charset_is_autodetect() {
        let c = codec();
        assert_eq!(
            c.encoding_from_content_type("application/soap+xml").unwrap(),
            None
        );
        assert_eq!(
            c.encoding_from_content_type("application/soap+xml; action=\"urn:a\"")
                .unwrap(),
            None
        );
        // "utf-16" is recognized but ambiguous.
        assert_eq!(
            c.encoding_from_content_type("application/soap+xml; charset=utf-16")
                .unwrap(),
            None
        );
    }

    #[test]
    fn unrecognized_charset_is_a_protocol_error() {
        let c = codec();
        let err = c
            .encoding_from_content_type("application/soap+xml; charset=koi8-r")
            .unwrap_err();
        assert!(err.to_string().contains("koi8-r"));
    }

    #[test]
    fn reader_dispatch_text() {
        let c = codec();
        let body = b"<Envelope><Body>hi</Body></Envelope>".to_vec();
        let reader = c
            .reader_for(
                std::io::Cursor::new(body),
                "application/soap+xml; charset=utf-8",
            )
            .unwrap();
        match reader {
            MessageReader::Text(mut cursor) => {
                assert!(cursor.advance().unwrap());
                assert_eq!(cursor.local_name(), "Envelope");
            }
            MessageReader::Mtom(_) => panic!("expected a text reader"),
        }
    }

    #[test]
    fn reader_dispatch_unsupported() {
        let c = codec();
        let err = c
            .reader_for(std::io::Cursor::new(Vec::new()), "application/json")
            .unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn sniff_utf16_bom() {
        let mut body = vec![0xFF, 0xFE];
        for unit in "<a>x</a>".encode_utf16() {
            body.extend_from_slice(&unit.to_le_bytes());
        }
        let c = codec();
        let reader = c
            .reader_for(std::io::Cursor::new(body), "application/soap+xml")
            .unwrap();
        match reader {
            MessageReader::Text(mut cursor) => {
                assert!(cursor.advance().unwrap());
                assert_eq!(cursor.local_name(), "a");
            }
            MessageReader::Mtom(_) => panic!("expected a text reader"),
        }
    }
}

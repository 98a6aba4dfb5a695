/*
 * writer.rs
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

//! Multipart writer: serializes an XML document plus externalized binary
//! parts into a MIME multipart/related body. XML serialization uses the
//! quick_xml writer over a BytesMut buffer.

use std::io::Write;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::buf::Writer as BytesWriter;
use bytes::{BufMut, BytesMut};
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::writer::Writer;
use tracing::debug;

use crate::encoding::TextEncoding;
use crate::error::MtomError;
use crate::mime::{quote_parameter_value, reference_for_content_id};
use crate::xop::{XOP_NAMESPACE, XOP_TYPE};

/// Encode-side options.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Encoding for the root XML part. Non-UTF-8 encodings force an XML
    /// declaration; UTF-8 omits it.
    pub encoding: TextEncoding,
    /// Inner message content-type, declared as the message `start-info` and
    /// the root part `type` parameter.
    pub start_info: Option<String>,
    /// Binary payloads strictly smaller than this stay inline as base64
    /// text; everything else becomes a MIME part referenced via xop:Include.
    pub inline_threshold: usize,
    /// Hard cap on the encoded message size; exceeding it is a quota error.
    pub max_message_size: Option<usize>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            encoding: TextEncoding::Utf8,
            start_info: None,
            inline_threshold: 0,
            max_message_size: None,
        }
    }
}

struct Attachment {
    content_id: String,
    bytes: Vec<u8>,
}

/// Writer for one MTOM message. XML events accumulate into the root part;
/// `write_base64` externalizes binary payloads as MIME parts; `finish`
/// emits the whole multipart body to the sink.
pub struct MtomWriter<W: Write> {
    sink: W,
    options: WriterOptions,
    boundary: String,
    start_content_id: String,
    xml: Writer<BytesWriter<BytesMut>>,
    pending: Option<BytesStart<'static>>,
    open_elements: Vec<String>,
    attachments: Vec<Attachment>,
    session: u64,
    next_part: usize,
    written: usize,
}

impl MtomWriter<Vec<u8>> {
    /// Writer producing a single in-memory buffer with an explicit maximum
    /// size; exceeding it fails the encode.
    pub fn to_buffer(max_size: usize, mut options: WriterOptions) -> Result<Self, MtomError> {
        options.max_message_size = Some(max_size);
        Self::new(Vec::new(), options)
    }
}

impl<W: Write> MtomWriter<W> {
    /// Writer streaming the encoded message into `sink` on `finish`.
    pub fn new(sink: W, options: WriterOptions) -> Result<Self, MtomError> {
        let session = rand::random::<u64>();
        let boundary = format!("uuid:{:032x}", rand::random::<u128>());
        let start_content_id = format!("<root.{:016x}@busta.invalid>", session);
        let mut xml = Writer::new(BytesMut::with_capacity(4096).writer());
        if options.encoding != TextEncoding::Utf8 {
            xml.write_event(Event::Decl(BytesDecl::new(
                "1.0",
                Some(options.encoding.charset()),
                None,
            )))
            .map_err(|e| MtomError::format_with_source("error writing XML declaration", e))?;
        }
        Ok(Self {
            sink,
            options,
            boundary,
            start_content_id,
            xml,
            pending: None,
            open_elements: Vec::new(),
            attachments: Vec::new(),
            session,
            next_part: 0,
            written: 0,
        })
    }

    /// Message-level content-type value declaring the package type, the
    /// root part's content-ID, the boundary, and (when set) start-info.
    pub fn message_content_type(&self) -> String {
        let mut out = format!(
            "multipart/related; type={}; start={}; boundary={}",
            quote_parameter_value(XOP_TYPE),
            quote_parameter_value(&self.start_content_id),
            quote_parameter_value(&self.boundary)
        );
        if let Some(start_info) = &self.options.start_info {
            out.push_str("; start-info=");
            out.push_str(&quote_parameter_value(start_info));
        }
        out
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Open an element. `name` is the qualified name as serialized; declare
    /// prefixes with `write_namespace_declaration`.
    pub fn write_start_element(&mut self, name: &str) -> Result<(), MtomError> {
        if name.is_empty() {
            return Err(MtomError::usage("element name must not be empty"));
        }
        self.flush_pending(false)?;
        self.pending = Some(BytesStart::new(name.to_string()));
        self.open_elements.push(name.to_string());
        Ok(())
    }

    /// Attribute on the element just opened.
    pub fn write_attribute(&mut self, name: &str, value: &str) -> Result<(), MtomError> {
        match self.pending.as_mut() {
            Some(start) => {
                start.push_attribute((name, value));
                Ok(())
            }
            None => Err(MtomError::usage(
                "attributes must be written directly after a start element",
            )),
        }
    }

    /// Namespace declaration on the element just opened. None binds the
    /// default namespace.
    pub fn write_namespace_declaration(
        &mut self,
        prefix: Option<&str>,
        uri: &str,
    ) -> Result<(), MtomError> {
        let name = match prefix {
            Some(p) => format!("xmlns:{}", p),
            None => "xmlns".to_string(),
        };
        self.write_attribute(&name, uri)
    }

    pub fn write_text(&mut self, text: &str) -> Result<(), MtomError> {
        self.flush_pending(false)?;
        self.xml
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(|e| MtomError::format_with_source("error writing XML text", e))
    }

    pub fn write_cdata(&mut self, text: &str) -> Result<(), MtomError> {
        self.flush_pending(false)?;
        self.xml
            .write_event(Event::CData(BytesCData::new(text)))
            .map_err(|e| MtomError::format_with_source("error writing CDATA", e))
    }

    /// Binary content. Payloads at or above the inline threshold become a
    /// separate MIME part with a synthesized content-ID, referenced in place
    /// by an xop:Include element; smaller payloads are inlined as base64.
    pub fn write_base64(&mut self, data: &[u8]) -> Result<(), MtomError> {
        self.flush_pending(false)?;
        if data.len() < self.options.inline_threshold {
            let encoded = BASE64.encode(data);
            return self
                .xml
                .write_event(Event::Text(BytesText::new(&encoded)))
                .map_err(|e| MtomError::format_with_source("error writing base64 text", e));
        }
        let content_id = format!(
            "<part{}.{:016x}@busta.invalid>",
            self.next_part, self.session
        );
        self.next_part += 1;
        let href = reference_for_content_id(&content_id);
        let mut include = BytesStart::new("xop:Include");
        include.push_attribute(("xmlns:xop", XOP_NAMESPACE));
        include.push_attribute(("href", href.as_str()));
        self.xml
            .write_event(Event::Empty(include))
            .map_err(|e| MtomError::format_with_source("error writing xop:Include", e))?;
        self.attachments.push(Attachment {
            content_id,
            bytes: data.to_vec(),
        });
        Ok(())
    }

    /// Close the innermost open element.
    pub fn write_end_element(&mut self) -> Result<(), MtomError> {
        let name = self
            .open_elements
            .pop()
            .ok_or_else(|| MtomError::usage("no open element to close"))?;
        if let Some(start) = self.pending.take() {
            return self
                .xml
                .write_event(Event::Empty(start))
                .map_err(|e| MtomError::format_with_source("error writing XML element", e));
        }
        self.xml
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(|e| MtomError::format_with_source("error writing XML element", e))
    }

    /// Emit the complete MIME body: root part headers and XML, one part per
    /// attachment, then the terminating boundary. Returns the sink.
    pub fn finish(mut self) -> Result<W, MtomError> {
        if !self.open_elements.is_empty() {
            return Err(MtomError::usage(format!(
                "{} XML element(s) left open",
                self.open_elements.len()
            )));
        }
        let xml_utf8 = self.xml.into_inner().into_inner();
        let xml_text = std::str::from_utf8(&xml_utf8)
            .map_err(|e| MtomError::format_with_source("root XML is not valid UTF-8", e))?;
        let xml_bytes = self.options.encoding.encode(xml_text);

        let mut head = String::new();
        head.push_str(&format!("--{}\r\n", self.boundary));
        head.push_str(&format!("Content-ID: {}\r\n", self.start_content_id));
        head.push_str("Content-Transfer-Encoding: 8bit\r\n");
        head.push_str(&format!(
            "Content-Type: {}; charset={}",
            XOP_TYPE,
            self.options.encoding.charset()
        ));
        if let Some(start_info) = &self.options.start_info {
            head.push_str(&format!("; type={}", quote_parameter_value(start_info)));
        }
        head.push_str("\r\n\r\n");

        sink_write(
            &mut self.sink,
            &mut self.written,
            self.options.max_message_size,
            head.as_bytes(),
        )?;
        sink_write(
            &mut self.sink,
            &mut self.written,
            self.options.max_message_size,
            &xml_bytes,
        )?;

        for attachment in &self.attachments {
            let part_head = format!(
                "\r\n--{}\r\nContent-ID: {}\r\nContent-Transfer-Encoding: binary\r\nContent-Type: application/octet-stream\r\n\r\n",
                self.boundary, attachment.content_id
            );
            sink_write(
                &mut self.sink,
                &mut self.written,
                self.options.max_message_size,
                part_head.as_bytes(),
            )?;
            sink_write(
                &mut self.sink,
                &mut self.written,
                self.options.max_message_size,
                &attachment.bytes,
            )?;
        }
        let tail = format!("\r\n--{}--\r\n", self.boundary);
        sink_write(
            &mut self.sink,
            &mut self.written,
            self.options.max_message_size,
            tail.as_bytes(),
        )?;
        self.sink
            .flush()
            .map_err(|e| MtomError::format_with_source("error flushing MIME message", e))?;
        debug!(
            bytes = self.written,
            parts = self.attachments.len() + 1,
            "encoded MTOM message"
        );
        Ok(self.sink)
    }

    fn flush_pending(&mut self, self_closing: bool) -> Result<(), MtomError> {
        if let Some(start) = self.pending.take() {
            let event = if self_closing {
                Event::Empty(start)
            } else {
                Event::Start(start)
            };
            self.xml
                .write_event(event)
                .map_err(|e| MtomError::format_with_source("error writing XML element", e))?;
        }
        Ok(())
    }
}

fn sink_write<W: Write>(
    sink: &mut W,
    written: &mut usize,
    max: Option<usize>,
    bytes: &[u8],
) -> Result<(), MtomError> {
    if let Some(max) = max {
        if *written + bytes.len() > max {
            return Err(MtomError::quota("maximum encoded message size exceeded", max));
        }
    }
    sink.write_all(bytes)
        .map_err(|e| MtomError::format_with_source("error writing MIME message", e))?;
    *written += bytes.len();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_message(options: WriterOptions, payload: &[u8]) -> (String, Vec<u8>) {
        let mut w = MtomWriter::to_buffer(1 << 20, options).unwrap();
        let content_type = w.message_content_type();
        w.write_start_element("doc").unwrap();
        w.write_start_element("bin").unwrap();
        w.write_base64(payload).unwrap();
        w.write_end_element().unwrap();
        w.write_end_element().unwrap();
        (content_type, w.finish().unwrap())
    }

    #[test]
    fn message_content_type_declares_required_parameters() {
        let w = MtomWriter::to_buffer(
            4096,
            WriterOptions {
                start_info: Some("text/xml; charset=utf-8".to_string()),
                ..WriterOptions::default()
            },
        )
        .unwrap();
        let ct = w.message_content_type();
        assert!(ct.starts_with("multipart/related; type=\"application/xop+xml\""));
        assert!(ct.contains("start=\"<root."));
        assert!(ct.contains(&format!("boundary=\"{}\"", w.boundary())));
        assert!(ct.contains("start-info=\"text/xml; charset=utf-8\""));
    }

    #[test]
    fn body_contains_root_and_attachment_parts() {
        let payload = b"0123456789";
        let (_, body) = simple_message(WriterOptions::default(), payload);
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("Content-Type: application/xop+xml; charset=utf-8"));
        assert!(text.contains("Content-Transfer-Encoding: binary"));
        assert!(text.contains("<xop:Include"));
        assert!(text.contains("href=\"cid:"));
        assert!(text.contains("0123456789"));
        assert!(text.trim_end().ends_with("--"));
        // UTF-8 root omits the XML declaration.
        assert!(!text.contains("<?xml"));
    }

    #[test]
    fn non_utf8_encoding_forces_xml_declaration() {
        let mut w = MtomWriter::to_buffer(
            1 << 16,
            WriterOptions {
                encoding: TextEncoding::Utf16Le,
                ..WriterOptions::default()
            },
        )
        .unwrap();
        w.write_start_element("a").unwrap();
        w.write_text("x").unwrap();
        w.write_end_element().unwrap();
        let body = w.finish().unwrap();
        // The declaration is encoded in UTF-16LE inside the root part.
        let needle: Vec<u8> = "<?xml"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        assert!(body
            .windows(needle.len())
            .any(|window| window == needle.as_slice()));
    }

    #[test]
    fn inline_threshold_keeps_small_payloads_in_the_infoset() {
        let (_, body) = simple_message(
            WriterOptions {
                inline_threshold: 64,
                ..WriterOptions::default()
            },
            b"tiny",
        );
        let text = String::from_utf8_lossy(&body);
        assert!(!text.contains("<xop:Include"));
        assert!(text.contains(&BASE64.encode(b"tiny")));
    }

    #[test]
    fn bounded_buffer_overflow_is_a_quota_error() {
        let mut w = MtomWriter::to_buffer(128, WriterOptions::default()).unwrap();
        w.write_start_element("doc").unwrap();
        w.write_base64(&vec![0u8; 4096]).unwrap();
        w.write_end_element().unwrap();
        let err = w.finish().unwrap_err();
        assert!(err.is_quota());
    }

    #[test]
    fn unclosed_element_is_a_usage_error() {
        let mut w = MtomWriter::to_buffer(4096, WriterOptions::default()).unwrap();
        w.write_start_element("doc").unwrap();
        let err = w.finish().unwrap_err();
        assert!(matches!(err, MtomError::Usage(_)));
    }

    #[test]
    fn attribute_without_open_element_is_a_usage_error() {
        let mut w = MtomWriter::to_buffer(4096, WriterOptions::default()).unwrap();
        let err = w.write_attribute("a", "b").unwrap_err();
        assert!(matches!(err, MtomError::Usage(_)));
    }

    #[test]
    fn empty_elements_are_self_closing() {
        let mut w = MtomWriter::to_buffer(4096, WriterOptions::default()).unwrap();
        w.write_start_element("doc").unwrap();
        w.write_start_element("leaf").unwrap();
        w.write_attribute("k", "v").unwrap();
        w.write_end_element().unwrap();
        w.write_end_element().unwrap();
        let body = w.finish().unwrap();
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("<leaf k=\"v\"/>"));
        assert!(text.contains("</doc>"));
    }
}

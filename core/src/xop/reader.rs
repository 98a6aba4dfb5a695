/*
 * reader.rs
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

//! Unified pull reader over an MTOM message: a textual XML cursor for the
//! root part plus transparent substitution of xop:Include elements with the
//! referenced binary part's content, presented as one synthetic text node.
//! All XML tokenizing uses the quick_xml namespace-aware reader.

use std::collections::HashSet;
use std::io::{Cursor, Read};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use tracing::{debug, trace};

use crate::encoding::{resolve_root_charset, TextEncoding};
use crate::error::MtomError;
use crate::mime::{
    normalize_reference, normalize_start, ContentTransferEncoding, ContentTypeHeader, MimeHeaders,
    MimeScanner, MimeVersion,
};
use crate::quota::BufferQuota;
use crate::xop::part::{MimePart, PartRegistry};
use crate::xop::{binhex, SWA_TYPE, XOP_INCLUDE_LOCAL_NAME, XOP_NAMESPACE, XOP_TYPE};

/// Default chunk for binary sub-reads; capped by `max_bytes_per_read`.
const DEFAULT_BINARY_CHUNK: usize = 4096;

/// Default cap on bytes buffered during one decode.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 65536;

/// Default cap on the number of MIME parts in one message.
pub const DEFAULT_MAX_MIME_PARTS: usize = 1000;

/// Quotas delegated to the XML layer.
#[derive(Debug, Clone)]
pub struct ReaderQuotas {
    pub max_depth: usize,
    pub max_string_content_length: usize,
    pub max_array_length: usize,
    pub max_bytes_per_read: usize,
    pub max_name_table_char_count: usize,
}

impl Default for ReaderQuotas {
    fn default() -> Self {
        Self {
            max_depth: 32,
            max_string_content_length: 8192,
            max_array_length: 16384,
            max_bytes_per_read: 4096,
            max_name_table_char_count: 16384,
        }
    }
}

/// Per-decode resource ceilings.
#[derive(Debug, Clone)]
pub struct DecodeLimits {
    pub max_buffer_size: usize,
    pub max_mime_parts: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            max_mime_parts: DEFAULT_MAX_MIME_PARTS,
        }
    }
}

/// Kind of the node a cursor is positioned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XmlNodeKind {
    #[default]
    None,
    StartElement,
    EndElement,
    Text,
    CData,
    Comment,
    ProcessingInstruction,
    XmlDeclaration,
    EndOfFile,
}

/// An attribute captured off the current element, namespaces resolved.
#[derive(Debug, Clone)]
pub struct OwnedAttribute {
    pub prefix: String,
    pub local_name: String,
    pub namespace_uri: String,
    pub value: String,
}

#[derive(Debug, Clone, Default)]
struct CurrentNode {
    kind: XmlNodeKind,
    local_name: String,
    namespace_uri: String,
    prefix: String,
    value: String,
    attributes: Vec<OwnedAttribute>,
    is_empty: bool,
    depth: usize,
}

/// Pull cursor over the textual XML infoset. Usable on its own for plain
/// (non-multipart) messages; the MTOM façade drives one for the root part.
pub struct XmlTextCursor {
    reader: NsReader<Cursor<Vec<u8>>>,
    buf: Vec<u8>,
    node: CurrentNode,
    depth: usize,
    quotas: ReaderQuotas,
    name_table: HashSet<String>,
    name_table_chars: usize,
    eof: bool,
}

impl XmlTextCursor {
    /// Cursor over already-decoded XML text.
    pub fn new(xml: String, quotas: ReaderQuotas) -> Self {
        Self {
            reader: NsReader::from_reader(Cursor::new(xml.into_bytes())),
            buf: Vec::new(),
            node: CurrentNode::default(),
            depth: 0,
            quotas,
            name_table: HashSet::new(),
            name_table_chars: 0,
            eof: false,
        }
    }

    /// Cursor over raw bytes in a known encoding.
    pub fn from_bytes(
        bytes: &[u8],
        encoding: TextEncoding,
        quotas: ReaderQuotas,
    ) -> Result<Self, MtomError> {
        Ok(Self::new(encoding.decode(bytes)?, quotas))
    }

    /// Advance to the next node. False at end of document.
    pub fn advance(&mut self) -> Result<bool, MtomError> {
        if self.eof {
            return Ok(false);
        }
        self.buf.clear();
        let event = match self.reader.read_event_into(&mut self.buf) {
            Ok(event) => event,
            Err(e) => {
                return Err(MtomError::format_with_source(
                    "invalid XML in message infoset",
                    e,
                ))
            }
        };
        match event {
            Event::Start(e) => {
                let node = Self::capture_element(
                    &self.reader,
                    &self.quotas,
                    &mut self.name_table,
                    &mut self.name_table_chars,
                    &e,
                    self.depth,
                    false,
                )?;
                self.node = node;
                self.depth += 1;
            }
            Event::Empty(e) => {
                let node = Self::capture_element(
                    &self.reader,
                    &self.quotas,
                    &mut self.name_table,
                    &mut self.name_table_chars,
                    &e,
                    self.depth,
                    true,
                )?;
                self.node = node;
            }
            Event::End(e) => {
                self.depth = self.depth.saturating_sub(1);
                let (resolved, local) = self.reader.resolve_element(e.name());
                let namespace_uri = Self::namespace_string(resolved)?;
                let prefix = e
                    .name()
                    .prefix()
                    .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned())
                    .unwrap_or_default();
                self.node = CurrentNode {
                    kind: XmlNodeKind::EndElement,
                    local_name: String::from_utf8_lossy(local.as_ref()).into_owned(),
                    namespace_uri,
                    prefix,
                    depth: self.depth,
                    ..CurrentNode::default()
                };
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| MtomError::format_with_source("invalid XML text content", e))?
                    .into_owned();
                self.set_text_node(XmlNodeKind::Text, text)?;
            }
            Event::CData(t) => {
                let text = std::str::from_utf8(&t)
                    .map_err(|e| MtomError::format_with_source("invalid CDATA content", e))?
                    .to_string();
                self.set_text_node(XmlNodeKind::CData, text)?;
            }
            Event::Comment(t) => {
                self.node = CurrentNode {
                    kind: XmlNodeKind::Comment,
                    value: String::from_utf8_lossy(&t).into_owned(),
                    depth: self.depth,
                    ..CurrentNode::default()
                };
            }
            Event::PI(t) => {
                self.node = CurrentNode {
                    kind: XmlNodeKind::ProcessingInstruction,
                    value: String::from_utf8_lossy(&t).into_owned(),
                    depth: self.depth,
                    ..CurrentNode::default()
                };
            }
            Event::Decl(_) => {
                self.node = CurrentNode {
                    kind: XmlNodeKind::XmlDeclaration,
                    depth: self.depth,
                    ..CurrentNode::default()
                };
            }
            Event::DocType(_) => {
                return Err(MtomError::format("DTD content is not supported"));
            }
            Event::Eof => {
                self.eof = true;
                self.node = CurrentNode {
                    kind: XmlNodeKind::EndOfFile,
                    ..CurrentNode::default()
                };
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn set_text_node(&mut self, kind: XmlNodeKind, text: String) -> Result<(), MtomError> {
        if text.len() > self.quotas.max_string_content_length {
            return Err(MtomError::quota(
                "maximum XML string content length exceeded",
                self.quotas.max_string_content_length,
            ));
        }
        self.node = CurrentNode {
            kind,
            value: text,
            depth: self.depth,
            ..CurrentNode::default()
        };
        Ok(())
    }

    fn capture_element(
        reader: &NsReader<Cursor<Vec<u8>>>,
        quotas: &ReaderQuotas,
        name_table: &mut HashSet<String>,
        name_table_chars: &mut usize,
        e: &BytesStart<'_>,
        depth: usize,
        is_empty: bool,
    ) -> Result<CurrentNode, MtomError> {
        if depth >= quotas.max_depth {
            return Err(MtomError::quota(
                "maximum XML depth exceeded",
                quotas.max_depth,
            ));
        }
        let (resolved, local) = reader.resolve_element(e.name());
        let namespace_uri = Self::namespace_string(resolved)?;
        let prefix = e
            .name()
            .prefix()
            .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned())
            .unwrap_or_default();
        let local_name = String::from_utf8_lossy(local.as_ref()).into_owned();
        Self::intern_name(
            name_table,
            name_table_chars,
            quotas,
            &prefix,
            &local_name,
        )?;

        let mut attributes = Vec::new();
        for attr in e.attributes() {
            let attr =
                attr.map_err(|e| MtomError::format_with_source("invalid XML attribute", e))?;
            let is_xmlns = match attr.key.prefix() {
                Some(p) => p.as_ref() == b"xmlns",
                None => attr.key.local_name().as_ref() == b"xmlns",
            };
            if is_xmlns {
                // Namespace declarations are tracked by the reader itself.
                continue;
            }
            let value = attr
                .unescape_value()
                .map_err(|e| MtomError::format_with_source("invalid XML attribute value", e))?
                .into_owned();
            let (resolved, local) = reader.resolve_attribute(attr.key);
            let namespace_uri = Self::namespace_string(resolved)?;
            let prefix = attr
                .key
                .prefix()
                .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned())
                .unwrap_or_default();
            let local_name = String::from_utf8_lossy(local.as_ref()).into_owned();
            Self::intern_name(
                name_table,
                name_table_chars,
                quotas,
                &prefix,
                &local_name,
            )?;
            attributes.push(OwnedAttribute {
                prefix,
                local_name,
                namespace_uri,
                value,
            });
        }
        Ok(CurrentNode {
            kind: XmlNodeKind::StartElement,
            local_name,
            namespace_uri,
            prefix,
            value: String::new(),
            attributes,
            is_empty,
            depth,
        })
    }

    fn intern_name(
        name_table: &mut HashSet<String>,
        name_table_chars: &mut usize,
        quotas: &ReaderQuotas,
        prefix: &str,
        local_name: &str,
    ) -> Result<(), MtomError> {
        let qualified = if prefix.is_empty() {
            local_name.to_string()
        } else {
            format!("{}:{}", prefix, local_name)
        };
        if name_table.insert(qualified.clone()) {
            *name_table_chars += qualified.len();
            if *name_table_chars > quotas.max_name_table_char_count {
                return Err(MtomError::quota(
                    "maximum XML name table size exceeded",
                    quotas.max_name_table_char_count,
                ));
            }
        }
        Ok(())
    }

    fn namespace_string(resolved: ResolveResult<'_>) -> Result<String, MtomError> {
        match resolved {
            ResolveResult::Bound(ns) => Ok(String::from_utf8_lossy(ns.0).into_owned()),
            ResolveResult::Unbound => Ok(String::new()),
            ResolveResult::Unknown(prefix) => Err(MtomError::format(format!(
                "undeclared namespace prefix '{}'",
                String::from_utf8_lossy(&prefix)
            ))),
        }
    }

    pub fn node_kind(&self) -> XmlNodeKind {
        self.node.kind
    }

    pub fn local_name(&self) -> &str {
        &self.node.local_name
    }

    pub fn namespace_uri(&self) -> &str {
        &self.node.namespace_uri
    }

    pub fn prefix(&self) -> &str {
        &self.node.prefix
    }

    /// Text of the current node (text, CDATA, comment, PI); empty otherwise.
    pub fn value(&self) -> &str {
        &self.node.value
    }

    /// Nesting depth of the current node; the document element is 0.
    pub fn depth(&self) -> usize {
        self.node.depth
    }

    /// True for a self-closing element; no end-element node follows it.
    pub fn is_empty_element(&self) -> bool {
        self.node.is_empty
    }

    pub fn attributes(&self) -> &[OwnedAttribute] {
        &self.node.attributes
    }

    pub fn attribute_count(&self) -> usize {
        self.node.attributes.len()
    }

    /// Attribute value by local name, any namespace.
    pub fn attribute(&self, local_name: &str) -> Option<&str> {
        self.node
            .attributes
            .iter()
            .find(|a| a.local_name == local_name)
            .map(|a| a.value.as_str())
    }

    /// Attribute value by local name and namespace URI.
    pub fn attribute_ns(&self, local_name: &str, namespace_uri: &str) -> Option<&str> {
        self.node
            .attributes
            .iter()
            .find(|a| a.local_name == local_name && a.namespace_uri == namespace_uri)
            .map(|a| a.value.as_str())
    }
}

/// State of the binary sub-reader substituted for an xop:Include element.
#[derive(Debug)]
struct XopBinaryReader {
    part_index: usize,
    chunk_size: usize,
    bytes_remaining: usize,
    string_value: Option<String>,
    string_offset: usize,
    /// Raw bytes pulled for the current chunk, partially consumed by raw reads.
    carry: Vec<u8>,
    carry_pos: usize,
    binhex: Vec<u8>,
    binhex_pos: usize,
    finished_stream: bool,
    node_depth: usize,
}

impl XopBinaryReader {
    fn new(part_index: usize, chunk_size: usize, node_depth: usize) -> Self {
        Self {
            part_index,
            chunk_size,
            bytes_remaining: chunk_size,
            string_value: None,
            string_offset: 0,
            carry: Vec::new(),
            carry_pos: 0,
            binhex: Vec::new(),
            binhex_pos: 0,
            finished_stream: false,
            node_depth,
        }
    }

    fn reset_chunk(&mut self) {
        self.string_value = None;
        self.string_offset = 0;
        self.carry.clear();
        self.carry_pos = 0;
        self.binhex.clear();
        self.binhex_pos = 0;
        self.bytes_remaining = self.chunk_size;
    }

    /// No consumption since the last advance: the caller is skipping the node.
    fn untouched(&self) -> bool {
        self.bytes_remaining == self.chunk_size && self.string_value.is_none()
    }
}

#[derive(Clone, Copy)]
enum InlineCodec {
    Base64,
    BinHex,
}

/// Unified pull reader over an MTOM (or SOAP-with-attachments) message.
///
/// Composes the multipart scanner, the part registry, and the textual XML
/// cursor; xop:Include elements are replaced transparently with the
/// referenced part's bytes. Single-threaded and synchronous; one instance
/// owns its quota and registry for the whole decode.
pub struct MtomReader<R: Read> {
    scanner: MimeScanner<R>,
    cursor: XmlTextCursor,
    registry: PartRegistry,
    quota: BufferQuota,
    quotas: ReaderQuotas,
    binary: Option<XopBinaryReader>,
    /// Part whose content still lives in the scanner's current region.
    streaming_part: Option<usize>,
    reading_binary_element: bool,
    inline_decoded: Option<(Vec<u8>, usize)>,
    value_chunk_offset: usize,
    start_info: Option<String>,
    done: bool,
}

impl<R: Read> std::fmt::Debug for MtomReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MtomReader")
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl MtomReader<Cursor<Vec<u8>>> {
    /// Decode from an in-memory buffer.
    pub fn from_bytes(
        bytes: impl Into<Vec<u8>>,
        content_type: Option<&str>,
        encodings: &[TextEncoding],
        quotas: ReaderQuotas,
        limits: DecodeLimits,
    ) -> Result<Self, MtomError> {
        Self::from_stream(
            Cursor::new(bytes.into()),
            content_type,
            encodings,
            quotas,
            limits,
        )
    }
}

impl<R: Read> MtomReader<R> {
    /// Decode from a byte stream. `content_type` is the transport-supplied
    /// message content-type; when absent the message's own header block is
    /// read off the front of the stream. `encodings` are the candidate text
    /// encodings the root part charset must match.
    pub fn from_stream(
        stream: R,
        content_type: Option<&str>,
        encodings: &[TextEncoding],
        quotas: ReaderQuotas,
        limits: DecodeLimits,
    ) -> Result<Self, MtomError> {
        if encodings.is_empty() {
            return Err(MtomError::usage("no candidate text encodings supplied"));
        }
        if let Some(ct) = content_type {
            if ct.is_empty() {
                return Err(MtomError::usage("content type must not be empty"));
            }
        }
        let mut quota = BufferQuota::new(limits.max_buffer_size);
        let mut scanner = MimeScanner::new(stream);

        let message_content_type = match content_type {
            None => {
                let message_headers = scanner.read_message_headers(&mut quota)?;
                check_message_mime_version(&message_headers)?;
                message_headers
                    .content_type()
                    .cloned()
                    .ok_or_else(|| MtomError::protocol("message content-type header not found"))?
            }
            Some(ct) => ContentTypeHeader::parse(ct)?,
        };
        let (boundary, start, start_info) =
            validate_message_content_type(&message_content_type)?;
        scanner.set_boundary(&boundary)?;

        let mut registry = PartRegistry::new(limits.max_mime_parts);
        let mut streaming_part = None;

        // Locate and buffer the root part.
        let (root_headers, root_bytes) = match start {
            Some(start) => {
                let start_cid = normalize_start(&start)?;
                let index = scan_for_part(
                    &mut scanner,
                    &mut registry,
                    &mut quota,
                    &mut streaming_part,
                    &start_cid,
                    &start,
                )?;
                {
                    let mut content = scanner.content_stream();
                    registry.part_mut(index).buffer_from(&mut content, &mut quota)?;
                }
                streaming_part = None;
                let bytes = registry
                    .part_mut(index)
                    .take_buffer()
                    .unwrap_or_default();
                (registry.part(index).headers().clone(), bytes)
            }
            None => {
                if !scanner.read_next_part()? {
                    return Err(MtomError::protocol("root MIME part was not found"));
                }
                let headers = scanner.read_headers(&mut quota)?;
                let mut part = MimePart::new(headers);
                {
                    let mut content = scanner.content_stream();
                    part.buffer_from(&mut content, &mut quota)?;
                }
                let bytes = part.take_buffer().unwrap_or_default();
                (part.headers().clone(), bytes)
            }
        };

        let encoding =
            validate_root_content_type(&root_headers, encodings, start_info.as_deref())?;
        check_root_transfer_encoding(&root_headers)?;

        debug!(
            bytes = root_bytes.len(),
            charset = encoding.charset(),
            "decoded MTOM root part"
        );
        let text = encoding.decode(&root_bytes)?;
        let cursor = XmlTextCursor::new(text, quotas.clone());

        Ok(Self {
            scanner,
            cursor,
            registry,
            quota,
            quotas,
            binary: None,
            streaming_part,
            reading_binary_element: false,
            inline_decoded: None,
            value_chunk_offset: 0,
            start_info,
            done: false,
        })
    }

    /// The message's start-info parameter, when one was declared.
    pub fn start_info(&self) -> Option<&str> {
        self.start_info.as_deref()
    }

    /// Bytes still available in the decode buffer quota.
    pub fn buffer_remaining(&self) -> usize {
        self.quota.remaining()
    }

    /// Advance to the next node. False at end of document.
    pub fn advance(&mut self) -> Result<bool, MtomError> {
        self.inline_decoded = None;
        self.value_chunk_offset = 0;
        if self.done {
            return Ok(false);
        }
        if let Some(b) = self.binary.as_mut() {
            if !(b.finished_stream || b.untouched()) {
                b.reset_chunk();
                return Ok(true);
            }
            let index = b.part_index;
            self.binary = None;
            if self.streaming_part == Some(index) {
                self.streaming_part = None;
            }
            self.registry.part_mut(index).release(&mut self.quota);
            trace!(part = index, "finished streaming referenced part");
            if self.cursor.node_kind() == XmlNodeKind::EndOfFile {
                self.done = true;
                return Ok(false);
            }
            self.process_current()?;
            return Ok(true);
        }
        if !self.cursor.advance()? {
            self.done = true;
            return Ok(false);
        }
        self.process_current()?;
        Ok(true)
    }

    pub fn node_kind(&self) -> XmlNodeKind {
        if self.done {
            return XmlNodeKind::EndOfFile;
        }
        if self.binary.is_some() {
            return XmlNodeKind::Text;
        }
        self.cursor.node_kind()
    }

    pub fn local_name(&self) -> &str {
        if self.binary.is_some() {
            return "";
        }
        self.cursor.local_name()
    }

    pub fn namespace_uri(&self) -> &str {
        if self.binary.is_some() {
            return "";
        }
        self.cursor.namespace_uri()
    }

    pub fn prefix(&self) -> &str {
        if self.binary.is_some() {
            return "";
        }
        self.cursor.prefix()
    }

    pub fn depth(&self) -> usize {
        match &self.binary {
            Some(b) => b.node_depth,
            None => self.cursor.depth(),
        }
    }

    pub fn is_empty_element(&self) -> bool {
        self.binary.is_none() && self.cursor.is_empty_element()
    }

    pub fn attributes(&self) -> &[OwnedAttribute] {
        if self.binary.is_some() {
            return &[];
        }
        self.cursor.attributes()
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes().len()
    }

    pub fn attribute(&self, local_name: &str) -> Option<&str> {
        if self.binary.is_some() {
            return None;
        }
        self.cursor.attribute(local_name)
    }

    pub fn attribute_ns(&self, local_name: &str, namespace_uri: &str) -> Option<&str> {
        if self.binary.is_some() {
            return None;
        }
        self.cursor.attribute_ns(local_name, namespace_uri)
    }

    /// Text of the current node. For the synthetic binary node this is the
    /// next base64 chunk: a multiple of 3 source bytes except at end of
    /// stream, so no chunk boundary splits an encoded group.
    pub fn value(&mut self) -> Result<&str, MtomError> {
        if self.binary.is_some() {
            self.ensure_binary_value()?;
            return Ok(self
                .binary
                .as_ref()
                .and_then(|b| b.string_value.as_deref())
                .unwrap_or(""));
        }
        match self.cursor.node_kind() {
            XmlNodeKind::Text | XmlNodeKind::CData => Ok(self.cursor.value()),
            _ => Ok(""),
        }
    }

    /// Append up to `max_chars` characters of the current node's value to
    /// `out`, resuming where the previous call stopped. 0 when the value is
    /// spent; advancing moves to the next chunk or node.
    pub fn read_value_chunk(
        &mut self,
        out: &mut String,
        max_chars: usize,
    ) -> Result<usize, MtomError> {
        if max_chars == 0 {
            return Ok(0);
        }
        if self.binary.is_some() {
            self.ensure_binary_value()?;
            let b = self.binary.as_mut().ok_or_else(|| {
                MtomError::usage("reader is not positioned on binary content")
            })?;
            let s = b.string_value.as_deref().unwrap_or("");
            // Base64 text is ASCII: a char is a byte.
            let n = max_chars.min(s.len().saturating_sub(b.string_offset));
            out.push_str(&s[b.string_offset..b.string_offset + n]);
            b.string_offset += n;
            return Ok(n);
        }
        let value = match self.cursor.node_kind() {
            XmlNodeKind::Text | XmlNodeKind::CData => self.cursor.value(),
            _ => return Ok(0),
        };
        let rest = &value[self.value_chunk_offset..];
        if rest.is_empty() {
            return Ok(0);
        }
        let mut chars = 0;
        let mut end = rest.len();
        for (i, _) in rest.char_indices() {
            if chars == max_chars {
                end = i;
                break;
            }
            chars += 1;
        }
        out.push_str(&rest[..end]);
        self.value_chunk_offset += end;
        Ok(chars)
    }

    /// Read the current content as raw bytes decoded from its base64 text
    /// form. On the synthetic binary node this returns the part's raw bytes
    /// directly; on ordinary text nodes the text is base64-decoded.
    pub fn read_content_as_base64(&mut self, out: &mut [u8]) -> Result<usize, MtomError> {
        if out.is_empty() {
            return Ok(0);
        }
        self.content_read(out, InlineCodec::Base64)
    }

    /// Like `read_content_as_base64`, but bounded by the current chunk: never
    /// pulls more than the chunk budget from the underlying part per node.
    pub fn read_value_as_base64(&mut self, out: &mut [u8]) -> Result<usize, MtomError> {
        if out.is_empty() {
            return Ok(0);
        }
        if self.binary.is_none() {
            return match self.node_kind() {
                XmlNodeKind::Text | XmlNodeKind::CData => {
                    self.infoset_read_binary(out, InlineCodec::Base64)
                }
                _ => Ok(0),
            };
        }
        // Serve bytes already pulled for the current base64 chunk first.
        let (part_index, budget) = match self.binary.as_mut() {
            None => return Ok(0),
            Some(b) => {
                if b.string_value.is_some() && b.carry_pos < b.carry.len() {
                    let n = out.len().min(b.carry.len() - b.carry_pos);
                    out[..n].copy_from_slice(&b.carry[b.carry_pos..b.carry_pos + n]);
                    b.carry_pos += n;
                    return Ok(n);
                }
                (b.part_index, b.bytes_remaining.min(out.len()))
            }
        };
        let mut read = 0;
        while read < budget {
            let n = Self::part_read(
                &mut self.scanner,
                &mut self.registry,
                self.streaming_part,
                part_index,
                &mut out[read..budget],
            )?;
            if n == 0 {
                if let Some(b) = self.binary.as_mut() {
                    b.finished_stream = true;
                }
                break;
            }
            read += n;
        }
        if let Some(b) = self.binary.as_mut() {
            b.bytes_remaining -= read;
        }
        Ok(read)
    }

    /// Read the current content decoded as binhex text. Decoded bytes beyond
    /// the caller's buffer are queued for the next call.
    pub fn read_content_as_binhex(&mut self, out: &mut [u8]) -> Result<usize, MtomError> {
        if out.is_empty() {
            return Ok(0);
        }
        self.content_read(out, InlineCodec::BinHex)
    }

    /// Shared content-read loop: binary-substitution state reads from the
    /// part, text nodes decode and auto-advance until non-content is hit.
    fn content_read(&mut self, out: &mut [u8], codec: InlineCodec) -> Result<usize, MtomError> {
        loop {
            if self.binary.is_some() {
                return match codec {
                    InlineCodec::Base64 => self.binary_read_raw(out),
                    InlineCodec::BinHex => self.binary_read_binhex(out),
                };
            }
            match self.node_kind() {
                XmlNodeKind::Text | XmlNodeKind::CData => {
                    let n = self.infoset_read_binary(out, codec)?;
                    if n > 0 {
                        return Ok(n);
                    }
                    if !self.advance()? {
                        return Ok(0);
                    }
                }
                XmlNodeKind::Comment | XmlNodeKind::ProcessingInstruction => {
                    if !self.advance()? {
                        return Ok(0);
                    }
                }
                _ => return Ok(0),
            }
        }
    }

    /// Binhex over the synthetic binary node: the base64 text form of each
    /// chunk is decoded as hex pairs, leftovers queued for the next call.
    fn binary_read_binhex(&mut self, out: &mut [u8]) -> Result<usize, MtomError> {
        let count = match self.binary.as_ref() {
            None => return Ok(0),
            Some(b) => out.len().min(b.chunk_size),
        };
        let mut read = 0;
        while read < count {
            let need_refill = match self.binary.as_ref() {
                None => break,
                Some(b) => b.binhex_pos >= b.binhex.len(),
            };
            if need_refill {
                let exhausted = self
                    .binary
                    .as_ref()
                    .map(|b| b.finished_stream && b.string_value.is_none())
                    .unwrap_or(true);
                if exhausted {
                    break;
                }
                self.ensure_binary_value()?;
                let text = match self.binary.as_mut() {
                    None => break,
                    Some(b) => {
                        let text = b.string_value.take().unwrap_or_default();
                        b.string_offset = 0;
                        b.carry.clear();
                        b.carry_pos = 0;
                        b.bytes_remaining = b.chunk_size;
                        text
                    }
                };
                if text.is_empty() {
                    break;
                }
                let decoded = binhex::decode(&text).map_err(|e| {
                    MtomError::format_with_source("error decoding binhex content", e)
                })?;
                if let Some(b) = self.binary.as_mut() {
                    b.binhex = decoded;
                    b.binhex_pos = 0;
                }
            }
            let n = match self.binary.as_mut() {
                None => break,
                Some(b) => {
                    let n = (count - read).min(b.binhex.len() - b.binhex_pos);
                    out[read..read + n]
                        .copy_from_slice(&b.binhex[b.binhex_pos..b.binhex_pos + n]);
                    b.binhex_pos += n;
                    n
                }
            };
            read += n;
            if n == 0 {
                break;
            }
        }
        Ok(read)
    }

    /// Accumulate the whole current value as a string, bounded by the
    /// max-string-content quota.
    pub fn read_content_as_string(&mut self) -> Result<String, MtomError> {
        let mut budget = self.quotas.max_string_content_length;
        let mut out = String::new();
        if self.binary.is_some() {
            loop {
                self.ensure_binary_value()?;
                let (chunk_len, finished) = match self.binary.as_mut() {
                    None => break,
                    Some(b) => {
                        let text = b.string_value.take().unwrap_or_default();
                        let finished = b.finished_stream;
                        if text.len() > budget {
                            return Err(MtomError::quota(
                                "maximum XML string content length exceeded",
                                self.quotas.max_string_content_length,
                            ));
                        }
                        budget -= text.len();
                        out.push_str(&text);
                        b.string_offset = 0;
                        b.carry.clear();
                        b.carry_pos = 0;
                        b.bytes_remaining = b.chunk_size;
                        (text.len(), finished)
                    }
                };
                if finished || chunk_len == 0 {
                    break;
                }
            }
            return Ok(out);
        }
        while matches!(
            self.node_kind(),
            XmlNodeKind::Text | XmlNodeKind::CData
        ) {
            let value = self.cursor.value();
            if value.len() > budget {
                return Err(MtomError::quota(
                    "maximum XML string content length exceeded",
                    self.quotas.max_string_content_length,
                ));
            }
            budget -= value.len();
            out.push_str(value);
            if !self.advance()? {
                break;
            }
        }
        Ok(out)
    }

    /// Element-level binary read: enters the element on the first call,
    /// returns content chunks, and consumes the end element when the content
    /// is spent (returning 0).
    pub fn read_element_content_as_base64(&mut self, out: &mut [u8]) -> Result<usize, MtomError> {
        self.read_element_content_binary(out, InlineCodec::Base64)
    }

    /// Element-level binhex read; same entry/exit contract as the base64 form.
    pub fn read_element_content_as_binhex(&mut self, out: &mut [u8]) -> Result<usize, MtomError> {
        self.read_element_content_binary(out, InlineCodec::BinHex)
    }

    /// Whole element content as one byte vector, bounded by the
    /// max-array-length quota.
    pub fn read_element_content_as_bytes(&mut self) -> Result<Vec<u8>, MtomError> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = self.read_element_content_as_base64(&mut chunk)?;
            if n == 0 {
                return Ok(out);
            }
            if out.len() + n > self.quotas.max_array_length {
                return Err(MtomError::quota(
                    "maximum XML array length exceeded",
                    self.quotas.max_array_length,
                ));
            }
            out.extend_from_slice(&chunk[..n]);
        }
    }

    /// Element-level string read: enters the element, accumulates its text
    /// (or the base64 form of referenced binary content), consumes the end
    /// element.
    pub fn read_element_content_as_string(&mut self) -> Result<String, MtomError> {
        if self.node_kind() != XmlNodeKind::StartElement {
            return Err(MtomError::usage(
                "reader is not positioned on a start element",
            ));
        }
        if self.is_empty_element() {
            self.advance()?;
            return Ok(String::new());
        }
        self.advance()?;
        let out = self.read_content_as_string()?;
        self.finish_element()?;
        Ok(out)
    }

    /// Release everything still held by this reader. Equivalent to dropping;
    /// provided for call sites that want the release to be explicit.
    pub fn close(self) {}

    fn read_element_content_binary(
        &mut self,
        out: &mut [u8],
        codec: InlineCodec,
    ) -> Result<usize, MtomError> {
        if !self.reading_binary_element {
            if self.node_kind() != XmlNodeKind::StartElement {
                return Err(MtomError::usage(
                    "reader is not positioned on a start element",
                ));
            }
            if self.is_empty_element() {
                self.advance()?;
                return Ok(0);
            }
            self.advance()?;
            self.reading_binary_element = true;
        }
        let n = match codec {
            InlineCodec::Base64 => self.read_content_as_base64(out)?,
            InlineCodec::BinHex => self.read_content_as_binhex(out)?,
        };
        if n == 0 {
            self.finish_element()?;
            self.reading_binary_element = false;
        }
        Ok(n)
    }

    /// Consume through the end element that closes the content just read.
    fn finish_element(&mut self) -> Result<(), MtomError> {
        if self.binary.is_some() {
            // Pops the binary state; lands on the enclosing end element.
            self.advance()?;
        }
        loop {
            match self.node_kind() {
                XmlNodeKind::EndElement => {
                    self.advance()?;
                    return Ok(());
                }
                XmlNodeKind::Comment | XmlNodeKind::ProcessingInstruction => {
                    self.advance()?;
                }
                XmlNodeKind::EndOfFile => return Ok(()),
                other => {
                    return Err(MtomError::format(format!(
                        "element content was not fully consumed; unexpected {:?}",
                        other
                    )))
                }
            }
        }
    }

    /// Inspect the node the cursor just produced; substitute xop:Include
    /// start elements with the referenced part's binary content.
    fn process_current(&mut self) -> Result<(), MtomError> {
        if self.cursor.node_kind() != XmlNodeKind::StartElement
            || self.cursor.namespace_uri() != XOP_NAMESPACE
            || self.cursor.local_name() != XOP_INCLUDE_LOCAL_NAME
        {
            return Ok(());
        }

        let mut href: Option<String> = None;
        for attr in self.cursor.attributes() {
            if attr.local_name == "href" && attr.namespace_uri.is_empty() {
                href = Some(attr.value.clone());
            } else if attr.namespace_uri == XOP_NAMESPACE {
                return Err(MtomError::protocol(format!(
                    "unexpected attribute '{}' in the XOP namespace on xop:Include",
                    attr.local_name
                )));
            }
        }
        let href = href.ok_or_else(|| {
            MtomError::protocol("xop:Include element does not specify an href attribute")
        })?;

        let part_index = self.resolve_part(&href)?;
        check_part_transfer_encoding(self.registry.part(part_index).headers())?;

        // Consume the Include element's own structure: nothing inside it is
        // re-emitted, and further XOP-namespace elements are invalid.
        let include_depth = self.cursor.depth();
        if !self.cursor.is_empty_element() {
            loop {
                if !self.cursor.advance()? {
                    return Err(MtomError::format(
                        "unexpected end of XML inside xop:Include",
                    ));
                }
                match self.cursor.node_kind() {
                    XmlNodeKind::StartElement
                        if self.cursor.namespace_uri() == XOP_NAMESPACE =>
                    {
                        return Err(MtomError::protocol(format!(
                            "unexpected element '{}' in the XOP namespace inside xop:Include",
                            self.cursor.local_name()
                        )));
                    }
                    XmlNodeKind::EndElement if self.cursor.depth() == include_depth => break,
                    _ => {}
                }
            }
        }
        // Pre-position the cursor on the node to surface once the binary
        // content is exhausted (normally the enclosing end element).
        let _ = self.cursor.advance()?;

        let chunk = DEFAULT_BINARY_CHUNK.min(self.quotas.max_bytes_per_read);
        trace!(part = part_index, href = href.as_str(), "substituting xop:Include");
        self.binary = Some(XopBinaryReader::new(part_index, chunk, include_depth));
        Ok(())
    }

    /// Resolve an href to a registered part, or drive the scanner forward
    /// until the part is found. A second reference to the same part fails.
    fn resolve_part(&mut self, uri: &str) -> Result<usize, MtomError> {
        let content_id = normalize_reference(uri)?;
        if let Some(index) = self.registry.find(&content_id) {
            if self.registry.part(index).referenced_from_infoset() {
                return Err(MtomError::protocol(format!(
                    "MIME part '{}' is referenced more than once",
                    content_id
                )));
            }
            self.registry.part_mut(index).set_referenced_from_infoset();
            return Ok(index);
        }
        scan_for_part(
            &mut self.scanner,
            &mut self.registry,
            &mut self.quota,
            &mut self.streaming_part,
            &content_id,
            uri,
        )
    }

    /// Produce the next base64 text chunk for the synthetic binary node.
    fn ensure_binary_value(&mut self) -> Result<(), MtomError> {
        let (part_index, target) = {
            let b = match self.binary.as_mut() {
                Some(b) => b,
                None => return Ok(()),
            };
            if b.string_value.is_some() {
                return Ok(());
            }
            if b.carry_pos > 0 {
                b.carry.drain(..b.carry_pos);
                b.carry_pos = 0;
            }
            // Whole 3-byte groups only, so chunk boundaries never split an
            // encoded quantum; the final chunk may be shorter.
            let whole_groups = b.bytes_remaining - b.bytes_remaining % 3;
            (b.part_index, whole_groups.saturating_sub(b.carry.len()))
        };
        let mut tmp = vec![0u8; target];
        let mut filled = 0;
        while filled < target {
            let read = Self::part_read(
                &mut self.scanner,
                &mut self.registry,
                self.streaming_part,
                part_index,
                &mut tmp[filled..],
            )?;
            if read == 0 {
                if let Some(b) = self.binary.as_mut() {
                    b.finished_stream = true;
                }
                break;
            }
            filled += read;
        }
        if let Some(b) = self.binary.as_mut() {
            b.bytes_remaining -= filled;
            b.carry.extend_from_slice(&tmp[..filled]);
            b.string_value = Some(BASE64.encode(&b.carry));
            b.string_offset = 0;
        }
        Ok(())
    }

    /// Raw part bytes for the synthetic binary node, serving bytes already
    /// pulled for the current text chunk first.
    fn binary_read_raw(&mut self, out: &mut [u8]) -> Result<usize, MtomError> {
        {
            let b = match self.binary.as_mut() {
                Some(b) => b,
                None => return Ok(0),
            };
            if b.carry_pos < b.carry.len() {
                let n = out.len().min(b.carry.len() - b.carry_pos);
                out[..n].copy_from_slice(&b.carry[b.carry_pos..b.carry_pos + n]);
                b.carry_pos += n;
                return Ok(n);
            }
        }
        let (part_index, count) = match self.binary.as_ref() {
            None => return Ok(0),
            Some(b) => (b.part_index, out.len().min(b.chunk_size)),
        };
        let mut read = 0;
        while read < count {
            let n = Self::part_read(
                &mut self.scanner,
                &mut self.registry,
                self.streaming_part,
                part_index,
                &mut out[read..count],
            )?;
            if n == 0 {
                if let Some(b) = self.binary.as_mut() {
                    b.finished_stream = true;
                }
                break;
            }
            read += n;
        }
        if let Some(b) = self.binary.as_mut() {
            b.bytes_remaining = b.chunk_size;
        }
        Ok(read)
    }

    /// Decode the current text node and serve bytes across calls.
    fn infoset_read_binary(
        &mut self,
        out: &mut [u8],
        codec: InlineCodec,
    ) -> Result<usize, MtomError> {
        if self.inline_decoded.is_none() {
            let value = self.cursor.value();
            let decoded = match codec {
                InlineCodec::Base64 => {
                    let compact: String =
                        value.chars().filter(|c| !c.is_ascii_whitespace()).collect();
                    BASE64.decode(compact.as_bytes()).map_err(|e| {
                        MtomError::format_with_source("invalid base64 text content", e)
                    })?
                }
                InlineCodec::BinHex => {
                    let compact: String =
                        value.chars().filter(|c| !c.is_ascii_whitespace()).collect();
                    binhex::decode(&compact).map_err(|e| {
                        MtomError::format_with_source("error decoding binhex content", e)
                    })?
                }
            };
            self.inline_decoded = Some((decoded, 0));
        }
        match self.inline_decoded.as_mut() {
            None => Ok(0),
            Some((decoded, pos)) => {
                let n = out.len().min(decoded.len() - *pos);
                out[..n].copy_from_slice(&decoded[*pos..*pos + n]);
                *pos += n;
                Ok(n)
            }
        }
    }

    /// Read the referenced part's bytes from wherever they live: the
    /// scanner's current content region, or the part's materialized buffer.
    fn part_read(
        scanner: &mut MimeScanner<R>,
        registry: &mut PartRegistry,
        streaming_part: Option<usize>,
        part_index: usize,
        out: &mut [u8],
    ) -> Result<usize, MtomError> {
        if registry.part(part_index).is_buffered() {
            return registry.part_mut(part_index).read_buffered(out);
        }
        if streaming_part == Some(part_index) {
            return scanner.read_content(out);
        }
        Err(MtomError::usage(
            "referenced MIME part content is no longer available",
        ))
    }
}

/// Drive the scanner forward until the target content-ID is seen,
/// registering (and buffering) every named part passed over.
fn scan_for_part<R: Read>(
    scanner: &mut MimeScanner<R>,
    registry: &mut PartRegistry,
    quota: &mut BufferQuota,
    streaming_part: &mut Option<usize>,
    content_id: &str,
    uri: &str,
) -> Result<usize, MtomError> {
    loop {
        if !scanner.read_next_part()? {
            return Err(MtomError::protocol(format!(
                "MIME part matching URI '{}' was not found",
                uri
            )));
        }
        let headers = scanner.read_headers(quota)?;
        let current_id = match headers.content_id() {
            // Parts without a Content-ID can never be referenced: skim their
            // content so the quota is reclaimed immediately.
            None => {
                scanner.skip_content(quota)?;
                continue;
            }
            Some(id) => id.to_string(),
        };
        let index = registry.insert(&current_id, MimePart::new(headers))?;
        if current_id == content_id {
            registry.part_mut(index).set_referenced_from_infoset();
            *streaming_part = Some(index);
            trace!(part = index, content_id = current_id.as_str(), "located referenced part");
            return Ok(index);
        }
        // Passed-over parts stay buffered for later out-of-order lookups.
        let mut content = scanner.content_stream();
        registry.part_mut(index).buffer_from(&mut content, quota)?;
    }
}

fn check_message_mime_version(headers: &MimeHeaders) -> Result<(), MtomError> {
    if let Some(version) = headers.mime_version() {
        if MimeVersion::parse(version).is_none() {
            return Err(MtomError::protocol(format!(
                "invalid MIME version '{}'; expected {}",
                version,
                MimeVersion::Version1_0
            )));
        }
    }
    Ok(())
}

/// Validate the message-level content-type and extract boundary, start and
/// start-info.
fn validate_message_content_type(
    header: &ContentTypeHeader,
) -> Result<(String, Option<String>, Option<String>), MtomError> {
    if !header.is_media("multipart", "related") {
        return Err(MtomError::protocol(format!(
            "message content-type must be multipart/related; found {}/{}",
            header.media_type(),
            header.media_subtype()
        )));
    }
    match header.parameter("type") {
        Some(t) if t == XOP_TYPE || t == SWA_TYPE => {}
        Some(t) => {
            return Err(MtomError::protocol(format!(
                "message content-type 'type' parameter must be '{}' or '{}'; found '{}'",
                XOP_TYPE, SWA_TYPE, t
            )))
        }
        None => {
            return Err(MtomError::protocol(
                "required content-type parameter 'type' was not specified",
            ))
        }
    }
    let boundary = match header.parameter("boundary") {
        Some(b) => b.to_string(),
        None => {
            return Err(MtomError::protocol(
                "required content-type parameter 'boundary' was not specified",
            ))
        }
    };
    if !crate::mime::is_valid_boundary(&boundary) {
        return Err(MtomError::protocol(format!(
            "invalid MIME boundary '{}'",
            boundary
        )));
    }
    let start = header.parameter("start").map(str::to_string);
    let start_info = header.parameter("start-info").map(str::to_string);
    Ok((boundary, start, start_info))
}

/// Validate the root part's content-type and resolve its charset against
/// the candidate encodings.
fn validate_root_content_type(
    headers: &MimeHeaders,
    encodings: &[TextEncoding],
    start_info: Option<&str>,
) -> Result<TextEncoding, MtomError> {
    let content_type = headers
        .content_type()
        .ok_or_else(|| MtomError::protocol("root part content-type header not found"))?;
    let is_xop = content_type.is_media("application", "xop+xml");
    let is_swa = content_type.is_media("text", "xml");
    if !is_xop && !is_swa {
        return Err(MtomError::protocol(format!(
            "root part content-type must be application/xop+xml or text/xml; found {}/{}",
            content_type.media_type(),
            content_type.media_subtype()
        )));
    }
    let charset = match content_type.parameter("charset") {
        Some(cs) if !cs.is_empty() => cs,
        _ => {
            return Err(MtomError::protocol(
                "required content-type parameter 'charset' was not specified on the root part",
            ))
        }
    };
    if let (Some(expected), Some(declared)) = (start_info, content_type.parameter("type")) {
        if expected != declared {
            return Err(MtomError::protocol(format!(
                "root part 'type' parameter '{}' does not match message 'start-info' '{}'",
                declared, expected
            )));
        }
    }
    resolve_root_charset(charset, encodings)
}

/// 7bit is the default in the absence of the header; anything outside the
/// three identity encodings is rejected on the root.
fn check_root_transfer_encoding(headers: &MimeHeaders) -> Result<(), MtomError> {
    if let Some(cte) = headers.content_transfer_encoding() {
        if cte.encoding() == ContentTransferEncoding::Other {
            return Err(MtomError::protocol(format!(
                "content-transfer-encoding '{}' is not supported on the root part; expected 7bit, 8bit or binary",
                cte.value()
            )));
        }
    }
    Ok(())
}

fn check_part_transfer_encoding(headers: &MimeHeaders) -> Result<(), MtomError> {
    match headers.content_transfer_encoding() {
        None => Err(MtomError::protocol(
            "content-transfer-encoding header is not present on a referenced part; expected 'binary'",
        )),
        Some(cte) if cte.encoding() != ContentTransferEncoding::Binary => {
            Err(MtomError::protocol(format!(
                "content-transfer-encoding '{}' is not supported for a referenced part; expected 'binary'",
                cte.value()
            )))
        }
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::SUPPORTED_ENCODINGS;

    const XOP_XMLNS: &str = "xmlns:xop=\"http://www.w3.org/2004/08/xop/include\"";

    fn message_content_type(boundary: &str) -> String {
        format!(
            "multipart/related; type=\"application/xop+xml\"; boundary={}",
            boundary
        )
    }

    /// Assemble an MTOM body: root XML plus (content-id, bytes) parts.
    fn build_body(boundary: &str, xml: &str, parts: &[(&str, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(
            b"Content-Type: application/xop+xml; charset=utf-8\r\nContent-Transfer-Encoding: 8bit\r\n\r\n",
        );
        body.extend_from_slice(xml.as_bytes());
        for (cid, bytes) in parts {
            body.extend_from_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-ID: {}\r\nContent-Transfer-Encoding: binary\r\nContent-Type: application/octet-stream\r\n\r\n",
                    cid
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
        }
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
        body
    }

    fn reader_for(
        body: Vec<u8>,
        boundary: &str,
    ) -> MtomReader<Cursor<Vec<u8>>> {
        MtomReader::from_bytes(
            body,
            Some(&message_content_type(boundary)),
            &SUPPORTED_ENCODINGS,
            ReaderQuotas::default(),
            DecodeLimits::default(),
        )
        .unwrap()
    }

    /// Advance to the element with the given local name.
    fn seek_element(r: &mut MtomReader<Cursor<Vec<u8>>>, name: &str) {
        loop {
            assert!(r.advance().unwrap(), "element '{}' not found", name);
            if r.node_kind() == XmlNodeKind::StartElement && r.local_name() == name {
                return;
            }
        }
    }

    #[test]
    fn text_cursor_walks_a_document() {
        let xml = "<a xmlns:p=\"urn:x\"><p:b attr=\"v\">text</p:b><c/></a>".to_string();
        let mut c = XmlTextCursor::new(xml, ReaderQuotas::default());
        assert!(c.advance().unwrap());
        assert_eq!(c.node_kind(), XmlNodeKind::StartElement);
        assert_eq!(c.local_name(), "a");
        assert_eq!(c.depth(), 0);
        assert!(c.advance().unwrap());
        assert_eq!(c.local_name(), "b");
        assert_eq!(c.namespace_uri(), "urn:x");
        assert_eq!(c.prefix(), "p");
        assert_eq!(c.depth(), 1);
        assert_eq!(c.attribute("attr"), Some("v"));
        assert!(c.advance().unwrap());
        assert_eq!(c.node_kind(), XmlNodeKind::Text);
        assert_eq!(c.value(), "text");
        assert!(c.advance().unwrap());
        assert_eq!(c.node_kind(), XmlNodeKind::EndElement);
        assert!(c.advance().unwrap());
        assert_eq!(c.local_name(), "c");
        assert!(c.is_empty_element());
        assert!(c.advance().unwrap());
        assert_eq!(c.node_kind(), XmlNodeKind::EndElement);
        assert_eq!(c.local_name(), "a");
        assert!(!c.advance().unwrap());
        assert_eq!(c.node_kind(), XmlNodeKind::EndOfFile);
    }

    #[test]
    fn text_cursor_depth_quota() {
        let mut quotas = ReaderQuotas::default();
        quotas.max_depth = 2;
        let xml = "<a><b><c><d/></c></b></a>".to_string();
        let mut c = XmlTextCursor::new(xml, quotas);
        let err = loop {
            match c.advance() {
                Ok(true) => continue,
                Ok(false) => panic!("expected depth error"),
                Err(e) => break e,
            }
        };
        assert!(err.is_quota());
    }

    #[test]
    fn text_cursor_rejects_dtd() {
        let xml = "<!DOCTYPE a SYSTEM \"x\"><a/>".to_string();
        let mut c = XmlTextCursor::new(xml, ReaderQuotas::default());
        let err = c.advance().unwrap_err();
        assert!(matches!(err, MtomError::Format { .. }));
    }

    #[test]
    fn include_is_replaced_by_binary_text() {
        let payload: Vec<u8> = (0u8..60).collect();
        let xml = format!(
            "<doc><bin><xop:Include {} href=\"cid:p1@x\"/></bin></doc>",
            XOP_XMLNS
        );
        let body = build_body("mb", &xml, &[("<p1@x>", &payload)]);
        let mut r = reader_for(body, "mb");
        seek_element(&mut r, "bin");
        assert!(r.advance().unwrap());
        // The Include element is hidden: the caller sees a text node.
        assert_eq!(r.node_kind(), XmlNodeKind::Text);
        assert_eq!(r.depth(), 2);
        let text = r.value().unwrap().to_string();
        assert_eq!(text, BASE64.encode(&payload));
        assert!(r.advance().unwrap());
        assert_eq!(r.node_kind(), XmlNodeKind::EndElement);
        assert_eq!(r.local_name(), "bin");
    }

    #[test]
    fn element_level_raw_read_returns_part_bytes() {
        let payload: Vec<u8> = (0u8..200).collect();
        let xml = format!(
            "<doc><bin><xop:Include {} href=\"cid:p1@x\"/></bin></doc>",
            XOP_XMLNS
        );
        let body = build_body("mb", &xml, &[("<p1@x>", &payload)]);
        let mut r = reader_for(body, "mb");
        seek_element(&mut r, "bin");
        let bytes = r.read_element_content_as_bytes().unwrap();
        assert_eq!(bytes, payload);
        assert_eq!(r.node_kind(), XmlNodeKind::EndElement);
        assert_eq!(r.local_name(), "doc");
    }

    #[test]
    fn base64_chunks_never_split_groups() {
        // 10000 bytes: several chunks; every chunk except the last must be a
        // multiple of 4 base64 chars covering 3-byte groups.
        let payload: Vec<u8> = (0..10000u32).map(|i| (i % 251) as u8).collect();
        let xml = format!(
            "<doc><bin><xop:Include {} href=\"cid:big@x\"/></bin></doc>",
            XOP_XMLNS
        );
        let body = build_body("mb", &xml, &[("<big@x>", &payload)]);
        let mut r = reader_for(body, "mb");
        seek_element(&mut r, "bin");
        assert!(r.advance().unwrap());
        assert_eq!(r.node_kind(), XmlNodeKind::Text);
        let mut collected = String::new();
        loop {
            let chunk = r.value().unwrap().to_string();
            if r.node_kind() != XmlNodeKind::Text {
                break;
            }
            collected.push_str(&chunk);
            assert!(r.advance().unwrap());
            if r.node_kind() != XmlNodeKind::Text {
                break;
            }
            // Non-final chunks decode whole 3-byte groups: length % 4 == 0
            // and no padding inside.
            assert_eq!(chunk.len() % 4, 0);
            assert!(!chunk.contains('='));
        }
        assert_eq!(collected, BASE64.encode(&payload));
    }

    #[test]
    fn out_of_order_references_succeed() {
        let (pa, pb, pc) = (vec![1u8; 17], vec![2u8; 33], vec![3u8; 5]);
        let xml = format!(
            "<doc><c><xop:Include {x} href=\"cid:c@x\"/></c><b><xop:Include {x} href=\"cid:b@x\"/></b><a><xop:Include {x} href=\"cid:a@x\"/></a></doc>",
            x = XOP_XMLNS
        );
        let body = build_body(
            "oo",
            &xml,
            &[("<a@x>", &pa[..]), ("<b@x>", &pb[..]), ("<c@x>", &pc[..])],
        );
        let mut r = reader_for(body, "oo");
        for (name, expected) in [("c", &pc), ("b", &pb), ("a", &pa)] {
            seek_element(&mut r, name);
            let bytes = r.read_element_content_as_bytes().unwrap();
            assert_eq!(&bytes, expected, "part '{}'", name);
        }
    }

    #[test]
    fn duplicate_reference_fails() {
        let payload = vec![9u8; 10];
        let xml = format!(
            "<doc><a><xop:Include {x} href=\"cid:p@x\"/></a><b><xop:Include {x} href=\"cid:p@x\"/></b></doc>",
            x = XOP_XMLNS
        );
        let body = build_body("dd", &xml, &[("<p@x>", &payload)]);
        let mut r = reader_for(body, "dd");
        seek_element(&mut r, "a");
        let _ = r.read_element_content_as_bytes().unwrap();
        seek_element(&mut r, "b");
        let err = r.advance().unwrap_err();
        assert!(err.to_string().contains("referenced more than once"));
    }

    #[test]
    fn missing_part_fails() {
        let xml = format!(
            "<doc><a><xop:Include {} href=\"cid:nope@x\"/></a></doc>",
            XOP_XMLNS
        );
        let body = build_body("mm", &xml, &[]);
        let mut r = reader_for(body, "mm");
        seek_element(&mut r, "a");
        let err = r.advance().unwrap_err();
        assert!(err.to_string().contains("was not found"));
    }

    #[test]
    fn missing_transfer_encoding_fails() {
        let xml = format!(
            "<doc><a><xop:Include {} href=\"cid:p@x\"/></a></doc>",
            XOP_XMLNS
        );
        let mut body = Vec::new();
        body.extend_from_slice(b"--bb\r\nContent-Type: application/xop+xml; charset=utf-8\r\n\r\n");
        body.extend_from_slice(xml.as_bytes());
        // Part without Content-Transfer-Encoding.
        body.extend_from_slice(b"\r\n--bb\r\nContent-ID: <p@x>\r\n\r\npayload\r\n--bb--\r\n");
        let mut r = reader_for(body, "bb");
        seek_element(&mut r, "a");
        let err = r.advance().unwrap_err();
        assert!(err.to_string().contains("content-transfer-encoding"));
    }

    #[test]
    fn base64_transfer_encoding_on_part_fails() {
        let xml = format!(
            "<doc><a><xop:Include {} href=\"cid:p@x\"/></a></doc>",
            XOP_XMLNS
        );
        let mut body = Vec::new();
        body.extend_from_slice(b"--bb\r\nContent-Type: application/xop+xml; charset=utf-8\r\n\r\n");
        body.extend_from_slice(xml.as_bytes());
        body.extend_from_slice(
            b"\r\n--bb\r\nContent-ID: <p@x>\r\nContent-Transfer-Encoding: base64\r\n\r\ncGF5bG9hZA==\r\n--bb--\r\n",
        );
        let mut r = reader_for(body, "bb");
        seek_element(&mut r, "a");
        let err = r.advance().unwrap_err();
        assert!(err.to_string().contains("expected 'binary'"));
    }

    #[test]
    fn unknown_root_charset_lists_supported_set() {
        let mut body = Vec::new();
        body.extend_from_slice(
            b"--cc\r\nContent-Type: application/xop+xml; charset=koi8-r\r\n\r\n<a/>\r\n--cc--\r\n",
        );
        let err = MtomReader::from_bytes(
            body,
            Some(&message_content_type("cc")),
            &SUPPORTED_ENCODINGS,
            ReaderQuotas::default(),
            DecodeLimits::default(),
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("koi8-r"));
        assert!(msg.contains("utf-8"));
        assert!(msg.contains("utf-16LE"));
        assert!(msg.contains("utf-16BE"));
    }

    #[test]
    fn missing_root_charset_fails() {
        let body =
            b"--cc\r\nContent-Type: application/xop+xml\r\n\r\n<a/>\r\n--cc--\r\n".to_vec();
        let err = MtomReader::from_bytes(
            body,
            Some(&message_content_type("cc")),
            &SUPPORTED_ENCODINGS,
            ReaderQuotas::default(),
            DecodeLimits::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("charset"));
    }

    #[test]
    fn message_type_parameter_is_required() {
        let body = b"--cc\r\n\r\nx\r\n--cc--\r\n".to_vec();
        let err = MtomReader::from_bytes(
            body,
            Some("multipart/related; boundary=cc"),
            &SUPPORTED_ENCODINGS,
            ReaderQuotas::default(),
            DecodeLimits::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("'type'"));
    }

    #[test]
    fn root_part_not_found() {
        let body = b"--cc--\r\n".to_vec();
        let err = MtomReader::from_bytes(
            body,
            Some(&message_content_type("cc")),
            &SUPPORTED_ENCODINGS,
            ReaderQuotas::default(),
            DecodeLimits::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("root MIME part"));
    }

    #[test]
    fn start_parameter_selects_root() {
        let xml = "<hello/>";
        let mut body = Vec::new();
        // A named binary part first, then the root identified by start.
        body.extend_from_slice(
            b"--ss\r\nContent-ID: <other@x>\r\nContent-Transfer-Encoding: binary\r\n\r\nBYTES",
        );
        body.extend_from_slice(
            b"\r\n--ss\r\nContent-ID: <root@x>\r\nContent-Type: application/xop+xml; charset=utf-8\r\n\r\n",
        );
        body.extend_from_slice(xml.as_bytes());
        body.extend_from_slice(b"\r\n--ss--\r\n");
        let ct = "multipart/related; type=\"application/xop+xml\"; boundary=ss; start=\"<root@x>\"";
        let mut r = MtomReader::from_bytes(
            body,
            Some(ct),
            &SUPPORTED_ENCODINGS,
            ReaderQuotas::default(),
            DecodeLimits::default(),
        )
        .unwrap();
        assert!(r.advance().unwrap());
        assert_eq!(r.local_name(), "hello");
    }

    #[test]
    fn nested_xop_element_inside_include_fails() {
        let xml = format!(
            "<doc><a><xop:Include {x} href=\"cid:p@x\"><xop:Extra/></xop:Include></a></doc>",
            x = XOP_XMLNS
        );
        let body = build_body("nn", &xml, &[("<p@x>", b"12345")]);
        let mut r = reader_for(body, "nn");
        seek_element(&mut r, "a");
        let err = r.advance().unwrap_err();
        assert!(err.to_string().contains("XOP namespace"));
    }

    #[test]
    fn missing_href_fails() {
        let xml = format!("<doc><a><xop:Include {}/></a></doc>", XOP_XMLNS);
        let body = build_body("hh", &xml, &[("<p@x>", b"123")]);
        let mut r = reader_for(body, "hh");
        seek_element(&mut r, "a");
        let err = r.advance().unwrap_err();
        assert!(err.to_string().contains("href"));
    }

    #[test]
    fn buffer_quota_exceeded_on_intervening_part() {
        // Referencing the last part forces the first (large) part to be
        // buffered, which blows a small quota.
        let big = vec![0u8; 4096];
        let xml = format!(
            "<doc><a><xop:Include {} href=\"cid:small@x\"/></a></doc>",
            XOP_XMLNS
        );
        let body = build_body("qq", &xml, &[("<big@x>", &big[..]), ("<small@x>", b"x")]);
        let mut r = MtomReader::from_bytes(
            body,
            Some(&message_content_type("qq")),
            &SUPPORTED_ENCODINGS,
            ReaderQuotas::default(),
            DecodeLimits {
                max_buffer_size: 2048,
                max_mime_parts: 10,
            },
        )
        .unwrap();
        seek_element(&mut r, "a");
        let err = r.advance().unwrap_err();
        assert!(err.is_quota());
    }

    #[test]
    fn max_mime_parts_exceeded() {
        let xml = format!(
            "<doc><a><xop:Include {} href=\"cid:last@x\"/></a></doc>",
            XOP_XMLNS
        );
        let parts: Vec<(String, Vec<u8>)> = (0..4)
            .map(|i| (format!("<p{}@x>", i), vec![i as u8]))
            .collect();
        let mut part_refs: Vec<(&str, &[u8])> = parts
            .iter()
            .map(|(c, b)| (c.as_str(), b.as_slice()))
            .collect();
        let last = ("<last@x>", &b"z"[..]);
        part_refs.push(last);
        let body = build_body("pp", &xml, &part_refs);
        let mut r = MtomReader::from_bytes(
            body,
            Some(&message_content_type("pp")),
            &SUPPORTED_ENCODINGS,
            ReaderQuotas::default(),
            DecodeLimits {
                max_buffer_size: 65536,
                max_mime_parts: 2,
            },
        )
        .unwrap();
        seek_element(&mut r, "a");
        let err = r.advance().unwrap_err();
        assert!(err.is_quota());
    }

    #[test]
    fn quota_is_credited_back_after_release() {
        let payload = vec![5u8; 1000];
        let xml = format!(
            "<doc><a><xop:Include {x} href=\"cid:b@x\"/></a><b><xop:Include {x} href=\"cid:a@x\"/></b></doc>",
            x = XOP_XMLNS
        );
        // Referencing b first buffers a; releasing both restores the quota
        // except the root part and header bytes never released.
        let body = build_body("rr", &xml, &[("<a@x>", &payload[..]), ("<b@x>", &payload[..])]);
        let mut r = reader_for(body, "rr");
        seek_element(&mut r, "a");
        let before = r.buffer_remaining();
        let _ = r.read_element_content_as_bytes().unwrap();
        seek_element(&mut r, "b");
        let _ = r.read_element_content_as_bytes().unwrap();
        while r.advance().unwrap() {}
        // Part a was buffered (1000 bytes) while scanning for b, then
        // released; remaining must have recovered past the pre-reference mark.
        assert!(r.buffer_remaining() >= before);
    }

    #[test]
    fn binhex_content_read() {
        let xml = "<doc><hex>48656C6C6F</hex></doc>".to_string();
        let body = build_body("xx", &xml, &[]);
        let mut r = reader_for(body, "xx");
        seek_element(&mut r, "hex");
        let mut out = [0u8; 16];
        let mut collected = Vec::new();
        loop {
            let n = r.read_element_content_as_binhex(&mut out).unwrap();
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&out[..n]);
        }
        assert_eq!(collected, b"Hello");
    }

    #[test]
    fn malformed_binhex_is_a_format_error() {
        let xml = "<doc><hex>XYZ1</hex></doc>".to_string();
        let body = build_body("xy", &xml, &[]);
        let mut r = reader_for(body, "xy");
        seek_element(&mut r, "hex");
        let mut out = [0u8; 4];
        let err = r.read_element_content_as_binhex(&mut out).unwrap_err();
        assert!(matches!(err, MtomError::Format { .. }));
        assert!(err.to_string().contains("binhex"));
    }

    #[test]
    fn value_chunk_reads() {
        let payload = b"0123456789".to_vec();
        let xml = format!(
            "<doc><bin><xop:Include {} href=\"cid:p@x\"/></bin></doc>",
            XOP_XMLNS
        );
        let body = build_body("vc", &xml, &[("<p@x>", &payload)]);
        let mut r = reader_for(body, "vc");
        seek_element(&mut r, "bin");
        assert!(r.advance().unwrap());
        assert_eq!(r.node_kind(), XmlNodeKind::Text);
        let mut text = String::new();
        while r.read_value_chunk(&mut text, 5).unwrap() > 0 {}
        assert_eq!(text, BASE64.encode(&payload));
    }

    #[test]
    fn skipping_binary_node_releases_the_part() {
        let payload = vec![1u8; 64];
        let xml = format!(
            "<doc><bin><xop:Include {} href=\"cid:p@x\"/></bin><tail/></doc>",
            XOP_XMLNS
        );
        let body = build_body("sk", &xml, &[("<p@x>", &payload)]);
        let mut r = reader_for(body, "sk");
        seek_element(&mut r, "bin");
        assert!(r.advance().unwrap()); // on synthetic text node
        assert!(r.advance().unwrap()); // skipped without consuming: pops
        assert_eq!(r.node_kind(), XmlNodeKind::EndElement);
        assert_eq!(r.local_name(), "bin");
        seek_element(&mut r, "tail");
    }
}

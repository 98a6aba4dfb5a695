/*
 * part.rs
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

//! Buffered MIME parts: one part's buffered state and the arena-style
//! registry keyed by content-ID.

use std::collections::HashMap;
use std::io::Read;

use tracing::{debug, trace};

use crate::error::MtomError;
use crate::mime::MimeHeaders;
use crate::quota::BufferQuota;

/// One MIME part discovered by the scanner. Content either still lives in
/// the scanner's current content region (the part most recently scanned) or
/// has been materialized into an in-memory buffer charged to the quota.
#[derive(Debug)]
pub struct MimePart {
    headers: MimeHeaders,
    buffer: Option<Vec<u8>>,
    read_pos: usize,
    referenced_from_infoset: bool,
    released: bool,
}

impl MimePart {
    pub fn new(headers: MimeHeaders) -> Self {
        Self {
            headers,
            buffer: None,
            read_pos: 0,
            referenced_from_infoset: false,
            released: false,
        }
    }

    pub fn headers(&self) -> &MimeHeaders {
        &self.headers
    }

    pub fn is_buffered(&self) -> bool {
        self.buffer.is_some()
    }

    /// Byte length, known once buffered; 0 while still streaming.
    pub fn len(&self) -> usize {
        self.buffer.as_ref().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn referenced_from_infoset(&self) -> bool {
        self.referenced_from_infoset
    }

    pub fn set_referenced_from_infoset(&mut self) {
        self.referenced_from_infoset = true;
    }

    /// Materialize the part's content from `source`, charging each read
    /// against the quota. No-op when already buffered.
    pub fn buffer_from(
        &mut self,
        source: &mut impl Read,
        quota: &mut BufferQuota,
    ) -> Result<(), MtomError> {
        if self.buffer.is_some() {
            return Ok(());
        }
        let mut buffered = Vec::new();
        let mut chunk = [0u8; 256];
        loop {
            let read = source
                .read(&mut chunk)
                .map_err(|e| MtomError::format_with_source("error reading MIME part content", e))?;
            if read == 0 {
                break;
            }
            quota.charge(read)?;
            buffered.extend_from_slice(&chunk[..read]);
        }
        trace!(bytes = buffered.len(), "buffered MIME part content");
        self.buffer = Some(buffered);
        self.read_pos = 0;
        Ok(())
    }

    /// Read from the buffered content, advancing the part's own cursor.
    /// Usage error if the part was never buffered.
    pub fn read_buffered(&mut self, out: &mut [u8]) -> Result<usize, MtomError> {
        let buffer = self
            .buffer
            .as_ref()
            .ok_or_else(|| MtomError::usage("MIME part content is not buffered"))?;
        let n = out
            .len()
            .min(buffer.len().saturating_sub(self.read_pos));
        out[..n].copy_from_slice(&buffer[self.read_pos..self.read_pos + n]);
        self.read_pos += n;
        Ok(n)
    }

    /// Take ownership of the buffered content without crediting the quota.
    /// Used for the root part, whose bytes back the XML reader for the whole
    /// decode and are never released.
    pub fn take_buffer(&mut self) -> Option<Vec<u8>> {
        self.read_pos = 0;
        self.buffer.take()
    }

    /// Discard the buffer and credit its bytes (plus the header bytes charged
    /// while parsing) back to the quota. Idempotent.
    pub fn release(&mut self, quota: &mut BufferQuota) {
        if self.released {
            return;
        }
        let buffered = self.buffer.take().map(|b| b.len()).unwrap_or(0);
        quota.credit(buffered + self.headers.buffered_size());
        self.released = true;
        trace!(bytes = buffered, "released MIME part");
    }
}

/// Parts discovered so far, in stream order, indexed by bracketed
/// content-ID. Lookups never rewind: a miss drives the scan forward.
#[derive(Debug)]
pub struct PartRegistry {
    parts: Vec<MimePart>,
    index: HashMap<String, usize>,
    max_parts: usize,
}

impl PartRegistry {
    pub fn new(max_parts: usize) -> Self {
        Self {
            parts: Vec::new(),
            index: HashMap::new(),
            max_parts,
        }
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn find(&self, content_id: &str) -> Option<usize> {
        self.index.get(content_id).copied()
    }

    pub fn part(&self, index: usize) -> &MimePart {
        &self.parts[index]
    }

    pub fn part_mut(&mut self, index: usize) -> &mut MimePart {
        &mut self.parts[index]
    }

    /// Register a newly scanned part under its content-ID. Exceeding the
    /// max-parts quota is fatal; a duplicate content-ID is a protocol error.
    pub fn insert(&mut self, content_id: &str, part: MimePart) -> Result<usize, MtomError> {
        if self.index.contains_key(content_id) {
            return Err(MtomError::protocol(format!(
                "duplicate content-ID '{}' in MIME message",
                content_id
            )));
        }
        let index = self.parts.len();
        self.parts.push(part);
        self.index.insert(content_id.to_string(), index);
        if self.parts.len() > self.max_parts {
            debug!(limit = self.max_parts, "maximum number of MIME parts exceeded");
            return Err(MtomError::quota(
                "maximum number of MIME parts exceeded",
                self.max_parts,
            ));
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn buffer_and_release_round_trip_the_quota() {
        let mut q = BufferQuota::new(1000);
        let mut headers = MimeHeaders::new();
        headers.add_buffered_size(25);
        q.charge(25).unwrap();
        let mut part = MimePart::new(headers);
        let mut src = Cursor::new(vec![7u8; 300]);
        part.buffer_from(&mut src, &mut q).unwrap();
        assert_eq!(part.len(), 300);
        assert_eq!(q.remaining(), 1000 - 300 - 25);
        part.release(&mut q);
        assert_eq!(q.remaining(), 1000);
        part.release(&mut q); // idempotent
        assert_eq!(q.remaining(), 1000);
    }

    #[test]
    fn buffering_past_the_quota_fails() {
        let mut q = BufferQuota::new(100);
        let mut part = MimePart::new(MimeHeaders::new());
        let mut src = Cursor::new(vec![0u8; 200]);
        assert!(part.buffer_from(&mut src, &mut q).unwrap_err().is_quota());
    }

    #[test]
    fn registry_enforces_max_parts() {
        let mut reg = PartRegistry::new(2);
        reg.insert("<a@x>", MimePart::new(MimeHeaders::new())).unwrap();
        reg.insert("<b@x>", MimePart::new(MimeHeaders::new())).unwrap();
        let err = reg
            .insert("<c@x>", MimePart::new(MimeHeaders::new()))
            .unwrap_err();
        assert!(err.is_quota());
    }

    #[test]
    fn registry_lookup_by_content_id() {
        let mut reg = PartRegistry::new(10);
        let i = reg.insert("<a@x>", MimePart::new(MimeHeaders::new())).unwrap();
        assert_eq!(reg.find("<a@x>"), Some(i));
        assert_eq!(reg.find("<missing@x>"), None);
        assert!(reg.insert("<a@x>", MimePart::new(MimeHeaders::new())).is_err());
    }

    #[test]
    fn buffered_reads_advance_cursor() {
        let mut q = BufferQuota::new(1000);
        let mut part = MimePart::new(MimeHeaders::new());
        let mut src = Cursor::new(b"hello world".to_vec());
        part.buffer_from(&mut src, &mut q).unwrap();
        let mut out = [0u8; 5];
        assert_eq!(part.read_buffered(&mut out).unwrap(), 5);
        assert_eq!(&out, b"hello");
        assert_eq!(part.read_buffered(&mut out).unwrap(), 5);
        assert_eq!(&out, b" worl");
        assert_eq!(part.read_buffered(&mut out).unwrap(), 1);
        assert_eq!(out[0], b'd');
        assert_eq!(part.read_buffered(&mut out).unwrap(), 0);
    }
}

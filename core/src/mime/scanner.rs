/*
 * scanner.rs
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

//! Multipart scanner: splits a byte stream at a boundary marker into a
//! forward-only sequence of parts, each with a header block and a bounded
//! content region. The window buffer holds only what boundary matching needs.

use std::io::Read;

use crate::error::MtomError;
use crate::mime::grammar::is_valid_boundary;
use crate::mime::headers::MimeHeaders;
use crate::quota::BufferQuota;

const FILL_CHUNK: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Before the first boundary; message headers may still be read here.
    Start,
    /// Positioned at a part's header block.
    InHeaders,
    /// Inside a part's content region.
    InContent,
    /// Content region exhausted; window positioned at the next boundary.
    ContentDone,
    /// Past the terminating boundary.
    Finished,
}

enum BoundaryKind {
    Part,
    Final,
}

/// Forward-only MIME multipart scanner over a byte stream.
pub struct MimeScanner<R: Read> {
    src: R,
    buf: Vec<u8>,
    start: usize,
    /// "\r\n--" + boundary token; None until the boundary is known.
    delimiter: Option<Vec<u8>>,
    state: ScanState,
    src_eof: bool,
}

impl<R: Read> MimeScanner<R> {
    /// Scanner without a boundary yet; use `read_message_headers` to pull the
    /// message's own header block off the stream, then `set_boundary`.
    pub fn new(src: R) -> Self {
        Self {
            src,
            buf: Vec::with_capacity(FILL_CHUNK),
            start: 0,
            delimiter: None,
            state: ScanState::Start,
            src_eof: false,
        }
    }

    /// Scanner for a stream whose boundary is already known from the
    /// transport content-type.
    pub fn with_boundary(src: R, boundary: &str) -> Result<Self, MtomError> {
        let mut scanner = Self::new(src);
        scanner.set_boundary(boundary)?;
        Ok(scanner)
    }

    /// Set the boundary token. A virtual CRLF is planted before the unread
    /// window so a boundary at the very start of the body still matches the
    /// CRLF-prefixed delimiter.
    pub fn set_boundary(&mut self, boundary: &str) -> Result<(), MtomError> {
        if self.delimiter.is_some() {
            return Err(MtomError::usage("scanner boundary is already set"));
        }
        if !is_valid_boundary(boundary) {
            return Err(MtomError::usage(format!(
                "invalid MIME boundary '{}'",
                boundary
            )));
        }
        let mut delimiter = Vec::with_capacity(4 + boundary.len());
        delimiter.extend_from_slice(b"\r\n--");
        delimiter.extend_from_slice(boundary.as_bytes());
        self.delimiter = Some(delimiter);

        let mut seeded = Vec::with_capacity(2 + self.buf.len() - self.start);
        seeded.extend_from_slice(b"\r\n");
        seeded.extend_from_slice(&self.buf[self.start..]);
        self.buf = seeded;
        self.start = 0;
        Ok(())
    }

    /// Parse the message's own header block (before the multipart body).
    /// Only valid before any boundary scanning has begun.
    pub fn read_message_headers(
        &mut self,
        quota: &mut BufferQuota,
    ) -> Result<MimeHeaders, MtomError> {
        if self.state != ScanState::Start || self.delimiter.is_some() {
            return Err(MtomError::usage(
                "message headers must be read before scanning parts",
            ));
        }
        self.read_header_block(quota)
    }

    /// Advance past any unread remainder of the current part and position at
    /// the next part's header block. False at the terminating boundary.
    pub fn read_next_part(&mut self) -> Result<bool, MtomError> {
        if self.state == ScanState::Finished {
            return Ok(false);
        }
        if self.delimiter.is_none() {
            return Err(MtomError::usage("scanner boundary is not set"));
        }
        match self.advance_to_boundary()? {
            BoundaryKind::Part => {
                self.state = ScanState::InHeaders;
                Ok(true)
            }
            BoundaryKind::Final => {
                self.state = ScanState::Finished;
                Ok(false)
            }
        }
    }

    /// Parse the current part's header block, charging header bytes against
    /// the shared quota.
    pub fn read_headers(&mut self, quota: &mut BufferQuota) -> Result<MimeHeaders, MtomError> {
        if self.state != ScanState::InHeaders {
            return Err(MtomError::usage(
                "read_headers is only valid at a part's header block",
            ));
        }
        let headers = self.read_header_block(quota)?;
        self.state = ScanState::InContent;
        Ok(headers)
    }

    /// Bounded read of the current part's content region: 0 once the next
    /// boundary is reached. The boundary itself is left for `read_next_part`.
    pub fn read_content(&mut self, out: &mut [u8]) -> Result<usize, MtomError> {
        match self.state {
            ScanState::InContent => {}
            ScanState::ContentDone => return Ok(0),
            _ => {
                return Err(MtomError::usage(
                    "read_content is only valid inside a part's content region",
                ))
            }
        }
        if out.is_empty() {
            return Ok(0);
        }
        let delimiter = match &self.delimiter {
            Some(d) => d.clone(),
            None => return Err(MtomError::usage("scanner boundary is not set")),
        };
        loop {
            if let Some(p) = find(&self.buf[self.start..], &delimiter) {
                if p > 0 {
                    let n = p.min(out.len());
                    out[..n].copy_from_slice(&self.buf[self.start..self.start + n]);
                    self.start += n;
                    return Ok(n);
                }
                // Delimiter at position 0: confirm it is a real boundary line.
                match self.classify_tail(delimiter.len())? {
                    Some(_) => {
                        self.state = ScanState::ContentDone;
                        return Ok(0);
                    }
                    None => {
                        // Content that merely starts like the delimiter.
                        out[0] = self.buf[self.start];
                        self.start += 1;
                        return Ok(1);
                    }
                }
            }
            // No delimiter in window: everything but a potential partial
            // match at the tail is plain content.
            let window = self.buf.len() - self.start;
            let safe = window.saturating_sub(delimiter.len() - 1);
            if safe > 0 {
                let n = safe.min(out.len());
                out[..n].copy_from_slice(&self.buf[self.start..self.start + n]);
                self.start += n;
                return Ok(n);
            }
            if !self.fill()? {
                return Err(MtomError::format(
                    "MIME stream ended without a closing boundary",
                ));
            }
        }
    }

    /// Borrowing `io::Read` adapter over the current part's content region.
    pub fn content_stream(&mut self) -> PartContent<'_, R> {
        PartContent { scanner: self }
    }

    /// Skim and discard the current part's remaining content. Every skimmed
    /// byte is charged and immediately credited back, so the quota counter
    /// observes the traffic without retaining it.
    pub fn skip_content(&mut self, quota: &mut BufferQuota) -> Result<(), MtomError> {
        let mut chunk = [0u8; 256];
        loop {
            let read = self.read_content(&mut chunk)?;
            if read == 0 {
                return Ok(());
            }
            quota.charge(read)?;
            quota.credit(read);
        }
    }

    /// Shared header-block loop: unfold continuations, stop at the blank
    /// line, charge every raw byte.
    fn read_header_block(&mut self, quota: &mut BufferQuota) -> Result<MimeHeaders, MtomError> {
        let mut headers = MimeHeaders::new();
        let mut pending: Option<(String, String)> = None;
        loop {
            let line = self.read_line()?;
            quota.charge(line.len())?;
            headers.add_buffered_size(line.len());
            let line = trim_line_ending(&line);
            if line.is_empty() {
                if let Some((name, value)) = pending.take() {
                    headers.insert(&name, &value)?;
                }
                return Ok(headers);
            }
            if line[0] == b' ' || line[0] == b'\t' {
                match pending.as_mut() {
                    Some((_, value)) => {
                        value.push(' ');
                        value.push_str(String::from_utf8_lossy(line).trim());
                    }
                    None => {
                        return Err(MtomError::format(
                            "MIME header block starts with a continuation line",
                        ))
                    }
                }
                continue;
            }
            if let Some((name, value)) = pending.take() {
                headers.insert(&name, &value)?;
            }
            let colon = line.iter().position(|&b| b == b':').ok_or_else(|| {
                MtomError::format(format!(
                    "malformed MIME header line '{}'",
                    String::from_utf8_lossy(line)
                ))
            })?;
            if colon == 0 {
                return Err(MtomError::format("MIME header line with empty name"));
            }
            let name = String::from_utf8_lossy(&line[..colon]).trim().to_string();
            let value = String::from_utf8_lossy(&line[colon + 1..]).trim().to_string();
            pending = Some((name, value));
        }
    }

    /// One raw line including its terminator. EOF before a newline is a
    /// format error: a header block must end with a blank line.
    fn read_line(&mut self) -> Result<Vec<u8>, MtomError> {
        loop {
            if let Some(nl) = self.buf[self.start..].iter().position(|&b| b == b'\n') {
                let line = self.buf[self.start..self.start + nl + 1].to_vec();
                self.start += nl + 1;
                return Ok(line);
            }
            if !self.fill()? {
                return Err(MtomError::format(
                    "MIME header block is not terminated by an empty line",
                ));
            }
        }
    }

    /// Discard up to the next true boundary line and consume it.
    fn advance_to_boundary(&mut self) -> Result<BoundaryKind, MtomError> {
        let delimiter = match &self.delimiter {
            Some(d) => d.clone(),
            None => return Err(MtomError::usage("scanner boundary is not set")),
        };
        loop {
            if let Some(p) = find(&self.buf[self.start..], &delimiter) {
                self.start += p;
                match self.classify_tail(delimiter.len())? {
                    Some(kind) => {
                        self.consume_boundary_line(delimiter.len(), &kind)?;
                        return Ok(kind);
                    }
                    None => {
                        self.start += 1;
                        continue;
                    }
                }
            }
            let window = self.buf.len() - self.start;
            let safe = window.saturating_sub(delimiter.len() - 1);
            self.start += safe;
            if !self.fill()? {
                return Err(MtomError::format(
                    "MIME stream ended without a closing boundary",
                ));
            }
        }
    }

    /// Inspect the bytes following a delimiter match. Some(kind) if this is a
    /// genuine boundary line, None if the match is part content.
    fn classify_tail(&mut self, delim_len: usize) -> Result<Option<BoundaryKind>, MtomError> {
        let mut idx = delim_len;
        if !self.ensure(idx + 2)? {
            // Too short for "--" or padding+CRLF: whatever remains cannot be
            // a complete message anyway.
            return Err(MtomError::format(
                "MIME stream ended inside a boundary line",
            ));
        }
        if &self.buf[self.start + idx..self.start + idx + 2] == b"--" {
            return Ok(Some(BoundaryKind::Final));
        }
        // Transport padding: LWS before the line break (RFC 2046).
        loop {
            if !self.ensure(idx + 1)? {
                return Err(MtomError::format(
                    "MIME stream ended inside a boundary line",
                ));
            }
            match self.buf[self.start + idx] {
                b' ' | b'\t' => idx += 1,
                b'\r' => {
                    if !self.ensure(idx + 2)? {
                        return Err(MtomError::format(
                            "MIME stream ended inside a boundary line",
                        ));
                    }
                    if self.buf[self.start + idx + 1] == b'\n' {
                        return Ok(Some(BoundaryKind::Part));
                    }
                    return Ok(None);
                }
                b'\n' => return Ok(Some(BoundaryKind::Part)),
                _ => return Ok(None),
            }
        }
    }

    /// Consume a confirmed boundary line through its terminator (for the
    /// final boundary, through "--"; trailing epilogue is never read).
    fn consume_boundary_line(
        &mut self,
        delim_len: usize,
        kind: &BoundaryKind,
    ) -> Result<(), MtomError> {
        self.start += delim_len;
        match kind {
            BoundaryKind::Final => {
                self.start += 2;
            }
            BoundaryKind::Part => loop {
                if !self.ensure(1)? {
                    return Err(MtomError::format(
                        "MIME stream ended inside a boundary line",
                    ));
                }
                match self.buf[self.start] {
                    b' ' | b'\t' | b'\r' => self.start += 1,
                    b'\n' => {
                        self.start += 1;
                        return Ok(());
                    }
                    _ => {
                        return Err(MtomError::format(
                            "unexpected content after MIME boundary",
                        ))
                    }
                }
            },
        }
        Ok(())
    }

    /// Ensure n bytes are in the window, filling as needed. False on EOF.
    fn ensure(&mut self, n: usize) -> Result<bool, MtomError> {
        while self.buf.len() - self.start < n {
            if !self.fill()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Read more bytes from the source into the window. False on EOF.
    fn fill(&mut self) -> Result<bool, MtomError> {
        if self.src_eof {
            return Ok(false);
        }
        if self.start > 0 && self.start == self.buf.len() {
            self.buf.clear();
            self.start = 0;
        } else if self.start > FILL_CHUNK {
            self.buf.drain(..self.start);
            self.start = 0;
        }
        let mut chunk = [0u8; FILL_CHUNK];
        let read = self
            .src
            .read(&mut chunk)
            .map_err(|e| MtomError::format_with_source("error reading MIME stream", e))?;
        if read == 0 {
            self.src_eof = true;
            return Ok(false);
        }
        self.buf.extend_from_slice(&chunk[..read]);
        Ok(true)
    }
}

/// Bounded reader over the scanner's current part content.
pub struct PartContent<'a, R: Read> {
    scanner: &'a mut MimeScanner<R>,
}

impl<R: Read> Read for PartContent<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.scanner
            .read_content(buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    if end >= 2 && line[end - 2] == b'\r' && line[end - 1] == b'\n' {
        end -= 2;
    } else if end >= 1 && (line[end - 1] == b'\n' || line[end - 1] == b'\r') {
        end -= 1;
    }
    &line[..end]
}

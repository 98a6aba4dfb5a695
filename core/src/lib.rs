/*
 * lib.rs
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

//! Streaming codec for SOAP messages with binary attachments in the
//! MTOM/XOP wire format: a MIME multipart body carrying an XML root part
//! plus raw binary parts referenced from the XML via xop:Include and cid:
//! URIs. Decode side parses an untrusted multipart stream under byte and
//! part-count quotas and exposes one pull reader that hides the multipart
//! structure; encode side serializes XML plus attachments back to MIME.

pub mod encoding;
pub mod error;
pub mod mime;
pub mod negotiate;
pub mod quota;
pub mod xop;

pub use encoding::{CharsetMatch, TextEncoding, SUPPORTED_ENCODINGS};
pub use error::MtomError;
pub use quota::BufferQuota;
pub use negotiate::{MessageCodec, MessageReader, MessageVersion, MTOM_MEDIA_TYPE};
pub use xop::{
    DecodeLimits, MtomReader, MtomWriter, OwnedAttribute, ReaderQuotas, WriterOptions,
    XmlNodeKind, XmlTextCursor, XOP_NAMESPACE,
};

/*
 * mod.rs
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

//! XOP layer: part cache and quota, binhex text codec, the unified MTOM
//! pull reader, and the multipart writer.

pub mod binhex;
mod part;
mod reader;
mod writer;

pub use part::{MimePart, PartRegistry};
pub use reader::{
    DecodeLimits, MtomReader, OwnedAttribute, ReaderQuotas, XmlNodeKind, XmlTextCursor,
    DEFAULT_MAX_BUFFER_SIZE, DEFAULT_MAX_MIME_PARTS,
};
pub use writer::{MtomWriter, WriterOptions};

/// The XOP include namespace.
pub const XOP_NAMESPACE: &str = "http://www.w3.org/2004/08/xop/include";

/// Local name of the include element.
pub const XOP_INCLUDE_LOCAL_NAME: &str = "Include";

/// The `type` parameter value for XOP packages.
pub const XOP_TYPE: &str = "application/xop+xml";

/// The `type` parameter value for SOAP-with-attachments packages.
pub const SWA_TYPE: &str = "text/xml";

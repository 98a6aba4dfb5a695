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

//! MIME multipart layer: grammar, the recognized header set, and the
//! forward-only boundary scanner.

mod grammar;
mod headers;
mod scanner;

pub use grammar::{
    is_boundary_char, is_token, is_token_char, is_valid_boundary, normalize_reference,
    normalize_start, quote_parameter_value, reference_for_content_id, CONTENT_ID_SCHEME,
};
pub use headers::{
    ContentTransferEncoding, ContentTransferEncodingHeader, ContentTypeHeader, MimeHeaders,
    MimeVersion,
};
pub use scanner::{MimeScanner, PartContent};

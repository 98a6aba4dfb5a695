/*
 * error.rs
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

//! Codec errors: format, protocol, quota, usage.

use std::fmt;

/// Error raised by decode or encode operations. Any error aborts the whole
/// read or write; nothing is retried internally.
#[derive(Debug)]
pub enum MtomError {
    /// Malformed MIME or XML syntax; wraps the underlying parse error when there is one.
    Format {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    /// Structural violation at the message level: missing root part, duplicate
    /// content-ID reference, wrong transfer-encoding, unsupported charset.
    Protocol(String),
    /// A configured ceiling was exceeded; carries the limit for diagnosability.
    Quota { message: String, limit: usize },
    /// Invalid argument to a public operation, checked eagerly at the boundary.
    Usage(String),
}

impl MtomError {
    pub fn format(message: impl Into<String>) -> Self {
        MtomError::Format {
            message: message.into(),
            source: None,
        }
    }

    pub fn format_with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        MtomError::Format {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        MtomError::Protocol(message.into())
    }

    pub fn quota(message: impl Into<String>, limit: usize) -> Self {
        MtomError::Quota {
            message: message.into(),
            limit,
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        MtomError::Usage(message.into())
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, MtomError::Quota { .. })
    }
}

impl fmt::Display for MtomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MtomError::Format { message, source } => match source {
                Some(s) => write!(f, "{}: {}", message, s),
                None => write!(f, "{}", message),
            },
            MtomError::Protocol(m) => write!(f, "{}", m),
            MtomError::Quota { message, limit } => write!(f, "{} (limit {})", message, limit),
            MtomError::Usage(m) => write!(f, "{}", m),
        }
    }
}

impl std::error::Error for MtomError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MtomError::Format {
                source: Some(s), ..
            } => Some(s.as_ref()),
            _ => None,
        }
    }
}

/*
 * binhex.rs
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

//! BinHex text encoding: two hex digits per byte, upper-case on output,
//! either case accepted on input.

use crate::error::MtomError;

const CHAR2VAL: [i8; 256] = {
    let mut t = [-1i8; 256];
    let mut i = 0u8;
    while i < 10 {
        t[(b'0' + i) as usize] = i as i8;
        i = i.wrapping_add(1);
    }
    let mut i = 0u8;
    while i < 6 {
        t[(b'A' + i) as usize] = (10 + i) as i8;
        t[(b'a' + i) as usize] = (10 + i) as i8;
        i = i.wrapping_add(1);
    }
    t
};

const VAL2CHAR: &[u8; 16] = b"0123456789ABCDEF";

/// Decode a binhex string into bytes. Odd length or a non-hex character is
/// a format error with the offending position.
pub fn decode(text: &str) -> Result<Vec<u8>, MtomError> {
    let bytes = text.as_bytes();
    if bytes.len() % 2 != 0 {
        return Err(MtomError::format(format!(
            "invalid binhex length {}",
            bytes.len()
        )));
    }
    let mut out = Vec::with_capacity(bytes.len() / 2);
    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        let d1 = CHAR2VAL[pair[0] as usize];
        let d2 = CHAR2VAL[pair[1] as usize];
        if d1 < 0 || d2 < 0 {
            return Err(MtomError::format(format!(
                "invalid binhex sequence '{}{}' at offset {}",
                pair[0] as char,
                pair[1] as char,
                i * 2
            )));
        }
        out.push(((d1 as u8) << 4) | d2 as u8);
    }
    Ok(out)
}

/// Encode bytes as a binhex string.
pub fn encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(VAL2CHAR[(b >> 4) as usize] as char);
        out.push(VAL2CHAR[(b & 0x0F) as usize] as char);
    }
    out
}

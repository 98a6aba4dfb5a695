/*
 * quota.rs
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

//! The shared byte budget for one decode operation.

use tracing::debug;

use crate::error::MtomError;

/// Shared byte budget for one decode operation. Every buffered byte (headers
/// or content) is charged here; releasing a part credits the counter back.
/// Owned by the decode session, passed by mutable reference to whatever
/// charges against it; never shared across operations or threads.
#[derive(Debug)]
pub struct BufferQuota {
    max: usize,
    remaining: usize,
}

impl BufferQuota {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            remaining: max,
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Charge `size` bytes. Draining the counter to (or past) zero is fatal:
    /// the counter is zeroed and the configured limit reported.
    pub fn charge(&mut self, size: usize) -> Result<(), MtomError> {
        if size >= self.remaining {
            self.remaining = 0;
            debug!(limit = self.max, "MIME buffer quota exceeded");
            return Err(MtomError::quota("MIME buffer quota exceeded", self.max));
        }
        self.remaining -= size;
        Ok(())
    }

    /// Credit bytes back, clamped to the configured maximum.
    pub fn credit(&mut self, size: usize) {
        self.remaining = (self.remaining + size).min(self.max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_stays_within_bounds() {
        let mut q = BufferQuota::new(100);
        assert_eq!(q.remaining(), 100);
        q.charge(40).unwrap();
        assert_eq!(q.remaining(), 60);
        q.credit(20);
        assert_eq!(q.remaining(), 80);
        q.credit(1000);
        assert_eq!(q.remaining(), 100);
    }

    #[test]
    fn quota_drain_to_zero_is_fatal() {
        let mut q = BufferQuota::new(10);
        q.charge(9).unwrap();
        let err = q.charge(1).unwrap_err();
        assert!(err.is_quota());
        assert_eq!(q.remaining(), 0);
        match err {
            MtomError::Quota { limit, .. } => assert_eq!(limit, 10),
            _ => unreachable!(),
        }
    }

    #[test]
    fn interleaved_charges_and_credits() {
        let mut q = BufferQuota::new(1000);
        for _ in 0..50 {
            q.charge(15).unwrap();
            q.credit(15);
        }
        assert_eq!(q.remaining(), 1000);
    }
}

//! Threshold counter used for debouncing.

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("counter limit must be non-negative, got {0}")]
pub struct NegativeLimit(pub i32);

/// A counter that reports whether a limit was reached.
///
/// The counter keeps counting beyond its limit. Incrementing at `i32::MAX`
/// wraps the count to 1 and reports `false` for that one call, even when the
/// limit is far below `i32::MAX`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counter {
    limit: i32,
    count: i32,
}

impl Default for Counter {
    /// A counter whose limit is `i32::MAX`.
    fn default() -> Self {
        Self {
            limit: i32::MAX,
            count: 0,
        }
    }
}

impl Counter {
    pub fn new(limit: i32) -> Result<Self, NegativeLimit> {
        if limit < 0 {
            return Err(NegativeLimit(limit));
        }
        Ok(Self { limit, count: 0 })
    }

    /// Count one more and return whether the count is now `>= limit`.
    pub fn increment(&mut self) -> bool {
        if self.count == i32::MAX {
            self.count = 1;
            return false;
        }
        self.count += 1;
        self.count >= self.limit
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn is_limit_reached(&self) -> bool {
        self.count >= self.limit
    }

    pub fn count(&self) -> i32 {
        self.count
    }

    pub fn limit(&self) -> i32 {
        self.limit
    }
}

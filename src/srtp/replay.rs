//! Sliding replay window over packet indices.
//!
//! Bit `d` of the window records whether index `highest - d` has been
//! accepted. Indices further behind `highest` than the history horizon are
//! taken to be ahead of it (the index space wraps), so they are accepted and
//! slide the window forward.

use bitvec::prelude::*;

use super::distance;

/// Smallest nonzero window, in packets.
pub const MIN_REPLAY_SIZE: usize = 64;

/// Default history horizon, in packets.
pub const DEFAULT_HISTORY_SIZE: u64 = 65536;

#[derive(Debug, Clone)]
pub struct ReplayWindow {
    size: usize,
    horizon: u64,
    wrap: u64,
    highest: u64,
    seen: BitVec,
}

impl ReplayWindow {
    /// Window expecting `first` as the next index. Everything before it
    /// counts as already seen.
    pub fn new(size: usize, horizon: u64, wrap: u64, first: u64) -> Self {
        let size = normalize_size(size);
        Self {
            size,
            horizon: horizon.max(size as u64),
            wrap,
            highest: first.wrapping_sub(1) & wrap,
            seen: bitvec![1; size],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn highest(&self) -> u64 {
        self.highest
    }

    /// Would `index` be accepted? Does not modify the window.
    pub fn check(&self, index: u64) -> bool {
        if self.size == 0 {
            return true;
        }
        let behind = distance(index, self.highest, self.wrap);
        if behind > self.horizon {
            return true;
        }
        if behind >= self.size as u64 {
            return false;
        }
        !self.seen[behind as usize]
    }

    /// Mark `index` as seen, sliding the window if it is ahead.
    pub fn record(&mut self, index: u64) {
        let behind = distance(index, self.highest, self.wrap);
        if behind > self.horizon {
            let ahead = distance(self.highest, index, self.wrap);
            if ahead >= self.size as u64 {
                self.seen.fill(false);
            } else {
                self.seen.shift_end(ahead as usize);
            }
            self.highest = index & self.wrap;
            if self.size > 0 {
                self.seen.set(0, true);
            }
        } else if behind < self.size as u64 {
            self.seen.set(behind as usize, true);
        }
    }

    pub fn check_and_record(&mut self, index: u64) -> bool {
        if !self.check(index) {
            return false;
        }
        self.record(index);
        true
    }
}

/// Zero disables checking; anything else is raised to the minimum.
pub fn normalize_size(size: usize) -> usize {
    if size == 0 {
        0
    } else {
        size.max(MIN_REPLAY_SIZE)
    }
}

//! Flat arena holding every step's packed p-lock triples.
//!
//! Allocation is a monotonic bump: steps receive a contiguous
//! (offset, count) range that stays put until the whole pool is reset
//! (project load). Freed ranges are never reclaimed individually.

use super::plock::PlockEntry;
use super::{SeqError, POOL_CAPACITY};

pub struct PlockPool {
    entries: Vec<PlockEntry>,
    used: usize,
}

impl PlockPool {
    /// Create a pool with the full build-time capacity.
    pub fn new() -> Self {
        Self::with_capacity(POOL_CAPACITY)
    }

    /// Create a pool with a reduced capacity (exhaustion tests).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: vec![PlockEntry::default(); capacity],
            used: 0,
        }
    }

    /// Drop every allocation. Outstanding step references become logically
    /// empty; callers re-install what they need afterwards.
    pub fn reset(&mut self) {
        self.used = 0;
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Reserve `n` contiguous entries and return the base offset.
    ///
    /// On exhaustion the used counter is left untouched and the caller is
    /// expected to keep its previous range (or none).
    pub fn alloc(&mut self, n: usize) -> Result<u16, SeqError> {
        if n == 0 {
            return Ok(self.used as u16);
        }
        let need = self.used + n;
        if need > self.entries.len() {
            return Err(SeqError::PoolExhausted);
        }
        let offset = self.used as u16;
        self.used = need;
        Ok(offset)
    }

    /// Entry at absolute index `offset + i`, if inside the arena.
    pub fn entry(&self, offset: u16, i: usize) -> Option<&PlockEntry> {
        self.entries.get(offset as usize + i)
    }

    pub fn entry_mut(&mut self, offset: u16, i: usize) -> Option<&mut PlockEntry> {
        self.entries.get_mut(offset as usize + i)
    }
}

impl Default for PlockPool {
    fn default() -> Self {
        Self::new()
    }
}

//! Bounded per-device throttle history.

use std::collections::VecDeque;

/// Number of cycles of throttle state retained per device.
pub const HISTORY_CAPACITY: usize = 40;

/// Fixed-capacity ring of per-cycle throttle flags, oldest first.
///
/// Pushing beyond capacity silently evicts the oldest entry. Readers get a
/// copied snapshot so rendering never holds a borrow into live state.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    samples: VecDeque<bool>,
    capacity: usize,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record one cycle's throttle state, evicting the oldest entry at
    /// capacity.
    pub fn push(&mut self, throttled: bool) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(throttled);
    }

    /// Copy of the buffer contents, oldest first.
    pub fn snapshot(&self) -> Vec<bool> {
        self.samples.iter().copied().collect()
    }

    /// Most recent entry, if any.
    pub fn latest(&self) -> Option<bool> {
        self.samples.back().copied()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let h = HistoryBuffer::default();
        assert!(h.is_empty());
        assert_eq!(h.len(), 0);
        assert_eq!(h.capacity(), HISTORY_CAPACITY);
        assert_eq!(h.latest(), None);
    }

    #[test]
    fn snapshot_is_oldest_first() {
        let mut h = HistoryBuffer::new(4);
        h.push(true);
        h.push(false);
        h.push(true);
        assert_eq!(h.snapshot(), vec![true, false, true]);
        assert_eq!(h.latest(), Some(true));
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let mut h = HistoryBuffer::new(3);
        h.push(true);
        h.push(false);
        h.push(false);
        h.push(true); // evicts the first `true`
        assert_eq!(h.len(), 3);
        assert_eq!(h.snapshot(), vec![false, false, true]);
    }

    #[test]
    fn never_exceeds_default_capacity() {
        let mut h = HistoryBuffer::default();
        for i in 0..200 {
            h.push(i % 2 == 0);
        }
        assert_eq!(h.len(), HISTORY_CAPACITY);
    }
}

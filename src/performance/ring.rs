//! Fixed-capacity ring buffer.
//!
//! Backing store for snapshot history and alerts: appends are O(1) and
//! evict the oldest entry once full.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    /// Index of the oldest element.
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    /// A zero capacity is bumped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append, returning the evicted oldest element when full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let cap = self.capacity();
        if self.len < cap {
            let idx = (self.head + self.len) % cap;
            self.slots[idx] = Some(item);
            self.len += 1;
            None
        } else {
            let evicted = self.slots[self.head].replace(item);
            self.head = (self.head + 1) % cap;
            evicted
        }
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        let cap = self.capacity();
        (0..self.len).filter_map(move |i| self.slots[(self.head + i) % cap].as_ref())
    }

    pub fn latest(&self) -> Option<&T> {
        if self.len == 0 {
            return None;
        }
        let idx = (self.head + self.len - 1) % self.capacity();
        self.slots[idx].as_ref()
    }

    /// Keep only the elements matching `keep`, preserving order.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        let cap = self.capacity();
        let mut kept = Vec::with_capacity(self.len);
        for i in 0..self.len {
            if let Some(item) = self.slots[(self.head + i) % cap].take() {
                if keep(&item) {
                    kept.push(item);
                }
            }
        }
        self.head = 0;
        self.len = kept.len();
        for (slot, item) in self.slots.iter_mut().zip(kept) {
            *slot = Some(item);
        }
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.head = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_evicts_oldest() {
        let mut ring = RingBuffer::new(3);
        assert_eq!(ring.push(1), None);
        assert_eq!(ring.push(2), None);
        assert_eq!(ring.push(3), None);
        assert_eq!(ring.push(4), Some(1));
        assert_eq!(ring.push(5), Some(2));
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(ring.iter().rev().copied().collect::<Vec<_>>(), vec![5, 4, 3]);
        assert_eq!(ring.latest(), Some(&5));
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn test_retain_after_wrap() {
        let mut ring = RingBuffer::new(4);
        for i in 0..7 {
            ring.push(i);
        }
        ring.retain(|v| v % 2 == 0);
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![4, 6]);
        ring.push(8);
        ring.push(10);
        assert_eq!(ring.push(12), Some(4));
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![6, 8, 10, 12]);
    }

    #[test]
    fn test_zero_capacity_and_clear() {
        let mut ring = RingBuffer::new(0);
        assert_eq!(ring.capacity(), 1);
        ring.push("a");
        assert_eq!(ring.push("b"), Some("a"));
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.latest(), None);
    }
}

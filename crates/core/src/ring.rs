//! Bounded screenshot buffer with batched overflow trimming.
//!
//! One policy for every capture mode, parameterized by capacity: when an
//! append pushes the buffer past capacity, the oldest half is dropped in a
//! single batch and the newest half kept. A batched trim instead of
//! one-out-one-in eviction, so a busy capture loop does not thrash.
//! `capacity: None` disables trimming (replay buffers are bounded by the
//! workflow's step count instead).

use crate::types::Screenshot;

#[derive(Debug)]
pub struct ScreenshotRing {
    items: Vec<Screenshot>,
    capacity: Option<usize>,
}

impl ScreenshotRing {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            items: Vec::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn latest(&self) -> Option<&Screenshot> {
        self.items.last()
    }

    pub fn get(&self, idx: usize) -> Option<&Screenshot> {
        self.items.get(idx)
    }

    /// Append one screenshot, trimming to the newest `capacity / 2` entries
    /// if the append overflows. Length never exceeds capacity afterward.
    pub fn push(&mut self, shot: Screenshot) {
        self.items.push(shot);
        if let Some(cap) = self.capacity {
            if self.items.len() > cap {
                let keep = (cap / 2).max(1);
                self.items.drain(..self.items.len() - keep);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shot(n: i64) -> Screenshot {
        Screenshot {
            timestamp_ms: n,
            image_b64: format!("img{}", n),
            step: None,
        }
    }

    #[test]
    fn stays_within_capacity_after_every_push() {
        let mut ring = ScreenshotRing::new(Some(100));
        for i in 0..500 {
            ring.push(shot(i));
            assert!(ring.len() <= 100);
        }
    }

    #[test]
    fn trims_to_half_on_overflow_keeping_newest() {
        let mut ring = ScreenshotRing::new(Some(100));
        for i in 0..101 {
            ring.push(shot(i));
        }
        // The 101st push drops the oldest half.
        assert_eq!(ring.len(), 50);
        assert_eq!(ring.get(0).unwrap().timestamp_ms, 51);
        assert_eq!(ring.latest().unwrap().timestamp_ms, 100);
    }

    #[test]
    fn unbounded_never_trims() {
        let mut ring = ScreenshotRing::new(None);
        for i in 0..5000 {
            ring.push(shot(i));
        }
        assert_eq!(ring.len(), 5000);
        assert_eq!(ring.get(0).unwrap().timestamp_ms, 0);
    }

    #[test]
    fn tiny_capacity_keeps_at_least_one() {
        let mut ring = ScreenshotRing::new(Some(1));
        ring.push(shot(1));
        ring.push(shot(2));
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.latest().unwrap().timestamp_ms, 2);
    }
}

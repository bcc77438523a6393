//! # Duplicate Frame Defense
//!
//! Some vendor legs replay the same AMR-WB frame more than once (retransmits,
//! mirrored tracks). Feeding those to the decoder doubles audio and shifts
//! every later sample, so frames are compared by content hash:
//!
//! - **Lag-1**: a frame identical to the one right before it is dropped, both
//!   when a payload is accepted and again when a batch is assembled for decode.
//! - **Sliding window**: artifact capture keeps the last N hashes per file so
//!   out-of-order replays are not written twice.
//!
//! Hashing is SHA-256 over the full storage frame (TOC byte and payload).
//! Comfort noise and tones can legitimately repeat byte-for-byte; those
//! repeats are dropped too. The risk is accepted since replays are far more
//! common in practice.

use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};

pub type FrameHash = [u8; 32];

/// Default sliding window size.
pub const DEFAULT_WINDOW: usize = 32;

pub fn frame_hash(storage_frame: &[u8]) -> FrameHash {
    Sha256::digest(storage_frame).into()
}

/// True when `hash` repeats the previous frame.
pub fn is_lag1_duplicate(previous: Option<&FrameHash>, hash: &FrameHash) -> bool {
    previous == Some(hash)
}

/// Drop lag-1 repeats from a sequence of hashed frames.
///
/// `last` is the hash of the frame that preceded the sequence (e.g. the last
/// frame sent to the decoder) and is advanced to the last kept frame. Returns
/// the kept items and how many were dropped.
pub fn drop_lag1<T>(
    items: Vec<T>,
    last: &mut Option<FrameHash>,
    hash_of: impl Fn(&T) -> FrameHash,
) -> (Vec<T>, usize) {
    let mut kept = Vec::with_capacity(items.len());
    let mut dropped = 0;
    for item in items {
        let hash = hash_of(&item);
        if is_lag1_duplicate(last.as_ref(), &hash) {
            dropped += 1;
            continue;
        }
        *last = Some(hash);
        kept.push(item);
    }
    (kept, dropped)
}

/// Bounded set of recently seen frame hashes, evicting oldest first.
#[derive(Debug, Clone)]
pub struct DedupeWindow {
    seen: HashSet<FrameHash>,
    fifo: VecDeque<FrameHash>,
    max_size: usize,
}

impl DedupeWindow {
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            seen: HashSet::with_capacity(max_size),
            fifo: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    pub fn contains(&self, hash: &FrameHash) -> bool {
        self.seen.contains(hash)
    }

    /// Record `hash`. Returns false if it was already in the window.
    pub fn insert(&mut self, hash: FrameHash) -> bool {
        if !self.seen.insert(hash) {
            return false;
        }
        self.fifo.push_back(hash);
        while self.fifo.len() > self.max_size {
            if let Some(old) = self.fifo.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }

    /// Prime the window with frames already on disk.
    pub fn seed<'a>(&mut self, frames: impl IntoIterator<Item = &'a [u8]>) {
        for frame in frames {
            self.insert(frame_hash(frame));
        }
    }

    pub fn len(&self) -> usize {
        self.fifo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fifo.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(tag: u8) -> FrameHash {
        frame_hash(&[0x04, tag])
    }

    #[test]
    fn test_hash_covers_toc_byte() {
        assert_ne!(frame_hash(&[0x04, 1, 2]), frame_hash(&[0x0C, 1, 2]));
        assert_eq!(frame_hash(&[0x04, 1, 2]), frame_hash(&[0x04, 1, 2]));
    }

    #[test]
    fn test_lag1_only_drops_adjacent() {
        let mut last = None;
        let (kept, dropped) = drop_lag1(vec![1u8, 1, 2, 1, 1, 1], &mut last, |t| h(*t));
        assert_eq!(kept, vec![1, 2, 1]);
        assert_eq!(dropped, 3);
        assert_eq!(last, Some(h(1)));
    }

    #[test]
    fn test_lag1_uses_previous_batch_tail() {
        let mut last = Some(h(7));
        let (kept, dropped) = drop_lag1(vec![7u8, 8], &mut last, |t| h(*t));
        assert_eq!(kept, vec![8]);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut window = DedupeWindow::new(2);
        assert!(window.insert(h(1)));
        assert!(window.insert(h(2)));
        assert!(!window.insert(h(1)));
        assert!(window.insert(h(3)));
        assert_eq!(window.len(), 2);
        assert!(!window.contains(&h(1)));
        assert!(window.insert(h(1)));
    }

    #[test]
    fn test_window_seed() {
        let frames: Vec<Vec<u8>> = (0..40u8).map(|i| vec![0x04, i]).collect();
        let mut window = DedupeWindow::new(DEFAULT_WINDOW);
        window.seed(frames.iter().map(Vec::as_slice));
        assert_eq!(window.len(), DEFAULT_WINDOW);
        assert!(!window.contains(&h(0)));
        assert!(window.contains(&h(39)));
    }

    #[test]
    fn test_sustained_identical_content_is_collapsed() {
        // Legitimately repeated frames (steady tone, comfort noise) collapse
        // to one; this false positive is accepted.
        let mut window = DedupeWindow::new(DEFAULT_WINDOW);
        let accepted = (0..10).filter(|_| window.insert(h(5))).count();
        assert_eq!(accepted, 1);

        let mut last = None;
        let (kept, _) = drop_lag1(vec![5u8; 10], &mut last, |t| h(*t));
        assert_eq!(kept.len(), 1);
    }
}

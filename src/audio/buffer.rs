//! # Frame Buffer & Batch Scheduler
//!
//! Accumulates validated speech storage frames for one call until enough have
//! arrived to make a decode worthwhile. The decoder subprocess is faster and
//! more deterministic when fed aligned multi-frame chunks than one 20 ms frame
//! at a time.
//!
//! ## Flush Rules:
//! - **Frame count**: at least `min_frames` buffered (default 10, ~200 ms)
//! - **Age**: the oldest buffered frame is `max_buffer_ms` old (default 500 ms),
//!   so a trickle of frames never stalls transcription
//!
//! A flush releases at most `chunk_frames` (default 20, ~400 ms). Whatever
//! remains keeps the original start instant so age accounting stays monotonic
//! across partial flushes.

use crate::audio::dedupe::{frame_hash, FrameHash};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Configuration for frame buffering behavior.
#[derive(Debug, Clone)]
pub struct FrameBufferConfig {
    /// Buffered frame count that triggers a flush
    pub min_frames: usize,

    /// Buffer age that triggers a flush regardless of count (milliseconds)
    pub max_buffer_ms: u64,

    /// Upper bound on frames released per flush
    pub chunk_frames: usize,
}

impl Default for FrameBufferConfig {
    fn default() -> Self {
        Self {
            min_frames: 10,     // ~200ms at 20ms per frame
            max_buffer_ms: 500, // safety valve for under-filled buffers
            chunk_frames: 20,   // ~400ms per decode batch
        }
    }
}

/// A speech storage frame (TOC byte + payload) and its content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedFrame {
    pub bytes: Vec<u8>,
    pub hash: FrameHash,
}

impl BufferedFrame {
    pub fn new(bytes: Vec<u8>) -> Self {
        let hash = frame_hash(&bytes);
        Self { bytes, hash }
    }
}

/// Ordered per-call buffer of frames waiting for decode.
///
/// Owned by exactly one session; callers serialize access through the
/// session lock, so no interior locking here.
#[derive(Debug)]
pub struct FrameBuffer {
    frames: VecDeque<BufferedFrame>,

    /// When the oldest frame currently buffered arrived. Cleared exactly when
    /// the buffer becomes empty.
    started_at: Option<Instant>,

    config: FrameBufferConfig,
}

impl FrameBuffer {
    pub fn new(config: FrameBufferConfig) -> Self {
        Self {
            frames: VecDeque::with_capacity(config.chunk_frames.max(config.min_frames)),
            started_at: None,
            config,
        }
    }

    /// Append a frame; starts the age clock if the buffer was empty.
    pub fn push(&mut self, frame: BufferedFrame, now: Instant) {
        if self.frames.is_empty() {
            self.started_at = Some(now);
        }
        self.frames.push_back(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// Age of the oldest buffered frame.
    pub fn age(&self, now: Instant) -> Option<Duration> {
        self.started_at.map(|start| now.saturating_duration_since(start))
    }

    /// True iff the frame count or the age threshold has been reached.
    pub fn should_flush(&self, now: Instant) -> bool {
        if self.frames.is_empty() {
            return false;
        }
        if self.frames.len() >= self.config.min_frames {
            return true;
        }
        self.age(now)
            .map(|age| age >= Duration::from_millis(self.config.max_buffer_ms))
            .unwrap_or(false)
    }

    /// Release up to `chunk_frames` frames in arrival order.
    pub fn take_batch(&mut self) -> Vec<BufferedFrame> {
        let count = self.frames.len().min(self.config.chunk_frames.max(1));
        let batch: Vec<BufferedFrame> = self.frames.drain(..count).collect();
        if self.frames.is_empty() {
            self.started_at = None;
        }
        batch
    }

    /// Flush if due, otherwise `None`.
    pub fn poll_batch(&mut self, now: Instant) -> Option<Vec<BufferedFrame>> {
        if self.should_flush(now) {
            Some(self.take_batch())
        } else {
            None
        }
    }

    /// Drop everything, e.g. when the call ends.
    pub fn clear(&mut self) {
        self.frames.clear();
        self.started_at = None;
    }

    pub fn config(&self) -> &FrameBufferConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8) -> BufferedFrame {
        let mut bytes = vec![0x04];
        bytes.extend(vec![tag; 17]);
        BufferedFrame::new(bytes)
    }

    fn filled(count: usize, start: Instant) -> FrameBuffer {
        let mut buffer = FrameBuffer::new(FrameBufferConfig::default());
        for i in 0..count {
            buffer.push(frame(i as u8), start);
        }
        buffer
    }

    #[test]
    fn test_nine_frames_at_100ms_do_not_flush() {
        let start = Instant::now();
        let buffer = filled(9, start);
        assert!(!buffer.should_flush(start + Duration::from_millis(100)));
    }

    #[test]
    fn test_min_frames_triggers_flush() {
        let start = Instant::now();
        let buffer = filled(10, start);
        assert!(buffer.should_flush(start));
    }

    #[test]
    fn test_age_triggers_flush() {
        let start = Instant::now();
        let buffer = filled(1, start);
        assert!(!buffer.should_flush(start + Duration::from_millis(499)));
        assert!(buffer.should_flush(start + Duration::from_millis(500)));
    }

    #[test]
    fn test_empty_buffer_never_flushes() {
        let buffer = FrameBuffer::new(FrameBufferConfig::default());
        assert!(!buffer.should_flush(Instant::now() + Duration::from_secs(10)));
        assert!(buffer.started_at().is_none());
    }

    #[test]
    fn test_partial_flush_keeps_start_instant() {
        let start = Instant::now();
        let mut buffer = filled(25, start);
        let later = start + Duration::from_millis(40);
        buffer.push(frame(99), later);

        let batch = buffer.take_batch();
        assert_eq!(batch.len(), 20);
        assert_eq!(batch[0], frame(0));
        assert_eq!(buffer.len(), 6);
        assert_eq!(buffer.started_at(), Some(start));

        let rest = buffer.take_batch();
        assert_eq!(rest.len(), 6);
        assert!(buffer.is_empty());
        assert!(buffer.started_at().is_none());
    }

    #[test]
    fn test_start_resets_after_emptying() {
        let start = Instant::now();
        let mut buffer = filled(10, start);
        assert_eq!(buffer.poll_batch(start).map(|b| b.len()), Some(10));
        assert!(buffer.started_at().is_none());

        let later = start + Duration::from_secs(1);
        buffer.push(frame(1), later);
        assert_eq!(buffer.started_at(), Some(later));
        assert!(buffer.poll_batch(later).is_none());
    }
}

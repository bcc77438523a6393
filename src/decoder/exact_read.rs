//! # Exact-Byte Reader
//!
//! Serves fixed-size reads from a byte queue that a reader task fills with
//! decoder stdout chunks. A read either returns exactly the requested number of
//! bytes or fails: on timeout with [`DecoderError::ShortRead`], on stream end
//! with [`DecoderError::ProcessExited`]. Bytes are never lost on a successful
//! read; anything beyond the request stays queued for the next one.

use crate::decoder::DecoderError;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::Instant;

#[derive(Debug)]
pub struct ExactReader {
    rx: mpsc::Receiver<Vec<u8>>,
    queue: VecDeque<u8>,
    closed: bool,
}

impl ExactReader {
    pub fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            queue: VecDeque::new(),
            closed: false,
        }
    }

    /// Bytes currently buffered.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// True once the producer side is gone.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Read exactly `n` bytes, waiting at most `timeout` in total.
    pub async fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, DecoderError> {
        let deadline = Instant::now() + timeout;

        while self.queue.len() < n {
            if self.closed {
                return Err(DecoderError::ProcessExited);
            }
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(chunk)) => self.queue.extend(chunk),
                Ok(None) => {
                    self.closed = true;
                    return Err(DecoderError::ProcessExited);
                }
                Err(_) => {
                    return Err(DecoderError::ShortRead {
                        requested: n,
                        received: self.queue.len(),
                    })
                }
            }
        }

        Ok(self.queue.drain(..n).collect())
    }

    /// Move every chunk that is already waiting into the queue, without
    /// blocking. Returns the queued byte count afterwards.
    pub fn drain_ready(&mut self) -> usize {
        loop {
            match self.rx.try_recv() {
                Ok(chunk) => self.queue.extend(chunk),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    break;
                }
            }
        }
        self.queue.len()
    }

    /// Drop everything queued; returns how many bytes were dropped.
    pub fn discard(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }

    /// Stop accepting chunks; pending and future reads end.
    pub fn close(&mut self) {
        self.rx.close();
        self.closed = true;
    }
}

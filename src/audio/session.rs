//! # Codec Session Management
//!
//! Per-call codec state and the registry that owns it.
//!
//! ## Ownership:
//! - Each call has one [`SessionCodecState`] behind a `tokio::sync::Mutex`.
//!   Tokio's mutex is FIFO fair, so decode work for a call runs in arrival
//!   order even when several tasks queue on it.
//! - [`CodecRegistry`] maps call ids to sessions, bounded by `max_sessions`.
//!   When full, the oldest session is evicted and its decoder killed.

use crate::audio::buffer::{FrameBuffer, FrameBufferConfig};
use crate::audio::dedupe::FrameHash;
use crate::decoder::StreamingDecoder;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// BE violations logged at warn before switching to sampling.
const BE_VIOLATION_LOG_FIRST: u64 = 5;
/// After the first few, log every Nth violation.
const BE_VIOLATION_LOG_EVERY: u64 = 100;

/// Running counters for one call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CodecCounters {
    pub payloads: u64,
    pub accepted_frames: u64,
    pub duplicate_frames: u64,
    pub dropped_payloads: u64,
    pub decoded_frames: u64,
    pub decode_failures: u64,
    pub batches: u64,
    pub oneshot_batches: u64,
    pub be_violations: u64,
}

/// Which one-time log lines have already been emitted.
#[derive(Debug, Clone, Default)]
pub struct LogOnce {
    pub unsupported_encoding: bool,
    pub first_stream_decode: bool,
    pub decoder_spawn_failed: bool,
}

/// Everything the codec layer remembers about one call.
#[derive(Debug)]
pub struct SessionCodecState {
    pub call_id: String,

    /// Persistent decoder, spawned on the first batch.
    pub decoder: Option<StreamingDecoder>,

    /// False once the stream failed; every later batch goes one-shot.
    pub stream_usable: bool,

    pub buffer: FrameBuffer,

    /// Last frame accepted into the buffer (lag-1 at accept time).
    pub last_accepted_hash: Option<FrameHash>,

    /// Last frame sent to the decoder (lag-1 at batch time).
    pub last_decoded_hash: Option<FrameHash>,

    pub counters: CodecCounters,
    pub log_once: LogOnce,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl SessionCodecState {
    pub fn new(call_id: impl Into<String>, buffer_config: FrameBufferConfig) -> Self {
        let now = Utc::now();
        Self {
            call_id: call_id.into(),
            decoder: None,
            stream_usable: true,
            buffer: FrameBuffer::new(buffer_config),
            last_accepted_hash: None,
            last_decoded_hash: None,
            counters: CodecCounters::default(),
            log_once: LogOnce::default(),
            created_at: now,
            last_activity: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Count a BE policy violation; true when this one should be logged.
    ///
    /// The first five are logged, then every hundredth.
    pub fn record_be_violation(&mut self) -> bool {
        self.counters.be_violations += 1;
        let n = self.counters.be_violations;
        n <= BE_VIOLATION_LOG_FIRST || n % BE_VIOLATION_LOG_EVERY == 0
    }

    /// Stop using the persistent stream for the rest of the call.
    pub async fn disable_stream(&mut self) {
        self.stream_usable = false;
        if let Some(decoder) = self.decoder.take() {
            decoder.close().await;
        }
    }

    /// Kill the decoder and drop buffered frames.
    pub async fn close(&mut self) {
        if let Some(decoder) = self.decoder.take() {
            decoder.close().await;
        }
        let pending = self.buffer.len();
        self.buffer.clear();
        debug!(call_id = %self.call_id, pending_frames = pending, "codec session closed");
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            call_id: self.call_id.clone(),
            stream_active: self.decoder.is_some(),
            stream_usable: self.stream_usable,
            buffered_frames: self.buffer.len(),
            counters: self.counters.clone(),
            created_at: self.created_at,
            last_activity: self.last_activity,
            busy: false,
        }
    }
}

/// Serializable snapshot for the debug endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub call_id: String,
    pub stream_active: bool,
    pub stream_usable: bool,
    pub buffered_frames: usize,
    pub counters: CodecCounters,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Session was mid-decode when the snapshot was taken; counters omitted.
    pub busy: bool,
}

pub type SessionHandle = Arc<Mutex<SessionCodecState>>;

#[derive(Debug)]
struct RegistryEntry {
    handle: SessionHandle,
    seq: u64,
}

#[derive(Debug, Default)]
struct RegistryInner {
    sessions: HashMap<String, RegistryEntry>,
    next_seq: u64,
}

/// Bounded map of live codec sessions keyed by call id.
#[derive(Debug)]
pub struct CodecRegistry {
    inner: RwLock<RegistryInner>,
    max_sessions: usize,
    buffer_config: FrameBufferConfig,
}

impl CodecRegistry {
    pub fn new(max_sessions: usize, buffer_config: FrameBufferConfig) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            max_sessions: max_sessions.max(1),
            buffer_config,
        }
    }

    /// Get or create the session for `call_id`, evicting the oldest if full.
    pub async fn session(&self, call_id: &str) -> SessionHandle {
        if let Some(entry) = self.inner.read().await.sessions.get(call_id) {
            return entry.handle.clone();
        }

        let (handle, evicted) = {
            let mut inner = self.inner.write().await;
            if let Some(entry) = inner.sessions.get(call_id) {
                return entry.handle.clone();
            }

            let seq = inner.next_seq;
            inner.next_seq += 1;
            let handle: SessionHandle = Arc::new(Mutex::new(SessionCodecState::new(
                call_id,
                self.buffer_config.clone(),
            )));
            inner.sessions.insert(
                call_id.to_string(),
                RegistryEntry {
                    handle: handle.clone(),
                    seq,
                },
            );

            let mut evicted = Vec::new();
            while inner.sessions.len() > self.max_sessions {
                let oldest = inner
                    .sessions
                    .iter()
                    .min_by_key(|(_, e)| e.seq)
                    .map(|(id, _)| id.clone());
                match oldest.and_then(|id| inner.sessions.remove(&id).map(|e| (id, e))) {
                    Some(pair) => evicted.push(pair),
                    None => break,
                }
            }
            (handle, evicted)
        };

        for (id, entry) in evicted {
            warn!(call_id = %id, max_sessions = self.max_sessions, "evicting oldest codec session");
            entry.handle.lock().await.close().await;
        }

        info!(call_id = %call_id, "codec session created");
        handle
    }

    pub async fn get(&self, call_id: &str) -> Option<SessionHandle> {
        self.inner
            .read()
            .await
            .sessions
            .get(call_id)
            .map(|e| e.handle.clone())
    }

    /// Remove and close a session. Returns false if it did not exist.
    pub async fn close(&self, call_id: &str) -> bool {
        let entry = self.inner.write().await.sessions.remove(call_id);
        match entry {
            Some(entry) => {
                entry.handle.lock().await.close().await;
                true
            }
            None => false,
        }
    }

    /// Close the session only if `handle` is still the one registered for
    /// `call_id`. A worker that outlived its session must not close the
    /// replacement opened by a newer stream for the same call.
    pub async fn close_if_current(&self, call_id: &str, handle: &SessionHandle) -> bool {
        let entry = {
            let mut inner = self.inner.write().await;
            match inner.sessions.get(call_id) {
                Some(entry) if Arc::ptr_eq(&entry.handle, handle) => inner.sessions.remove(call_id),
                _ => None,
            }
        };
        match entry {
            Some(entry) => {
                entry.handle.lock().await.close().await;
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Snapshot of every session, oldest first. Sessions busy decoding are
    /// reported without waiting for them.
    pub async fn summaries(&self) -> Vec<SessionSummary> {
        let mut entries: Vec<(u64, String, SessionHandle)> = self
            .inner
            .read()
            .await
            .sessions
            .iter()
            .map(|(id, e)| (e.seq, id.clone(), e.handle.clone()))
            .collect();
        entries.sort_by_key(|(seq, _, _)| *seq);

        entries
            .into_iter()
            .map(|(_, id, handle)| match handle.try_lock() {
                Ok(state) => state.summary(),
                Err(_) => SessionSummary {
                    call_id: id,
                    stream_active: false,
                    stream_usable: false,
                    buffered_frames: 0,
                    counters: CodecCounters::default(),
                    created_at: Utc::now(),
                    last_activity: Utc::now(),
                    busy: true,
                },
            })
            .collect()
    }

    /// Close every session (shutdown).
    pub async fn close_all(&self) {
        let drained: Vec<RegistryEntry> = self.inner.write().await.sessions.drain().map(|(_, e)| e).collect();
        for entry in drained {
            entry.handle.lock().await.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::BufferedFrame;
    use std::time::Instant;

    fn registry(max: usize) -> CodecRegistry {
        CodecRegistry::new(max, FrameBufferConfig::default())
    }

    #[tokio::test]
    async fn test_session_is_reused() {
        let registry = registry(4);
        let a = registry.session("call-1").await;
        let b = registry.session("call-1").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_oldest_session_evicted() {
        let registry = registry(2);
        let first = registry.session("call-1").await;
        first
            .lock()
            .await
            .buffer
            .push(BufferedFrame::new(vec![0x04; 18]), Instant::now());

        registry.session("call-2").await;
        registry.session("call-3").await;

        assert_eq!(registry.len().await, 2);
        assert!(registry.get("call-1").await.is_none());
        assert!(registry.get("call-3").await.is_some());
        // The evicted session was closed, dropping its buffer.
        assert!(first.lock().await.buffer.is_empty());
    }

    #[tokio::test]
    async fn test_close_if_current_spares_replacement() {
        let registry = registry(4);
        let old = registry.session("call-r").await;
        assert!(registry.close("call-r").await);

        let newer = registry.session("call-r").await;
        assert!(!Arc::ptr_eq(&old, &newer));
        assert!(!registry.close_if_current("call-r", &old).await);
        assert!(registry.get("call-r").await.is_some());

        assert!(registry.close_if_current("call-r", &newer).await);
        assert!(registry.get("call-r").await.is_none());
    }

    #[tokio::test]
    async fn test_close_and_summaries() {
        let registry = registry(4);
        registry.session("call-a").await;
        registry.session("call-b").await;

        let summaries = registry.summaries().await;
        let ids: Vec<&str> = summaries.iter().map(|s| s.call_id.as_str()).collect();
        assert_eq!(ids, vec!["call-a", "call-b"]);

        assert!(registry.close("call-a").await);
        assert!(!registry.close("call-a").await);
        assert_eq!(registry.len().await, 1);

        registry.close_all().await;
        assert!(registry.is_empty().await);
    }

    #[test]
    fn test_be_violation_log_cap() {
        let mut state = SessionCodecState::new("call", FrameBufferConfig::default());
        let logged: Vec<u64> = (1..=300u64).filter(|_| state.record_be_violation()).collect();
        assert_eq!(logged, vec![1, 2, 3, 4, 5, 100, 200, 300]);
    }
}

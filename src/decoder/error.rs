//! Decoder subprocess errors.
//!
//! Any of these degrades the session, not the call: the persistent stream is
//! marked unusable and later batches go through the one-shot decoder.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("failed to spawn decoder: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to write to decoder stdin: {0}")]
    Write(#[source] std::io::Error),

    #[error("decoder process exited")]
    ProcessExited,

    #[error("short read: requested {requested} bytes, received {received}")]
    ShortRead { requested: usize, received: usize },

    #[error("decoder produced {bytes} unexpected carryover bytes")]
    Carryover { bytes: usize },

    #[error("decoder timed out")]
    Timeout,

    #[error("decoder exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },

    #[error("decoder not started")]
    NotStarted,
}

impl DecoderError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DecoderError::Spawn(_) => "spawn",
            DecoderError::Write(_) => "write",
            DecoderError::ProcessExited => "process_exited",
            DecoderError::ShortRead { .. } => "short_read",
            DecoderError::Carryover { .. } => "carryover",
            DecoderError::Timeout => "timeout",
            DecoderError::Exit { .. } => "exit",
            DecoderError::NotStarted => "not_started",
        }
    }

    /// Write errors on a closed pipe mean the process is gone.
    pub(crate) fn from_write(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::BrokenPipe {
            DecoderError::ProcessExited
        } else {
            DecoderError::Write(err)
        }
    }
}

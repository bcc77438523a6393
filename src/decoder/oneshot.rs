//! One-shot decoder: a fresh process per batch.
//!
//! Stdin is written from its own task while stdout is collected, so a large
//! batch cannot deadlock on a full pipe.

use crate::amrwb::STREAM_HEADER;
use crate::decoder::{ffmpeg_args, DecoderConfig, DecoderError};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

const STDERR_LOG_LIMIT: usize = 512;

/// Decode storage frames (header optional) into s16le PCM.
pub async fn decode_oneshot(config: &DecoderConfig, storage: &[u8], timeout: Duration) -> Result<Vec<u8>, DecoderError> {
    let mut child = Command::new(&config.ffmpeg_path)
        .args(ffmpeg_args(config.sample_rate_hz, false))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(DecoderError::Spawn)?;

    let mut stdin = child.stdin.take().ok_or(DecoderError::NotStarted)?;
    let mut input = Vec::with_capacity(STREAM_HEADER.len() + storage.len());
    if !storage.starts_with(STREAM_HEADER) {
        input.extend_from_slice(STREAM_HEADER);
    }
    input.extend_from_slice(storage);

    let writer = tokio::spawn(async move {
        let result = stdin.write_all(&input).await;
        drop(stdin);
        result
    });

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| DecoderError::Timeout)?
        .map_err(|_| DecoderError::ProcessExited)?;

    if let Ok(Err(e)) = writer.await {
        debug!(error = %e, "one-shot decoder closed stdin early");
    }

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr: String = stderr.trim().chars().take(STDERR_LOG_LIMIT).collect();
        return Err(DecoderError::Exit {
            status: output.status.to_string(),
            stderr,
        });
    }

    Ok(output.stdout)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn config(path: &str) -> DecoderConfig {
        DecoderConfig {
            ffmpeg_path: path.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let err = decode_oneshot(&config("/nonexistent/ffmpeg-binary"), &[0x04], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DecoderError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_failing_process_reports_exit() {
        let err = decode_oneshot(&config("false"), &[0x04], Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, DecoderError::Exit { .. }));
    }

    #[tokio::test]
    async fn test_successful_process_returns_stdout() {
        let pcm = decode_oneshot(&config("true"), &[0x04], Duration::from_secs(2)).await.unwrap();
        assert!(pcm.is_empty());
    }
}

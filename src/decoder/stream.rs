//! # Streaming Decoder Process
//!
//! One persistent decoder per call.
//!
//! ## Protocol:
//! 1. Spawn, write the `#!AMR-WB\n` header once
//! 2. Per batch: write the concatenated storage frames and flush
//! 3. Read exactly `speech_frames * 320 * 2` bytes of PCM
//! 4. Inspect what is left over (carryover)
//!
//! Carryover means the decoder emitted more than the batch justified, which
//! would shift every later read. Up to the grace it stays queued; beyond it the
//! batch fails in strict mode, otherwise the excess is discarded.
//!
//! Any error marks the stream unusable. The owner then switches to
//! [`crate::decoder::decode_oneshot`] for the rest of the call.

use crate::amrwb::STREAM_HEADER;
use crate::decoder::{expected_pcm_bytes, ffmpeg_args, DecoderConfig, DecoderError, ExactReader};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Stdout chunks buffered between the reader task and [`ExactReader`].
const STDOUT_CHANNEL_CAPACITY: usize = 64;
const STDOUT_CHUNK_BYTES: usize = 8192;

pub struct StreamingDecoder {
    child: Child,
    stdin: Option<ChildStdin>,
    reader: ExactReader,
    reader_task: JoinHandle<()>,
    stderr_task: Option<JoinHandle<()>>,
    config: DecoderConfig,
    call_id: String,
    completed_reads: u64,
    usable: bool,
}

impl StreamingDecoder {
    /// Launch the decoder and write the stream header.
    pub async fn spawn(config: DecoderConfig, call_id: &str) -> Result<Self, DecoderError> {
        let mut child = Command::new(&config.ffmpeg_path)
            .args(ffmpeg_args(config.sample_rate_hz, true))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(DecoderError::Spawn)?;

        let mut stdin = child.stdin.take().ok_or(DecoderError::NotStarted)?;
        let mut stdout = child.stdout.take().ok_or(DecoderError::NotStarted)?;
        let stderr = child.stderr.take();

        let (tx, rx) = mpsc::channel::<Vec<u8>>(STDOUT_CHANNEL_CAPACITY);
        let reader_call_id = call_id.to_string();
        let reader_task = tokio::spawn(async move {
            loop {
                let mut chunk = vec![0u8; STDOUT_CHUNK_BYTES];
                match stdout.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        chunk.truncate(n);
                        if tx.send(chunk).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(call_id = %reader_call_id, error = %e, "decoder stdout read failed");
                        break;
                    }
                }
            }
            debug!(call_id = %reader_call_id, "decoder stdout closed");
        });

        let stderr_task = stderr.map(|stderr| {
            let stderr_call_id = call_id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(call_id = %stderr_call_id, line = %line, "decoder stderr");
                }
            })
        });

        stdin.write_all(STREAM_HEADER).await.map_err(DecoderError::from_write)?;
        stdin.flush().await.map_err(DecoderError::from_write)?;

        info!(call_id = %call_id, pid = ?child.id(), "streaming AMR-WB decoder started");

        Ok(Self {
            child,
            stdin: Some(stdin),
            reader: ExactReader::new(rx),
            reader_task,
            stderr_task,
            config,
            call_id: call_id.to_string(),
            completed_reads: 0,
            usable: true,
        })
    }

    pub fn is_usable(&self) -> bool {
        self.usable
    }

    /// Decode one batch; returns exactly `speech_frames * 640` bytes of PCM.
    ///
    /// On any error the stream is marked unusable and stays that way.
    pub async fn decode_batch(&mut self, storage_frames: &[u8], speech_frames: usize) -> Result<Vec<u8>, DecoderError> {
        if !self.usable {
            return Err(DecoderError::ProcessExited);
        }
        let result = self.decode_inner(storage_frames, speech_frames).await;
        if let Err(e) = &result {
            warn!(
                call_id = %self.call_id,
                error = %e,
                kind = e.kind(),
                "streaming decoder failed, marking unusable"
            );
            self.usable = false;
        }
        result
    }

    async fn decode_inner(&mut self, storage_frames: &[u8], speech_frames: usize) -> Result<Vec<u8>, DecoderError> {
        let stdin = self.stdin.as_mut().ok_or(DecoderError::NotStarted)?;
        stdin.write_all(storage_frames).await.map_err(DecoderError::from_write)?;
        stdin.flush().await.map_err(DecoderError::from_write)?;

        let requested = expected_pcm_bytes(speech_frames);
        if requested == 0 {
            return Ok(Vec::new());
        }

        let timeout = if self.completed_reads == 0 {
            self.config.first_read_timeout
        } else {
            self.config.read_timeout
        };
        let pcm = self.reader.read_exact(requested, timeout).await?;
        self.completed_reads += 1;

        self.check_carryover()?;
        Ok(pcm)
    }

    fn check_carryover(&mut self) -> Result<(), DecoderError> {
        let extra = self.reader.drain_ready();
        if extra <= self.config.carryover_grace_bytes {
            return Ok(());
        }
        if self.config.strict {
            return Err(DecoderError::Carryover { bytes: extra });
        }
        let dropped = self.reader.discard();
        warn!(
            call_id = %self.call_id,
            bytes = dropped,
            grace = self.config.carryover_grace_bytes,
            "discarding decoder carryover"
        );
        Ok(())
    }

    /// Kill the process and end the stdout channel.
    pub async fn close(mut self) {
        self.stdin.take();
        self.reader.close();
        if let Err(e) = self.child.start_kill() {
            debug!(call_id = %self.call_id, error = %e, "decoder already gone");
        }
        let _ = self.child.wait().await;
        self.reader_task.abort();
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        debug!(call_id = %self.call_id, "streaming decoder closed");
    }
}

impl std::fmt::Debug for StreamingDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingDecoder")
            .field("call_id", &self.call_id)
            .field("pid", &self.child.id())
            .field("completed_reads", &self.completed_reads)
            .field("usable", &self.usable)
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::time::Duration;

    fn config(path: &str) -> DecoderConfig {
        DecoderConfig {
            ffmpeg_path: path.to_string(),
            first_read_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    fn frame() -> Vec<u8> {
        let mut bytes = vec![0x04];
        bytes.extend(vec![0u8; 17]);
        bytes
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let err = StreamingDecoder::spawn(config("/nonexistent/ffmpeg-binary"), "call-1")
            .await
            .unwrap_err();
        assert!(matches!(err, DecoderError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_exited_process_marks_stream_unusable() {
        // `true` ignores its arguments and exits at once.
        match StreamingDecoder::spawn(config("true"), "call-2").await {
            Err(DecoderError::ProcessExited) => {}
            Ok(mut decoder) => {
                let err = decoder.decode_batch(&frame(), 1).await.unwrap_err();
                assert!(matches!(err, DecoderError::ProcessExited));
                assert!(!decoder.is_usable());

                let again = decoder.decode_batch(&frame(), 1).await.unwrap_err();
                assert!(matches!(again, DecoderError::ProcessExited));
                decoder.close().await;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    /// Shell stand-in for ffmpeg that prints `bytes` zero bytes in one write,
    /// then idles until killed. It ignores its arguments and stdin.
    fn fake_decoder(dir: &Path, bytes: usize) -> String {
        let path = dir.join(format!("decoder-{bytes}.sh"));
        let script = format!("#!/bin/sh\nhead -c {bytes} /dev/zero\nexec sleep 5\n");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    async fn spawn_fake(path: &str, strict: bool) -> StreamingDecoder {
        let config = DecoderConfig {
            strict,
            ..config(path)
        };
        // A freshly written script can briefly report ETXTBSY while another
        // test thread is forking.
        for _ in 0..20 {
            match StreamingDecoder::spawn(config.clone(), "call-carry").await {
                Ok(decoder) => return decoder,
                Err(DecoderError::Spawn(e)) if e.raw_os_error() == Some(26) => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(e) => panic!("spawn failed: {e}"),
            }
        }
        panic!("fake decoder stayed busy");
    }

    #[tokio::test]
    async fn test_carryover_within_grace_stays_queued() {
        let dir = tempfile::tempdir().unwrap();
        let path = fake_decoder(dir.path(), 640 + 32);
        let mut decoder = spawn_fake(&path, true).await;

        let pcm = decoder.decode_batch(&frame(), 1).await.unwrap();
        assert_eq!(pcm.len(), 640);
        assert!(decoder.is_usable());
        assert_eq!(decoder.reader.queued(), 32);
        decoder.close().await;
    }

    #[tokio::test]
    async fn test_strict_carryover_beyond_grace_fails_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = fake_decoder(dir.path(), 2000);
        let mut decoder = spawn_fake(&path, true).await;

        let err = decoder.decode_batch(&frame(), 1).await.unwrap_err();
        assert!(matches!(err, DecoderError::Carryover { bytes: 1360 }));
        assert!(!decoder.is_usable());
        decoder.close().await;
    }

    #[tokio::test]
    async fn test_lenient_carryover_beyond_grace_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = fake_decoder(dir.path(), 2000);
        let mut decoder = spawn_fake(&path, false).await;

        let pcm = decoder.decode_batch(&frame(), 1).await.unwrap();
        assert_eq!(pcm.len(), 640);
        assert!(decoder.is_usable());
        assert_eq!(decoder.reader.queued(), 0);
        decoder.close().await;
    }
}

//! # Artifact Capture
//!
//! Optional debugging output: every accepted AMR-WB storage frame of a call is
//! appended to `<dir>/<call_id>.amr`, a file any AMR-WB player can open.
//!
//! State is keyed by the sanitized path, so call ids that sanitize to the same
//! file share one writer. Appends to one path are serialized by a per-path
//! async mutex. Each path keeps
//! a [`DedupeWindow`] of recent frame hashes, seeded from the frames already in
//! the file so a reconnecting call does not write the same audio twice.

use crate::amrwb::storage::split_storage_frames;
use crate::amrwb::STREAM_HEADER;
use crate::audio::dedupe::{frame_hash, DedupeWindow};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Outcome of one append.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendStats {
    pub written: usize,
    pub skipped_duplicates: usize,
}

#[derive(Debug)]
struct ArtifactFile {
    path: PathBuf,
    /// `None` until seeded from disk on first use.
    window: Option<DedupeWindow>,
}

/// Appends storage frames to per-call artifact files.
#[derive(Debug)]
pub struct ArtifactWriter {
    dir: PathBuf,
    window_size: usize,
    files: Mutex<HashMap<PathBuf, Arc<Mutex<ArtifactFile>>>>,
}

impl ArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>, window_size: usize) -> Self {
        Self {
            dir: dir.into(),
            window_size,
            files: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Artifact path for a call; anything but `[A-Za-z0-9_-]` becomes `_`.
    pub fn path_for(&self, call_id: &str) -> PathBuf {
        let safe: String = call_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let name = if safe.is_empty() { "unknown".to_string() } else { safe };
        self.dir.join(format!("{}.amr", name))
    }

    async fn file_for(&self, call_id: &str) -> Arc<Mutex<ArtifactFile>> {
        let path = self.path_for(call_id);
        let mut files = self.files.lock().await;
        files
            .entry(path.clone())
            .or_insert_with(|| Arc::new(Mutex::new(ArtifactFile { path, window: None })))
            .clone()
    }

    /// Append frames not already present in the recent window.
    pub async fn append(&self, call_id: &str, frames: &[Vec<u8>]) -> Result<AppendStats> {
        if frames.is_empty() {
            return Ok(AppendStats::default());
        }

        let file = self.file_for(call_id).await;
        let mut file = file.lock().await;

        if file.window.is_none() {
            let window = seed_window(&file.path, self.window_size).await;
            file.window = Some(window);
        }

        let mut stats = AppendStats::default();
        let mut out = Vec::new();
        if let Some(window) = file.window.as_mut() {
            for frame in frames {
                if window.insert(frame_hash(frame)) {
                    out.extend_from_slice(frame);
                    stats.written += 1;
                } else {
                    stats.skipped_duplicates += 1;
                }
            }
        }

        if out.is_empty() {
            return Ok(stats);
        }

        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating artifact dir {}", self.dir.display()))?;

        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file.path)
            .await
            .with_context(|| format!("opening artifact {}", file.path.display()))?;

        let is_new = handle.metadata().await.map(|m| m.len() == 0).unwrap_or(true);
        if is_new {
            handle.write_all(STREAM_HEADER).await?;
        }
        handle.write_all(&out).await?;
        handle.flush().await?;

        debug!(
            call_id = %call_id,
            written = stats.written,
            skipped = stats.skipped_duplicates,
            "artifact frames appended"
        );
        Ok(stats)
    }

    /// Forget per-call state once the call ends. The file stays on disk and
    /// the next append re-seeds its window from it.
    pub async fn release(&self, call_id: &str) {
        let path = self.path_for(call_id);
        self.files.lock().await.remove(&path);
    }

    pub async fn open_files(&self) -> usize {
        self.files.lock().await.len()
    }
}

/// Build a window from the last `size` frames of an existing artifact.
async fn seed_window(path: &Path, size: usize) -> DedupeWindow {
    let mut window = DedupeWindow::new(size);
    match fs::read(path).await {
        Ok(bytes) => {
            let frames = split_storage_frames(&bytes);
            let skip = frames.len().saturating_sub(size);
            window.seed(frames.into_iter().skip(skip));
            debug!(path = %path.display(), seeded = window.len(), "artifact dedupe window seeded");
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not read artifact for seeding"),
    }
    window
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8) -> Vec<u8> {
        let mut bytes = vec![0x04];
        bytes.extend(vec![tag; 17]);
        bytes
    }

    #[tokio::test]
    async fn test_creates_file_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path(), 32);

        let stats = writer.append("call-a", &[frame(1), frame(2)]).await.unwrap();
        assert_eq!(stats.written, 2);

        let bytes = std::fs::read(writer.path_for("call-a")).unwrap();
        assert!(bytes.starts_with(STREAM_HEADER));
        assert_eq!(bytes.len(), STREAM_HEADER.len() + 2 * 18);
    }

    #[tokio::test]
    async fn test_window_skips_replayed_frames() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path(), 32);

        writer.append("call-b", &[frame(1), frame(2)]).await.unwrap();
        let stats = writer.append("call-b", &[frame(2), frame(1), frame(3)]).await.unwrap();
        assert_eq!(stats, AppendStats { written: 1, skipped_duplicates: 2 });

        let bytes = std::fs::read(writer.path_for("call-b")).unwrap();
        assert_eq!(split_storage_frames(&bytes).len(), 3);
    }

    #[tokio::test]
    async fn test_window_seeded_from_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let first = ArtifactWriter::new(dir.path(), 32);
        first.append("call-c", &[frame(7), frame(8)]).await.unwrap();

        // A fresh writer (e.g. after a restart) must not rewrite those frames.
        let second = ArtifactWriter::new(dir.path(), 32);
        let stats = second.append("call-c", &[frame(8), frame(9)]).await.unwrap();
        assert_eq!(stats.written, 1);

        let bytes = std::fs::read(second.path_for("call-c")).unwrap();
        assert_eq!(bytes.windows(STREAM_HEADER.len()).filter(|w| *w == STREAM_HEADER).count(), 1);
        assert_eq!(split_storage_frames(&bytes).len(), 3);
    }

    #[tokio::test]
    async fn test_release_and_path_sanitizing() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path(), 4);
        assert_eq!(writer.path_for("../etc/passwd"), dir.path().join("___etc_passwd.amr"));

        writer.append("call-d", &[frame(1)]).await.unwrap();
        assert_eq!(writer.open_files().await, 1);
        writer.release("call-d").await;
        assert_eq!(writer.open_files().await, 0);
    }

    #[tokio::test]
    async fn test_colliding_call_ids_share_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path(), 32);
        assert_eq!(writer.path_for("v3:abc"), writer.path_for("v3_abc"));

        writer.append("v3:abc", &[frame(1), frame(2)]).await.unwrap();
        let stats = writer.append("v3_abc", &[frame(2), frame(3)]).await.unwrap();
        assert_eq!(stats, AppendStats { written: 1, skipped_duplicates: 1 });
        assert_eq!(writer.open_files().await, 1);

        let bytes = std::fs::read(writer.path_for("v3_abc")).unwrap();
        assert_eq!(bytes.windows(STREAM_HEADER.len()).filter(|w| *w == STREAM_HEADER).count(), 1);
        assert_eq!(split_storage_frames(&bytes).len(), 3);

        writer.release("v3_abc").await;
        assert_eq!(writer.open_files().await, 0);
    }
}

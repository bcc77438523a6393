//! # AMR-WB Decoder Subprocess
//!
//! AMR-WB is decoded by an external `ffmpeg` process reading storage frames on
//! stdin and writing mono s16le PCM on stdout.
//!
//! ## Modes:
//! - **stream**: one long-lived process per call, fed batch by batch, with
//!   exact-byte reads so every batch gets precisely its own PCM
//! - **oneshot**: a fresh process per batch; slower but self-healing, used
//!   once the stream has failed

pub mod error;
pub mod exact_read;
pub mod oneshot;
pub mod stream;

pub use error::DecoderError;
pub use exact_read::ExactReader;
pub use oneshot::decode_oneshot;
pub use stream::StreamingDecoder;

use std::time::Duration;

/// Everything needed to launch and drive a decoder process.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Executable to run, usually `ffmpeg`
    pub ffmpeg_path: String,

    /// Output sample rate; 16 kHz gives 320 samples per 20 ms frame
    pub sample_rate_hz: u32,

    /// Timeout for the first read, which also absorbs process startup
    pub first_read_timeout: Duration,

    /// Timeout for every later read
    pub read_timeout: Duration,

    /// Extra output bytes tolerated after an exact read
    pub carryover_grace_bytes: usize,

    /// Fail the batch on carryover beyond the grace instead of discarding it
    pub strict: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            sample_rate_hz: 16000,
            first_read_timeout: Duration::from_millis(3000),
            read_timeout: Duration::from_millis(750),
            carryover_grace_bytes: 64,
            strict: false,
        }
    }
}

/// Bytes of s16le PCM expected for `speech_frames` frames at 16 kHz.
pub fn expected_pcm_bytes(speech_frames: usize) -> usize {
    speech_frames * crate::amrwb::frame::SAMPLES_PER_FRAME * 2
}

/// ffmpeg arguments: AMR-WB storage on stdin, mono s16le on stdout.
///
/// `streaming` adds flags that stop ffmpeg from probing and buffering so each
/// batch is decoded as soon as it is written.
pub(crate) fn ffmpeg_args(sample_rate_hz: u32, streaming: bool) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];
    if streaming {
        args.extend(
            ["-fflags", "nobuffer", "-probesize", "32", "-analyzeduration", "0"]
                .iter()
                .map(|s| s.to_string()),
        );
    }
    args.extend(["-f", "amrwb", "-i", "pipe:0", "-f", "s16le", "-ac", "1", "-ar"].iter().map(|s| s.to_string()));
    args.push(sample_rate_hz.to_string());
    if streaming {
        args.extend(["-flush_packets", "1"].iter().map(|s| s.to_string()));
    }
    args.push("pipe:1".into());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_pcm_bytes() {
        assert_eq!(expected_pcm_bytes(1), 640);
        assert_eq!(expected_pcm_bytes(20), 12800);
        assert_eq!(expected_pcm_bytes(0), 0);
    }

    #[test]
    fn test_ffmpeg_args() {
        let oneshot = ffmpeg_args(16000, false);
        assert_eq!(oneshot.first().map(String::as_str), Some("-hide_banner"));
        assert_eq!(oneshot.last().map(String::as_str), Some("pipe:1"));
        assert!(oneshot.windows(2).any(|w| w[0] == "-ar" && w[1] == "16000"));
        assert!(!oneshot.contains(&"-flush_packets".to_string()));

        let streaming = ffmpeg_args(16000, true);
        assert!(streaming.contains(&"nobuffer".to_string()));
        assert!(streaming.windows(2).any(|w| w[0] == "-f" && w[1] == "amrwb"));
    }
}

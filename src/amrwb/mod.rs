//! # AMR-WB Payload Handling
//!
//! Turns vendor AMR-WB payloads into canonical "storage frames": one TOC byte
//! with F=0 followed by the frame's payload bytes, the format the external
//! decoder reads after the `#!AMR-WB\n` header.
//!
//! ## Pipeline:
//! 1. **rtp**: strip an RTP header if the vendor left one on
//! 2. **classify**: decide whether the bytes are already storage frames
//! 3. **bandwidth_efficient / octet / storage**: depacketize
//! 4. **transcode**: the single policy gate tying the above together
//! 5. **candidate**: score alternative parses and keep the best one
//!
//! Parse failures are values, not panics: every parser returns a
//! [`ParseError`] whose [`ParseError::reason`] is a stable string such as
//! `invalid_ft_13` or `frame_overflow_ft_8`.

pub mod bandwidth_efficient;
pub mod candidate;
pub mod classify;
pub mod frame;
pub mod octet;
pub mod rtp;
pub mod storage;
pub mod transcode;

pub use candidate::select_candidate;
pub use frame::{AmrWbFrame, FrameKind, STREAM_HEADER};
pub use transcode::{transcode, BePolicy, TranscodeOptions};

use serde::Serialize;
use thiserror::Error;

/// Why a payload could not be depacketized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("reserved frame type {0}")]
    InvalidFrameType(u8),

    #[error("frame type {0} payload runs past the end of the input")]
    FrameOverflow(u8),

    #[error("SID payload runs past the end of the input")]
    SidOverflow,

    #[error("storage TOC has the follow bit set")]
    StorageFollowBit,

    #[error("no TOC entry found")]
    MissingToc,

    #[error("payload is empty")]
    EmptyPayload,

    #[error("{0} unparsed bytes after the last frame")]
    TrailingBytes(usize),

    #[error("{0} unparsed bits after the last bandwidth-efficient frame")]
    BeTrailingBits(usize),
}

impl ParseError {
    /// Overflow error for a frame type, using the SID-specific variant for FT 9.
    pub fn overflow(frame_type: u8) -> Self {
        if frame_type == frame::FT_SID {
            ParseError::SidOverflow
        } else {
            ParseError::FrameOverflow(frame_type)
        }
    }

    /// Stable, machine-readable reason string for logs and API responses.
    pub fn reason(&self) -> String {
        match self {
            ParseError::InvalidFrameType(ft) => format!("invalid_ft_{}", ft),
            ParseError::FrameOverflow(ft) => format!("frame_overflow_ft_{}", ft),
            ParseError::SidOverflow => "sid_overflow".to_string(),
            ParseError::StorageFollowBit => "storage_follow_bit".to_string(),
            ParseError::MissingToc => "missing_toc".to_string(),
            ParseError::EmptyPayload => "empty_payload".to_string(),
            ParseError::TrailingBytes(n) => format!("trailing_bytes_{}", n),
            ParseError::BeTrailingBits(n) => format!("be_trailing_bits_{}", n),
        }
    }

    pub fn is_invalid_frame_type(&self) -> bool {
        matches!(self, ParseError::InvalidFrameType(_))
    }
}

/// How the payload was packed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Packing {
    /// Already storage frames (TOC byte + payload, F=0).
    Storage,
    /// RFC 4867 bandwidth-efficient mode.
    BandwidthEfficient { cmr: u8 },
    /// RFC 4867 octet-aligned mode, with or without the CMR byte.
    OctetAligned { cmr: Option<u8> },
    /// Nothing parsed.
    Invalid,
}

impl Packing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Packing::Storage => "storage",
            Packing::BandwidthEfficient { .. } => "be",
            Packing::OctetAligned { .. } => "octet",
            Packing::Invalid => "invalid",
        }
    }

    /// True when a CMR field was present on the wire and dropped during repacking.
    pub fn cmr_stripped(&self) -> bool {
        matches!(
            self,
            Packing::BandwidthEfficient { .. } | Packing::OctetAligned { cmr: Some(_) }
        )
    }
}

/// Output of any depacketizer: the frames plus their canonical storage bytes.
///
/// `storage_bytes` always starts with [`STREAM_HEADER`]; the per-kind counters
/// are derived from `frames` once and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepacketizeResult {
    pub packing: Packing,
    pub storage_bytes: Vec<u8>,
    pub frames: Vec<AmrWbFrame>,
    pub frame_kinds: Vec<FrameKind>,
    pub total_frames: usize,
    /// Speech frames only (FT 0-8).
    pub decoded_frames: usize,
    pub sid_frames: usize,
    pub no_data_frames: usize,
    pub speech_lost_frames: usize,
}

impl DepacketizeResult {
    pub fn from_frames(packing: Packing, frames: Vec<AmrWbFrame>) -> Self {
        let frame_kinds: Vec<FrameKind> = frames.iter().map(AmrWbFrame::kind).collect();
        let count = |kind: FrameKind| frame_kinds.iter().filter(|k| **k == kind).count();

        let mut storage_bytes = Vec::with_capacity(
            STREAM_HEADER.len() + frames.iter().map(AmrWbFrame::storage_len).sum::<usize>(),
        );
        storage_bytes.extend_from_slice(STREAM_HEADER);
        for frame in &frames {
            storage_bytes.extend_from_slice(&frame.to_storage());
        }

        Self {
            packing,
            total_frames: frames.len(),
            decoded_frames: count(FrameKind::Speech),
            sid_frames: count(FrameKind::Sid),
            no_data_frames: count(FrameKind::NoData),
            speech_lost_frames: count(FrameKind::SpeechLost),
            storage_bytes,
            frames,
            frame_kinds,
        }
    }

    /// Storage bytes without the leading stream header.
    pub fn frame_bytes(&self) -> &[u8] {
        &self.storage_bytes[STREAM_HEADER.len()..]
    }

    /// Frames that are not speech (SID, no data, speech lost).
    pub fn non_speech_frames(&self) -> usize {
        self.sid_frames + self.no_data_frames + self.speech_lost_frames
    }
}

/// Lowercase hex of the first `max` bytes, for log lines.
pub fn hex_prefix(bytes: &[u8], max: usize) -> String {
    hex::encode(&bytes[..bytes.len().min(max)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_counts_by_kind() {
        let frames = vec![
            AmrWbFrame::new(2, true, vec![1; 32]).unwrap(),
            AmrWbFrame::new(frame::FT_SID, true, vec![2; 5]).unwrap(),
            AmrWbFrame::new(frame::FT_NO_DATA, false, vec![]).unwrap(),
            AmrWbFrame::new(frame::FT_SPEECH_LOST, false, vec![]).unwrap(),
        ];
        let result = DepacketizeResult::from_frames(Packing::Storage, frames);

        assert_eq!(result.total_frames, 4);
        assert_eq!(result.decoded_frames, 1);
        assert_eq!(result.sid_frames, 1);
        assert_eq!(result.no_data_frames, 1);
        assert_eq!(result.speech_lost_frames, 1);
        assert_eq!(result.non_speech_frames(), 3);
        assert!(result.storage_bytes.starts_with(STREAM_HEADER));
        assert_eq!(result.frame_bytes().len(), 33 + 6 + 1 + 1);
    }

    #[test]
    fn test_packing_cmr_stripped() {
        assert!(Packing::BandwidthEfficient { cmr: 15 }.cmr_stripped());
        assert!(Packing::OctetAligned { cmr: Some(0xF0) }.cmr_stripped());
        assert!(!Packing::OctetAligned { cmr: None }.cmr_stripped());
        assert!(!Packing::Storage.cmr_stripped());
    }
}

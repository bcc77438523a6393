//! # AMR-WB Frame Table
//!
//! Static lookup from frame type (FT, 0-15) to payload size. Every parser in
//! the `amrwb` module goes through this table, so a storage frame's declared
//! size always matches what the decoder expects for its FT.
//!
//! ## Frame Types:
//! - **0-8**: speech modes 6.60 through 23.85 kbit/s
//! - **9**: SID (comfort noise parameters)
//! - **10-13**: reserved, always rejected
//! - **14**: speech lost (no payload)
//! - **15**: no data (no payload)

use crate::amrwb::ParseError;
use serde::Serialize;

/// ASCII magic that starts every AMR-WB storage stream (RFC 4867 section 5).
pub const STREAM_HEADER: &[u8] = b"#!AMR-WB\n";

/// Samples produced per frame at the decoder's 16 kHz output rate (20 ms).
pub const SAMPLES_PER_FRAME: usize = 320;

/// Frame type of the SID frame.
pub const FT_SID: u8 = 9;

/// Frame type signalling a lost speech frame.
pub const FT_SPEECH_LOST: u8 = 14;

/// Frame type signalling no transmitted data.
pub const FT_NO_DATA: u8 = 15;

/// Payload bytes per speech frame type 0-8.
const SPEECH_BYTES: [usize; 9] = [17, 23, 32, 36, 40, 46, 50, 58, 60];

/// Exact payload bits per speech frame type 0-8, as packed in BE mode.
const SPEECH_BITS: [usize; 9] = [132, 177, 253, 285, 317, 365, 397, 461, 477];

const SID_BYTES: usize = 5;
const SID_BITS: usize = 40;

/// What a frame carries, derived from its frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    Speech,
    Sid,
    NoData,
    SpeechLost,
}

impl FrameKind {
    /// Classify a frame type, rejecting the reserved range.
    pub fn from_frame_type(ft: u8) -> Result<Self, ParseError> {
        match ft {
            0..=8 => Ok(FrameKind::Speech),
            FT_SID => Ok(FrameKind::Sid),
            FT_SPEECH_LOST => Ok(FrameKind::SpeechLost),
            FT_NO_DATA => Ok(FrameKind::NoData),
            other => Err(ParseError::InvalidFrameType(other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Speech => "speech",
            FrameKind::Sid => "sid",
            FrameKind::NoData => "no_data",
            FrameKind::SpeechLost => "speech_lost",
        }
    }
}

/// True for the reserved frame types 10-13 (and anything out of the 4-bit range).
pub fn is_reserved(ft: u8) -> bool {
    matches!(ft, 10..=13) || ft > 15
}

/// Payload size in bytes for a frame type.
pub fn payload_bytes(ft: u8) -> Result<usize, ParseError> {
    match FrameKind::from_frame_type(ft)? {
        FrameKind::Speech => Ok(SPEECH_BYTES[ft as usize]),
        FrameKind::Sid => Ok(SID_BYTES),
        FrameKind::NoData | FrameKind::SpeechLost => Ok(0),
    }
}

/// Payload size in bits for a frame type, used by the bandwidth-efficient reader.
pub fn payload_bits(ft: u8) -> Result<usize, ParseError> {
    match FrameKind::from_frame_type(ft)? {
        FrameKind::Speech => Ok(SPEECH_BITS[ft as usize]),
        FrameKind::Sid => Ok(SID_BITS),
        FrameKind::NoData | FrameKind::SpeechLost => Ok(0),
    }
}

/// Decoded octet-aligned TOC byte: `F | FT(4) | Q | P P`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Toc {
    pub follow: bool,
    pub frame_type: u8,
    pub quality: bool,
}

impl Toc {
    pub fn from_byte(byte: u8) -> Self {
        Self {
            follow: byte & 0x80 != 0,
            frame_type: (byte >> 3) & 0x0F,
            quality: byte & 0x04 != 0,
        }
    }

    pub fn to_byte(&self) -> u8 {
        let mut byte = (self.frame_type & 0x0F) << 3;
        if self.follow {
            byte |= 0x80;
        }
        if self.quality {
            byte |= 0x04;
        }
        byte
    }
}

/// A single parsed AMR-WB frame.
///
/// Immutable once parsed; the payload length always equals the table entry
/// for `frame_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmrWbFrame {
    pub frame_type: u8,
    pub quality: bool,
    pub payload: Vec<u8>,
}

impl AmrWbFrame {
    /// Build a frame, checking the payload length against the table.
    pub fn new(frame_type: u8, quality: bool, payload: Vec<u8>) -> Result<Self, ParseError> {
        let expected = payload_bytes(frame_type)?;
        if payload.len() != expected {
            return Err(ParseError::overflow(frame_type));
        }
        Ok(Self {
            frame_type,
            quality,
            payload,
        })
    }

    pub fn kind(&self) -> FrameKind {
        // The constructor already rejected reserved types.
        FrameKind::from_frame_type(self.frame_type).unwrap_or(FrameKind::NoData)
    }

    pub fn is_speech(&self) -> bool {
        self.kind() == FrameKind::Speech
    }

    /// Storage TOC byte: F is always 0.
    pub fn storage_toc(&self) -> u8 {
        Toc {
            follow: false,
            frame_type: self.frame_type,
            quality: self.quality,
        }
        .to_byte()
    }

    /// Serialize as a storage frame (TOC byte + payload).
    pub fn to_storage(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.payload.len());
        out.push(self.storage_toc());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn storage_len(&self) -> usize {
        1 + self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_sizes() {
        let expected = [17, 23, 32, 36, 40, 46, 50, 58, 60];
        for (ft, bytes) in expected.iter().enumerate() {
            assert_eq!(payload_bytes(ft as u8).unwrap(), *bytes);
            // Bit widths always round up to the byte size.
            assert_eq!((payload_bits(ft as u8).unwrap() + 7) / 8, *bytes);
        }
        assert_eq!(payload_bytes(FT_SID).unwrap(), 5);
        assert_eq!(payload_bytes(FT_SPEECH_LOST).unwrap(), 0);
        assert_eq!(payload_bytes(FT_NO_DATA).unwrap(), 0);
    }

    #[test]
    fn test_reserved_types_rejected() {
        for ft in 10..=13u8 {
            let err = payload_bytes(ft).unwrap_err();
            assert_eq!(err.reason(), format!("invalid_ft_{}", ft));
            assert!(is_reserved(ft));
        }
    }

    #[test]
    fn test_toc_byte_layout() {
        let toc = Toc::from_byte(0x14);
        assert!(!toc.follow);
        assert_eq!(toc.frame_type, 2);
        assert!(toc.quality);
        assert_eq!(toc.to_byte(), 0x14);

        let toc = Toc::from_byte(0xF1);
        assert!(toc.follow);
        assert_eq!(toc.frame_type, 14);
        assert!(!toc.quality);
    }

    #[test]
    fn test_storage_toc_clears_follow_bit() {
        let frame = AmrWbFrame::new(8, true, vec![0xAA; 60]).unwrap();
        let storage = frame.to_storage();
        assert_eq!(storage.len(), 61);
        assert_eq!(storage[0] & 0x80, 0);
        assert_eq!(storage[0], 0x44);
    }

    #[test]
    fn test_frame_rejects_wrong_payload_size() {
        assert!(AmrWbFrame::new(0, true, vec![0; 16]).is_err());
        assert!(AmrWbFrame::new(FT_NO_DATA, false, vec![]).is_ok());
    }
}

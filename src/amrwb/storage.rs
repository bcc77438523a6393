//! Storage-frame parser.
//!
//! Storage layout interleaves TOC and payload: `TOC | payload | TOC | payload`,
//! every TOC with F=0. An optional `#!AMR-WB\n` header is skipped.

use crate::amrwb::frame::{self, AmrWbFrame, Toc, STREAM_HEADER};
use crate::amrwb::{DepacketizeResult, Packing, ParseError};

/// Parse a buffer of storage frames into a [`DepacketizeResult`].
pub fn parse_storage(data: &[u8]) -> Result<DepacketizeResult, ParseError> {
    let frames = parse_storage_frames(data)?;
    Ok(DepacketizeResult::from_frames(Packing::Storage, frames))
}

/// Parse storage frames, returning the frames themselves.
pub fn parse_storage_frames(data: &[u8]) -> Result<Vec<AmrWbFrame>, ParseError> {
    let body = data.strip_prefix(STREAM_HEADER).unwrap_or(data);
    if body.is_empty() {
        return Err(ParseError::EmptyPayload);
    }

    let mut frames = Vec::new();
    let mut offset = 0;
    while offset < body.len() {
        let toc = Toc::from_byte(body[offset]);
        if toc.follow {
            return Err(ParseError::StorageFollowBit);
        }
        let size = frame::payload_bytes(toc.frame_type)?;
        let start = offset + 1;
        let end = start + size;
        if end > body.len() {
            return Err(ParseError::overflow(toc.frame_type));
        }
        frames.push(AmrWbFrame::new(
            toc.frame_type,
            toc.quality,
            body[start..end].to_vec(),
        )?);
        offset = end;
    }

    Ok(frames)
}

/// Split a storage buffer into per-frame byte slices (TOC + payload).
///
/// Used by the artifact writer to re-hash frames already on disk; stops at the
/// first malformed frame instead of failing.
pub fn split_storage_frames(data: &[u8]) -> Vec<&[u8]> {
    let body = data.strip_prefix(STREAM_HEADER).unwrap_or(data);
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < body.len() {
        let toc = Toc::from_byte(body[offset]);
        let Ok(size) = frame::payload_bytes(toc.frame_type) else {
            break;
        };
        let end = offset + 1 + size;
        if toc.follow || end > body.len() {
            break;
        }
        out.push(&body[offset..end]);
        offset = end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amrwb::frame::FrameKind;

    fn storage_frame(ft: u8, fill: u8) -> Vec<u8> {
        let size = frame::payload_bytes(ft).unwrap();
        let mut out = vec![(ft << 3) | 0x04];
        out.extend(std::iter::repeat(fill).take(size));
        out
    }

    #[test]
    fn test_round_trip_reproduces_bytes() {
        let mut bytes = STREAM_HEADER.to_vec();
        for (ft, fill) in [(0u8, 1u8), (8, 2), (9, 3), (15, 0), (2, 4), (14, 0)] {
            bytes.extend(storage_frame(ft, fill));
        }

        let result = parse_storage(&bytes).unwrap();
        assert_eq!(result.storage_bytes, bytes);
        assert_eq!(result.total_frames, 6);
        assert_eq!(result.decoded_frames, 3);
        assert_eq!(result.frame_kinds[2], FrameKind::Sid);
    }

    #[test]
    fn test_header_is_optional() {
        let bytes = storage_frame(1, 7);
        let result = parse_storage(&bytes).unwrap();
        assert_eq!(result.frames[0].payload.len(), 23);
        assert_eq!(result.frame_bytes(), bytes.as_slice());
    }

    #[test]
    fn test_rejects_follow_bit_and_reserved_types() {
        let mut bytes = storage_frame(2, 0);
        bytes[0] |= 0x80;
        assert_eq!(parse_storage(&bytes).unwrap_err(), ParseError::StorageFollowBit);

        for ft in 10..=13u8 {
            let err = parse_storage(&[ft << 3, 0, 0]).unwrap_err();
            assert_eq!(err.reason(), format!("invalid_ft_{}", ft));
        }
    }

    #[test]
    fn test_truncated_frame_overflows() {
        let mut bytes = storage_frame(8, 1);
        bytes.pop();
        assert_eq!(parse_storage(&bytes).unwrap_err().reason(), "frame_overflow_ft_8");

        let mut sid = storage_frame(9, 1);
        sid.pop();
        assert_eq!(parse_storage(&sid).unwrap_err().reason(), "sid_overflow");
    }

    #[test]
    fn test_header_only_is_empty() {
        assert_eq!(parse_storage(STREAM_HEADER).unwrap_err(), ParseError::EmptyPayload);
    }

    #[test]
    fn test_split_stops_at_garbage() {
        let mut bytes = STREAM_HEADER.to_vec();
        bytes.extend(storage_frame(0, 1));
        bytes.extend(storage_frame(0, 2));
        bytes.extend([0x68, 0x00]);
        let frames = split_storage_frames(&bytes);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1][1], 2);
    }
}

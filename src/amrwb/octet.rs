//! Octet-aligned depacketizer (RFC 4867 section 4.4).
//!
//! Layout: `[CMR byte] TOC TOC ... TOC payload payload ... payload`, where every
//! TOC but the last has F=1. Two variants are supported because vendors differ
//! on whether the CMR byte is sent; see [`parse_octet_auto`].

use crate::amrwb::frame::{self, AmrWbFrame, Toc};
use crate::amrwb::{DepacketizeResult, Packing, ParseError};

/// Which octet-aligned variant to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmrMode {
    /// First byte is the CMR; TOC list starts at offset 1.
    Present,
    /// TOC list starts at offset 0.
    Absent,
}

/// Parse one octet-aligned variant.
pub fn parse_octet(data: &[u8], mode: CmrMode) -> Result<DepacketizeResult, ParseError> {
    if data.is_empty() {
        return Err(ParseError::EmptyPayload);
    }

    let (cmr, toc_start) = match mode {
        CmrMode::Present => (Some(data[0] >> 4), 1),
        CmrMode::Absent => (None, 0),
    };

    let (tocs, mut offset) = read_toc_chain(data, toc_start)?;

    let mut frames = Vec::with_capacity(tocs.len());
    for toc in tocs {
        let size = frame::payload_bytes(toc.frame_type)?;
        let end = offset + size;
        if end > data.len() {
            return Err(ParseError::overflow(toc.frame_type));
        }
        frames.push(AmrWbFrame::new(
            toc.frame_type,
            toc.quality,
            data[offset..end].to_vec(),
        )?);
        offset = end;
    }

    if offset != data.len() {
        return Err(ParseError::TrailingBytes(data.len() - offset));
    }

    Ok(DepacketizeResult::from_frames(
        Packing::OctetAligned { cmr },
        frames,
    ))
}

/// Try CMR-present first (when allowed), then CMR-absent; the first variant
/// that fully validates wins. On total failure the most telling error is
/// returned: a reserved frame type beats a size mismatch.
pub fn parse_octet_auto(data: &[u8], try_cmr: bool) -> Result<DepacketizeResult, ParseError> {
    let with_cmr = if try_cmr {
        match parse_octet(data, CmrMode::Present) {
            Ok(result) => return Ok(result),
            Err(err) => Some(err),
        }
    } else {
        None
    };

    match (parse_octet(data, CmrMode::Absent), with_cmr) {
        (Ok(result), _) => Ok(result),
        (Err(absent), Some(present)) => {
            if absent.is_invalid_frame_type() || !present.is_invalid_frame_type() {
                Err(absent)
            } else {
                Err(present)
            }
        }
        (Err(absent), None) => Err(absent),
    }
}

fn read_toc_chain(data: &[u8], start: usize) -> Result<(Vec<Toc>, usize), ParseError> {
    let mut tocs = Vec::new();
    let mut offset = start;
    loop {
        let Some(&byte) = data.get(offset) else {
            return Err(ParseError::MissingToc);
        };
        let toc = Toc::from_byte(byte);
        if frame::is_reserved(toc.frame_type) {
            return Err(ParseError::InvalidFrameType(toc.frame_type));
        }
        tocs.push(toc);
        offset += 1;
        if !toc.follow {
            return Ok((tocs, offset));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame_without_cmr() {
        let mut payload = vec![0x14];
        payload.extend(vec![0x5A; 32]);
        assert_eq!(payload.len(), 33);

        let result = parse_octet(&payload, CmrMode::Absent).unwrap();
        assert_eq!(result.total_frames, 1);
        assert_eq!(result.frames[0].frame_type, 2);
        assert_eq!(result.frames[0].payload.len(), 32);
        assert_eq!(result.packing, Packing::OctetAligned { cmr: None });
    }

    #[test]
    fn test_cmr_prefix_is_stripped() {
        let mut payload = vec![0xF0, 0x14];
        payload.extend(vec![0x01; 32]);

        let result = parse_octet_auto(&payload, true).unwrap();
        assert_eq!(result.packing, Packing::OctetAligned { cmr: Some(0x0F) });
        assert!(result.packing.cmr_stripped());
        assert_eq!(result.frame_bytes().len(), payload.len() - 1);
    }

    #[test]
    fn test_multi_frame_toc_chain() {
        // FT 0 (F=1), SID (F=1), NO_DATA (F=0)
        let mut payload = vec![0x84, 0xCC, 0x7C];
        payload.extend(vec![0x11; 17]);
        payload.extend(vec![0x22; 5]);

        let result = parse_octet(&payload, CmrMode::Absent).unwrap();
        assert_eq!(result.total_frames, 3);
        assert_eq!(result.decoded_frames, 1);
        assert_eq!(result.sid_frames, 1);
        assert_eq!(result.no_data_frames, 1);
        // Storage TOCs never keep the follow bit.
        assert!(result.frames.iter().all(|f| f.storage_toc() & 0x80 == 0));
    }

    #[test]
    fn test_reserved_types_fail_in_both_variants() {
        for ft in 10..=13u8 {
            let toc = ft << 3;
            let expected = format!("invalid_ft_{}", ft);
            assert_eq!(parse_octet(&[toc, 0, 0], CmrMode::Absent).unwrap_err().reason(), expected);
            assert_eq!(
                parse_octet(&[0xF0, toc, 0, 0], CmrMode::Present).unwrap_err().reason(),
                expected
            );
        }
    }

    #[test]
    fn test_no_payload_frames_parse() {
        let result = parse_octet(&[0xF0, 0x7C], CmrMode::Present).unwrap();
        assert_eq!(result.no_data_frames, 1);
        assert_eq!(result.frames[0].payload.len(), 0);

        let result = parse_octet(&[0x74], CmrMode::Absent).unwrap();
        assert_eq!(result.speech_lost_frames, 1);
    }

    #[test]
    fn test_truncation_and_trailing_bytes() {
        let mut payload = vec![0x44];
        payload.extend(vec![0; 59]);
        assert_eq!(
            parse_octet(&payload, CmrMode::Absent).unwrap_err().reason(),
            "frame_overflow_ft_8"
        );

        let mut payload = vec![0x04];
        payload.extend(vec![0; 19]);
        assert_eq!(
            parse_octet(&payload, CmrMode::Absent).unwrap_err().reason(),
            "trailing_bytes_2"
        );

        // Follow bit set on the only TOC.
        assert_eq!(parse_octet(&[0x84], CmrMode::Absent).unwrap_err(), ParseError::MissingToc);
    }

    #[test]
    fn test_auto_prefers_invalid_frame_type_reason() {
        let err = parse_octet_auto(&[0xF1, 0x6E, 0x00, 0x00], true).unwrap_err();
        assert_eq!(err.reason(), "invalid_ft_13");
    }
}

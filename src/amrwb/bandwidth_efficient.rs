//! # Bandwidth-Efficient Depacketizer
//!
//! RFC 4867 section 4.3 packs every field at its exact bit width with no byte
//! alignment:
//!
//! ```text
//! CMR(4) | F FT(4) Q | F FT(4) Q | ... | frame 1 bits | frame 2 bits | ... | pad
//! ```
//!
//! Frame payload widths come from the frame table (132 bits for FT 0, 40 for
//! SID, 0 for no-data / speech-lost). After the last frame only zero padding up
//! to the next byte boundary may remain.
//!
//! [`repack`] turns the parsed frames into storage form, discarding the CMR and
//! the sub-byte packing.

use crate::amrwb::frame::{self, AmrWbFrame};
use crate::amrwb::{DepacketizeResult, Packing, ParseError};
use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter};
use std::io;

const CMR_BITS: usize = 4;
const TOC_BITS: usize = 6;

/// Read `bit_len` bits into bytes, left-aligned with the tail zero padded.
fn read_left_aligned<R: BitRead>(reader: &mut R, bit_len: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(bit_len.div_ceil(8));
    for _ in 0..bit_len / 8 {
        out.push(reader.read::<u8>(8)?);
    }
    let rem = (bit_len % 8) as u32;
    if rem > 0 {
        out.push(reader.read::<u8>(rem)? << (8 - rem));
    }
    Ok(out)
}

/// Write the first `bit_len` bits of left-aligned `bytes`.
fn write_left_aligned<W: BitWrite>(writer: &mut W, bytes: &[u8], bit_len: usize) -> io::Result<()> {
    for byte in bytes.iter().take(bit_len / 8) {
        writer.write(8, *byte)?;
    }
    let rem = (bit_len % 8) as u32;
    if rem > 0 {
        let last = bytes.get(bit_len / 8).copied().unwrap_or(0);
        writer.write(rem, last >> (8 - rem))?;
    }
    Ok(())
}

/// A frame as it sits in a BE payload, before repacking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeFrame {
    pub frame_type: u8,
    pub quality: bool,
    /// Payload bits, left-aligned in `payload.len()` bytes.
    pub payload: Vec<u8>,
    pub bit_len: usize,
}

/// Parsed BE payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BePayload {
    pub cmr: u8,
    pub frames: Vec<BeFrame>,
}

/// One 6-bit TOC entry: F, FT(4), Q.
fn read_toc<R: BitRead>(reader: &mut R) -> io::Result<(bool, u8, bool)> {
    let follow = reader.read_bit()?;
    let frame_type = reader.read::<u8>(4)?;
    let quality = reader.read_bit()?;
    Ok((follow, frame_type, quality))
}

/// Parse a bandwidth-efficient payload.
pub fn parse_be(data: &[u8]) -> Result<BePayload, ParseError> {
    if data.is_empty() {
        return Err(ParseError::EmptyPayload);
    }

    let mut reader = BitReader::endian(data, BigEndian);
    let cmr = reader.read::<u8>(CMR_BITS as u32).map_err(|_| ParseError::MissingToc)?;
    let mut consumed = CMR_BITS;

    let mut tocs = Vec::new();
    loop {
        let (follow, frame_type, quality) = read_toc(&mut reader).map_err(|_| ParseError::MissingToc)?;
        consumed += TOC_BITS;
        if frame::is_reserved(frame_type) {
            return Err(ParseError::InvalidFrameType(frame_type));
        }
        tocs.push((frame_type, quality));
        if !follow {
            break;
        }
    }

    let mut frames = Vec::with_capacity(tocs.len());
    for (frame_type, quality) in tocs {
        let bit_len = frame::payload_bits(frame_type)?;
        let payload =
            read_left_aligned(&mut reader, bit_len).map_err(|_| ParseError::overflow(frame_type))?;
        consumed += bit_len;
        frames.push(BeFrame {
            frame_type,
            quality,
            payload,
            bit_len,
        });
    }

    let trailing = data.len() * 8 - consumed;
    if trailing >= 8 {
        return Err(ParseError::BeTrailingBits(trailing));
    }

    Ok(BePayload { cmr, frames })
}

/// Re-serialize BE frames as byte-aligned storage frames.
///
/// Each payload is already left-aligned by the reader; it is zero padded up to
/// the frame table's byte size so the decoder sees a well-formed frame.
pub fn repack(payload: &BePayload) -> Result<Vec<AmrWbFrame>, ParseError> {
    payload
        .frames
        .iter()
        .map(|be| {
            let size = frame::payload_bytes(be.frame_type)?;
            let mut bytes = be.payload.clone();
            bytes.resize(size, 0);
            AmrWbFrame::new(be.frame_type, be.quality, bytes)
        })
        .collect()
}

/// Parse and repack in one step.
pub fn depacketize_be(data: &[u8]) -> Result<DepacketizeResult, ParseError> {
    let parsed = parse_be(data)?;
    let frames = repack(&parsed)?;
    Ok(DepacketizeResult::from_frames(
        Packing::BandwidthEfficient { cmr: parsed.cmr },
        frames,
    ))
}

/// Build a BE payload from frames, mainly for tests and debug tooling.
pub fn build_be_payload(cmr: u8, frames: &[AmrWbFrame]) -> Result<Vec<u8>, ParseError> {
    let mut payload_bits = Vec::with_capacity(frames.len());
    for f in frames {
        payload_bits.push(frame::payload_bits(f.frame_type)?);
    }
    pack_be(cmr, frames, &payload_bits)
        .map_err(|_| ParseError::overflow(frames.first().map_or(0, |f| f.frame_type)))
}

fn pack_be(cmr: u8, frames: &[AmrWbFrame], payload_bits: &[usize]) -> io::Result<Vec<u8>> {
    let mut writer = BitWriter::endian(Vec::new(), BigEndian);
    writer.write(CMR_BITS as u32, cmr & 0x0F)?;
    for (i, f) in frames.iter().enumerate() {
        writer.write_bit(i + 1 < frames.len())?;
        writer.write(4, f.frame_type & 0x0F)?;
        writer.write_bit(f.quality)?;
    }
    for (f, bits) in frames.iter().zip(payload_bits) {
        write_left_aligned(&mut writer, &f.payload, *bits)?;
    }
    writer.byte_align()?;
    Ok(writer.into_writer())
}

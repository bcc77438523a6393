//! # PCM Conversion and Length Normalization
//!
//! Post-processing for decoder output before it reaches the caller.
//!
//! ## Key Functions:
//! - **Sample conversion**: s16le / s16be bytes to `i16` samples and back
//! - **Length normalization**: force decoded PCM to exactly
//!   `speech_frames * 320` samples so small decoder drift (one frame too many
//!   or too few) never accumulates into audibly fast or slow playback
//! - **Resampling**: linear interpolation from the decoder rate to the rate
//!   the caller asked for

use crate::amrwb::frame::SAMPLES_PER_FRAME;
use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;

/// Samples at or below this magnitude count as silence when trimming.
const SILENCE_THRESHOLD: i16 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("decoder returned {actual} samples, expected {expected}")]
    ShortDecode { expected: usize, actual: usize },
}

/// What the normalizer had to do to reach the expected length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Exact,
    /// Excess matched a leading run of near-silent samples, which was dropped.
    TrimmedLeadingSilence(usize),
    /// Excess dropped from the front regardless of content.
    TrimmedFront(usize),
    /// Zeros appended at the tail.
    Padded(usize),
}

/// Normalized samples plus how they were adjusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub samples: Vec<i16>,
    pub adjustment: Adjustment,
}

/// Enforces the samples-per-speech-frame contract on decoder output.
#[derive(Debug, Clone, Copy, Default)]
pub struct PcmNormalizer {
    /// Fail short decodes instead of padding them.
    strict: bool,
}

impl PcmNormalizer {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    /// Expected sample count for a batch of speech frames.
    pub fn expected_samples(speech_frames: usize) -> usize {
        speech_frames * SAMPLES_PER_FRAME
    }

    /// Normalize `samples` to exactly `expected` samples.
    ///
    /// ## Rules:
    /// - **Oversized**: if the leading run of |s| <= 1 samples is exactly the
    ///   excess it is the part dropped; otherwise the excess is dropped from
    ///   the front anyway
    /// - **Undersized**: zero padded at the tail, or an error in strict mode
    pub fn normalize(&self, mut samples: Vec<i16>, expected: usize) -> Result<Normalized, NormalizeError> {
        let actual = samples.len();

        if actual == expected {
            return Ok(Normalized {
                samples,
                adjustment: Adjustment::Exact,
            });
        }

        if actual > expected {
            let excess = actual - expected;
            let adjustment = if leading_silence(&samples) == excess {
                Adjustment::TrimmedLeadingSilence(excess)
            } else {
                Adjustment::TrimmedFront(excess)
            };
            samples.drain(..excess);
            return Ok(Normalized { samples, adjustment });
        }

        if self.strict {
            return Err(NormalizeError::ShortDecode { expected, actual });
        }

        samples.resize(expected, 0);
        Ok(Normalized {
            samples,
            adjustment: Adjustment::Padded(expected - actual),
        })
    }
}

/// Length of the leading run of near-silent samples.
fn leading_silence(samples: &[i16]) -> usize {
    samples
        .iter()
        .take_while(|s| s.unsigned_abs() <= SILENCE_THRESHOLD as u16)
        .count()
}

/// Decode little-endian 16-bit PCM. A trailing odd byte is ignored.
pub fn samples_from_le_bytes(data: &[u8]) -> Vec<i16> {
    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }
    samples
}

/// Decode big-endian 16-bit PCM (RTP L16). A trailing odd byte is ignored.
pub fn samples_from_be_bytes(data: &[u8]) -> Vec<i16> {
    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);
    while let Ok(sample) = cursor.read_i16::<BigEndian>() {
        samples.push(sample);
    }
    samples
}

/// Keep the first channel of interleaved PCM.
pub fn first_channel(samples: Vec<i16>, channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples;
    }
    samples.into_iter().step_by(channels as usize).collect()
}

/// Linear interpolation resampler. Identity when the rates match.
pub fn resample_linear(samples: &[i16], from_hz: u32, to_hz: u32) -> Vec<i16> {
    if from_hz == to_hz || samples.is_empty() || from_hz == 0 || to_hz == 0 {
        return samples.to_vec();
    }

    let out_len = ((samples.len() as u64 * to_hz as u64) / from_hz as u64) as usize;
    let step = from_hz as f64 / to_hz as f64;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = (pos.floor() as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = pos - idx as f64;
            let value = samples[idx] as f64 + (samples[next] as f64 - samples[idx] as f64) * frac;
            value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
        })
        .collect()
}

//! # Candidate Selection
//!
//! One payload can often be read more than one way. The selector keeps that
//! decision an explicit pipeline of pure functions:
//!
//! `generate_candidates → filter_valid → score → select`
//!
//! The transcoded result is always a candidate. A raw octet-aligned reparse of
//! the untouched payload is added only when BE is not required and the
//! fallback is switched on.

use crate::amrwb::frame::{self, STREAM_HEADER};
use crate::amrwb::octet::parse_octet_auto;
use crate::amrwb::transcode::{BePolicy, TranscodeOutput};
use crate::amrwb::{hex_prefix, DepacketizeResult, Packing};
use thiserror::Error;

const HEX_PREFIX_BYTES: usize = 16;

/// Where a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateLabel {
    Transcoded,
    RawOctet,
}

impl CandidateLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateLabel::Transcoded => "transcoded",
            CandidateLabel::RawOctet => "raw_octet",
        }
    }
}

/// One way of reading a payload. Lives only for the duration of selection.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub label: CandidateLabel,
    pub result: DepacketizeResult,
    pub source_len: usize,
    pub source_hex_prefix: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("no valid candidates")]
    NoValidCandidates,
}

/// Inputs to candidate generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateOptions {
    pub be_policy: BePolicy,
    pub raw_octet_fallback: bool,
    pub octet_try_cmr: bool,
}

/// Build the candidate list for one payload.
pub fn generate_candidates(
    payload: &[u8],
    transcoded: &TranscodeOutput,
    options: &CandidateOptions,
) -> Vec<Candidate> {
    let source_hex_prefix = hex_prefix(payload, HEX_PREFIX_BYTES);
    let mut candidates = Vec::with_capacity(2);

    if let Ok(result) = &transcoded.result {
        candidates.push(Candidate {
            label: CandidateLabel::Transcoded,
            result: result.clone(),
            source_len: payload.len(),
            source_hex_prefix: source_hex_prefix.clone(),
        });
    }

    if !options.be_policy.is_required() && options.raw_octet_fallback {
        if let Ok(result) = parse_octet_auto(payload, options.octet_try_cmr) {
            candidates.push(Candidate {
                label: CandidateLabel::RawOctet,
                result,
                source_len: payload.len(),
                source_hex_prefix,
            });
        }
    }

    candidates
}

/// A candidate is usable when it carries frames beyond the bare header and its
/// speech count matches real, table-sized speech payloads.
pub fn is_valid(candidate: &Candidate) -> bool {
    let result = &candidate.result;
    if result.storage_bytes.len() <= STREAM_HEADER.len() {
        return false;
    }
    if result.total_frames == 0 || result.frames.is_empty() {
        return false;
    }

    let speech_with_content = result
        .frames
        .iter()
        .filter(|f| {
            f.is_speech()
                && frame::payload_bytes(f.frame_type)
                    .map(|size| size == f.payload.len())
                    .unwrap_or(false)
        })
        .count();
    result.decoded_frames == speech_with_content
}

pub fn filter_valid(candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.into_iter().filter(is_valid).collect()
}

/// `speech * 10 + max(0, total - non_speech) + 2 if already storage`.
pub fn score(result: &DepacketizeResult) -> i64 {
    let speech = result.decoded_frames as i64;
    let total = result.total_frames as i64;
    let non_speech = result.non_speech_frames() as i64;
    let storage_bonus = if result.packing == Packing::Storage { 2 } else { 0 };
    speech * 10 + (total - non_speech).max(0) + storage_bonus
}

/// Highest score wins; on a tie the transcoded candidate is kept.
pub fn select(candidates: Vec<Candidate>) -> Result<Candidate, SelectionError> {
    let mut best: Option<(i64, Candidate)> = None;
    for candidate in candidates {
        let s = score(&candidate.result);
        let replace = match &best {
            None => true,
            Some((best_score, current)) => {
                s > *best_score
                    || (s == *best_score
                        && candidate.label == CandidateLabel::Transcoded
                        && current.label != CandidateLabel::Transcoded)
            }
        };
        if replace {
            best = Some((s, candidate));
        }
    }
    best.map(|(_, c)| c).ok_or(SelectionError::NoValidCandidates)
}

/// The whole pipeline for one payload.
pub fn select_candidate(
    payload: &[u8],
    transcoded: &TranscodeOutput,
    options: &CandidateOptions,
) -> Result<Candidate, SelectionError> {
    select(filter_valid(generate_candidates(payload, transcoded, options)))
}

//! # Decode Entry Point
//!
//! Turns one vendor media payload into PCM16 for the recognizer.
//!
//! ## AMR-WB path:
//! 1. **transcode**: RTP strip, packing detection, BE policy
//! 2. **select**: best candidate reading of the payload
//! 3. **accept**: speech frames only, lag-1 dedupe, into the frame buffer
//! 4. **capture**: optional artifact append
//! 5. **flush**: due batches go to the streaming decoder (one-shot once the
//!    stream has failed), then length normalization and resampling
//!
//! `decode` returns `None` for every routine drop (still buffering, invalid
//! payload, unsupported codec, failed batch). Nothing panics across this
//! boundary; reasons go to the log and the session counters.

use crate::amrwb::{select_candidate, transcode};
use crate::audio::artifact::ArtifactWriter;
use crate::audio::buffer::BufferedFrame;
use crate::audio::dedupe::{drop_lag1, is_lag1_duplicate};
use crate::audio::g711;
use crate::audio::pcm::{self, Adjustment, NormalizeError, PcmNormalizer};
use crate::audio::session::SessionCodecState;
use crate::config::AmrWbConfig;
use crate::decoder::{decode_oneshot, DecoderError, StreamingDecoder};
use serde::Serialize;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// AMR-WB decoder output rate.
const AMRWB_SAMPLE_RATE_HZ: u32 = 16000;
const G711_SAMPLE_RATE_HZ: u32 = 8000;
const L16_DEFAULT_SAMPLE_RATE_HZ: u32 = 16000;

/// Canonical codec names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    AmrWb,
    Pcmu,
    Pcma,
    L16,
    G722,
    Opus,
    Unknown,
}

/// Exact aliases, matched after lowercasing and dropping `audio/` and any
/// `/rate` suffix.
const ENCODING_ALIASES: &[(&str, Encoding)] = &[
    ("amr-wb", Encoding::AmrWb),
    ("amrwb", Encoding::AmrWb),
    ("amr_wb", Encoding::AmrWb),
    ("pcmu", Encoding::Pcmu),
    ("ulaw", Encoding::Pcmu),
    ("mulaw", Encoding::Pcmu),
    ("x-mulaw", Encoding::Pcmu),
    ("g711u", Encoding::Pcmu),
    ("g711_ulaw", Encoding::Pcmu),
    ("pcma", Encoding::Pcma),
    ("alaw", Encoding::Pcma),
    ("x-alaw", Encoding::Pcma),
    ("g711a", Encoding::Pcma),
    ("g711_alaw", Encoding::Pcma),
    ("l16", Encoding::L16),
    ("linear16", Encoding::L16),
    ("g722", Encoding::G722),
    ("g.722", Encoding::G722),
    ("opus", Encoding::Opus),
];

impl Encoding {
    /// Normalize a free-text encoding name.
    pub fn normalize(raw: &str) -> Self {
        let lowered = raw.trim().to_ascii_lowercase();
        let name = lowered.strip_prefix("audio/").unwrap_or(&lowered);
        let name = name.split('/').next().unwrap_or(name).trim();

        if let Some((_, encoding)) = ENCODING_ALIASES.iter().find(|(alias, _)| *alias == name) {
            return *encoding;
        }

        if name.contains("amr") && name.contains("wb") {
            Encoding::AmrWb
        } else if name.contains("ulaw") || name.contains("pcmu") {
            Encoding::Pcmu
        } else if name.contains("alaw") || name.contains("pcma") {
            Encoding::Pcma
        } else if name.contains("722") {
            Encoding::G722
        } else if name.contains("opus") {
            Encoding::Opus
        } else if name.contains("l16") || name.contains("linear") {
            Encoding::L16
        } else {
            Encoding::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::AmrWb => "amr_wb",
            Encoding::Pcmu => "pcmu",
            Encoding::Pcma => "pcma",
            Encoding::L16 => "l16",
            Encoding::G722 => "g722",
            Encoding::Opus => "opus",
            Encoding::Unknown => "unknown",
        }
    }
}

/// One payload to decode.
#[derive(Debug, Clone)]
pub struct DecodeRequest<'a> {
    pub encoding: &'a str,
    pub payload: &'a [u8],
    pub channels: Option<u16>,
    pub reported_sample_rate_hz: Option<u32>,
    pub target_sample_rate_hz: u32,
    pub allow_amr_wb: bool,
    pub allow_g722: bool,
    pub allow_opus: bool,
    /// Per-call BE override; wins over `AMRWB_REQUIRE_BE` when set.
    pub force_amr_wb_be: Option<bool>,
    pub call_id: &'a str,
}

/// PCM produced by one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeResult {
    pub pcm16: Vec<i16>,
    pub sample_rate_hz: u32,
    /// Speech frames decoded by this request.
    pub decoded_frames: usize,
    /// Batches that failed during this request.
    pub decode_failures: usize,
}

/// Shared collaborators for a decode call.
#[derive(Debug, Clone, Copy)]
pub struct CodecContext<'a> {
    pub amrwb: &'a AmrWbConfig,
    pub artifacts: Option<&'a ArtifactWriter>,
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Decoder(#[from] DecoderError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

/// Decode one payload for one call.
pub async fn decode(
    request: &DecodeRequest<'_>,
    state: &mut SessionCodecState,
    ctx: CodecContext<'_>,
) -> Option<DecodeResult> {
    state.counters.payloads += 1;
    state.touch();

    let encoding = Encoding::normalize(request.encoding);
    match encoding {
        Encoding::AmrWb if request.allow_amr_wb => decode_amr_wb(request, state, ctx).await,
        Encoding::Pcmu | Encoding::Pcma => {
            let samples = if encoding == Encoding::Pcmu {
                g711::decode_mulaw(request.payload)
            } else {
                g711::decode_alaw(request.payload)
            };
            let samples = pcm::first_channel(samples, request.channels.unwrap_or(1));
            let rate = request.reported_sample_rate_hz.unwrap_or(G711_SAMPLE_RATE_HZ);
            Some(passthrough(samples, rate, request.target_sample_rate_hz))
        }
        Encoding::L16 => {
            let samples = pcm::samples_from_be_bytes(request.payload);
            let samples = pcm::first_channel(samples, request.channels.unwrap_or(1));
            let rate = request.reported_sample_rate_hz.unwrap_or(L16_DEFAULT_SAMPLE_RATE_HZ);
            Some(passthrough(samples, rate, request.target_sample_rate_hz))
        }
        other => {
            state.counters.dropped_payloads += 1;
            if !state.log_once.unsupported_encoding {
                state.log_once.unsupported_encoding = true;
                let allowed = match other {
                    Encoding::AmrWb => request.allow_amr_wb,
                    Encoding::G722 => request.allow_g722,
                    Encoding::Opus => request.allow_opus,
                    _ => false,
                };
                warn!(
                    call_id = %request.call_id,
                    encoding = %request.encoding,
                    normalized = other.as_str(),
                    allowed,
                    "unsupported or disabled encoding, dropping payloads"
                );
            }
            None
        }
    }
}

fn passthrough(samples: Vec<i16>, from_hz: u32, to_hz: u32) -> DecodeResult {
    DecodeResult {
        pcm16: pcm::resample_linear(&samples, from_hz, to_hz),
        sample_rate_hz: to_hz,
        decoded_frames: 0,
        decode_failures: 0,
    }
}

async fn decode_amr_wb(
    request: &DecodeRequest<'_>,
    state: &mut SessionCodecState,
    ctx: CodecContext<'_>,
) -> Option<DecodeResult> {
    let call_id = request.call_id;
    let output = transcode(request.payload, &ctx.amrwb.transcode_options(request.force_amr_wb_be));

    if let Some(reason) = output.reason() {
        if output.be_required {
            if state.record_be_violation() {
                warn!(
                    call_id = %call_id,
                    reason = %reason,
                    violations = state.counters.be_violations,
                    bytes = output.input_bytes,
                    "payload is not bandwidth-efficient AMR-WB while BE is required"
                );
            }
        } else {
            debug!(call_id = %call_id, reason = %reason, bytes = output.input_bytes, "AMR-WB transcode failed");
        }
    }

    let candidate = match select_candidate(
        request.payload,
        &output,
        &ctx.amrwb.candidate_options(request.force_amr_wb_be),
    ) {
        Ok(candidate) => candidate,
        Err(e) => {
            state.counters.dropped_payloads += 1;
            debug!(call_id = %call_id, error = %e, packing = output.packing.as_str(), "AMR-WB payload dropped");
            return None;
        }
    };

    debug!(
        call_id = %call_id,
        candidate = candidate.label.as_str(),
        packing = candidate.result.packing.as_str(),
        frames = candidate.result.total_frames,
        speech = candidate.result.decoded_frames,
        rtp_stripped = output.rtp_stripped,
        "AMR-WB payload accepted"
    );

    let now = Instant::now();
    let mut accepted: Vec<Vec<u8>> = Vec::new();
    for frame in candidate.result.frames.iter().filter(|f| f.is_speech()) {
        let buffered = BufferedFrame::new(frame.to_storage());
        if is_lag1_duplicate(state.last_accepted_hash.as_ref(), &buffered.hash) {
            state.counters.duplicate_frames += 1;
            continue;
        }
        state.last_accepted_hash = Some(buffered.hash);
        state.counters.accepted_frames += 1;
        if ctx.artifacts.is_some() {
            accepted.push(buffered.bytes.clone());
        }
        state.buffer.push(buffered, now);
    }

    if let Some(writer) = ctx.artifacts {
        if let Err(e) = writer.append(call_id, &accepted).await {
            warn!(call_id = %call_id, error = %e, "artifact append failed");
        }
    }

    let mut pcm16 = Vec::new();
    let mut decoded_frames = 0;
    let mut decode_failures = 0;

    while let Some(batch) = state.buffer.poll_batch(now) {
        match decode_batch(batch, state, ctx).await {
            Ok((samples, frames)) => {
                pcm16.extend(samples);
                decoded_frames += frames;
            }
            Err(e) => {
                decode_failures += 1;
                state.counters.decode_failures += 1;
                warn!(call_id = %call_id, error = %e, "AMR-WB batch failed");
            }
        }
    }

    if pcm16.is_empty() {
        return None;
    }

    Some(DecodeResult {
        pcm16: pcm::resample_linear(&pcm16, AMRWB_SAMPLE_RATE_HZ, request.target_sample_rate_hz),
        sample_rate_hz: request.target_sample_rate_hz,
        decoded_frames,
        decode_failures,
    })
}

/// Decode one released batch; returns normalized 16 kHz samples and the
/// number of speech frames they cover.
async fn decode_batch(
    batch: Vec<BufferedFrame>,
    state: &mut SessionCodecState,
    ctx: CodecContext<'_>,
) -> Result<(Vec<i16>, usize), BatchError> {
    let (frames, duplicates) = drop_lag1(batch, &mut state.last_decoded_hash, |f| f.hash);
    state.counters.duplicate_frames += duplicates as u64;
    if frames.is_empty() {
        return Ok((Vec::new(), 0));
    }

    let speech_frames = frames.len();
    let storage: Vec<u8> = frames.iter().flat_map(|f| f.bytes.iter().copied()).collect();
    let decoder_config = ctx.amrwb.decoder_config();

    if state.stream_usable && state.decoder.is_none() {
        match StreamingDecoder::spawn(decoder_config.clone(), &state.call_id).await {
            Ok(decoder) => state.decoder = Some(decoder),
            Err(e) => {
                if !state.log_once.decoder_spawn_failed {
                    state.log_once.decoder_spawn_failed = true;
                    warn!(call_id = %state.call_id, error = %e, "streaming decoder unavailable, using one-shot decodes");
                }
                state.stream_usable = false;
            }
        }
    }

    let streamed = match state.decoder.as_mut() {
        Some(decoder) => Some(decoder.decode_batch(&storage, speech_frames).await),
        None => None,
    };

    let raw = match streamed {
        Some(Ok(raw)) => {
            if !state.log_once.first_stream_decode {
                state.log_once.first_stream_decode = true;
                info!(call_id = %state.call_id, frames = speech_frames, "first streaming AMR-WB decode");
            }
            raw
        }
        Some(Err(e)) => {
            warn!(call_id = %state.call_id, error = %e, "falling back to one-shot decoder");
            state.disable_stream().await;
            state.counters.oneshot_batches += 1;
            decode_oneshot(&decoder_config, &storage, decoder_config.first_read_timeout).await?
        }
        None => {
            state.counters.oneshot_batches += 1;
            decode_oneshot(&decoder_config, &storage, decoder_config.first_read_timeout).await?
        }
    };

    let expected = PcmNormalizer::expected_samples(speech_frames);
    let normalized = PcmNormalizer::new(ctx.amrwb.strict_decode).normalize(pcm::samples_from_le_bytes(&raw), expected)?;
    if normalized.adjustment != Adjustment::Exact {
        debug!(call_id = %state.call_id, adjustment = ?normalized.adjustment, expected, "decoded PCM length adjusted");
    }

    state.counters.batches += 1;
    state.counters.decoded_frames += speech_frames as u64;
    Ok((normalized.samples, speech_frames))
}

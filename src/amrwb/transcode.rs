//! # Transcode Orchestrator
//!
//! The single entry point for AMR-WB input. Every payload goes through the same
//! gate so packing detection and the BE-only policy live in one place.
//!
//! ## Algorithm:
//! 1. Strip an RTP header if present
//! 2. Already storage frames? Parse them directly
//! 3. Try bandwidth-efficient
//! 4. Unless BE is required, fall back to octet-aligned (CMR first, then without)
//!
//! When BE is required a BE failure is terminal for the payload. Some PSTN
//! legs are known to send BE, and an octet parse "succeeding" on BE bytes
//! produces garbage audio rather than an error.

use crate::amrwb::bandwidth_efficient::depacketize_be;
use crate::amrwb::classify::looks_like_storage;
use crate::amrwb::octet::parse_octet_auto;
use crate::amrwb::rtp::strip_rtp;
use crate::amrwb::storage::parse_storage;
use crate::amrwb::{DepacketizeResult, Packing, ParseError};
use tracing::trace;

/// Whether octet-aligned parsing may be attempted.
///
/// This is a policy decision injected by the caller (config or per-call
/// override), never inferred from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BePolicy {
    /// Try BE, then octet-aligned.
    #[default]
    Auto,
    /// BE only, no fallback.
    Required,
}

impl BePolicy {
    /// Combine the global setting with an optional per-call override; the
    /// per-call value wins when present.
    pub fn resolve(require_be: bool, per_call: Option<bool>) -> Self {
        if per_call.unwrap_or(require_be) {
            BePolicy::Required
        } else {
            BePolicy::Auto
        }
    }

    pub fn is_required(&self) -> bool {
        matches!(self, BePolicy::Required)
    }
}

/// Knobs for [`transcode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeOptions {
    pub be_policy: BePolicy,
    /// Attempt octet-aligned-with-CMR before octet-aligned-without-CMR.
    pub octet_try_cmr: bool,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            be_policy: BePolicy::Auto,
            octet_try_cmr: true,
        }
    }
}

/// Everything the orchestrator learned about one payload.
#[derive(Debug, Clone)]
pub struct TranscodeOutput {
    pub packing: Packing,
    pub rtp_stripped: bool,
    pub cmr_stripped: bool,
    pub toc_count: usize,
    pub input_bytes: usize,
    /// Storage bytes produced, header included; 0 on failure.
    pub output_bytes: usize,
    pub be_required: bool,
    pub result: Result<DepacketizeResult, ParseError>,
}

impl TranscodeOutput {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Failure reason string, `None` on success.
    pub fn reason(&self) -> Option<String> {
        self.result.as_ref().err().map(ParseError::reason)
    }

    fn success(input_bytes: usize, rtp_stripped: bool, be_required: bool, result: DepacketizeResult) -> Self {
        Self {
            packing: result.packing,
            rtp_stripped,
            cmr_stripped: result.packing.cmr_stripped(),
            toc_count: result.total_frames,
            input_bytes,
            output_bytes: result.storage_bytes.len(),
            be_required,
            result: Ok(result),
        }
    }

    fn failure(input_bytes: usize, rtp_stripped: bool, be_required: bool, error: ParseError) -> Self {
        Self {
            packing: Packing::Invalid,
            rtp_stripped,
            cmr_stripped: false,
            toc_count: 0,
            input_bytes,
            output_bytes: 0,
            be_required,
            result: Err(error),
        }
    }
}

/// Turn one raw AMR-WB payload into canonical storage frames.
///
/// RTP detection is a guess: a BE payload whose CMR is 8-11 also starts with
/// version bits `10`. When the stripped bytes fail every parser, the untouched
/// payload is parsed instead.
pub fn transcode(payload: &[u8], options: &TranscodeOptions) -> TranscodeOutput {
    let input_bytes = payload.len();
    let be_required = options.be_policy.is_required();
    let stripped = strip_rtp(payload);

    let result = parse_payload(stripped.payload, options);
    match result {
        Ok(result) => TranscodeOutput::success(input_bytes, stripped.stripped, be_required, result),
        Err(err) if stripped.stripped => match parse_payload(payload, options) {
            Ok(result) => {
                trace!(reason = %err.reason(), "RTP-stripped parse failed, payload parsed as bare AMR-WB");
                TranscodeOutput::success(input_bytes, false, be_required, result)
            }
            Err(_) => TranscodeOutput::failure(input_bytes, true, be_required, err),
        },
        Err(err) => TranscodeOutput::failure(input_bytes, false, be_required, err),
    }
}

/// Storage shortcut, then BE, then (unless BE is required) octet-aligned.
fn parse_payload(data: &[u8], options: &TranscodeOptions) -> Result<DepacketizeResult, ParseError> {
    if data.is_empty() {
        return Err(ParseError::EmptyPayload);
    }

    let mut attempts: Vec<ParseError> = Vec::with_capacity(3);

    if looks_like_storage(data) {
        match parse_storage(data) {
            Ok(result) => return Ok(result),
            Err(err) => {
                trace!(reason = %err.reason(), "storage-shaped payload failed to parse");
                attempts.push(err);
            }
        }
    }

    match depacketize_be(data) {
        Ok(result) => return Ok(result),
        Err(err) => {
            if options.be_policy.is_required() {
                return Err(err);
            }
            attempts.push(err);
        }
    }

    match parse_octet_auto(data, options.octet_try_cmr) {
        Ok(result) => Ok(result),
        Err(err) => {
            attempts.push(err);
            Err(pick_reason(attempts))
        }
    }
}

/// A reserved frame type is the most specific signal; otherwise report the
/// earliest attempt.
fn pick_reason(mut attempts: Vec<ParseError>) -> ParseError {
    if let Some(pos) = attempts.iter().position(ParseError::is_invalid_frame_type) {
        return attempts.swap_remove(pos);
    }
    attempts.into_iter().next().unwrap_or(ParseError::EmptyPayload)
}

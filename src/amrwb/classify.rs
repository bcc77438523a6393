//! Format classifiers.
//!
//! Cheap checks run on RTP-stripped bytes to decide which parser to try.

use crate::amrwb::frame::{self, Toc, STREAM_HEADER};
use crate::amrwb::octet::{parse_octet, CmrMode};

/// Plausible storage TOC: F=0 and a non-reserved frame type.
fn plausible_storage_toc(byte: u8) -> bool {
    let toc = Toc::from_byte(byte);
    !toc.follow && !frame::is_reserved(toc.frame_type)
}

/// Heuristic: do these bytes already look like storage frames?
///
/// The first TOC must have F=0 and a valid frame type, the buffer must hold
/// that frame's full payload, and if anything follows, the next byte must be a
/// plausible TOC too. A leading stream header counts as storage.
pub fn looks_like_storage(data: &[u8]) -> bool {
    let body = match data.strip_prefix(STREAM_HEADER) {
        Some(rest) => {
            if rest.is_empty() {
                return false;
            }
            rest
        }
        None => data,
    };
    let Some(&first) = body.first() else {
        return false;
    };
    if !plausible_storage_toc(first) {
        return false;
    }

    let ft = Toc::from_byte(first).frame_type;
    let Ok(size) = frame::payload_bytes(ft) else {
        return false;
    };
    let end = 1 + size;
    if body.len() < end {
        return false;
    }
    match body.get(end) {
        Some(&next) => plausible_storage_toc(next),
        None => true,
    }
}

/// Octet-aligned with a leading CMR byte parses cleanly.
pub fn looks_octet_with_cmr(data: &[u8]) -> bool {
    parse_octet(data, CmrMode::Present).is_ok()
}

/// Octet-aligned without CMR parses cleanly.
pub fn looks_octet_without_cmr(data: &[u8]) -> bool {
    parse_octet(data, CmrMode::Absent).is_ok()
}

//! Debug endpoints for inspecting payload parsing and live codec sessions
//!
//! These are useful for working out what a vendor is actually sending without
//! a WebSocket client or an ffmpeg install: `/debug/transcode` runs a single
//! payload through the parser and selector and reports every decision.

use actix_web::{web, HttpResponse, Result as ActixResult};
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::amrwb::{self, hex_prefix, FrameKind};
use crate::error::AppError;
use crate::state::AppState;

const REPORT_HEX_PREFIX: usize = 32;

/// Request to run one AMR-WB payload through the parser
#[derive(Debug, Deserialize)]
pub struct TranscodeRequest {
    /// Payload as hex; takes precedence over `payload_base64`
    pub payload_hex: Option<String>,
    /// Payload as base64, the way Telnyx media events carry it
    pub payload_base64: Option<String>,
    /// Per-call BE override, same meaning as `?force_amr_wb_be=`
    pub force_be: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct TranscodeReport {
    pub input_bytes: usize,
    pub input_hex_prefix: String,
    pub be_required: bool,
    pub transcode: TranscodeSummary,
    pub selection: Option<SelectionSummary>,
    pub selection_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TranscodeSummary {
    pub ok: bool,
    pub packing: &'static str,
    pub rtp_stripped: bool,
    pub cmr_stripped: bool,
    pub toc_count: usize,
    pub output_bytes: usize,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SelectionSummary {
    pub label: &'static str,
    pub packing: &'static str,
    pub total_frames: usize,
    pub speech_frames: usize,
    pub sid_frames: usize,
    pub no_data_frames: usize,
    pub speech_lost_frames: usize,
    pub frame_kinds: Vec<FrameKind>,
    pub storage_hex: String,
}

fn decode_payload(req: &TranscodeRequest) -> Result<Vec<u8>, AppError> {
    if let Some(hex_str) = &req.payload_hex {
        let compact: String = hex_str.chars().filter(|c| !c.is_whitespace()).collect();
        return Ok(hex::decode(compact)?);
    }
    if let Some(b64) = &req.payload_base64 {
        return Ok(base64::engine::general_purpose::STANDARD.decode(b64.trim())?);
    }
    Err(AppError::BadRequest(
        "one of payload_hex or payload_base64 is required".to_string(),
    ))
}

/// Build the report for one payload under the current AMR-WB settings.
pub fn transcode_report(
    payload: &[u8],
    config: &crate::config::AmrWbConfig,
    force_be: Option<bool>,
) -> TranscodeReport {
    let output = amrwb::transcode(payload, &config.transcode_options(force_be));
    let selected = amrwb::select_candidate(payload, &output, &config.candidate_options(force_be));

    let (selection, selection_error) = match selected {
        Ok(candidate) => {
            let r = &candidate.result;
            (
                Some(SelectionSummary {
                    label: candidate.label.as_str(),
                    packing: r.packing.as_str(),
                    total_frames: r.total_frames,
                    speech_frames: r.decoded_frames,
                    sid_frames: r.sid_frames,
                    no_data_frames: r.no_data_frames,
                    speech_lost_frames: r.speech_lost_frames,
                    frame_kinds: r.frame_kinds.clone(),
                    storage_hex: hex::encode(&r.storage_bytes),
                }),
                None,
            )
        }
        Err(e) => (None, Some(e.to_string())),
    };

    TranscodeReport {
        input_bytes: payload.len(),
        input_hex_prefix: hex_prefix(payload, REPORT_HEX_PREFIX),
        be_required: output.be_required,
        transcode: TranscodeSummary {
            ok: output.is_ok(),
            packing: output.packing.as_str(),
            rtp_stripped: output.rtp_stripped,
            cmr_stripped: output.cmr_stripped,
            toc_count: output.toc_count,
            output_bytes: output.output_bytes,
            reason: output.reason(),
        },
        selection,
        selection_error,
    }
}

/// Parse a payload and report how it was read
///
/// POST /debug/transcode
/// Body: {"payload_hex": "f0 44 ...", "force_be": true}
pub async fn debug_transcode(
    state: web::Data<AppState>,
    req: web::Json<TranscodeRequest>,
) -> ActixResult<HttpResponse, AppError> {
    let payload = decode_payload(&req)?;
    if payload.is_empty() {
        return Err(AppError::ValidationError("payload is empty".to_string()));
    }

    let config = state.get_config();
    let report = transcode_report(&payload, &config.amrwb, req.force_be);

    tracing::debug!(
        bytes = payload.len(),
        packing = report.transcode.packing,
        reason = ?report.transcode.reason,
        "Debug transcode"
    );

    Ok(HttpResponse::Ok().json(report))
}

/// Snapshot of every live codec session
///
/// GET /debug/sessions
pub async fn debug_sessions(state: web::Data<AppState>) -> ActixResult<HttpResponse, AppError> {
    let sessions = state.registry.summaries().await;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "count": sessions.len(),
        "max_sessions": state.registry.max_sessions(),
        "sessions": sessions
    })))
}

/// Configuration for debug routes
pub fn configure_debug_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/debug")
            .route("/transcode", web::post().to(debug_transcode))
            .route("/sessions", web::get().to(debug_sessions)),
    );
}

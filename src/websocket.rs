//! # Telnyx Media Stream Handler
//!
//! Receives Telnyx call audio over WebSocket and feeds it to the codec layer.
//! Telnyx connects to `/ws/telnyx` and sends JSON text frames.
//!
//! ## Stream Protocol:
//! 1. **connected**: stream handshake, nothing to do
//! 2. **start**: call id and media format; opens the codec session
//! 3. **media**: one base64 payload per event, decoded in arrival order
//! 4. **stop**: call ended; closes the codec session
//!
//! ## Ordering:
//! The actor never decodes. Each media payload goes onto a per-connection
//! unbounded queue drained by a single worker task, which holds the session
//! lock for the duration of one `decode` call. Payloads for one call are
//! therefore decoded strictly in the order they arrived.
//!
//! Only the `inbound` track (or media with no track) is decoded.

use crate::audio::{self, CodecContext, DecodeRequest};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use base64::Engine;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_ENCODING: &str = "PCMU";

/// Events Telnyx sends on a media stream.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelnyxEvent {
    Connected {
        #[serde(default)]
        version: Option<String>,
    },
    Start {
        #[serde(default)]
        stream_id: Option<String>,
        #[serde(default)]
        start: StartInfo,
    },
    Media {
        #[serde(default)]
        stream_id: Option<String>,
        media: MediaInfo,
    },
    Stop {
        #[serde(default)]
        stream_id: Option<String>,
    },
    /// DTMF, mark, error and anything newer
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
pub struct StartInfo {
    #[serde(default)]
    pub call_control_id: Option<String>,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaFormat {
    pub encoding: String,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub channels: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct MediaInfo {
    #[serde(default)]
    pub track: Option<String>,
    /// Sent as a string by Telnyx; kept loose for logging only.
    #[serde(default)]
    pub chunk: Option<serde_json::Value>,
    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,
    pub payload: String,
}

impl MediaInfo {
    /// Media from the caller leg; events without a track are treated as inbound.
    pub fn is_inbound(&self) -> bool {
        self.track
            .as_deref()
            .map_or(true, |track| track.eq_ignore_ascii_case("inbound"))
    }
}

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Per-call BE override; wins over `AMRWB_REQUIRE_BE`.
    #[serde(default)]
    pub force_amr_wb_be: Option<bool>,
}

/// Everything the worker needs to decode payloads for one call.
#[derive(Debug, Clone)]
struct CallContext {
    call_id: String,
    format: MediaFormat,
    force_amr_wb_be: Option<bool>,
}

/// WebSocket actor for one Telnyx media stream.
pub struct TelnyxWebSocket {
    state: web::Data<AppState>,
    force_amr_wb_be: Option<bool>,
    call_id: Option<String>,
    media_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    last_heartbeat: Instant,
    skipped_outbound: u64,
}

impl TelnyxWebSocket {
    pub fn new(state: web::Data<AppState>, force_amr_wb_be: Option<bool>) -> Self {
        Self {
            state,
            force_amr_wb_be,
            call_id: None,
            media_tx: None,
            last_heartbeat: Instant::now(),
            skipped_outbound: 0,
        }
    }

    fn handle_event(&mut self, event: TelnyxEvent) {
        match event {
            TelnyxEvent::Connected { version } => {
                debug!(version = ?version, "Telnyx stream connected");
            }
            TelnyxEvent::Start { stream_id, start } => self.handle_start(stream_id, start),
            TelnyxEvent::Media { media, .. } => self.handle_media(media),
            TelnyxEvent::Stop { stream_id } => {
                info!(call_id = ?self.call_id, stream_id = ?stream_id, "Telnyx stream stopped");
                self.end_call();
            }
            TelnyxEvent::Other => {}
        }
    }

    fn handle_start(&mut self, stream_id: Option<String>, start: StartInfo) {
        if self.call_id.is_some() {
            // A second start on one socket begins a fresh call.
            self.end_call();
        }

        let call_id = start
            .call_control_id
            .or(stream_id)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let format = start.media_format.unwrap_or_else(|| MediaFormat {
            encoding: DEFAULT_ENCODING.to_string(),
            sample_rate: None,
            channels: None,
        });

        info!(
            call_id = %call_id,
            encoding = %format.encoding,
            sample_rate = ?format.sample_rate,
            force_amr_wb_be = ?self.force_amr_wb_be,
            "Telnyx media stream started"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let call = CallContext {
            call_id: call_id.clone(),
            format,
            force_amr_wb_be: self.force_amr_wb_be,
        };
        tokio::spawn(run_media_worker(self.state.clone(), call, rx));

        self.state.call_started();
        self.call_id = Some(call_id);
        self.media_tx = Some(tx);
    }

    fn handle_media(&mut self, media: MediaInfo) {
        if !media.is_inbound() {
            self.skipped_outbound += 1;
            return;
        }

        let Some(tx) = &self.media_tx else {
            debug!("Media before start event, dropping");
            return;
        };

        match base64::engine::general_purpose::STANDARD.decode(media.payload.trim()) {
            Ok(payload) if !payload.is_empty() => {
                if tx.send(payload).is_err() {
                    warn!(call_id = ?self.call_id, "Media worker gone, dropping payload");
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!(
                    call_id = ?self.call_id,
                    chunk = ?media.chunk,
                    timestamp = ?media.timestamp,
                    error = %err,
                    "Invalid base64 media payload"
                );
            }
        }
    }

    /// Close the queue and release the call's resources once it drains.
    fn end_call(&mut self) {
        let Some(call_id) = self.call_id.take() else {
            return;
        };
        // Dropping the sender lets the worker finish queued payloads, then clean up.
        self.media_tx = None;
        self.state.call_ended();
        if self.skipped_outbound > 0 {
            debug!(call_id = %call_id, skipped = self.skipped_outbound, "Ignored outbound-track media");
        }
        self.skipped_outbound = 0;
    }
}

/// Drain one call's payload queue in order, then close its codec session.
async fn run_media_worker(
    state: web::Data<AppState>,
    call: CallContext,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let mut last_handle = None;
    while let Some(payload) = rx.recv().await {
        // Looked up per payload so an evicted session is recreated, not orphaned.
        let handle = state.registry.session(&call.call_id).await;
        last_handle = Some(handle.clone());
        let config = state.get_config();
        let request = DecodeRequest {
            encoding: &call.format.encoding,
            payload: &payload,
            channels: call.format.channels,
            reported_sample_rate_hz: call.format.sample_rate,
            target_sample_rate_hz: config.amrwb.target_sample_rate_hz,
            allow_amr_wb: true,
            allow_g722: false,
            allow_opus: false,
            force_amr_wb_be: call.force_amr_wb_be,
            call_id: &call.call_id,
        };
        let ctx = CodecContext {
            amrwb: &config.amrwb,
            artifacts: state.artifacts.as_deref(),
        };

        let result = {
            let mut session = handle.lock().await;
            audio::decode(&request, &mut session, ctx).await
        };

        match result {
            Some(decoded) => {
                state.record_payload(decoded.decoded_frames, decoded.decode_failures, decoded.pcm16.len());
                debug!(
                    call_id = %call.call_id,
                    samples = decoded.pcm16.len(),
                    sample_rate_hz = decoded.sample_rate_hz,
                    frames = decoded.decoded_frames,
                    "PCM ready"
                );
            }
            None => state.record_payload(0, 0, 0),
        }
    }

    let Some(handle) = last_handle else {
        return;
    };
    if !state.registry.close_if_current(&call.call_id, &handle).await {
        debug!(call_id = %call.call_id, "Session replaced by a newer stream, leaving it open");
        return;
    }
    if let Some(artifacts) = &state.artifacts {
        artifacts.release(&call.call_id).await;
    }
    info!(call_id = %call.call_id, "Codec session closed");
}

/// Implement Actor trait for WebSocket handling.
impl Actor for TelnyxWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Telnyx WebSocket connection started");

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(call_id = ?act.call_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(call_id = ?self.call_id, "Telnyx WebSocket connection stopped");
        self.end_call();
    }
}

/// Handle incoming WebSocket messages.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for TelnyxWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                match serde_json::from_str::<TelnyxEvent>(&text) {
                    Ok(event) => self.handle_event(event),
                    Err(err) => warn!(error = %err, "Invalid Telnyx event JSON"),
                }
            }
            Ok(ws::Message::Binary(data)) => {
                warn!(bytes = data.len(), "Unexpected binary frame on Telnyx stream");
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(reason = ?reason, "WebSocket closed");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(error = %err, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

/// WebSocket endpoint handler.
///
/// `GET /ws/telnyx?force_amr_wb_be=true` upgrades the request and hands the
/// connection to a [`TelnyxWebSocket`] actor.
pub async fn telnyx_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let query = web::Query::<StreamQuery>::from_query(req.query_string())
        .map(web::Query::into_inner)
        .unwrap_or_default();

    info!(
        peer = ?req.connection_info().peer_addr(),
        force_amr_wb_be = ?query.force_amr_wb_be,
        "New Telnyx WebSocket connection request"
    );

    ws::start(TelnyxWebSocket::new(app_state, query.force_amr_wb_be), &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_start_event_parsing() {
        let json = r#"{
            "event": "start",
            "sequence_number": "1",
            "stream_id": "s-1",
            "start": {
                "call_control_id": "v3:abc",
                "media_format": {"encoding": "AMR-WB", "sample_rate": 16000, "channels": 1}
            }
        }"#;
        match serde_json::from_str::<TelnyxEvent>(json).unwrap() {
            TelnyxEvent::Start { stream_id, start } => {
                assert_eq!(stream_id.as_deref(), Some("s-1"));
                assert_eq!(start.call_control_id.as_deref(), Some("v3:abc"));
                let format = start.media_format.unwrap();
                assert_eq!(format.encoding, "AMR-WB");
                assert_eq!(format.sample_rate, Some(16000));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_media_track_gating() {
        let inbound: TelnyxEvent = serde_json::from_str(
            r#"{"event":"media","media":{"track":"inbound","chunk":"2","timestamp":"40","payload":"AAE="}}"#,
        )
        .unwrap();
        let TelnyxEvent::Media { media, .. } = inbound else {
            panic!("expected media");
        };
        assert!(media.is_inbound());

        let outbound: MediaInfo = serde_json::from_str(r#"{"track":"outbound","payload":""}"#).unwrap();
        assert!(!outbound.is_inbound());

        let untracked: MediaInfo = serde_json::from_str(r#"{"payload":""}"#).unwrap();
        assert!(untracked.is_inbound());
    }

    #[test]
    fn test_unknown_events_tolerated() {
        let event: TelnyxEvent = serde_json::from_str(r#"{"event":"dtmf","dtmf":{"digit":"1"}}"#).unwrap();
        assert!(matches!(event, TelnyxEvent::Other));
        let event: TelnyxEvent = serde_json::from_str(r#"{"event":"connected","version":"1.0.0"}"#).unwrap();
        assert!(matches!(event, TelnyxEvent::Connected { .. }));
    }

    #[test]
    fn test_stream_query() {
        let q = web::Query::<StreamQuery>::from_query("force_amr_wb_be=true").unwrap();
        assert_eq!(q.force_amr_wb_be, Some(true));
        let q = web::Query::<StreamQuery>::from_query("").unwrap();
        assert_eq!(q.force_amr_wb_be, None);
    }

    #[actix_web::test]
    async fn test_worker_decodes_in_order_and_closes_session() {
        let state = web::Data::new(AppState::new(AppConfig::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        let call = CallContext {
            call_id: "call-ws".to_string(),
            format: MediaFormat {
                encoding: "PCMU".to_string(),
                sample_rate: Some(8000),
                channels: Some(1),
            },
            force_amr_wb_be: None,
        };

        tx.send(vec![0xFF; 160]).unwrap();
        tx.send(vec![0x7F; 80]).unwrap();
        drop(tx);
        run_media_worker(state.clone(), call, rx).await;

        let media = state.get_metrics_snapshot().media;
        assert_eq!(media.payloads, 2);
        // 240 samples at 8 kHz resampled to 16 kHz
        assert_eq!(media.pcm_samples, 480);
        assert!(state.registry.get("call-ws").await.is_none());
    }

    #[actix_web::test]
    async fn test_finished_worker_leaves_newer_session_open() {
        let state = web::Data::new(AppState::new(AppConfig::default()));
        let call = || CallContext {
            call_id: "call-dup".to_string(),
            format: MediaFormat {
                encoding: "PCMU".to_string(),
                sample_rate: Some(8000),
                channels: Some(1),
            },
            force_amr_wb_be: None,
        };

        let (old_tx, old_rx) = mpsc::unbounded_channel();
        old_tx.send(vec![0xFF; 160]).unwrap();
        let old_worker = tokio::spawn(run_media_worker(state.clone(), call(), old_rx));

        // The old worker has registered its session once the payload is counted.
        while state.get_metrics_snapshot().media.payloads < 1 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        // A reconnect evicts the old session and opens a replacement.
        state.registry.close("call-dup").await;
        let (new_tx, new_rx) = mpsc::unbounded_channel();
        new_tx.send(vec![0xFF; 160]).unwrap();
        let new_worker = tokio::spawn(run_media_worker(state.clone(), call(), new_rx));
        while state.get_metrics_snapshot().media.payloads < 2 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let newer = state.registry.get("call-dup").await.unwrap();

        drop(old_tx);
        old_worker.await.unwrap();
        let current = state.registry.get("call-dup").await.unwrap();
        assert!(std::sync::Arc::ptr_eq(&current, &newer));

        drop(new_tx);
        new_worker.await.unwrap();
        assert!(state.registry.get("call-dup").await.is_none());
    }
}

//! Per-endpoint HTTP metrics.

use crate::state::AppState;
use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::middleware::Next;
use actix_web::{web, Error};
use std::time::Instant;

/// Count every request and its latency under `"<METHOD> <path>"`.
///
/// WebSocket upgrades are counted when the handshake completes; the stream
/// itself is tracked by the media counters.
pub async fn record_http_metrics(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let started = Instant::now();
    let endpoint = format!("{} {}", req.method(), req.path());
    let state = req.app_data::<web::Data<AppState>>().cloned();

    if let Some(state) = &state {
        state.increment_request_count();
    }

    let result = next.call(req).await;

    if let Some(state) = &state {
        let is_error = match &result {
            Ok(response) => response.status().is_client_error() || response.status().is_server_error(),
            Err(_) => true,
        };
        state.record_endpoint_request(&endpoint, started.elapsed().as_millis() as u64, is_error);
        if is_error {
            state.increment_error_count();
        }
    }

    result
}

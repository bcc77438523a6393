//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket actor.
//!
//! ## Contents:
//! - **config**: runtime-updatable configuration (`Arc<RwLock<AppConfig>>`)
//! - **metrics**: HTTP and media counters
//! - **registry**: per-call codec sessions
//! - **artifacts**: optional `.amr` capture, present when `artifacts.dir` is set
//!
//! Config and metrics sit behind `std::sync::RwLock`; their critical sections
//! never await. A poisoned lock still holds valid counters, so it is recovered
//! rather than propagated.

use crate::audio::artifact::ArtifactWriter;
use crate::audio::CodecRegistry;
use crate::config::AppConfig;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub registry: Arc<CodecRegistry>,
    pub artifacts: Option<Arc<ArtifactWriter>>,
    pub start_time: Instant,
}

/// Counters collected since startup.
#[derive(Debug, Default, Clone, Serialize)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
    pub media: MediaMetrics,
}

/// Media ingest counters across all calls.
#[derive(Debug, Default, Clone, Serialize)]
pub struct MediaMetrics {
    /// Open WebSocket media streams
    pub active_calls: u32,
    pub total_calls: u64,
    pub payloads: u64,
    /// Payloads that produced no PCM (buffering, invalid, unsupported)
    pub empty_results: u64,
    pub decoded_frames: u64,
    pub decode_failures: u64,
    pub pcm_samples: u64,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let registry = CodecRegistry::new(config.performance.max_sessions, config.amrwb.buffer_config());
        let artifacts = config
            .artifacts
            .dir
            .as_ref()
            .map(|dir| Arc::new(ArtifactWriter::new(dir, config.amrwb.selected_recent_dedupe_n)));

        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            registry: Arc::new(registry),
            artifacts,
            start_time: Instant::now(),
        }
    }

    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the configuration if it validates.
    ///
    /// AMR-WB parsing and decoder settings apply to the next payload. Buffer
    /// sizes, the session limit and the artifact directory are fixed at startup.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = new_config;
        Ok(())
    }

    fn with_metrics(&self, f: impl FnOnce(&mut AppMetrics)) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut metrics);
    }

    pub fn increment_request_count(&self) {
        self.with_metrics(|m| m.request_count += 1);
    }

    pub fn increment_error_count(&self) {
        self.with_metrics(|m| m.error_count += 1);
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        self.with_metrics(|m| {
            let metric = m.endpoint_metrics.entry(endpoint.to_string()).or_default();
            metric.request_count += 1;
            metric.total_duration_ms += duration_ms;
            if is_error {
                metric.error_count += 1;
            }
        });
    }

    pub fn call_started(&self) {
        self.with_metrics(|m| {
            m.media.active_calls += 1;
            m.media.total_calls += 1;
        });
    }

    pub fn call_ended(&self) {
        self.with_metrics(|m| m.media.active_calls = m.media.active_calls.saturating_sub(1));
    }

    /// Record one media payload and what decoding it produced.
    pub fn record_payload(&self, decoded_frames: usize, decode_failures: usize, pcm_samples: usize) {
        self.with_metrics(|m| {
            m.media.payloads += 1;
            if pcm_samples == 0 {
                m.media.empty_results += 1;
            }
            m.media.decoded_frames += decoded_frames as u64;
            m.media.decode_failures += decode_failures as u64;
            m.media.pcm_samples += pcm_samples as u64;
        });
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_counters() {
        let state = AppState::new(AppConfig::default());
        state.call_started();
        state.record_payload(0, 0, 0);
        state.record_payload(10, 1, 3200);
        state.call_ended();
        state.call_ended();

        let media = state.get_metrics_snapshot().media;
        assert_eq!(media.active_calls, 0);
        assert_eq!(media.total_calls, 1);
        assert_eq!(media.payloads, 2);
        assert_eq!(media.empty_results, 1);
        assert_eq!(media.decoded_frames, 10);
        assert_eq!(media.decode_failures, 1);
    }

    #[test]
    fn test_update_config_validates() {
        let state = AppState::new(AppConfig::default());
        let mut bad = state.get_config();
        bad.performance.max_sessions = 0;
        assert!(state.update_config(bad).is_err());

        let mut good = state.get_config();
        good.amrwb.require_be = true;
        assert!(state.update_config(good).is_ok());
        assert!(state.get_config().amrwb.require_be);
    }

    #[test]
    fn test_artifacts_enabled_by_dir() {
        assert!(AppState::new(AppConfig::default()).artifacts.is_none());

        let mut config = AppConfig::default();
        config.artifacts.dir = Some("/tmp/amr-artifacts".to_string());
        let state = AppState::new(config);
        assert_eq!(
            state.artifacts.as_ref().map(|a| a.dir().to_path_buf()),
            Some(std::path::PathBuf::from("/tmp/amr-artifacts"))
        );
    }

    #[test]
    fn test_endpoint_metric_rates() {
        let metric = EndpointMetric {
            request_count: 4,
            total_duration_ms: 100,
            error_count: 1,
        };
        assert_eq!(metric.average_duration_ms(), 25.0);
        assert_eq!(metric.error_rate(), 0.25);
    }
}

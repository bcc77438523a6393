//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration file (`config.toml`, optional)
//! - Environment variables with the `APP_` prefix
//! - Flat deployment variables (`PORT`, `FFMPEG_PATH`, `AMRWB_*`, ...)
//! - Default values built into the code
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Flat variables listed in [`FLAT_ENV_OVERRIDES`]
//! 2. Prefixed variables, e.g. `APP_AMRWB__MIN_DECODE_FRAMES=12`
//!    (`__` separates nesting levels because field names contain `_`)
//! 3. `config.toml`
//! 4. Defaults from the `Default` impl

use crate::amrwb::candidate::CandidateOptions;
use crate::amrwb::{BePolicy, TranscodeOptions};
use crate::audio::buffer::FrameBufferConfig;
use crate::decoder::DecoderConfig;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Flat environment variables and the config keys they override.
///
/// These predate the `APP_` convention and are what deployment scripts set.
pub const FLAT_ENV_OVERRIDES: &[(&str, &str)] = &[
    ("HOST", "server.host"),
    ("PORT", "server.port"),
    ("FFMPEG_PATH", "amrwb.ffmpeg_path"),
    ("AMRWB_REQUIRE_BE", "amrwb.require_be"),
    ("AMRWB_MIN_DECODE_FRAMES", "amrwb.min_decode_frames"),
    ("AMRWB_MAX_BUFFER_MS", "amrwb.max_buffer_ms"),
    ("AMRWB_STREAM_CHUNK_FRAMES", "amrwb.stream_chunk_frames"),
    ("AMRWB_STREAM_STRICT", "amrwb.stream_strict"),
    ("AMRWB_STRICT_DECODE", "amrwb.strict_decode"),
    ("AMRWB_SELECTED_RECENT_DEDUPE_N", "amrwb.selected_recent_dedupe_n"),
    ("AMRWB_RAW_OCTET_FALLBACK", "amrwb.raw_octet_fallback"),
    ("AMRWB_ARTIFACT_DIR", "artifacts.dir"),
    ("MAX_CODEC_SESSIONS", "performance.max_sessions"),
];

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub performance: PerformanceConfig,
    pub amrwb: AmrWbConfig,
    pub artifacts: ArtifactsConfig,
}

/// Server bind address.
///
/// - `host = "127.0.0.1"`: localhost only (development)
/// - `host = "0.0.0.0"`: all interfaces (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Codec sessions kept at once; the oldest is evicted beyond this.
    /// Each holds one decoder process.
    pub max_sessions: usize,
}

/// AMR-WB ingest tuning.
///
/// ## Groups:
/// - **Decoder process**: `ffmpeg_path`, read timeouts, carryover grace, `stream_strict`
/// - **Batching**: `min_decode_frames`, `max_buffer_ms`, `stream_chunk_frames`
/// - **Parsing policy**: `require_be`, `octet_try_cmr`, `raw_octet_fallback`
/// - **Output**: `strict_decode`, `target_sample_rate_hz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmrWbConfig {
    pub ffmpeg_path: String,
    pub require_be: bool,
    pub min_decode_frames: usize,
    pub max_buffer_ms: u64,
    pub stream_chunk_frames: usize,
    pub stream_strict: bool,
    pub strict_decode: bool,
    pub selected_recent_dedupe_n: usize,
    pub raw_octet_fallback: bool,
    pub octet_try_cmr: bool,
    pub first_read_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub carryover_grace_bytes: usize,
    pub target_sample_rate_hz: u32,
}

/// Artifact capture. Disabled while `dir` is unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    pub dir: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            performance: PerformanceConfig { max_sessions: 256 },
            amrwb: AmrWbConfig::default(),
            artifacts: ArtifactsConfig::default(),
        }
    }
}

impl Default for AmrWbConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            require_be: false,
            min_decode_frames: 10,     // ~200ms
            max_buffer_ms: 500,
            stream_chunk_frames: 20,   // ~400ms
            stream_strict: false,
            strict_decode: false,
            selected_recent_dedupe_n: 32,
            raw_octet_fallback: false,
            octet_try_cmr: true,
            first_read_timeout_ms: 3000, // absorbs ffmpeg startup
            read_timeout_ms: 750,
            carryover_grace_bytes: 64,
            target_sample_rate_hz: 16000,
        }
    }
}

impl AmrWbConfig {
    pub fn buffer_config(&self) -> FrameBufferConfig {
        FrameBufferConfig {
            min_frames: self.min_decode_frames,
            max_buffer_ms: self.max_buffer_ms,
            chunk_frames: self.stream_chunk_frames,
        }
    }

    pub fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig {
            ffmpeg_path: self.ffmpeg_path.clone(),
            sample_rate_hz: 16000,
            first_read_timeout: Duration::from_millis(self.first_read_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            carryover_grace_bytes: self.carryover_grace_bytes,
            strict: self.stream_strict,
        }
    }

    /// BE policy for a call; `per_call` comes from `force_amr_wb_be`.
    pub fn be_policy(&self, per_call: Option<bool>) -> BePolicy {
        BePolicy::resolve(self.require_be, per_call)
    }

    pub fn transcode_options(&self, per_call: Option<bool>) -> TranscodeOptions {
        TranscodeOptions {
            be_policy: self.be_policy(per_call),
            octet_try_cmr: self.octet_try_cmr,
        }
    }

    pub fn candidate_options(&self, per_call: Option<bool>) -> CandidateOptions {
        CandidateOptions {
            be_policy: self.be_policy(per_call),
            raw_octet_fallback: self.raw_octet_fallback,
            octet_try_cmr: self.octet_try_cmr,
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// ## Examples:
    /// - `APP_SERVER__PORT=3000`: override server port
    /// - `AMRWB_REQUIRE_BE=true`: BE-only parsing for every call
    /// - `AMRWB_ARTIFACT_DIR=/tmp/amr`: enable artifact capture
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        for (var, key) in FLAT_ENV_OVERRIDES {
            if let Ok(value) = env::var(var) {
                settings = settings.set_override(*key, value)?;
            }
        }

        let config: AppConfig = settings.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or break the pipeline.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.performance.max_sessions == 0 {
            return Err(anyhow::anyhow!("Max sessions must be greater than 0"));
        }

        let amrwb = &self.amrwb;
        if amrwb.min_decode_frames == 0 {
            return Err(anyhow::anyhow!("AMR-WB min decode frames must be greater than 0"));
        }
        if amrwb.stream_chunk_frames == 0 {
            return Err(anyhow::anyhow!("AMR-WB stream chunk frames must be greater than 0"));
        }
        if amrwb.selected_recent_dedupe_n == 0 {
            return Err(anyhow::anyhow!("AMR-WB dedupe window must be greater than 0"));
        }
        if amrwb.read_timeout_ms == 0 || amrwb.first_read_timeout_ms == 0 {
            return Err(anyhow::anyhow!("AMR-WB read timeouts must be greater than 0"));
        }
        if amrwb.target_sample_rate_hz == 0 {
            return Err(anyhow::anyhow!("Target sample rate must be greater than 0"));
        }
        if amrwb.ffmpeg_path.trim().is_empty() {
            return Err(anyhow::anyhow!("ffmpeg path cannot be empty"));
        }

        Ok(())
    }

    /// Apply a partial JSON update, e.g. `{"amrwb": {"require_be": true}}`.
    ///
    /// Only the fields present change. The result must still validate.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = u16::try_from(port)?;
            }
        }

        if let Some(performance) = partial.get("performance") {
            if let Some(sessions) = performance.get("max_sessions").and_then(|v| v.as_u64()) {
                self.performance.max_sessions = sessions as usize;
            }
        }

        if let Some(amrwb) = partial.get("amrwb") {
            let a = &mut self.amrwb;
            let get_bool = |key: &str| amrwb.get(key).and_then(|v| v.as_bool());
            let get_u64 = |key: &str| amrwb.get(key).and_then(|v| v.as_u64());

            if let Some(path) = amrwb.get("ffmpeg_path").and_then(|v| v.as_str()) {
                a.ffmpeg_path = path.to_string();
            }
            if let Some(v) = get_bool("require_be") {
                a.require_be = v;
            }
            if let Some(v) = get_bool("stream_strict") {
                a.stream_strict = v;
            }
            if let Some(v) = get_bool("strict_decode") {
                a.strict_decode = v;
            }
            if let Some(v) = get_bool("raw_octet_fallback") {
                a.raw_octet_fallback = v;
            }
            if let Some(v) = get_bool("octet_try_cmr") {
                a.octet_try_cmr = v;
            }
            if let Some(v) = get_u64("min_decode_frames") {
                a.min_decode_frames = v as usize;
            }
            if let Some(v) = get_u64("max_buffer_ms") {
                a.max_buffer_ms = v;
            }
            if let Some(v) = get_u64("stream_chunk_frames") {
                a.stream_chunk_frames = v as usize;
            }
            if let Some(v) = get_u64("selected_recent_dedupe_n") {
                a.selected_recent_dedupe_n = v as usize;
            }
            if let Some(v) = get_u64("first_read_timeout_ms") {
                a.first_read_timeout_ms = v;
            }
            if let Some(v) = get_u64("read_timeout_ms") {
                a.read_timeout_ms = v;
            }
            if let Some(v) = get_u64("carryover_grace_bytes") {
                a.carryover_grace_bytes = v as usize;
            }
            if let Some(v) = get_u64("target_sample_rate_hz") {
                a.target_sample_rate_hz = u32::try_from(v)?;
            }
        }

        if let Some(artifacts) = partial.get("artifacts") {
            match artifacts.get("dir") {
                Some(serde_json::Value::String(dir)) => self.artifacts.dir = Some(dir.clone()),
                Some(serde_json::Value::Null) => self.artifacts.dir = None,
                _ => {}
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.performance.max_sessions, 256);
        assert_eq!(config.amrwb.min_decode_frames, 10);
        assert_eq!(config.amrwb.max_buffer_ms, 500);
        assert_eq!(config.amrwb.stream_chunk_frames, 20);
        assert_eq!(config.amrwb.selected_recent_dedupe_n, 32);
        assert!(config.artifacts.dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.amrwb.stream_chunk_frames = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.amrwb.selected_recent_dedupe_n = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"server": {"port": 9090}, "amrwb": {"require_be": true, "min_decode_frames": 5}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.server.port, 9090);
        assert!(config.amrwb.require_be);
        assert_eq!(config.amrwb.min_decode_frames, 5);
        assert_eq!(config.server.host, "127.0.0.1");

        assert!(config.update_from_json(r#"{"amrwb": {"min_decode_frames": 0}}"#).is_err());
        assert!(config.update_from_json(r#"{"server": {"port": 70000}}"#).is_err());
    }

    #[test]
    fn test_artifact_dir_update() {
        let mut config = AppConfig::default();
        config.update_from_json(r#"{"artifacts": {"dir": "/tmp/amr"}}"#).unwrap();
        assert_eq!(config.artifacts.dir.as_deref(), Some("/tmp/amr"));
        config.update_from_json(r#"{"artifacts": {"dir": null}}"#).unwrap();
        assert!(config.artifacts.dir.is_none());
    }

    #[test]
    fn test_derived_options() {
        let mut amrwb = AmrWbConfig::default();
        assert_eq!(amrwb.be_policy(None), BePolicy::Auto);
        assert_eq!(amrwb.be_policy(Some(true)), BePolicy::Required);

        amrwb.require_be = true;
        amrwb.raw_octet_fallback = true;
        assert!(amrwb.transcode_options(None).be_policy.is_required());
        assert!(!amrwb.candidate_options(Some(false)).be_policy.is_required());

        let decoder = amrwb.decoder_config();
        assert_eq!(decoder.read_timeout, Duration::from_millis(750));
        assert_eq!(amrwb.buffer_config().chunk_frames, 20);
    }
}

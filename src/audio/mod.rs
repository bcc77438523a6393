//! # Audio Processing Module
//!
//! Per-call audio handling between the ingest surface and the decoder.
//!
//! ## Key Components:
//! - **codec**: decode entry point, encoding normalization and dispatch
//! - **buffer**: frame buffer and batch scheduler
//! - **dedupe**: lag-1 and sliding-window duplicate frame defense
//! - **artifact**: optional `.amr` capture per call
//! - **pcm**: length normalization, sample conversion, resampling
//! - **g711**: PCMU / PCMA expansion
//! - **session**: per-call codec state and the bounded registry
//!
//! ## Output Format:
//! - **Sample Rate**: caller's target rate (16 kHz by default)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono

pub mod artifact;
pub mod buffer;
pub mod codec;
pub mod dedupe;
pub mod g711;
pub mod pcm;
pub mod session;

pub use codec::{decode, CodecContext, DecodeRequest};
pub use session::CodecRegistry;

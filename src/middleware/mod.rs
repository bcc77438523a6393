pub mod metrics;

pub use metrics::record_http_metrics;

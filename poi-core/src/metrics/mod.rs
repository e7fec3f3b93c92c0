//! Metrics and instrumentation.
//!
//! Prometheus metrics for validation and consensus, plus a small HTTP
//! exporter serving `/metrics` in the Prometheus text format.
//!
//! ```ignore
//! use std::sync::Arc;
//! use poi_core::metrics::{MetricsRegistry, run_prometheus_http_server};
//!
//! let registry = Arc::new(MetricsRegistry::new()?);
//! tokio::spawn(run_prometheus_http_server(registry.clone(), "127.0.0.1:9898".parse()?));
//!
//! registry.consensus.block_validation_seconds.observe(duration_secs);
//! ```

pub mod prometheus;

pub use prometheus::{
    ConsensusMetrics, MetricsRegistry, ValidationMetrics, run_prometheus_http_server,
    serve_metrics,
};

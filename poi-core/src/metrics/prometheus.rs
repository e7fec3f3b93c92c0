//! Prometheus-backed metrics and HTTP exporter.
//!
//! [`MetricsRegistry`] owns a Prometheus registry (namespace `poi`) and the
//! strongly-typed metric handles updated by validation, consensus and the
//! node. [`run_prometheus_http_server`] serves them over `hyper`.

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    Method, Request, Response, StatusCode,
    body::Incoming,
    header::{self, HeaderValue},
    server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, warn};

use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};

/// Consensus round metrics.
#[derive(Clone)]
pub struct ConsensusMetrics {
    /// Latency of full block validation, in seconds.
    pub block_validation_seconds: Histogram,
    /// Wall-clock duration of one consensus round (including fallback).
    pub round_seconds: Histogram,
    /// Rounds by outcome: `accepted`, `rejected`, `failed`, `cancelled`.
    pub rounds_total: IntCounterVec,
    /// Rounds decided through stake-only selection.
    pub fallback_rounds_total: IntCounter,
    /// Validators that missed the solution deadline.
    pub validator_timeouts_total: IntCounter,
}

impl ConsensusMetrics {
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let block_validation_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "consensus_block_validation_seconds",
                "Time to validate a block (limits, history, transactions, roots) in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
        )?;
        registry.register(Box::new(block_validation_seconds.clone()))?;

        // Rounds are bounded by solution + vote timeouts, so the buckets go
        // well past the validation ones.
        let round_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "consensus_round_seconds",
                "Duration of a consensus round in seconds",
            )
            .buckets(vec![
                0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0,
            ]),
        )?;
        registry.register(Box::new(round_seconds.clone()))?;

        let rounds_total = IntCounterVec::new(
            Opts::new("consensus_rounds_total", "Consensus rounds by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(rounds_total.clone()))?;

        let fallback_rounds_total = IntCounter::with_opts(Opts::new(
            "consensus_fallback_rounds_total",
            "Rounds decided by stake-only validator selection",
        ))?;
        registry.register(Box::new(fallback_rounds_total.clone()))?;

        let validator_timeouts_total = IntCounter::with_opts(Opts::new(
            "consensus_validator_timeouts_total",
            "Challenge solicitations that hit the per-validator timeout",
        ))?;
        registry.register(Box::new(validator_timeouts_total.clone()))?;

        Ok(Self {
            block_validation_seconds,
            round_seconds,
            rounds_total,
            fallback_rounds_total,
            validator_timeouts_total,
        })
    }
}

/// Transaction admission and block rejection counters.
#[derive(Clone)]
pub struct ValidationMetrics {
    /// Rejected transactions by error class.
    pub tx_rejected_total: IntCounterVec,
    /// Rejected blocks by reason code.
    pub blocks_rejected_total: IntCounterVec,
}

impl ValidationMetrics {
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let tx_rejected_total = IntCounterVec::new(
            Opts::new(
                "validation_tx_rejected_total",
                "Transactions rejected at admission, by error class",
            ),
            &["class"],
        )?;
        registry.register(Box::new(tx_rejected_total.clone()))?;

        let blocks_rejected_total = IntCounterVec::new(
            Opts::new(
                "validation_blocks_rejected_total",
                "Blocks rejected by validation, by reason code",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(blocks_rejected_total.clone()))?;

        Ok(Self {
            tx_rejected_total,
            blocks_rejected_total,
        })
    }
}

/// Wrapper around a Prometheus registry and the typed metric groups.
///
/// This is the handle passed around in the node, usually behind an [`Arc`].
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    pub consensus: ConsensusMetrics,
    pub validation: ValidationMetrics,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("poi".to_string()), None)?;
        let consensus = ConsensusMetrics::register(&registry)?;
        let validation = ValidationMetrics::register(&registry)?;
        Ok(Self {
            registry,
            consensus,
            validation,
        })
    }

    /// Encodes all metrics in this registry into the Prometheus text format.
    pub fn gather_text(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            warn!(error = %e, "failed to encode Prometheus metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Binds `addr` and serves `GET /metrics`; every other path returns 404.
///
/// Intended to be spawned onto a Tokio runtime:
///
/// ```ignore
/// let registry = Arc::new(MetricsRegistry::new()?);
/// tokio::spawn(run_prometheus_http_server(registry.clone(), "127.0.0.1:9898".parse()?));
/// ```
pub async fn run_prometheus_http_server(
    metrics: Arc<MetricsRegistry>,
    addr: SocketAddr,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_metrics(listener, metrics).await
}

/// Accept loop over an already bound listener.
pub async fn serve_metrics(
    listener: TcpListener,
    metrics: Arc<MetricsRegistry>,
) -> std::io::Result<()> {
    if let Ok(local) = listener.local_addr() {
        debug!(addr = %local, "metrics exporter listening");
    }

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let svc = service_fn(move |req| {
                let metrics = metrics.clone();
                handle_request(req, metrics)
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, svc).await {
                debug!(error = %err, "metrics connection closed with error");
            }
        });
    }
}

async fn handle_request(
    req: Request<Incoming>,
    metrics: Arc<MetricsRegistry>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let mut resp = Response::new(Full::new(Bytes::from(metrics.gather_text())));
            resp.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            Ok(resp)
        }
        _ => {
            let mut resp = Response::new(Full::new(Bytes::from_static(b"not found")));
            *resp.status_mut() = StatusCode::NOT_FOUND;
            Ok(resp)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_and_record() {
        let registry = Registry::new();
        let consensus = ConsensusMetrics::register(&registry).expect("register consensus");
        let validation = ValidationMetrics::register(&registry).expect("register validation");

        consensus.block_validation_seconds.observe(0.123);
        consensus.round_seconds.observe(3.0);
        consensus.rounds_total.with_label_values(&["accepted"]).inc();
        consensus.fallback_rounds_total.inc();
        consensus.validator_timeouts_total.inc_by(3);
        validation
            .tx_rejected_total
            .with_label_values(&["structural"])
            .inc();

        assert_eq!(consensus.validator_timeouts_total.get(), 3);
        assert!(!registry.gather().is_empty());
    }

    #[test]
    fn gather_text_is_namespaced() {
        let registry = MetricsRegistry::new().expect("create metrics registry");
        registry.consensus.block_validation_seconds.observe(0.01);
        registry
            .validation
            .blocks_rejected_total
            .with_label_values(&["state.bad_nonce"])
            .inc();

        let text = registry.gather_text();
        assert!(text.contains("poi_consensus_block_validation_seconds"));
        assert!(text.contains("poi_validation_blocks_rejected_total{reason=\"state.bad_nonce\"} 1"));
    }

    #[tokio::test]
    async fn exporter_serves_metrics_and_404s_elsewhere() {
        let registry = Arc::new(MetricsRegistry::new().expect("registry"));
        registry.consensus.fallback_rounds_total.inc();

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(serve_metrics(listener, registry));

        let ok = reqwest::get(format!("http://{addr}/metrics"))
            .await
            .expect("GET /metrics");
        assert_eq!(ok.status(), reqwest::StatusCode::OK);
        let body = ok.text().await.expect("body");
        assert!(body.contains("poi_consensus_fallback_rounds_total 1"));

        let missing = reqwest::get(format!("http://{addr}/other"))
            .await
            .expect("GET /other");
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    }
}

//! Top-level configuration for a validator node.
//!
//! This module aggregates configuration for:
//!
//! - transaction and block validation limits (`ValidationConfig`),
//! - the admission worker pool and validation gate (`PipelineConfig`),
//! - Proof-of-Intelligence round parameters (`PoiConfig`),
//! - block assembly (`ProposerConfig`),
//! - storage (RocksDB path and creation flags),
//! - the remote solution evaluator (URL + timeout),
//! - the metrics exporter (enable flag + listen address).
//!
//! Every section falls back to its defaults when omitted, so a JSON file
//! only needs the values it changes.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::consensus::{PoiConfig, ProposerConfig};
use crate::evaluator::EvaluatorClientConfig;
use crate::pipeline::PipelineConfig;
use crate::storage::RocksDbConfig;
use crate::validation::ValidationConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether to run a `/metrics` HTTP exporter.
    pub enabled: bool,
    /// Address to bind the metrics HTTP server to.
    pub listen_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 9898)),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub validation: ValidationConfig,
    pub pipeline: PipelineConfig,
    pub consensus: PoiConfig,
    pub proposer: ProposerConfig,
    pub storage: RocksDbConfig,
    pub evaluator: EvaluatorClientConfig,
    pub metrics: MetricsConfig,
}

impl ChainConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Rejects settings no node can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        let v = &self.validation;
        if v.min_gas_limit > v.max_gas_limit {
            return invalid(format!(
                "validation.min_gas_limit {} exceeds max_gas_limit {}",
                v.min_gas_limit, v.max_gas_limit
            ));
        }
        if v.max_block_txs == 0 || v.max_block_size_bytes == 0 {
            return invalid("validation block limits must be positive".to_string());
        }

        let p = &self.pipeline;
        if p.workers == 0 || p.queue_capacity == 0 || p.max_concurrent_blocks == 0 {
            return invalid("pipeline workers, queue_capacity and max_concurrent_blocks must be positive".to_string());
        }

        let c = &self.consensus;
        if c.base_committee == 0 {
            return invalid("consensus.base_committee must be positive".to_string());
        }
        if c.max_difficulty == 0 {
            return invalid("consensus.max_difficulty must be positive".to_string());
        }
        if !(c.complexity_divisor > 0.0) || !(c.stake_normaliser > 0.0) {
            return invalid("consensus divisors must be positive".to_string());
        }
        if (c.weights.sum() - 1.0).abs() > 1e-6 {
            return invalid(format!(
                "consensus.weights must sum to 1, got {}",
                c.weights.sum()
            ));
        }

        if self.proposer.max_block_txs > v.max_block_txs {
            return invalid(format!(
                "proposer.max_block_txs {} exceeds validation.max_block_txs {}",
                self.proposer.max_block_txs, v.max_block_txs
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ChainConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.consensus.base_committee, 21);
        assert_eq!(cfg.metrics.listen_addr.port(), 9898);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = ChainConfig::from_json_str(
            r#"{
                "consensus": { "base_committee": 7 },
                "metrics": { "enabled": false },
                "storage": { "path": "/tmp/poi" }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.consensus.base_committee, 7);
        assert_eq!(cfg.consensus.max_difficulty, 5);
        assert!(!cfg.metrics.enabled);
        assert_eq!(cfg.storage.path, "/tmp/poi");
        assert!(cfg.storage.create_if_missing);
    }

    #[test]
    fn inconsistent_values_are_rejected() {
        let err = ChainConfig::from_json_str(
            r#"{ "validation": { "min_gas_limit": 100, "max_gas_limit": 10 } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = ChainConfig::from_json_str(r#"{ "pipeline": { "workers": 0 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = ChainConfig::from_json_str(
            r#"{ "consensus": { "weights": { "intelligence": 0.9 } } }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("sum to 1"));

        assert!(matches!(
            ChainConfig::from_json_str("{ nope").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn missing_file_reports_the_path() {
        let err = ChainConfig::from_json_file("/definitely/not/here.json").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }
}

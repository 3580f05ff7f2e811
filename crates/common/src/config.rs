//! Configuration structures for ModelGrid
//!
//! This module defines all configuration types used across brokers and
//! workers. Configurations are loaded from YAML files; the file path comes
//! from the `MODELGRID_CONFIG` environment variable in the binaries.

use crate::error::{ModelGridError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for ModelGrid components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelGridConfig {
    /// Mode: either "broker" or "worker"
    pub mode: String,

    /// Server binding address (broker) or local bind hint (worker)
    pub bind_address: String,

    /// Worker-transport listener port (broker mode)
    pub port: u16,

    /// Broker-specific configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker: Option<BrokerConfig>,

    /// Worker-specific configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerConfig>,

    /// Observability configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

/// Broker-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Port for the HTTP front door
    pub http_port: u16,

    /// Shared secret checked on mutating HTTP endpoints
    pub api_key: String,

    /// Dispatch deadline in seconds
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_secs: u64,

    /// How long a new connection may take to send its register frame
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Selection retries after losing an acquisition race
    #[serde(default = "default_selection_retries")]
    pub selection_retries: u32,

    /// Scoring weights for model selection
    #[serde(default)]
    pub scoring: ScoringWeights,

    /// Prompt length above which reasoning outranks coding in the score
    #[serde(default = "default_long_prompt_threshold")]
    pub long_prompt_threshold: usize,
}

/// Weights of the model-selection score. The weighted-score policy is the
/// canonical one; the weights are configuration, not law.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoringWeights {
    /// Context fit term
    #[serde(default = "default_w_ctx")]
    pub w_ctx: f64,

    /// Speed-per-requested-token term
    #[serde(default = "default_w_n")]
    pub w_n: f64,

    /// Creativity * temperature term
    #[serde(default = "default_w_t")]
    pub w_t: f64,

    /// Prompt-kind term (reasoning vs coding)
    #[serde(default = "default_w_p")]
    pub w_p: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            w_ctx: default_w_ctx(),
            w_n: default_w_n(),
            w_t: default_w_t(),
            w_p: default_w_p(),
        }
    }
}

/// Worker-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Broker address to dial, e.g. "10.0.0.5:9999"
    pub broker_addr: String,

    /// Fixed reconnect backoff in seconds
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_secs: u64,

    /// Period of the resource-update push in seconds
    #[serde(default = "default_resource_interval")]
    pub resource_interval_secs: u64,

    /// Inference backend: "echo" or "http"
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Local inference engine URL (http backend)
    pub engine_url: Option<String>,

    /// Models advertised at registration
    pub models: Vec<ModelEntry>,

    /// Resource figures reported to the broker
    #[serde(default)]
    pub resources: ResourceConfig,
}

/// One advertised model in the worker's catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Model id/filename
    pub id: String,

    /// Context window in tokens
    pub context_window: u32,

    /// Capability scores
    #[serde(default = "default_capability")]
    pub coding: f64,

    #[serde(default = "default_capability")]
    pub reasoning: f64,

    #[serde(default = "default_capability")]
    pub creativity: f64,

    #[serde(default = "default_speed")]
    pub speed: f64,
}

/// Static resource figures, in bytes. Filled by operators or provisioning
/// tooling; OS-level probing lives outside this system.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub total_ram: u64,

    #[serde(default)]
    pub free_ram: u64,

    #[serde(default)]
    pub total_vram: u64,

    #[serde(default)]
    pub free_vram: u64,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable Prometheus metrics
    #[serde(default = "default_metrics")]
    pub enable_metrics: bool,
}

/// Default value functions
fn default_dispatch_timeout() -> u64 {
    60
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_selection_retries() -> u32 {
    3
}

fn default_long_prompt_threshold() -> usize {
    100
}

fn default_w_ctx() -> f64 {
    0.3
}

fn default_w_n() -> f64 {
    0.2
}

fn default_w_t() -> f64 {
    0.3
}

fn default_w_p() -> f64 {
    0.2
}

fn default_reconnect_backoff() -> u64 {
    5
}

fn default_resource_interval() -> u64 {
    60
}

fn default_backend() -> String {
    "echo".to_string()
}

fn default_capability() -> f64 {
    0.5
}

fn default_speed() -> f64 {
    1.0
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics() -> bool {
    true
}

impl ModelGridConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            ModelGridError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: ModelGridConfig = serde_yaml::from_str(&content).map_err(|e| {
            ModelGridError::Config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        match self.mode.as_str() {
            "broker" => {
                let broker = self
                    .broker
                    .as_ref()
                    .ok_or_else(|| ModelGridError::config("Broker config required for broker mode"))?;
                if broker.api_key.is_empty() {
                    return Err(ModelGridError::config("api_key must not be empty"));
                }
                if broker.dispatch_timeout_secs == 0 {
                    return Err(ModelGridError::config("dispatch_timeout_secs must be positive"));
                }
            }
            "worker" => {
                let worker = self
                    .worker
                    .as_ref()
                    .ok_or_else(|| ModelGridError::config("Worker config required for worker mode"))?;
                if worker.models.is_empty() {
                    return Err(ModelGridError::config("worker must advertise at least one model"));
                }
                if worker.backend == "http" && worker.engine_url.is_none() {
                    return Err(ModelGridError::config("http backend requires engine_url"));
                }
                if !matches!(worker.backend.as_str(), "echo" | "http") {
                    return Err(ModelGridError::config(format!(
                        "Unknown backend: {}",
                        worker.backend
                    )));
                }
            }
            _ => {
                return Err(ModelGridError::config(format!("Invalid mode: {}", self.mode)));
            }
        }
        Ok(())
    }

    /// Get the dispatch deadline as Duration
    pub fn dispatch_timeout(&self) -> Result<Duration> {
        let broker = self
            .broker
            .as_ref()
            .ok_or_else(|| ModelGridError::config("Broker config not found"))?;

        Ok(Duration::from_secs(broker.dispatch_timeout_secs))
    }

    /// Get the worker reconnect backoff as Duration
    pub fn reconnect_backoff(&self) -> Result<Duration> {
        let worker = self
            .worker
            .as_ref()
            .ok_or_else(|| ModelGridError::config("Worker config not found"))?;

        Ok(Duration::from_secs(worker.reconnect_backoff_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker_config() -> ModelGridConfig {
        ModelGridConfig {
            mode: "broker".to_string(),
            bind_address: "0.0.0.0".to_string(),
            port: 9999,
            broker: Some(BrokerConfig {
                http_port: 8080,
                api_key: "secret".to_string(),
                dispatch_timeout_secs: 60,
                handshake_timeout_secs: 10,
                selection_retries: 3,
                scoring: ScoringWeights::default(),
                long_prompt_threshold: 100,
            }),
            worker: None,
            observability: None,
        }
    }

    #[test]
    fn test_broker_config_validation() {
        assert!(broker_config().validate().is_ok());
    }

    #[test]
    fn test_broker_config_rejects_empty_api_key() {
        let mut config = broker_config();
        config.broker.as_mut().unwrap().api_key.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_worker_config_requires_models() {
        let config = ModelGridConfig {
            mode: "worker".to_string(),
            bind_address: "0.0.0.0".to_string(),
            port: 0,
            broker: None,
            worker: Some(WorkerConfig {
                broker_addr: "127.0.0.1:9999".to_string(),
                reconnect_backoff_secs: 5,
                resource_interval_secs: 60,
                backend: "echo".to_string(),
                engine_url: None,
                models: Vec::new(),
                resources: ResourceConfig::default(),
            }),
            observability: None,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_yaml_defaults() {
        let yaml = r#"
mode: worker
bind_address: "0.0.0.0"
port: 0
worker:
  broker_addr: "127.0.0.1:9999"
  models:
    - id: llama3-8b
      context_window: 8192
"#;

        let config: ModelGridConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        let worker = config.worker.unwrap();
        assert_eq!(worker.reconnect_backoff_secs, 5);
        assert_eq!(worker.resource_interval_secs, 60);
        assert_eq!(worker.backend, "echo");
        assert_eq!(worker.models[0].coding, 0.5);
        assert_eq!(worker.models[0].speed, 1.0);
    }

    #[test]
    fn test_scoring_weight_defaults() {
        let weights = ScoringWeights::default();
        assert_eq!(weights.w_ctx, 0.3);
        assert_eq!(weights.w_n, 0.2);
        assert_eq!(weights.w_t, 0.3);
        assert_eq!(weights.w_p, 0.2);
    }
}

//! Controller configuration

use anyhow::{Context, Result};
use controller_lib::prediction::{DEFAULT_ALGORITHM_PATH, DEFAULT_INTERPRETER};
use controller_lib::traffic::GathererConfig;
use controller_lib::ControllerConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Settings read from `PHPA_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// API server port for health/metrics/status
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Prometheus server queried for live traffic
    #[serde(default = "default_prometheus_url")]
    pub prometheus_url: String,

    /// JSON array of Autoscaler objects to manage
    #[serde(default = "default_manifest_path")]
    pub manifest_path: PathBuf,

    /// Interval between passes for a healthy Autoscaler
    #[serde(default = "default_sync_period")]
    pub sync_period_secs: u64,

    /// Deadline for one whole reconcile pass
    #[serde(default = "default_pass_timeout")]
    pub pass_timeout_secs: u64,

    #[serde(default = "default_metrics_timeout")]
    pub metrics_timeout_secs: u64,

    /// Predictor timeout for models without an override
    #[serde(default = "default_prediction_timeout")]
    pub prediction_timeout_ms: u64,

    #[serde(default = "default_algorithm_path")]
    pub algorithm_path: String,

    #[serde(default = "default_interpreter")]
    pub interpreter: String,
}

fn default_api_port() -> u16 {
    8080
}

fn default_prometheus_url() -> String {
    "http://prometheus:9090".to_string()
}

fn default_manifest_path() -> PathBuf {
    PathBuf::from("/etc/phpa/autoscalers.json")
}

fn default_sync_period() -> u64 {
    60
}

fn default_pass_timeout() -> u64 {
    120
}

fn default_metrics_timeout() -> u64 {
    10
}

fn default_prediction_timeout() -> u64 {
    30_000
}

fn default_algorithm_path() -> String {
    DEFAULT_ALGORITHM_PATH.to_string()
}

fn default_interpreter() -> String {
    DEFAULT_INTERPRETER.to_string()
}

impl Settings {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration from `vars` instead of the process environment
    pub fn load_from(vars: Option<HashMap<String, String>>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("PHPA")
                    .try_parsing(true)
                    .source(vars),
            )
            .build()
            .context("failed to read PHPA_* environment")?
            .try_deserialize::<Settings>()
            .context("invalid controller configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.sync_period_secs == 0 {
            anyhow::bail!("PHPA_SYNC_PERIOD_SECS must be greater than zero");
        }
        if self.pass_timeout_secs == 0 || self.metrics_timeout_secs == 0 {
            anyhow::bail!("pass and metrics timeouts must be greater than zero");
        }
        if self.prediction_timeout_ms == 0 {
            anyhow::bail!("PHPA_PREDICTION_TIMEOUT_MS must be greater than zero");
        }
        Ok(())
    }

    pub fn sync_period(&self) -> Duration {
        Duration::from_secs(self.sync_period_secs)
    }

    pub fn prediction_timeout(&self) -> Duration {
        Duration::from_millis(self.prediction_timeout_ms)
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            pass_timeout: Duration::from_secs(self.pass_timeout_secs),
            ..ControllerConfig::default()
        }
    }

    pub fn gatherer_config(&self) -> GathererConfig {
        GathererConfig {
            query_timeout: Duration::from_secs(self.metrics_timeout_secs),
        }
    }
}

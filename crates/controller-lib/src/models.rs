//! Core data models for the predictive autoscaler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, ErrorKind, Result};

/// Namespaced identity of an Autoscaler object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Declarative autoscaling configuration plus live status for one workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Autoscaler {
    pub metadata: ObjectRef,
    pub spec: AutoscalerSpec,
    #[serde(default)]
    pub status: AutoscalerStatus,
}

impl Autoscaler {
    pub fn new(metadata: ObjectRef, spec: AutoscalerSpec) -> Self {
        Self {
            metadata,
            spec,
            status: AutoscalerStatus::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerSpec {
    pub scale_target_ref: ScaleTargetRef,
    #[serde(default = "default_min_replicas")]
    pub min_replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_metric: Option<TrafficMetric>,
    #[serde(default)]
    pub models: Vec<Model>,
}

fn default_min_replicas() -> i32 {
    1
}

/// The workload whose replica count is being predicted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleTargetRef {
    pub kind: String,
    pub name: String,
}

/// Query descriptor for the live traffic value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficMetric {
    pub prometheus_query: String,
}

/// A named prediction strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub name: String,
    /// Predictor timeout override in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculation_timeout: Option<u64>,
    #[serde(flatten)]
    pub kind: ModelKind,
}

impl Model {
    pub fn model_type(&self) -> ModelType {
        self.kind.model_type()
    }

    pub fn validate(&self) -> Result<()> {
        if self.calculation_timeout == Some(0) {
            return Err(Error::Config(format!(
                "model `{}`: calculationTimeout must be greater than zero",
                self.name
            )));
        }
        match &self.kind {
            ModelKind::Occum { occum } => occum
                .validate()
                .map_err(|e| Error::Config(format!("model `{}`: {}", self.name, e))),
        }
    }
}

/// Closed set of model kinds, each carrying its own configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ModelKind {
    Occum { occum: OccumConfig },
}

impl ModelKind {
    pub fn model_type(&self) -> ModelType {
        match self {
            ModelKind::Occum { .. } => ModelType::Occum,
        }
    }
}

/// Tag identifying a model kind, used to key histories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelType {
    Occum,
}

impl ModelType {
    pub const ALL: [ModelType; 1] = [ModelType::Occum];
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelType::Occum => f.write_str("Occum"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OccumConfig {
    /// Number of future intervals to predict
    pub look_ahead: u32,
    /// Number of traffic samples retained between passes
    pub history_size: usize,
    /// Traffic volume one replica can serve
    pub traffic_per_replica: f64,
}

impl OccumConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.history_size == 0 {
            return Err("historySize must be at least 1".to_string());
        }
        if !self.traffic_per_replica.is_finite() || self.traffic_per_replica <= 0.0 {
            return Err(format!(
                "trafficPerReplica must be a positive number, got {}",
                self.traffic_per_replica
            ));
        }
        Ok(())
    }
}

/// Observed state written back after each pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerStatus {
    #[serde(default)]
    pub current_replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconcile_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub model_histories: Vec<ModelHistory>,
    #[serde(default)]
    pub model_statuses: Vec<ModelStatus>,
}

/// Retained time series for one model type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelHistory {
    #[serde(rename = "type")]
    pub model_type: ModelType,
    #[serde(default)]
    pub samples: Vec<TimestampedSample>,
}

impl ModelHistory {
    pub fn new(model_type: ModelType) -> Self {
        Self {
            model_type,
            samples: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Most recent sample by timestamp; among equal timestamps the one appended last
    pub fn latest(&self) -> Option<&TimestampedSample> {
        self.samples.iter().max_by_key(|s| s.time)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedSample {
    pub time: DateTime<Utc>,
    pub value: f64,
}

/// Per-model outcome surfaced to operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStatus {
    pub name: String,
    #[serde(rename = "type")]
    pub model_type: ModelType,
    pub condition: ModelCondition,
    /// Last successful prediction, kept across failing passes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_prediction_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ModelError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelCondition {
    Predicted,
    NotReady,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelError {
    pub kind: ErrorKind,
    pub message: String,
    pub time: DateTime<Utc>,
}

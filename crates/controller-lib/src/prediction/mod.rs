//! Prediction invocation
//!
//! History is packaged into a [`PredictionRequest`], handed to an external
//! algorithm through an [`AlgorithmRunner`], and the textual answer is parsed
//! back into a replica count.

mod occum;
mod request;
mod runner;

pub use occum::{OccumPredicter, DEFAULT_ALGORITHM_PATH};
pub use request::{PredictionRequest, TrafficPoint, WIRE_TIME_FORMAT};
pub use runner::{AlgorithmRunner, ProcessRunner, DEFAULT_INTERPRETER};

use crate::error::{Error, Result};
use crate::models::{Model, ModelHistory, ModelType};
use async_trait::async_trait;
use std::time::Duration;

/// Predictor timeout used when a model does not override it
pub const DEFAULT_CALCULATION_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Prediction strategy for one model type
#[async_trait]
pub trait Predicter: Send + Sync {
    fn model_type(&self) -> ModelType;

    /// Predict the replica count needed `lookAhead` intervals from now
    async fn get_prediction(
        &self,
        model: &Model,
        history: &ModelHistory,
        max_replicas: Option<i32>,
    ) -> Result<i32>;

    /// Trim `history` to the model's retention size
    fn prune_history(&self, model: &Model, history: &mut ModelHistory) -> Result<()>;
}

/// Parse predictor output as a finite float
pub fn parse_prediction(output: &str) -> Result<f64> {
    let trimmed = output.trim();
    let value = trimmed.parse::<f64>().map_err(|e| Error::Parse {
        value: trimmed.to_string(),
        reason: e.to_string(),
    })?;
    if !value.is_finite() {
        return Err(Error::Parse {
            value: trimmed.to_string(),
            reason: "value is not finite".to_string(),
        });
    }
    Ok(value)
}

/// Round a traffic-denominated prediction up to whole replicas.
///
/// Negative values clamp to zero.
pub fn to_replica_count(value: f64) -> i32 {
    value.ceil().clamp(0.0, i32::MAX as f64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceiling_policy() {
        assert_eq!(to_replica_count(12.3), 13);
        assert_eq!(to_replica_count(12.0), 12);
        assert_eq!(to_replica_count(0.01), 1);
        assert_eq!(to_replica_count(0.0), 0);
    }

    #[test]
    fn test_replica_count_clamped() {
        assert_eq!(to_replica_count(-3.7), 0);
        assert_eq!(to_replica_count(1e12), i32::MAX);
    }

    #[test]
    fn test_parse_prediction() {
        assert_eq!(parse_prediction("12.3").unwrap(), 12.3);
        assert_eq!(parse_prediction(" 7\n").unwrap(), 7.0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_prediction("twelve"), Err(Error::Parse { .. })));
        assert!(matches!(parse_prediction(""), Err(Error::Parse { .. })));
        assert!(matches!(parse_prediction("NaN"), Err(Error::Parse { .. })));
        assert!(matches!(parse_prediction("inf"), Err(Error::Parse { .. })));
    }
}

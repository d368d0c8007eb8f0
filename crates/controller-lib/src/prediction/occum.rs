//! Occum traffic prediction
//!
//! Sends raw traffic history plus the traffic-per-replica ratio to the
//! prediction-adjustment algorithm, which answers with a replica estimate.

use super::{
    parse_prediction, to_replica_count, AlgorithmRunner, PredictionRequest, Predicter,
    DEFAULT_CALCULATION_TIMEOUT,
};
use crate::error::Result;
use crate::history;
use crate::models::{Model, ModelHistory, ModelKind, ModelType, OccumConfig};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_ALGORITHM_PATH: &str = "algorithms/prediction_adjustment/predict.py";

pub struct OccumPredicter {
    runner: Arc<dyn AlgorithmRunner>,
    algorithm_path: String,
    default_timeout: Duration,
}

impl OccumPredicter {
    pub fn new(runner: Arc<dyn AlgorithmRunner>) -> Self {
        Self {
            runner,
            algorithm_path: DEFAULT_ALGORITHM_PATH.to_string(),
            default_timeout: DEFAULT_CALCULATION_TIMEOUT,
        }
    }

    pub fn with_algorithm_path(mut self, path: impl Into<String>) -> Self {
        self.algorithm_path = path.into();
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Timeout for `model`, honoring its override
    pub fn timeout_for(&self, model: &Model) -> Duration {
        model
            .calculation_timeout
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout)
    }

    /// Serialize `request` and run the algorithm, returning its raw estimate
    pub async fn invoke(&self, request: &PredictionRequest, timeout: Duration) -> Result<f64> {
        let payload = request.to_json()?;
        let start = Instant::now();

        let output = self
            .runner
            .run_with_input(&self.algorithm_path, &payload, timeout)
            .await?;

        debug!(
            algorithm = %self.algorithm_path,
            elapsed_ms = start.elapsed().as_millis() as u64,
            samples = request.historical_traffic.len(),
            "Occum algorithm answered"
        );

        parse_prediction(&output)
    }

    fn config(model: &Model) -> &OccumConfig {
        match &model.kind {
            ModelKind::Occum { occum } => occum,
        }
    }
}

#[async_trait]
impl Predicter for OccumPredicter {
    fn model_type(&self) -> ModelType {
        ModelType::Occum
    }

    async fn get_prediction(
        &self,
        model: &Model,
        history: &ModelHistory,
        max_replicas: Option<i32>,
    ) -> Result<i32> {
        let request = PredictionRequest::build(Self::config(model), history, Utc::now(), max_replicas)?;
        let value = self.invoke(&request, self.timeout_for(model)).await?;
        Ok(to_replica_count(value))
    }

    fn prune_history(&self, model: &Model, history: &mut ModelHistory) -> Result<()> {
        history::prune(history, Self::config(model).history_size);
        Ok(())
    }
}

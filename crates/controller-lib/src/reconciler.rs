//! Idempotent reconcile pass for one Autoscaler
//!
//! Each pass reloads the object, runs every configured model through
//! gather -> append -> predict -> prune, merges the successful predictions
//! through the [`Evaluator`] and writes the status back. A failing model
//! never stops its siblings; only store failures abort the pass.

use crate::error::{Error, Result};
use crate::evaluator::{Evaluator, MaxEvaluator, ModelOutcome};
use crate::health::{components, HealthRegistry};
use crate::history;
use crate::models::{
    Autoscaler, AutoscalerStatus, Model, ModelCondition, ModelError, ModelKind, ModelStatus,
    ModelType, ObjectRef,
};
use crate::observability::{ControllerMetrics, StructuredLogger};
use crate::prediction::Predicter;
use crate::store::AutoscalerStore;
use crate::traffic::TrafficGatherer;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Default interval between passes for a healthy Autoscaler
pub const DEFAULT_SYNC_PERIOD: Duration = Duration::from_secs(60);

/// What the host should do after a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    requeue_after: Option<Duration>,
}

impl Action {
    pub fn requeue(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
        }
    }

    /// Do not schedule again until the object changes
    pub fn await_change() -> Self {
        Self {
            requeue_after: None,
        }
    }

    pub fn requeue_after(&self) -> Option<Duration> {
        self.requeue_after
    }
}

pub struct Reconciler {
    store: Arc<dyn AutoscalerStore>,
    gatherer: Arc<dyn TrafficGatherer>,
    occum: Arc<dyn Predicter>,
    evaluator: Arc<dyn Evaluator>,
    metrics: ControllerMetrics,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
    sync_period: Duration,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn AutoscalerStore>,
        gatherer: Arc<dyn TrafficGatherer>,
        occum: Arc<dyn Predicter>,
    ) -> Self {
        Self {
            store,
            gatherer,
            occum,
            evaluator: Arc::new(MaxEvaluator),
            metrics: ControllerMetrics::new(),
            logger: StructuredLogger::new("phpa-controller"),
            health: None,
            sync_period: DEFAULT_SYNC_PERIOD,
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_sync_period(mut self, sync_period: Duration) -> Self {
        self.sync_period = sync_period;
        self
    }

    pub fn sync_period(&self) -> Duration {
        self.sync_period
    }

    fn predicter_for(&self, model: &Model) -> &dyn Predicter {
        match model.kind {
            ModelKind::Occum { .. } => self.occum.as_ref(),
        }
    }

    #[instrument(skip(self, key), fields(autoscaler = %key))]
    pub async fn reconcile(&self, key: &ObjectRef) -> Result<Action> {
        let start = Instant::now();
        let result = self.reconcile_inner(key).await;
        self.metrics
            .observe_reconcile_latency(start.elapsed().as_secs_f64());

        match &result {
            Ok(action) if action.requeue_after().is_none() => self.metrics.inc_reconcile("not_found"),
            Ok(_) => self.metrics.inc_reconcile("success"),
            Err(_) => self.metrics.inc_reconcile("error"),
        }
        if let (Some(health), Err(e)) = (&self.health, &result) {
            health.record_error(e.kind(), e.to_string()).await;
        }
        result
    }

    async fn reconcile_inner(&self, key: &ObjectRef) -> Result<Action> {
        let mut autoscaler = match self.store.get(key).await {
            Ok(autoscaler) => autoscaler,
            Err(Error::NotFound(_)) => {
                debug!("Autoscaler no longer exists, nothing to do");
                return Ok(Action::await_change());
            }
            Err(e) => return Err(e),
        };
        let pass_time = Utc::now();

        let models = autoscaler.spec.models.clone();
        let mut claimed = HashSet::new();
        let mut outcomes = Vec::with_capacity(models.len());

        for model in &models {
            let result = self.run_model(&mut autoscaler, model, &mut claimed).await;
            self.report_outcome(&autoscaler, model, &result).await;
            outcomes.push(ModelOutcome {
                name: model.name.clone(),
                model_type: model.model_type(),
                result,
            });
        }

        let desired = self.evaluator.evaluate(&autoscaler, &outcomes);
        let successful = outcomes.iter().filter(|o| o.result.is_ok()).count();
        self.logger.log_scale_decision(
            &autoscaler.metadata,
            autoscaler.status.current_replicas,
            desired,
            successful,
            outcomes.len(),
        );

        update_model_statuses(&mut autoscaler.status, &outcomes, pass_time);
        autoscaler.status.desired_replicas = Some(desired);
        autoscaler.status.last_reconcile_time = Some(pass_time);

        match self.store.update_status(&autoscaler).await {
            Ok(()) => {}
            Err(Error::NotFound(_)) => {
                debug!("Autoscaler deleted during pass, dropping status");
                return Ok(Action::await_change());
            }
            Err(e) => return Err(e),
        }
        if let Some(health) = &self.health {
            health.set_healthy(components::STORE).await;
        }

        Ok(Action::requeue(self.sync_period))
    }

    /// Run one model through gather, history update, prediction and pruning.
    ///
    /// `claimed` holds the model types already handled this pass; a type is
    /// only claimed once the model configuring it has validated.
    async fn run_model(
        &self,
        autoscaler: &mut Autoscaler,
        model: &Model,
        claimed: &mut HashSet<ModelType>,
    ) -> Result<i32> {
        model.validate()?;
        let model_type = model.model_type();
        if !claimed.insert(model_type) {
            return Err(Error::Config(format!(
                "model `{}`: duplicate model type {}",
                model.name, model_type
            )));
        }
        let predicter = self.predicter_for(model);

        let gather_start = Instant::now();
        let gathered = self.gatherer.gather_traffic(autoscaler).await;
        self.metrics
            .observe_gather_latency(gather_start.elapsed().as_secs_f64());

        let traffic = match gathered {
            Ok(traffic) => traffic,
            Err(e) => {
                // Retention changes still apply to the untouched history
                if let Some(existing) = history::find_mut(&mut autoscaler.status, model_type) {
                    if let Err(prune_err) = predicter.prune_history(model, existing) {
                        warn!(model = %model.name, error = %prune_err, "Failed to prune history");
                    }
                }
                return Err(e);
            }
        };

        let max_replicas = autoscaler.spec.max_replicas;
        let model_history = history::find_or_create(&mut autoscaler.status, model_type);
        history::append(model_history, Utc::now(), traffic);

        let predict_start = Instant::now();
        let prediction = predicter
            .get_prediction(model, model_history, max_replicas)
            .await;
        self.metrics
            .observe_prediction_latency(predict_start.elapsed().as_secs_f64());

        let pruned = predicter.prune_history(model, model_history);
        self.metrics
            .set_history_samples(&autoscaler.metadata, model_type, model_history.len());

        let replicas = prediction?;
        pruned?;
        Ok(replicas)
    }

    async fn report_outcome(&self, autoscaler: &Autoscaler, model: &Model, result: &Result<i32>) {
        match result {
            Ok(replicas) => {
                self.metrics.inc_predictions();
                let history_len = history::find(&autoscaler.status, model.model_type())
                    .map(|h| h.len())
                    .unwrap_or(0);
                self.logger.log_prediction(
                    &autoscaler.metadata,
                    &model.name,
                    model.model_type(),
                    *replicas,
                    history_len,
                );
                if let Some(health) = &self.health {
                    health.set_healthy(components::GATHERER).await;
                    health.set_healthy(components::PREDICTER).await;
                }
            }
            Err(e) => {
                self.metrics.inc_model_error(e.kind());
                self.logger
                    .log_model_failure(&autoscaler.metadata, &model.name, e);
                if let Some(health) = &self.health {
                    health
                        .record_error(e.kind(), format!("{}: {}", autoscaler.metadata, e))
                        .await;
                }
            }
        }
    }
}

/// Rebuild per-model statuses from this pass's outcomes.
///
/// Entries are matched by model name; models no longer configured drop out.
fn update_model_statuses(
    status: &mut AutoscalerStatus,
    outcomes: &[ModelOutcome],
    now: DateTime<Utc>,
) {
    let previous = std::mem::take(&mut status.model_statuses);

    status.model_statuses = outcomes
        .iter()
        .map(|outcome| {
            let mut entry = previous
                .iter()
                .find(|s| s.name == outcome.name)
                .cloned()
                .unwrap_or_else(|| ModelStatus {
                    name: outcome.name.clone(),
                    model_type: outcome.model_type,
                    condition: ModelCondition::NotReady,
                    predicted_replicas: None,
                    last_prediction_time: None,
                    last_error: None,
                });
            entry.model_type = outcome.model_type;

            match &outcome.result {
                Ok(replicas) => {
                    entry.condition = ModelCondition::Predicted;
                    entry.predicted_replicas = Some(*replicas);
                    entry.last_prediction_time = Some(now);
                    entry.last_error = None;
                }
                Err(e) => {
                    entry.condition = if e.is_not_ready() {
                        ModelCondition::NotReady
                    } else {
                        ModelCondition::Failed
                    };
                    entry.last_error = Some(ModelError {
                        kind: e.kind(),
                        message: e.to_string(),
                        time: now,
                    });
                }
            }
            entry
        })
        .collect();
}

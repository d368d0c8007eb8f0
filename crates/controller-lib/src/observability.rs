//! Observability infrastructure for the autoscaler controller
//!
//! Provides:
//! - Prometheus metrics (reconcile, gather and prediction latency, error counts, history size)
//! - Structured JSON event logging with tracing

use crate::error::{Error, ErrorKind};
use crate::models::{ModelType, ObjectRef};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge_vec,
    Histogram, IntCounter, IntCounterVec, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Latency buckets in seconds; predictor runs can take tens of seconds
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

static GLOBAL_METRICS: OnceLock<ControllerMetricsInner> = OnceLock::new();

struct ControllerMetricsInner {
    reconcile_duration_seconds: Histogram,
    gather_duration_seconds: Histogram,
    prediction_duration_seconds: Histogram,
    reconcile_total: IntCounterVec,
    predictions_total: IntCounter,
    model_errors_total: IntCounterVec,
    history_samples: IntGaugeVec,
}

impl ControllerMetricsInner {
    fn new() -> Self {
        Self {
            reconcile_duration_seconds: register_histogram!(
                "phpa_reconcile_duration_seconds",
                "Time spent in one reconcile pass",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register reconcile_duration_seconds"),

            gather_duration_seconds: register_histogram!(
                "phpa_gather_duration_seconds",
                "Time spent querying the metrics backend for traffic",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register gather_duration_seconds"),

            prediction_duration_seconds: register_histogram!(
                "phpa_prediction_duration_seconds",
                "Time spent waiting on the external predictor",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register prediction_duration_seconds"),

            reconcile_total: register_int_counter_vec!(
                "phpa_reconcile_total",
                "Reconcile passes by result",
                &["result"]
            )
            .expect("Failed to register reconcile_total"),

            predictions_total: register_int_counter!(
                "phpa_predictions_total",
                "Total number of successful model predictions"
            )
            .expect("Failed to register predictions_total"),

            model_errors_total: register_int_counter_vec!(
                "phpa_model_errors_total",
                "Model failures by error kind",
                &["kind"]
            )
            .expect("Failed to register model_errors_total"),

            history_samples: register_int_gauge_vec!(
                "phpa_history_samples",
                "Samples retained per autoscaler and model type",
                &["autoscaler", "model"]
            )
            .expect("Failed to register history_samples"),
        }
    }
}

/// Handle to the process-wide controller metrics.
///
/// Clones share the same registered collectors.
#[derive(Clone)]
pub struct ControllerMetrics {
    _private: (),
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ControllerMetricsInner {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new)
    }

    pub fn observe_reconcile_latency(&self, duration_secs: f64) {
        self.inner().reconcile_duration_seconds.observe(duration_secs);
    }

    pub fn observe_gather_latency(&self, duration_secs: f64) {
        self.inner().gather_duration_seconds.observe(duration_secs);
    }

    pub fn observe_prediction_latency(&self, duration_secs: f64) {
        self.inner().prediction_duration_seconds.observe(duration_secs);
    }

    /// Count a finished pass; `result` is `success`, `not_found`, `error` or `timeout`
    pub fn inc_reconcile(&self, result: &str) {
        self.inner().reconcile_total.with_label_values(&[result]).inc();
    }

    pub fn inc_predictions(&self) {
        self.inner().predictions_total.inc();
    }

    pub fn inc_model_error(&self, kind: ErrorKind) {
        self.inner()
            .model_errors_total
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    pub fn set_history_samples(&self, autoscaler: &ObjectRef, model: ModelType, samples: usize) {
        self.inner()
            .history_samples
            .with_label_values(&[&autoscaler.to_string(), &model.to_string()])
            .set(samples as i64);
    }

    /// Drop the per-model series of an Autoscaler that left the store
    pub fn clear_autoscaler(&self, autoscaler: &ObjectRef) {
        let name = autoscaler.to_string();
        for model in ModelType::ALL {
            // Absent series are not an error here
            let _ = self
                .inner()
                .history_samples
                .remove_label_values(&[&name, &model.to_string()]);
        }
    }

    pub fn reconcile_count(&self, result: &str) -> u64 {
        self.inner().reconcile_total.with_label_values(&[result]).get()
    }

    pub fn model_error_count(&self, kind: ErrorKind) -> u64 {
        self.inner()
            .model_errors_total
            .with_label_values(&[kind.as_str()])
            .get()
    }
}

/// Structured logger for controller events
#[derive(Clone)]
pub struct StructuredLogger {
    controller: String,
}

impl StructuredLogger {
    pub fn new(controller: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
        }
    }

    pub fn log_prediction(
        &self,
        autoscaler: &ObjectRef,
        model: &str,
        model_type: ModelType,
        replicas: i32,
        history_len: usize,
    ) {
        info!(
            event = "prediction_generated",
            controller = %self.controller,
            autoscaler = %autoscaler,
            model = %model,
            model_type = %model_type,
            predicted_replicas = replicas,
            history_len = history_len,
            "Generated replica prediction"
        );
    }

    /// Log a model failure at a level matching its kind
    pub fn log_model_failure(&self, autoscaler: &ObjectRef, model: &str, err: &Error) {
        match err.kind() {
            ErrorKind::Parse => error!(
                event = "model_failed",
                controller = %self.controller,
                autoscaler = %autoscaler,
                model = %model,
                kind = %err.kind(),
                error = %err,
                "Predictor returned unparseable output"
            ),
            ErrorKind::NoHistory => info!(
                event = "model_failed",
                controller = %self.controller,
                autoscaler = %autoscaler,
                model = %model,
                kind = %err.kind(),
                "Model not ready, no history yet"
            ),
            _ => warn!(
                event = "model_failed",
                controller = %self.controller,
                autoscaler = %autoscaler,
                model = %model,
                kind = %err.kind(),
                retryable = err.is_retryable(),
                error = %err,
                "Model failed"
            ),
        }
    }

    pub fn log_scale_decision(
        &self,
        autoscaler: &ObjectRef,
        current_replicas: i32,
        desired_replicas: i32,
        successful_models: usize,
        total_models: usize,
    ) {
        info!(
            event = "scale_decision",
            controller = %self.controller,
            autoscaler = %autoscaler,
            current_replicas = current_replicas,
            desired_replicas = desired_replicas,
            successful_models = successful_models,
            total_models = total_models,
            "Computed desired replicas"
        );
    }

    pub fn log_startup(&self, version: &str, autoscalers: usize) {
        info!(
            event = "controller_started",
            controller = %self.controller,
            version = %version,
            autoscalers = autoscalers,
            "Autoscaler controller started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            controller = %self.controller,
            reason = %reason,
            "Autoscaler controller shutting down"
        );
    }
}

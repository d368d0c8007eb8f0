//! Decision core for a predictive horizontal pod autoscaler
//!
//! This crate provides:
//! - Traffic gathering from a metrics backend
//! - Per-model history with bounded retention
//! - Invocation of external prediction algorithms
//! - The reconcile pass and the control loop that schedules it
//! - Health checks and observability

pub mod controller;
pub mod error;
pub mod evaluator;
pub mod health;
pub mod history;
pub mod models;
pub mod observability;
pub mod prediction;
pub mod reconciler;
pub mod store;
pub mod traffic;

pub use controller::{Controller, ControllerConfig};
pub use error::{Error, ErrorKind, Result};
pub use evaluator::{Evaluator, MaxEvaluator, ModelOutcome};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ControllerMetrics, StructuredLogger};
pub use prediction::{AlgorithmRunner, OccumPredicter, Predicter, ProcessRunner};
pub use reconciler::{Action, Reconciler};
pub use store::{AutoscalerStore, InMemoryStore};
pub use traffic::{MetricsBackend, MetricsGatherer, PrometheusClient, TrafficGatherer};

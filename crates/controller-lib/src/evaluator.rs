//! Merge per-model predictions into a single replica target

use crate::error::Result;
use crate::models::{Autoscaler, ModelType};

/// Result of running one model during a reconcile pass
#[derive(Debug)]
pub struct ModelOutcome {
    pub name: String,
    pub model_type: ModelType,
    pub result: Result<i32>,
}

impl ModelOutcome {
    pub fn predicted(&self) -> Option<i32> {
        self.result.as_ref().ok().copied()
    }
}

pub trait Evaluator: Send + Sync {
    /// Desired replica count for `autoscaler` given this pass's outcomes
    fn evaluate(&self, autoscaler: &Autoscaler, outcomes: &[ModelOutcome]) -> i32;
}

/// Takes the largest successful prediction, bounded by the Autoscaler's
/// `minReplicas`/`maxReplicas`. With no successful prediction the current
/// replica count is held unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct MaxEvaluator;

impl Evaluator for MaxEvaluator {
    fn evaluate(&self, autoscaler: &Autoscaler, outcomes: &[ModelOutcome]) -> i32 {
        let Some(best) = outcomes.iter().filter_map(ModelOutcome::predicted).max() else {
            return autoscaler.status.current_replicas;
        };

        let spec = &autoscaler.spec;
        let mut replicas = best.max(spec.min_replicas);
        // maxReplicas wins over a misconfigured minReplicas
        if let Some(max) = spec.max_replicas {
            replicas = replicas.min(max);
        }
        replicas
    }
}

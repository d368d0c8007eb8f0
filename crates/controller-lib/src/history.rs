//! Per-model time-series history with bounded retention
//!
//! Histories live in the Autoscaler status, one per model type. Pruning is
//! sort-then-truncate so that a retention change made between passes applies
//! on the very next prune.

use crate::models::{AutoscalerStatus, ModelHistory, ModelType, TimestampedSample};
use chrono::{DateTime, Utc};

/// Return the history for `model_type`, appending an empty one if absent.
///
/// A linear scan by type tag; this is the only place histories are created,
/// so a status never holds two histories of the same type.
pub fn find_or_create(status: &mut AutoscalerStatus, model_type: ModelType) -> &mut ModelHistory {
    let index = match status
        .model_histories
        .iter()
        .position(|h| h.model_type == model_type)
    {
        Some(index) => index,
        None => {
            status.model_histories.push(ModelHistory::new(model_type));
            status.model_histories.len() - 1
        }
    };
    &mut status.model_histories[index]
}

pub fn find(status: &AutoscalerStatus, model_type: ModelType) -> Option<&ModelHistory> {
    status
        .model_histories
        .iter()
        .find(|h| h.model_type == model_type)
}

pub fn find_mut(status: &mut AutoscalerStatus, model_type: ModelType) -> Option<&mut ModelHistory> {
    status
        .model_histories
        .iter_mut()
        .find(|h| h.model_type == model_type)
}

pub fn append(history: &mut ModelHistory, time: DateTime<Utc>, value: f64) {
    history.samples.push(TimestampedSample { time, value });
}

/// Keep only the newest `retention` samples, newest first.
///
/// No-op when the history already fits. Among samples sharing a timestamp
/// the later-appended one counts as newer and survives first. Tied samples
/// stay in append order, matching [`ModelHistory::latest`].
pub fn prune(history: &mut ModelHistory, retention: usize) {
    if history.samples.len() <= retention {
        return;
    }

    let mut ranked: Vec<(usize, TimestampedSample)> =
        history.samples.drain(..).enumerate().collect();
    ranked.sort_by(|(ia, a), (ib, b)| b.time.cmp(&a.time).then(ib.cmp(ia)));
    ranked.truncate(retention);
    ranked.sort_by(|(ia, a), (ib, b)| b.time.cmp(&a.time).then(ia.cmp(ib)));

    history.samples = ranked.into_iter().map(|(_, sample)| sample).collect();
}

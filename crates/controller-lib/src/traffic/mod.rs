//! Live traffic gathering
//!
//! A [`TrafficGatherer`] turns an Autoscaler's traffic query into one scalar
//! for "now". [`MetricsGatherer`] implements it over any [`MetricsBackend`],
//! bounding each query with a timeout so a stalled backend cannot hold up
//! the reconcile worker.

mod prometheus;

pub use self::prometheus::PrometheusClient;

use crate::error::{Error, Result};
use crate::models::Autoscaler;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Default bound on a single metrics query
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of the current traffic value for an Autoscaler
#[async_trait]
pub trait TrafficGatherer: Send + Sync {
    async fn gather_traffic(&self, autoscaler: &Autoscaler) -> Result<f64>;
}

/// Time-series query service
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    /// Evaluate `query` at instant `at`
    async fn query(&self, query: &str, at: DateTime<Utc>) -> Result<QueryResult>;
}

/// Result series in the backend's natural order, plus any warnings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub series: Vec<Series>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

#[derive(Debug, Clone)]
pub struct GathererConfig {
    pub query_timeout: Duration,
}

impl Default for GathererConfig {
    fn default() -> Self {
        Self {
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

/// Gathers traffic from a [`MetricsBackend`]
///
/// When the query yields several series the first one is used.
pub struct MetricsGatherer<B> {
    backend: B,
    config: GathererConfig,
}

impl<B: MetricsBackend> MetricsGatherer<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, GathererConfig::default())
    }

    pub fn with_config(backend: B, config: GathererConfig) -> Self {
        Self { backend, config }
    }
}

#[async_trait]
impl<B: MetricsBackend> TrafficGatherer for MetricsGatherer<B> {
    async fn gather_traffic(&self, autoscaler: &Autoscaler) -> Result<f64> {
        let query = autoscaler
            .spec
            .traffic_metric
            .as_ref()
            .map(|m| m.prometheus_query.trim())
            .filter(|q| !q.is_empty())
            .ok_or_else(|| {
                Error::Config("no prometheus query configured for traffic metric".to_string())
            })?;

        let result = tokio::time::timeout(
            self.config.query_timeout,
            self.backend.query(query, Utc::now()),
        )
        .await
        .map_err(|_| {
            Error::Query(format!(
                "query timed out after {}ms",
                self.config.query_timeout.as_millis()
            ))
        })??;

        if !result.warnings.is_empty() {
            warn!(
                autoscaler = %autoscaler.metadata,
                warnings = ?result.warnings,
                "Metrics backend returned warnings"
            );
        }

        let first = result
            .series
            .first()
            .ok_or_else(|| Error::NoData(query.to_string()))?;

        if result.series.len() > 1 {
            debug!(
                autoscaler = %autoscaler.metadata,
                series = result.series.len(),
                labels = ?first.labels,
                "Query returned multiple series, using the first"
            );
        }

        if !first.value.is_finite() {
            return Err(Error::NoData(format!(
                "{} returned non-finite value {}",
                query, first.value
            )));
        }

        Ok(first.value)
    }
}

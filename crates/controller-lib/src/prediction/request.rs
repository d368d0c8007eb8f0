//! Wire format handed to the prediction algorithm

use crate::error::{Error, Result};
use crate::models::{ModelHistory, OccumConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// UTC, second precision: `2006-01-02T15:04:05Z`
pub const WIRE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRequest {
    pub look_ahead: u32,
    pub current_traffic: f64,
    pub historical_traffic: Vec<TrafficPoint>,
    pub current_time: String,
    pub traffic_per_replica: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficPoint {
    pub time: String,
    pub traffic: f64,
}

impl PredictionRequest {
    /// Package `history` for the algorithm.
    ///
    /// The current traffic is the value of the most recent sample; every
    /// retained sample is copied in stored order.
    pub fn build(
        config: &OccumConfig,
        history: &ModelHistory,
        now: DateTime<Utc>,
        max_replicas: Option<i32>,
    ) -> Result<Self> {
        let latest = history
            .latest()
            .ok_or(Error::NoHistory(history.model_type))?;

        let historical_traffic = history
            .samples
            .iter()
            .map(|s| TrafficPoint {
                time: s.time.format(WIRE_TIME_FORMAT).to_string(),
                traffic: s.value,
            })
            .collect();

        Ok(Self {
            look_ahead: config.look_ahead,
            current_traffic: latest.value,
            historical_traffic,
            current_time: now.format(WIRE_TIME_FORMAT).to_string(),
            traffic_per_replica: config.traffic_per_replica,
            max_replicas,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

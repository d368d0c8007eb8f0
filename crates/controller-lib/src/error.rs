//! Error taxonomy for the reconcile core
//!
//! Every failure a model can hit during a pass maps onto one [`ErrorKind`],
//! which is what ends up in the Autoscaler status and in metric labels.

use crate::models::{ModelType, ObjectRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid model/query configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The metrics backend call failed or timed out
    #[error("metrics query failed: {0}")]
    Query(String),

    /// The metrics backend answered with zero result series
    #[error("no data returned for query `{0}`")]
    NoData(String),

    /// A model has no samples to predict from
    #[error("no history available for {0} model")]
    NoHistory(ModelType),

    /// The external predictor could not be run or did not answer in time
    #[error("predictor invocation failed: {0}")]
    Invocation(String),

    /// The external predictor answered with something that is not a number
    #[error("predictor returned invalid value `{value}`: {reason}")]
    Parse { value: String, reason: String },

    #[error("autoscaler {0} not found")]
    NotFound(ObjectRef),

    #[error("store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Query,
    NoData,
    NoHistory,
    Invocation,
    Parse,
    NotFound,
    Store,
    Serialization,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Query => "query",
            ErrorKind::NoData => "no_data",
            ErrorKind::NoHistory => "no_history",
            ErrorKind::Invocation => "invocation",
            ErrorKind::Parse => "parse",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Store => "store",
            ErrorKind::Serialization => "serialization",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Config,
            Error::Query(_) => ErrorKind::Query,
            Error::NoData(_) => ErrorKind::NoData,
            Error::NoHistory(_) => ErrorKind::NoHistory,
            Error::Invocation(_) => ErrorKind::Invocation,
            Error::Parse { .. } => ErrorKind::Parse,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Store(_) => ErrorKind::Store,
            Error::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Whether the next scheduled pass may succeed without operator action
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Query
                | ErrorKind::NoData
                | ErrorKind::NoHistory
                | ErrorKind::Invocation
                | ErrorKind::Store
        )
    }

    /// Warm-up condition rather than an operational failure
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Error::NoHistory(_))
    }
}

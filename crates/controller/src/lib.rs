//! Predictive autoscaler controller: configuration and HTTP API

pub mod api;
pub mod config;

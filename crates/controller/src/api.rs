//! HTTP API for health checks, Prometheus metrics and autoscaler status

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use controller_lib::{
    health::{ComponentStatus, HealthRegistry},
    models::{Autoscaler, ModelCondition, ModelType, ObjectRef},
    observability::ControllerMetrics,
    store::{AutoscalerStore, InMemoryStore},
    Error,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: ControllerMetrics,
    pub store: Arc<InMemoryStore>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: ControllerMetrics,
        store: Arc<InMemoryStore>,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            store,
        }
    }
}

/// One row of `GET /api/v1/autoscalers`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerSummary {
    pub namespace: String,
    pub name: String,
    pub current_replicas: i32,
    pub desired_replicas: Option<i32>,
    pub models: Vec<ModelSummary>,
    pub last_reconcile_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub model_type: ModelType,
    pub condition: Option<ModelCondition>,
    pub predicted_replicas: Option<i32>,
    pub history_len: usize,
}

impl From<&Autoscaler> for AutoscalerSummary {
    fn from(autoscaler: &Autoscaler) -> Self {
        let status = &autoscaler.status;
        let models = autoscaler
            .spec
            .models
            .iter()
            .map(|model| {
                let model_status = status.model_statuses.iter().find(|s| s.name == model.name);
                ModelSummary {
                    name: model.name.clone(),
                    model_type: model.model_type(),
                    condition: model_status.map(|s| s.condition),
                    predicted_replicas: model_status.and_then(|s| s.predicted_replicas),
                    history_len: controller_lib::history::find(status, model.model_type())
                        .map(|h| h.len())
                        .unwrap_or(0),
                }
            })
            .collect();

        Self {
            namespace: autoscaler.metadata.namespace.clone(),
            name: autoscaler.metadata.name.clone(),
            current_replicas: status.current_replicas,
            desired_replicas: status.desired_replicas,
            models,
            last_reconcile_time: status.last_reconcile_time,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub namespace: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// 200 when healthy or degraded, 503 when unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn list_autoscalers(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Json<Vec<AutoscalerSummary>> {
    let summaries = state
        .store
        .snapshot()
        .iter()
        .filter(|a| {
            params
                .namespace
                .as_deref()
                .map_or(true, |ns| a.metadata.namespace == ns)
        })
        .map(AutoscalerSummary::from)
        .collect();
    Json(summaries)
}

async fn get_autoscaler(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    let key = ObjectRef::new(namespace, name);
    match state.store.get(&key).await {
        Ok(autoscaler) => Json(autoscaler).into_response(),
        Err(e @ Error::NotFound(_)) => error_response(StatusCode::NOT_FOUND, e.to_string()),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/autoscalers", get(list_autoscalers))
        .route("/api/v1/autoscalers/:namespace/:name", get(get_autoscaler))
        .with_state(state)
}

pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

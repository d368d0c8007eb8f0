//! API client for the autoscaler controller

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let mut base_url = Url::parse(base_url).context("Invalid API URL")?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("Invalid path")
    }

    async fn send(&self, url: Url) -> Result<reqwest::Response> {
        self.client
            .get(url)
            .send()
            .await
            .context("Failed to send request")
    }

    /// GET `path`, failing on any non-success status
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.get_url(self.url(path)?).await
    }

    async fn get_url<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self.send(url).await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            anyhow::bail!("API error ({}): {}", status, message);
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn list_autoscalers(&self, namespace: Option<&str>) -> Result<Vec<AutoscalerSummary>> {
        let mut url = self.url("api/v1/autoscalers")?;
        if let Some(ns) = namespace {
            url.query_pairs_mut().append_pair("namespace", ns);
        }
        self.get_url(url).await
    }

    pub async fn get_autoscaler(&self, namespace: &str, name: &str) -> Result<Autoscaler> {
        self.get(&format!("api/v1/autoscalers/{}/{}", namespace, name))
            .await
    }

    /// Controller health; an unhealthy controller answers 503 with the same body
    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self.send(self.url("healthz")?).await?;
        let status = response.status();
        if !status.is_success() && status != StatusCode::SERVICE_UNAVAILABLE {
            anyhow::bail!("API error ({})", status);
        }
        response.json().await.context("Failed to parse health response")
    }

    pub async fn readiness(&self) -> Result<ReadinessResponse> {
        let response = self.send(self.url("readyz")?).await?;
        response.json().await.context("Failed to parse readiness response")
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerSummary {
    pub namespace: String,
    pub name: String,
    pub current_replicas: i32,
    pub desired_replicas: Option<i32>,
    #[serde(default)]
    pub models: Vec<ModelSummary>,
    pub last_reconcile_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub model_type: String,
    pub condition: Option<String>,
    pub predicted_replicas: Option<i32>,
    pub history_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
}

/// The subset of an Autoscaler object the CLI displays
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Autoscaler {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: AutoscalerStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerStatus {
    #[serde(default)]
    pub current_replicas: i32,
    pub desired_replicas: Option<i32>,
    #[serde(default)]
    pub model_histories: Vec<ModelHistory>,
    #[serde(default)]
    pub model_statuses: Vec<ModelStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelHistory {
    #[serde(rename = "type")]
    pub model_type: String,
    #[serde(default)]
    pub samples: Vec<Sample>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub time: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStatus {
    pub name: String,
    #[serde(rename = "type")]
    pub model_type: String,
    pub condition: String,
    pub predicted_replicas: Option<i32>,
    pub last_prediction_time: Option<DateTime<Utc>>,
    pub last_error: Option<ModelError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelError {
    pub kind: String,
    pub message: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub components: HashMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const SUMMARIES: &str = r#"[{
        "namespace": "default",
        "name": "web",
        "currentReplicas": 2,
        "desiredReplicas": 5,
        "models": [{"name": "occum", "type": "Occum", "condition": "Predicted", "predictedReplicas": 5, "historyLen": 12}],
        "lastReconcileTime": "2024-03-01T08:00:00Z"
    }]"#;

    #[tokio::test]
    async fn test_list_autoscalers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/autoscalers")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(SUMMARIES)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let summaries = client.list_autoscalers(None).await.unwrap();

        mock.assert_async().await;
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].desired_replicas, Some(5));
        assert_eq!(summaries[0].models[0].history_len, 12);
    }

    #[tokio::test]
    async fn test_list_autoscalers_passes_namespace() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/autoscalers")
            .match_query(Matcher::UrlEncoded("namespace".into(), "batch".into()))
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let summaries = client.list_autoscalers(Some("batch")).await.unwrap();

        mock.assert_async().await;
        assert!(summaries.is_empty());
    }

    #[tokio::test]
    async fn test_get_autoscaler_not_found_surfaces_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/autoscalers/default/ghost")
            .with_status(404)
            .with_body(r#"{"error":"autoscaler default/ghost not found"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client.get_autoscaler("default", "ghost").await.unwrap_err();

        let message = err.to_string();
        assert!(message.contains("404"));
        assert!(message.contains("autoscaler default/ghost not found"));
    }

    #[tokio::test]
    async fn test_get_autoscaler_history() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/autoscalers/default/web")
            .with_status(200)
            .with_body(
                r#"{
                    "metadata": {"namespace": "default", "name": "web"},
                    "spec": {"scaleTargetRef": {"kind": "Deployment", "name": "web"}},
                    "status": {
                        "currentReplicas": 2,
                        "modelHistories": [{"type": "Occum", "samples": [
                            {"time": "2024-03-01T08:01:00Z", "value": 120.0},
                            {"time": "2024-03-01T08:00:00Z", "value": 100.0}
                        ]}],
                        "modelStatuses": [{"name": "occum", "type": "Occum", "condition": "Failed",
                            "lastError": {"kind": "invocation", "message": "timed out", "time": "2024-03-01T08:01:00Z"}}]
                    }
                }"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let autoscaler = client.get_autoscaler("default", "web").await.unwrap();

        assert_eq!(autoscaler.status.model_histories[0].samples.len(), 2);
        let status = &autoscaler.status.model_statuses[0];
        assert_eq!(status.condition, "Failed");
        assert_eq!(status.last_error.as_ref().unwrap().kind, "invocation");
    }

    #[tokio::test]
    async fn test_health_reads_unhealthy_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/healthz")
            .with_status(503)
            .with_body(
                r#"{"status":"unhealthy","components":{"controller":{"status":"unhealthy","message":"loop exited","last_check_timestamp":1709280000}}}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let health = client.health().await.unwrap();

        assert_eq!(health.status, "unhealthy");
        assert_eq!(
            health.components["controller"].message.as_deref(),
            Some("loop exited")
        );
    }

    #[test]
    fn test_base_url_with_path_prefix() {
        let client = ApiClient::new("http://controller:8080/phpa").unwrap();
        assert_eq!(client.base_url.as_str(), "http://controller:8080/phpa/");
    }
}

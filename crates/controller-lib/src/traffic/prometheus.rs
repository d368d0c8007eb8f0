//! Prometheus instant-query client

use super::{MetricsBackend, QueryResult, Series};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use url::Url;

/// HTTP client for `GET /api/v1/query`
pub struct PrometheusClient {
    client: Client,
    query_url: Url,
}

impl PrometheusClient {
    pub fn new(address: &str) -> Result<Self> {
        let mut base = Url::parse(address)
            .map_err(|e| Error::Config(format!("invalid prometheus address `{}`: {}", address, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let query_url = base
            .join("api/v1/query")
            .map_err(|e| Error::Config(format!("invalid prometheus address `{}`: {}", address, e)))?;

        let client = Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("error creating prometheus client: {}", e)))?;

        Ok(Self { client, query_url })
    }

    pub fn query_url(&self) -> &Url {
        &self.query_url
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    warnings: Vec<String>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    result_type: String,
    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    /// `[unix_seconds, "value"]`
    value: (f64, String),
}

#[async_trait]
impl MetricsBackend for PrometheusClient {
    async fn query(&self, query: &str, at: DateTime<Utc>) -> Result<QueryResult> {
        let time = format!("{:.3}", at.timestamp_millis() as f64 / 1000.0);

        let response = self
            .client
            .get(self.query_url.clone())
            .query(&[("query", query), ("time", time.as_str())])
            .send()
            .await
            .map_err(|e| Error::Query(format!("error querying prometheus: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Query(format!("error reading prometheus response: {}", e)))?;

        let parsed: ApiResponse = serde_json::from_str(&body).map_err(|e| {
            Error::Query(format!(
                "unexpected response from prometheus ({}): {}",
                status, e
            ))
        })?;

        if parsed.status != "success" || !status.is_success() {
            return Err(Error::Query(format!(
                "prometheus returned {} ({}): {}",
                status,
                parsed.error_type.unwrap_or_else(|| "unknown".to_string()),
                parsed.error.unwrap_or_default()
            )));
        }

        let data = parsed
            .data
            .ok_or_else(|| Error::Query("prometheus response has no data".to_string()))?;
        if data.result_type != "vector" {
            return Err(Error::Query(format!(
                "unexpected result type `{}` from prometheus, expected vector",
                data.result_type
            )));
        }

        let samples: Vec<VectorSample> = serde_json::from_value(data.result)
            .map_err(|e| Error::Query(format!("malformed vector result: {}", e)))?;
        let series = samples
            .into_iter()
            .map(|sample| {
                let value = sample.value.1.parse::<f64>().map_err(|e| {
                    Error::Query(format!("invalid sample value `{}`: {}", sample.value.1, e))
                })?;
                Ok(Series {
                    labels: sample.metric,
                    value,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(QueryResult {
            series,
            warnings: parsed.warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[test]
    fn test_query_url_keeps_base_path() {
        let client = PrometheusClient::new("http://prometheus:9090/prom").unwrap();
        assert_eq!(
            client.query_url().as_str(),
            "http://prometheus:9090/prom/api/v1/query"
        );

        let client = PrometheusClient::new("http://prometheus:9090").unwrap();
        assert_eq!(client.query_url().as_str(), "http://prometheus:9090/api/v1/query");
    }

    #[test]
    fn test_invalid_address_is_config_error() {
        assert!(matches!(
            PrometheusClient::new("not a url"),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_vector_result_parsed_in_order() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::UrlEncoded(
                "query".into(),
                "sum(rate(http_requests_total[1m]))".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"status":"success","data":{"resultType":"vector","result":[
                    {"metric":{"pod":"a"},"value":[1704110400.0,"120.5"]},
                    {"metric":{"pod":"b"},"value":[1704110400.0,"3"]}
                ]},"warnings":["partial"]}"#,
            )
            .create_async()
            .await;

        let client = PrometheusClient::new(&server.url()).unwrap();
        let result = client
            .query("sum(rate(http_requests_total[1m]))", Utc::now())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result.series.len(), 2);
        assert_eq!(result.series[0].value, 120.5);
        assert_eq!(result.series[0].labels["pod"], "a");
        assert_eq!(result.warnings, vec!["partial".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_vector() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status":"success","data":{"resultType":"vector","result":[]}}"#)
            .create_async()
            .await;

        let client = PrometheusClient::new(&server.url()).unwrap();
        let result = client.query("up", Utc::now()).await.unwrap();
        assert!(result.series.is_empty());
    }

    #[tokio::test]
    async fn test_error_status_is_query_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#)
            .create_async()
            .await;

        let client = PrometheusClient::new(&server.url()).unwrap();
        let err = client.query("sum(", Utc::now()).await.unwrap_err();
        assert!(matches!(err, Error::Query(msg) if msg.contains("bad_data")));
    }

    #[tokio::test]
    async fn test_non_vector_result_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status":"success","data":{"resultType":"scalar","result":[1704110400,"1"]}}"#)
            .create_async()
            .await;

        let client = PrometheusClient::new(&server.url()).unwrap();
        let err = client.query("1", Utc::now()).await.unwrap_err();
        assert!(matches!(err, Error::Query(msg) if msg.contains("scalar")));
    }

    #[tokio::test]
    async fn test_nan_sample_yields_no_data_through_gatherer() {
        use crate::models::{Autoscaler, AutoscalerSpec, ObjectRef, ScaleTargetRef, TrafficMetric};
        use crate::traffic::{MetricsGatherer, TrafficGatherer};

        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"status":"success","data":{"resultType":"vector","result":[
                    {"metric":{},"value":[1704110400.0,"NaN"]}
                ]}}"#,
            )
            .create_async()
            .await;

        let client = PrometheusClient::new(&server.url()).unwrap();
        let raw = client.query("ratio", Utc::now()).await.unwrap();
        assert!(raw.series[0].value.is_nan());

        let autoscaler = Autoscaler::new(
            ObjectRef::new("default", "web"),
            AutoscalerSpec {
                scale_target_ref: ScaleTargetRef {
                    kind: "Deployment".to_string(),
                    name: "web".to_string(),
                },
                min_replicas: 1,
                max_replicas: None,
                traffic_metric: Some(TrafficMetric {
                    prometheus_query: "ratio".to_string(),
                }),
                models: vec![],
            },
        );
        let gatherer = MetricsGatherer::new(client);
        let err = gatherer.gather_traffic(&autoscaler).await.unwrap_err();
        assert!(matches!(err, Error::NoData(_)));
    }
}

//! Prometheus HTTP API source

use super::{MetricQuery, MetricsSource, SourceError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use url::Url;

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(rename = "errorType", default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(rename = "resultType")]
    result_type: String,
    result: Value,
}

/// Instant queries against `/api/v1/query`
pub struct PrometheusSource {
    client: Client,
    query_url: Url,
}

impl PrometheusSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(timeout).build()?;
        let mut base = Url::parse(base_url)?;
        // A route prefix is kept only when the base path ends with '/'
        if !base.path().ends_with('/') {
            let prefixed = format!("{}/", base.path());
            base.set_path(&prefixed);
        }
        let query_url = base.join("api/v1/query")?;
        Ok(Self { client, query_url })
    }
}

/// Extract the first value of a vector or scalar result
///
/// Prometheus encodes sample values as strings; `NaN` and infinities count
/// as absent.
fn first_value(data: &QueryData) -> Result<Option<f64>, SourceError> {
    let pair = match data.result_type.as_str() {
        "vector" => match data.result.as_array().and_then(|r| r.first()) {
            Some(series) => series.get("value"),
            None => return Ok(None),
        },
        "scalar" => Some(&data.result),
        other => {
            return Err(SourceError::Malformed(format!(
                "unsupported result type '{}'",
                other
            )))
        }
    };

    let raw = pair
        .and_then(|p| p.get(1))
        .and_then(Value::as_str)
        .ok_or_else(|| SourceError::Malformed("missing sample value".to_string()))?;

    let value: f64 = raw
        .parse()
        .map_err(|_| SourceError::Malformed(format!("non-numeric sample '{}'", raw)))?;

    Ok(value.is_finite().then_some(value))
}

#[async_trait]
impl MetricsSource for PrometheusSource {
    async fn query(&self, query: &MetricQuery) -> Result<Option<f64>, SourceError> {
        let response = self
            .client
            .get(self.query_url.clone())
            .query(&[("query", query.expr.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() && status.as_u16() != 400 && status.as_u16() != 422 {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: QueryResponse = response.json().await?;
        if body.status != "success" {
            return Err(SourceError::Rejected {
                error_type: body.error_type.unwrap_or_else(|| "unknown".to_string()),
                message: body.error.unwrap_or_default(),
            });
        }

        match body.data {
            Some(data) => first_value(&data),
            None => Ok(None),
        }
    }

    fn name(&self) -> &str {
        "prometheus"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MetricKind;
    use mockito::Matcher;

    fn query(expr: &str) -> MetricQuery {
        MetricQuery {
            metric: MetricKind::CpuUtilization,
            expr: expr.to_string(),
        }
    }

    fn source(url: &str) -> PrometheusSource {
        PrometheusSource::new(url, Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_vector_result() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::UrlEncoded("query".into(), "up".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"status":"success","data":{"resultType":"vector","result":[
                    {"metric":{"job":"app"},"value":[1700000000.0,"72.5"]},
                    {"metric":{"job":"other"},"value":[1700000000.0,"10"]}]}}"#,
            )
            .create_async()
            .await;

        let value = source(&server.url()).query(&query("up")).await.unwrap();
        assert_eq!(value, Some(72.5));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_vector_is_absent() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status":"success","data":{"resultType":"vector","result":[]}}"#)
            .create_async()
            .await;

        let value = source(&server.url()).query(&query("missing")).await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_nan_is_absent() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"status":"success","data":{"resultType":"vector","result":[
                    {"metric":{},"value":[1700000000.0,"NaN"]}]}}"#,
            )
            .create_async()
            .await;

        let value = source(&server.url()).query(&query("0/0")).await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_rejected_query() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#)
            .create_async()
            .await;

        let err = source(&server.url()).query(&query("sum(")).await.unwrap_err();
        assert!(matches!(err, SourceError::Rejected { ref error_type, .. } if error_type == "bad_data"));
    }

    #[tokio::test]
    async fn test_server_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;

        let err = source(&server.url()).query(&query("up")).await.unwrap_err();
        assert!(matches!(err, SourceError::Status { status: 503, .. }));
    }

    #[test]
    fn test_scalar_result() {
        let data = QueryData {
            result_type: "scalar".to_string(),
            result: serde_json::json!([1700000000.0, "3.25"]),
        };
        assert_eq!(first_value(&data).unwrap(), Some(3.25));
    }

    #[test]
    fn test_route_prefix_is_kept() {
        let prefixed = source("http://gw:9090/prometheus");
        assert_eq!(prefixed.query_url.as_str(), "http://gw:9090/prometheus/api/v1/query");

        let slashed = source("http://gw:9090/prometheus/");
        assert_eq!(slashed.query_url.as_str(), "http://gw:9090/prometheus/api/v1/query");

        let bare = source("http://prometheus:9090");
        assert_eq!(bare.query_url.as_str(), "http://prometheus:9090/api/v1/query");
    }

    #[tokio::test]
    async fn test_prefixed_server_receives_queries() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/prometheus/api/v1/query")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status":"success","data":{"resultType":"scalar","result":[1700000000.0,"1"]}}"#)
            .create_async()
            .await;

        let url = format!("{}/prometheus", server.url());
        let value = source(&url).query(&query("up")).await.unwrap();
        assert_eq!(value, Some(1.0));
        mock.assert_async().await;
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(PrometheusSource::new("not a url", Duration::from_secs(1)).is_err());
    }
}

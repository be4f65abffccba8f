//! API client for communicating with the governor's HTTP API

use anyhow::{Context, Result};
use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// API client for the governor API
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    async fn send(&self, method: Method, path: &str) -> Result<reqwest::Response> {
        let url = self.base_url.join(path).context("Invalid path")?;

        self.client
            .request(method, url)
            .send()
            .await
            .context("Failed to send request")
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(Method::GET, path).await?;
        Self::parse(response).await
    }

    /// Make a POST request without a body
    pub async fn post<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(Method::POST, path).await?;
        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    /// GET a resource that may not exist yet; 404 yields `None`
    pub async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let response = self.send(Method::GET, path).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                Ok(Some(response.json().await.context("Failed to parse response")?))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("API error ({}): {}", status, body);
            }
        }
    }

    /// GET a health endpoint; 503 still carries a JSON body
    pub async fn get_health<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(Method::GET, path).await?;

        match response.status() {
            status if status.is_success() || status == StatusCode::SERVICE_UNAVAILABLE => {
                response.json().await.context("Failed to parse response")
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("API error ({}): {}", status, body);
            }
        }
    }
}

/// Path of the decisions endpoint with its query string
pub fn decisions_path(lane: Option<&str>, limit: usize) -> String {
    match lane {
        Some(lane) => format!("api/v1/decisions?lane={}&limit={}", lane, limit),
        None => format!("api/v1/decisions?limit={}", limit),
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Topology {
    Replicas { count: u32 },
    Primary { endpoint: Endpoint },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: u64,
    pub timestamp: String,
    pub lane: String,
    pub action: String,
    pub reason: String,
    pub confidence: f64,
    #[serde(default)]
    pub metrics_used: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Topology>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Topology>,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<Endpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub host: String,
    pub port: u16,
    pub role: String,
    pub connected: bool,
    pub memory_usage: f64,
    pub connections: u64,
    pub replication_lag: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub primary_host: String,
    pub primary_port: u16,
    pub primary: Node,
    pub replicas: Vec<Node>,
    pub total_memory: f64,
    pub total_connections: u64,
    pub is_healthy: bool,
    pub failover_needed: bool,
    #[serde(default)]
    pub failover_reasons: Vec<String>,
    pub checked_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub components: BTreeMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Readiness {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decisions_path() {
        assert_eq!(decisions_path(None, 20), "api/v1/decisions?limit=20");
        assert_eq!(
            decisions_path(Some("failover"), 5),
            "api/v1/decisions?lane=failover&limit=5"
        );
    }

    #[test]
    fn test_get_optional_maps_not_found() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/api/v1/cluster")
            .with_status(404)
            .with_body(r#"{"error":"cluster has not been polled yet"}"#)
            .create();

        let client = ApiClient::new(&server.url()).unwrap();
        let status: Option<ClusterStatus> =
            tokio_test::block_on(client.get_optional("api/v1/cluster")).unwrap();
        assert!(status.is_none());
    }

    #[test]
    fn test_get_health_accepts_unavailable_body() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/readyz")
            .with_status(503)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ready":false,"reason":"Governor has not completed its first cycle"}"#)
            .create();

        let client = ApiClient::new(&server.url()).unwrap();
        let readiness: Readiness = tokio_test::block_on(client.get_health("readyz")).unwrap();
        assert!(!readiness.ready);
        assert!(readiness.reason.unwrap().contains("first cycle"));
    }

    #[test]
    fn test_get_reports_api_errors() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/api/v1/decisions")
            .match_query(mockito::Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":"unknown lane 'storage'"}"#)
            .create();

        let client = ApiClient::new(&server.url()).unwrap();
        let result: Result<Vec<Decision>> =
            tokio_test::block_on(client.get(&decisions_path(Some("storage"), 5)));
        let message = result.unwrap_err().to_string();
        assert!(message.contains("400"));
        assert!(message.contains("unknown lane"));
    }

    #[test]
    fn test_post_reports_disabled_lane() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/api/v1/failover")
            .with_status(409)
            .with_body(r#"{"error":"failover lane is disabled"}"#)
            .create();

        let client = ApiClient::new(&server.url()).unwrap();
        let result: Result<Decision> = tokio_test::block_on(client.post("api/v1/failover"));
        let message = result.unwrap_err().to_string();
        assert!(message.contains("409"));
        assert!(message.contains("failover lane is disabled"));
    }

    #[test]
    fn test_decision_parses_governor_record() {
        let body = r#"{
            "id": 7,
            "timestamp": "2024-05-01T12:00:00Z",
            "lane": "failover",
            "action": "promote",
            "reason": "Primary node unreachable",
            "confidence": 1.0,
            "metrics_used": [],
            "before": {"kind": "primary", "endpoint": {"host": "redis-0", "port": 6379}},
            "after": {"kind": "primary", "endpoint": {"host": "redis-1", "port": 6379}},
            "outcome": "executed",
            "candidate": {"host": "redis-1", "port": 6379}
        }"#;
        let decision: Decision = serde_json::from_str(body).unwrap();
        assert_eq!(decision.id, 7);
        assert!(matches!(decision.after, Some(Topology::Primary { .. })));
        assert_eq!(decision.candidate.unwrap().host, "redis-1");
        assert!(decision.error.is_none());
    }
}

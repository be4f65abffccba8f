//! HTTP API for health checks, Prometheus metrics, the decision journal and
//! operator-requested failover

use crate::control::{FailoverTrigger, SharedClusterStatus};
use crate::health::HealthRegistry;
use crate::journal::{DecisionJournal, Lane};
use crate::observability::GovernorMetrics;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

/// Default number of records returned by `/api/v1/decisions`
pub const DEFAULT_DECISION_LIMIT: usize = 50;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: GovernorMetrics,
    pub journal: DecisionJournal,
    pub cluster_status: SharedClusterStatus,
    /// Absent when the failover lane is disabled
    pub failover: Option<FailoverTrigger>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: GovernorMetrics,
        journal: DecisionJournal,
        cluster_status: SharedClusterStatus,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            journal,
            cluster_status,
            failover: None,
        }
    }

    pub fn with_failover(mut self, trigger: FailoverTrigger) -> Self {
        self.failover = Some(trigger);
        self
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = if health.status.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; charset=utf-8")],
            buffer,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DecisionQuery {
    pub lane: Option<String>,
    pub limit: Option<usize>,
}

/// Most recent journal records, newest first
async fn decisions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DecisionQuery>,
) -> Response {
    let lane = match query.lane.as_deref().map(str::parse::<Lane>).transpose() {
        Ok(lane) => lane,
        Err(message) => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response();
        }
    };
    let limit = query.limit.unwrap_or(DEFAULT_DECISION_LIMIT);

    Json(state.journal.recent(lane, limit).await).into_response()
}

/// Last polled cluster status
async fn cluster(State(state): State<Arc<AppState>>) -> Response {
    match state.cluster_status.read().await.clone() {
        Some(status) => Json(status).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "cluster has not been polled yet" })),
        )
            .into_response(),
    }
}

/// Promote the best replica now, whatever `auto_failover` says
async fn failover(State(state): State<Arc<AppState>>) -> Response {
    let Some(trigger) = state.failover.as_ref() else {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "error": "failover lane is disabled" })),
        )
            .into_response();
    };

    match trigger.trigger().await {
        Ok(record) => Json(record).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/decisions", get(decisions))
        .route("/api/v1/cluster", get(cluster))
        .route("/api/v1/failover", post(failover))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

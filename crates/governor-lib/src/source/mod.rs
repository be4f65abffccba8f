//! Metric sources for the scaling lane
//!
//! A [`MetricsSource`] answers one instant query at a time. The
//! [`SampleCollector`] issues one query per tracked metric and assembles a
//! [`MetricSample`], degrading absent or failed readings to `0.0`.

mod prometheus;

pub use self::prometheus::PrometheusSource;

use crate::config::{MetricsSourceConfig, ScalingConfig};
use crate::models::MetricSample;
use crate::observability::GovernorMetrics;
use async_trait::async_trait;
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Errors returned by a metrics source
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("metrics backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("query rejected ({error_type}): {message}")]
    Rejected { error_type: String, message: String },

    #[error("unexpected response: {0}")]
    Malformed(String),

    #[error("invalid source url: {0}")]
    Url(#[from] url::ParseError),
}

/// Metrics tracked by the scaling lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    CpuUtilization,
    MemoryUtilization,
    RequestRate,
    ResponseTimeP95,
    ErrorRate,
    QueueDepth,
    ActiveConnections,
}

impl MetricKind {
    pub const ALL: [MetricKind; 7] = [
        MetricKind::CpuUtilization,
        MetricKind::MemoryUtilization,
        MetricKind::RequestRate,
        MetricKind::ResponseTimeP95,
        MetricKind::ErrorRate,
        MetricKind::QueueDepth,
        MetricKind::ActiveConnections,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MetricKind::CpuUtilization => "cpu_utilization",
            MetricKind::MemoryUtilization => "memory_utilization",
            MetricKind::RequestRate => "request_rate",
            MetricKind::ResponseTimeP95 => "response_time_p95",
            MetricKind::ErrorRate => "error_rate",
            MetricKind::QueueDepth => "queue_depth",
            MetricKind::ActiveConnections => "active_connections",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single instant query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricQuery {
    pub metric: MetricKind,
    pub expr: String,
}

/// Instant-query source of numeric readings
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Evaluate a query; `Ok(None)` when the backend has no value for it
    async fn query(&self, query: &MetricQuery) -> Result<Option<f64>, SourceError>;

    /// Source name (for logging)
    fn name(&self) -> &str;
}

/// PromQL expressions for every tracked metric
#[derive(Debug, Clone)]
pub struct QueryTemplates {
    namespace: String,
    deployment: String,
    job: String,
    ingress_job: String,
    window: String,
}

impl QueryTemplates {
    pub fn new(source: &MetricsSourceConfig, scaling: &ScalingConfig) -> Self {
        Self {
            namespace: scaling.namespace.clone(),
            deployment: scaling.deployment.clone(),
            job: source.job.clone(),
            ingress_job: source.ingress_job.clone(),
            window: source.metrics_window.clone(),
        }
    }

    pub fn query(&self, metric: MetricKind) -> MetricQuery {
        let (ns, deploy, job, ingress, window) = (
            &self.namespace,
            &self.deployment,
            &self.job,
            &self.ingress_job,
            &self.window,
        );

        let expr = match metric {
            MetricKind::CpuUtilization => format!(
                r#"avg(rate(container_cpu_usage_seconds_total{{namespace="{ns}",pod=~"{deploy}-.*"}}[{window}])) * 100"#
            ),
            MetricKind::MemoryUtilization => format!(
                r#"avg(container_memory_usage_bytes{{namespace="{ns}",pod=~"{deploy}-.*"}} / container_spec_memory_limit_bytes) * 100"#
            ),
            MetricKind::RequestRate => {
                format!(r#"sum(rate(http_requests_total{{job="{job}"}}[{window}]))"#)
            }
            MetricKind::ResponseTimeP95 => format!(
                r#"histogram_quantile(0.95, rate(http_request_duration_seconds_bucket{{job="{job}"}}[{window}])) * 1000"#
            ),
            MetricKind::ErrorRate => format!(
                r#"sum(rate(http_requests_total{{job="{job}",status=~"5.."}}[{window}])) / sum(rate(http_requests_total{{job="{job}"}}[{window}])) * 100"#
            ),
            MetricKind::QueueDepth => {
                format!(r#"sum(nginx_http_pending_requests_total{{job="{ingress}"}})"#)
            }
            MetricKind::ActiveConnections => {
                format!(r#"avg(nginx_http_active_connections_total{{job="{ingress}"}})"#)
            }
        };

        MetricQuery { metric, expr }
    }
}

/// Sample assembled by a collector, with the metrics that degraded to zero
#[derive(Debug, Clone)]
pub struct CollectedSample {
    pub sample: MetricSample,
    /// Queries that returned an error
    pub failed: Vec<MetricKind>,
    /// Queries that succeeded without a value
    pub absent: Vec<MetricKind>,
}

#[derive(Default)]
struct Gaps {
    failed: Vec<MetricKind>,
    absent: Vec<MetricKind>,
}

/// Assembles a [`MetricSample`] from individual queries
pub struct SampleCollector {
    source: Arc<dyn MetricsSource>,
    templates: QueryTemplates,
    metrics: GovernorMetrics,
}

impl SampleCollector {
    pub fn new(source: Arc<dyn MetricsSource>, templates: QueryTemplates) -> Self {
        Self {
            source,
            templates,
            metrics: GovernorMetrics::new(),
        }
    }

    async fn read(&self, metric: MetricKind, gaps: &mut Gaps) -> f64 {
        let query = self.templates.query(metric);
        match self.source.query(&query).await {
            Ok(Some(value)) => value,
            Ok(None) => {
                warn!(metric = %metric, source = self.source.name(), "No data for metric, using 0");
                self.metrics.inc_metric_query_failures(metric.name(), "absent");
                gaps.absent.push(metric);
                0.0
            }
            Err(e) => {
                warn!(metric = %metric, source = self.source.name(), error = %e, "Failed to query metric, using 0");
                self.metrics.inc_metric_query_failures(metric.name(), "error");
                gaps.failed.push(metric);
                0.0
            }
        }
    }

    /// Query every tracked metric once
    ///
    /// Never fails: absent and failed readings are reported as zero, which
    /// the decision engine treats as a real reading.
    pub async fn collect(&self) -> CollectedSample {
        let mut gaps = Gaps::default();

        let cpu_utilization = self.read(MetricKind::CpuUtilization, &mut gaps).await;
        let memory_utilization = self.read(MetricKind::MemoryUtilization, &mut gaps).await;
        let request_rate = self.read(MetricKind::RequestRate, &mut gaps).await;
        let response_time_p95 = self.read(MetricKind::ResponseTimeP95, &mut gaps).await;
        let error_rate = self.read(MetricKind::ErrorRate, &mut gaps).await;
        let queue_depth = self.read(MetricKind::QueueDepth, &mut gaps).await;
        let active_connections = self.read(MetricKind::ActiveConnections, &mut gaps).await;

        CollectedSample {
            sample: MetricSample {
                cpu_utilization,
                memory_utilization,
                request_rate,
                response_time_p95,
                error_rate,
                queue_depth: count(queue_depth),
                active_connections: count(active_connections),
                timestamp: Utc::now(),
            },
            failed: gaps.failed,
            absent: gaps.absent,
        }
    }
}

/// Truncate a gauge reading to a count; negatives and NaN become zero
fn count(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Source answering from a table keyed by metric; unlisted metrics error
    struct TableSource {
        values: HashMap<MetricKind, Option<f64>>,
    }

    #[async_trait]
    impl MetricsSource for TableSource {
        async fn query(&self, query: &MetricQuery) -> Result<Option<f64>, SourceError> {
            self.values
                .get(&query.metric)
                .copied()
                .ok_or_else(|| SourceError::Malformed("no such series".to_string()))
        }

        fn name(&self) -> &str {
            "table"
        }
    }

    fn templates() -> QueryTemplates {
        QueryTemplates::new(&MetricsSourceConfig::default(), &ScalingConfig::default())
    }

    #[tokio::test]
    async fn test_collect_full_sample() {
        let values = HashMap::from([
            (MetricKind::CpuUtilization, Some(82.5)),
            (MetricKind::MemoryUtilization, Some(40.0)),
            (MetricKind::RequestRate, Some(350.0)),
            (MetricKind::ResponseTimeP95, Some(180.0)),
            (MetricKind::ErrorRate, Some(0.5)),
            (MetricKind::QueueDepth, Some(12.0)),
            (MetricKind::ActiveConnections, Some(33.7)),
        ]);
        let collector = SampleCollector::new(Arc::new(TableSource { values }), templates());

        let collected = collector.collect().await;
        assert!(collected.failed.is_empty());
        assert_eq!(collected.sample.cpu_utilization, 82.5);
        assert_eq!(collected.sample.request_rate, 350.0);
        assert_eq!(collected.sample.queue_depth, 12);
        assert_eq!(collected.sample.active_connections, 33);
    }

    #[tokio::test]
    async fn test_missing_and_failed_metrics_degrade_to_zero() {
        let values = HashMap::from([
            (MetricKind::CpuUtilization, Some(55.0)),
            (MetricKind::ErrorRate, None),
        ]);
        let collector = SampleCollector::new(Arc::new(TableSource { values }), templates());

        let collected = collector.collect().await;
        assert_eq!(collected.sample.cpu_utilization, 55.0);
        assert_eq!(collected.sample.error_rate, 0.0);
        assert_eq!(collected.sample.response_time_p95, 0.0);
        // Absent data is reported apart from query errors
        assert_eq!(collected.failed.len(), 5);
        assert!(!collected.failed.contains(&MetricKind::ErrorRate));
        assert_eq!(collected.absent, vec![MetricKind::ErrorRate]);
    }

    #[tokio::test]
    async fn test_absent_reading_is_counted() {
        let values = MetricKind::ALL
            .iter()
            .map(|metric| (*metric, None))
            .collect::<HashMap<_, _>>();
        let collector = SampleCollector::new(Arc::new(TableSource { values }), templates());
        let metrics = GovernorMetrics::new();
        let before = metrics.metric_query_failures("queue_depth", "absent");

        let collected = collector.collect().await;
        assert!(collected.failed.is_empty());
        assert_eq!(collected.absent.len(), MetricKind::ALL.len());
        assert_eq!(collected.sample.queue_depth, 0);

        // The counter is process-global, other tests may add to it
        assert!(metrics.metric_query_failures("queue_depth", "absent") > before);
    }

    #[test]
    fn test_templates_use_config_labels() {
        let scaling = ScalingConfig {
            namespace: "shop".to_string(),
            deployment: "checkout".to_string(),
            ..ScalingConfig::default()
        };
        let source = MetricsSourceConfig {
            job: "checkout-api".to_string(),
            metrics_window: "2m".to_string(),
            ..MetricsSourceConfig::default()
        };
        let templates = QueryTemplates::new(&source, &scaling);

        let cpu = templates.query(MetricKind::CpuUtilization);
        assert_eq!(
            cpu.expr,
            r#"avg(rate(container_cpu_usage_seconds_total{namespace="shop",pod=~"checkout-.*"}[2m])) * 100"#
        );

        let errors = templates.query(MetricKind::ErrorRate);
        assert!(errors.expr.contains(r#"job="checkout-api",status=~"5..""#));
        assert!(errors.expr.contains("[2m]"));
    }

    #[test]
    fn test_count_truncates() {
        assert_eq!(count(4.9), 4);
        assert_eq!(count(-1.0), 0);
        assert_eq!(count(f64::NAN), 0);
    }
}

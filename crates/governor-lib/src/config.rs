//! Governor configuration
//!
//! Settings are layered: serde defaults, then an optional config file, then
//! `GOVERNOR_`-prefixed environment variables (`__` separates nested keys,
//! e.g. `GOVERNOR_SCALING__MAX_REPLICAS=30`). Invalid settings are rejected
//! by [`GovernorConfig::validate`] before the control loop starts.

use crate::models::{EndpointParseError, NodeEndpoint};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors are fatal at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("min_replicas ({min}) must not exceed max_replicas ({max})")]
    ReplicaBounds { min: u32, max: u32 },

    #[error("max_replicas must be at least 1")]
    ZeroMaxReplicas,

    #[error("scale_up_threshold ({up}) must be greater than scale_down_threshold ({down})")]
    ThresholdOrder { up: f64, down: f64 },

    #[error("{name} must be a finite, non-negative number (got {value})")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error("trend_window must be at least 2 samples (got {0})")]
    TrendWindow(usize),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("cluster.primary is required when cluster monitoring uses static discovery")]
    MissingPrimary,

    #[error(transparent)]
    Endpoint(#[from] EndpointParseError),

    #[error("failed to read password file {path:?}: {source}")]
    PasswordFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level governor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// Instance name used in structured logs
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// API server port for health/metrics/decisions
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Seconds between control cycles
    #[serde(default = "default_evaluation_interval")]
    pub evaluation_interval_secs: u64,

    /// Log intended actions without calling any actuator
    #[serde(default)]
    pub dry_run: bool,

    /// Number of decision records kept in memory for the API
    #[serde(default = "default_journal_capacity")]
    pub journal_capacity: usize,

    #[serde(default)]
    pub scaling: ScalingConfig,

    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub metrics_source: MetricsSourceConfig,
}

/// Replica-count controller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_deployment")]
    pub deployment: String,
    #[serde(default = "default_min_replicas")]
    pub min_replicas: u32,
    #[serde(default = "default_max_replicas")]
    pub max_replicas: u32,
    /// CPU utilization percentage above which to scale up
    #[serde(default = "default_scale_up_threshold")]
    pub scale_up_threshold: f64,
    /// CPU utilization percentage below which to scale down
    #[serde(default = "default_scale_down_threshold")]
    pub scale_down_threshold: f64,
    #[serde(default = "default_scale_up_cooldown")]
    pub scale_up_cooldown_secs: u64,
    #[serde(default = "default_scale_down_cooldown")]
    pub scale_down_cooldown_secs: u64,
    /// p95 latency in milliseconds
    #[serde(default = "default_response_time_threshold")]
    pub response_time_threshold_ms: f64,
    /// Error rate percentage
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,
    /// Requests per second per replica
    #[serde(default = "default_request_rate_threshold")]
    pub request_rate_threshold: f64,
    /// CPU points per sample above which a pending scale-up is amplified
    #[serde(default = "default_trend_threshold")]
    pub trend_threshold: f64,
    /// Samples kept for trend analysis
    #[serde(default = "default_trend_window")]
    pub trend_window: usize,
    /// Timeout for orchestration API calls
    #[serde(default = "default_actuator_timeout")]
    pub actuator_timeout_secs: u64,
}

/// How the cluster monitor finds its nodes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// Endpoints listed in `primary` / `replicas`
    #[default]
    Static,
    /// Primary from a Service ClusterIP, replicas from a Service's Endpoints
    Kubernetes,
}

/// Cluster health monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub discovery: DiscoveryMode,
    /// Primary endpoint (`host:port`) for static discovery
    #[serde(default)]
    pub primary: Option<String>,
    /// Replica endpoints (`host:port`) for static discovery
    #[serde(default)]
    pub replicas: Vec<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_primary_service")]
    pub primary_service: String,
    #[serde(default = "default_replica_service")]
    pub replica_service: String,
    #[serde(default = "default_node_port")]
    pub node_port: u16,
    /// File holding the node password, if authentication is enabled
    #[serde(default)]
    pub password_file: Option<PathBuf>,
    #[serde(default = "default_replication_lag_threshold")]
    pub replication_lag_threshold_secs: u64,
    /// Primary memory usage percentage
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold: f64,
    #[serde(default = "default_connection_threshold")]
    pub connection_threshold: u64,
    #[serde(default = "default_true")]
    pub auto_failover: bool,
    /// Connect + query timeout per node
    #[serde(default = "default_node_timeout")]
    pub node_timeout_secs: u64,
}

/// Prometheus metrics source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSourceConfig {
    #[serde(default = "default_prometheus_url")]
    pub prometheus_url: String,
    /// Range window used in rate() queries
    #[serde(default = "default_metrics_window")]
    pub metrics_window: String,
    /// Prometheus job label of the scaled service
    #[serde(default = "default_job")]
    pub job: String,
    /// Prometheus job label of the ingress in front of the service
    #[serde(default = "default_ingress_job")]
    pub ingress_job: String,
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

fn default_instance_name() -> String {
    std::env::var("POD_NAME").unwrap_or_else(|_| "replica-governor".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_evaluation_interval() -> u64 {
    60
}

fn default_journal_capacity() -> usize {
    500
}

fn default_true() -> bool {
    true
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_deployment() -> String {
    "app".to_string()
}

fn default_min_replicas() -> u32 {
    3
}

fn default_max_replicas() -> u32 {
    20
}

fn default_scale_up_threshold() -> f64 {
    70.0
}

fn default_scale_down_threshold() -> f64 {
    30.0
}

fn default_scale_up_cooldown() -> u64 {
    300
}

fn default_scale_down_cooldown() -> u64 {
    600
}

fn default_response_time_threshold() -> f64 {
    1000.0
}

fn default_error_rate_threshold() -> f64 {
    5.0
}

fn default_request_rate_threshold() -> f64 {
    100.0
}

fn default_trend_threshold() -> f64 {
    5.0
}

fn default_trend_window() -> usize {
    5
}

fn default_actuator_timeout() -> u64 {
    30
}

fn default_primary_service() -> String {
    "redis-primary".to_string()
}

fn default_replica_service() -> String {
    "redis-replica".to_string()
}

fn default_node_port() -> u16 {
    crate::models::DEFAULT_NODE_PORT
}

fn default_replication_lag_threshold() -> u64 {
    30
}

fn default_memory_threshold() -> f64 {
    80.0
}

fn default_connection_threshold() -> u64 {
    1000
}

fn default_node_timeout() -> u64 {
    5
}

fn default_prometheus_url() -> String {
    "http://prometheus:9090".to_string()
}

fn default_metrics_window() -> String {
    "5m".to_string()
}

fn default_job() -> String {
    "app".to_string()
}

fn default_ingress_job() -> String {
    "nginx-ingress".to_string()
}

fn default_query_timeout() -> u64 {
    10
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: default_namespace(),
            deployment: default_deployment(),
            min_replicas: default_min_replicas(),
            max_replicas: default_max_replicas(),
            scale_up_threshold: default_scale_up_threshold(),
            scale_down_threshold: default_scale_down_threshold(),
            scale_up_cooldown_secs: default_scale_up_cooldown(),
            scale_down_cooldown_secs: default_scale_down_cooldown(),
            response_time_threshold_ms: default_response_time_threshold(),
            error_rate_threshold: default_error_rate_threshold(),
            request_rate_threshold: default_request_rate_threshold(),
            trend_threshold: default_trend_threshold(),
            trend_window: default_trend_window(),
            actuator_timeout_secs: default_actuator_timeout(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            discovery: DiscoveryMode::default(),
            primary: None,
            replicas: Vec::new(),
            namespace: default_namespace(),
            primary_service: default_primary_service(),
            replica_service: default_replica_service(),
            node_port: default_node_port(),
            password_file: None,
            replication_lag_threshold_secs: default_replication_lag_threshold(),
            memory_threshold: default_memory_threshold(),
            connection_threshold: default_connection_threshold(),
            auto_failover: true,
            node_timeout_secs: default_node_timeout(),
        }
    }
}

impl Default for MetricsSourceConfig {
    fn default() -> Self {
        Self {
            prometheus_url: default_prometheus_url(),
            metrics_window: default_metrics_window(),
            job: default_job(),
            ingress_job: default_ingress_job(),
            query_timeout_secs: default_query_timeout(),
        }
    }
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            api_port: default_api_port(),
            evaluation_interval_secs: default_evaluation_interval(),
            dry_run: false,
            journal_capacity: default_journal_capacity(),
            scaling: ScalingConfig::default(),
            cluster: ClusterConfig::default(),
            metrics_source: MetricsSourceConfig::default(),
        }
    }
}

impl GovernorConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("GOVERNOR")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("cluster.replicas")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Reject settings the control loop cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.evaluation_interval_secs == 0 {
            return Err(ConfigError::ZeroDuration("evaluation_interval_secs"));
        }

        let s = &self.scaling;
        if s.max_replicas == 0 {
            return Err(ConfigError::ZeroMaxReplicas);
        }
        if s.min_replicas > s.max_replicas {
            return Err(ConfigError::ReplicaBounds {
                min: s.min_replicas,
                max: s.max_replicas,
            });
        }
        for (name, value) in [
            ("scale_up_threshold", s.scale_up_threshold),
            ("scale_down_threshold", s.scale_down_threshold),
            ("response_time_threshold_ms", s.response_time_threshold_ms),
            ("error_rate_threshold", s.error_rate_threshold),
            ("request_rate_threshold", s.request_rate_threshold),
            ("trend_threshold", s.trend_threshold),
            ("memory_threshold", self.cluster.memory_threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidThreshold { name, value });
            }
        }
        if s.scale_up_threshold <= s.scale_down_threshold {
            return Err(ConfigError::ThresholdOrder {
                up: s.scale_up_threshold,
                down: s.scale_down_threshold,
            });
        }
        if s.trend_window < 2 {
            return Err(ConfigError::TrendWindow(s.trend_window));
        }
        if s.actuator_timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("scaling.actuator_timeout_secs"));
        }
        if self.metrics_source.query_timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("metrics_source.query_timeout_secs"));
        }

        let c = &self.cluster;
        if c.enabled {
            if c.node_timeout_secs == 0 {
                return Err(ConfigError::ZeroDuration("cluster.node_timeout_secs"));
            }
            if c.discovery == DiscoveryMode::Static {
                c.static_endpoints()?;
            }
        }

        Ok(())
    }

    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_secs)
    }
}

impl ClusterConfig {
    /// Parse the statically configured primary and replica endpoints
    pub fn static_endpoints(&self) -> Result<(NodeEndpoint, Vec<NodeEndpoint>), ConfigError> {
        let primary = self
            .primary
            .as_deref()
            .ok_or(ConfigError::MissingPrimary)?
            .parse::<NodeEndpoint>()?;
        let replicas = self
            .replicas
            .iter()
            .map(|r| r.parse::<NodeEndpoint>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok((primary, replicas))
    }

    /// Read the node password, if one is configured
    pub fn password(&self) -> Result<Option<String>, ConfigError> {
        match &self.password_file {
            None => Ok(None),
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| {
                    ConfigError::PasswordFile {
                        path: path.clone(),
                        source,
                    }
                })?;
                let password = raw.trim().to_string();
                Ok((!password.is_empty()).then_some(password))
            }
        }
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_secs)
    }
}

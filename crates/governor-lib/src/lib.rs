//! Replica governor library
//!
//! This crate provides the core functionality for:
//! - Scaling decisions from multi-signal telemetry (trend, rule table, cooldown)
//! - Primary/replica health monitoring and failover candidate selection
//! - The timer-driven control loop that dispatches decisions to actuators
//! - Collaborator adapters (Prometheus, Kubernetes, Redis)
//! - Health checks, observability and the HTTP API

pub mod actuator;
pub mod api;
pub mod cluster;
pub mod config;
pub mod control;
pub mod health;
pub mod journal;
pub mod models;
pub mod observability;
pub mod scaling;
pub mod source;

pub use config::{ConfigError, GovernorConfig};
pub use control::{ControlLoop, ControlLoopBuilder, CycleReport, FailoverTrigger, TriggerError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use journal::{DecisionJournal, DecisionRecord, Lane, Outcome};
pub use models::*;
pub use observability::{AuditLogger, GovernorMetrics};

//! Timer-driven control loop
//!
//! Each cycle runs the scaling lane, then the failover lane. A lane failure
//! is logged and recorded in the journal; it never aborts the other lane or
//! the next cycle.

mod r#loop;


pub use r#loop::{ControlLoop, ControlLoopBuilder};

use crate::actuator::{FailoverActuator, ScaleActuator};
use crate::cluster::{ClusterHealthMonitor, FailoverSelector, NodeDiscovery};
use crate::config::{GovernorConfig, ScalingConfig};
use crate::journal::DecisionRecord;
use crate::models::{ClusterStatus, NodeEndpoint};
use crate::scaling::{CooldownGate, CooldownState, ScalingDecisionEngine, TrendWindow, VolatilityAnalyzer};
use crate::source::SampleCollector;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};

/// Last polled cluster status, shared with the API
pub type SharedClusterStatus = Arc<RwLock<Option<ClusterStatus>>>;

/// Loop timing and actuation limits
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Period between cycle starts
    pub interval: Duration,
    /// Upper bound for a single actuator call
    pub actuator_timeout: Duration,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            actuator_timeout: Duration::from_secs(30),
        }
    }
}

impl ControlConfig {
    pub fn from_config(config: &GovernorConfig) -> Self {
        Self {
            interval: config.evaluation_interval(),
            actuator_timeout: Duration::from_secs(config.scaling.actuator_timeout_secs),
        }
    }
}

/// Collaborators and state of the scaling lane
pub struct ScalingLane {
    pub(crate) collector: SampleCollector,
    pub(crate) actuator: Arc<dyn ScaleActuator>,
    pub(crate) analyzer: VolatilityAnalyzer,
    pub(crate) engine: ScalingDecisionEngine,
    pub(crate) gate: CooldownGate,
    pub(crate) window: TrendWindow,
    pub(crate) cooldown: CooldownState,
}

impl ScalingLane {
    pub fn new(
        collector: SampleCollector,
        actuator: Arc<dyn ScaleActuator>,
        config: &ScalingConfig,
    ) -> Self {
        Self {
            collector,
            actuator,
            analyzer: VolatilityAnalyzer::new(config.trend_window),
            engine: ScalingDecisionEngine::new(config),
            gate: CooldownGate::from_config(config),
            window: TrendWindow::new(config.trend_window),
            cooldown: CooldownState::default(),
        }
    }

    pub fn cooldown(&self) -> &CooldownState {
        &self.cooldown
    }
}

/// A promotion the governor confirmed, kept until discovery reflects it
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Promotion {
    pub(crate) old_primary: NodeEndpoint,
    pub(crate) new_primary: NodeEndpoint,
}

/// Collaborators of the failover lane
pub struct FailoverLane {
    pub(crate) discovery: Arc<dyn NodeDiscovery>,
    pub(crate) monitor: ClusterHealthMonitor,
    pub(crate) selector: FailoverSelector,
    pub(crate) actuator: Arc<dyn FailoverActuator>,
    pub(crate) auto_failover: bool,
    /// Overrides discovered topologies that still name the demoted primary
    pub(crate) promoted: Option<Promotion>,
}

impl FailoverLane {
    pub fn new(
        discovery: Arc<dyn NodeDiscovery>,
        monitor: ClusterHealthMonitor,
        actuator: Arc<dyn FailoverActuator>,
        auto_failover: bool,
    ) -> Self {
        Self {
            discovery,
            monitor,
            selector: FailoverSelector::new(),
            actuator,
            auto_failover,
            promoted: None,
        }
    }
}

/// Records produced by one cycle; a lane that is disabled yields `None`
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub scaling: Option<DecisionRecord>,
    pub failover: Option<DecisionRecord>,
    pub elapsed: Duration,
}

/// Reply slot for an operator-requested failover
pub(crate) type FailoverReply = oneshot::Sender<DecisionRecord>;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("control loop is not running")]
    Stopped,
}

/// Queues operator-requested failovers onto the running control loop
///
/// Requests run between cycles on the loop's own task, so they never race
/// a scheduled promotion.
#[derive(Debug, Clone)]
pub struct FailoverTrigger {
    requests: mpsc::Sender<FailoverReply>,
}

impl FailoverTrigger {
    pub(crate) fn new(requests: mpsc::Sender<FailoverReply>) -> Self {
        Self { requests }
    }

    /// Run the failover lane once and wait for its record
    pub async fn trigger(&self) -> Result<DecisionRecord, TriggerError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(reply)
            .await
            .map_err(|_| TriggerError::Stopped)?;
        response.await.map_err(|_| TriggerError::Stopped)
    }
}

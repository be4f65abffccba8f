//! Scaling decision engine
//!
//! Evaluates a small typed rule table against the current sample. Each rule
//! that fires contributes an explanation, a metric name and a confidence
//! weight, and may vote for a direction. Scale-up votes win over scale-down
//! votes; within a direction the most aggressive target wins.

use crate::config::ScalingConfig;
use crate::models::{MetricSample, ScalingAction, ScalingDecision, TrendSummary};

/// Confidence reported when no rule fired
pub const NEUTRAL_CONFIDENCE: f64 = 0.5;

/// Confidence attached to the CPU trend amplifier
pub const TREND_CONFIDENCE: f64 = 0.4;

/// Confidence attached to a replica-bounds correction
pub const BOUNDS_CONFIDENCE: f64 = 1.0;

/// Signal a rule reads from the sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    CpuUtilization,
    ResponseTimeP95,
    ErrorRate,
    /// Request rate divided by `max(current_replicas, 1)`
    RequestRatePerReplica,
}

impl Signal {
    /// Metric name recorded in `ScalingDecision::metrics_used`
    pub fn metric_name(&self) -> &'static str {
        match self {
            Signal::CpuUtilization => "cpu_utilization",
            Signal::ResponseTimeP95 => "response_time_p95",
            Signal::ErrorRate => "error_rate",
            Signal::RequestRatePerReplica => "request_rate",
        }
    }

    fn read(&self, sample: &MetricSample, current_replicas: u32) -> f64 {
        match self {
            Signal::CpuUtilization => sample.cpu_utilization,
            Signal::ResponseTimeP95 => sample.response_time_p95,
            Signal::ErrorRate => sample.error_rate,
            Signal::RequestRatePerReplica => sample.request_rate / current_replicas.max(1) as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Above,
    Below,
}

impl Comparator {
    fn fires(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Above => value > threshold,
            Comparator::Below => value < threshold,
        }
    }
}

/// One row of the rule table
#[derive(Debug, Clone)]
pub struct SignalRule {
    pub signal: Signal,
    pub comparator: Comparator,
    pub threshold: f64,
    /// Replica delta proposed when the rule fires
    pub step: i64,
    pub confidence: f64,
    /// Explanation prefix, followed by the observed value
    pub label: &'static str,
    pub unit: &'static str,
}

impl SignalRule {
    fn explain(&self, value: f64) -> String {
        format!("{}: {:.1}{}", self.label, value, self.unit)
    }
}

/// Build the rule table from scaling settings
pub fn rule_table(config: &ScalingConfig) -> Vec<SignalRule> {
    vec![
        SignalRule {
            signal: Signal::CpuUtilization,
            comparator: Comparator::Above,
            threshold: config.scale_up_threshold,
            step: 2,
            confidence: 0.8,
            label: "High CPU utilization",
            unit: "%",
        },
        SignalRule {
            signal: Signal::CpuUtilization,
            comparator: Comparator::Below,
            threshold: config.scale_down_threshold,
            step: -1,
            confidence: 0.6,
            label: "Low CPU utilization",
            unit: "%",
        },
        SignalRule {
            signal: Signal::ResponseTimeP95,
            comparator: Comparator::Above,
            threshold: config.response_time_threshold_ms,
            step: 1,
            confidence: 0.7,
            label: "High response time",
            unit: "ms",
        },
        SignalRule {
            signal: Signal::ErrorRate,
            comparator: Comparator::Above,
            threshold: config.error_rate_threshold,
            step: 2,
            confidence: 0.9,
            label: "High error rate",
            unit: "%",
        },
        SignalRule {
            signal: Signal::RequestRatePerReplica,
            comparator: Comparator::Above,
            threshold: config.request_rate_threshold,
            step: 2,
            confidence: 0.6,
            label: "High request rate per replica",
            unit: " r/s",
        },
    ]
}

/// Maps a sample, the current replica count and a trend into a decision
#[derive(Debug, Clone)]
pub struct ScalingDecisionEngine {
    rules: Vec<SignalRule>,
    min_replicas: u32,
    max_replicas: u32,
    trend_threshold: f64,
}

impl ScalingDecisionEngine {
    pub fn new(config: &ScalingConfig) -> Self {
        Self {
            rules: rule_table(config),
            min_replicas: config.min_replicas,
            max_replicas: config.max_replicas,
            trend_threshold: config.trend_threshold,
        }
    }

    fn clamp(&self, target: i64) -> u32 {
        target.clamp(self.min_replicas as i64, self.max_replicas as i64) as u32
    }

    pub fn decide(
        &self,
        sample: &MetricSample,
        current_replicas: u32,
        trend: &TrendSummary,
    ) -> ScalingDecision {
        let current = current_replicas as i64;
        let mut reasons = Vec::new();
        let mut metrics_used = Vec::new();
        let mut weights = Vec::new();
        let mut up_target: Option<u32> = None;
        let mut down_target: Option<u32> = None;

        for rule in &self.rules {
            let value = rule.signal.read(sample, current_replicas);
            if !rule.comparator.fires(value, rule.threshold) {
                continue;
            }

            reasons.push(rule.explain(value));
            metrics_used.push(rule.signal.metric_name().to_string());
            weights.push(rule.confidence);

            let proposed = self.clamp(current + rule.step);
            if proposed > current_replicas {
                up_target = Some(up_target.map_or(proposed, |t| t.max(proposed)));
            } else if proposed < current_replicas {
                down_target = Some(down_target.map_or(proposed, |t| t.min(proposed)));
            }
        }

        let (mut action, mut target) = match (up_target, down_target) {
            (Some(up), _) => (ScalingAction::ScaleUp, up),
            (None, Some(down)) => (ScalingAction::ScaleDown, down),
            (None, None) => (ScalingAction::NoAction, self.clamp(current)),
        };

        if action == ScalingAction::ScaleUp
            && trend.has_data()
            && trend.cpu_trend > self.trend_threshold
        {
            target = self.clamp(target as i64 + 1);
            reasons.push("CPU utilization trending upward".to_string());
            metrics_used.push("cpu_trend".to_string());
            weights.push(TREND_CONFIDENCE);
        }

        // A replica count outside the configured bounds is corrected even when
        // every signal is nominal.
        if action == ScalingAction::NoAction && target != current_replicas {
            action = if target > current_replicas {
                ScalingAction::ScaleUp
            } else {
                ScalingAction::ScaleDown
            };
            reasons.push(format!(
                "Replica count {} outside bounds [{}, {}]",
                current_replicas, self.min_replicas, self.max_replicas
            ));
            metrics_used.push("replica_bounds".to_string());
            weights.push(BOUNDS_CONFIDENCE);
        }

        if target == current_replicas {
            action = ScalingAction::NoAction;
        }

        let (reason, confidence) = if reasons.is_empty() {
            ("All metrics within normal range".to_string(), NEUTRAL_CONFIDENCE)
        } else {
            (
                reasons.join("; "),
                weights.iter().sum::<f64>() / weights.len() as f64,
            )
        };

        ScalingDecision {
            action,
            reason,
            confidence,
            target_replicas: target,
            current_replicas,
            metrics_used,
        }
    }
}

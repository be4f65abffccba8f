//! Cooldown gating for scaling actions
//!
//! The gate is a pure function over a [`CooldownState`]. Only the control
//! loop mutates the state, and only after the actuator confirms that an
//! action was executed.

use crate::config::ScalingConfig;
use crate::models::{ScalingAction, ScalingDecision};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Confidence reported when a decision is vetoed by cooldown
pub const COOLDOWN_CONFIDENCE: f64 = 0.9;

/// Timestamps of the last executed action per direction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownState {
    pub last_scale_up: Option<DateTime<Utc>>,
    pub last_scale_down: Option<DateTime<Utc>>,
}

impl CooldownState {
    /// Record an executed action. `NoAction` is ignored.
    pub fn record(&mut self, action: ScalingAction, at: DateTime<Utc>) {
        match action {
            ScalingAction::ScaleUp => self.last_scale_up = Some(at),
            ScalingAction::ScaleDown => self.last_scale_down = Some(at),
            ScalingAction::NoAction => {}
        }
    }

    fn last(&self, action: ScalingAction) -> Option<DateTime<Utc>> {
        match action {
            ScalingAction::ScaleUp => self.last_scale_up,
            ScalingAction::ScaleDown => self.last_scale_down,
            ScalingAction::NoAction => None,
        }
    }
}

/// Suppresses same-direction actions inside their cooldown window
#[derive(Debug, Clone, Copy)]
pub struct CooldownGate {
    scale_up_window: Duration,
    scale_down_window: Duration,
}

impl CooldownGate {
    pub fn new(scale_up_window: Duration, scale_down_window: Duration) -> Self {
        Self {
            scale_up_window,
            scale_down_window,
        }
    }

    pub fn from_config(config: &ScalingConfig) -> Self {
        Self::new(
            Duration::seconds(config.scale_up_cooldown_secs as i64),
            Duration::seconds(config.scale_down_cooldown_secs as i64),
        )
    }

    fn window(&self, action: ScalingAction) -> Duration {
        match action {
            ScalingAction::ScaleUp => self.scale_up_window,
            ScalingAction::ScaleDown => self.scale_down_window,
            ScalingAction::NoAction => Duration::zero(),
        }
    }

    /// Time left before `action` may run again, if it is still cooling down
    pub fn remaining(
        &self,
        action: ScalingAction,
        state: &CooldownState,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        let last = state.last(action)?;
        let elapsed = now - last;
        let window = self.window(action);
        (elapsed < window).then(|| window - elapsed)
    }

    /// Pass the decision through, or veto it to `NoAction`
    pub fn permit(
        &self,
        decision: ScalingDecision,
        state: &CooldownState,
        now: DateTime<Utc>,
    ) -> ScalingDecision {
        let Some(remaining) = self.remaining(decision.action, state, now) else {
            return decision;
        };

        let direction = match decision.action {
            ScalingAction::ScaleUp => "Scale up",
            _ => "Scale down",
        };

        ScalingDecision {
            action: ScalingAction::NoAction,
            reason: format!(
                "{} action blocked by cooldown period ({}s remaining): {}",
                direction,
                remaining.num_seconds(),
                decision.reason
            ),
            confidence: COOLDOWN_CONFIDENCE,
            ..decision
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> CooldownGate {
        CooldownGate::from_config(&ScalingConfig::default())
    }

    fn decision(action: ScalingAction) -> ScalingDecision {
        ScalingDecision {
            action,
            reason: "High CPU utilization: 90.0%".to_string(),
            confidence: 0.8,
            target_replicas: 7,
            current_replicas: 5,
            metrics_used: vec!["cpu_utilization".to_string()],
        }
    }

    #[test]
    fn test_no_history_passes_through() {
        let d = decision(ScalingAction::ScaleUp);
        let out = gate().permit(d.clone(), &CooldownState::default(), Utc::now());
        assert_eq!(out, d);
    }

    #[test]
    fn test_scale_up_blocked_inside_window() {
        let t0 = Utc::now();
        let mut state = CooldownState::default();
        state.record(ScalingAction::ScaleUp, t0);

        let out = gate().permit(
            decision(ScalingAction::ScaleUp),
            &state,
            t0 + Duration::seconds(1),
        );
        assert_eq!(out.action, ScalingAction::NoAction);
        assert_eq!(out.confidence, COOLDOWN_CONFIDENCE);
        assert!(out.reason.contains("blocked by cooldown"));
        assert_eq!(out.metrics_used, vec!["cpu_utilization"]);
        assert_eq!(out.effective_target(), 5);
    }

    #[test]
    fn test_scale_up_allowed_after_window() {
        let t0 = Utc::now();
        let mut state = CooldownState::default();
        state.record(ScalingAction::ScaleUp, t0);

        let out = gate().permit(
            decision(ScalingAction::ScaleUp),
            &state,
            t0 + Duration::seconds(301),
        );
        assert_eq!(out.action, ScalingAction::ScaleUp);
        assert_eq!(out.confidence, 0.8);
    }

    #[test]
    fn test_cooldown_is_per_direction() {
        let t0 = Utc::now();
        let mut state = CooldownState::default();
        state.record(ScalingAction::ScaleUp, t0);

        let mut down = decision(ScalingAction::ScaleDown);
        down.target_replicas = 4;
        let out = gate().permit(down, &state, t0 + Duration::seconds(1));
        assert_eq!(out.action, ScalingAction::ScaleDown);
    }

    #[test]
    fn test_scale_down_uses_longer_window() {
        let t0 = Utc::now();
        let mut state = CooldownState::default();
        state.record(ScalingAction::ScaleDown, t0);

        let at_400 = gate().permit(
            decision(ScalingAction::ScaleDown),
            &state,
            t0 + Duration::seconds(400),
        );
        assert_eq!(at_400.action, ScalingAction::NoAction);

        let at_601 = gate().permit(
            decision(ScalingAction::ScaleDown),
            &state,
            t0 + Duration::seconds(601),
        );
        assert_eq!(at_601.action, ScalingAction::ScaleDown);
    }

    #[test]
    fn test_permit_does_not_mutate_state() {
        let state = CooldownState::default();
        let _ = gate().permit(decision(ScalingAction::ScaleUp), &state, Utc::now());
        assert_eq!(state, CooldownState::default());
    }

    #[test]
    fn test_no_action_never_vetoed() {
        let t0 = Utc::now();
        let mut state = CooldownState::default();
        state.record(ScalingAction::ScaleUp, t0);
        state.record(ScalingAction::NoAction, t0);

        let d = decision(ScalingAction::NoAction);
        assert_eq!(gate().permit(d.clone(), &state, t0), d);
    }
}

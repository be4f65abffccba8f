//! Replica-count controller
//!
//! This module provides the scaling lane's pure decision pipeline:
//! trend analysis over recent samples, a rule-table decision engine, and a
//! cooldown gate that vetoes repeated same-direction actions.

mod analyzer;
mod cooldown;
mod engine;

pub use analyzer::{population_std_dev, TrendWindow, VolatilityAnalyzer, MIN_TREND_SAMPLES};
pub use cooldown::{CooldownGate, CooldownState, COOLDOWN_CONFIDENCE};
pub use engine::{
    rule_table, Comparator, ScalingDecisionEngine, Signal, SignalRule, BOUNDS_CONFIDENCE,
    NEUTRAL_CONFIDENCE, TREND_CONFIDENCE,
};

//! Trend and volatility analysis
//!
//! Computes a cheap directional signal over a short sliding window of
//! samples. The trend is `(last - first) / len`, a linear rate over the
//! window rather than a regression slope.

use crate::models::{MetricSample, TrendSummary};
use std::collections::VecDeque;

/// Minimum samples for a meaningful trend
pub const MIN_TREND_SAMPLES: usize = 2;

/// Stateless trend analyzer over the last `window` samples
#[derive(Debug, Clone, Copy)]
pub struct VolatilityAnalyzer {
    window: usize,
}

impl VolatilityAnalyzer {
    /// Create an analyzer; windows shorter than two samples are widened to two
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(MIN_TREND_SAMPLES),
        }
    }

    /// Summarize the most recent `window` samples (oldest first)
    pub fn analyze<'a, I>(&self, samples: I) -> TrendSummary
    where
        I: IntoIterator<Item = &'a MetricSample>,
        I::IntoIter: DoubleEndedIterator,
    {
        let mut recent: Vec<&MetricSample> = samples.into_iter().rev().take(self.window).collect();
        recent.reverse();

        if recent.len() < MIN_TREND_SAMPLES {
            return TrendSummary::default();
        }

        let n = recent.len();
        let (first, last) = (recent[0], recent[n - 1]);
        let rate = |a: f64, b: f64| (b - a) / n as f64;

        let cpu: Vec<f64> = recent.iter().map(|s| s.cpu_utilization).collect();

        TrendSummary {
            cpu_trend: rate(first.cpu_utilization, last.cpu_utilization),
            memory_trend: rate(first.memory_utilization, last.memory_utilization),
            request_trend: rate(first.request_rate, last.request_rate),
            response_time_trend: rate(first.response_time_p95, last.response_time_p95),
            error_trend: rate(first.error_rate, last.error_rate),
            cpu_volatility: population_std_dev(&cpu),
            sample_count: n,
        }
    }
}

/// Population standard deviation; zero for fewer than two values
pub fn population_std_dev(values: &[f64]) -> f64 {
    if values.len() < MIN_TREND_SAMPLES {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

/// Bounded history of recent samples, owned by the control loop
#[derive(Debug, Clone)]
pub struct TrendWindow {
    samples: VecDeque<MetricSample>,
    capacity: usize,
}

impl TrendWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_TREND_SAMPLES);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest when full
    pub fn push(&mut self, sample: MetricSample) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &MetricSample> {
        self.samples.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_with_cpu(cpu: f64) -> MetricSample {
        MetricSample {
            cpu_utilization: cpu,
            ..MetricSample::zeroed()
        }
    }

    #[test]
    fn test_single_sample_is_zero_summary() {
        let analyzer = VolatilityAnalyzer::new(5);
        let summary = analyzer.analyze(&[sample_with_cpu(40.0)]);
        assert_eq!(summary, TrendSummary::default());
        assert!(!summary.has_data());
    }

    #[test]
    fn test_empty_window_is_zero_summary() {
        let analyzer = VolatilityAnalyzer::new(5);
        let samples: Vec<MetricSample> = Vec::new();
        assert_eq!(analyzer.analyze(&samples), TrendSummary::default());
    }

    #[test]
    fn test_two_sample_trend() {
        let analyzer = VolatilityAnalyzer::new(5);
        let summary = analyzer.analyze(&[sample_with_cpu(40.0), sample_with_cpu(60.0)]);
        assert!((summary.cpu_trend - 10.0).abs() < 1e-9);
        // Population std-dev of [40, 60] is 10
        assert!((summary.cpu_volatility - 10.0).abs() < 1e-9);
        assert_eq!(summary.sample_count, 2);
        assert!(summary.has_data());
    }

    #[test]
    fn test_only_last_window_samples_used() {
        let analyzer = VolatilityAnalyzer::new(3);
        let samples: Vec<_> = [10.0, 90.0, 20.0, 30.0, 50.0]
            .into_iter()
            .map(sample_with_cpu)
            .collect();

        let summary = analyzer.analyze(&samples);
        // Window is [20, 30, 50]
        assert_eq!(summary.sample_count, 3);
        assert!((summary.cpu_trend - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_trend_tracks_other_signals() {
        let analyzer = VolatilityAnalyzer::new(4);
        let first = MetricSample {
            request_rate: 100.0,
            response_time_p95: 200.0,
            ..MetricSample::zeroed()
        };
        let last = MetricSample {
            request_rate: 300.0,
            response_time_p95: 100.0,
            ..MetricSample::zeroed()
        };

        let summary = analyzer.analyze(&[first, last]);
        assert!((summary.request_trend - 100.0).abs() < 1e-9);
        assert!((summary.response_time_trend + 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_population_std_dev() {
        assert_eq!(population_std_dev(&[]), 0.0);
        assert_eq!(population_std_dev(&[5.0]), 0.0);
        let sd = population_std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((sd - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_trend_window_evicts_oldest() {
        let mut window = TrendWindow::new(3);
        for cpu in [10.0, 20.0, 30.0, 40.0] {
            window.push(sample_with_cpu(cpu));
        }
        assert_eq!(window.len(), 3);
        let cpus: Vec<f64> = window.iter().map(|s| s.cpu_utilization).collect();
        assert_eq!(cpus, vec![20.0, 30.0, 40.0]);
    }

    #[test]
    fn test_analyzer_over_trend_window() {
        let analyzer = VolatilityAnalyzer::new(5);
        let mut window = TrendWindow::new(5);
        window.push(sample_with_cpu(40.0));
        window.push(sample_with_cpu(60.0));
        let summary = analyzer.analyze(window.iter());
        assert!((summary.cpu_trend - 10.0).abs() < 1e-9);
    }
}

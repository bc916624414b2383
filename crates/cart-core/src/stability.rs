//! # Weight Stability Math
//!
//! The pure half of weight handling: smoothing, settle detection and the
//! significance filter. The runtime half (threads, sleeps, locks) lives in
//! cart-engine and feeds samples into these types.
//!
//! ## Two-Stage Filter
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  raw sensor ──► SampleWindow ──► current_weight() ──► SettleWindow      │
//! │  (every 50ms)   last 10 reads    median once ≥3       spread of last 3  │
//! │                 clamped ≥ 0                           < threshold?      │
//! │                                                            │            │
//! │                                                            ▼            │
//! │                                     WeightBaseline::accept(stable)      │
//! │                                     |stable − last| ≥ threshold         │
//! │                                       ? delta (baseline moves)          │
//! │                                       : 0.0   (noise)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A single raw reading while an item is being placed is unusable: hand
//! motion and mechanical settling swing it by several grams.

use std::collections::VecDeque;

/// Default number of raw samples kept for median smoothing.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Samples needed before the median replaces the raw reading.
pub const MIN_SAMPLES_FOR_MEDIAN: usize = 3;

/// Consecutive readings that must agree for a weight to count as settled.
pub const SETTLE_WINDOW: usize = 3;

// =============================================================================
// Statistics Helpers
// =============================================================================

/// Median of `values`, or `None` when empty.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Arithmetic mean of `values`, or `None` when empty.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Tolerance for "the weight went back to what it was".
///
/// `max(fixed, |original_delta| × ratio)`: larger items get proportionally
/// more slack to absorb settling noise.
pub fn return_tolerance(fixed: f64, ratio: f64, original_delta: f64) -> f64 {
    fixed.max(original_delta.abs() * ratio)
}

// =============================================================================
// Sample Window
// =============================================================================

/// Bounded history of recent raw readings.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    samples: VecDeque<f64>,
    capacity: usize,
    last_raw: Option<f64>,
}

impl Default for SampleWindow {
    fn default() -> Self {
        SampleWindow::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl SampleWindow {
    /// Creates a window holding at most `capacity` readings (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        SampleWindow {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            last_raw: None,
        }
    }

    /// Records a reading, clamped to ≥ 0, evicting the oldest when full.
    pub fn push(&mut self, grams: f64) {
        let grams = grams.max(0.0);
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(grams);
        self.last_raw = Some(grams);
    }

    /// Smoothed weight: median once enough samples exist, else the last raw
    /// reading, else 0.
    pub fn current(&self) -> f64 {
        if self.samples.len() >= MIN_SAMPLES_FOR_MEDIAN {
            let values: Vec<f64> = self.samples.iter().copied().collect();
            median(&values).unwrap_or(0.0)
        } else {
            self.last_raw.unwrap_or(0.0)
        }
    }

    /// Drops every stored reading.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.last_raw = None;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// =============================================================================
// Settle Window
// =============================================================================

/// Collects polled weights during a stabilization wait.
#[derive(Debug, Clone)]
pub struct SettleWindow {
    readings: Vec<f64>,
    stability_threshold: f64,
}

impl SettleWindow {
    pub fn new(stability_threshold: f64) -> Self {
        SettleWindow {
            readings: Vec::new(),
            stability_threshold,
        }
    }

    /// Adds a reading; returns the settled weight once the last
    /// [`SETTLE_WINDOW`] readings spread less than the threshold.
    pub fn push(&mut self, grams: f64) -> Option<f64> {
        self.readings.push(grams);
        if self.readings.len() < SETTLE_WINDOW {
            return None;
        }
        let tail = &self.readings[self.readings.len() - SETTLE_WINDOW..];
        let max = tail.iter().copied().fold(f64::MIN, f64::max);
        let min = tail.iter().copied().fold(f64::MAX, f64::min);
        if max - min < self.stability_threshold {
            mean(tail)
        } else {
            None
        }
    }

    /// Best guess when the wait timed out: median of everything seen.
    pub fn fallback(&self) -> f64 {
        median(&self.readings).unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

// =============================================================================
// Weight Baseline
// =============================================================================

/// Last accepted stable weight plus the significance filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightBaseline {
    last_accepted: f64,
    weight_threshold: f64,
}

impl WeightBaseline {
    pub fn new(weight_threshold: f64) -> Self {
        WeightBaseline {
            last_accepted: 0.0,
            weight_threshold,
        }
    }

    /// Compares a settled weight to the baseline.
    ///
    /// Returns the signed change and moves the baseline if the change is at
    /// least the threshold; otherwise returns 0 and leaves it alone.
    pub fn accept(&mut self, stable_weight: f64) -> f64 {
        let delta = stable_weight - self.last_accepted;
        if delta.abs() >= self.weight_threshold {
            self.last_accepted = stable_weight;
            delta
        } else {
            0.0
        }
    }

    /// Forces the baseline to `grams` (after a put-back or a re-tare).
    pub fn set(&mut self, grams: f64) {
        self.last_accepted = grams;
    }

    #[inline]
    pub fn last_accepted(&self) -> f64 {
        self.last_accepted
    }

    #[inline]
    pub fn weight_threshold(&self) -> f64 {
        self.weight_threshold
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_and_mean() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(mean(&[1.0, 2.0, 3.0]), Some(2.0));
    }

    #[test]
    fn test_window_uses_raw_until_three_samples() {
        let mut window = SampleWindow::new(10);
        assert_eq!(window.current(), 0.0);

        window.push(100.0);
        assert_eq!(window.current(), 100.0);
        window.push(900.0);
        assert_eq!(window.current(), 900.0);

        window.push(110.0);
        assert_eq!(window.current(), 110.0); // median of 100, 900, 110
    }

    #[test]
    fn test_window_evicts_oldest_and_clamps() {
        let mut window = SampleWindow::new(3);
        window.push(-5.0);
        window.push(10.0);
        window.push(10.0);
        assert_eq!(window.current(), 10.0);

        window.push(50.0);
        window.push(50.0);
        assert_eq!(window.len(), 3);
        assert_eq!(window.current(), 50.0);

        window.clear();
        assert!(window.is_empty());
        assert_eq!(window.current(), 0.0);
    }

    #[test]
    fn test_settle_window() {
        let mut settle = SettleWindow::new(2.5);
        assert_eq!(settle.push(100.0), None);
        assert_eq!(settle.push(300.0), None);
        assert_eq!(settle.push(500.0), None);
        assert_eq!(settle.push(501.0), None);
        assert_eq!(settle.push(502.0), Some(501.0));
    }

    #[test]
    fn test_settle_fallback_is_median() {
        let mut settle = SettleWindow::new(0.5);
        for w in [10.0, 30.0, 20.0, 50.0] {
            assert!(settle.push(w).is_none());
        }
        assert_eq!(settle.fallback(), 25.0);
        assert_eq!(SettleWindow::new(1.0).fallback(), 0.0);
    }

    #[test]
    fn test_baseline_noise_floor() {
        let mut baseline = WeightBaseline::new(10.0);
        assert_eq!(baseline.accept(3.0), 0.0);
        assert_eq!(baseline.last_accepted(), 0.0);

        assert_eq!(baseline.accept(500.0), 500.0);
        assert_eq!(baseline.last_accepted(), 500.0);

        assert_eq!(baseline.accept(495.0), 0.0);
        assert_eq!(baseline.accept(0.0), -500.0);
    }

    #[test]
    fn test_return_tolerance() {
        assert_eq!(return_tolerance(10.0, 0.05, -100.0), 10.0);
        assert_eq!(return_tolerance(10.0, 0.05, -1000.0), 50.0);
    }
}

//! # Stabilization Detector
//!
//! Waits for the smoothed weight to settle and reports the settled change
//! since the last accepted baseline.
//!
//! ```text
//!   poll current_weight() every 100 ms, for at most wait_time
//!        │
//!        ├── last 3 readings spread < stability_threshold ──► mean of those 3
//!        └── wait_time elapsed ─────────────────────────────► median of all
//!                                                                  │
//!                                         WeightBaseline::accept ◄─┘
//!                                         |Δ| ≥ 10 g ? Δ : 0
//! ```
//!
//! The wait uses tokio's clock, so tests with paused time are fully
//! deterministic for a given sequence of readings.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use cart_core::{SettleWindow, WeightBaseline};

use crate::sampler::WeightSource;

/// Configuration for the stabilizer.
#[derive(Debug, Clone)]
pub struct StabilizerConfig {
    /// Longest wait for a settled reading.
    pub wait_time: Duration,

    /// Max spread of the last readings for "settled" (grams).
    pub stability_threshold: f64,

    /// Polling period during the wait.
    pub poll_interval: Duration,

    /// Smallest change that counts (grams).
    pub weight_threshold: f64,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        StabilizerConfig {
            wait_time: Duration::from_secs(1),
            stability_threshold: 2.0,
            poll_interval: Duration::from_millis(100),
            weight_threshold: 10.0,
        }
    }
}

/// Settle detector plus significance filter over a [`WeightSource`].
pub struct WeightStabilizer {
    source: Arc<dyn WeightSource>,
    config: StabilizerConfig,
    baseline: WeightBaseline,
}

impl WeightStabilizer {
    pub fn new(source: Arc<dyn WeightSource>, config: StabilizerConfig) -> Self {
        let baseline = WeightBaseline::new(config.weight_threshold);
        WeightStabilizer {
            source,
            config,
            baseline,
        }
    }

    /// Settled change since the last accepted weight, using the configured
    /// wait and threshold.
    pub async fn evaluate(&mut self) -> f64 {
        let (wait, threshold) = (self.config.wait_time, self.config.stability_threshold);
        self.get_weight_change(wait, threshold).await
    }

    /// Settled change since the last accepted weight.
    ///
    /// Returns 0 when the change is below the weight threshold; otherwise the
    /// signed change, and the baseline moves to the new weight.
    pub async fn get_weight_change(&mut self, wait_time: Duration, stability_threshold: f64) -> f64 {
        let stable = self.wait_for_stable(wait_time, stability_threshold).await;
        let delta = self.baseline.accept(stable);
        if delta != 0.0 {
            debug!(
                stable_g = stable,
                delta_g = delta,
                "Significant weight change accepted"
            );
        }
        delta
    }

    /// Polls until the reading settles or `wait_time` runs out.
    pub async fn wait_for_stable(&self, wait_time: Duration, stability_threshold: f64) -> f64 {
        let deadline = Instant::now() + wait_time;
        let mut settle = SettleWindow::new(stability_threshold);

        loop {
            if let Some(stable) = settle.push(self.source.current_weight()) {
                return stable;
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }

        let fallback = settle.fallback();
        debug!(
            samples = settle.len(),
            fallback_g = fallback,
            "Weight did not settle in time, using median"
        );
        fallback
    }

    /// Smoothed weight right now, without waiting.
    pub fn current_weight(&self) -> f64 {
        self.source.current_weight()
    }

    /// Re-tares the scale and zeroes the baseline.
    pub fn tare(&mut self) {
        self.source.reset();
        self.baseline.set(0.0);
    }

    /// Moves the baseline to `grams` without an event.
    pub fn rebaseline(&mut self, grams: f64) {
        debug!(baseline_g = grams, "Weight baseline moved");
        self.baseline.set(grams);
    }

    pub fn last_accepted(&self) -> f64 {
        self.baseline.last_accepted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed sequence of readings, repeating the last one.
    struct Script {
        readings: Mutex<VecDeque<f64>>,
        resets: Mutex<u32>,
    }

    impl Script {
        fn new(readings: &[f64]) -> Arc<Self> {
            Arc::new(Script {
                readings: Mutex::new(readings.iter().copied().collect()),
                resets: Mutex::new(0),
            })
        }
    }

    impl WeightSource for Script {
        fn current_weight(&self) -> f64 {
            let mut readings = self.readings.lock().unwrap();
            if readings.len() > 1 {
                readings.pop_front().unwrap()
            } else {
                readings.front().copied().unwrap_or(0.0)
            }
        }

        fn reset(&self) {
            *self.resets.lock().unwrap() += 1;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_settles_on_mean_of_last_three() {
        let source = Script::new(&[100.0, 300.0, 500.0, 500.5, 501.0]);
        let mut stabilizer = WeightStabilizer::new(source, StabilizerConfig::default());

        let delta = stabilizer.evaluate().await;
        assert_eq!(delta, 500.5);
        assert_eq!(stabilizer.last_accepted(), 500.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_small_change_is_noise() {
        let source = Script::new(&[3.0]);
        let mut stabilizer = WeightStabilizer::new(source, StabilizerConfig::default());

        assert_eq!(stabilizer.evaluate().await, 0.0);
        assert_eq!(stabilizer.last_accepted(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back_to_median() {
        // Oscillates by 20 g forever, never settling.
        let mut readings = Vec::new();
        for i in 0..40 {
            readings.push(if i % 2 == 0 { 200.0 } else { 220.0 });
        }
        let source = Script::new(&readings);
        let mut stabilizer = WeightStabilizer::new(source, StabilizerConfig::default());

        let started = Instant::now();
        let delta = stabilizer.evaluate().await;
        assert!(started.elapsed() >= Duration::from_secs(1));
        // 11 polls (t = 0..=1000 ms): six 200s and five 220s.
        assert_eq!(delta, 200.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_sequence_same_delta() {
        let sequence = [0.0, 40.0, 260.0, 250.0, 251.0, 249.5];
        let mut results = Vec::new();
        for _ in 0..3 {
            let mut stabilizer =
                WeightStabilizer::new(Script::new(&sequence), StabilizerConfig::default());
            results.push(stabilizer.evaluate().await);
        }
        assert!(results.iter().all(|d| *d == results[0]));
        assert!((results[0] - 750.5 / 3.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tare_resets_source_and_baseline() {
        let source = Script::new(&[600.0]);
        let mut stabilizer = WeightStabilizer::new(source.clone(), StabilizerConfig::default());
        assert_eq!(stabilizer.evaluate().await, 600.0);

        stabilizer.tare();
        assert_eq!(*source.resets.lock().unwrap(), 1);
        assert_eq!(stabilizer.last_accepted(), 0.0);

        stabilizer.rebaseline(600.0);
        assert_eq!(stabilizer.evaluate().await, 0.0);
    }
}

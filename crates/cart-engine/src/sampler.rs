//! # Weight Sampler
//!
//! Background reader of the load cell that keeps a smoothed weight available
//! to the main loop.
//!
//! ## Shared Cell
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   blocking pool                         main loop / stabilizer          │
//! │   ─────────────                         ──────────────────────          │
//! │   WeightSampler::run                    WeightReader                    │
//! │     │                                     │                             │
//! │     │ read_grams()  (no lock held)        │ current_weight()            │
//! │     │                                     │   lock → median → unlock    │
//! │     ▼                                     │                             │
//! │   lock → epoch unchanged? push → unlock   │ reset()                     │
//! │                                           │   lock → clear, epoch += 1, │
//! │         Mutex<ScaleState>                 │   request tare → unlock     │
//! │   ┌──────────────────────────────────┐    │                             │
//! │   │ window: SampleWindow (last 10)   │◄───┘                             │
//! │   │ epoch:  u64                      │                                  │
//! │   │ tare_pending: bool               │                                  │
//! │   └──────────────────────────────────┘                                  │
//! │                                                                         │
//! │   A sample read before a reset carries the old epoch and is dropped,    │
//! │   so a reset never races with an in-flight read.                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Handling
//! Read errors are logged and retried after an exponential backoff
//! (500 ms doubling up to 5 s, reset on the next good read). They never
//! leave this module.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cart_core::SampleWindow;

use crate::error::SensorError;
use crate::sensor::WeightSensor;

/// Longest uninterrupted sleep; bounds how long a stop request waits.
const STOP_POLL: Duration = Duration::from_millis(20);

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the sampler.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Period between reads.
    pub interval: Duration,

    /// Raw readings kept for smoothing.
    pub history_capacity: usize,

    /// First retry delay after a failed read.
    pub initial_backoff: Duration,

    /// Longest retry delay.
    pub max_backoff: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig {
            interval: Duration::from_millis(50),
            history_capacity: cart_core::stability::DEFAULT_HISTORY_CAPACITY,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

#[derive(Debug)]
struct ScaleState {
    window: SampleWindow,
    epoch: u64,
    tare_pending: bool,
}

fn lock(state: &Mutex<ScaleState>) -> MutexGuard<'_, ScaleState> {
    // A poisoned window is still a valid window.
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read side of the sampler, cheap to clone.
pub trait WeightSource: Send + Sync {
    /// Smoothed weight right now (grams).
    fn current_weight(&self) -> f64;

    /// Clears the history and re-tares the sensor.
    fn reset(&self);
}

/// Handle for reading the smoothed weight.
#[derive(Debug, Clone)]
pub struct WeightReader {
    state: Arc<Mutex<ScaleState>>,
}

impl WeightReader {
    /// Number of samples currently held.
    pub fn sample_count(&self) -> usize {
        lock(&self.state).window.len()
    }
}

impl WeightSource for WeightReader {
    fn current_weight(&self) -> f64 {
        lock(&self.state).window.current()
    }

    fn reset(&self) {
        let mut state = lock(&self.state);
        state.window.clear();
        state.epoch += 1;
        state.tare_pending = true;
        debug!(epoch = state.epoch, "Weight history cleared, tare requested");
    }
}

// =============================================================================
// Sampler
// =============================================================================

/// Continuously samples a [`WeightSensor`].
pub struct WeightSampler {
    sensor: Box<dyn WeightSensor>,
    config: SamplerConfig,
    state: Arc<Mutex<ScaleState>>,
    stop: Arc<AtomicBool>,
}

/// Handle for stopping a running sampler and getting its sensor back.
pub struct SamplerHandle {
    stop: Arc<AtomicBool>,
    task: JoinHandle<Box<dyn WeightSensor>>,
}

impl SamplerHandle {
    /// Asks the sampler to stop after its current read.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Stops the sampler and waits up to `timeout` for it to exit.
    ///
    /// Returns the sensor on a clean exit, `None` if the sampler did not
    /// finish in time or panicked.
    pub async fn stop(self, timeout: Duration) -> Option<Box<dyn WeightSensor>> {
        self.request_stop();
        match tokio::time::timeout(timeout, self.task).await {
            Ok(Ok(sensor)) => Some(sensor),
            Ok(Err(e)) => {
                warn!(error = %e, "Weight sampler task failed");
                None
            }
            Err(_) => {
                warn!(?timeout, "Weight sampler did not stop in time");
                None
            }
        }
    }
}

impl WeightSampler {
    pub fn new(sensor: Box<dyn WeightSensor>, config: SamplerConfig) -> Self {
        let state = ScaleState {
            window: SampleWindow::new(config.history_capacity),
            epoch: 0,
            tare_pending: false,
        };
        WeightSampler {
            sensor,
            config,
            state: Arc::new(Mutex::new(state)),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a reader for the shared weight cell.
    pub fn reader(&self) -> WeightReader {
        WeightReader {
            state: self.state.clone(),
        }
    }

    /// Starts sampling on the blocking pool.
    pub fn spawn(self) -> (WeightReader, SamplerHandle) {
        let reader = self.reader();
        let stop = self.stop.clone();
        let task = tokio::task::spawn_blocking(move || self.run());
        (reader, SamplerHandle { stop, task })
    }

    /// Sampling loop. Runs until the stop flag is set, then hands the
    /// sensor back.
    fn run(mut self) -> Box<dyn WeightSensor> {
        info!(interval = ?self.config.interval, "Weight sampler starting");

        let mut backoff = ExponentialBackoff {
            initial_interval: self.config.initial_backoff,
            max_interval: self.config.max_backoff,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();

        while !self.stopped() {
            let (epoch, tare) = {
                let mut state = lock(&self.state);
                (state.epoch, std::mem::take(&mut state.tare_pending))
            };

            if tare {
                match self.sensor.tare() {
                    Ok(()) => debug!("Scale tared"),
                    Err(e) => warn!(error = %e, "Scale tare failed"),
                }
            }

            let reading = self.sensor.read_grams().and_then(|grams| {
                if grams.is_finite() {
                    Ok(grams)
                } else {
                    Err(SensorError::NotFinite(grams))
                }
            });

            match reading {
                Ok(grams) => {
                    backoff.reset();
                    {
                        let mut state = lock(&self.state);
                        if state.epoch == epoch {
                            state.window.push(grams);
                        } else {
                            debug!("Discarding sample read before reset");
                        }
                    }
                    self.sleep(self.config.interval);
                }
                Err(e) => {
                    let retry_in = backoff.next_backoff().unwrap_or(self.config.max_backoff);
                    warn!(error = %e, ?retry_in, "Weight read failed");
                    self.sleep(retry_in);
                }
            }
        }

        info!("Weight sampler stopped");
        self.sensor
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Sleeps for `duration`, waking early when stopped.
    fn sleep(&self, duration: Duration) {
        let mut remaining = duration;
        while !remaining.is_zero() && !self.stopped() {
            let step = remaining.min(STOP_POLL);
            std::thread::sleep(step);
            remaining = remaining.saturating_sub(step);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

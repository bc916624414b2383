//! # Weight Sensor
//!
//! The hardware seam for the load cell, plus a simulated scale used by the
//! bench console and the tests.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::SensorError;

/// A load cell that can be read and zeroed.
///
/// Implementations may block (bus transactions, ADC conversion); the sampler
/// calls them from the blocking pool, never from an async task.
pub trait WeightSensor: Send + 'static {
    /// Reads the current load in grams.
    fn read_grams(&mut self) -> Result<f64, SensorError>;

    /// Zeroes the scale at the current load.
    fn tare(&mut self) -> Result<(), SensorError>;
}

// =============================================================================
// Simulated Scale
// =============================================================================

#[derive(Debug, Default)]
struct ScaleModel {
    load_g: f64,
    offset_g: f64,
    failing_reads: u32,
    fail_tare: bool,
    read_delay: Duration,
    reads: u64,
}

/// In-memory scale whose load is set through a shared handle.
///
/// ```rust
/// use cart_engine::sensor::{SimulatedScale, WeightSensor};
///
/// let mut scale = SimulatedScale::new();
/// let control = scale.clone();
/// control.set_load(250.0);
/// assert_eq!(scale.read_grams().unwrap(), 250.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SimulatedScale {
    model: Arc<Mutex<ScaleModel>>,
}

impl SimulatedScale {
    pub fn new() -> Self {
        Self::default()
    }

    fn model(&self) -> MutexGuard<'_, ScaleModel> {
        self.model.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the physical load on the platform (grams, before tare).
    pub fn set_load(&self, grams: f64) {
        self.model().load_g = grams;
    }

    /// Adds (or with a negative value, removes) load.
    pub fn add_load(&self, grams: f64) {
        self.model().load_g += grams;
    }

    /// Physical load on the platform.
    pub fn load(&self) -> f64 {
        self.model().load_g
    }

    /// Makes the next `count` reads fail.
    pub fn fail_next_reads(&self, count: u32) {
        self.model().failing_reads = count;
    }

    /// Makes every tare fail until cleared.
    pub fn set_tare_failure(&self, fail: bool) {
        self.model().fail_tare = fail;
    }

    /// Makes every read block for `delay`, like a hung bus transaction.
    pub fn set_read_delay(&self, delay: Duration) {
        self.model().read_delay = delay;
    }

    /// Number of read attempts so far, failed ones included.
    pub fn read_count(&self) -> u64 {
        self.model().reads
    }
}

impl WeightSensor for SimulatedScale {
    fn read_grams(&mut self) -> Result<f64, SensorError> {
        let delay = {
            let mut model = self.model();
            model.reads += 1;
            model.read_delay
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut model = self.model();
        if model.failing_reads > 0 {
            model.failing_reads -= 1;
            return Err(SensorError::ReadFailed("simulated read failure".into()));
        }
        Ok(model.load_g - model.offset_g)
    }

    fn tare(&mut self) -> Result<(), SensorError> {
        let mut model = self.model();
        if model.fail_tare {
            return Err(SensorError::TareFailed("simulated tare failure".into()));
        }
        model.offset_g = model.load_g;
        Ok(())
    }
}

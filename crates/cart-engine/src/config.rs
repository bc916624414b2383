//! # Cart Configuration
//!
//! Configuration management for the cart runtime.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     CART_ID=cart-17                                                    │
//! │     CART_WEIGHT_THRESHOLD_G=15                                         │
//! │     CART_SCAN_TIMEOUT_MS=8000                                          │
//! │     CART_WEIGHT_CHECK_INTERVAL_MS=500                                  │
//! │     CART_SUMMARY_INTERVAL_MS=10000                                     │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/cart-controller/cart.toml (Linux)                        │
//! │     ~/Library/Application Support/com.cartctl.cart-controller/...      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     auto-generated cart id, 10 g threshold, 5 s scan timeout           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [cart]
//! id = "cart-17"
//! name = "Aisle 3 cart"
//!
//! [scale]
//! sample_interval_ms = 50
//! history_capacity = 10
//!
//! [stability]
//! wait_time_ms = 1000
//! stability_threshold_g = 2.0
//! weight_threshold_g = 10.0
//!
//! [matching]
//! weight_match_ratio = 0.10
//! return_tolerance_g = 10.0
//! return_tolerance_ratio = 0.05
//!
//! [timing]
//! loop_tick_ms = 50
//! weight_check_interval_ms = 500
//! summary_interval_ms = 10000
//! scan_timeout_ms = 5000
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use cart_core::{ReconcilePolicy, MIN_WEIGHT_THRESHOLD_G};

use crate::engine::LoopConfig;
use crate::error::{EngineError, EngineResult};
use crate::sampler::SamplerConfig;
use crate::stabilizer::StabilizerConfig;

// =============================================================================
// Cart Identity
// =============================================================================

/// Identity of this cart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartIdentity {
    /// Cart identifier used when binding sessions.
    /// Auto-generated on first run if not provided.
    pub id: String,

    /// Human-readable name (e.g., "Aisle 3 cart").
    #[serde(default = "default_cart_name")]
    pub name: String,
}

fn default_cart_name() -> String {
    "Smart Cart".to_string()
}

impl Default for CartIdentity {
    fn default() -> Self {
        CartIdentity {
            id: Uuid::new_v4().to_string(),
            name: default_cart_name(),
        }
    }
}

// =============================================================================
// Scale Settings
// =============================================================================

/// Load-cell sampling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleSettings {
    /// Sensor sampling period (milliseconds).
    #[serde(default = "default_sample_interval")]
    pub sample_interval_ms: u64,

    /// Raw readings kept for median smoothing.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// First retry delay after a failed read (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Longest retry delay after repeated failures (milliseconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_sample_interval() -> u64 {
    50
}
fn default_history_capacity() -> usize {
    cart_core::stability::DEFAULT_HISTORY_CAPACITY
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    5_000
}

impl Default for ScaleSettings {
    fn default() -> Self {
        ScaleSettings {
            sample_interval_ms: default_sample_interval(),
            history_capacity: default_history_capacity(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

// =============================================================================
// Stability Settings
// =============================================================================

/// Settle detection and significance filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilitySettings {
    /// Longest wait for a settled reading (milliseconds).
    #[serde(default = "default_wait_time")]
    pub wait_time_ms: u64,

    /// Max spread of the last readings for "settled" (grams).
    #[serde(default = "default_stability_threshold")]
    pub stability_threshold_g: f64,

    /// Polling period during the wait (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Smallest change that counts as an event (grams).
    #[serde(default = "default_weight_threshold")]
    pub weight_threshold_g: f64,
}

fn default_wait_time() -> u64 {
    1_000
}
fn default_stability_threshold() -> f64 {
    2.0
}
fn default_poll_interval() -> u64 {
    100
}
fn default_weight_threshold() -> f64 {
    10.0
}

impl Default for StabilitySettings {
    fn default() -> Self {
        StabilitySettings {
            wait_time_ms: default_wait_time(),
            stability_threshold_g: default_stability_threshold(),
            poll_interval_ms: default_poll_interval(),
            weight_threshold_g: default_weight_threshold(),
        }
    }
}

// =============================================================================
// Matching Settings
// =============================================================================

/// Tolerances for attributing weight changes to items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingSettings {
    /// Relative tolerance when matching a drop to an item's unit weight.
    #[serde(default = "default_match_ratio")]
    pub weight_match_ratio: f64,

    /// Minimum slack for "the weight went back" (grams).
    #[serde(default = "default_return_tolerance")]
    pub return_tolerance_g: f64,

    /// Proportional slack for "the weight went back".
    #[serde(default = "default_return_ratio")]
    pub return_tolerance_ratio: f64,
}

fn default_match_ratio() -> f64 {
    cart_core::inventory::DEFAULT_WEIGHT_MATCH_RATIO
}
fn default_return_tolerance() -> f64 {
    10.0
}
fn default_return_ratio() -> f64 {
    0.05
}

impl Default for MatchingSettings {
    fn default() -> Self {
        MatchingSettings {
            weight_match_ratio: default_match_ratio(),
            return_tolerance_g: default_return_tolerance(),
            return_tolerance_ratio: default_return_ratio(),
        }
    }
}

// =============================================================================
// Timing Settings
// =============================================================================

/// Main loop cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    /// Main loop period (milliseconds).
    #[serde(default = "default_loop_tick")]
    pub loop_tick_ms: u64,

    /// Period of weight evaluation (milliseconds).
    #[serde(default = "default_weight_check_interval")]
    pub weight_check_interval_ms: u64,

    /// Period of cart summary logging (milliseconds).
    #[serde(default = "default_summary_interval")]
    pub summary_interval_ms: u64,

    /// How long a scan may wait for weight and vice versa (milliseconds).
    #[serde(default = "default_scan_timeout")]
    pub scan_timeout_ms: u64,

    /// Bound on joining background work at shutdown (milliseconds).
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
}

fn default_loop_tick() -> u64 {
    50
}
fn default_weight_check_interval() -> u64 {
    500
}
fn default_summary_interval() -> u64 {
    10_000
}
fn default_scan_timeout() -> u64 {
    5_000
}
fn default_shutdown_timeout() -> u64 {
    5_000
}

impl Default for TimingSettings {
    fn default() -> Self {
        TimingSettings {
            loop_tick_ms: default_loop_tick(),
            weight_check_interval_ms: default_weight_check_interval(),
            summary_interval_ms: default_summary_interval(),
            scan_timeout_ms: default_scan_timeout(),
            shutdown_timeout_ms: default_shutdown_timeout(),
        }
    }
}

// =============================================================================
// Main Cart Configuration
// =============================================================================

/// Complete cart configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CartConfig {
    /// Cart identity.
    #[serde(default)]
    pub cart: CartIdentity,

    /// Load-cell sampling.
    #[serde(default)]
    pub scale: ScaleSettings,

    /// Settle detection.
    #[serde(default)]
    pub stability: StabilitySettings,

    /// Weight matching tolerances.
    #[serde(default)]
    pub matching: MatchingSettings,

    /// Loop cadence and timeouts.
    #[serde(default)]
    pub timing: TimingSettings,
}

impl CartConfig {
    /// Creates a new config with defaults and a generated cart id.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (cart.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading cart config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load cart config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> EngineResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| EngineError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Cart config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        if self.cart.id.trim().is_empty() {
            return Err(EngineError::InvalidConfig("cart id must not be empty".into()));
        }

        if self.scale.sample_interval_ms == 0 {
            return Err(EngineError::InvalidConfig(
                "sample_interval_ms must be greater than 0".into(),
            ));
        }
        if self.scale.history_capacity == 0 {
            return Err(EngineError::InvalidConfig(
                "history_capacity must be greater than 0".into(),
            ));
        }
        if self.scale.initial_backoff_ms > self.scale.max_backoff_ms {
            return Err(EngineError::InvalidConfig(
                "initial_backoff_ms must not exceed max_backoff_ms".into(),
            ));
        }

        if !(self.stability.weight_threshold_g >= MIN_WEIGHT_THRESHOLD_G) {
            return Err(EngineError::InvalidConfig(format!(
                "weight_threshold_g must be at least {}",
                MIN_WEIGHT_THRESHOLD_G
            )));
        }
        if !(self.stability.stability_threshold_g > 0.0) {
            return Err(EngineError::InvalidConfig(
                "stability_threshold_g must be greater than 0".into(),
            ));
        }
        if self.stability.poll_interval_ms == 0 {
            return Err(EngineError::InvalidConfig(
                "poll_interval_ms must be greater than 0".into(),
            ));
        }

        if self.timing.loop_tick_ms == 0 {
            return Err(EngineError::InvalidConfig(
                "loop_tick_ms must be greater than 0".into(),
            ));
        }
        if self.timing.weight_check_interval_ms < self.timing.loop_tick_ms {
            return Err(EngineError::InvalidConfig(
                "weight_check_interval_ms must not be shorter than loop_tick_ms".into(),
            ));
        }

        self.to_policy().validate()?;
        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("CART_ID") {
            debug!(cart_id = %id, "Overriding cart id from environment");
            self.cart.id = id;
        }

        if let Ok(value) = std::env::var("CART_WEIGHT_THRESHOLD_G") {
            match value.parse::<f64>() {
                Ok(g) => self.stability.weight_threshold_g = g,
                Err(_) => warn!(value = %value, "Ignoring invalid CART_WEIGHT_THRESHOLD_G"),
            }
        }

        if let Ok(value) = std::env::var("CART_SCAN_TIMEOUT_MS") {
            match value.parse::<u64>() {
                Ok(ms) => self.timing.scan_timeout_ms = ms,
                Err(_) => warn!(value = %value, "Ignoring invalid CART_SCAN_TIMEOUT_MS"),
            }
        }

        if let Ok(value) = std::env::var("CART_WEIGHT_CHECK_INTERVAL_MS") {
            match value.parse::<u64>() {
                Ok(ms) => self.timing.weight_check_interval_ms = ms,
                Err(_) => warn!(value = %value, "Ignoring invalid CART_WEIGHT_CHECK_INTERVAL_MS"),
            }
        }

        if let Ok(value) = std::env::var("CART_SUMMARY_INTERVAL_MS") {
            match value.parse::<u64>() {
                Ok(ms) => self.timing.summary_interval_ms = ms,
                Err(_) => warn!(value = %value, "Ignoring invalid CART_SUMMARY_INTERVAL_MS"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "cartctl", "cart-controller")
            .map(|dirs| dirs.config_dir().join("cart.toml"))
    }

    // =========================================================================
    // Derived Settings
    // =========================================================================

    /// Returns the cart id.
    pub fn cart_id(&self) -> &str {
        &self.cart.id
    }

    /// Tolerances for the reconciliation state machine.
    pub fn to_policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            weight_match_ratio: self.matching.weight_match_ratio,
            return_tolerance_g: self.matching.return_tolerance_g,
            return_tolerance_ratio: self.matching.return_tolerance_ratio,
            scan_timeout: Duration::from_millis(self.timing.scan_timeout_ms),
        }
    }

    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            interval: Duration::from_millis(self.scale.sample_interval_ms),
            history_capacity: self.scale.history_capacity,
            initial_backoff: Duration::from_millis(self.scale.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.scale.max_backoff_ms),
        }
    }

    pub fn stabilizer_config(&self) -> StabilizerConfig {
        StabilizerConfig {
            wait_time: Duration::from_millis(self.stability.wait_time_ms),
            stability_threshold: self.stability.stability_threshold_g,
            poll_interval: Duration::from_millis(self.stability.poll_interval_ms),
            weight_threshold: self.stability.weight_threshold_g,
        }
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            tick: Duration::from_millis(self.timing.loop_tick_ms),
            weight_check_interval: Duration::from_millis(self.timing.weight_check_interval_ms),
            summary_interval: Duration::from_millis(self.timing.summary_interval_ms),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.shutdown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CartConfig::default();
        assert!(!config.cart.id.is_empty()); // Auto-generated
        assert_eq!(config.stability.weight_threshold_g, 10.0);
        assert_eq!(config.timing.scan_timeout_ms, 5_000);
        assert_eq!(config.timing.weight_check_interval_ms, 500);
        assert_eq!(config.timing.summary_interval_ms, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = CartConfig::default();

        config.cart.id = String::new();
        assert!(config.validate().is_err());
        config.cart.id = "cart-1".to_string();

        config.stability.weight_threshold_g = 0.2;
        assert!(config.validate().is_err());
        config.stability.weight_threshold_g = 10.0;

        config.matching.weight_match_ratio = 0.0;
        let err = config.validate().unwrap_err();
        assert!(err.is_config_error());
        config.matching.weight_match_ratio = 0.1;

        config.timing.weight_check_interval_ms = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: CartConfig = toml::from_str(
            r#"
            [cart]
            id = "cart-17"

            [stability]
            weight_threshold_g = 15.0
            "#,
        )
        .unwrap();
        assert_eq!(config.cart.id, "cart-17");
        assert_eq!(config.cart.name, "Smart Cart");
        assert_eq!(config.stability.weight_threshold_g, 15.0);
        assert_eq!(config.stability.wait_time_ms, 1_000);
        assert_eq!(config.scale.history_capacity, 10);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cart.toml");

        let mut config = CartConfig::default();
        config.cart.id = "cart-round-trip".to_string();
        config.timing.summary_interval_ms = 2_000;
        config.save(Some(path.clone())).unwrap();

        let loaded = CartConfig::load(Some(path)).unwrap();
        // CART_ID may be set in the environment running the tests.
        if std::env::var("CART_ID").is_err() {
            assert_eq!(loaded.cart.id, "cart-round-trip");
        }
        assert_eq!(loaded.timing.summary_interval_ms, 2_000);
    }

    #[test]
    fn test_invalid_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cart.toml");
        std::fs::write(&path, "[timing]\nloop_tick_ms = \"fast\"\n").unwrap();

        let err = CartConfig::load(Some(path.clone())).unwrap_err();
        assert!(err.is_config_error());

        let fallback = CartConfig::load_or_default(Some(path));
        assert_eq!(fallback.timing.loop_tick_ms, 50);
    }

    #[test]
    fn test_derived_settings() {
        let config = CartConfig::default();
        let policy = config.to_policy();
        assert_eq!(policy.scan_timeout, Duration::from_secs(5));
        assert_eq!(policy.weight_match_ratio, 0.10);

        assert_eq!(config.sampler_config().interval, Duration::from_millis(50));
        assert_eq!(config.stabilizer_config().wait_time, Duration::from_secs(1));
        assert_eq!(config.loop_config().summary_interval, Duration::from_secs(10));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_toml_serialization() {
        let config = CartConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[cart]"));
        assert!(toml_str.contains("[timing]"));
    }
}

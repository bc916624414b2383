//! # Engine Error Types
//!
//! Error types for the cart runtime.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Engine Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │    Hardware     │  │       Session           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  SensorInit     │  │  NotRunning             │ │
//! │  │  ConfigLoad     │  │  MissingSensor  │  │  InvalidCommand         │ │
//! │  │  ConfigSave     │  │  MissingBarcode │  │  Unsupported            │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ABSORBED (logged, never returned from the engine):                    │
//! │  ┌─────────────────┐  ┌─────────────────────────┐                      │
//! │  │  SensorError    │  │  CollaboratorError      │                      │
//! │  │  read / tare    │  │  remote API failures    │                      │
//! │  └─────────────────┘  └─────────────────────────┘                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use cart_core::CoreError;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error type.
///
/// Only failures that the caller of a lifecycle operation must see end up
/// here. Sensor and collaborator failures during a session are logged and
/// retried or dropped instead.
#[derive(Debug, Error)]
pub enum EngineError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid cart configuration.
    #[error("Invalid cart configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Hardware Errors
    // =========================================================================
    /// The scale could not be tared or started.
    #[error("Scale initialization failed: {0}")]
    SensorInit(#[source] SensorError),

    /// No weight sensor was supplied.
    #[error("No weight sensor configured")]
    MissingSensor,

    /// No barcode source was supplied.
    #[error("No barcode source configured")]
    MissingBarcodeSource,

    // =========================================================================
    // Session Errors
    // =========================================================================
    /// Operation needs a running session.
    #[error("Cart session is not running")]
    NotRunning,

    /// Control command could not be decoded.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// The lifecycle implementation does not support this operation.
    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    // =========================================================================
    // Domain Errors
    // =========================================================================
    /// Error from the pure core.
    #[error(transparent)]
    Core(#[from] CoreError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Absorbed Errors
// =============================================================================

/// Failure of a load-cell operation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SensorError {
    /// The read itself failed (bus error, timeout).
    #[error("Sensor read failed: {0}")]
    ReadFailed(String),

    /// The sensor returned NaN or infinity.
    #[error("Sensor returned a non-finite reading: {0}")]
    NotFinite(f64),

    /// Zeroing the scale failed.
    #[error("Tare failed: {0}")]
    TareFailed(String),

    /// The sensor is not connected.
    #[error("Sensor disconnected")]
    Disconnected,
}

/// Failure of a remote collaborator call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollaboratorError {
    /// The service could not be reached.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The service answered with an error.
    #[error("{operation} rejected: {reason}")]
    Rejected { operation: String, reason: String },

    /// The product is unknown to the catalog.
    #[error("Item not found: {0}")]
    NotFound(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for EngineError {
    fn from(err: toml::ser::Error) -> Self {
        EngineError::ConfigSaveFailed(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::InvalidCommand(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl EngineError {
    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidConfig(_)
                | EngineError::ConfigLoadFailed(_)
                | EngineError::ConfigSaveFailed(_)
                | EngineError::Core(CoreError::InvalidPolicy { .. })
        )
    }

    /// Returns true if the cart cannot operate until someone intervenes.
    ///
    /// ## Fatal Errors
    /// - Scale cannot be tared or is missing
    /// - Barcode source is missing
    /// - Configuration is invalid
    pub fn is_fatal(&self) -> bool {
        self.is_config_error()
            || matches!(
                self,
                EngineError::SensorInit(_)
                    | EngineError::MissingSensor
                    | EngineError::MissingBarcodeSource
            )
    }
}

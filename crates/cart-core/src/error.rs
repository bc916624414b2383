//! # Error Types
//!
//! Domain-specific error types for cart-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  cart-core errors (this file)                                          │
//! │  └── CoreError        - Invalid barcodes, weights, policies            │
//! │                                                                         │
//! │  cart-engine errors (separate crate)                                   │
//! │  ├── EngineError      - Config, hardware init, session lifecycle       │
//! │  ├── SensorError      - Load-cell read/tare failures (absorbed)        │
//! │  └── CollaboratorError - Remote API failures (absorbed)                │
//! │                                                                         │
//! │  Flow: CoreError → EngineError → caller of start()/load()              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Most things that go wrong at runtime are NOT errors here: an unknown
//! removal or a mismatching scan is an ordinary outcome of the state machine
//! and is reported through actions, never through `Err`.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error, PartialEq)]
pub enum CoreError {
    /// A barcode string was empty or contained non-digit characters.
    ///
    /// ## When This Occurs
    /// - Decoder handed over a partial read
    /// - Control channel sent a malformed code
    #[error("Invalid barcode '{value}': {reason}")]
    InvalidBarcode { value: String, reason: String },

    /// A weight was NaN or infinite.
    #[error("Invalid weight for {field}: {value}")]
    InvalidWeight { field: String, value: f64 },

    /// A policy parameter is outside its allowed range.
    #[error("Invalid policy: {field} {reason}")]
    InvalidPolicy { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

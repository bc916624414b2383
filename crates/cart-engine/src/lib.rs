//! # cart-engine: Runtime for the Cart Controller
//!
//! Runs the cart-core state machine against a load cell, a barcode scanner
//! and the store's remote services.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Cart System Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 CartSystem (session lifecycle)                   │  │
//! │  │   start / shutdown / payment / reset, driven by ControlCommand   │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │ spawns                                  │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ WeightSampler  │  │ ReconcileLoop  │  │  Outbox                │    │
//! │  │                │  │                │  │                        │    │
//! │  │ blocking pool  │─►│ stabilizer,    │─►│ cart API and fraud     │    │
//! │  │ median of last │  │ barcodes,      │  │ calls, in order,       │    │
//! │  │ 10 readings    │  │ Reconciler     │  │ failures logged        │    │
//! │  └────────────────┘  └───────┬────────┘  └────────────────────────┘    │
//! │                              │                                          │
//! │                              ▼                                          │
//! │                     FeedbackSink (LED / audio)                          │
//! │                     CartStatus (RwLock snapshot)                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`system`] - `CartSystem`, its builder and the lifecycle trait
//! - [`engine`] - The main loop and status snapshot
//! - [`sampler`] - Background load-cell sampling
//! - [`stabilizer`] - Settle detection and significance filter
//! - [`sensor`] - Load-cell trait and simulated scale
//! - [`barcode`] - Barcode source trait and channel source
//! - [`collaborators`] - Remote API, fraud and feedback traits
//! - [`outbox`] - Ordered delivery of remote calls
//! - [`protocol`] - Control-channel commands
//! - [`config`] - Cart configuration (TOML + env)
//! - [`error`] - Engine error types
//! - `testing` - Recording collaborator double (`test-support` feature)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cart_engine::{CartConfig, CartLifecycle, CartSystem, ChannelBarcodeSource, SimulatedScale};
//!
//! let config = CartConfig::load_or_default(None);
//! let (scanner, barcodes) = ChannelBarcodeSource::channel(16);
//!
//! let mut cart = CartSystem::builder(config)
//!     .with_sensor(SimulatedScale::new())
//!     .with_barcode_source(barcodes)
//!     .build()?;
//!
//! cart.start().await?;
//! scanner.scan("4006381333931")?;
//! println!("{:?}", cart.status().await.state);
//! cart.shutdown().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod barcode;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
pub mod outbox;
pub mod protocol;
pub mod sampler;
pub mod sensor;
pub mod stabilizer;
pub mod system;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use barcode::{BarcodeSender, BarcodeSource, ChannelBarcodeSource};
pub use collaborators::{
    CartApi, Collaborators, FeedbackSink, FraudReporter, LoggingCartApi, LoggingFeedback,
    LoggingFraudReporter, ProductInfo, WarningId,
};
pub use config::CartConfig;
pub use engine::{CartStatus, LoopCommand, LoopConfig};
pub use error::{CollaboratorError, EngineError, EngineResult, SensorError};
pub use outbox::RemoteCall;
pub use protocol::ControlCommand;
pub use sampler::{SamplerConfig, WeightReader, WeightSource};
pub use sensor::{SimulatedScale, WeightSensor};
pub use stabilizer::{StabilizerConfig, WeightStabilizer};
pub use system::{apply_command, CartLifecycle, CartSystem, CartSystemBuilder};

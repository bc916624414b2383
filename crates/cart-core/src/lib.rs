//! # cart-core: Pure Reconciliation Logic for the Cart Controller
//!
//! This crate decides what a weight change or a barcode scan means for the
//! cart. It contains no I/O: sensors, threads, clocks and network calls all
//! live in cart-engine.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Cart Controller Architecture                        │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  cart-agent (bench console)                     │   │
//! │  │     stdin weights ──► barcodes ──► JSON control commands        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  cart-engine (runtime)                          │   │
//! │  │   sampler thread, stabilizer, main loop, outbox, lifecycle      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ events in, actions out                 │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ cart-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ inventory │  │ stability │  │ reconcile │  │   │
//! │  │   │   Code    │  │   items   │  │  median   │  │   state   │  │   │
//! │  │   │   State   │  │  matching │  │  settle   │  │  machine  │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO THREADS • NO SLEEPS • DETERMINISTIC              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Barcodes, reconciliation states, warning and feedback kinds
//! - [`inventory`] - The cart's item bookkeeping and weight matching
//! - [`stability`] - Median smoothing, settle detection, significance filter
//! - [`reconcile`] - The state machine that turns events into actions
//! - [`summary`] - Cart snapshots for logs and status queries
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use std::time::Instant;
//! use cart_core::{Action, Code, ReconcilePolicy, Reconciler, WeightObservation};
//!
//! let mut reconciler = Reconciler::new(ReconcilePolicy::default());
//! reconciler.start_session();
//!
//! let now = Instant::now();
//! reconciler.on_barcode(Code::parse("111").unwrap(), now);
//! let actions = reconciler.on_weight(WeightObservation::new(500.0, 500.0), now);
//!
//! assert!(actions.contains(&Action::AddItem {
//!     code: Code::parse("111").unwrap(),
//!     weight: 500.0,
//! }));
//! assert_eq!(reconciler.inventory().total_expected_weight(), 500.0);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod inventory;
pub mod reconcile;
pub mod stability;
pub mod summary;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult};
pub use inventory::{CartInventory, InventoryItem};
pub use reconcile::{Action, ReconcilePolicy, Reconciler, RemovalCandidates, WeightObservation};
pub use stability::{SampleWindow, SettleWindow, WeightBaseline};
pub use summary::{CartSummary, SummaryLine};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Lower bound on the significance threshold (grams).
///
/// Below this the load cell's own noise would register as items.
pub const MIN_WEIGHT_THRESHOLD_G: f64 = 1.0;

//! # Collaborators
//!
//! Interfaces to everything outside the cart: the cart/catalog API, the fraud
//! warning channel and the LED/audio actuators.
//!
//! ## Trait Seams
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   Outbox task (ordered, blocking pool)        Main loop (inline)        │
//! │   ┌───────────────┐  ┌──────────────────┐     ┌─────────────────┐       │
//! │   │   CartApi     │  │  FraudReporter   │     │  FeedbackSink   │       │
//! │   │ bind_session  │  │  report_warning  │     │  signal(event)  │       │
//! │   │ lookup_item   │  │  cancel_warning  │     └─────────────────┘       │
//! │   │ add_item      │  └──────────────────┘                               │
//! │   │ remove_item   │                                                      │
//! │   └───────────────┘                                                      │
//! │                                                                         │
//! │   Failures are logged by the caller; local state is never rolled back.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use cart_core::{Code, FeedbackEvent, WarningKind};

use crate::error::CollaboratorError;

// =============================================================================
// Data Types
// =============================================================================

/// Product details returned by a lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub code: Code,
    pub name: Option<String>,
    pub price_cents: Option<i64>,
}

/// Identifier of a raised fraud warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WarningId(pub String);

impl std::fmt::Display for WarningId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Traits
// =============================================================================

/// Remote cart and catalog API. Calls may block.
pub trait CartApi: Send + Sync {
    /// Attaches this cart to the active customer session.
    fn bind_session(&self, cart_id: &str) -> Result<(), CollaboratorError>;

    fn lookup_item(&self, code: &Code) -> Result<ProductInfo, CollaboratorError>;

    fn add_item(&self, code: &Code, weight_g: f64) -> Result<(), CollaboratorError>;

    fn remove_item(&self, code: &Code) -> Result<(), CollaboratorError>;
}

/// Fraud / notification channel. At most one warning is open at a time.
pub trait FraudReporter: Send + Sync {
    fn report_warning(&self, kind: WarningKind) -> Result<WarningId, CollaboratorError>;

    /// Withdraws the open warning.
    fn cancel_warning(&self) -> Result<(), CollaboratorError>;
}

/// LED / audio actuators. Fire-and-forget, must not block.
pub trait FeedbackSink: Send + Sync {
    fn signal(&self, event: FeedbackEvent);
}

/// The full set of collaborators injected into a cart system.
#[derive(Clone)]
pub struct Collaborators {
    pub cart_api: Arc<dyn CartApi>,
    pub fraud: Arc<dyn FraudReporter>,
    pub feedback: Arc<dyn FeedbackSink>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Collaborators {
            cart_api: Arc::new(LoggingCartApi),
            fraud: Arc::new(LoggingFraudReporter),
            feedback: Arc::new(LoggingFeedback),
        }
    }
}

// =============================================================================
// Logging Implementations
// =============================================================================

/// Cart API that only logs. Used when no backend is configured.
pub struct LoggingCartApi;

impl CartApi for LoggingCartApi {
    fn bind_session(&self, cart_id: &str) -> Result<(), CollaboratorError> {
        info!(cart_id, "bind_session");
        Ok(())
    }

    fn lookup_item(&self, code: &Code) -> Result<ProductInfo, CollaboratorError> {
        info!(code = %code, "lookup_item");
        Ok(ProductInfo {
            code: code.clone(),
            name: None,
            price_cents: None,
        })
    }

    fn add_item(&self, code: &Code, weight_g: f64) -> Result<(), CollaboratorError> {
        info!(code = %code, weight_g, "add_item");
        Ok(())
    }

    fn remove_item(&self, code: &Code) -> Result<(), CollaboratorError> {
        info!(code = %code, "remove_item");
        Ok(())
    }
}

/// Fraud reporter that only logs and hands out local ids.
pub struct LoggingFraudReporter;

impl FraudReporter for LoggingFraudReporter {
    fn report_warning(&self, kind: WarningKind) -> Result<WarningId, CollaboratorError> {
        let id = WarningId(Uuid::new_v4().to_string());
        info!(kind = %kind, warning_id = %id, "report_warning");
        Ok(id)
    }

    fn cancel_warning(&self) -> Result<(), CollaboratorError> {
        info!("cancel_warning");
        Ok(())
    }
}

/// Feedback sink that logs each event.
pub struct LoggingFeedback;

impl FeedbackSink for LoggingFeedback {
    fn signal(&self, event: FeedbackEvent) {
        info!(event = %event, "feedback");
    }
}

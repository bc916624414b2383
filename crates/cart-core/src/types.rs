//! # Domain Types
//!
//! Core domain types used throughout the cart controller.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────────┐   ┌─────────────────┐   │
//! │  │      Code       │   │    SystemState      │   │  WarningKind    │   │
//! │  │  ─────────────  │   │  ─────────────────  │   │  ─────────────  │   │
//! │  │  digits only    │   │  Idle               │   │  WeightIncreased│   │
//! │  │  "5449000000996"│   │  Normal             │   │  WeightDecreased│   │
//! │  │  leading zeros  │   │  UnscannedAdded...  │   └─────────────────┘   │
//! │  │  preserved      │   │  WaitingForRemoval..│                         │
//! │  └─────────────────┘   │  PaymentProcessing  │   ┌─────────────────┐   │
//! │                        └─────────────────────┘   │ FeedbackEvent   │   │
//! │                                                  │  item_added ... │   │
//! │                                                  └─────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Barcode
// =============================================================================

/// A decoded product barcode (numeric SKU).
///
/// Kept as the digit string rather than an integer so EAN/UPC codes with
/// leading zeros survive unchanged.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Code(String);

impl Code {
    /// Parses a barcode, accepting surrounding whitespace.
    pub fn parse(value: &str) -> CoreResult<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidBarcode {
                value: value.to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if !trimmed.chars().all(|c| c.is_ascii_digit()) {
            return Err(CoreError::InvalidBarcode {
                value: value.to_string(),
                reason: "must contain only digits".to_string(),
            });
        }
        Ok(Code(trimmed.to_string()))
    }

    /// Returns the digit string.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Code {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Code::parse(s)
    }
}

// =============================================================================
// System State
// =============================================================================

/// The reconciliation state of a cart session.
///
/// ## State Diagram
/// ```text
///              session starts
///   ┌──────┐ ─────────────────► ┌────────┐  weight up, no scan  ┌──────────────────────┐
///   │ Idle │                    │ Normal │ ───────────────────► │ UnscannedAddedItems  │
///   └──────┘ ◄───────────────── └────────┘ ◄─────────────────── └──────────────────────┘
///      ▲        session ends        │  ▲      scan / return / timeout
///      │                            │  │
///      │           ambiguous drop   │  │  scan match / put back / cancel
///      │                            ▼  │
///      │                  ┌─────────────────────────┐
///      │                  │  WaitingForRemovalScan  │
///      │                  └─────────────────────────┘
///      │
///      │   session ends   ┌─────────────────────────┐
///      └───────────────── │   PaymentProcessing     │ ◄── payment begins (any active state)
///                         └─────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemState {
    /// No session is active.
    #[default]
    Idle,
    /// Scans and weight changes are being paired normally.
    Normal,
    /// Weight went up with no scan to attribute it to.
    UnscannedAddedItems,
    /// Weight went down and matched several items; waiting for a scan.
    WaitingForRemovalScan,
    /// Checkout in progress; item operations disabled, fraud watch only.
    PaymentProcessing,
}

impl SystemState {
    /// Returns true while a session is running.
    pub fn is_active(&self) -> bool {
        !matches!(self, SystemState::Idle)
    }
}

impl std::fmt::Display for SystemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SystemState::Idle => write!(f, "idle"),
            SystemState::Normal => write!(f, "normal"),
            SystemState::UnscannedAddedItems => write!(f, "unscanned_added_items"),
            SystemState::WaitingForRemovalScan => write!(f, "waiting_for_removal_scan"),
            SystemState::PaymentProcessing => write!(f, "payment_processing"),
        }
    }
}

// =============================================================================
// Fraud Warning Kind
// =============================================================================

/// The kind of unresolved weight/scan mismatch reported to the fraud channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Weight went up without an attributable scan.
    WeightIncreased,
    /// Weight went down and could not be attributed to one item.
    WeightDecreased,
}

impl WarningKind {
    /// Wire label understood by the fraud-warning endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningKind::WeightIncreased => "weight increased",
            WarningKind::WeightDecreased => "weight decreased",
        }
    }
}

impl std::fmt::Display for WarningKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Feedback Event
// =============================================================================

/// Semantic events for the LED / audio actuators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackEvent {
    /// A new barcode was read.
    ItemScanned,
    /// An item was added to the inventory.
    ItemAdded,
    /// An item was removed from the inventory.
    ItemRemoved,
    /// A fraud warning is open; the shopper must act.
    Warning,
    /// Something failed or timed out.
    Error,
    /// The scanned barcode is not one of the removal candidates.
    Mismatch,
    /// Show the pairing QR prompt.
    Pairing,
    /// Payment has been created; waiting for it to complete.
    PaymentPending,
    /// Session over; actuators off.
    SessionEnded,
}

impl FeedbackEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackEvent::ItemScanned => "item_scanned",
            FeedbackEvent::ItemAdded => "item_added",
            FeedbackEvent::ItemRemoved => "item_removed",
            FeedbackEvent::Warning => "warning",
            FeedbackEvent::Error => "error",
            FeedbackEvent::Mismatch => "mismatch",
            FeedbackEvent::Pairing => "pairing",
            FeedbackEvent::PaymentPending => "payment_pending",
            FeedbackEvent::SessionEnded => "session_ended",
        }
    }
}

impl std::fmt::Display for FeedbackEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_parsing() {
        assert_eq!(Code::parse(" 0012345 ").unwrap().as_str(), "0012345");
        assert!(Code::parse("").is_err());
        assert!(Code::parse("12-34").is_err());
        assert_eq!("111".parse::<Code>().unwrap(), Code::parse("111").unwrap());
    }

    #[test]
    fn test_code_serializes_as_plain_string() {
        let code = Code::parse("222").unwrap();
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"222\"");
    }

    #[test]
    fn test_state_flags() {
        assert!(!SystemState::Idle.is_active());
        assert!(SystemState::PaymentProcessing.is_active());
        assert_eq!(SystemState::default(), SystemState::Idle);
    }

    #[test]
    fn test_wire_labels() {
        assert_eq!(WarningKind::WeightIncreased.to_string(), "weight increased");
        assert_eq!(WarningKind::WeightDecreased.to_string(), "weight decreased");
        assert_eq!(FeedbackEvent::Mismatch.to_string(), "mismatch");
        assert_eq!(
            SystemState::UnscannedAddedItems.to_string(),
            "unscanned_added_items"
        );
    }
}

//! # Cart Summary
//!
//! Point-in-time view of a session, emitted periodically by the timing
//! harness and returned from status queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Code, SystemState};

/// One product line in a summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryLine {
    pub code: Code,
    pub unit_weight: f64,
    pub quantity: u32,
}

/// Snapshot of the cart and the reconciliation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartSummary {
    /// Reconciliation state at the time of the snapshot.
    pub state: SystemState,

    /// Items in code order.
    pub lines: Vec<SummaryLine>,

    /// Number of distinct codes.
    pub unique_items: usize,

    /// Units across all codes.
    pub total_quantity: u64,

    /// Expected weight of everything in the cart (grams).
    pub total_expected_weight: f64,

    /// Scanned code still waiting for its weight.
    pub pending_barcode: Option<Code>,

    /// Codes that could explain an ambiguous removal.
    pub removal_candidates: Vec<Code>,

    /// Weight added without a scan (grams).
    pub unscanned_weight: f64,

    /// When the snapshot was taken.
    pub generated_at: DateTime<Utc>,
}

impl CartSummary {
    /// Shopper-facing prompt for states that need an action.
    pub fn prompt(&self) -> Option<String> {
        match self.state {
            SystemState::UnscannedAddedItems => Some(format!(
                "Please scan the barcode for the recently added item ({:.2}g)",
                self.unscanned_weight
            )),
            SystemState::WaitingForRemovalScan => {
                let codes: Vec<&str> = self.removal_candidates.iter().map(Code::as_str).collect();
                Some(format!(
                    "Please scan the barcode of the removed item. Possible items: [{}]",
                    codes.join(", ")
                ))
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for CartSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.lines.is_empty() {
            return write!(f, "Cart is empty");
        }

        writeln!(f, "----- Current Cart Contents -----")?;
        for line in &self.lines {
            writeln!(
                f,
                "Item: {}, Weight: {:.2}g, Quantity: {}",
                line.code, line.unit_weight, line.quantity
            )?;
        }
        writeln!(
            f,
            "Total unique items: {}, Total quantity: {}",
            self.unique_items, self.total_quantity
        )?;
        writeln!(f, "Total expected weight: {:.2}g", self.total_expected_weight)?;
        write!(f, "---------------------------------")
    }
}

//! # Cart Inventory
//!
//! The authoritative record of what is in the cart for the current session.
//!
//! ## Bookkeeping
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      CartInventory                                      │
//! │                                                                         │
//! │   items (BTreeMap, ordered by code)          total_expected_weight      │
//! │   ───────────────────────────────           ─────────────────────       │
//! │   "111" → { unit_weight: 500.0, qty: 2 }    Σ unit_weight × qty         │
//! │   "222" → { unit_weight: 510.0, qty: 1 }    = 1510.0 g                  │
//! │                                              (maintained on every       │
//! │   last_scanned_barcode: Some("333")           add/remove, never         │
//! │   pending_weight_change: true                 recomputed per query)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Invariants
//! - An entry with quantity 0 never exists; it is removed instead.
//! - `total_expected_weight` equals the sum of `unit_weight × quantity`.
//! - The unit weight of an entry is the weight observed on its first add.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::Code;

/// Default relative tolerance when matching a weight drop to an item (10%).
pub const DEFAULT_WEIGHT_MATCH_RATIO: f64 = 0.10;

// =============================================================================
// Inventory Item
// =============================================================================

/// One product line in the cart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    /// Weight of a single unit in grams, as first observed.
    pub unit_weight: f64,

    /// Number of units in the cart (always ≥ 1).
    pub quantity: u32,
}

impl InventoryItem {
    /// Weight this line contributes to the cart.
    #[inline]
    pub fn line_weight(&self) -> f64 {
        self.unit_weight * f64::from(self.quantity)
    }

    /// Checks whether a weight drop of `abs_diff` grams could be one unit.
    fn matches_drop(&self, abs_diff: f64, ratio: f64) -> bool {
        (abs_diff - self.unit_weight).abs() <= self.unit_weight * ratio
    }
}

// =============================================================================
// Cart Inventory
// =============================================================================

/// Inventory of a single cart session.
#[derive(Debug, Clone)]
pub struct CartInventory {
    items: BTreeMap<Code, InventoryItem>,
    total_expected_weight: f64,
    last_scanned_barcode: Option<Code>,
    pending_weight_change: bool,
    weight_match_ratio: f64,
}

impl Default for CartInventory {
    fn default() -> Self {
        CartInventory::new(DEFAULT_WEIGHT_MATCH_RATIO)
    }
}

impl CartInventory {
    /// Creates an empty inventory with the given match tolerance ratio.
    pub fn new(weight_match_ratio: f64) -> Self {
        CartInventory {
            items: BTreeMap::new(),
            total_expected_weight: 0.0,
            last_scanned_barcode: None,
            pending_weight_change: false,
            weight_match_ratio,
        }
    }

    /// Adds one unit of `code` observed at `weight` grams.
    ///
    /// ## Behavior
    /// - New code: inserted with quantity 1 and `weight` as its unit weight
    /// - Known code: quantity + 1, unit weight kept as first observed
    ///
    /// The expected total always grows by the stored unit weight so the
    /// running total stays equal to Σ unit_weight × quantity. A re-add whose
    /// observed weight is outside the match tolerance is logged.
    ///
    /// Clears the pending scan. Returns the new quantity.
    pub fn add_item(&mut self, code: Code, weight: f64) -> u32 {
        let weight = weight.max(0.0);
        let ratio = self.weight_match_ratio;

        let (unit_weight, quantity) = match self.items.get_mut(&code) {
            Some(item) => {
                if !item.matches_drop(weight, ratio) {
                    warn!(
                        code = %code,
                        unit_weight_g = item.unit_weight,
                        observed_g = weight,
                        "Re-added item weighs differently than first observed"
                    );
                }
                item.quantity += 1;
                debug!(code = %code, quantity = item.quantity, "Increased item quantity");
                (item.unit_weight, item.quantity)
            }
            None => {
                debug!(code = %code, unit_weight_g = weight, "Added new item");
                self.items.insert(
                    code,
                    InventoryItem {
                        unit_weight: weight,
                        quantity: 1,
                    },
                );
                (weight, 1)
            }
        };

        self.total_expected_weight += unit_weight;
        self.clear_pending();
        quantity
    }

    /// Removes one unit of `code`.
    ///
    /// Returns `false` if the code is not in the cart.
    pub fn remove_item(&mut self, code: &Code) -> bool {
        let Some(item) = self.items.get_mut(code) else {
            return false;
        };

        self.total_expected_weight -= item.unit_weight;

        if item.quantity > 1 {
            item.quantity -= 1;
            debug!(code = %code, quantity = item.quantity, "Decreased item quantity");
        } else {
            self.items.remove(code);
            debug!(code = %code, "Removed item from cart");
        }

        if self.items.is_empty() {
            // Drop accumulated float error once nothing is left to weigh.
            self.total_expected_weight = 0.0;
        }
        true
    }

    /// Finds every item one unit of which could explain a drop of `weight_diff`.
    ///
    /// The sign of `weight_diff` is ignored. Results are ordered by code.
    pub fn find_removed_item(&self, weight_diff: f64) -> Vec<(Code, InventoryItem)> {
        let abs_diff = weight_diff.abs();
        self.items
            .iter()
            .filter(|(_, item)| item.matches_drop(abs_diff, self.weight_match_ratio))
            .map(|(code, item)| (code.clone(), *item))
            .collect()
    }

    /// Marks `code` as scanned and waiting for its weight.
    pub fn set_pending_barcode(&mut self, code: Code) {
        self.last_scanned_barcode = Some(code);
        self.pending_weight_change = true;
    }

    /// Forgets the pending scan without attributing any weight to it.
    pub fn clear_pending(&mut self) {
        self.last_scanned_barcode = None;
        self.pending_weight_change = false;
    }

    /// Empties the cart and clears the pending scan.
    pub fn clear_cart(&mut self) {
        self.items.clear();
        self.total_expected_weight = 0.0;
        self.clear_pending();
        debug!("Cart cleared");
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Running expected weight of everything in the cart.
    #[inline]
    pub fn total_expected_weight(&self) -> f64 {
        self.total_expected_weight
    }

    /// The scanned code waiting for weight, if any.
    pub fn pending_barcode(&self) -> Option<&Code> {
        if self.pending_weight_change {
            self.last_scanned_barcode.as_ref()
        } else {
            None
        }
    }

    /// Last barcode accepted as a new scan (cleared once weight is attributed).
    pub fn last_scanned_barcode(&self) -> Option<&Code> {
        self.last_scanned_barcode.as_ref()
    }

    #[inline]
    pub fn has_pending_weight_change(&self) -> bool {
        self.pending_weight_change
    }

    pub fn get(&self, code: &Code) -> Option<&InventoryItem> {
        self.items.get(code)
    }

    /// Iterates items in code order.
    pub fn items(&self) -> impl Iterator<Item = (&Code, &InventoryItem)> {
        self.items.iter()
    }

    /// Number of distinct codes.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total units across all codes.
    pub fn total_quantity(&self) -> u64 {
        self.items.values().map(|i| u64::from(i.quantity)).sum()
    }

    /// Recomputes Σ unit_weight × quantity from scratch (for audits and tests).
    pub fn recomputed_weight(&self) -> f64 {
        self.items.values().map(InventoryItem::line_weight).sum()
    }

    pub fn weight_match_ratio(&self) -> f64 {
        self.weight_match_ratio
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn code(s: &str) -> Code {
        Code::parse(s).unwrap()
    }

    #[test]
    fn test_add_new_and_existing_item() {
        let mut cart = CartInventory::default();
        assert_eq!(cart.add_item(code("111"), 500.0), 1);
        assert_eq!(cart.add_item(code("111"), 505.0), 2);

        let item = cart.get(&code("111")).unwrap();
        assert_eq!(item.quantity, 2);
        assert_eq!(item.unit_weight, 500.0);
        assert_eq!(cart.total_expected_weight(), 1000.0);
    }

    #[test]
    fn test_add_clears_pending_scan() {
        let mut cart = CartInventory::default();
        cart.set_pending_barcode(code("111"));
        assert_eq!(cart.pending_barcode(), Some(&code("111")));

        cart.add_item(code("111"), 250.0);
        assert!(cart.pending_barcode().is_none());
        assert!(!cart.has_pending_weight_change());
    }

    #[test]
    fn test_remove_decrements_then_deletes() {
        let mut cart = CartInventory::default();
        cart.add_item(code("111"), 500.0);
        cart.add_item(code("111"), 500.0);

        assert!(cart.remove_item(&code("111")));
        assert_eq!(cart.get(&code("111")).unwrap().quantity, 1);
        assert_eq!(cart.total_expected_weight(), 500.0);

        assert!(cart.remove_item(&code("111")));
        assert!(cart.get(&code("111")).is_none());
        assert_eq!(cart.total_expected_weight(), 0.0);

        assert!(!cart.remove_item(&code("111")));
    }

    #[test]
    fn test_find_removed_item_tolerance() {
        let mut cart = CartInventory::default();
        cart.add_item(code("111"), 500.0);
        cart.add_item(code("222"), 510.0);
        cart.add_item(code("333"), 120.0);

        let both = cart.find_removed_item(-505.0);
        let codes: Vec<_> = both.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(codes, vec!["111", "222"]);

        let one = cart.find_removed_item(-125.0);
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].0, code("333"));

        assert!(cart.find_removed_item(-300.0).is_empty());
    }

    #[test]
    fn test_match_boundary_is_inclusive() {
        let mut cart = CartInventory::default();
        cart.add_item(code("111"), 100.0);
        assert_eq!(cart.find_removed_item(110.0).len(), 1);
        assert_eq!(cart.find_removed_item(90.0).len(), 1);
        assert!(cart.find_removed_item(110.5).is_empty());
    }

    #[test]
    fn test_clear_cart_is_idempotent() {
        let mut cart = CartInventory::default();
        cart.add_item(code("111"), 500.0);
        cart.set_pending_barcode(code("222"));

        cart.clear_cart();
        assert!(cart.is_empty());
        assert_eq!(cart.total_expected_weight(), 0.0);
        assert!(cart.pending_barcode().is_none());

        cart.clear_cart();
        assert!(cart.is_empty());
        assert_eq!(cart.total_expected_weight(), 0.0);
    }

    #[test]
    fn test_negative_weight_is_clamped() {
        let mut cart = CartInventory::default();
        cart.add_item(code("111"), -4.0);
        assert_eq!(cart.get(&code("111")).unwrap().unit_weight, 0.0);
        assert_eq!(cart.total_expected_weight(), 0.0);
    }
}

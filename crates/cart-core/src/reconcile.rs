//! # Reconciliation State Machine
//!
//! Pairs weight changes with barcode scans and decides what the runtime
//! should do about each event.
//!
//! ## Decide Here, Execute Elsewhere
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   barcode ──────┐                                                       │
//! │   weight delta ─┼──► Reconciler ──► Vec<Action> (in decision order)     │
//! │   tick / cmd ───┘        │                 │                            │
//! │                          │                 ├─► remote: lookup, add,     │
//! │                  mutates │                 │   remove, report, cancel   │
//! │                          ▼                 ├─► feedback: LED / audio    │
//! │                   CartInventory            └─► scale: tare, rebaseline  │
//! │                                                                         │
//! │   The reconciler never sleeps, locks or talks to hardware. The engine   │
//! │   executes the returned actions in order, which is what keeps a fraud   │
//! │   warning and its cancellation from ever being reordered.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Transition Table
//! ```text
//! NORMAL           new scan            → lookup, mark pending          NORMAL
//! NORMAL           +Δ with pending     → add item                      NORMAL
//! NORMAL           +Δ no pending       → warn "weight increased"       UNSCANNED
//! NORMAL           −Δ, 1 match         → remove item                   NORMAL
//! NORMAL           −Δ, 0 matches       → log unknown removal           NORMAL
//! NORMAL           −Δ, >1 matches      → warn "weight decreased"       WAITING_REMOVAL
//! UNSCANNED        scan                → add accumulated weight        NORMAL
//! UNSCANNED        +Δ                  → accumulate                    UNSCANNED
//! UNSCANNED        weight back         → cancel warning                NORMAL
//! UNSCANNED        scan timeout        → error feedback, warning kept  NORMAL
//! WAITING_REMOVAL  candidate scan      → remove item                   NORMAL
//! WAITING_REMOVAL  other scan          → mismatch feedback             WAITING_REMOVAL
//! WAITING_REMOVAL  weight back         → cancel warning                NORMAL
//! WAITING_REMOVAL  user cancel         → cancel warning                NORMAL
//! any active       payment             → item operations off           PAYMENT
//! any              session end         → clear                         IDLE
//! any active       reset               → cancel warning, tare, clear   NORMAL
//! IDLE             session start       → tare, clear                   NORMAL
//! ```

use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CoreError, CoreResult};
use crate::inventory::{CartInventory, InventoryItem, DEFAULT_WEIGHT_MATCH_RATIO};
use crate::stability::return_tolerance;
use crate::summary::{CartSummary, SummaryLine};
use crate::types::{Code, FeedbackEvent, SystemState, WarningKind};

// =============================================================================
// Policy
// =============================================================================

/// Tolerances and timeouts used by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReconcilePolicy {
    /// Relative tolerance when matching a weight drop to an item.
    pub weight_match_ratio: f64,

    /// Minimum slack (grams) for "the weight went back".
    pub return_tolerance_g: f64,

    /// Proportional slack for "the weight went back" (of the original delta).
    pub return_tolerance_ratio: f64,

    /// How long a scan may wait for its weight (and an unscanned addition
    /// for its scan).
    pub scan_timeout: Duration,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        ReconcilePolicy {
            weight_match_ratio: DEFAULT_WEIGHT_MATCH_RATIO,
            return_tolerance_g: 10.0,
            return_tolerance_ratio: 0.05,
            scan_timeout: Duration::from_secs(5),
        }
    }
}

impl ReconcilePolicy {
    pub fn validate(&self) -> CoreResult<()> {
        if !(self.weight_match_ratio > 0.0 && self.weight_match_ratio < 1.0) {
            return Err(CoreError::InvalidPolicy {
                field: "weight_match_ratio".into(),
                reason: "must be between 0 and 1".into(),
            });
        }
        if !(self.return_tolerance_g.is_finite() && self.return_tolerance_g >= 0.0) {
            return Err(CoreError::InvalidPolicy {
                field: "return_tolerance_g".into(),
                reason: "must be a non-negative number".into(),
            });
        }
        if !(self.return_tolerance_ratio >= 0.0 && self.return_tolerance_ratio < 1.0) {
            return Err(CoreError::InvalidPolicy {
                field: "return_tolerance_ratio".into(),
                reason: "must be between 0 and 1".into(),
            });
        }
        if self.scan_timeout.is_zero() {
            return Err(CoreError::InvalidPolicy {
                field: "scan_timeout".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Actions
// =============================================================================

/// Something the runtime must do as a result of a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Action {
    /// Ask the cart API for product details.
    LookupItem(Code),
    /// Tell the cart API an item was added with this observed weight.
    AddItem { code: Code, weight: f64 },
    /// Tell the cart API an item was removed.
    RemoveItem(Code),
    /// Raise a fraud warning.
    ReportWarning(WarningKind),
    /// Withdraw the open fraud warning.
    CancelWarning,
    /// Drive the LED / audio actuators.
    Feedback(FeedbackEvent),
    /// Re-zero the scale and the stabilizer baseline.
    TareScale,
    /// Move the stabilizer baseline to this weight (grams).
    Rebaseline(f64),
}

// =============================================================================
// Inputs
// =============================================================================

/// Result of one weight evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightObservation {
    /// Settled change since the last accepted baseline (0 when not significant).
    pub delta: f64,

    /// Smoothed weight right now.
    pub current: f64,
}

impl WeightObservation {
    pub fn new(delta: f64, current: f64) -> Self {
        WeightObservation { delta, current }
    }

    /// Like [`WeightObservation::new`], rejecting NaN and infinite values.
    pub fn checked(delta: f64, current: f64) -> CoreResult<Self> {
        if !delta.is_finite() {
            return Err(CoreError::InvalidWeight {
                field: "delta".into(),
                value: delta,
            });
        }
        if !current.is_finite() {
            return Err(CoreError::InvalidWeight {
                field: "current".into(),
                value: current,
            });
        }
        Ok(WeightObservation::new(delta, current))
    }
}

/// Items that could explain an ambiguous weight drop.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovalCandidates {
    candidates: Vec<(Code, InventoryItem)>,
    removal_weight_diff: f64,
    expected_weight_before_removal: f64,
}

impl RemovalCandidates {
    pub fn candidates(&self) -> &[(Code, InventoryItem)] {
        &self.candidates
    }

    pub fn codes(&self) -> Vec<Code> {
        self.candidates.iter().map(|(c, _)| c.clone()).collect()
    }

    pub fn contains(&self, code: &Code) -> bool {
        self.candidates.iter().any(|(c, _)| c == code)
    }

    /// Signed weight change that triggered the wait.
    pub fn removal_weight_diff(&self) -> f64 {
        self.removal_weight_diff
    }

    /// Weight on the scale just before the drop.
    pub fn expected_weight_before_removal(&self) -> f64 {
        self.expected_weight_before_removal
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// The reconciliation state machine for one cart.
///
/// Owned exclusively by the main loop; every mutation goes through a
/// transition method that returns the actions to execute.
#[derive(Debug, Clone)]
pub struct Reconciler {
    policy: ReconcilePolicy,
    state: SystemState,
    inventory: CartInventory,
    unscanned_weight: f64,
    removal: Option<RemovalCandidates>,
    /// When the pending barcode was scanned.
    pending_since: Option<Instant>,
    /// Start of the scan window for an unscanned addition.
    last_barcode_activity: Option<Instant>,
    /// Warning raised and not yet cancelled or escalated.
    open_warning: Option<WarningKind>,
}

impl Reconciler {
    /// Creates an idle reconciler.
    pub fn new(policy: ReconcilePolicy) -> Self {
        Reconciler {
            inventory: CartInventory::new(policy.weight_match_ratio),
            policy,
            state: SystemState::Idle,
            unscanned_weight: 0.0,
            removal: None,
            pending_since: None,
            last_barcode_activity: None,
            open_warning: None,
        }
    }

    // =========================================================================
    // Session Lifecycle
    // =========================================================================

    /// IDLE → NORMAL with everything zeroed.
    pub fn start_session(&mut self) -> Vec<Action> {
        if self.state.is_active() {
            warn!(state = %self.state, "Session start while active, resetting");
        }
        self.clear_all();
        self.state = SystemState::Normal;
        info!("Cart session started");
        vec![Action::TareScale]
    }

    /// Any state → IDLE, inventory cleared.
    pub fn end_session(&mut self) -> Vec<Action> {
        if self.state == SystemState::Idle {
            return Vec::new();
        }
        self.clear_all();
        self.state = SystemState::Idle;
        info!("Cart session ended");
        vec![Action::Feedback(FeedbackEvent::SessionEnded)]
    }

    /// Active state → PAYMENT_PROCESSING. Repeated calls are no-ops.
    pub fn begin_payment(&mut self) -> Vec<Action> {
        match self.state {
            SystemState::Idle => {
                debug!("Payment ignored, no active session");
                Vec::new()
            }
            SystemState::PaymentProcessing => Vec::new(),
            _ => {
                self.clear_transient();
                self.inventory.clear_pending();
                self.state = SystemState::PaymentProcessing;
                info!("Payment started, item operations disabled");
                vec![Action::Feedback(FeedbackEvent::PaymentPending)]
            }
        }
    }

    /// Manual reset: empty cart, re-tare, back to NORMAL.
    pub fn reset_cart(&mut self) -> Vec<Action> {
        if self.state == SystemState::Idle {
            debug!("Reset ignored, no active session");
            return Vec::new();
        }
        let mut actions = Vec::new();
        self.cancel_warning(&mut actions);
        self.clear_all();
        self.state = SystemState::Normal;
        info!("Cart and weight tracking reset");
        actions.push(Action::TareScale);
        actions
    }

    /// Shopper gave up on disambiguating a removal.
    pub fn cancel_removal_wait(&mut self) -> Vec<Action> {
        if self.state != SystemState::WaitingForRemovalScan {
            debug!(state = %self.state, "No removal wait to cancel");
            return Vec::new();
        }
        info!("Removal scan cancelled by user");
        self.removal = None;
        self.state = SystemState::Normal;

        let mut actions = Vec::new();
        self.cancel_warning(&mut actions);
        actions
    }

    // =========================================================================
    // Barcode Events
    // =========================================================================

    /// Handles a decoded barcode.
    pub fn on_barcode(&mut self, code: Code, now: Instant) -> Vec<Action> {
        match self.state {
            SystemState::Idle => {
                debug!(code = %code, "Scan ignored, no active session");
                Vec::new()
            }
            SystemState::PaymentProcessing => {
                info!(code = %code, "Scan ignored, item operations disabled during payment");
                Vec::new()
            }
            SystemState::Normal => {
                if self.inventory.last_scanned_barcode() == Some(&code) {
                    return Vec::new();
                }
                info!(code = %code, "New barcode detected");
                self.inventory.set_pending_barcode(code.clone());
                self.pending_since = Some(now);
                vec![
                    Action::Feedback(FeedbackEvent::ItemScanned),
                    Action::LookupItem(code),
                ]
            }
            SystemState::UnscannedAddedItems => {
                let weight = self.unscanned_weight;
                info!(code = %code, weight_g = weight, "Barcode scanned after weight addition");
                self.inventory.add_item(code.clone(), weight);
                self.unscanned_weight = 0.0;
                self.last_barcode_activity = None;
                self.state = SystemState::Normal;

                let mut actions = vec![
                    Action::AddItem { code, weight },
                    Action::Feedback(FeedbackEvent::ItemAdded),
                ];
                self.cancel_warning(&mut actions);
                actions
            }
            SystemState::WaitingForRemovalScan => {
                let matched = self.removal.as_ref().is_some_and(|r| r.contains(&code));
                if !matched {
                    warn!(
                        code = %code,
                        candidates = ?self.removal.as_ref().map(RemovalCandidates::codes),
                        "Scanned barcode does not match any removal candidate"
                    );
                    return vec![Action::Feedback(FeedbackEvent::Mismatch)];
                }

                info!(code = %code, "Confirmed removal of item");
                self.inventory.remove_item(&code);
                self.removal = None;
                self.state = SystemState::Normal;

                let mut actions = vec![
                    Action::RemoveItem(code),
                    Action::Feedback(FeedbackEvent::ItemRemoved),
                ];
                self.cancel_warning(&mut actions);
                actions
            }
        }
    }

    // =========================================================================
    // Timing
    // =========================================================================

    /// Expires a scan that waited too long for its counterpart.
    ///
    /// Runs before weight evaluation in every cycle, so a scan that times out
    /// can never also receive weight in the same cycle.
    pub fn check_scan_timeout(&mut self, now: Instant) -> Vec<Action> {
        let timeout = self.policy.scan_timeout;
        match self.state {
            SystemState::Normal => {
                let expired = self.inventory.has_pending_weight_change()
                    && self
                        .pending_since
                        .is_some_and(|since| now.saturating_duration_since(since) >= timeout);
                if !expired {
                    return Vec::new();
                }
                warn!(
                    code = ?self.inventory.pending_barcode(),
                    "Scanned item was not placed in the cart in time"
                );
                self.inventory.clear_pending();
                self.pending_since = None;
                vec![Action::Feedback(FeedbackEvent::Error)]
            }
            SystemState::UnscannedAddedItems => {
                let expired = self
                    .last_barcode_activity
                    .is_some_and(|since| now.saturating_duration_since(since) >= timeout);
                if !expired {
                    return Vec::new();
                }
                warn!(
                    unscanned_g = self.unscanned_weight,
                    "No barcode scanned for added weight, leaving warning open"
                );
                self.inventory.clear_pending();
                self.pending_since = None;
                self.unscanned_weight = 0.0;
                self.last_barcode_activity = None;
                // The warning stays open remotely as an unresolved event and
                // keeps counting as the session's outstanding warning.
                self.state = SystemState::Normal;
                vec![Action::Feedback(FeedbackEvent::Error)]
            }
            _ => Vec::new(),
        }
    }

    /// Whether the engine should run the stabilization wait this cycle.
    ///
    /// While a removal is being disambiguated only the put-back check runs,
    /// which needs the current weight but no delta.
    pub fn needs_weight_delta(&self) -> bool {
        matches!(
            self.state,
            SystemState::Normal | SystemState::UnscannedAddedItems | SystemState::PaymentProcessing
        )
    }

    // =========================================================================
    // Weight Events
    // =========================================================================

    /// Handles one weight evaluation.
    pub fn on_weight(&mut self, observation: WeightObservation, now: Instant) -> Vec<Action> {
        let WeightObservation { delta, current } = observation;
        if delta != 0.0 {
            info!(delta_g = delta, current_g = current, state = %self.state, "Weight change detected");
        }

        match self.state {
            SystemState::Idle => Vec::new(),
            SystemState::WaitingForRemovalScan => self.check_item_returned(current),
            SystemState::PaymentProcessing => self.monitor_payment(delta),
            SystemState::Normal => {
                if delta > 0.0 {
                    self.handle_weight_increase(delta, now)
                } else if delta < 0.0 {
                    self.handle_weight_decrease(delta, current)
                } else {
                    Vec::new()
                }
            }
            SystemState::UnscannedAddedItems => {
                if delta > 0.0 {
                    self.unscanned_weight += delta;
                    warn!(
                        unscanned_g = self.unscanned_weight,
                        "More weight added without scanning"
                    );
                    vec![Action::Feedback(FeedbackEvent::Warning)]
                } else {
                    self.check_weight_normalized(current)
                }
            }
        }
    }

    fn handle_weight_increase(&mut self, delta: f64, now: Instant) -> Vec<Action> {
        if let Some(code) = self.inventory.pending_barcode().cloned() {
            self.inventory.add_item(code.clone(), delta);
            self.pending_since = None;
            return vec![
                Action::AddItem {
                    code,
                    weight: delta,
                },
                Action::Feedback(FeedbackEvent::ItemAdded),
            ];
        }

        warn!(weight_g = delta, "Item added without scanning barcode");
        self.state = SystemState::UnscannedAddedItems;
        self.unscanned_weight = delta;
        self.last_barcode_activity = Some(now);

        let mut actions = Vec::new();
        self.raise_warning(WarningKind::WeightIncreased, &mut actions);
        actions.push(Action::Feedback(FeedbackEvent::Warning));
        actions
    }

    fn handle_weight_decrease(&mut self, delta: f64, current: f64) -> Vec<Action> {
        let mut matches = self.inventory.find_removed_item(delta);

        match matches.len() {
            0 => {
                warn!(
                    delta_g = delta,
                    "Weight decrease matches no item in the cart, ignoring"
                );
                Vec::new()
            }
            1 => {
                let (code, item) = matches.remove(0);
                info!(code = %code, unit_weight_g = item.unit_weight, "Removed item");
                self.inventory.remove_item(&code);
                vec![
                    Action::RemoveItem(code),
                    Action::Feedback(FeedbackEvent::ItemRemoved),
                ]
            }
            count => {
                let expected_before = current - delta;
                let codes: Vec<&str> = matches.iter().map(|(c, _)| c.as_str()).collect();
                warn!(
                    matches = count,
                    delta_g = delta,
                    candidates = ?codes,
                    "Ambiguous removal, waiting for scan"
                );
                self.removal = Some(RemovalCandidates {
                    candidates: matches,
                    removal_weight_diff: delta,
                    expected_weight_before_removal: expected_before,
                });
                self.state = SystemState::WaitingForRemovalScan;

                let mut actions = Vec::new();
                self.raise_warning(WarningKind::WeightDecreased, &mut actions);
                actions.push(Action::Feedback(FeedbackEvent::Warning));
                actions
            }
        }
    }

    fn check_item_returned(&mut self, current: f64) -> Vec<Action> {
        let Some(removal) = &self.removal else {
            return Vec::new();
        };
        let tolerance = return_tolerance(
            self.policy.return_tolerance_g,
            self.policy.return_tolerance_ratio,
            removal.removal_weight_diff,
        );
        if (current - removal.expected_weight_before_removal).abs() >= tolerance {
            return Vec::new();
        }

        info!(current_g = current, "Weight returned to normal, item was put back");
        self.removal = None;
        self.state = SystemState::Normal;

        let mut actions = Vec::new();
        self.cancel_warning(&mut actions);
        actions.push(Action::Rebaseline(current));
        actions
    }

    fn check_weight_normalized(&mut self, current: f64) -> Vec<Action> {
        let expected = self.inventory.total_expected_weight();
        let tolerance = return_tolerance(
            self.policy.return_tolerance_g,
            self.policy.return_tolerance_ratio,
            self.unscanned_weight,
        );
        if (current - expected).abs() >= tolerance {
            return Vec::new();
        }

        info!(current_g = current, "Weight returned to normal, cancelling scan request");
        self.unscanned_weight = 0.0;
        self.last_barcode_activity = None;
        self.state = SystemState::Normal;

        let mut actions = Vec::new();
        self.cancel_warning(&mut actions);
        actions.push(Action::Rebaseline(current));
        actions
    }

    fn monitor_payment(&mut self, delta: f64) -> Vec<Action> {
        if delta == 0.0 {
            return Vec::new();
        }
        let kind = if delta > 0.0 {
            WarningKind::WeightIncreased
        } else {
            WarningKind::WeightDecreased
        };
        warn!(delta_g = delta, "Cart weight changed during payment");

        let mut actions = Vec::new();
        self.raise_warning(kind, &mut actions);
        actions.push(Action::Feedback(FeedbackEvent::Warning));
        actions
    }

    // =========================================================================
    // Warnings
    // =========================================================================

    fn raise_warning(&mut self, kind: WarningKind, actions: &mut Vec<Action>) {
        match self.open_warning {
            Some(open) => {
                debug!(open = %open, requested = %kind, "Warning already open, not raising another");
            }
            None => {
                self.open_warning = Some(kind);
                actions.push(Action::ReportWarning(kind));
            }
        }
    }

    fn cancel_warning(&mut self, actions: &mut Vec<Action>) {
        if self.open_warning.take().is_some() {
            actions.push(Action::CancelWarning);
        }
    }

    // =========================================================================
    // Housekeeping
    // =========================================================================

    fn clear_transient(&mut self) {
        self.unscanned_weight = 0.0;
        self.removal = None;
        self.pending_since = None;
        self.last_barcode_activity = None;
    }

    fn clear_all(&mut self) {
        self.inventory.clear_cart();
        self.clear_transient();
        self.open_warning = None;
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub fn state(&self) -> SystemState {
        self.state
    }

    pub fn inventory(&self) -> &CartInventory {
        &self.inventory
    }

    pub fn policy(&self) -> &ReconcilePolicy {
        &self.policy
    }

    pub fn unscanned_weight(&self) -> f64 {
        self.unscanned_weight
    }

    pub fn removal_candidates(&self) -> Option<&RemovalCandidates> {
        self.removal.as_ref()
    }

    pub fn open_warning(&self) -> Option<WarningKind> {
        self.open_warning
    }

    /// Snapshot for logging and status queries.
    pub fn summary(&self) -> CartSummary {
        CartSummary {
            state: self.state,
            lines: self
                .inventory
                .items()
                .map(|(code, item)| SummaryLine {
                    code: code.clone(),
                    unit_weight: item.unit_weight,
                    quantity: item.quantity,
                })
                .collect(),
            unique_items: self.inventory.len(),
            total_quantity: self.inventory.total_quantity(),
            total_expected_weight: self.inventory.total_expected_weight(),
            pending_barcode: self.inventory.pending_barcode().cloned(),
            removal_candidates: self
                .removal
                .as_ref()
                .map(RemovalCandidates::codes)
                .unwrap_or_default(),
            unscanned_weight: self.unscanned_weight,
            generated_at: Utc::now(),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

//! End-to-end reconciliation scenarios driven through the public API.

use std::time::{Duration, Instant};

use cart_core::{
    Action, Code, FeedbackEvent, ReconcilePolicy, Reconciler, SystemState, WarningKind,
    WeightBaseline, WeightObservation,
};

fn code(s: &str) -> Code {
    Code::parse(s).unwrap()
}

fn started() -> Reconciler {
    let mut r = Reconciler::new(ReconcilePolicy::default());
    r.start_session();
    r
}

/// Builds a cart holding one 500 g `111` and one 510 g `222` (1010 g on the scale).
fn cart_with_two_similar_items(now: Instant) -> Reconciler {
    let mut r = started();
    r.on_barcode(code("111"), now);
    r.on_weight(WeightObservation::new(500.0, 500.0), now);
    r.on_barcode(code("222"), now);
    r.on_weight(WeightObservation::new(510.0, 1010.0), now);
    assert_eq!(r.inventory().total_expected_weight(), 1010.0);
    r
}

#[test]
fn test_unscanned_addition_resolved_by_scan() {
    let mut r = started();
    let now = Instant::now();

    let actions = r.on_weight(WeightObservation::new(500.0, 500.0), now);
    assert_eq!(
        actions,
        vec![
            Action::ReportWarning(WarningKind::WeightIncreased),
            Action::Feedback(FeedbackEvent::Warning),
        ]
    );
    assert_eq!(r.state(), SystemState::UnscannedAddedItems);
    assert_eq!(r.unscanned_weight(), 500.0);

    let actions = r.on_barcode(code("111"), now + Duration::from_secs(1));
    assert_eq!(
        actions,
        vec![
            Action::AddItem {
                code: code("111"),
                weight: 500.0
            },
            Action::Feedback(FeedbackEvent::ItemAdded),
            Action::CancelWarning,
        ]
    );
    assert_eq!(r.state(), SystemState::Normal);

    let item = r.inventory().get(&code("111")).unwrap();
    assert_eq!(item.unit_weight, 500.0);
    assert_eq!(item.quantity, 1);
    assert_eq!(r.inventory().total_expected_weight(), 500.0);
}

#[test]
fn test_ambiguous_removal_resolved_by_scan() {
    let now = Instant::now();
    let mut r = cart_with_two_similar_items(now);

    let actions = r.on_weight(WeightObservation::new(-505.0, 505.0), now);
    assert_eq!(
        actions,
        vec![
            Action::ReportWarning(WarningKind::WeightDecreased),
            Action::Feedback(FeedbackEvent::Warning),
        ]
    );
    assert_eq!(r.state(), SystemState::WaitingForRemovalScan);
    assert_eq!(
        r.removal_candidates().unwrap().codes(),
        vec![code("111"), code("222")]
    );

    let actions = r.on_barcode(code("222"), now);
    assert_eq!(
        actions,
        vec![
            Action::RemoveItem(code("222")),
            Action::Feedback(FeedbackEvent::ItemRemoved),
            Action::CancelWarning,
        ]
    );
    assert_eq!(r.state(), SystemState::Normal);
    assert!(r.inventory().get(&code("222")).is_none());
    assert_eq!(r.inventory().get(&code("111")).unwrap().quantity, 1);
    assert_eq!(r.inventory().total_expected_weight(), 500.0);
}

#[test]
fn test_item_put_back_during_removal_wait() {
    let now = Instant::now();
    let mut r = cart_with_two_similar_items(now);

    // Scale read 1000 g before the drop.
    r.on_weight(WeightObservation::new(-505.0, 495.0), now);
    let removal = r.removal_candidates().unwrap();
    assert_eq!(removal.expected_weight_before_removal(), 1000.0);
    assert!(!r.needs_weight_delta());

    // Still outside the put-back tolerance.
    assert!(r
        .on_weight(WeightObservation::new(0.0, 700.0), now)
        .is_empty());

    let actions = r.on_weight(WeightObservation::new(0.0, 995.0), now);
    assert_eq!(actions, vec![Action::CancelWarning, Action::Rebaseline(995.0)]);
    assert_eq!(r.state(), SystemState::Normal);
    assert!(r.removal_candidates().is_none());
    assert_eq!(r.inventory().len(), 2);
    assert_eq!(r.inventory().total_expected_weight(), 1010.0);
}

#[test]
fn test_noise_below_threshold_is_not_an_event() {
    let now = Instant::now();
    let mut r = started();
    r.on_barcode(code("111"), now);
    r.on_weight(WeightObservation::new(500.0, 500.0), now);

    let mut baseline = WeightBaseline::new(10.0);
    baseline.set(500.0);
    let delta = baseline.accept(503.0);
    assert_eq!(delta, 0.0);

    let actions = r.on_weight(WeightObservation::new(delta, 503.0), now);
    assert!(actions.is_empty());
    assert_eq!(r.state(), SystemState::Normal);
    assert_eq!(r.inventory().total_expected_weight(), 500.0);
    assert_eq!(r.inventory().get(&code("111")).unwrap().quantity, 1);
}

#[test]
fn test_scan_without_weight_times_out() {
    let now = Instant::now();
    let mut r = started();
    r.on_barcode(code("111"), now);

    assert!(r
        .check_scan_timeout(now + Duration::from_millis(4_900))
        .is_empty());
    assert!(r.inventory().has_pending_weight_change());

    let actions = r.check_scan_timeout(now + Duration::from_secs(5));
    assert_eq!(actions, vec![Action::Feedback(FeedbackEvent::Error)]);
    assert_eq!(r.state(), SystemState::Normal);
    assert!(r.inventory().pending_barcode().is_none());
    assert!(r.inventory().is_empty());

    // Weight arriving afterwards is treated as unscanned.
    r.on_weight(
        WeightObservation::new(300.0, 300.0),
        now + Duration::from_secs(6),
    );
    assert_eq!(r.state(), SystemState::UnscannedAddedItems);
}

#[test]
fn test_warning_and_cancel_are_paired() {
    let now = Instant::now();
    let mut r = started();

    let mut reported = 0;
    let mut cancelled = 0;
    let mut tally = |actions: Vec<Action>| {
        for a in actions {
            match a {
                Action::ReportWarning(_) => reported += 1,
                Action::CancelWarning => cancelled += 1,
                _ => {}
            }
        }
    };

    tally(r.on_weight(WeightObservation::new(200.0, 200.0), now));
    tally(r.on_weight(WeightObservation::new(100.0, 300.0), now));
    tally(r.on_barcode(code("444"), now));
    tally(r.on_weight(WeightObservation::new(250.0, 550.0), now));
    tally(r.on_weight(WeightObservation::new(-250.0, 300.0), now));

    assert_eq!(reported, 2);
    assert_eq!(cancelled, 2);
    assert!(r.open_warning().is_none());
}

#[test]
fn test_full_session_lifecycle() {
    let now = Instant::now();
    let mut r = Reconciler::new(ReconcilePolicy::default());

    assert_eq!(r.start_session(), vec![Action::TareScale]);
    r.on_barcode(code("111"), now);
    r.on_weight(WeightObservation::new(500.0, 500.0), now);

    r.begin_payment();
    assert_eq!(r.state(), SystemState::PaymentProcessing);
    assert!(r.needs_weight_delta());

    let summary = r.summary();
    assert_eq!(summary.state, SystemState::PaymentProcessing);
    assert_eq!(summary.unique_items, 1);
    assert_eq!(summary.total_expected_weight, 500.0);

    r.end_session();
    assert_eq!(r.state(), SystemState::Idle);
    assert!(r.summary().lines.is_empty());

    // A new session starts clean.
    r.start_session();
    assert_eq!(r.state(), SystemState::Normal);
    assert!(r.inventory().is_empty());
}

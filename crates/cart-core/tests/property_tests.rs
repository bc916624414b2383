//! Property tests for inventory bookkeeping and the reconciler.

use std::time::{Duration, Instant};

use cart_core::{
    Action, CartInventory, Code, ReconcilePolicy, Reconciler, SampleWindow, WeightObservation,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Add(u8, f64),
    Remove(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..6, 1.0f64..2_000.0).prop_map(|(c, w)| Op::Add(c, w)),
        (0u8..6).prop_map(Op::Remove),
    ]
}

#[derive(Debug, Clone)]
enum Event {
    Scan(u8),
    Weight(f64),
    Tick(u64),
    Cancel,
    Reset,
}

fn event() -> impl Strategy<Value = Event> {
    prop_oneof![
        (0u8..4).prop_map(Event::Scan),
        prop_oneof![-800.0f64..-10.0, 10.0f64..800.0, Just(0.0)].prop_map(Event::Weight),
        (0u64..3_000).prop_map(Event::Tick),
        Just(Event::Cancel),
        Just(Event::Reset),
    ]
}

fn code(n: u8) -> Code {
    Code::parse(&format!("{}", 100 + u32::from(n))).unwrap()
}

proptest! {
    #[test]
    fn running_total_matches_items(ops in proptest::collection::vec(op(), 0..60)) {
        let mut cart = CartInventory::default();
        for op in ops {
            match op {
                Op::Add(c, w) => { cart.add_item(code(c), w); }
                Op::Remove(c) => { cart.remove_item(&code(c)); }
            }
            prop_assert!((cart.total_expected_weight() - cart.recomputed_weight()).abs() < 1e-6);
            prop_assert!(cart.items().all(|(_, item)| item.quantity >= 1));
        }
    }

    #[test]
    fn reconciler_keeps_inventory_consistent(events in proptest::collection::vec(event(), 0..80)) {
        let mut r = Reconciler::new(ReconcilePolicy::default());
        r.start_session();

        let mut now = Instant::now();
        let mut weight = 0.0f64;
        let mut outstanding = 0i32;
        for ev in events {
            let actions = match ev {
                Event::Scan(c) => r.on_barcode(code(c), now),
                Event::Weight(delta) => {
                    weight = (weight + delta).max(0.0);
                    r.on_weight(WeightObservation::new(delta, weight), now)
                }
                Event::Tick(ms) => {
                    now += Duration::from_millis(ms);
                    r.check_scan_timeout(now)
                }
                Event::Cancel => r.cancel_removal_wait(),
                Event::Reset => {
                    weight = 0.0;
                    r.reset_cart()
                }
            };
            for action in &actions {
                match action {
                    Action::ReportWarning(_) => outstanding += 1,
                    Action::CancelWarning => outstanding -= 1,
                    _ => {}
                }
            }
            prop_assert!((0..=1).contains(&outstanding), "outstanding warnings = {}", outstanding);
            prop_assert_eq!(outstanding == 1, r.open_warning().is_some());

            let inv = r.inventory();
            prop_assert!((inv.total_expected_weight() - inv.recomputed_weight()).abs() < 1e-6);
            prop_assert!(inv.items().all(|(_, item)| item.quantity >= 1));
            prop_assert!(r.state().is_active());
            prop_assert!(r.unscanned_weight() >= 0.0);
        }
    }

    #[test]
    fn smoothed_weight_is_within_sample_range(samples in proptest::collection::vec(0.0f64..5_000.0, 1..40)) {
        let mut window = SampleWindow::new(10);
        for s in &samples {
            window.push(*s);
        }
        let recent = &samples[samples.len().saturating_sub(10)..];
        let lo = recent.iter().copied().fold(f64::MAX, f64::min);
        let hi = recent.iter().copied().fold(f64::MIN, f64::max);
        let current = window.current();
        prop_assert!(current >= lo - 1e-9 && current <= hi + 1e-9);
    }
}

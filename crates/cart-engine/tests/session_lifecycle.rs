//! End-to-end session on a simulated scale: sampler thread, main loop,
//! outbox and lifecycle all running for real.

use std::time::Duration;

use tokio::time::Instant;

use cart_core::{Code, FeedbackEvent, SystemState, WarningKind};
use cart_engine::testing::{RecordedCall, Recorder};
use cart_engine::{
    apply_command, CartConfig, CartLifecycle, CartStatus, CartSystem, ChannelBarcodeSource, ControlCommand,
    SimulatedScale,
};

fn fast_config() -> CartConfig {
    let mut config = CartConfig::default();
    config.cart.id = "bench-cart".into();
    config.scale.sample_interval_ms = 5;
    config.stability.wait_time_ms = 300;
    config.stability.poll_interval_ms = 20;
    config.timing.loop_tick_ms = 20;
    config.timing.weight_check_interval_ms = 100;
    config.timing.summary_interval_ms = 1_000;
    config.timing.shutdown_timeout_ms = 3_000;
    config
}

async fn wait_for(cart: &CartSystem, what: &str, check: impl Fn(&CartStatus) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let status = cart.status().await;
        if check(&status) {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {}: {:?}",
            what,
            status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn total(status: &CartStatus) -> f64 {
    status
        .summary
        .as_ref()
        .map(|s| s.total_expected_weight)
        .unwrap_or_default()
}

fn code(s: &str) -> Code {
    Code::parse(s).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_full_shopping_session() {
    let scale = SimulatedScale::new();
    scale.set_load(80.0); // empty basket on the platform
    let (scanner, barcodes) = ChannelBarcodeSource::channel(8);
    let recorder = Recorder::new();

    let mut cart = CartSystem::builder(fast_config())
        .with_sensor(scale.clone())
        .with_barcode_source(barcodes)
        .with_collaborators(recorder.collaborators())
        .build()
        .unwrap();

    let command = ControlCommand::from_json(r#"{"type":"session_started","data":"s-1"}"#).unwrap();
    apply_command(&mut cart, command).await.unwrap();
    wait_for(&cart, "session start", |s| s.state == SystemState::Normal).await;

    // Item placed without scanning, then scanned.
    scale.add_load(500.0);
    wait_for(&cart, "unscanned warning", |s| {
        s.state == SystemState::UnscannedAddedItems
    })
    .await;
    scanner.scan("111").unwrap();
    wait_for(&cart, "first item", |s| {
        s.state == SystemState::Normal && total(s) == 500.0
    })
    .await;

    // Scanned first, then placed.
    scanner.scan("222").unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    scale.add_load(510.0);
    wait_for(&cart, "second item", |s| total(s) == 1_010.0).await;

    // 505 g leaves the cart: either item could explain it.
    scale.add_load(-505.0);
    wait_for(&cart, "removal scan request", |s| {
        s.state == SystemState::WaitingForRemovalScan
    })
    .await;
    scanner.scan("222").unwrap();
    wait_for(&cart, "confirmed removal", |s| {
        s.state == SystemState::Normal && total(s) == 500.0
    })
    .await;

    apply_command(&mut cart, ControlCommand::PaymentCreated { payment_id: Some("p-1".into()) })
        .await
        .unwrap();
    wait_for(&cart, "payment", |s| s.state == SystemState::PaymentProcessing).await;

    apply_command(&mut cart, ControlCommand::EndSession { session_id: None })
        .await
        .unwrap();
    assert!(!cart.is_running());
    assert_eq!(cart.status().await.state, SystemState::Idle);

    assert_eq!(
        recorder.remote_calls(),
        vec![
            RecordedCall::BindSession("bench-cart".into()),
            RecordedCall::ReportWarning(WarningKind::WeightIncreased),
            RecordedCall::Add(code("111"), 500.0),
            RecordedCall::CancelWarning,
            RecordedCall::Lookup(code("222")),
            RecordedCall::Add(code("222"), 510.0),
            RecordedCall::ReportWarning(WarningKind::WeightDecreased),
            RecordedCall::Remove(code("222")),
            RecordedCall::CancelWarning,
        ]
    );

    let feedback = recorder.feedback();
    assert!(feedback.contains(&FeedbackEvent::ItemRemoved));
    assert!(feedback.contains(&FeedbackEvent::PaymentPending));
    assert_eq!(feedback.last(), Some(&FeedbackEvent::SessionEnded));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_second_session_starts_clean() {
    let scale = SimulatedScale::new();
    let (scanner, barcodes) = ChannelBarcodeSource::channel(8);

    let mut cart = CartSystem::builder(fast_config())
        .with_sensor(scale.clone())
        .with_barcode_source(barcodes)
        .build()
        .unwrap();

    apply_command(&mut cart, ControlCommand::SessionStarted { session_id: None })
        .await
        .unwrap();
    wait_for(&cart, "session start", |s| s.state == SystemState::Normal).await;
    scanner.scan("9").unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    scale.add_load(120.0);
    wait_for(&cart, "item", |s| total(s) == 120.0).await;
    apply_command(&mut cart, ControlCommand::EndSession { session_id: None })
        .await
        .unwrap();

    // The item stays on the platform; the new session tares it away.
    apply_command(&mut cart, ControlCommand::SessionStarted { session_id: None })
        .await
        .unwrap();
    wait_for(&cart, "clean restart", |s| {
        s.state == SystemState::Normal
            && s.summary.as_ref().is_some_and(|summary| summary.lines.is_empty())
    })
    .await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(cart.status().await.state, SystemState::Normal);

    cart.shutdown().await.unwrap();
}

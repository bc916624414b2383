//! # Reconcile Loop
//!
//! The timing harness: one task that owns the reconciler and drives it from
//! the barcode source, the stabilizer and the lifecycle commands.
//!
//! ## Iteration
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     every tick (50 ms, delayed on overrun)              │
//! │                                                                         │
//! │  1. drain lifecycle commands      (payment, cancel removal, reset)     │
//! │  2. poll one barcode              ──► Reconciler::on_barcode           │
//! │  3. expire stale scans            ──► Reconciler::check_scan_timeout   │
//! │  4. every 500 ms: weight check                                         │
//! │       needs delta?  stabilizer.evaluate()  (≤ 1 s)                     │
//! │       otherwise     current weight only                                │
//! │                                   ──► Reconciler::on_weight            │
//! │  5. every 10 s: log cart summary and prompt                            │
//! │  6. publish CartStatus                                                 │
//! │                                                                         │
//! │  Actions are executed in the order returned:                           │
//! │    Feedback ─► FeedbackSink      TareScale / Rebaseline ─► stabilizer  │
//! │    everything remote ─► Outbox (ordered, off-loop)                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Step 3 always runs before step 4, so a scan that expires can never also
//! receive weight in the same iteration.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use cart_core::{Action, CartSummary, Reconciler, SystemState, WeightObservation};

use crate::barcode::BarcodeSource;
use crate::collaborators::FeedbackSink;
use crate::error::{EngineError, EngineResult};
use crate::outbox::{OutboxHandle, RemoteCall};
use crate::stabilizer::WeightStabilizer;

// =============================================================================
// Configuration & Status
// =============================================================================

/// Timing of the main loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Period of one iteration.
    pub tick: Duration,

    /// How often the weight is evaluated.
    pub weight_check_interval: Duration,

    /// How often the cart summary is logged.
    pub summary_interval: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        LoopConfig {
            tick: Duration::from_millis(50),
            weight_check_interval: Duration::from_millis(500),
            summary_interval: Duration::from_secs(10),
        }
    }
}

/// Lifecycle requests delivered to a running loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCommand {
    BeginPayment,
    CancelRemoval,
    ResetCart,
}

/// Snapshot of a cart, refreshed every iteration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CartStatus {
    pub state: SystemState,
    pub session_active: bool,
    /// Smoothed scale reading (grams).
    pub current_weight: f64,
    pub summary: Option<CartSummary>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// What a finished loop hands back for the next session.
pub struct LoopParts {
    pub reconciler: Reconciler,
    pub barcodes: Box<dyn BarcodeSource>,
}

// =============================================================================
// Loop Handle
// =============================================================================

/// Handle for a spawned [`ReconcileLoop`].
pub struct LoopHandle {
    commands: mpsc::Sender<LoopCommand>,
    shutdown: mpsc::Sender<()>,
    task: JoinHandle<LoopParts>,
}

impl LoopHandle {
    /// Queues a lifecycle command for the next iteration.
    pub async fn send(&self, command: LoopCommand) -> EngineResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| EngineError::ChannelError("Loop command channel closed".into()))
    }

    /// Stops the loop and waits up to `timeout` for it to end the session.
    ///
    /// Returns `None` if the loop did not finish in time or panicked.
    pub async fn shutdown(self, timeout: Duration) -> Option<LoopParts> {
        let _ = self.shutdown.send(()).await;
        match tokio::time::timeout(timeout, self.task).await {
            Ok(Ok(parts)) => Some(parts),
            Ok(Err(e)) => {
                warn!(error = %e, "Reconcile loop task failed");
                None
            }
            Err(_) => {
                warn!(?timeout, "Reconcile loop did not stop in time");
                None
            }
        }
    }
}

// =============================================================================
// Reconcile Loop
// =============================================================================

/// The main loop of one cart session.
pub struct ReconcileLoop {
    reconciler: Reconciler,
    stabilizer: WeightStabilizer,
    barcodes: Box<dyn BarcodeSource>,
    outbox: OutboxHandle,
    feedback: Arc<dyn FeedbackSink>,
    config: LoopConfig,
    status: Arc<RwLock<CartStatus>>,
    commands: mpsc::Receiver<LoopCommand>,
    shutdown: mpsc::Receiver<()>,
}

/// Sending halves created alongside a loop.
struct LoopChannels {
    commands: mpsc::Sender<LoopCommand>,
    shutdown: mpsc::Sender<()>,
}

impl ReconcileLoop {
    pub fn spawn(
        parts: LoopParts,
        stabilizer: WeightStabilizer,
        outbox: OutboxHandle,
        feedback: Arc<dyn FeedbackSink>,
        config: LoopConfig,
        status: Arc<RwLock<CartStatus>>,
    ) -> LoopHandle {
        let (engine, channels) = Self::new(parts, stabilizer, outbox, feedback, config, status);
        LoopHandle {
            commands: channels.commands,
            shutdown: channels.shutdown,
            task: tokio::spawn(engine.run()),
        }
    }

    fn new(
        parts: LoopParts,
        stabilizer: WeightStabilizer,
        outbox: OutboxHandle,
        feedback: Arc<dyn FeedbackSink>,
        config: LoopConfig,
        status: Arc<RwLock<CartStatus>>,
    ) -> (Self, LoopChannels) {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let engine = ReconcileLoop {
            reconciler: parts.reconciler,
            stabilizer,
            barcodes: parts.barcodes,
            outbox,
            feedback,
            config,
            status,
            commands: command_rx,
            shutdown: shutdown_rx,
        };
        let channels = LoopChannels {
            commands: command_tx,
            shutdown: shutdown_tx,
        };
        (engine, channels)
    }

    /// Runs one session: start, iterate until shutdown, end.
    async fn run(mut self) -> LoopParts {
        let actions = self.reconciler.start_session();
        self.execute(actions);
        info!(
            tick = ?self.config.tick,
            weight_check = ?self.config.weight_check_interval,
            "Reconcile loop running"
        );

        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let started = Instant::now();
        let mut last_weight_check = started;
        let mut last_summary = started;

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    debug!("Reconcile loop shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    self.iterate(&mut last_weight_check, &mut last_summary).await;
                }
            }
        }

        let actions = self.reconciler.end_session();
        self.execute(actions);
        self.publish_status().await;
        info!("Reconcile loop stopped");

        LoopParts {
            reconciler: self.reconciler,
            barcodes: self.barcodes,
        }
    }

    async fn iterate(&mut self, last_weight_check: &mut Instant, last_summary: &mut Instant) {
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command);
        }

        let now = Instant::now();
        if let Some(code) = self.barcodes.poll_code() {
            let actions = self.reconciler.on_barcode(code, now.into_std());
            self.execute(actions);
        }

        let actions = self.reconciler.check_scan_timeout(now.into_std());
        self.execute(actions);

        if now.duration_since(*last_weight_check) >= self.config.weight_check_interval {
            *last_weight_check = now;
            self.check_weight().await;
        }

        if now.duration_since(*last_summary) >= self.config.summary_interval {
            *last_summary = now;
            self.log_summary();
        }

        self.publish_status().await;
    }

    fn apply(&mut self, command: LoopCommand) {
        debug!(?command, "Applying lifecycle command");
        let actions = match command {
            LoopCommand::BeginPayment => self.reconciler.begin_payment(),
            LoopCommand::CancelRemoval => self.reconciler.cancel_removal_wait(),
            LoopCommand::ResetCart => self.reconciler.reset_cart(),
        };
        self.execute(actions);
    }

    async fn check_weight(&mut self) {
        let delta = if self.reconciler.needs_weight_delta() {
            self.stabilizer.evaluate().await
        } else {
            0.0
        };
        let current = self.stabilizer.current_weight();

        match WeightObservation::checked(delta, current) {
            Ok(observation) => {
                let actions = self
                    .reconciler
                    .on_weight(observation, Instant::now().into_std());
                self.execute(actions);
            }
            Err(e) => warn!(error = %e, "Skipping weight evaluation"),
        }
    }

    /// Executes actions in order.
    fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Feedback(event) => self.feedback.signal(event),
                Action::TareScale => self.stabilizer.tare(),
                Action::Rebaseline(grams) => self.stabilizer.rebaseline(grams),
                remote => {
                    if let Some(call) = RemoteCall::from_action(&remote) {
                        if let Err(e) = self.outbox.send(call) {
                            warn!(error = %e, action = ?remote, "Remote call dropped");
                        }
                    }
                }
            }
        }
    }

    fn log_summary(&self) {
        let summary = self.reconciler.summary();
        info!(
            state = %summary.state,
            unique_items = summary.unique_items,
            total_g = summary.total_expected_weight,
            "{}",
            summary
        );
        if let Some(prompt) = summary.prompt() {
            info!(state = %summary.state, "{}", prompt);
        }
    }

    async fn publish_status(&mut self) {
        let state = self.reconciler.state();
        let status = CartStatus {
            state,
            session_active: state.is_active(),
            current_weight: self.stabilizer.current_weight(),
            summary: Some(self.reconciler.summary()),
            updated_at: Some(Utc::now()),
        };
        *self.status.write().await = status;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use cart_core::{Code, FeedbackEvent, ReconcilePolicy, WarningKind};

    use crate::barcode::{BarcodeSender, ChannelBarcodeSource};
    use crate::testing::{RecordedCall, Recorder};
    use crate::outbox::Outbox;
    use crate::sampler::WeightSource;
    use crate::stabilizer::StabilizerConfig;

    /// Scale whose load is set directly by the test.
    #[derive(Default)]
    struct Platform {
        load: Mutex<f64>,
        offset: Mutex<f64>,
    }

    impl Platform {
        fn set(&self, grams: f64) {
            *self.load.lock().unwrap() = grams;
        }
    }

    impl WeightSource for Platform {
        fn current_weight(&self) -> f64 {
            (*self.load.lock().unwrap() - *self.offset.lock().unwrap()).max(0.0)
        }

        fn reset(&self) {
            *self.offset.lock().unwrap() = *self.load.lock().unwrap();
        }
    }

    struct Harness {
        platform: Arc<Platform>,
        scanner: BarcodeSender,
        recorder: Arc<Recorder>,
        status: Arc<RwLock<CartStatus>>,
        handle: LoopHandle,
        outbox_task: JoinHandle<()>,
    }

    fn start() -> Harness {
        let platform = Arc::new(Platform::default());
        let (scanner, barcodes) = ChannelBarcodeSource::channel(8);
        let recorder = Recorder::new();
        let collaborators = recorder.collaborators();
        let (outbox, outbox_task) = Outbox::spawn(collaborators.clone());
        let status = Arc::new(RwLock::new(CartStatus::default()));

        let stabilizer = WeightStabilizer::new(platform.clone(), StabilizerConfig::default());
        let parts = LoopParts {
            reconciler: Reconciler::new(ReconcilePolicy::default()),
            barcodes: Box::new(barcodes),
        };
        let handle = ReconcileLoop::spawn(
            parts,
            stabilizer,
            outbox,
            collaborators.feedback,
            LoopConfig::default(),
            status.clone(),
        );

        Harness {
            platform,
            scanner,
            recorder,
            status,
            handle,
            outbox_task,
        }
    }

    async fn state(h: &Harness) -> SystemState {
        h.status.read().await.state
    }

    fn code(s: &str) -> Code {
        Code::parse(s).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_unscanned_item_then_scan() {
        let h = start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(state(&h).await, SystemState::Normal);

        h.platform.set(500.0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(state(&h).await, SystemState::UnscannedAddedItems);

        h.scanner.scan("111").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        {
            let status = h.status.read().await;
            assert_eq!(status.state, SystemState::Normal);
            let summary = status.summary.as_ref().unwrap();
            assert_eq!(summary.lines.len(), 1);
            assert_eq!(summary.total_expected_weight, 500.0);
        }

        let parts = h.handle.shutdown(Duration::from_secs(5)).await.unwrap();
        assert_eq!(parts.reconciler.state(), SystemState::Idle);
        h.outbox_task.await.unwrap();

        assert_eq!(
            h.recorder.remote_calls(),
            vec![
                RecordedCall::ReportWarning(WarningKind::WeightIncreased),
                RecordedCall::Add(code("111"), 500.0),
                RecordedCall::CancelWarning,
            ]
        );
        let feedback = h.recorder.feedback();
        assert_eq!(
            feedback,
            vec![
                FeedbackEvent::Warning,
                FeedbackEvent::ItemAdded,
                FeedbackEvent::SessionEnded,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_then_place_item() {
        let h = start();
        tokio::time::sleep(Duration::from_millis(100)).await;

        h.scanner.scan("42").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        h.platform.set(250.0);
        tokio::time::sleep(Duration::from_secs(2)).await;

        {
            let status = h.status.read().await;
            assert_eq!(status.state, SystemState::Normal);
            assert_eq!(status.current_weight, 250.0);
            let summary = status.summary.as_ref().unwrap();
            assert_eq!(summary.total_expected_weight, 250.0);
            assert!(summary.pending_barcode.is_none());
        }

        h.handle.shutdown(Duration::from_secs(5)).await.unwrap();
        h.outbox_task.await.unwrap();
        assert_eq!(
            h.recorder.remote_calls(),
            vec![
                RecordedCall::Lookup(code("42")),
                RecordedCall::Add(code("42"), 250.0),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_payment_disables_scans() {
        let h = start();
        tokio::time::sleep(Duration::from_millis(100)).await;

        h.handle.send(LoopCommand::BeginPayment).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(state(&h).await, SystemState::PaymentProcessing);

        h.scanner.scan("7").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(state(&h).await, SystemState::PaymentProcessing);

        h.handle.shutdown(Duration::from_secs(5)).await.unwrap();
        h.outbox_task.await.unwrap();
        assert!(h.recorder.remote_calls().is_empty());
        assert!(h.recorder.feedback().contains(&FeedbackEvent::PaymentPending));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_returns_to_empty_cart() {
        let h = start();
        tokio::time::sleep(Duration::from_millis(100)).await;

        h.platform.set(300.0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(state(&h).await, SystemState::UnscannedAddedItems);

        h.handle.send(LoopCommand::ResetCart).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        {
            let status = h.status.read().await;
            assert_eq!(status.state, SystemState::Normal);
            assert_eq!(status.current_weight, 0.0);
            assert_eq!(status.summary.as_ref().unwrap().unscanned_weight, 0.0);
        }

        h.handle.shutdown(Duration::from_secs(5)).await.unwrap();
        h.outbox_task.await.unwrap();
        assert_eq!(
            h.recorder.remote_calls(),
            vec![
                RecordedCall::ReportWarning(WarningKind::WeightIncreased),
                RecordedCall::CancelWarning,
            ]
        );
    }
}

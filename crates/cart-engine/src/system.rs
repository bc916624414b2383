//! # Cart System
//!
//! Session lifecycle for one cart: owns the hardware and the collaborators
//! between sessions and hands them to the running tasks during one.
//!
//! ## Ownership Across a Session
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   STOPPED                      start()                  RUNNING         │
//! │   ┌──────────────────┐  ─────────────────────►  ┌──────────────────┐   │
//! │   │ sensor           │   tare (fatal on error)   │ WeightSampler    │   │
//! │   │ reconciler       │   spawn sampler, outbox,  │ Outbox           │   │
//! │   │ barcode source   │   bind session, loop      │ ReconcileLoop    │   │
//! │   └──────────────────┘  ◄─────────────────────   └──────────────────┘   │
//! │                              shutdown()                                 │
//! │                     loop ends session, outbox drains,                   │
//! │                     sampler stops, parts come back                      │
//! │                                                                         │
//! │   Every join is bounded by timing.shutdown_timeout_ms. A part whose     │
//! │   task did not finish in time is lost, and the next start reports it.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cart_core::{FeedbackEvent, Reconciler};

use crate::barcode::BarcodeSource;
use crate::collaborators::{CartApi, Collaborators, FeedbackSink, FraudReporter};
use crate::config::CartConfig;
use crate::engine::{CartStatus, LoopCommand, LoopHandle, LoopParts, ReconcileLoop};
use crate::error::{EngineError, EngineResult};
use crate::outbox::{Outbox, RemoteCall};
use crate::protocol::ControlCommand;
use crate::sampler::{SamplerHandle, WeightSampler};
use crate::sensor::WeightSensor;
use crate::stabilizer::WeightStabilizer;

// =============================================================================
// Lifecycle Trait
// =============================================================================

/// What the control channel can ask of a cart.
#[allow(async_fn_in_trait)]
pub trait CartLifecycle {
    /// Starts a session. Starting a running cart is a no-op.
    async fn start(&mut self) -> EngineResult<()>;

    /// Ends the session and stops every task. Stopping a stopped cart is a
    /// no-op.
    async fn shutdown(&mut self) -> EngineResult<()>;

    /// Freezes the inventory for payment.
    async fn disable_item_operations(&mut self) -> EngineResult<()>;

    /// Treats any further significant weight change as suspicious.
    async fn enable_fraud_monitoring(&mut self) -> EngineResult<()>;

    async fn cancel_removal_wait(&mut self) -> EngineResult<()> {
        Err(EngineError::Unsupported("cancel_removal_wait"))
    }

    async fn reset_cart(&mut self) -> EngineResult<()> {
        Err(EngineError::Unsupported("reset_cart"))
    }

    /// Shows the pairing prompt.
    fn show_pairing(&self) {}
}

/// Dispatches a decoded control command to a lifecycle implementation.
pub async fn apply_command<L: CartLifecycle>(cart: &mut L, command: ControlCommand) -> EngineResult<()> {
    info!(command = command.type_name(), "Control command received");
    match command {
        ControlCommand::GenerateQr => {
            cart.show_pairing();
            Ok(())
        }
        ControlCommand::SessionStarted { session_id } => {
            info!(?session_id, "Starting cart session");
            cart.start().await
        }
        ControlCommand::PaymentCreated { payment_id } => {
            info!(?payment_id, "Payment created");
            cart.disable_item_operations().await?;
            cart.enable_fraud_monitoring().await
        }
        ControlCommand::EndSession { session_id } => {
            info!(?session_id, "Ending cart session");
            cart.shutdown().await
        }
        ControlCommand::CancelRemoval => cart.cancel_removal_wait().await,
        ControlCommand::ResetCart => cart.reset_cart().await,
    }
}

// =============================================================================
// Cart System
// =============================================================================

/// Tasks of a running session.
struct RunningSession {
    sampler: SamplerHandle,
    outbox_task: JoinHandle<()>,
    engine: LoopHandle,
}

/// The cart controller.
pub struct CartSystem {
    config: CartConfig,
    collaborators: Collaborators,
    sensor: Option<Box<dyn WeightSensor>>,
    parts: Option<LoopParts>,
    running: Option<RunningSession>,
    status: Arc<RwLock<CartStatus>>,
}

impl CartSystem {
    /// Creates a builder with the given config.
    pub fn builder(config: CartConfig) -> CartSystemBuilder {
        CartSystemBuilder::new(config)
    }

    pub fn config(&self) -> &CartConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Latest status snapshot.
    pub async fn status(&self) -> CartStatus {
        self.status.read().await.clone()
    }

    async fn send(&self, command: LoopCommand) -> EngineResult<()> {
        match &self.running {
            Some(session) => session.engine.send(command).await,
            None => Err(EngineError::NotRunning),
        }
    }

    /// Tares the sensor off the async runtime. The sensor comes back even
    /// when the tare fails.
    async fn tare_sensor(
        mut sensor: Box<dyn WeightSensor>,
    ) -> EngineResult<(Box<dyn WeightSensor>, EngineResult<()>)> {
        let joined = tokio::task::spawn_blocking(move || {
            let result = sensor.tare().map_err(EngineError::SensorInit);
            (sensor, result)
        })
        .await;
        joined.map_err(|e| EngineError::Internal(format!("tare task failed: {}", e)))
    }

    async fn join_outbox(task: JoinHandle<()>, timeout: Duration) {
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(())) => debug!("Outbox finished"),
            Ok(Err(e)) => warn!(error = %e, "Outbox task failed"),
            Err(_) => warn!(?timeout, "Outbox did not drain in time"),
        }
    }
}

impl CartLifecycle for CartSystem {
    async fn start(&mut self) -> EngineResult<()> {
        if self.running.is_some() {
            warn!("Cart session already running, start ignored");
            return Ok(());
        }

        let sensor = self.sensor.take().ok_or(EngineError::MissingSensor)?;
        let parts = match self.parts.take() {
            Some(parts) => parts,
            None => {
                self.sensor = Some(sensor);
                return Err(EngineError::MissingBarcodeSource);
            }
        };

        let (sensor, tared) = match Self::tare_sensor(sensor).await {
            Ok(result) => result,
            Err(e) => {
                self.parts = Some(parts);
                return Err(e);
            }
        };
        if let Err(e) = tared {
            warn!(error = %e, "Scale could not be tared, session not started");
            self.sensor = Some(sensor);
            self.parts = Some(parts);
            return Err(e);
        }

        info!(cart_id = %self.config.cart_id(), "Starting cart system");

        let (reader, sampler) = WeightSampler::new(sensor, self.config.sampler_config()).spawn();
        let stabilizer = WeightStabilizer::new(Arc::new(reader), self.config.stabilizer_config());

        let (outbox, outbox_task) = Outbox::spawn(self.collaborators.clone());
        if let Err(e) = outbox.send(RemoteCall::BindSession(self.config.cart_id().to_string())) {
            warn!(error = %e, "Could not queue session binding");
        }

        let engine = ReconcileLoop::spawn(
            parts,
            stabilizer,
            outbox,
            self.collaborators.feedback.clone(),
            self.config.loop_config(),
            self.status.clone(),
        );

        self.running = Some(RunningSession {
            sampler,
            outbox_task,
            engine,
        });
        info!("Cart system started");
        Ok(())
    }

    async fn shutdown(&mut self) -> EngineResult<()> {
        let Some(session) = self.running.take() else {
            debug!("Cart system not running, nothing to shut down");
            return Ok(());
        };

        info!("Shutting down cart system");
        let timeout = self.config.shutdown_timeout();

        match session.engine.shutdown(timeout).await {
            Some(parts) => self.parts = Some(parts),
            None => warn!("Barcode source lost with the reconcile loop"),
        }

        // The loop owned the last outbox handle, so the outbox now drains.
        Self::join_outbox(session.outbox_task, timeout).await;

        match session.sampler.stop(timeout).await {
            Some(sensor) => self.sensor = Some(sensor),
            None => warn!("Weight sensor lost with the sampler"),
        }

        *self.status.write().await = CartStatus {
            updated_at: Some(Utc::now()),
            ..Default::default()
        };
        info!("Cart system stopped");
        Ok(())
    }

    async fn disable_item_operations(&mut self) -> EngineResult<()> {
        self.send(LoopCommand::BeginPayment).await
    }

    async fn enable_fraud_monitoring(&mut self) -> EngineResult<()> {
        // Payment mode already watches the weight; a repeat is a no-op.
        self.send(LoopCommand::BeginPayment).await
    }

    async fn cancel_removal_wait(&mut self) -> EngineResult<()> {
        self.send(LoopCommand::CancelRemoval).await
    }

    async fn reset_cart(&mut self) -> EngineResult<()> {
        self.send(LoopCommand::ResetCart).await
    }

    fn show_pairing(&self) {
        self.collaborators.feedback.signal(FeedbackEvent::Pairing);
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating a CartSystem.
pub struct CartSystemBuilder {
    config: CartConfig,
    sensor: Option<Box<dyn WeightSensor>>,
    barcodes: Option<Box<dyn BarcodeSource>>,
    collaborators: Collaborators,
}

impl CartSystemBuilder {
    pub fn new(config: CartConfig) -> Self {
        CartSystemBuilder {
            config,
            sensor: None,
            barcodes: None,
            collaborators: Collaborators::default(),
        }
    }

    pub fn with_sensor(mut self, sensor: impl WeightSensor) -> Self {
        self.sensor = Some(Box::new(sensor));
        self
    }

    pub fn with_barcode_source(mut self, source: impl BarcodeSource) -> Self {
        self.barcodes = Some(Box::new(source));
        self
    }

    pub fn with_cart_api(mut self, api: Arc<dyn CartApi>) -> Self {
        self.collaborators.cart_api = api;
        self
    }

    pub fn with_fraud_reporter(mut self, reporter: Arc<dyn FraudReporter>) -> Self {
        self.collaborators.fraud = reporter;
        self
    }

    pub fn with_feedback(mut self, feedback: Arc<dyn FeedbackSink>) -> Self {
        self.collaborators.feedback = feedback;
        self
    }

    /// Replaces all three collaborators at once.
    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    /// Builds the CartSystem. Fails on invalid config or missing hardware.
    pub fn build(self) -> EngineResult<CartSystem> {
        self.config.validate()?;
        let sensor = self.sensor.ok_or(EngineError::MissingSensor)?;
        let barcodes = self.barcodes.ok_or(EngineError::MissingBarcodeSource)?;

        let parts = LoopParts {
            reconciler: Reconciler::new(self.config.to_policy()),
            barcodes,
        };

        Ok(CartSystem {
            config: self.config,
            collaborators: self.collaborators,
            sensor: Some(sensor),
            parts: Some(parts),
            running: None,
            status: Arc::new(RwLock::new(CartStatus::default())),
        })
    }
}

//! # Remote Call Outbox
//!
//! Delivers remote collaborator calls in the order the reconciler decided
//! them, off the main loop.
//!
//! ## Delivery Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   ReconcileLoop                      Outbox task                        │
//! │   ─────────────                      ───────────                        │
//! │   Action::LookupItem ─┐                                                 │
//! │   Action::AddItem    ─┤  unbounded    recv ─► spawn_blocking(call)      │
//! │   Action::RemoveItem ─┼──────────────►  │        │                      │
//! │   Action::Report...  ─┤   mpsc          │        ├─ Ok  ─► debug        │
//! │   Action::Cancel...  ─┘                 │        └─ Err ─► warn, next   │
//! │                                         ▼                               │
//! │                                  one call at a time, FIFO               │
//! │                                                                         │
//! │   Closing the handle drains the queue, then the task exits.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A failed call is not retried and never rolls back local state.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cart_core::{Action, Code, WarningKind};

use crate::collaborators::{Collaborators, WarningId};
use crate::error::{CollaboratorError, EngineError, EngineResult};

// =============================================================================
// Remote Calls
// =============================================================================

/// A call to one of the remote collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    BindSession(String),
    Lookup(Code),
    Add { code: Code, weight: f64 },
    Remove(Code),
    ReportWarning(WarningKind),
    CancelWarning,
}

impl RemoteCall {
    /// Maps a reconciler action to its remote call, if it has one.
    pub fn from_action(action: &Action) -> Option<Self> {
        match action {
            Action::LookupItem(code) => Some(RemoteCall::Lookup(code.clone())),
            Action::AddItem { code, weight } => Some(RemoteCall::Add {
                code: code.clone(),
                weight: *weight,
            }),
            Action::RemoveItem(code) => Some(RemoteCall::Remove(code.clone())),
            Action::ReportWarning(kind) => Some(RemoteCall::ReportWarning(*kind)),
            Action::CancelWarning => Some(RemoteCall::CancelWarning),
            Action::Feedback(_) | Action::TareScale | Action::Rebaseline(_) => None,
        }
    }

    fn operation(&self) -> &'static str {
        match self {
            RemoteCall::BindSession(_) => "bind_session",
            RemoteCall::Lookup(_) => "lookup_item",
            RemoteCall::Add { .. } => "add_item",
            RemoteCall::Remove(_) => "remove_item",
            RemoteCall::ReportWarning(_) => "report_warning",
            RemoteCall::CancelWarning => "cancel_warning",
        }
    }
}

enum Delivered {
    Done,
    Warning(WarningId),
}

fn deliver(collaborators: &Collaborators, call: &RemoteCall) -> Result<Delivered, CollaboratorError> {
    match call {
        RemoteCall::BindSession(cart_id) => collaborators.cart_api.bind_session(cart_id)?,
        RemoteCall::Lookup(code) => {
            let product = collaborators.cart_api.lookup_item(code)?;
            debug!(code = %code, name = ?product.name, "Product looked up");
        }
        RemoteCall::Add { code, weight } => collaborators.cart_api.add_item(code, *weight)?,
        RemoteCall::Remove(code) => collaborators.cart_api.remove_item(code)?,
        RemoteCall::ReportWarning(kind) => {
            return collaborators.fraud.report_warning(*kind).map(Delivered::Warning)
        }
        RemoteCall::CancelWarning => collaborators.fraud.cancel_warning()?,
    }
    Ok(Delivered::Done)
}

// =============================================================================
// Outbox
// =============================================================================

/// Sending side of the outbox.
#[derive(Debug, Clone)]
pub struct OutboxHandle {
    tx: mpsc::UnboundedSender<RemoteCall>,
}

impl OutboxHandle {
    /// Queues a call behind everything already queued.
    pub fn send(&self, call: RemoteCall) -> EngineResult<()> {
        self.tx
            .send(call)
            .map_err(|_| EngineError::ChannelError("Outbox closed".into()))
    }
}

/// Sequential executor for remote calls.
pub struct Outbox {
    collaborators: Collaborators,
    rx: mpsc::UnboundedReceiver<RemoteCall>,
    open_warning: Option<WarningId>,
    delivered: u64,
    failed: u64,
}

impl Outbox {
    pub fn new(collaborators: Collaborators) -> (Self, OutboxHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let outbox = Outbox {
            collaborators,
            rx,
            open_warning: None,
            delivered: 0,
            failed: 0,
        };
        (outbox, OutboxHandle { tx })
    }

    /// Spawns the outbox task. It exits once every handle is dropped and
    /// the queue is empty.
    pub fn spawn(collaborators: Collaborators) -> (OutboxHandle, JoinHandle<()>) {
        let (outbox, handle) = Outbox::new(collaborators);
        (handle, tokio::spawn(outbox.run()))
    }

    pub async fn run(mut self) {
        debug!("Outbox started");

        while let Some(call) = self.rx.recv().await {
            let collaborators = self.collaborators.clone();
            let job = call.clone();
            let result = tokio::task::spawn_blocking(move || deliver(&collaborators, &job)).await;

            match result {
                Ok(Ok(delivered)) => {
                    self.delivered += 1;
                    self.on_delivered(&call, delivered);
                }
                Ok(Err(e)) => {
                    self.failed += 1;
                    warn!(operation = call.operation(), error = %e, "Remote call failed");
                }
                Err(e) => {
                    self.failed += 1;
                    warn!(operation = call.operation(), error = %e, "Remote call panicked");
                }
            }
        }

        info!(
            delivered = self.delivered,
            failed = self.failed,
            "Outbox drained"
        );
    }

    fn on_delivered(&mut self, call: &RemoteCall, delivered: Delivered) {
        match (call, delivered) {
            (RemoteCall::ReportWarning(kind), Delivered::Warning(id)) => {
                info!(kind = %kind, warning_id = %id, "Fraud warning raised");
                self.open_warning = Some(id);
            }
            (RemoteCall::CancelWarning, _) => match self.open_warning.take() {
                Some(id) => info!(warning_id = %id, "Fraud warning cancelled"),
                None => debug!("Cancelled a warning raised before this outbox started"),
            },
            (call, _) => debug!(operation = call.operation(), "Remote call delivered"),
        }
    }
}

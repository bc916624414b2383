//! # Barcode Source
//!
//! The main loop asks for at most one decoded code per iteration.

use tokio::sync::mpsc;
use tracing::debug;

use cart_core::Code;

use crate::error::{EngineError, EngineResult};

/// Anything that yields decoded barcodes.
///
/// `poll_code` must not block: the main loop calls it once per tick.
pub trait BarcodeSource: Send + 'static {
    fn poll_code(&mut self) -> Option<Code>;
}

/// Barcode source fed through a channel (decoder thread, console, tests).
pub struct ChannelBarcodeSource {
    rx: mpsc::Receiver<Code>,
}

/// Sending half of a [`ChannelBarcodeSource`].
#[derive(Debug, Clone)]
pub struct BarcodeSender {
    tx: mpsc::Sender<Code>,
}

impl ChannelBarcodeSource {
    /// Creates a source holding at most `capacity` unread codes.
    pub fn channel(capacity: usize) -> (BarcodeSender, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (BarcodeSender { tx }, ChannelBarcodeSource { rx })
    }
}

impl BarcodeSource for ChannelBarcodeSource {
    fn poll_code(&mut self) -> Option<Code> {
        self.rx.try_recv().ok()
    }
}

impl BarcodeSender {
    /// Queues an already decoded code.
    pub fn send(&self, code: Code) -> EngineResult<()> {
        self.tx
            .try_send(code)
            .map_err(|e| EngineError::ChannelError(format!("barcode queue: {}", e)))
    }

    /// Parses and queues a raw scanner string.
    pub fn scan(&self, raw: &str) -> EngineResult<()> {
        let code = Code::parse(raw)?;
        debug!(code = %code, "Barcode queued");
        self.send(code)
    }
}

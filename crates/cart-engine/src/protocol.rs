//! # Control Protocol
//!
//! Commands pushed to the cart by the store backend, decoded once at the
//! boundary.
//!
//! ## Wire Format
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  { "type": "<command>", "data": <optional payload> }                    │
//! │                                                                         │
//! │  generate_qr       ─► show pairing prompt                              │
//! │  session_started   ─► start the cart system       data: session id     │
//! │  payment_created   ─► freeze items, watch weight  data: payment id     │
//! │  end_session       ─► shut the cart system down   data: session id     │
//! │                                                                         │
//! │  LOCAL (console / service tools)                                       │
//! │  cancel_removal    ─► give up waiting for a removal scan               │
//! │  reset_cart        ─► empty the cart and re-tare                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Ids may arrive as a bare string or number, or as an object with an `id`
//! field (`session_id` / `payment_id` are accepted too).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, EngineResult};

/// A decoded control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    GenerateQr,
    SessionStarted { session_id: Option<String> },
    PaymentCreated { payment_id: Option<String> },
    EndSession { session_id: Option<String> },
    CancelRemoval,
    ResetCart,
}

/// Undecoded envelope as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCommand {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ControlCommand {
    /// Parses a JSON command line.
    pub fn from_json(json: &str) -> EngineResult<Self> {
        let raw: RawCommand = serde_json::from_str(json)?;
        Self::decode(raw)
    }

    /// Decodes an envelope, rejecting unknown command types.
    pub fn decode(raw: RawCommand) -> EngineResult<Self> {
        let data = raw.data.as_ref();
        let command = match raw.kind.as_str() {
            "generate_qr" => ControlCommand::GenerateQr,
            "session_started" => ControlCommand::SessionStarted {
                session_id: extract_id(data, "session_id"),
            },
            "payment_created" => ControlCommand::PaymentCreated {
                payment_id: extract_id(data, "payment_id"),
            },
            "end_session" => ControlCommand::EndSession {
                session_id: extract_id(data, "session_id"),
            },
            "cancel_removal" => ControlCommand::CancelRemoval,
            "reset_cart" => ControlCommand::ResetCart,
            other => {
                return Err(EngineError::InvalidCommand(format!(
                    "unknown command type: {}",
                    other
                )))
            }
        };
        Ok(command)
    }

    /// Wire name of the command.
    pub fn type_name(&self) -> &'static str {
        match self {
            ControlCommand::GenerateQr => "generate_qr",
            ControlCommand::SessionStarted { .. } => "session_started",
            ControlCommand::PaymentCreated { .. } => "payment_created",
            ControlCommand::EndSession { .. } => "end_session",
            ControlCommand::CancelRemoval => "cancel_removal",
            ControlCommand::ResetCart => "reset_cart",
        }
    }

    /// Encodes the command back into its envelope.
    pub fn to_raw(&self) -> RawCommand {
        let data = match self {
            ControlCommand::SessionStarted { session_id }
            | ControlCommand::EndSession { session_id } => session_id.clone().map(Value::String),
            ControlCommand::PaymentCreated { payment_id } => payment_id.clone().map(Value::String),
            _ => None,
        };
        RawCommand {
            kind: self.type_name().to_string(),
            data,
        }
    }
}

fn extract_id(data: Option<&Value>, field: &str) -> Option<String> {
    match data? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map
            .get(field)
            .or_else(|| map.get("id"))
            .and_then(|v| extract_id(Some(v), field)),
        _ => None,
    }
}

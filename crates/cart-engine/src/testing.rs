//! # Test Support
//!
//! A collaborator double that records every call, for asserting on the exact
//! sequence of remote calls and feedback a session produced.
//!
//! Compiled for this crate's tests and behind the `test-support` feature.

use std::sync::{Arc, Mutex, PoisonError};

use cart_core::{Code, FeedbackEvent, WarningKind};

use crate::collaborators::{
    CartApi, Collaborators, FeedbackSink, FraudReporter, ProductInfo, WarningId,
};
use crate::error::CollaboratorError;

/// One observed collaborator call.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    BindSession(String),
    Lookup(Code),
    Add(Code, f64),
    Remove(Code),
    ReportWarning(WarningKind),
    CancelWarning,
    Feedback(FeedbackEvent),
}

/// Records every call in order. Implements all three collaborator traits.
#[derive(Debug, Default)]
pub struct Recorder {
    calls: Mutex<Vec<RecordedCall>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wires one recorder in as every collaborator.
    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            cart_api: self.clone(),
            fraud: self.clone(),
            feedback: self.clone(),
        }
    }

    fn push(&self, call: RecordedCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    /// All calls so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Only the feedback events, in order.
    pub fn feedback(&self) -> Vec<FeedbackEvent> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::Feedback(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    /// Everything except feedback, in order.
    pub fn remote_calls(&self) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, RecordedCall::Feedback(_)))
            .collect()
    }
}

impl CartApi for Recorder {
    fn bind_session(&self, cart_id: &str) -> Result<(), CollaboratorError> {
        self.push(RecordedCall::BindSession(cart_id.to_string()));
        Ok(())
    }

    fn lookup_item(&self, code: &Code) -> Result<ProductInfo, CollaboratorError> {
        self.push(RecordedCall::Lookup(code.clone()));
        Ok(ProductInfo {
            code: code.clone(),
            name: None,
            price_cents: None,
        })
    }

    fn add_item(&self, code: &Code, weight_g: f64) -> Result<(), CollaboratorError> {
        self.push(RecordedCall::Add(code.clone(), weight_g));
        Ok(())
    }

    fn remove_item(&self, code: &Code) -> Result<(), CollaboratorError> {
        self.push(RecordedCall::Remove(code.clone()));
        Ok(())
    }
}

impl FraudReporter for Recorder {
    fn report_warning(&self, kind: WarningKind) -> Result<WarningId, CollaboratorError> {
        self.push(RecordedCall::ReportWarning(kind));
        Ok(WarningId(format!("recorded-{}", kind.as_str().replace(' ', "-"))))
    }

    fn cancel_warning(&self) -> Result<(), CollaboratorError> {
        self.push(RecordedCall::CancelWarning);
        Ok(())
    }
}

impl FeedbackSink for Recorder {
    fn signal(&self, event: FeedbackEvent) {
        self.push(RecordedCall::Feedback(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_keeps_order() {
        let recorder = Recorder::new();
        let collaborators = recorder.collaborators();
        let code = Code::parse("111").unwrap();

        collaborators.cart_api.lookup_item(&code).unwrap();
        collaborators.feedback.signal(FeedbackEvent::ItemScanned);
        collaborators.fraud.report_warning(WarningKind::WeightIncreased).unwrap();

        assert_eq!(
            recorder.calls(),
            vec![
                RecordedCall::Lookup(code),
                RecordedCall::Feedback(FeedbackEvent::ItemScanned),
                RecordedCall::ReportWarning(WarningKind::WeightIncreased),
            ]
        );
        assert_eq!(recorder.feedback(), vec![FeedbackEvent::ItemScanned]);
        assert_eq!(recorder.remote_calls().len(), 2);
    }
}

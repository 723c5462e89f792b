//! Receiver — the single entry point transports call per delivered envelope.
//!
//! Flow:
//! 1. Validator → wrong type/source short-circuits to `Rejected` (no decode)
//! 2. Decoder → malformed payload yields `DecodeFailed`
//! 3. Cancellation check → `Canceled` instead of a false acknowledgement
//! 4. File handler → `HandlerFailed` or `Acknowledged`
//!
//! No state survives between calls; a `Receiver` is shared across tasks via `Arc`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::envelope::Envelope;
use crate::pipeline::decoder::decode_data;
use crate::pipeline::handler::FileHandler;
use crate::pipeline::types::{ExpectedIdentity, Outcome};
use crate::pipeline::validator::validate;

/// Callback contract between a transport and the pipeline.
///
/// Every transport hands each delivery to a `Deliver` and turns the returned
/// `Outcome` into its own acknowledgement.
#[async_trait]
pub trait Deliver: Send + Sync {
    async fn deliver(&self, envelope: Envelope, cancel: &CancellationToken) -> Outcome;
}

/// Validates, decodes, and hands new-file events to a `FileHandler`.
pub struct Receiver {
    expected: ExpectedIdentity,
    handler: Arc<dyn FileHandler>,
}

impl Receiver {
    /// Create a receiver for one expected identity.
    pub fn new(expected: ExpectedIdentity, handler: Arc<dyn FileHandler>) -> Self {
        Self { expected, handler }
    }

    /// Run one envelope through the pipeline.
    pub async fn process(&self, envelope: &Envelope, cancel: &CancellationToken) -> Outcome {
        let id = envelope.id().unwrap_or("-");

        if let Err(rejection) = validate(envelope, &self.expected) {
            warn!(
                id,
                attribute = rejection.field.attribute(),
                expected = %rejection.expected,
                actual = %rejection.actual,
                "Rejecting envelope not addressed to this receiver"
            );
            return Outcome::Rejected(rejection);
        }

        let record = match decode_data(envelope.payload(), envelope.data_content_type()) {
            Ok(record) => record,
            Err(e) => {
                error!(
                    id,
                    content_type = envelope.data_content_type().unwrap_or("-"),
                    error = %e,
                    "Data conversion failed"
                );
                return Outcome::DecodeFailed { detail: e.detail };
            }
        };

        if cancel.is_cancelled() {
            warn!(id, path = %record.path, "Delivery canceled before processing");
            return Outcome::Canceled;
        }

        debug!(id, handler = self.handler.name(), path = %record.path, "Dispatching to handler");

        match self.handler.handle(&record).await {
            Ok(()) => {
                info!(
                    id,
                    path = %record.path,
                    event_time = ?envelope.time(),
                    "Envelope acknowledged"
                );
                Outcome::Acknowledged
            }
            Err(e) => {
                error!(
                    id,
                    handler = self.handler.name(),
                    path = %record.path,
                    error = %e,
                    "File handler failed"
                );
                Outcome::HandlerFailed {
                    detail: e.to_string(),
                }
            }
        }
    }
}

#[async_trait]
impl Deliver for Receiver {
    async fn deliver(&self, envelope: Envelope, cancel: &CancellationToken) -> Outcome {
        self.process(&envelope, cancel).await
    }
}

//! Shared types for the envelope pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::envelope::{NEW_FILE_EVENT_TYPE, SOURCE_PREFIX};

// ── Expected identity ───────────────────────────────────────────────

/// The event type and source this receiver accepts.
///
/// Built once at startup and injected into the `Receiver`; never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedIdentity {
    pub event_type: String,
    pub source: String,
}

impl ExpectedIdentity {
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            source: source.into(),
        }
    }

    /// Identity for new-file events addressed to `node_name`.
    pub fn for_node(node_name: &str) -> Self {
        Self::new(NEW_FILE_EVENT_TYPE, source_for_node(node_name))
    }
}

/// Source identity of a node, e.g. `jaconi.io/prepper/node-1`.
pub fn source_for_node(node_name: &str) -> String {
    format!("{SOURCE_PREFIX}/{node_name}")
}

// ── Decoded payload ─────────────────────────────────────────────────

/// A file announced by a new-file event. `path` is kept exactly as sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFileRecord {
    pub path: String,
}

// ── Rejection ───────────────────────────────────────────────────────

/// Which envelope attribute failed to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchField {
    TypeMismatch,
    SourceMismatch,
}

impl MismatchField {
    /// Attribute name for logs and receipts.
    pub fn attribute(&self) -> &'static str {
        match self {
            Self::TypeMismatch => "type",
            Self::SourceMismatch => "source",
        }
    }
}

/// An envelope that is well-formed but not addressed to this receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub field: MismatchField,
    pub expected: String,
    pub actual: String,
}

impl Rejection {
    pub fn new(field: MismatchField, expected: &str, actual: &str) -> Self {
        Self {
            field,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "wrong event {}: expected {} but was {}",
            self.field.attribute(),
            self.expected,
            self.actual
        )
    }
}

// ── Outcome ─────────────────────────────────────────────────────────

/// Terminal decision for one envelope. Exactly one is produced per delivery.
///
/// Transports translate this into their own acknowledgement: an HTTP status,
/// or a broker ack / withheld ack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Accepted, decoded, and handled.
    Acknowledged,
    /// Routing noise. Never redelivered.
    Rejected(Rejection),
    /// Correctly addressed, but the payload is malformed. The sender is at fault.
    DecodeFailed { detail: String },
    /// The handler failed. May be retried.
    HandlerFailed { detail: String },
    /// Delivery was canceled before the handler ran.
    Canceled,
}

impl Outcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Acknowledged => "acknowledged",
            Self::Rejected(_) => "rejected",
            Self::DecodeFailed { .. } => "decode_failed",
            Self::HandlerFailed { .. } => "handler_failed",
            Self::Canceled => "canceled",
        }
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Acknowledged)
    }

    /// Whether redelivering the same envelope could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::HandlerFailed { .. } | Self::Canceled)
    }

    /// Human-readable reason for a non-ack outcome.
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::Acknowledged => None,
            Self::Rejected(rejection) => Some(rejection.to_string()),
            Self::DecodeFailed { detail } | Self::HandlerFailed { detail } => Some(detail.clone()),
            Self::Canceled => Some("delivery canceled before processing".to_string()),
        }
    }
}

impl From<Rejection> for Outcome {
    fn from(rejection: Rejection) -> Self {
        Self::Rejected(rejection)
    }
}

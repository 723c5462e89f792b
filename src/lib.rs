//! prepper — gatekeeper for new-file events.
//!
//! Validates and decodes CloudEvents announcing new files, whether they arrive
//! by HTTP push or through a queue group, and reports one outcome per event.

pub mod config;
pub mod envelope;
pub mod error;
pub mod pipeline;
pub mod transport;

//! Envelope validation & result pipeline.
//!
//! Every delivered envelope flows through:
//! 1. `validator::validate()`: exact type, then source match
//! 2. `decoder::decode_data()`: payload to `NewFileRecord`, per data content type
//! 3. `FileHandler::handle()`: pluggable processing step
//!
//! and comes out as exactly one `Outcome`.

pub mod decoder;
pub mod handler;
pub mod processor;
pub mod types;
pub mod validator;

pub use handler::{FileHandler, LogPathHandler};
pub use processor::{Deliver, Receiver};
pub use types::{ExpectedIdentity, MismatchField, NewFileRecord, Outcome, Rejection};

//! Transport adapters.
//!
//! A transport owns the connection lifecycle and hands each delivery to a
//! `Deliver`. HTTP and queue-group delivery are interchangeable: both run the
//! same `Receiver` and differ only in how they acknowledge an `Outcome`.

pub mod http;
pub mod queue;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{ReceiverConfig, TransportKind};
use crate::error::{Result, TransportError};
use crate::pipeline::Deliver;

pub use http::HttpTransport;
pub use queue::QueueTransport;

/// A source of envelopes.
#[async_trait]
pub trait Transport: Send {
    /// Transport name (e.g. "http", "queue").
    fn name(&self) -> &str;

    /// Deliver envelopes to `receiver` until `shutdown` is canceled.
    async fn run(
        &mut self,
        receiver: Arc<dyn Deliver>,
        shutdown: CancellationToken,
    ) -> std::result::Result<(), TransportError>;
}

/// Build the transport selected by the configuration.
pub fn from_config(config: &ReceiverConfig) -> Box<dyn Transport> {
    match config.transport {
        TransportKind::Http => Box::new(HttpTransport::new(config.port)),
        TransportKind::Queue => Box::new(QueueTransport::new(config.queue_config())),
    }
}

/// Run the configured transport until shutdown.
pub async fn serve(
    config: &ReceiverConfig,
    receiver: Arc<dyn Deliver>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut transport = from_config(config);
    info!(transport = transport.name(), node = %config.node_name, "Starting transport");
    transport.run(receiver, shutdown).await?;
    info!(transport = transport.name(), "Transport stopped");
    Ok(())
}

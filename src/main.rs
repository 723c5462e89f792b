use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use prepper::config::{Args, ReceiverConfig};
use prepper::pipeline::{Deliver, LogPathHandler, Receiver};
use prepper::transport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = ReceiverConfig::from_args(args).context("invalid configuration")?;

    let expected = config.expected_identity();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        node = %config.node_name,
        event_type = %expected.event_type,
        source = %expected.source,
        transport = %config.transport,
        "Starting prepper receiver"
    );

    let receiver: Arc<dyn Deliver> = Arc::new(Receiver::new(expected, Arc::new(LogPathHandler)));

    // Ctrl-C cancels in-flight deliveries and stops the transport.
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown signal received");
        signal.cancel();
    });

    transport::serve(&config, receiver, shutdown)
        .await
        .with_context(|| format!("{} transport failed", config.transport))?;

    Ok(())
}

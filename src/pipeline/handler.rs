//! File handlers run once an event is accepted.

use async_trait::async_trait;
use tracing::info;

use crate::error::HandlerError;
use crate::pipeline::types::NewFileRecord;

/// Processing step run for every accepted, decoded new-file event.
///
/// Implementations must be safe to call concurrently: one call per delivery.
#[async_trait]
pub trait FileHandler: Send + Sync {
    /// Handler name for logs.
    fn name(&self) -> &str;

    /// Process one announced file.
    async fn handle(&self, record: &NewFileRecord) -> Result<(), HandlerError>;
}

/// Default handler: records the announced path and does nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPathHandler;

#[async_trait]
impl FileHandler for LogPathHandler {
    fn name(&self) -> &str {
        "log-path"
    }

    async fn handle(&self, record: &NewFileRecord) -> Result<(), HandlerError> {
        info!(path = %record.path, "New file announced");
        Ok(())
    }
}

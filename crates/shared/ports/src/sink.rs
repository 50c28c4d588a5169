use async_trait::async_trait;
use tickvault_core::Message;

use crate::error::WriteError;

/// Port for durable, append-only message storage
///
/// Implementations should tolerate duplicate appends of the same message.
#[async_trait]
pub trait MessageSink: Send + Sync + 'static {
    async fn append(&self, message: &Message) -> Result<(), WriteError>;

    /// Flush buffered writes, if any
    async fn flush(&self) -> Result<(), WriteError> {
        Ok(())
    }
}

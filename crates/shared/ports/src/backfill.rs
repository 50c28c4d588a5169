use async_trait::async_trait;
use tickvault_core::{Channel, Message, ProductId, SequenceNumber};

use crate::error::FetchError;

/// Port for fetching historical messages over a secondary data source
///
/// Implements Interface Segregation - only range fetching capability.
#[async_trait]
pub trait BackfillSource: Send + Sync + 'static {
    /// Fetch messages with `from <= sequence <= to`, ordered by sequence.
    async fn fetch_range(
        &self,
        product: &ProductId,
        channel: Channel,
        from: SequenceNumber,
        to: SequenceNumber,
    ) -> Result<Vec<Message>, FetchError>;
}

use async_trait::async_trait;
use tickvault_core::{Frame, SessionId};

use crate::error::TransportError;

/// Port for opening transport sessions
///
/// Each successful `connect` performs a fresh handshake and yields a new
/// session; sessions are never reused across reconnects.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Session: Session;

    async fn connect(&self) -> Result<Self::Session, TransportError>;
}

/// One physical, bidirectional transport session
#[async_trait]
pub trait Session: Send + 'static {
    fn id(&self) -> SessionId;

    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Wait for the next inbound frame.
    ///
    /// Must be cancel-safe: dropping the future before it resolves loses no frame.
    async fn receive(&mut self) -> Frame;

    async fn close(&mut self);
}

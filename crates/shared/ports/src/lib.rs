//! Tickvault Ports
//!
//! Collaborator boundaries for the ingester. The connection state machine,
//! pipeline and gap recovery depend only on these traits; concrete adapters
//! (WebSocket, REST, file storage) live in infrastructure.

mod backfill;
mod codec;
mod error;
mod sink;
mod transport;

pub use backfill::BackfillSource;
pub use codec::{FeedCodec, FeedEvent, FeedRequest};
pub use error::{CodecError, FetchError, TransportError, WriteError};
pub use sink::MessageSink;
pub use transport::{Session, Transport};

//! Tickvault Core Domain
//!
//! Pure value types shared by every tickvault crate: products, channels,
//! subscription keys, sequenced messages and transport frames.
//! This crate contains no async and no I/O.

mod frame;
mod identifiers;
mod message;

pub use frame::{CloseReason, Frame};
pub use identifiers::{Channel, ParseChannelError, ProductId, SessionId, SubscriptionKey};
pub use message::{GapRange, Message, SequenceNumber, Timestamp};

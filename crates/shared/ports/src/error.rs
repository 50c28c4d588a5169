use thiserror::Error;

/// Transport-level failures. Every one of these ends the current session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Session closed")]
    Closed,
}

/// Wire encoding/decoding failures. Never affect connection state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Encode failed: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError::Malformed(err.to_string())
    }
}

/// Domain error for backfill fetches
///
/// Infrastructure implementations convert their specific errors to this type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {code}: {message}")]
    Api { code: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Fetch timed out")]
    Timeout,
}

/// Persistence failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for WriteError {
    fn from(err: std::io::Error) -> Self {
        WriteError::Io(err.to_string())
    }
}

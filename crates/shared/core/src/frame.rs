use std::fmt;

/// Close frame details sent by the remote side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code, self.reason)
    }
}

/// One inbound frame from a transport session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    /// Remote closed the session
    Close(Option<CloseReason>),
    /// Read error; the session is unusable
    Error(String),
    /// Control frames (ping/pong) and anything else
    Other,
}

impl Frame {
    pub fn text(text: impl Into<String>) -> Self {
        Frame::Text(text.into())
    }

    /// True for frames that end the session
    pub fn is_terminal(&self) -> bool {
        matches!(self, Frame::Close(_) | Frame::Error(_))
    }
}

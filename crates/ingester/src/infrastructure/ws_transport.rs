use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tickvault_core::{CloseReason, Frame, SessionId};
use tickvault_ports::{Session, Transport, TransportError};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Error, Debug)]
pub enum WsError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),
    #[error("Connection error: {0}")]
    Connection(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Convert infrastructure WsError to domain TransportError
impl From<WsError> for TransportError {
    fn from(err: WsError) -> Self {
        TransportError::Connect(err.to_string())
    }
}

/// WebSocket transport
/// Infrastructure component - every `connect` performs a fresh handshake
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: Url,
}

impl WsTransport {
    pub fn new(url: &str) -> Result<Self, WsError> {
        let url = Url::parse(url)?;
        match url.scheme() {
            "ws" | "wss" => Ok(WsTransport { url }),
            other => Err(WsError::UnsupportedScheme(other.to_string())),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn handshake(&self) -> Result<WsSession, WsError> {
        let (stream, response) = connect_async(self.url.as_str()).await?;
        tracing::debug!(
            url = %self.url,
            status = %response.status(),
            headers = ?response.headers(),
            "WebSocket handshake complete"
        );

        let (write, read) = stream.split();
        Ok(WsSession {
            id: SessionId::new(),
            write,
            read,
            closed: false,
        })
    }
}

#[async_trait]
impl Transport for WsTransport {
    type Session = WsSession;

    async fn connect(&self) -> Result<WsSession, TransportError> {
        Ok(self.handshake().await?)
    }
}

/// One WebSocket connection
pub struct WsSession {
    id: SessionId,
    write: SplitSink<WsStream, WsMessage>,
    read: SplitStream<WsStream>,
    closed: bool,
}

#[async_trait]
impl Session for WsSession {
    fn id(&self) -> SessionId {
        self.id
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.write
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    // `StreamExt::next` on the split stream is cancel-safe
    async fn receive(&mut self) -> Frame {
        match self.read.next().await {
            Some(Ok(message)) => to_frame(message),
            Some(Err(e)) => Frame::Error(e.to_string()),
            None => Frame::Close(None),
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.write.close().await {
            tracing::debug!(session = %self.id, error = %e, "Close handshake failed");
        }
    }
}

fn to_frame(message: WsMessage) -> Frame {
    match message {
        WsMessage::Text(text) => Frame::Text(text.as_str().to_owned()),
        WsMessage::Binary(data) => Frame::Binary(data.to_vec()),
        WsMessage::Close(close) => Frame::Close(close.map(|c| CloseReason {
            code: u16::from(c.code),
            reason: c.reason.as_str().to_owned(),
        })),
        WsMessage::Ping(data) => {
            tracing::trace!("Received ping: {:?}", data);
            Frame::Other
        }
        WsMessage::Pong(_) | WsMessage::Frame(_) => Frame::Other,
    }
}

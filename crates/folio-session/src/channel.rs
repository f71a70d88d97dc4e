//! Bidirectional, ordered text message channel used by a session.
//!
//! The session only needs `send`, `recv` and `close` with FIFO delivery and
//! no message loss. `WsChannel` is the production transport; `MemoryChannel`
//! is an in-process duplex for simulations and tests.

use std::future::Future;

use folio_core::{FolioError, FolioResult};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// A single-owner message channel. At most one exchange is in flight at a time,
/// which `&mut self` enforces.
pub trait Channel: Send {
    fn send(&mut self, text: String) -> impl Future<Output = FolioResult<()>> + Send;

    /// Wait for the next inbound text message.
    fn recv(&mut self) -> impl Future<Output = FolioResult<String>> + Send;

    fn close(&mut self) -> impl Future<Output = FolioResult<()>> + Send;
}

// ── Websocket ─────────────────────────────────────────────────────────────────

/// Websocket transport (ws:// or wss://)
pub struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsChannel {
    pub async fn connect(url: &str) -> FolioResult<Self> {
        let (stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| FolioError::Transport(format!("connecting to {url}: {e}")))?;
        debug!(url, status = %response.status(), "websocket connected");
        Ok(Self { stream })
    }
}

impl Channel for WsChannel {
    async fn send(&mut self, text: String) -> FolioResult<()> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| FolioError::Transport(format!("websocket send: {e}")))
    }

    async fn recv(&mut self) -> FolioResult<String> {
        while let Some(message) = self.stream.next().await {
            match message.map_err(|e| FolioError::Transport(format!("websocket recv: {e}")))? {
                Message::Text(text) => return Ok(text.as_str().to_owned()),
                Message::Binary(data) => {
                    return String::from_utf8(data.to_vec())
                        .map_err(|_| FolioError::protocol("binary frame is not UTF-8"));
                }
                Message::Close(frame) => {
                    return Err(FolioError::Transport(format!(
                        "channel closed by peer: {frame:?}"
                    )));
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
        Err(FolioError::Transport("channel closed".into()))
    }

    async fn close(&mut self) -> FolioResult<()> {
        self.stream
            .close(None)
            .await
            .map_err(|e| FolioError::Transport(format!("websocket close: {e}")))
    }
}

// ── In-memory ─────────────────────────────────────────────────────────────────

/// One end of an in-process duplex channel.
pub struct MemoryChannel {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl MemoryChannel {
    /// Two connected ends: what one sends, the other receives.
    pub fn pair() -> (MemoryChannel, MemoryChannel) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            MemoryChannel {
                tx: Some(a_tx),
                rx: a_rx,
            },
            MemoryChannel {
                tx: Some(b_tx),
                rx: b_rx,
            },
        )
    }
}

impl Channel for MemoryChannel {
    async fn send(&mut self, text: String) -> FolioResult<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| FolioError::Transport("channel already closed".into()))?;
        tx.send(text)
            .map_err(|_| FolioError::Transport("peer disconnected".into()))
    }

    async fn recv(&mut self) -> FolioResult<String> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| FolioError::Transport("channel closed".into()))
    }

    async fn close(&mut self) -> FolioResult<()> {
        // Peer drains what was already sent, then sees end-of-stream
        self.tx = None;
        self.rx.close();
        Ok(())
    }
}

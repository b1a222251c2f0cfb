//! WebSocket transport over tokio-tungstenite

use crate::traits::{
    CloseReason, Connector, Frame, FrameSink, FrameStream, Result, TetherError, Transport,
};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Transport produced by [`WsConnector`]
pub type ClientWsTransport = WsTransport<MaybeTlsStream<TcpStream>>;

/// Transport produced by [`accept`]
pub type ServerWsTransport = WsTransport<TcpStream>;

pub struct WsTransport<S> {
    stream: WebSocketStream<S>,
}

impl<S> WsTransport<S> {
    pub fn new(stream: WebSocketStream<S>) -> Self {
        Self { stream }
    }
}

pub struct WsSink<S> {
    inner: SplitSink<WebSocketStream<S>, Message>,
}

pub struct WsStream<S> {
    inner: SplitStream<WebSocketStream<S>>,
}

impl<S> Transport for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Sink = WsSink<S>;
    type Stream = WsStream<S>;

    const ANSWERS_PINGS: bool = true;

    fn split(self) -> (WsSink<S>, WsStream<S>) {
        let (sink, stream) = self.stream.split();
        (WsSink { inner: sink }, WsStream { inner: stream })
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(data) => Message::Binary(data),
        Frame::Ping(data) => Message::Ping(data),
        Frame::Pong(data) => Message::Pong(data),
        Frame::Close(reason) => Message::Close(reason.map(|r| CloseFrame {
            code: CloseCode::from(r.code),
            reason: r.reason.into(),
        })),
    }
}

fn from_message(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text)),
        Message::Binary(data) => Some(Frame::Binary(data)),
        Message::Ping(data) => Some(Frame::Ping(data)),
        Message::Pong(data) => Some(Frame::Pong(data)),
        Message::Close(frame) => Some(Frame::Close(
            frame.map(|f| CloseReason::new(u16::from(f.code), f.reason.into_owned())),
        )),
        // Raw frames are never surfaced while reading
        Message::Frame(_) => None,
    }
}

#[async_trait]
impl<S> FrameSink for WsSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.inner
            .send(to_message(frame))
            .await
            .map_err(|e| TetherError::Transport(e.to_string()))
    }

    async fn close(&mut self, reason: Option<CloseReason>) -> Result<()> {
        let result = self
            .inner
            .send(to_message(Frame::Close(reason)))
            .await
            .map_err(|e| TetherError::Transport(e.to_string()));
        if let Err(e) = self.inner.close().await {
            debug!("WebSocket close after close frame: {}", e);
        }
        result
    }
}

#[async_trait]
impl<S> FrameStream for WsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn next(&mut self) -> Option<Result<Frame>> {
        loop {
            match self.inner.next().await? {
                Ok(message) => {
                    if let Some(frame) = from_message(message) {
                        return Some(Ok(frame));
                    }
                }
                Err(e) => return Some(Err(TetherError::Transport(e.to_string()))),
            }
        }
    }
}

fn ws_config(max_message_size: usize) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_message_size);
    config.max_frame_size = Some(max_message_size);
    config
}

/// Client-side connector dialing a `ws://` / `wss://` URL
pub struct WsConnector {
    url: String,
    max_message_size: Option<usize>,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_message_size: None,
        }
    }

    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = Some(bytes);
        self
    }
}

#[async_trait]
impl Connector<ClientWsTransport> for WsConnector {
    async fn connect(&self) -> Result<ClientWsTransport> {
        let config = self.max_message_size.map(ws_config);
        let (stream, _response) =
            tokio_tungstenite::connect_async_with_config(self.url.as_str(), config, false)
                .await
                .map_err(|e| TetherError::Transport(e.to_string()))?;
        debug!(url = %self.url, "WebSocket handshake complete");
        Ok(WsTransport::new(stream))
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}

/// Complete the server side handshake on an accepted TCP stream
///
/// Inbound messages larger than `max_message_size` fail the read, which
/// the managed connection treats as a lost transport.
pub async fn accept(stream: TcpStream, max_message_size: usize) -> Result<ServerWsTransport> {
    let stream =
        tokio_tungstenite::accept_async_with_config(stream, Some(ws_config(max_message_size)))
            .await
            .map_err(|e| TetherError::Transport(e.to_string()))?;
    Ok(WsTransport::new(stream))
}

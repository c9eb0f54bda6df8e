//! WebSocket links
//!
//! Each WebSocket message carries exactly one envelope, so no delimiter
//! framing is applied. Text and binary messages are both read; what is
//! written depends on [`WebSocketConfig::binary_frames`].

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::{
    Message as WsMessage, WebSocketConfig as ProtocolConfig,
};
use tokio_tungstenite::{
    accept_async_with_config, connect_async_with_config, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::link::{self, LinkReceiver, LinkSender, LinkState};
use crate::traits::{Transport, TransportEvent, TransportServer};

/// Per-link WebSocket settings
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Larger inbound messages fail the link
    pub max_message_size: usize,
    /// Write binary messages instead of text
    pub binary_frames: bool,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: patchbay_core::MAX_FRAME_SIZE,
            binary_frames: false,
        }
    }
}

impl WebSocketConfig {
    fn protocol(&self) -> ProtocolConfig {
        let mut protocol = ProtocolConfig::default();
        protocol.max_message_size = Some(self.max_message_size);
        protocol.max_frame_size = Some(self.max_message_size);
        protocol
    }
}

/// Dials WebSocket links
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    config: WebSocketConfig,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: WebSocketConfig) -> Self {
        Self { config }
    }

    /// Open a link to a `ws://` or `wss://` url
    pub async fn open(&self, url: &str) -> Result<(LinkSender, LinkReceiver)> {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(TransportError::InvalidUrl(url.to_string()));
        }

        let (socket, response) = connect_async_with_config(url, Some(self.config.protocol()), true)
            .await
            .map_err(|e| TransportError::ConnectionFailed {
                addr: url.to_string(),
                reason: e.to_string(),
            })?;
        debug!("WebSocket {} answered {}", url, response.status());

        let peer = peer_of(socket.get_ref());
        Ok(start_link(socket, peer, self.config.binary_frames))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    type Sender = LinkSender;
    type Receiver = LinkReceiver;

    async fn connect(url: &str) -> Result<(LinkSender, LinkReceiver)> {
        WebSocketTransport::new().open(url).await
    }
}

/// Accepts WebSocket links
pub struct WebSocketServer {
    listener: TcpListener,
    config: WebSocketConfig,
}

impl WebSocketServer {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::BindFailed {
                addr: addr.to_string(),
                source,
            })?;
        info!("WebSocket listening on {}", addr);
        Ok(Self {
            listener,
            config: WebSocketConfig::default(),
        })
    }

    pub fn with_config(mut self, config: WebSocketConfig) -> Self {
        self.config = config;
        self
    }
}

#[async_trait]
impl TransportServer for WebSocketServer {
    type Sender = LinkSender;
    type Receiver = LinkReceiver;

    async fn accept(&mut self) -> Result<(LinkSender, LinkReceiver, SocketAddr)> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let socket = accept_async_with_config(stream, Some(self.config.protocol()))
            .await
            .map_err(|e| TransportError::Handshake {
                peer: peer.to_string(),
                reason: e.to_string(),
            })?;
        debug!("WebSocket peer {} upgraded", peer);

        let (sender, receiver) = start_link(socket, peer, self.config.binary_frames);
        Ok((sender, receiver, peer))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

fn peer_of(stream: &MaybeTlsStream<TcpStream>) -> SocketAddr {
    let unknown = SocketAddr::from(([0, 0, 0, 0], 0));
    match stream {
        MaybeTlsStream::Plain(tcp) => tcp.peer_addr().unwrap_or(unknown),
        _ => unknown,
    }
}

fn start_link<S>(socket: WebSocketStream<S>, peer: SocketAddr, binary: bool) -> (LinkSender, LinkReceiver)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, receiver, tasks) = link::open(peer);
    let (sink, stream) = socket.split();
    tokio::spawn(write_messages(sink, tasks.outbound, tasks.state.clone(), binary));
    tokio::spawn(read_messages(stream, tasks.events, tasks.state));
    (sender, receiver)
}

fn to_ws_message(frame: Bytes, binary: bool) -> WsMessage {
    if binary {
        return WsMessage::Binary(frame.to_vec());
    }
    match String::from_utf8(frame.to_vec()) {
        Ok(text) => WsMessage::Text(text),
        Err(e) => WsMessage::Binary(e.into_bytes()),
    }
}

async fn write_messages<S>(
    mut sink: SplitSink<WebSocketStream<S>, WsMessage>,
    mut outbound: mpsc::Receiver<Bytes>,
    state: Arc<LinkState>,
    binary: bool,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            frame = outbound.recv() => frame,
            _ = state.close_requested() => None,
        };
        let Some(frame) = frame else { break };
        if let Err(e) = sink.send(to_ws_message(frame, binary)).await {
            warn!("WebSocket write failed: {}", e);
            break;
        }
    }

    while let Ok(frame) = outbound.try_recv() {
        if sink.send(to_ws_message(frame, binary)).await.is_err() {
            break;
        }
    }
    state.mark_closed();
    let _ = sink.send(WsMessage::Close(None)).await;
    let _ = sink.close().await;
}

async fn read_messages<S>(
    mut stream: SplitStream<WebSocketStream<S>>,
    events: mpsc::Sender<TransportEvent>,
    state: Arc<LinkState>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let reason = loop {
        let next = tokio::select! {
            next = stream.next() => next,
            _ = events.closed() => break None,
        };
        let frame = match next {
            None => break None,
            Some(Ok(WsMessage::Text(text))) => Bytes::from(text),
            Some(Ok(WsMessage::Binary(data))) => Bytes::from(data),
            Some(Ok(WsMessage::Close(frame))) => {
                break frame
                    .filter(|f| !f.reason.is_empty())
                    .map(|f| f.reason.to_string());
            }
            // Ping, pong and raw frames are handled by tungstenite
            Some(Ok(_)) => continue,
            Some(Err(e)) => break Some(e.to_string()),
        };
        if events.send(TransportEvent::Frame(frame)).await.is_err() {
            state.mark_closed();
            return;
        }
    };

    state.mark_closed();
    let _ = events.send(TransportEvent::Closed { reason }).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{TransportReceiver, TransportSender};

    async fn next_frame(receiver: &mut LinkReceiver) -> Bytes {
        loop {
            match receiver.recv().await {
                Some(TransportEvent::Opened) => continue,
                Some(TransportEvent::Frame(frame)) => return frame,
                other => panic!("expected a frame, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_default_config() {
        let config = WebSocketConfig::default();
        assert_eq!(config.max_message_size, 64 * 1024);
        assert!(!config.binary_frames);
    }

    #[test]
    fn test_outbound_message_kind() {
        let json = Bytes::from_static(b"{}");
        assert!(matches!(to_ws_message(json.clone(), false), WsMessage::Text(_)));
        assert!(matches!(to_ws_message(json, true), WsMessage::Binary(_)));
        assert!(matches!(
            to_ws_message(Bytes::from_static(&[0xff, 0xfe]), false),
            WsMessage::Binary(_)
        ));
    }

    #[tokio::test]
    async fn test_rejects_non_websocket_url() {
        let result = WebSocketTransport::new().open("http://localhost:1").await;
        assert!(matches!(result, Err(TransportError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_echo_then_close() {
        let mut server = WebSocketServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let echo = tokio::spawn(async move {
            let (sender, mut receiver, _peer) = server.accept().await.unwrap();
            let frame = next_frame(&mut receiver).await;
            sender.send(frame).await.unwrap();
            receiver.recv().await
        });

        let (sender, mut receiver) = WebSocketTransport::connect(&format!("ws://{}", addr))
            .await
            .unwrap();
        let payload = Bytes::from_static(b"{\"type\":\"create\"}");
        sender.send(payload.clone()).await.unwrap();
        assert_eq!(next_frame(&mut receiver).await, payload);

        sender.close();
        assert!(matches!(
            echo.await.unwrap(),
            Some(TransportEvent::Closed { .. })
        ));
    }
}

//! Delimiter-framed TCP
//!
//! Every outbound frame is wrapped by [`encode_frame`]; inbound bytes go
//! through a [`FrameDecoder`], so frames survive any fragmentation the peer's
//! writes see on the wire.

use async_trait::async_trait;
use bytes::Bytes;
use socket2::{SockRef, TcpKeepalive};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::framing::{encode_frame, FrameDecoder};
use crate::link::{self, LinkReceiver, LinkSender, LinkState};
use crate::traits::{Transport, TransportEvent, TransportServer};

/// Per-link TCP settings
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Larger inbound frames are discarded
    pub max_frame_size: usize,
    /// Idle time before keepalive probes start; `None` leaves the OS default
    pub keepalive: Option<Duration>,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            max_frame_size: patchbay_core::MAX_FRAME_SIZE,
            keepalive: Some(Duration::from_secs(30)),
        }
    }
}

/// Dials framed TCP links
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    config: TcpConfig,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TcpConfig) -> Self {
        Self { config }
    }

    pub async fn dial(&self, addr: &str) -> Result<(LinkSender, LinkReceiver)> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        let peer = stream.peer_addr()?;
        debug!("Dialed {}", peer);
        Ok(start_link(stream, peer, &self.config))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Sender = LinkSender;
    type Receiver = LinkReceiver;

    async fn connect(addr: &str) -> Result<(LinkSender, LinkReceiver)> {
        TcpTransport::new().dial(addr).await
    }
}

/// Accepts framed TCP links
pub struct TcpServer {
    listener: TcpListener,
    config: TcpConfig,
}

impl TcpServer {
    pub async fn bind(addr: &str) -> Result<Self> {
        Self::bind_with_config(addr, TcpConfig::default()).await
    }

    pub async fn bind_with_config(addr: &str, config: TcpConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::BindFailed {
                addr: addr.to_string(),
                source,
            })?;
        info!("TCP listening on {}", addr);
        Ok(Self { listener, config })
    }
}

#[async_trait]
impl TransportServer for TcpServer {
    type Sender = LinkSender;
    type Receiver = LinkReceiver;

    async fn accept(&mut self) -> Result<(LinkSender, LinkReceiver, SocketAddr)> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        debug!("TCP peer {} accepted", peer);
        let (sender, receiver) = start_link(stream, peer, &self.config);
        Ok((sender, receiver, peer))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

fn start_link(stream: TcpStream, peer: SocketAddr, config: &TcpConfig) -> (LinkSender, LinkReceiver) {
    if let Some(idle) = config.keepalive {
        let keepalive = TcpKeepalive::new().with_time(idle);
        if let Err(e) = SockRef::from(&stream).set_tcp_keepalive(&keepalive) {
            warn!("Keepalive not set for {}: {}", peer, e);
        }
    }
    let _ = stream.set_nodelay(true);

    let (sender, receiver, tasks) = link::open(peer);
    let (read_half, write_half) = stream.into_split();
    tokio::spawn(write_frames(write_half, tasks.outbound, tasks.state.clone(), peer));
    tokio::spawn(read_frames(
        read_half,
        FrameDecoder::with_max_frame_size(config.max_frame_size),
        tasks.events,
        tasks.state,
    ));
    (sender, receiver)
}

/// Drain the outbound queue until every sender is gone or a close is requested
async fn write_frames(
    mut socket: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Bytes>,
    state: Arc<LinkState>,
    peer: SocketAddr,
) {
    loop {
        let frame = tokio::select! {
            frame = outbound.recv() => frame,
            _ = state.close_requested() => None,
        };
        let Some(frame) = frame else { break };
        if let Err(e) = socket.write_all(&encode_frame(&frame)).await {
            warn!("Write to {} failed: {}", peer, e);
            break;
        }
    }

    // Frames queued before the close still go out
    while let Ok(frame) = outbound.try_recv() {
        if socket.write_all(&encode_frame(&frame)).await.is_err() {
            break;
        }
    }
    state.mark_closed();
    let _ = socket.shutdown().await;
}

/// Split the byte stream into frames until EOF, an error, or nobody listens
async fn read_frames(
    mut socket: OwnedReadHalf,
    mut decoder: FrameDecoder,
    events: mpsc::Sender<TransportEvent>,
    state: Arc<LinkState>,
) {
    let reason = loop {
        let read = tokio::select! {
            read = socket.read_buf(decoder.buffer_mut()) => read,
            _ = events.closed() => break None,
        };
        match read {
            Ok(0) => break None,
            Ok(_) => {
                while let Some(frame) = decoder.next_frame() {
                    if events.send(TransportEvent::Frame(frame)).await.is_err() {
                        state.mark_closed();
                        return;
                    }
                }
            }
            Err(e) => break Some(e.to_string()),
        }
    };

    state.mark_closed();
    let _ = events.send(TransportEvent::Closed { reason }).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{TransportReceiver, TransportSender};
    use patchbay_core::FRAME_DELIMITER;

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
        let config = TcpConfig::default();
        assert_eq!(config.max_frame_size, 64 * 1024);
        assert_eq!(config.keepalive, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_frames_cross_in_both_directions() {
        let mut server = TcpServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let echo = tokio::spawn(async move {
            let (sender, mut receiver, _peer) = server.accept().await.unwrap();
            let frame = next_frame(&mut receiver).await;
            sender.send(frame).await.unwrap();
            receiver.recv().await
        });

        let (sender, mut receiver) = TcpTransport::connect(&addr.to_string()).await.unwrap();
        let payload = Bytes::from_static(b"{\"type\":\"control\"}");
        sender.send(payload.clone()).await.unwrap();
        assert_eq!(next_frame(&mut receiver).await, payload);

        sender.close();
        assert_eq!(
            echo.await.unwrap(),
            Some(TransportEvent::Closed { reason: None })
        );
    }

    #[tokio::test]
    async fn test_fragmented_writes_yield_whole_frames() {
        let mut server = TcpServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let mut raw = TcpStream::connect(addr).await.unwrap();
        let (_sender, mut receiver, _peer) = server.accept().await.unwrap();

        raw.write_all(&[FRAME_DELIMITER]).await.unwrap();
        raw.write_all(b"{\"a\":").await.unwrap();
        raw.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        raw.write_all(b"1}").await.unwrap();
        raw.write_all(&[FRAME_DELIMITER, FRAME_DELIMITER]).await.unwrap();
        raw.write_all(b"{\"b\":2}").await.unwrap();
        raw.write_all(&[FRAME_DELIMITER]).await.unwrap();

        assert_eq!(next_frame(&mut receiver).await, Bytes::from_static(b"{\"a\":1}"));
        assert_eq!(next_frame(&mut receiver).await, Bytes::from_static(b"{\"b\":2}"));

        drop(raw);
        assert_eq!(
            receiver.recv().await,
            Some(TransportEvent::Closed { reason: None })
        );
        assert_eq!(receiver.recv().await, None);
    }

    #[tokio::test]
    async fn test_unreachable_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let result = TcpTransport::connect(&addr.to_string()).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed { .. })));
    }
}

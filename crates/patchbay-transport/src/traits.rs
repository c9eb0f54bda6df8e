//! Seams between the byte transports and the connectors above them

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;

use crate::error::Result;

/// What a link reports to its reader
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The link is up; always the first event
    Opened,
    /// One complete frame from the peer
    Frame(Bytes),
    /// The link is gone; always the last event. `None` for an orderly close.
    Closed { reason: Option<String> },
}

/// Outbound half of a link
#[async_trait]
pub trait TransportSender: Send + Sync {
    /// Queue a frame, waiting for room in the outbound queue
    async fn send(&self, frame: Bytes) -> Result<()>;

    /// Queue a frame or fail at once with [`BufferFull`](crate::TransportError::BufferFull)
    fn try_send(&self, frame: Bytes) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Flush what is queued, then close the link
    fn close(&self);
}

/// Inbound half of a link
#[async_trait]
pub trait TransportReceiver: Send {
    /// `None` once the link has reported [`TransportEvent::Closed`]
    async fn recv(&mut self) -> Option<TransportEvent>;
}

/// Dialing side
#[async_trait]
pub trait Transport: Send + Sync {
    type Sender: TransportSender;
    type Receiver: TransportReceiver;

    async fn connect(addr: &str) -> Result<(Self::Sender, Self::Receiver)>
    where
        Self: Sized;
}

/// Listening side
#[async_trait]
pub trait TransportServer: Send + Sync {
    type Sender: TransportSender;
    type Receiver: TransportReceiver;

    /// Wait for the next peer and open a link to it
    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)>;

    fn local_addr(&self) -> Result<SocketAddr>;
}

//! Connector and connection abstractions

use async_trait::async_trait;
use patchbay_core::HubMessage;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::Result;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Liveness flag shared by a connector, its connection and its workers
#[derive(Debug, Clone, Default)]
pub(crate) struct RunState(Arc<AtomicBool>);

impl RunState {
    pub(crate) fn is_live(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn set_live(&self, live: bool) {
        self.0.store(live, Ordering::Release);
    }
}

/// Hub-wide unique connection identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a fresh id
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Closed set of connector kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectorKind {
    Tcp,
    WebSocket,
    Osc,
    Midi,
}

impl ConnectorKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "tcp" => Some(ConnectorKind::Tcp),
            "websocket" | "ws" => Some(ConnectorKind::WebSocket),
            "osc" => Some(ConnectorKind::Osc),
            "midi" => Some(ConnectorKind::Midi),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorKind::Tcp => "tcp",
            ConnectorKind::WebSocket => "websocket",
            ConnectorKind::Osc => "osc",
            ConnectorKind::Midi => "midi",
        }
    }
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One live peer of a connector
///
/// `send_message` never blocks: it queues the message on the underlying
/// transport and fails if the queue is full or the peer is gone.
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnectionId;

    fn kind(&self) -> ConnectorKind;

    /// Human-readable peer description, for logs
    fn peer(&self) -> String;

    fn send_message(&self, message: &HubMessage) -> Result<()>;

    fn is_connected(&self) -> bool;
}

/// Events reported by a running connector
pub enum ConnectorEvent {
    /// A connection opened. `inbound` yields its parsed messages in arrival
    /// order and closes when the connection does.
    Connected {
        connection: Arc<dyn Connection>,
        inbound: mpsc::Receiver<HubMessage>,
    },
    /// A connection closed
    Disconnected {
        connection: ConnectionId,
        reason: Option<String>,
    },
}

impl fmt::Debug for ConnectorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorEvent::Connected { connection, .. } => f
                .debug_struct("Connected")
                .field("connection", &connection.id())
                .field("peer", &connection.peer())
                .finish(),
            ConnectorEvent::Disconnected { connection, reason } => f
                .debug_struct("Disconnected")
                .field("connection", connection)
                .field("reason", reason)
                .finish(),
        }
    }
}

/// A transport endpoint or device that produces connections
#[async_trait]
pub trait Connector: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ConnectorKind;

    /// Bind or open the endpoint and start reporting to `events`.
    /// Fails with `AlreadyStarted` if running.
    async fn start(&mut self, events: mpsc::Sender<ConnectorEvent>) -> Result<()>;

    /// Stop accepting and close open connections. Safe to call repeatedly.
    async fn stop(&mut self) -> Result<()>;

    fn is_running(&self) -> bool;

    /// Bound address, once started (network connectors only)
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

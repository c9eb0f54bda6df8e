//! Connection halves shared by the stream transports
//!
//! A link owns two background tasks: a writer draining a bounded queue of
//! outbound frames, and a reader turning socket input into
//! [`TransportEvent`]s. The caller keeps a [`LinkSender`] and a
//! [`LinkReceiver`]; both transports hand out the same pair.

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

use crate::error::{Result, TransportError};
use crate::traits::{TransportEvent, TransportReceiver, TransportSender};

/// Outbound frames and inbound events buffered per link
pub(crate) const LINK_QUEUE_DEPTH: usize = 1000;

/// Open/closed flag plus the close request seen by the writer
pub(crate) struct LinkState {
    open: AtomicBool,
    close_requested: Notify,
}

impl LinkState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            open: AtomicBool::new(true),
            close_requested: Notify::new(),
        })
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }

    fn request_close(&self) {
        self.mark_closed();
        // notify_one keeps a permit, so a writer that is busy still sees it
        self.close_requested.notify_one();
    }

    pub(crate) async fn close_requested(&self) {
        self.close_requested.notified().await
    }
}

/// Writer-side plumbing handed to the transport tasks
pub(crate) struct LinkTasks {
    pub(crate) state: Arc<LinkState>,
    pub(crate) outbound: mpsc::Receiver<Bytes>,
    pub(crate) events: mpsc::Sender<TransportEvent>,
}

/// Create the caller's halves and the task-side plumbing for a new link
pub(crate) fn open(peer: SocketAddr) -> (LinkSender, LinkReceiver, LinkTasks) {
    let state = LinkState::new();
    let (outbound_tx, outbound_rx) = mpsc::channel(LINK_QUEUE_DEPTH);
    let (events_tx, events_rx) = mpsc::channel(LINK_QUEUE_DEPTH);
    // Capacity is fresh, so this cannot fail
    let _ = events_tx.try_send(TransportEvent::Opened);
    (
        LinkSender {
            peer,
            state: state.clone(),
            outbound: outbound_tx,
        },
        LinkReceiver { events: events_rx },
        LinkTasks {
            state,
            outbound: outbound_rx,
            events: events_tx,
        },
    )
}

/// Outbound half of a TCP or WebSocket link
#[derive(Clone)]
pub struct LinkSender {
    peer: SocketAddr,
    state: Arc<LinkState>,
    outbound: mpsc::Sender<Bytes>,
}

impl LinkSender {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

#[async_trait]
impl TransportSender for LinkSender {
    async fn send(&self, frame: Bytes) -> Result<()> {
        if !self.state.is_open() {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound
            .send(frame)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn try_send(&self, frame: Bytes) -> Result<()> {
        if !self.state.is_open() {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::BufferFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::ConnectionClosed,
        })
    }

    fn is_connected(&self) -> bool {
        self.state.is_open()
    }

    fn close(&self) {
        self.state.request_close();
    }
}

/// Inbound half of a TCP or WebSocket link
pub struct LinkReceiver {
    events: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for LinkReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}

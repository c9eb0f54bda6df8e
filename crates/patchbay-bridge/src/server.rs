//! Accept loop shared by the stream connectors (TCP, WebSocket)

use bytes::Bytes;
use parking_lot::Mutex;
use patchbay_core::{codec, ComponentInfo, HubMessage};
use patchbay_transport::{TransportEvent, TransportReceiver, TransportSender, TransportServer};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connector::{Connection, ConnectionId, ConnectorEvent, ConnectorKind};
use crate::{BridgeError, Result, INBOUND_BUFFER_SIZE};

/// Connection backed by a byte transport sender
struct TransportConnection<S> {
    id: ConnectionId,
    kind: ConnectorKind,
    peer: SocketAddr,
    sender: S,
}

impl<S: TransportSender> Connection for TransportConnection<S> {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn kind(&self) -> ConnectorKind {
        self.kind
    }

    fn peer(&self) -> String {
        format!("{}://{}", self.kind, self.peer)
    }

    fn send_message(&self, message: &HubMessage) -> Result<()> {
        let bytes: Bytes = codec::encode(message)?;
        self.sender.try_send(bytes)?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.sender.is_connected()
    }
}

type ConnectionTasks = Arc<Mutex<HashMap<ConnectionId, JoinHandle<()>>>>;

/// Running state of a stream connector
#[derive(Default)]
pub(crate) struct Listener {
    accept_task: Option<JoinHandle<()>>,
    connections: ConnectionTasks,
    events: Option<mpsc::Sender<ConnectorEvent>>,
    local_addr: Option<SocketAddr>,
}

impl Listener {
    pub(crate) fn is_running(&self) -> bool {
        self.accept_task.is_some()
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Connections whose handler task is still running
    pub(crate) fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Start accepting on an already bound server
    pub(crate) fn launch<S>(
        &mut self,
        server: S,
        kind: ConnectorKind,
        declarations: Arc<Vec<ComponentInfo>>,
        events: mpsc::Sender<ConnectorEvent>,
    ) -> Result<()>
    where
        S: TransportServer + 'static,
        S::Sender: 'static,
        S::Receiver: 'static,
    {
        if self.is_running() {
            return Err(BridgeError::AlreadyStarted(kind.to_string()));
        }

        self.local_addr = server.local_addr().ok();
        self.events = Some(events.clone());
        self.accept_task = Some(tokio::spawn(accept_loop(
            server,
            kind,
            declarations,
            events,
            self.connections.clone(),
        )));
        Ok(())
    }

    /// Stop accepting and tear down every open connection
    pub(crate) fn shutdown(&mut self) {
        let Some(accept_task) = self.accept_task.take() else {
            return;
        };
        accept_task.abort();

        let connections: Vec<_> = self.connections.lock().drain().collect();
        let events = self.events.take();
        for (id, task) in connections {
            task.abort();
            if let Some(events) = &events {
                let _ = events.try_send(ConnectorEvent::Disconnected {
                    connection: id,
                    reason: Some("connector stopped".into()),
                });
            }
        }
        self.local_addr = None;
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn accept_loop<S>(
    mut server: S,
    kind: ConnectorKind,
    declarations: Arc<Vec<ComponentInfo>>,
    events: mpsc::Sender<ConnectorEvent>,
    connections: ConnectionTasks,
) where
    S: TransportServer + 'static,
    S::Sender: 'static,
    S::Receiver: 'static,
{
    info!("{} connector accepting connections", kind);

    while !events.is_closed() {
        match server.accept().await {
            Ok((sender, receiver, addr)) => {
                let id = ConnectionId::next();
                info!("New {} connection {} from {}", kind, id, addr);
                let connection = Arc::new(TransportConnection {
                    id,
                    kind,
                    peer: addr,
                    sender,
                });
                // Registered under the lock so the task's own removal always comes after
                let mut tasks = connections.lock();
                let task = tokio::spawn(handle_connection(
                    connection,
                    receiver,
                    declarations.clone(),
                    events.clone(),
                    connections.clone(),
                ));
                tasks.insert(id, task);
            }
            Err(e) => {
                error!("{} accept error: {}", kind, e);
            }
        }
    }
}

async fn handle_connection<S, R>(
    connection: Arc<TransportConnection<S>>,
    mut receiver: R,
    declarations: Arc<Vec<ComponentInfo>>,
    events: mpsc::Sender<ConnectorEvent>,
    connections: ConnectionTasks,
) where
    S: TransportSender + 'static,
    R: TransportReceiver,
{
    let id = connection.id;
    let peer = connection.peer;
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER_SIZE);

    let opened = ConnectorEvent::Connected {
        connection: connection.clone(),
        inbound: inbound_rx,
    };
    if events.send(opened).await.is_err() {
        connections.lock().remove(&id);
        return;
    }

    // Declarations from the connector's config act as the connection's first component message
    if !declarations.is_empty() {
        match HubMessage::component(declarations.as_ref().clone()) {
            Ok(message) => {
                let _ = inbound_tx.send(message).await;
            }
            Err(e) => warn!("Configured declarations rejected for {}: {}", id, e),
        }
    }

    let reason = loop {
        match receiver.recv().await {
            Some(TransportEvent::Frame(data)) => match codec::decode(&data) {
                Ok(message) => {
                    debug!("{} <- {} message", id, message.message_type());
                    if inbound_tx.send(message).await.is_err() {
                        break None;
                    }
                }
                Err(e) => {
                    warn!("Dropping malformed frame from {}: {}", peer, e);
                }
            },
            Some(TransportEvent::Closed { reason }) => break reason,
            Some(TransportEvent::Opened) => {}
            None => break None,
        }
    };

    info!("{} connection {} closed: {:?}", connection.kind, id, reason);
    drop(inbound_tx);
    connections.lock().remove(&id);
    let _ = events
        .send(ConnectorEvent::Disconnected {
            connection: id,
            reason,
        })
        .await;
}

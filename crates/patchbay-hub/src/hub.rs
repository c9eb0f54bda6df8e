//! Hub event loop
//!
//! The [`HubManager`] owns the registry, the mappings and the connectors, and
//! processes every event to completion on a single task: connector events,
//! inbound messages and [`HubCommand`]s from [`HubHandle`]s. Channel messages
//! are dispatched to their channel's subscribers and the mappings drain their
//! queues before the next event is taken.
//!
//! # Example
//!
//! ```no_run
//! use patchbay_hub::{HubConfig, HubManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HubConfig::from_file("patchbay.toml")?;
//! let mut hub = HubManager::from_config(config)?;
//! hub.start().await?;
//!
//! let handle = hub.handle();
//! let task = tokio::spawn(hub.run());
//!
//! tokio::signal::ctrl_c().await?;
//! handle.shutdown().await;
//! task.await??;
//! # Ok(())
//! # }
//! ```

use patchbay_bridge::{create_connector, Connection, ConnectionId, Connector, ConnectorEvent};
use patchbay_core::{ComponentInfo, HubMessage, MessageContent};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::component::ComponentManager;
use crate::config::HubConfig;
use crate::error::{HubError, Result};
use crate::mapping::{ChannelMapping, MappingManager, MappingSummary};

/// Buffer of the connector event channel
pub const EVENT_BUFFER_SIZE: usize = 256;

/// Requests served by the event loop
pub enum HubCommand {
    AddMapping {
        mapping: ChannelMapping,
        reply: oneshot::Sender<usize>,
    },
    InsertMapping {
        index: usize,
        mapping: ChannelMapping,
        reply: oneshot::Sender<Result<()>>,
    },
    RemoveMapping {
        index: usize,
        reply: oneshot::Sender<Result<MappingSummary>>,
    },
    Components {
        reply: oneshot::Sender<Vec<ComponentInfo>>,
    },
    Mappings {
        reply: oneshot::Sender<Vec<MappingSummary>>,
    },
    Shutdown,
}

enum Inbound {
    Message(ConnectionId, HubMessage),
    Closed(ConnectionId),
}

struct LiveConnection {
    connection: Arc<dyn Connection>,
    forwarder: JoinHandle<()>,
    /// Tells the forwarder to drain what is queued and report `Closed`
    hangup: Option<oneshot::Sender<()>>,
    close_reason: Option<String>,
}

/// Move a connection's inbound messages onto the hub queue, in order.
/// `Closed` is always the last item sent for `id`.
async fn forward_inbound(
    id: ConnectionId,
    mut inbound: mpsc::Receiver<HubMessage>,
    mut hangup: oneshot::Receiver<()>,
    hub: mpsc::UnboundedSender<Inbound>,
) {
    loop {
        tokio::select! {
            biased;
            message = inbound.recv() => match message {
                Some(message) => {
                    if hub.send(Inbound::Message(id, message)).is_err() {
                        return;
                    }
                }
                None => break,
            },
            _ = &mut hangup => {
                // The connector reported the close; whatever it queued before still counts
                while let Ok(message) = inbound.try_recv() {
                    if hub.send(Inbound::Message(id, message)).is_err() {
                        return;
                    }
                }
                break;
            }
        }
    }
    let _ = hub.send(Inbound::Closed(id));
}

/// Cloneable handle to a running hub
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> HubCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(build(tx)).map_err(|_| HubError::Stopped)?;
        rx.await.map_err(|_| HubError::Stopped)
    }

    /// Append a mapping; returns its index
    pub async fn add_mapping(&self, mapping: ChannelMapping) -> Result<usize> {
        self.request(|reply| HubCommand::AddMapping { mapping, reply }).await
    }

    pub async fn insert_mapping(&self, index: usize, mapping: ChannelMapping) -> Result<()> {
        self.request(|reply| HubCommand::InsertMapping {
            index,
            mapping,
            reply,
        })
        .await?
    }

    pub async fn remove_mapping(&self, index: usize) -> Result<MappingSummary> {
        self.request(|reply| HubCommand::RemoveMapping { index, reply })
            .await?
    }

    /// Snapshot of the registered components
    pub async fn components(&self) -> Result<Vec<ComponentInfo>> {
        self.request(|reply| HubCommand::Components { reply }).await
    }

    /// Snapshot of the mappings, in order
    pub async fn mappings(&self) -> Result<Vec<MappingSummary>> {
        self.request(|reply| HubCommand::Mappings { reply }).await
    }

    /// Ask the event loop to stop. Safe to call on a stopped hub.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(HubCommand::Shutdown);
    }
}

/// Registry, mappings and connectors of one hub instance
pub struct HubManager {
    name: String,
    components: ComponentManager,
    mappings: MappingManager,
    connectors: Vec<Box<dyn Connector>>,
    connections: HashMap<ConnectionId, LiveConnection>,
    events_tx: mpsc::Sender<ConnectorEvent>,
    events_rx: mpsc::Receiver<ConnectorEvent>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    commands_tx: mpsc::UnboundedSender<HubCommand>,
    commands_rx: mpsc::UnboundedReceiver<HubCommand>,
}

impl HubManager {
    pub fn new(name: impl Into<String>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            components: ComponentManager::new(),
            mappings: MappingManager::new(),
            connectors: Vec::new(),
            connections: HashMap::new(),
            events_tx,
            events_rx,
            inbound_tx,
            inbound_rx,
            commands_tx,
            commands_rx,
        }
    }

    /// Build connectors for the enabled entries and the configured mappings
    pub fn from_config(config: HubConfig) -> Result<Self> {
        let mut hub = Self::new(config.name.clone());
        for connector in config.enabled_connectors() {
            hub.add_connector(create_connector(connector)?);
        }
        for mapping in &config.mappings {
            hub.add_mapping(mapping.build()?);
        }
        Ok(hub)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_connector(&mut self, connector: Box<dyn Connector>) {
        self.connectors.push(connector);
    }

    pub fn connectors(&self) -> &[Box<dyn Connector>] {
        &self.connectors
    }

    pub fn handle(&self) -> HubHandle {
        HubHandle {
            commands: self.commands_tx.clone(),
        }
    }

    pub fn components(&self) -> &ComponentManager {
        &self.components
    }

    pub fn mappings(&self) -> &MappingManager {
        &self.mappings
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn add_mapping(&mut self, mapping: ChannelMapping) -> usize {
        self.mappings.add(mapping, &self.components)
    }

    pub fn insert_mapping(&mut self, index: usize, mapping: ChannelMapping) -> Result<()> {
        self.mappings.insert(index, mapping, &self.components)
    }

    pub fn remove_mapping(&mut self, index: usize) -> Result<MappingSummary> {
        self.mappings.remove(index)
    }

    /// Start every connector. On the first failure the connectors already
    /// started are stopped again and the error is returned.
    pub async fn start(&mut self) -> Result<()> {
        for index in 0..self.connectors.len() {
            let connector = &mut self.connectors[index];
            if connector.is_running() {
                continue;
            }
            if let Err(e) = connector.start(self.events_tx.clone()).await {
                error!("Hub '{}': connector '{}' failed to start: {}", self.name, connector.name(), e);
                self.stop_connectors().await;
                return Err(e.into());
            }
            info!(
                "Hub '{}': {} connector '{}' started",
                self.name,
                connector.kind(),
                connector.name()
            );
        }
        Ok(())
    }

    async fn stop_connectors(&mut self) {
        for connector in &mut self.connectors {
            if let Err(e) = connector.stop().await {
                warn!("Connector '{}' failed to stop: {}", connector.name(), e);
            }
        }
    }

    /// Process events until [`HubHandle::shutdown`], then stop connectors and
    /// tear down every connection
    pub async fn run(mut self) -> Result<()> {
        info!("Hub '{}' running", self.name);
        loop {
            tokio::select! {
                Some(event) = self.events_rx.recv() => self.handle_connector_event(event),
                Some(inbound) = self.inbound_rx.recv() => match inbound {
                    Inbound::Message(connection, message) => self.handle_message(connection, message),
                    Inbound::Closed(connection) => {
                        let reason = self
                            .connections
                            .get_mut(&connection)
                            .and_then(|live| live.close_reason.take())
                            .unwrap_or_else(|| "stream closed".to_string());
                        self.teardown(connection, &reason);
                    }
                },
                Some(command) = self.commands_rx.recv() => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
            }
        }

        self.stop_connectors().await;
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            self.teardown(id, "hub stopped");
        }
        info!("Hub '{}' stopped", self.name);
        Ok(())
    }

    fn handle_connector_event(&mut self, event: ConnectorEvent) {
        match event {
            ConnectorEvent::Connected {
                connection,
                inbound,
            } => {
                let id = connection.id();
                info!("{} connection {} from {}", connection.kind(), id, connection.peer());

                let (hangup, hung_up) = oneshot::channel();
                let forwarder = tokio::spawn(forward_inbound(
                    id,
                    inbound,
                    hung_up,
                    self.inbound_tx.clone(),
                ));

                if let Some(previous) = self.connections.insert(
                    id,
                    LiveConnection {
                        connection,
                        forwarder,
                        hangup: Some(hangup),
                        close_reason: None,
                    },
                ) {
                    previous.forwarder.abort();
                }
            }
            // Teardown waits for the forwarder's `Closed`, after the connection's last message
            ConnectorEvent::Disconnected { connection, reason } => {
                let Some(live) = self.connections.get_mut(&connection) else {
                    return;
                };
                debug!("{} disconnected, draining its inbound queue", connection);
                live.close_reason = Some(reason.unwrap_or_else(|| "disconnected".to_string()));
                if let Some(hangup) = live.hangup.take() {
                    let _ = hangup.send(());
                }
            }
        }
    }

    fn handle_message(&mut self, id: ConnectionId, message: HubMessage) {
        let Some(live) = self.connections.get(&id) else {
            debug!("Dropping {} message from closed {}", message.message_type(), id);
            return;
        };

        match message.content() {
            MessageContent::Component(content) => {
                let connection = live.connection.clone();
                match self.components.declare(&connection, content.components.clone()) {
                    Ok(()) => self.mappings.refresh(&self.components),
                    Err(e) => warn!("Declaration from {} rejected: {}", id, e),
                }
            }
            _ => {
                match self.components.dispatch(id, &message) {
                    Ok(reached) => debug!("{} from {} reached {} mapping(s)", message.message_type(), id, reached),
                    Err(e) => warn!("Dropping {} from {}: {}", message.message_type(), id, e),
                }
                self.mappings.pump();
            }
        }
    }

    /// Forget a connection and everything it declared. Idempotent.
    fn teardown(&mut self, id: ConnectionId, reason: &str) {
        let Some(live) = self.connections.remove(&id) else {
            return;
        };
        live.forwarder.abort();

        let removed = self.components.clean(id);
        info!(
            "Connection {} closed ({}), {} component(s) removed",
            id,
            reason,
            removed.len()
        );
        self.mappings.refresh(&self.components);
    }

    /// Returns false on shutdown
    fn handle_command(&mut self, command: HubCommand) -> bool {
        match command {
            HubCommand::AddMapping { mapping, reply } => {
                let _ = reply.send(self.add_mapping(mapping));
            }
            HubCommand::InsertMapping {
                index,
                mapping,
                reply,
            } => {
                let _ = reply.send(self.insert_mapping(index, mapping));
            }
            HubCommand::RemoveMapping { index, reply } => {
                let _ = reply.send(self.remove_mapping(index));
            }
            HubCommand::Components { reply } => {
                let _ = reply.send(self.components.components());
            }
            HubCommand::Mappings { reply } => {
                let _ = reply.send(self.mappings.summaries());
            }
            HubCommand::Shutdown => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchbay_bridge::ConnectorConfig;
    use crate::config::MappingConfig;

    #[test]
    fn test_from_config_skips_disabled() {
        let mut disabled = ConnectorConfig::new("spare", "websocket");
        disabled.enabled = false;
        let config = HubConfig::default()
            .with_connector(ConnectorConfig::new("main", "tcp").with_bind("127.0.0.1:0"))
            .with_connector(disabled)
            .with_mapping(MappingConfig::new("synth.note", "light.brightness"));

        let hub = HubManager::from_config(config).unwrap();
        assert_eq!(hub.connectors().len(), 1);
        assert_eq!(hub.mappings().len(), 1);
    }

    #[test]
    fn test_from_config_unknown_kind() {
        let config = HubConfig::default().with_connector(ConnectorConfig::new("x", "carrier-pigeon"));
        assert!(matches!(
            HubManager::from_config(config),
            Err(HubError::Bridge(patchbay_bridge::BridgeError::UnsupportedConnectorType(_)))
        ));
    }

    #[tokio::test]
    async fn test_handle_after_shutdown() {
        let hub = HubManager::new("test");
        let handle = hub.handle();
        let task = tokio::spawn(hub.run());

        assert!(handle.components().await.unwrap().is_empty());
        handle.shutdown().await;
        task.await.unwrap().unwrap();

        assert!(matches!(handle.mappings().await, Err(HubError::Stopped)));
    }

    #[tokio::test]
    async fn test_start_failure_surfaces() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = blocker.local_addr().unwrap();

        let mut hub = HubManager::new("test");
        hub.add_connector(
            create_connector(&ConnectorConfig::new("main", "tcp").with_bind(addr.to_string())).unwrap(),
        );
        assert!(hub.start().await.is_err());
        assert!(!hub.connectors()[0].is_running());
    }
}

//! WebSocket connector: one JSON envelope per frame

use async_trait::async_trait;
use patchbay_core::ComponentInfo;
use patchbay_transport::{WebSocketConfig, WebSocketServer};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::connector::{Connector, ConnectorEvent, ConnectorKind};
use crate::server::Listener;
use crate::{BridgeError, Result};

/// Accepts WebSocket clients; each upgraded socket is one connection
pub struct WebSocketConnector {
    name: String,
    bind: String,
    transport: WebSocketConfig,
    declarations: Arc<Vec<ComponentInfo>>,
    listener: Listener,
}

impl WebSocketConnector {
    pub fn new(name: impl Into<String>, bind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bind: bind.into(),
            transport: WebSocketConfig::default(),
            declarations: Arc::new(Vec::new()),
            listener: Listener::default(),
        }
    }

    pub fn with_transport_config(mut self, config: WebSocketConfig) -> Self {
        self.transport = config;
        self
    }

    /// Open connections, zero once every peer has gone
    pub fn connection_count(&self) -> usize {
        self.listener.connection_count()
    }

    pub fn with_declarations(mut self, declarations: Vec<ComponentInfo>) -> Self {
        self.declarations = Arc::new(declarations);
        self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ConnectorKind {
        ConnectorKind::WebSocket
    }

    async fn start(&mut self, events: mpsc::Sender<ConnectorEvent>) -> Result<()> {
        if self.listener.is_running() {
            return Err(BridgeError::AlreadyStarted(self.name.clone()));
        }

        let server = WebSocketServer::bind(&self.bind)
            .await
            .map_err(|e| BridgeError::BindFailed(e.to_string()))?
            .with_config(self.transport.clone());

        self.listener.launch(
            server,
            ConnectorKind::WebSocket,
            self.declarations.clone(),
            events,
        )?;
        info!("WebSocket connector '{}' started on {}", self.name, self.bind);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if self.listener.is_running() {
            self.listener.shutdown();
            info!("WebSocket connector '{}' stopped", self.name);
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.listener.is_running()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }
}

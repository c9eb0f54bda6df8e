//! TCP connector: delimiter-framed JSON envelopes over stream sockets

use async_trait::async_trait;
use patchbay_core::ComponentInfo;
use patchbay_transport::{TcpConfig, TcpServer};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::connector::{Connector, ConnectorEvent, ConnectorKind};
use crate::server::Listener;
use crate::{BridgeError, Result};

/// Listens for TCP clients; each accepted socket is one connection
pub struct TcpConnector {
    name: String,
    bind: String,
    transport: TcpConfig,
    declarations: Arc<Vec<ComponentInfo>>,
    listener: Listener,
}

impl TcpConnector {
    pub fn new(name: impl Into<String>, bind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bind: bind.into(),
            transport: TcpConfig::default(),
            declarations: Arc::new(Vec::new()),
            listener: Listener::default(),
        }
    }

    pub fn with_transport_config(mut self, config: TcpConfig) -> Self {
        self.transport = config;
        self
    }

    /// Components registered on behalf of every connection this connector opens
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
impl Connector for TcpConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Tcp
    }

    async fn start(&mut self, events: mpsc::Sender<ConnectorEvent>) -> Result<()> {
        if self.listener.is_running() {
            return Err(BridgeError::AlreadyStarted(self.name.clone()));
        }

        let server = TcpServer::bind_with_config(&self.bind, self.transport.clone())
            .await
            .map_err(|e| BridgeError::BindFailed(e.to_string()))?;

        self.listener
            .launch(server, ConnectorKind::Tcp, self.declarations.clone(), events)?;
        info!("TCP connector '{}' started on {}", self.name, self.bind);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if self.listener.is_running() {
            self.listener.shutdown();
            info!("TCP connector '{}' stopped", self.name);
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

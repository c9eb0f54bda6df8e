//! Connector configuration and factory

use patchbay_core::{codec, ComponentInfo, DEFAULT_OSC_PORT, DEFAULT_TCP_PORT, DEFAULT_WS_PORT};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

use crate::connector::{Connector, ConnectorKind};
use crate::tcp::TcpConnector;
use crate::websocket::WebSocketConnector;
use crate::{BridgeError, Result};

fn default_enabled() -> bool {
    true
}

/// One `[[connectors]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Connector name, used in logs
    pub name: String,
    /// Transport kind: `tcp`, `websocket`, `osc` or `midi`
    pub kind: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Local bind address (network connectors)
    #[serde(default)]
    pub bind: Option<String>,
    /// Remote address for outbound traffic (OSC)
    #[serde(default)]
    pub remote: Option<String>,
    /// Component identifier for device connectors (OSC, MIDI)
    #[serde(default)]
    pub component: Option<String>,
    /// MIDI input port name filter
    #[serde(default)]
    pub input_port: Option<String>,
    /// MIDI output port name filter
    #[serde(default)]
    pub output_port: Option<String>,
    /// JSON document of components declared on behalf of each connection
    #[serde(default)]
    pub declarations: Option<PathBuf>,
}

impl ConnectorConfig {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            enabled: true,
            bind: None,
            remote: None,
            component: None,
            input_port: None,
            output_port: None,
            declarations: None,
        }
    }

    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = Some(bind.into());
        self
    }

    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = Some(remote.into());
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn with_declarations(mut self, path: impl Into<PathBuf>) -> Self {
        self.declarations = Some(path.into());
        self
    }

    /// Bind address, falling back to the kind's default port
    pub fn bind_addr(&self, kind: ConnectorKind) -> String {
        if let Some(bind) = &self.bind {
            return bind.clone();
        }
        let port = match kind {
            ConnectorKind::Tcp => DEFAULT_TCP_PORT,
            ConnectorKind::WebSocket => DEFAULT_WS_PORT,
            ConnectorKind::Osc | ConnectorKind::Midi => DEFAULT_OSC_PORT,
        };
        format!("0.0.0.0:{}", port)
    }

    /// Component identifier, defaulting to the connector name
    pub fn component_id(&self) -> String {
        self.component.clone().unwrap_or_else(|| self.name.clone())
    }

    /// Read the declarations document, if one is configured
    pub fn load_declarations(&self) -> Result<Vec<ComponentInfo>> {
        let Some(path) = &self.declarations else {
            return Ok(Vec::new());
        };
        let data = std::fs::read(path).map_err(|e| {
            BridgeError::Config(format!("cannot read declarations {}: {}", path.display(), e))
        })?;
        let components = codec::decode_component_document(&data).map_err(|e| {
            BridgeError::Config(format!("invalid declarations {}: {}", path.display(), e))
        })?;
        info!(
            "Loaded {} component declaration(s) for '{}' from {}",
            components.len(),
            self.name,
            path.display()
        );
        Ok(components)
    }
}

/// Build the connector described by `config`
pub fn create_connector(config: &ConnectorConfig) -> Result<Box<dyn Connector>> {
    let kind = ConnectorKind::parse(&config.kind)
        .ok_or_else(|| BridgeError::UnsupportedConnectorType(config.kind.clone()))?;
    let declarations = config.load_declarations()?;
    let bind = config.bind_addr(kind);

    match kind {
        ConnectorKind::Tcp => Ok(Box::new(
            TcpConnector::new(config.name.clone(), bind).with_declarations(declarations),
        )),
        ConnectorKind::WebSocket => Ok(Box::new(
            WebSocketConnector::new(config.name.clone(), bind).with_declarations(declarations),
        )),
        #[cfg(feature = "osc")]
        ConnectorKind::Osc => {
            let mut connector = crate::osc::OscConnector::new(config.name.clone(), bind)
                .with_component(config.component_id())
                .with_declarations(declarations);
            if let Some(remote) = &config.remote {
                connector = connector.with_remote(remote.clone());
            }
            Ok(Box::new(connector))
        }
        #[cfg(feature = "midi")]
        ConnectorKind::Midi => {
            let mut connector =
                crate::midi::MidiConnector::new(config.name.clone()).with_component(config.component_id());
            if let Some(port) = &config.input_port {
                connector = connector.with_input_port(port.clone());
            }
            if let Some(port) = &config.output_port {
                connector = connector.with_output_port(port.clone());
            }
            Ok(Box::new(connector))
        }
        #[allow(unreachable_patterns)]
        other => Err(BridgeError::UnsupportedConnectorType(format!(
            "{} (not enabled in this build)",
            other
        ))),
    }
}

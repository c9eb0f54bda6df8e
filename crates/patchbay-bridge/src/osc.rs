//! OSC connector
//!
//! Binds one UDP socket and exposes it as a single connection. Inbound
//! `/channel/parameter args...` messages become `control` messages for the
//! configured component; bundles are flattened. Outbound channel messages are
//! sent to the configured remote as one OSC message per parameter.

use async_trait::async_trait;
use patchbay_core::{ChannelContent, ComponentInfo, HubMessage};
use rosc::{OscMessage, OscPacket, OscType};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connector::{
    Connection, ConnectionId, Connector, ConnectorEvent, ConnectorKind, RunState,
};
use crate::{BridgeError, Result, INBOUND_BUFFER_SIZE};

/// Parameter name used when an OSC address has a single segment
pub const DEFAULT_PARAMETER: &str = "value";

/// Connection wrapping the connector's UDP socket
pub struct OscConnection {
    id: ConnectionId,
    socket: Arc<UdpSocket>,
    remote: Option<SocketAddr>,
    state: RunState,
}

impl Connection for OscConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Osc
    }

    fn peer(&self) -> String {
        match self.remote {
            Some(remote) => format!("osc://{}", remote),
            None => "osc://(receive only)".to_string(),
        }
    }

    fn send_message(&self, message: &HubMessage) -> Result<()> {
        if !self.state.is_live() {
            return Err(BridgeError::NotStarted("osc".into()));
        }
        let Some(remote) = self.remote else {
            return Err(BridgeError::Send("OSC connection is receive-only".into()));
        };

        let packets = message_to_osc(message);
        for packet in &packets {
            let datagram = rosc::encoder::encode(packet)
                .map_err(|e| BridgeError::Protocol(format!("cannot encode OSC packet: {:?}", e)))?;
            self.socket
                .try_send_to(&datagram, remote)
                .map_err(|e| BridgeError::Send(format!("OSC to {}: {}", remote, e)))?;
        }
        debug!("{} OSC packet(s) to {}", packets.len(), remote);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.is_live()
    }
}

/// OSC over UDP
pub struct OscConnector {
    name: String,
    bind: String,
    remote: Option<String>,
    component: String,
    declarations: Vec<ComponentInfo>,
    state: RunState,
    task: Option<JoinHandle<()>>,
    connection: Option<ConnectionId>,
    events: Option<mpsc::Sender<ConnectorEvent>>,
    local_addr: Option<SocketAddr>,
}

impl OscConnector {
    pub fn new(name: impl Into<String>, bind: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            component: name.clone(),
            name,
            bind: bind.into(),
            remote: None,
            declarations: Vec::new(),
            state: RunState::default(),
            task: None,
            connection: None,
            events: None,
            local_addr: None,
        }
    }

    /// Destination for outbound messages
    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = Some(remote.into());
        self
    }

    /// Component identifier inbound messages are attributed to
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = component.into();
        self
    }

    pub fn with_declarations(mut self, declarations: Vec<ComponentInfo>) -> Self {
        self.declarations = declarations;
        self
    }
}

#[async_trait]
impl Connector for OscConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Osc
    }

    async fn start(&mut self, events: mpsc::Sender<ConnectorEvent>) -> Result<()> {
        if self.state.is_live() {
            return Err(BridgeError::AlreadyStarted(self.name.clone()));
        }

        let remote = match &self.remote {
            Some(remote) => Some(
                remote
                    .parse::<SocketAddr>()
                    .map_err(|e| BridgeError::Config(format!("invalid OSC remote {}: {}", remote, e)))?,
            ),
            None => None,
        };

        let socket = UdpSocket::bind(&self.bind)
            .await
            .map_err(|e| BridgeError::BindFailed(format!("{}: {}", self.bind, e)))?;
        self.local_addr = socket.local_addr().ok();
        info!("OSC connector '{}' listening on {}", self.name, self.bind);

        let socket = Arc::new(socket);
        self.state.set_live(true);

        let connection = Arc::new(OscConnection {
            id: ConnectionId::next(),
            socket: socket.clone(),
            remote,
            state: self.state.clone(),
        });
        let id = connection.id;

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER_SIZE);
        if !self.declarations.is_empty() {
            match HubMessage::component(self.declarations.clone()) {
                Ok(message) => {
                    let _ = inbound_tx.try_send(message);
                }
                Err(e) => warn!("Configured declarations rejected for '{}': {}", self.name, e),
            }
        }

        let opened = ConnectorEvent::Connected {
            connection,
            inbound: inbound_rx,
        };
        if events.send(opened).await.is_err() {
            self.state.set_live(false);
            return Err(BridgeError::Send("hub event channel closed".into()));
        }

        self.task = Some(tokio::spawn(receive_datagrams(
            socket,
            self.component.clone(),
            inbound_tx,
        )));

        self.connection = Some(id);
        self.events = Some(events);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.state.set_live(false);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let (Some(id), Some(events)) = (self.connection.take(), self.events.take()) {
            let _ = events
                .send(ConnectorEvent::Disconnected {
                    connection: id,
                    reason: Some("connector stopped".into()),
                })
                .await;
            info!("OSC connector '{}' stopped", self.name);
        }
        self.local_addr = None;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.state.is_live()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

/// Largest datagram an OSC peer can send over UDP
const MAX_DATAGRAM: usize = 65_507;

/// Feed decoded datagrams to the hub until it stops listening
async fn receive_datagrams(
    socket: Arc<UdpSocket>,
    component: String,
    inbound: mpsc::Sender<HubMessage>,
) {
    let mut datagram = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, from) = match socket.recv_from(&mut datagram).await {
            Ok(received) => received,
            Err(e) => {
                // ICMP errors from earlier sends surface here; keep listening
                error!("OSC socket error: {}", e);
                continue;
            }
        };
        let packet = match rosc::decoder::decode_udp(&datagram[..len]) {
            Ok((_, packet)) => packet,
            Err(e) => {
                warn!("Dropping malformed OSC packet from {}: {:?}", from, e);
                continue;
            }
        };
        for message in osc_to_messages(&packet, &component) {
            if inbound.send(message).await.is_err() {
                return;
            }
        }
    }
}

fn osc_arg_to_f64(arg: &OscType) -> Option<f64> {
    match arg {
        OscType::Int(i) => Some(*i as f64),
        OscType::Float(f) => Some(*f as f64),
        OscType::Long(l) => Some(*l as f64),
        OscType::Double(d) => Some(*d),
        OscType::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        OscType::Inf => Some(f64::INFINITY),
        _ => None,
    }
}

/// Split `/channel/param/...` into channel and parameter name
fn split_address(addr: &str) -> Option<(&str, &str)> {
    let trimmed = addr.trim_start_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.split_once('/') {
        Some((channel, parameter)) if !channel.is_empty() && !parameter.is_empty() => {
            Some((channel, parameter))
        }
        Some((channel, _)) if !channel.is_empty() => Some((channel, DEFAULT_PARAMETER)),
        Some(_) => None,
        None => Some((trimmed, DEFAULT_PARAMETER)),
    }
}

fn osc_message_to_hub(msg: &OscMessage, component: &str) -> Option<HubMessage> {
    let Some((channel, parameter)) = split_address(&msg.addr) else {
        warn!("Ignoring OSC message with unusable address {:?}", msg.addr);
        return None;
    };
    let values: Vec<f64> = msg.args.iter().filter_map(osc_arg_to_f64).collect();
    let content = ChannelContent::new(component, channel).with_parameter(parameter, values);
    HubMessage::control(content).ok()
}

/// Convert an OSC packet to control messages, flattening bundles
pub fn osc_to_messages(packet: &OscPacket, component: &str) -> Vec<HubMessage> {
    match packet {
        OscPacket::Message(msg) => osc_message_to_hub(msg, component).into_iter().collect(),
        OscPacket::Bundle(bundle) => bundle
            .content
            .iter()
            .flat_map(|p| osc_to_messages(p, component))
            .collect(),
    }
}

/// Convert an outbound channel message to one OSC message per parameter
pub fn message_to_osc(message: &HubMessage) -> Vec<OscPacket> {
    let Some(content) = message.channel_content() else {
        return Vec::new();
    };
    content
        .parameters
        .iter()
        .map(|(parameter, values)| {
            OscPacket::Message(OscMessage {
                addr: format!("/{}/{}", content.channel, parameter),
                args: values.iter().map(|v| OscType::Float(*v as f32)).collect(),
            })
        })
        .collect()
}

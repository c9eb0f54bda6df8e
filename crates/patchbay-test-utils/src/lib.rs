//! Common test helpers for patchbay tests
//!
//! This crate provides:
//! - A recording fake connection that captures everything the hub sends
//! - A scripted connector whose connections are opened by the test
//! - Condition-based waiting (no hardcoded sleeps)
//! - Declarations shared by the routing tests

use async_trait::async_trait;
use parking_lot::Mutex;
use patchbay_bridge::{
    BridgeError, Connection, ConnectionId, Connector, ConnectorEvent, ConnectorKind,
};
use patchbay_core::{
    ChannelFlow, ChannelInfo, ChannelType, ComponentInfo, HubMessage, ParameterInfo, Range,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F>(check: F, max_wait: Duration) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check() {
            return true;
        }
        tokio::time::sleep(DEFAULT_CHECK_INTERVAL).await;
    }
    check()
}

// ============================================================================
// Recording Connection
// ============================================================================

/// Fake connection that records every message sent to it
pub struct RecordingConnection {
    id: ConnectionId,
    kind: ConnectorKind,
    connected: AtomicBool,
    sent: Mutex<Vec<HubMessage>>,
    notify: Notify,
}

impl RecordingConnection {
    pub fn new() -> Arc<Self> {
        Self::with_kind(ConnectorKind::Tcp)
    }

    pub fn with_kind(kind: ConnectorKind) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::next(),
            kind,
            connected: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
            notify: Notify::new(),
        })
    }

    /// A connection for code that only needs the trait object
    pub fn shared() -> Arc<dyn Connection> {
        Self::new()
    }

    /// The same connection as a trait object
    pub fn as_dyn(self: &Arc<Self>) -> Arc<dyn Connection> {
        self.clone()
    }

    pub fn sent(&self) -> Vec<HubMessage> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Drain the recorded messages
    pub fn take_sent(&self) -> Vec<HubMessage> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Simulate the peer going away; further sends fail
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Wait until at least `n` messages were recorded
    pub async fn wait_for_sent(&self, n: usize, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        loop {
            let notified = self.notify.notified();
            if self.sent_count() >= n {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || tokio::time::timeout(remaining, notified).await.is_err() {
                return self.sent_count() >= n;
            }
        }
    }
}

impl Connection for RecordingConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn kind(&self) -> ConnectorKind {
        self.kind
    }

    fn peer(&self) -> String {
        format!("recording/{}", self.id)
    }

    fn send_message(&self, message: &HubMessage) -> patchbay_bridge::Result<()> {
        if !self.is_connected() {
            return Err(BridgeError::Send(format!("{} is closed", self.id)));
        }
        self.sent.lock().push(message.clone());
        self.notify.notify_waiters();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Scripted Connector
// ============================================================================

type EventSlot = Arc<Mutex<Option<mpsc::Sender<ConnectorEvent>>>>;

/// Connector whose connections are opened and closed by the test
pub struct ScriptedConnector {
    name: String,
    events: EventSlot,
}

/// Test side of a [`ScriptedConnector`]
#[derive(Clone)]
pub struct ScriptedConnectorHandle {
    events: EventSlot,
}

impl ScriptedConnector {
    pub fn new(name: impl Into<String>) -> (Self, ScriptedConnectorHandle) {
        let events: EventSlot = Arc::new(Mutex::new(None));
        (
            Self {
                name: name.into(),
                events: events.clone(),
            },
            ScriptedConnectorHandle { events },
        )
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Tcp
    }

    async fn start(&mut self, events: mpsc::Sender<ConnectorEvent>) -> patchbay_bridge::Result<()> {
        let mut slot = self.events.lock();
        if slot.is_some() {
            return Err(BridgeError::AlreadyStarted(self.name.clone()));
        }
        *slot = Some(events);
        Ok(())
    }

    async fn stop(&mut self) -> patchbay_bridge::Result<()> {
        self.events.lock().take();
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.events.lock().is_some()
    }
}

impl ScriptedConnectorHandle {
    fn sender(&self) -> Option<mpsc::Sender<ConnectorEvent>> {
        self.events.lock().clone()
    }

    /// Open `connection` on the hub. Messages sent on the returned sender
    /// arrive as the connection's inbound traffic; dropping it closes the
    /// connection. `None` if the connector is not running.
    pub async fn connect(&self, connection: Arc<dyn Connection>) -> Option<mpsc::Sender<HubMessage>> {
        let (tx, rx) = mpsc::channel(64);
        self.sender()?
            .send(ConnectorEvent::Connected {
                connection,
                inbound: rx,
            })
            .await
            .ok()?;
        Some(tx)
    }

    /// Report `connection` as closed
    pub async fn disconnect(&self, connection: ConnectionId) {
        if let Some(sender) = self.sender() {
            let _ = sender
                .send(ConnectorEvent::Disconnected {
                    connection,
                    reason: Some("closed by test".to_string()),
                })
                .await;
        }
    }
}

// ============================================================================
// Declarations
// ============================================================================

/// `synth` with emitter channel `note { pitch, velocity }`
pub fn synth_component() -> ComponentInfo {
    ComponentInfo::new("synth").with_channel(
        ChannelInfo::new("note", ChannelFlow::Emitter, ChannelType::Event)
            .with_parameter(ParameterInfo::new("pitch", 60.0, Range::new(0.0, 127.0)))
            .with_parameter(ParameterInfo::new("velocity", 0.0, Range::new(0.0, 127.0))),
    )
}

/// `light` with receiver channel `brightness { level }`
pub fn light_component() -> ComponentInfo {
    ComponentInfo::new("light").with_channel(
        ChannelInfo::new("brightness", ChannelFlow::Receiver, ChannelType::Event)
            .with_parameter(ParameterInfo::new("level", 0.0, Range::new(0.0, 12.7))),
    )
}

/// Single-channel component `identifier.channel { parameters... }`, values in 0..1
pub fn control_component(identifier: &str, channel: &str, parameters: &[&str]) -> ComponentInfo {
    let channel = parameters.iter().fold(
        ChannelInfo::new(channel, ChannelFlow::Emitter, ChannelType::Control),
        |channel, parameter| channel.with_parameter(ParameterInfo::new(*parameter, 0.0, Range::new(0.0, 1.0))),
    );
    ComponentInfo::new(identifier).with_channel(channel)
}

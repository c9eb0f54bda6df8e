//! MIDI translation and device connector
//!
//! [`MidiTranslator`] maps raw MIDI bytes to channel messages and back:
//!
//! | MIDI | Message |
//! |------|---------|
//! | note-on | `create` on `note`, `{pitch, velocity}`, fresh instance per (channel, note) |
//! | note-off, note-on velocity 0 | `destroy` on `note`, same instance |
//! | control change | `control` on `cc`, parameter `cc<number>` |
//! | pitch bend | `control` on `bend`, parameter `value` (-8192..8191) |
//!
//! The MIDI channel (0-15) travels in the message `key`. Outbound messages to
//! `note_out` and `cc_out` are turned back into note and controller bytes.
//!
//! The device binding ([`MidiConnector`]) needs the `midi` feature.

use patchbay_core::{
    ChannelContent, ChannelFlow, ChannelInfo, ChannelType, ComponentInfo, HubMessage,
    MessageContent, ParameterInfo, Range,
};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

pub const NOTE_CHANNEL: &str = "note";
pub const CC_CHANNEL: &str = "cc";
pub const BEND_CHANNEL: &str = "bend";
pub const NOTE_OUT_CHANNEL: &str = "note_out";
pub const CC_OUT_CHANNEL: &str = "cc_out";

const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;
const CONTROL_CHANGE: u8 = 0xB0;
const PITCH_BEND: u8 = 0xE0;

const DEFAULT_VELOCITY: u8 = 100;

/// Stateful MIDI <-> message translator for one device
pub struct MidiTranslator {
    component: String,
    /// Sounding inbound notes: (channel, note) -> instance
    sounding: HashMap<(u8, u8), String>,
    /// Sounding outbound notes: instance -> (channel, note)
    playing: HashMap<String, (u8, u8)>,
}

impl MidiTranslator {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            sounding: HashMap::new(),
            playing: HashMap::new(),
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    /// Number of inbound notes currently held
    pub fn active_notes(&self) -> usize {
        self.sounding.len()
    }

    /// The component this translator speaks for
    pub fn declaration(&self) -> ComponentInfo {
        let data = Range::new(0.0, 127.0);
        let note = |identifier: &str, flow| {
            ChannelInfo::new(identifier, flow, ChannelType::Event)
                .with_parameter(ParameterInfo::new("pitch", 60.0, data))
                .with_parameter(ParameterInfo::new("velocity", DEFAULT_VELOCITY as f64, data))
        };
        let controllers = |identifier: &str, flow| {
            (0..128).fold(
                ChannelInfo::new(identifier, flow, ChannelType::Control),
                |channel, n| channel.with_parameter(ParameterInfo::new(format!("cc{}", n), 0.0, data)),
            )
        };

        ComponentInfo::new(self.component.clone())
            .with_channel(note(NOTE_CHANNEL, ChannelFlow::Emitter))
            .with_channel(controllers(CC_CHANNEL, ChannelFlow::Emitter))
            .with_channel(
                ChannelInfo::new(BEND_CHANNEL, ChannelFlow::Emitter, ChannelType::Control)
                    .with_parameter(ParameterInfo::new("value", 0.0, Range::new(-8192.0, 8191.0))),
            )
            .with_channel(note(NOTE_OUT_CHANNEL, ChannelFlow::Receiver))
            .with_channel(controllers(CC_OUT_CHANNEL, ChannelFlow::Receiver))
    }

    fn content(&self, channel: &str, midi_channel: u8) -> ChannelContent {
        ChannelContent::new(self.component.clone(), channel).with_key(midi_channel.to_string())
    }

    fn note_off(&mut self, channel: u8, note: u8, velocity: u8) -> Option<HubMessage> {
        let instance = self.sounding.remove(&(channel, note))?;
        HubMessage::destroy(
            self.content(NOTE_CHANNEL, channel)
                .with_instance(instance)
                .with_parameter("pitch", vec![note as f64])
                .with_parameter("velocity", vec![velocity as f64]),
        )
        .ok()
    }

    /// Translate one MIDI message. Unsupported or truncated input yields nothing.
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<HubMessage> {
        let (Some(&status), Some(&data1), Some(&data2)) = (bytes.first(), bytes.get(1), bytes.get(2))
        else {
            return Vec::new();
        };
        let channel = status & 0x0F;

        match status & 0xF0 {
            NOTE_ON if data2 > 0 => {
                // Retrigger of a held note ends the previous instance first
                let mut messages: Vec<HubMessage> = self.note_off(channel, data1, 0).into_iter().collect();

                let instance = Uuid::new_v4().to_string();
                self.sounding.insert((channel, data1), instance.clone());
                let create = HubMessage::create(
                    self.content(NOTE_CHANNEL, channel)
                        .with_instance(instance)
                        .with_parameter("pitch", vec![data1 as f64])
                        .with_parameter("velocity", vec![data2 as f64]),
                );
                messages.extend(create.ok());
                messages
            }
            NOTE_ON | NOTE_OFF => self.note_off(channel, data1, data2).into_iter().collect(),
            CONTROL_CHANGE => HubMessage::control(
                self.content(CC_CHANNEL, channel)
                    .with_parameter(format!("cc{}", data1), vec![data2 as f64]),
            )
            .into_iter()
            .collect(),
            PITCH_BEND => {
                let value = (((data2 as i32) << 7) | data1 as i32) - 8192;
                HubMessage::control(
                    self.content(BEND_CHANNEL, channel)
                        .with_parameter("value", vec![value as f64]),
                )
                .into_iter()
                .collect()
            }
            other => {
                debug!("Ignoring MIDI status {:#04x}", other);
                Vec::new()
            }
        }
    }

    /// Translate an outbound message into MIDI byte sequences
    pub fn encode(&mut self, message: &HubMessage) -> Vec<Vec<u8>> {
        let Some(content) = message.channel_content() else {
            return Vec::new();
        };
        let channel = content
            .key
            .as_deref()
            .and_then(|k| k.parse::<u8>().ok())
            .unwrap_or(0)
            .min(15);

        match content.channel.as_str() {
            NOTE_OUT_CHANNEL | NOTE_CHANNEL => self.encode_note(message.content(), content, channel),
            CC_OUT_CHANNEL | CC_CHANNEL => content
                .parameters
                .iter()
                .filter_map(|(name, values)| {
                    let number = name.strip_prefix("cc")?.parse::<u8>().ok().filter(|n| *n < 128)?;
                    let value = values.first().copied()?;
                    Some(vec![CONTROL_CHANGE | channel, number, data_byte(value)])
                })
                .collect(),
            BEND_CHANNEL => content
                .parameter("value")
                .and_then(|v| v.first().copied())
                .map(|value| {
                    let raw = (value.round() as i32 + 8192).clamp(0, 16383) as u16;
                    vec![vec![PITCH_BEND | channel, (raw & 0x7F) as u8, (raw >> 7) as u8]]
                })
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    fn encode_note(
        &mut self,
        kind: &MessageContent,
        content: &ChannelContent,
        channel: u8,
    ) -> Vec<Vec<u8>> {
        let first = |name: &str| content.parameter(name).and_then(|v| v.first().copied());
        let instance = content.instance.clone();

        match kind {
            MessageContent::Create(_) => {
                let Some(pitch) = first("pitch").map(data_byte) else {
                    return Vec::new();
                };
                let velocity = first("velocity").map(data_byte).unwrap_or(DEFAULT_VELOCITY);
                let mut out = Vec::new();
                if let Some(instance) = instance {
                    if let Some((ch, note)) = self.playing.insert(instance, (channel, pitch)) {
                        out.push(vec![NOTE_OFF | ch, note, 0]);
                    }
                }
                out.push(vec![NOTE_ON | channel, pitch, velocity]);
                out
            }
            MessageContent::Destroy(_) => {
                let held = instance.and_then(|i| self.playing.remove(&i));
                match held.or_else(|| first("pitch").map(|p| (channel, data_byte(p)))) {
                    Some((ch, note)) => vec![vec![NOTE_OFF | ch, note, 0]],
                    None => Vec::new(),
                }
            }
            _ => Vec::new(),
        }
    }
}

fn data_byte(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 127.0) as u8
}

#[cfg(feature = "midi")]
pub use device::{MidiConnection, MidiConnector};

#[cfg(feature = "midi")]
mod device {
    use async_trait::async_trait;
    use midir::{MidiInput, MidiOutput};
    use parking_lot::Mutex;
    use patchbay_core::HubMessage;
    use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tokio::sync::{mpsc, oneshot};
    use tracing::{debug, info, warn};

    use super::MidiTranslator;
    use crate::connector::{
        Connection, ConnectionId, Connector, ConnectorEvent, ConnectorKind, RunState,
    };
    use crate::{BridgeError, Result, INBOUND_BUFFER_SIZE};

    /// How often the device threads check whether the connector stopped
    const POLL_INTERVAL: Duration = Duration::from_millis(100);

    type SharedTranslator = Arc<Mutex<MidiTranslator>>;

    /// Connection to one MIDI device pair
    pub struct MidiConnection {
        id: ConnectionId,
        port: String,
        translator: SharedTranslator,
        output: Mutex<Option<std_mpsc::Sender<Vec<u8>>>>,
        state: RunState,
    }

    impl Connection for MidiConnection {
        fn id(&self) -> ConnectionId {
            self.id
        }

        fn kind(&self) -> ConnectorKind {
            ConnectorKind::Midi
        }

        fn peer(&self) -> String {
            format!("midi://{}", self.port)
        }

        fn send_message(&self, message: &HubMessage) -> Result<()> {
            let guard = self.output.lock();
            let Some(output) = guard.as_ref() else {
                return Err(BridgeError::NotStarted("midi output".into()));
            };
            for bytes in self.translator.lock().encode(message) {
                output
                    .send(bytes)
                    .map_err(|_| BridgeError::Send(format!("MIDI output for {} is gone", self.port)))?;
            }
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.state.is_live()
        }
    }

    /// MIDI device connector
    pub struct MidiConnector {
        name: String,
        component: String,
        input_port: Option<String>,
        output_port: Option<String>,
        state: RunState,
        connection: Option<Arc<MidiConnection>>,
        events: Option<mpsc::Sender<ConnectorEvent>>,
    }

    impl MidiConnector {
        pub fn new(name: impl Into<String>) -> Self {
            let name = name.into();
            Self {
                component: name.clone(),
                name,
                input_port: None,
                output_port: None,
                state: RunState::default(),
                connection: None,
                events: None,
            }
        }

        pub fn with_component(mut self, component: impl Into<String>) -> Self {
            self.component = component.into();
            self
        }

        /// Substring of the input port name; first port when unset
        pub fn with_input_port(mut self, port: impl Into<String>) -> Self {
            self.input_port = Some(port.into());
            self
        }

        /// Substring of the output port name; first port when unset
        pub fn with_output_port(mut self, port: impl Into<String>) -> Self {
            self.output_port = Some(port.into());
            self
        }

        pub fn list_input_ports() -> Result<Vec<String>> {
            let scanner = MidiInput::new("patchbay scanner")
                .map_err(|e| BridgeError::Protocol(format!("MIDI unavailable: {}", e)))?;
            let ports = scanner.ports();
            Ok(ports.iter().filter_map(|port| scanner.port_name(port).ok()).collect())
        }

        pub fn list_output_ports() -> Result<Vec<String>> {
            let scanner = MidiOutput::new("patchbay scanner")
                .map_err(|e| BridgeError::Protocol(format!("MIDI unavailable: {}", e)))?;
            let ports = scanner.ports();
            Ok(ports.iter().filter_map(|port| scanner.port_name(port).ok()).collect())
        }
    }

    fn matches_port(port_name: Option<String>, wanted: Option<&str>) -> bool {
        match (port_name, wanted) {
            (_, None) => true,
            (Some(name), Some(wanted)) => name.contains(wanted),
            (None, Some(_)) => false,
        }
    }

    /// Run the input side on its own thread; midir handles are not `Send`.
    /// Reports the opened port name, or why none could be opened.
    fn spawn_input(
        wanted: Option<String>,
        translator: SharedTranslator,
        inbound: mpsc::Sender<HubMessage>,
        state: RunState,
    ) -> oneshot::Receiver<std::result::Result<String, String>> {
        let (ready, opened) = oneshot::channel();
        thread::spawn(move || {
            let midi_in = match MidiInput::new("patchbay input") {
                Ok(midi_in) => midi_in,
                Err(e) => {
                    let _ = ready.send(Err(e.to_string()));
                    return;
                }
            };
            let port = midi_in
                .ports()
                .into_iter()
                .find(|port| matches_port(midi_in.port_name(port).ok(), wanted.as_deref()));
            let Some(port) = port else {
                let _ = ready.send(Err("no matching input port".to_string()));
                return;
            };
            let port_name = midi_in.port_name(&port).unwrap_or_else(|_| "unnamed".to_string());

            let on_bytes = move |_stamp: u64, bytes: &[u8], _: &mut ()| {
                for message in translator.lock().decode(bytes) {
                    if inbound.try_send(message).is_err() {
                        warn!("MIDI inbound queue full, message dropped");
                    }
                }
            };
            // Dropping the connection closes the port
            let _input = match midi_in.connect(&port, "patchbay-in", on_bytes, ()) {
                Ok(input) => input,
                Err(e) => {
                    let _ = ready.send(Err(e.to_string()));
                    return;
                }
            };
            let _ = ready.send(Ok(port_name));

            while state.is_live() {
                thread::sleep(POLL_INTERVAL);
            }
            debug!("MIDI input thread done");
        });
        opened
    }

    /// Run the output side on its own thread, fed by the returned sender
    fn spawn_output(wanted: Option<String>, state: RunState) -> std_mpsc::Sender<Vec<u8>> {
        let (outbound, queue) = std_mpsc::channel::<Vec<u8>>();
        thread::spawn(move || {
            let midi_out = match MidiOutput::new("patchbay output") {
                Ok(midi_out) => midi_out,
                Err(e) => {
                    warn!("MIDI output unavailable: {}", e);
                    return;
                }
            };
            let port = midi_out
                .ports()
                .into_iter()
                .find(|port| matches_port(midi_out.port_name(port).ok(), wanted.as_deref()));
            let Some(port) = port else {
                warn!("No matching MIDI output port; outbound messages are dropped");
                return;
            };
            let mut device = match midi_out.connect(&port, "patchbay-out") {
                Ok(device) => device,
                Err(e) => {
                    warn!("Cannot open MIDI output: {}", e);
                    return;
                }
            };

            while state.is_live() {
                match queue.recv_timeout(POLL_INTERVAL) {
                    Ok(bytes) => {
                        if let Err(e) = device.send(&bytes) {
                            warn!("MIDI write failed: {}", e);
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("MIDI output thread done");
        });
        outbound
    }

    #[async_trait]
    impl Connector for MidiConnector {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> ConnectorKind {
            ConnectorKind::Midi
        }

        async fn start(&mut self, events: mpsc::Sender<ConnectorEvent>) -> Result<()> {
            if self.state.is_live() {
                return Err(BridgeError::AlreadyStarted(self.name.clone()));
            }

            let translator: SharedTranslator =
                Arc::new(Mutex::new(MidiTranslator::new(self.component.clone())));
            let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER_SIZE);
            let declaration = HubMessage::component(vec![translator.lock().declaration()])?;
            let _ = inbound_tx.try_send(declaration);

            self.state.set_live(true);
            let opened = spawn_input(
                self.input_port.clone(),
                translator.clone(),
                inbound_tx,
                self.state.clone(),
            );
            let port = match opened.await {
                Ok(Ok(port)) => port,
                Ok(Err(reason)) => {
                    self.state.set_live(false);
                    return Err(BridgeError::Config(format!("MIDI input: {}", reason)));
                }
                Err(_) => {
                    self.state.set_live(false);
                    return Err(BridgeError::Protocol("MIDI input thread exited".into()));
                }
            };
            info!("MIDI connector '{}' reading from {}", self.name, port);

            let connection = Arc::new(MidiConnection {
                id: ConnectionId::next(),
                port,
                translator,
                output: Mutex::new(Some(spawn_output(self.output_port.clone(), self.state.clone()))),
                state: self.state.clone(),
            });
            let announce = ConnectorEvent::Connected {
                connection: connection.clone(),
                inbound: inbound_rx,
            };
            if events.send(announce).await.is_err() {
                self.state.set_live(false);
                return Err(BridgeError::Send("hub event channel closed".into()));
            }

            self.connection = Some(connection);
            self.events = Some(events);
            Ok(())
        }

        async fn stop(&mut self) -> Result<()> {
            // Device threads notice within one poll interval and close their ports
            self.state.set_live(false);
            let Some(connection) = self.connection.take() else {
                return Ok(());
            };
            connection.output.lock().take();
            if let Some(events) = self.events.take() {
                let _ = events
                    .send(ConnectorEvent::Disconnected {
                        connection: connection.id,
                        reason: Some("connector stopped".into()),
                    })
                    .await;
            }
            info!("MIDI connector '{}' stopped", self.name);
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.state.is_live()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::matches_port;

        #[test]
        fn test_port_matching() {
            assert!(matches_port(Some("IAC Driver Bus 1".into()), Some("IAC")));
            assert!(!matches_port(Some("IAC Driver Bus 1".into()), Some("Launchpad")));
            assert!(matches_port(None, None));
            assert!(!matches_port(None, Some("IAC")));
        }
    }
}

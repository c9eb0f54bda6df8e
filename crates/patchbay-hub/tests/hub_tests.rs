//! Hub Tests
//!
//! Runs the full event loop:
//! - Connections declared through `component` messages
//! - Mappings managed through the handle
//! - Connection teardown invalidating mappings
//! - End-to-end routing over framed TCP

use patchbay_bridge::{Connection, ConnectorConfig};
use patchbay_core::{
    codec, ChannelContent, ChannelSelection, HubMessage, MessageType, FRAME_DELIMITER,
};
use patchbay_hub::{
    ChannelMapping, HubConfig, HubError, HubHandle, HubManager, MappingConfig, ParameterOperator,
};
use patchbay_test_utils::{
    light_component, synth_component, wait_for, RecordingConnection, ScriptedConnector,
    ScriptedConnectorHandle, DEFAULT_TIMEOUT,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

struct RunningHub {
    handle: HubHandle,
    connector: ScriptedConnectorHandle,
    task: JoinHandle<patchbay_hub::Result<()>>,
}

async fn start_hub() -> RunningHub {
    let (connector, scripted) = ScriptedConnector::new("scripted");
    let mut hub = HubManager::new("test");
    hub.add_connector(Box::new(connector));
    hub.start().await.unwrap();
    let handle = hub.handle();
    RunningHub {
        handle,
        connector: scripted,
        task: tokio::spawn(hub.run()),
    }
}

async fn wait_for_components(handle: &HubHandle, n: usize) -> bool {
    let deadline = tokio::time::Instant::now() + DEFAULT_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if matches!(handle.components().await, Ok(c) if c.len() == n) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn note_mapping() -> ChannelMapping {
    ChannelMapping::new(
        ChannelSelection::new("synth", "note"),
        ChannelSelection::new("light", "brightness"),
    )
    .with_parameter("pitch", "level", vec![ParameterOperator::Scale { factor: 0.1 }])
    .unwrap()
}

fn note(instance: &str, pitch: f64) -> ChannelContent {
    ChannelContent::new("synth", "note")
        .with_instance(instance)
        .with_parameter("pitch", vec![pitch])
        .with_parameter("velocity", vec![90.0])
}

#[tokio::test]
async fn test_routes_between_connections() {
    let hub = start_hub().await;
    hub.handle.add_mapping(note_mapping()).await.unwrap();

    let synth = RecordingConnection::new();
    let light = RecordingConnection::new();
    let synth_tx = hub.connector.connect(synth.as_dyn()).await.unwrap();
    let light_tx = hub.connector.connect(light.as_dyn()).await.unwrap();

    synth_tx
        .send(HubMessage::component(vec![synth_component()]).unwrap())
        .await
        .unwrap();
    light_tx
        .send(HubMessage::component(vec![light_component()]).unwrap())
        .await
        .unwrap();
    assert!(wait_for_components(&hub.handle, 2).await);

    let mappings = hub.handle.mappings().await.unwrap();
    assert!(mappings[0].input_valid);
    assert!(mappings[0].output_valid);

    synth_tx
        .send(HubMessage::create(note("n1", 64.0)).unwrap())
        .await
        .unwrap();
    assert!(light.wait_for_sent(1, DEFAULT_TIMEOUT).await);

    let sent = light.take_sent();
    assert_eq!(sent[0].message_type(), MessageType::Create);
    assert_eq!(sent[0].instance(), Some("n1"));
    let level = sent[0].channel_content().unwrap().parameter("level").unwrap()[0];
    assert!((level - 6.4).abs() < 1e-9);

    hub.handle.shutdown().await;
    hub.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_disconnect_invalidates_mapping() {
    let hub = start_hub().await;
    hub.handle.add_mapping(note_mapping()).await.unwrap();

    let synth = RecordingConnection::new();
    let light = RecordingConnection::new();
    let synth_tx = hub.connector.connect(synth.as_dyn()).await.unwrap();
    let light_tx = hub.connector.connect(light.as_dyn()).await.unwrap();
    synth_tx
        .send(HubMessage::component(vec![synth_component()]).unwrap())
        .await
        .unwrap();
    light_tx
        .send(HubMessage::component(vec![light_component()]).unwrap())
        .await
        .unwrap();
    assert!(wait_for_components(&hub.handle, 2).await);

    hub.connector.disconnect(light.id()).await;
    assert!(wait_for_components(&hub.handle, 1).await);

    let mappings = hub.handle.mappings().await.unwrap();
    assert_eq!(mappings.len(), 1);
    assert!(!mappings[0].output_valid);

    synth_tx
        .send(HubMessage::create(note("n1", 64.0)).unwrap())
        .await
        .unwrap();
    // Closing the inbound stream tears the connection down as well
    drop(synth_tx);
    assert!(wait_for_components(&hub.handle, 0).await);
    assert!(!wait_for(|| light.sent_count() > 0, Duration::from_millis(50)).await);

    hub.handle.shutdown().await;
    hub.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_messages_sent_before_disconnect_are_routed() {
    let hub = start_hub().await;
    hub.handle.add_mapping(note_mapping()).await.unwrap();

    let light = RecordingConnection::new();
    let light_tx = hub.connector.connect(light.as_dyn()).await.unwrap();
    light_tx
        .send(HubMessage::component(vec![light_component()]).unwrap())
        .await
        .unwrap();
    assert!(wait_for_components(&hub.handle, 1).await);

    // Declare, play and release a note, then hang up at once
    let synth = RecordingConnection::new();
    let synth_tx = hub.connector.connect(synth.as_dyn()).await.unwrap();
    for message in [
        HubMessage::component(vec![synth_component()]).unwrap(),
        HubMessage::create(note("n1", 64.0)).unwrap(),
        HubMessage::destroy(note("n1", 64.0)).unwrap(),
    ] {
        synth_tx.send(message).await.unwrap();
    }
    drop(synth_tx);
    hub.connector.disconnect(synth.id()).await;

    assert!(light.wait_for_sent(2, DEFAULT_TIMEOUT).await);
    let sent = light.take_sent();
    assert_eq!(sent[0].message_type(), MessageType::Create);
    assert_eq!(sent[1].message_type(), MessageType::Destroy);
    assert_eq!(sent[1].instance(), Some("n1"));

    // The synth is still removed once its queue is drained
    assert!(wait_for_components(&hub.handle, 1).await);
    let components = hub.handle.components().await.unwrap();
    assert_eq!(components[0].identifier, "light");

    hub.handle.shutdown().await;
    hub.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_disconnect_while_inbound_open_still_tears_down() {
    let hub = start_hub().await;

    let synth = RecordingConnection::new();
    let synth_tx = hub.connector.connect(synth.as_dyn()).await.unwrap();
    synth_tx
        .send(HubMessage::component(vec![synth_component()]).unwrap())
        .await
        .unwrap();
    assert!(wait_for_components(&hub.handle, 1).await);

    // The connector reports the close while still holding the inbound sender
    hub.connector.disconnect(synth.id()).await;
    assert!(wait_for_components(&hub.handle, 0).await);
    drop(synth_tx);

    hub.handle.shutdown().await;
    hub.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_rejected_declaration_keeps_owner() {
    let hub = start_hub().await;

    let first = RecordingConnection::new();
    let second = RecordingConnection::new();
    let first_tx = hub.connector.connect(first.as_dyn()).await.unwrap();
    let second_tx = hub.connector.connect(second.as_dyn()).await.unwrap();

    first_tx
        .send(HubMessage::component(vec![synth_component()]).unwrap())
        .await
        .unwrap();
    assert!(wait_for_components(&hub.handle, 1).await);

    second_tx
        .send(HubMessage::component(vec![synth_component(), light_component()]).unwrap())
        .await
        .unwrap();
    // A later declaration from the owner proves the rejected one was processed
    first_tx
        .send(HubMessage::component(vec![synth_component()]).unwrap())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let components = hub.handle.components().await.unwrap();
    assert_eq!(components.len(), 1);
    assert_eq!(components[0].identifier, "synth");

    hub.handle.shutdown().await;
    hub.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_mapping_commands() {
    let hub = start_hub().await;

    assert_eq!(hub.handle.add_mapping(note_mapping()).await.unwrap(), 0);
    assert!(matches!(
        hub.handle.insert_mapping(3, note_mapping()).await,
        Err(HubError::IndexOutOfBounds { index: 3, len: 1 })
    ));
    hub.handle.insert_mapping(0, note_mapping()).await.unwrap();
    assert_eq!(hub.handle.mappings().await.unwrap().len(), 2);

    let removed = hub.handle.remove_mapping(1).await.unwrap();
    assert_eq!(removed.output, "light.brightness");
    assert!(matches!(
        hub.handle.remove_mapping(1).await,
        Err(HubError::IndexOutOfBounds { .. })
    ));

    hub.handle.shutdown().await;
    hub.task.await.unwrap().unwrap();
    assert!(matches!(hub.handle.mappings().await, Err(HubError::Stopped)));
}

// ============================================================================
// TCP
// ============================================================================

async fn write_frame(stream: &mut TcpStream, message: &HubMessage) {
    let mut frame = vec![FRAME_DELIMITER];
    frame.extend_from_slice(&codec::encode(message).unwrap());
    frame.push(FRAME_DELIMITER);
    stream.write_all(&frame).await.unwrap();
}

async fn read_frame(stream: &mut TcpStream, buffer: &mut Vec<u8>) -> HubMessage {
    loop {
        let start = buffer.iter().position(|b| *b != FRAME_DELIMITER);
        if let Some(start) = start {
            if let Some(len) = buffer[start..].iter().position(|b| *b == FRAME_DELIMITER) {
                let message = codec::decode(&buffer[start..start + len]).unwrap();
                buffer.drain(..start + len);
                return message;
            }
        }
        let mut chunk = [0u8; 4096];
        let n = timeout(DEFAULT_TIMEOUT, stream.read(&mut chunk))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0, "connection closed");
        buffer.extend_from_slice(&chunk[..n]);
    }
}

#[tokio::test]
async fn test_tcp_end_to_end() {
    let config = HubConfig::default()
        .with_connector(ConnectorConfig::new("main", "tcp").with_bind("127.0.0.1:0"))
        .with_mapping(MappingConfig::new("synth.note", "light.brightness").with_parameter(
            "pitch",
            "level",
            vec![ParameterOperator::Scale { factor: 0.1 }],
        ));
    let mut hub = HubManager::from_config(config).unwrap();
    hub.start().await.unwrap();
    let addr = hub.connectors()[0].local_addr().unwrap();
    let handle = hub.handle();
    let task = tokio::spawn(hub.run());

    let mut synth = TcpStream::connect(addr).await.unwrap();
    let mut light = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut synth, &HubMessage::component(vec![synth_component()]).unwrap()).await;
    write_frame(&mut light, &HubMessage::component(vec![light_component()]).unwrap()).await;
    assert!(wait_for_components(&handle, 2).await);

    // A malformed frame is dropped; the connection keeps working
    synth.write_all(b"\0{not json\0").await.unwrap();
    write_frame(&mut synth, &HubMessage::create(note("n1", 64.0)).unwrap()).await;
    write_frame(&mut synth, &HubMessage::destroy(note("n1", 64.0)).unwrap()).await;

    let mut buffer = Vec::new();
    let created = read_frame(&mut light, &mut buffer).await;
    let destroyed = read_frame(&mut light, &mut buffer).await;
    assert_eq!(created.message_type(), MessageType::Create);
    assert_eq!(destroyed.message_type(), MessageType::Destroy);
    assert_eq!(created.instance(), Some("n1"));
    assert_eq!(destroyed.instance(), Some("n1"));
    let level = created.channel_content().unwrap().parameter("level").unwrap()[0];
    assert!((level - 6.4).abs() < 1e-9);

    drop(synth);
    assert!(wait_for_components(&handle, 1).await);

    handle.shutdown().await;
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_connection_count_follows_lifecycle() {
    let (connector, scripted) = ScriptedConnector::new("scripted");
    let mut hub = HubManager::new("test");
    hub.add_connector(Box::new(connector));
    hub.start().await.unwrap();
    assert!(hub.connectors()[0].is_running());
    assert_eq!(hub.connection_count(), 0);

    let conn: Arc<dyn Connection> = RecordingConnection::shared();
    // Event loop not running yet: the event stays queued
    let _tx = scripted.connect(conn).await.unwrap();

    let handle = hub.handle();
    let task = tokio::spawn(hub.run());
    handle.shutdown().await;
    task.await.unwrap().unwrap();
    assert!(scripted.connect(RecordingConnection::shared()).await.is_none());
}

#[tokio::test]
async fn test_tcp_burst_then_close_is_delivered() {
    let config = HubConfig::default()
        .with_connector(ConnectorConfig::new("main", "tcp").with_bind("127.0.0.1:0"))
        .with_mapping(MappingConfig::new("synth.note", "light.brightness").with_parameter(
            "pitch",
            "level",
            vec![ParameterOperator::Scale { factor: 0.1 }],
        ));
    let mut hub = HubManager::from_config(config).unwrap();
    hub.start().await.unwrap();
    let addr = hub.connectors()[0].local_addr().unwrap();
    let handle = hub.handle();
    let task = tokio::spawn(hub.run());

    let mut light = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut light, &HubMessage::component(vec![light_component()]).unwrap()).await;
    assert!(wait_for_components(&handle, 1).await);

    let mut buffer = Vec::new();
    for round in 0..10 {
        let instance = format!("n{}", round);
        let mut synth = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut synth, &HubMessage::component(vec![synth_component()]).unwrap()).await;
        write_frame(&mut synth, &HubMessage::create(note(&instance, 64.0)).unwrap()).await;
        write_frame(&mut synth, &HubMessage::destroy(note(&instance, 64.0)).unwrap()).await;
        drop(synth);

        let created = read_frame(&mut light, &mut buffer).await;
        let destroyed = read_frame(&mut light, &mut buffer).await;
        assert_eq!(created.message_type(), MessageType::Create);
        assert_eq!(destroyed.message_type(), MessageType::Destroy);
        assert_eq!(destroyed.instance(), Some(instance.as_str()));

        // The next round redeclares synth, so wait for this one to be gone
        assert!(wait_for_components(&handle, 1).await);
    }

    handle.shutdown().await;
    task.await.unwrap().unwrap();
}

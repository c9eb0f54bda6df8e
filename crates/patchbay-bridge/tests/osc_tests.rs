//! OSC Connector Tests
//!
//! Sends real UDP packets through a started OSC connector.

#![cfg(feature = "osc")]

use patchbay_bridge::{Connector, ConnectorEvent, OscConnector};
use patchbay_core::{ChannelContent, HubMessage, MessageType};
use rosc::{OscMessage, OscPacket, OscType};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_osc_roundtrip_through_connector() {
    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let peer_addr = peer.local_addr().unwrap();

    let mut connector = OscConnector::new("desk", "127.0.0.1:0")
        .with_component("desk")
        .with_remote(peer_addr.to_string());
    let (tx, mut events) = mpsc::channel(4);
    connector.start(tx).await.unwrap();
    let bound = connector.local_addr().unwrap();

    let (connection, mut inbound) = match timeout(WAIT, events.recv()).await.unwrap() {
        Some(ConnectorEvent::Connected { connection, inbound }) => (connection, inbound),
        other => panic!("expected Connected, got {:?}", other),
    };

    let packet = OscPacket::Message(OscMessage {
        addr: "/fader/level".into(),
        args: vec![OscType::Float(0.75)],
    });
    peer.send_to(&rosc::encoder::encode(&packet).unwrap(), bound)
        .await
        .unwrap();

    let message = timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
    assert_eq!(message.message_type(), MessageType::Control);
    let content = message.channel_content().unwrap();
    assert_eq!(content.component, "desk");
    assert_eq!(content.channel, "fader");
    assert_eq!(content.parameter("level"), Some(&[0.75][..]));

    let outbound = HubMessage::control(
        ChannelContent::new("desk", "motor").with_parameter("position", vec![0.25]),
    )
    .unwrap();
    connection.send_message(&outbound).unwrap();

    let mut buf = [0u8; 1024];
    let (len, _) = timeout(WAIT, peer.recv_from(&mut buf)).await.unwrap().unwrap();
    let (_, packet) = rosc::decoder::decode_udp(&buf[..len]).unwrap();
    let OscPacket::Message(msg) = packet else {
        panic!("expected message");
    };
    assert_eq!(msg.addr, "/motor/position");
    assert_eq!(msg.args, vec![OscType::Float(0.25)]);

    connector.stop().await.unwrap();
    assert!(connection.send_message(&outbound).is_err());
}

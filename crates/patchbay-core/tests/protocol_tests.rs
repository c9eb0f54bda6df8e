//! Protocol Tests
//!
//! Wire-level behaviour of the envelope codec:
//! - Declaration parsing (component/channel/parameter JSON)
//! - Channel message variants and their required fields
//! - Structural validation failures

use patchbay_core::{
    codec, ChannelContent, ChannelFlow, ChannelType, Error, HubMessage, MessageContent,
    MessageType,
};
use serde_json::json;

fn component_envelope(channels: usize) -> serde_json::Value {
    let channels: Vec<_> = (0..channels)
        .map(|i| {
            json!({
                "identifier": format!("ch{}", i),
                "flow": if i % 2 == 0 { "Emitter" } else { "Receiver" },
                "type": "Control",
                "parameters": [
                    { "identifier": "value", "defaultValue": 0.5, "range": { "min": 0, "max": 1 } }
                ]
            })
        })
        .collect();

    json!({
        "type": "component",
        "date": "1700000000000",
        "content": { "components": [ { "identifier": "mixer-🎚", "channels": channels } ] }
    })
}

#[test]
fn test_component_declaration_channel_counts() {
    for n in [0usize, 1, 2, 7, 32] {
        let bytes = serde_json::to_vec(&component_envelope(n)).unwrap();
        let msg = codec::decode(&bytes).unwrap();

        let MessageContent::Component(content) = msg.content() else {
            panic!("expected component content");
        };
        assert_eq!(content.components.len(), 1);
        assert_eq!(content.components[0].identifier, "mixer-🎚");
        assert_eq!(content.components[0].channels.len(), n);
    }
}

#[test]
fn test_component_declaration_survives_reencode() {
    let bytes = serde_json::to_vec(&component_envelope(3)).unwrap();
    let msg = codec::decode(&bytes).unwrap();
    let again = codec::decode(&codec::encode(&msg).unwrap()).unwrap();
    assert_eq!(msg, again);

    let MessageContent::Component(content) = again.content() else {
        panic!("expected component content");
    };
    let channel = &content.components[0].channels[1];
    assert_eq!(channel.flow, ChannelFlow::Receiver);
    assert_eq!(channel.kind, ChannelType::Control);
    assert_eq!(channel.parameters[0].default_value, 0.5);
}

#[test]
fn test_invalid_range_rejected_at_decode() {
    let envelope = json!({
        "type": "component",
        "date": 1,
        "content": { "components": [ {
            "identifier": "bad",
            "channels": [ {
                "identifier": "c", "flow": "Emitter", "type": "Event",
                "parameters": [ { "identifier": "p", "defaultValue": 0, "range": { "min": 5, "max": 1 } } ]
            } ]
        } ] }
    });
    let result = codec::decode(&serde_json::to_vec(&envelope).unwrap());
    assert!(matches!(result, Err(Error::InvalidRange { .. })));
}

#[test]
fn test_unknown_flow_is_malformed() {
    let envelope = json!({
        "type": "component",
        "date": 1,
        "content": { "components": [ {
            "identifier": "bad",
            "channels": [ { "identifier": "c", "flow": "Sideways", "type": "Event", "parameters": [] } ]
        } ] }
    });
    let result = codec::decode(&serde_json::to_vec(&envelope).unwrap());
    assert!(matches!(result, Err(Error::MalformedEnvelope(_))));
}

#[test]
fn test_channel_messages() {
    let create = json!({
        "type": "create",
        "date": 10,
        "content": {
            "component": "synth", "channel": "note", "instance": "n1", "key": null,
            "parameters": { "pitch": [64], "velocity": [90] }
        }
    });
    let msg = codec::decode(&serde_json::to_vec(&create).unwrap()).unwrap();
    assert_eq!(msg.message_type(), MessageType::Create);
    assert_eq!(msg.instance(), Some("n1"));
    let content = msg.channel_content().unwrap();
    assert_eq!(content.parameter("pitch"), Some(&[64.0][..]));
    assert_eq!(content.parameter("missing"), None);
}

#[test]
fn test_action_without_key_is_malformed() {
    let action = json!({
        "type": "action",
        "date": 10,
        "content": { "component": "a", "channel": "b", "parameters": {} }
    });
    let result = codec::decode(&serde_json::to_vec(&action).unwrap());
    assert!(matches!(result, Err(Error::MalformedEnvelope(_))));
}

#[test]
fn test_destroy_without_instance_is_malformed() {
    let destroy = json!({
        "type": "destroy",
        "date": 10,
        "content": { "component": "a", "channel": "b", "instance": null, "parameters": {} }
    });
    let result = codec::decode(&serde_json::to_vec(&destroy).unwrap());
    assert!(matches!(result, Err(Error::MalformedEnvelope(_))));
}

#[test]
fn test_non_numeric_parameter_is_malformed() {
    let control = json!({
        "type": "control",
        "date": 10,
        "content": { "component": "a", "channel": "b", "parameters": { "x": ["loud"] } }
    });
    let result = codec::decode(&serde_json::to_vec(&control).unwrap());
    assert!(matches!(result, Err(Error::MalformedEnvelope(_))));
}

#[test]
fn test_control_message_encode() {
    let msg = HubMessage::control(
        ChannelContent::new("light", "brightness").with_parameter("level", vec![0.25, 0.5]),
    )
    .unwrap();
    let text = codec::encode_to_string(&msg).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["content"]["component"], "light");
    assert_eq!(value["content"]["parameters"]["level"], json!([0.25, 0.5]));
}

#[test]
fn test_declaration_document() {
    let doc = json!({
        "components": [
            { "identifier": "osc-desk", "channels": [
                { "identifier": "fader", "flow": "Emitter", "type": "Control",
                  "parameters": [ { "identifier": "level", "defaultValue": 0, "range": { "min": 0, "max": 1 } } ] }
            ] }
        ]
    });
    let components = codec::decode_component_document(&serde_json::to_vec(&doc).unwrap()).unwrap();
    assert_eq!(components.len(), 1);
    assert_eq!(components[0].channel("fader").unwrap().parameters.len(), 1);
}

//! JSON codec for the wire envelope
//!
//! Wire shape:
//!
//! ```json
//! { "type": "create", "date": "1700000000000",
//!   "content": { "component": "synth", "channel": "note", "instance": "n1",
//!                "key": null, "parameters": { "pitch": [64] } } }
//! ```
//!
//! `date` is accepted as a string or a number of milliseconds and is always
//! written as a string.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::message::{ChannelContent, ComponentContent, HubMessage, MessageContent, MessageType};
use crate::time::Timestamp;
use crate::types::ComponentInfo;

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    date: Option<JsonValue>,
    content: Option<JsonValue>,
}

#[derive(Serialize)]
struct WireEnvelope<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: &'static str,
    date: String,
    content: &'a T,
}

/// Encode a message to JSON bytes
pub fn encode(message: &HubMessage) -> Result<Bytes> {
    Ok(Bytes::from(encode_to_string(message)?))
}

/// Encode a message to a JSON string
pub fn encode_to_string(message: &HubMessage) -> Result<String> {
    let kind = message.message_type().as_str();
    let date = message.timestamp().to_string();
    let json = match message.content() {
        MessageContent::Component(content) => serde_json::to_string(&WireEnvelope {
            kind,
            date,
            content,
        })?,
        MessageContent::Control(content)
        | MessageContent::Action(content)
        | MessageContent::Create(content)
        | MessageContent::Destroy(content) => serde_json::to_string(&WireEnvelope {
            kind,
            date,
            content,
        })?,
    };
    Ok(json)
}

/// Decode one envelope from JSON bytes
pub fn decode(data: &[u8]) -> Result<HubMessage> {
    let raw: RawEnvelope = serde_json::from_slice(data)
        .map_err(|e| Error::MalformedEnvelope(format!("invalid json: {}", e)))?;
    decode_raw(raw)
}

/// Decode one envelope from a JSON string
pub fn decode_str(data: &str) -> Result<HubMessage> {
    decode(data.as_bytes())
}

fn decode_raw(raw: RawEnvelope) -> Result<HubMessage> {
    let kind = raw
        .kind
        .ok_or_else(|| Error::MalformedEnvelope("missing field `type`".into()))?;
    let message_type =
        MessageType::parse(&kind).ok_or(Error::UnsupportedMessageType(kind))?;

    let date = raw
        .date
        .ok_or_else(|| Error::MalformedEnvelope("missing field `date`".into()))?;
    let timestamp = parse_date(&date)?;

    let content = raw
        .content
        .ok_or_else(|| Error::MalformedEnvelope("missing field `content`".into()))?;

    let content = match message_type {
        MessageType::Component => {
            let content: ComponentContent = serde_json::from_value(content)
                .map_err(|e| Error::MalformedEnvelope(format!("component content: {}", e)))?;
            MessageContent::Component(content)
        }
        other => {
            let content: ChannelContent = serde_json::from_value(content)
                .map_err(|e| Error::MalformedEnvelope(format!("{} content: {}", other, e)))?;
            MessageContent::channel(other, content)?
        }
    };

    HubMessage::at(content, timestamp)
}

fn parse_date(date: &JsonValue) -> Result<Timestamp> {
    match date {
        JsonValue::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .ok_or_else(|| Error::MalformedEnvelope(format!("invalid date: {}", n))),
        JsonValue::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| Error::MalformedEnvelope(format!("invalid date: {:?}", s))),
        other => Err(Error::MalformedEnvelope(format!("invalid date: {}", other))),
    }
}

/// Decode a declaration document (`{ "components": [...] }`), as found in
/// declaration files
pub fn decode_component_document(data: &[u8]) -> Result<Vec<ComponentInfo>> {
    let content: ComponentContent = serde_json::from_slice(data)
        .map_err(|e| Error::MalformedEnvelope(format!("declaration document: {}", e)))?;
    for component in &content.components {
        component.validate()?;
    }
    Ok(content.components)
}

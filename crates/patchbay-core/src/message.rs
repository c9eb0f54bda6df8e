//! Message envelope and content variants
//!
//! Every message exchanged with a component is a [`HubMessage`]: a timestamp
//! plus exactly one [`MessageContent`] variant. The message type is derived
//! from the variant, so type and content can never disagree.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::time::{self, Timestamp};
use crate::types::ComponentInfo;

/// Closed set of message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Component,
    Control,
    Action,
    Create,
    Destroy,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Component => "component",
            MessageType::Control => "control",
            MessageType::Action => "action",
            MessageType::Create => "create",
            MessageType::Destroy => "destroy",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "component" => Some(MessageType::Component),
            "control" => Some(MessageType::Control),
            "action" => Some(MessageType::Action),
            "create" => Some(MessageType::Create),
            "destroy" => Some(MessageType::Destroy),
            _ => None,
        }
    }

    /// Whether messages of this type address a single channel
    pub fn is_channel(&self) -> bool {
        !matches!(self, MessageType::Component)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content of a `component` message: the full declaration set of a connection
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComponentContent {
    pub components: Vec<ComponentInfo>,
}

/// Content of `control`, `action`, `create` and `destroy` messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelContent {
    pub component: String,
    pub channel: String,
    #[serde(default)]
    pub instance: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, Vec<f64>>,
}

impl ChannelContent {
    pub fn new(component: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            channel: channel.into(),
            instance: None,
            key: None,
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.parameters.insert(name.into(), values);
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&[f64]> {
        self.parameters.get(name).map(Vec::as_slice)
    }
}

/// Typed message content
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Component(ComponentContent),
    Control(ChannelContent),
    Action(ChannelContent),
    Create(ChannelContent),
    Destroy(ChannelContent),
}

impl MessageContent {
    pub fn message_type(&self) -> MessageType {
        match self {
            MessageContent::Component(_) => MessageType::Component,
            MessageContent::Control(_) => MessageType::Control,
            MessageContent::Action(_) => MessageType::Action,
            MessageContent::Create(_) => MessageType::Create,
            MessageContent::Destroy(_) => MessageType::Destroy,
        }
    }

    /// Build channel content of the given type, checking the per-type required fields
    pub fn channel(message_type: MessageType, content: ChannelContent) -> Result<Self> {
        let content = match message_type {
            MessageType::Component => {
                return Err(Error::UnsupportedMessageType(
                    "component messages carry no channel content".into(),
                ))
            }
            MessageType::Control => MessageContent::Control(content),
            MessageType::Action => MessageContent::Action(content),
            MessageType::Create => MessageContent::Create(content),
            MessageType::Destroy => MessageContent::Destroy(content),
        };
        content.validate()?;
        Ok(content)
    }

    fn validate(&self) -> Result<()> {
        match self {
            MessageContent::Component(content) => {
                for component in &content.components {
                    component.validate()?;
                }
                Ok(())
            }
            MessageContent::Action(c) if c.key.is_none() => Err(Error::MalformedEnvelope(
                "action message requires a key".into(),
            )),
            MessageContent::Create(c) | MessageContent::Destroy(c) if c.instance.is_none() => {
                Err(Error::MalformedEnvelope(format!(
                    "{} message requires an instance",
                    self.message_type()
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Immutable message envelope
#[derive(Debug, Clone, PartialEq)]
pub struct HubMessage {
    timestamp: Timestamp,
    content: MessageContent,
}

impl HubMessage {
    /// Validate `content` and stamp it with the current time
    pub fn new(content: MessageContent) -> Result<Self> {
        Self::at(content, time::now())
    }

    /// Validate `content` and stamp it with `timestamp`
    pub fn at(content: MessageContent, timestamp: Timestamp) -> Result<Self> {
        content.validate()?;
        Ok(Self { timestamp, content })
    }

    pub fn component(components: Vec<ComponentInfo>) -> Result<Self> {
        Self::new(MessageContent::Component(ComponentContent { components }))
    }

    pub fn control(content: ChannelContent) -> Result<Self> {
        Self::new(MessageContent::Control(content))
    }

    pub fn action(content: ChannelContent) -> Result<Self> {
        Self::new(MessageContent::Action(content))
    }

    pub fn create(content: ChannelContent) -> Result<Self> {
        Self::new(MessageContent::Create(content))
    }

    pub fn destroy(content: ChannelContent) -> Result<Self> {
        Self::new(MessageContent::Destroy(content))
    }

    pub fn message_type(&self) -> MessageType {
        self.content.message_type()
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn content(&self) -> &MessageContent {
        &self.content
    }

    pub fn into_content(self) -> MessageContent {
        self.content
    }

    /// Channel content, for every type except `component`
    pub fn channel_content(&self) -> Option<&ChannelContent> {
        match &self.content {
            MessageContent::Component(_) => None,
            MessageContent::Control(c)
            | MessageContent::Action(c)
            | MessageContent::Create(c)
            | MessageContent::Destroy(c) => Some(c),
        }
    }

    /// Instance id carried by a channel message, if any
    pub fn instance(&self) -> Option<&str> {
        self.channel_content().and_then(|c| c.instance.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_requires_key() {
        let content = ChannelContent::new("a", "b");
        assert!(matches!(
            HubMessage::action(content.clone()),
            Err(Error::MalformedEnvelope(_))
        ));
        assert!(HubMessage::action(content.with_key("go")).is_ok());
    }

    #[test]
    fn test_create_destroy_require_instance() {
        let content = ChannelContent::new("a", "b");
        assert!(HubMessage::create(content.clone()).is_err());
        assert!(HubMessage::destroy(content.clone()).is_err());
        let msg = HubMessage::create(content.with_instance("n1")).unwrap();
        assert_eq!(msg.instance(), Some("n1"));
        assert_eq!(msg.message_type(), MessageType::Create);
    }

    #[test]
    fn test_channel_content_of_component_type_rejected() {
        let result = MessageContent::channel(MessageType::Component, ChannelContent::new("a", "b"));
        assert!(matches!(result, Err(Error::UnsupportedMessageType(_))));
    }

    #[test]
    fn test_message_type_names() {
        for t in [
            MessageType::Component,
            MessageType::Control,
            MessageType::Action,
            MessageType::Create,
            MessageType::Destroy,
        ] {
            assert_eq!(MessageType::parse(t.as_str()), Some(t));
        }
        assert_eq!(MessageType::parse("CONTROL"), None);
    }
}

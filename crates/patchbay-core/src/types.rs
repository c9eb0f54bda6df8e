//! Declaration model
//!
//! A connected component describes itself with a [`ComponentInfo`]: an
//! identifier plus an ordered list of channels, each of which carries an
//! ordered list of parameters. Declarations are replaced wholesale, never
//! edited in place.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{Error, Result};

/// Direction of a channel, seen from the component that declares it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelFlow {
    /// The component produces messages on this channel
    Emitter,
    /// The component consumes messages on this channel
    Receiver,
}

/// Semantic kind of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelType {
    /// Discrete events with a create/destroy lifecycle (e.g. notes)
    Event,
    /// Continuous control values
    Control,
    /// Free-running generated values
    Generator,
}

/// Numeric range of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

impl Default for Range {
    fn default() -> Self {
        Self { min: 0.0, max: 1.0 }
    }
}

/// One numeric parameter of a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterInfo {
    pub identifier: String,
    #[serde(rename = "defaultValue", default)]
    pub default_value: f64,
    #[serde(default)]
    pub range: Range,
}

impl ParameterInfo {
    pub fn new(identifier: impl Into<String>, default_value: f64, range: Range) -> Self {
        Self {
            identifier: identifier.into(),
            default_value,
            range,
        }
    }

    /// Check the `min <= max` invariant
    pub fn validate(&self) -> Result<()> {
        let Range { min, max } = self.range;
        if min.is_nan() || max.is_nan() || min > max {
            return Err(Error::InvalidRange {
                parameter: self.identifier.clone(),
                min: self.range.min,
                max: self.range.max,
            });
        }
        Ok(())
    }
}

/// One channel of a component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub identifier: String,
    pub flow: ChannelFlow,
    #[serde(rename = "type")]
    pub kind: ChannelType,
    #[serde(default)]
    pub parameters: Vec<ParameterInfo>,
}

impl ChannelInfo {
    pub fn new(identifier: impl Into<String>, flow: ChannelFlow, kind: ChannelType) -> Self {
        Self {
            identifier: identifier.into(),
            flow,
            kind,
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: ParameterInfo) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn parameter(&self, identifier: &str) -> Option<&ParameterInfo> {
        self.parameters.iter().find(|p| p.identifier == identifier)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for parameter in &self.parameters {
            if !seen.insert(parameter.identifier.as_str()) {
                return Err(Error::DuplicateIdentifier {
                    scope: "parameter",
                    identifier: parameter.identifier.clone(),
                });
            }
            parameter.validate()?;
        }
        Ok(())
    }
}

/// Everything a connected component offers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub identifier: String,
    #[serde(default)]
    pub channels: Vec<ChannelInfo>,
}

impl ComponentInfo {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            channels: Vec::new(),
        }
    }

    pub fn with_channel(mut self, channel: ChannelInfo) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn channel(&self, identifier: &str) -> Option<&ChannelInfo> {
        self.channels.iter().find(|c| c.identifier == identifier)
    }

    /// Validate identifiers and parameter ranges of the whole declaration
    pub fn validate(&self) -> Result<()> {
        if self.identifier.is_empty() {
            return Err(Error::MalformedEnvelope(
                "component identifier must not be empty".into(),
            ));
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel.identifier.as_str()) {
                return Err(Error::DuplicateIdentifier {
                    scope: "channel",
                    identifier: channel.identifier.clone(),
                });
            }
            channel.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synth() -> ComponentInfo {
        ComponentInfo::new("synth").with_channel(
            ChannelInfo::new("note", ChannelFlow::Emitter, ChannelType::Event)
                .with_parameter(ParameterInfo::new("pitch", 60.0, Range::new(0.0, 127.0)))
                .with_parameter(ParameterInfo::new("velocity", 0.0, Range::new(0.0, 127.0))),
        )
    }

    #[test]
    fn test_valid_declaration() {
        assert!(synth().validate().is_ok());
        assert_eq!(synth().channel("note").unwrap().parameters.len(), 2);
    }

    #[test]
    fn test_invalid_range() {
        let info = ComponentInfo::new("bad").with_channel(
            ChannelInfo::new("c", ChannelFlow::Receiver, ChannelType::Control)
                .with_parameter(ParameterInfo::new("p", 0.0, Range::new(1.0, 0.0))),
        );
        assert!(matches!(
            info.validate(),
            Err(Error::InvalidRange { ref parameter, .. }) if parameter == "p"
        ));
    }

    #[test]
    fn test_duplicate_channel() {
        let info = synth().with_channel(ChannelInfo::new(
            "note",
            ChannelFlow::Receiver,
            ChannelType::Control,
        ));
        assert!(matches!(
            info.validate(),
            Err(Error::DuplicateIdentifier { scope: "channel", .. })
        ));
    }

    #[test]
    fn test_wire_field_names() {
        let json = serde_json::to_value(synth()).unwrap();
        let channel = &json["channels"][0];
        assert_eq!(channel["type"], "Event");
        assert_eq!(channel["flow"], "Emitter");
        assert_eq!(channel["parameters"][0]["defaultValue"], 60.0);
        assert_eq!(channel["parameters"][0]["range"]["max"], 127.0);
    }
}

//! Selections
//!
//! A selection names a declared entity by identifier and remembers whether
//! the last validation against the registry found it. Selections outlive the
//! declarations they point at: the registry never deletes them, it only flips
//! their `valid` flag.
//!
//! Composition mirrors the declaration model: a [`ParameterSelection`] owns a
//! [`ChannelSelection`], which owns a [`ComponentSelection`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to a component by identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentSelection {
    pub identifier: String,
    #[serde(skip)]
    valid: bool,
}

impl ComponentSelection {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            valid: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }
}

impl fmt::Display for ComponentSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identifier)
    }
}

/// Reference to a channel of a component
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelSelection {
    pub component: ComponentSelection,
    pub identifier: String,
    #[serde(skip)]
    valid: bool,
}

impl ChannelSelection {
    pub fn new(component: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            component: ComponentSelection::new(component),
            identifier: identifier.into(),
            valid: false,
        }
    }

    /// Parse `component.channel`
    pub fn parse(path: &str) -> Option<Self> {
        let (component, channel) = path.split_once('.')?;
        if component.is_empty() || channel.is_empty() {
            return None;
        }
        Some(Self::new(component, channel))
    }

    pub fn component_id(&self) -> &str {
        &self.component.identifier
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }

    /// Check whether a message's component/channel pair addresses this selection
    pub fn addresses(&self, component: &str, channel: &str) -> bool {
        self.component.identifier == component && self.identifier == channel
    }
}

impl fmt::Display for ChannelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.component, self.identifier)
    }
}

/// Reference to a parameter of a channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterSelection {
    pub channel: ChannelSelection,
    pub identifier: String,
    #[serde(skip)]
    valid: bool,
}

impl ParameterSelection {
    pub fn new(channel: ChannelSelection, identifier: impl Into<String>) -> Self {
        Self {
            channel,
            identifier: identifier.into(),
            valid: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }
}

impl fmt::Display for ParameterSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.channel, self.identifier)
    }
}

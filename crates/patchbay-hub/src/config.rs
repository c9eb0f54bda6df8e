//! Hub configuration
//!
//! ```toml
//! name = "studio"
//!
//! [[connectors]]
//! name = "main"
//! kind = "tcp"
//! bind = "0.0.0.0:7350"
//!
//! [[connectors]]
//! name = "desk"
//! kind = "osc"
//! remote = "127.0.0.1:9001"
//! declarations = "desk.json"
//!
//! [[mappings]]
//! input = "synth.note"
//! output = "light.brightness"
//!
//! [[mappings.parameters]]
//! input = "pitch"
//! output = "level"
//! operators = [{ type = "scale", factor = 0.1 }]
//! ```

use patchbay_bridge::ConnectorConfig;
use patchbay_core::ChannelSelection;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{HubError, Result};
use crate::mapping::ChannelMapping;
use crate::operator::ParameterOperator;

fn default_name() -> String {
    "patchbay".to_string()
}

/// Top-level hub configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Hub name, used in logs
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub connectors: Vec<ConnectorConfig>,
    /// Mappings applied at start
    #[serde(default)]
    pub mappings: Vec<MappingConfig>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            connectors: Vec::new(),
            mappings: Vec::new(),
        }
    }
}

impl HubConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: HubConfig =
            toml::from_str(source).map_err(|e| HubError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| HubError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    pub fn with_connector(mut self, connector: ConnectorConfig) -> Self {
        self.connectors.push(connector);
        self
    }

    pub fn with_mapping(mut self, mapping: MappingConfig) -> Self {
        self.mappings.push(mapping);
        self
    }

    /// Check mapping paths and operator arguments without building anything
    pub fn validate(&self) -> Result<()> {
        for mapping in &self.mappings {
            mapping.build()?;
        }
        Ok(())
    }

    /// Enabled connector entries
    pub fn enabled_connectors(&self) -> impl Iterator<Item = &ConnectorConfig> {
        self.connectors.iter().filter(|c| c.enabled)
    }
}

/// One `[[mappings]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Input channel as `component.channel`
    pub input: String,
    /// Output channel as `component.channel`
    pub output: String,
    #[serde(default)]
    pub parameters: Vec<ParameterMappingConfig>,
}

/// One `[[mappings.parameters]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterMappingConfig {
    pub input: String,
    pub output: String,
    #[serde(default)]
    pub operators: Vec<ParameterOperator>,
}

impl MappingConfig {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(
        mut self,
        input: impl Into<String>,
        output: impl Into<String>,
        operators: Vec<ParameterOperator>,
    ) -> Self {
        self.parameters.push(ParameterMappingConfig {
            input: input.into(),
            output: output.into(),
            operators,
        });
        self
    }

    /// Build an unresolved channel mapping
    pub fn build(&self) -> Result<ChannelMapping> {
        let input = parse_channel(&self.input)?;
        let output = parse_channel(&self.output)?;
        self.parameters
            .iter()
            .try_fold(ChannelMapping::new(input, output), |mapping, p| {
                mapping.with_parameter(p.input.clone(), p.output.clone(), p.operators.clone())
            })
    }
}

fn parse_channel(path: &str) -> Result<ChannelSelection> {
    ChannelSelection::parse(path).ok_or_else(|| {
        HubError::Config(format!("invalid channel path '{}', expected component.channel", path))
    })
}

//! Patchbay Hub
//!
//! The hub is the routing core of patchbay:
//! - Binds declared components to the connection that declared them
//! - Validates selections against the live registry
//! - Pipes channel messages through mapping operator chains, with separate
//!   operator state per event instance
//! - Runs connectors and processes every event on a single task
//!
//! # Example
//!
//! ```no_run
//! use patchbay_bridge::ConnectorConfig;
//! use patchbay_hub::{HubConfig, HubManager, MappingConfig, ParameterOperator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = HubConfig::default()
//!         .with_connector(ConnectorConfig::new("main", "tcp"))
//!         .with_mapping(MappingConfig::new("synth.note", "light.brightness").with_parameter(
//!             "pitch",
//!             "level",
//!             vec![ParameterOperator::Scale { factor: 0.1 }],
//!         ));
//!
//!     let mut hub = HubManager::from_config(config)?;
//!     hub.start().await?;
//!     hub.run().await?;
//!     Ok(())
//! }
//! ```

pub mod component;
pub mod config;
pub mod error;
pub mod hub;
pub mod mapping;
pub mod operator;
pub mod stream;

pub use component::{
    ChannelController, ComponentController, ComponentManager, ControllerId, RegistryEvent,
};
pub use config::{HubConfig, MappingConfig, ParameterMappingConfig};
pub use error::{HubError, Result};
pub use hub::{HubCommand, HubHandle, HubManager};
pub use mapping::{
    ChannelMapping, Mapper, MappingEvent, MappingManager, MappingSummary, ParameterMapping,
    ParameterSummary,
};
pub use operator::{ParameterOperator, ParameterProcessor, ProcessorChain};
pub use stream::{Publisher, Subscription};

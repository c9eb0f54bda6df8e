//! Component registry
//!
//! The [`ComponentManager`] binds declared components to the connection that
//! declared them. At most one component exists per identifier, and only the
//! owning connection may update or remove it.
//!
//! Each declared channel gets a [`ChannelController`] carrying the channel's
//! inbound message stream. Controllers survive partial re-declarations: a
//! channel that is still present keeps its controller (and therefore its
//! subscribers) while its info is replaced.

use patchbay_bridge::{Connection, ConnectionId};
use patchbay_core::{
    ChannelInfo, ChannelSelection, ComponentInfo, ComponentSelection, HubMessage,
    ParameterSelection,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{HubError, Result};
use crate::stream::{Publisher, Subscription};

static NEXT_CONTROLLER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a channel controller, stable across re-declarations
pub type ControllerId = u64;

/// Change notifications from the registry
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    Registered {
        component: String,
        connection: ConnectionId,
    },
    Updated {
        component: String,
        connection: ConnectionId,
    },
    Unregistered {
        component: String,
        connection: ConnectionId,
    },
}

/// Runtime side of one declared channel
pub struct ChannelController {
    id: ControllerId,
    component: String,
    info: ChannelInfo,
    messages: Publisher<HubMessage>,
}

impl ChannelController {
    fn new(component: &str, info: ChannelInfo) -> Self {
        Self {
            id: NEXT_CONTROLLER_ID.fetch_add(1, Ordering::Relaxed),
            component: component.to_string(),
            info,
            messages: Publisher::new(),
        }
    }

    pub fn id(&self) -> ControllerId {
        self.id
    }

    pub fn identifier(&self) -> &str {
        &self.info.identifier
    }

    pub fn component_id(&self) -> &str {
        &self.component
    }

    pub fn info(&self) -> &ChannelInfo {
        &self.info
    }

    /// Subscribe to messages arriving on this channel
    pub fn subscribe(&self) -> (Subscription, mpsc::UnboundedReceiver<HubMessage>) {
        self.messages.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.messages.subscriber_count()
    }

    fn publish(&self, message: HubMessage) -> usize {
        self.messages.publish(message)
    }
}

/// Runtime side of one declared component
pub struct ComponentController {
    info: ComponentInfo,
    connection: Arc<dyn Connection>,
    channels: BTreeMap<String, ChannelController>,
}

impl ComponentController {
    fn new(info: ComponentInfo, connection: Arc<dyn Connection>) -> Self {
        let mut controller = Self {
            info: ComponentInfo::new(info.identifier.clone()),
            connection,
            channels: BTreeMap::new(),
        };
        controller.update(info);
        controller
    }

    /// Replace the declaration, keeping controllers of channels still present
    fn update(&mut self, info: ComponentInfo) {
        let mut previous = std::mem::take(&mut self.channels);
        for channel in &info.channels {
            let controller = match previous.remove(&channel.identifier) {
                Some(mut existing) => {
                    existing.info = channel.clone();
                    existing
                }
                None => ChannelController::new(&info.identifier, channel.clone()),
            };
            self.channels.insert(channel.identifier.clone(), controller);
        }
        self.info = info;
    }

    pub fn identifier(&self) -> &str {
        &self.info.identifier
    }

    pub fn info(&self) -> &ComponentInfo {
        &self.info
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn channel(&self, identifier: &str) -> Option<&ChannelController> {
        self.channels.get(identifier)
    }

    pub fn channels(&self) -> impl Iterator<Item = &ChannelController> {
        self.channels.values()
    }
}

/// Registry of live components
#[derive(Default)]
pub struct ComponentManager {
    components: BTreeMap<String, ComponentController>,
    events: Publisher<RegistryEvent>,
}

impl ComponentManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update one component for `connection`.
    ///
    /// Fails with `DuplicateDeclaration` if another connection owns the identifier.
    pub fn register_component(
        &mut self,
        connection: &Arc<dyn Connection>,
        info: ComponentInfo,
    ) -> Result<()> {
        info.validate()?;
        let connection_id = connection.id();

        match self.components.get_mut(&info.identifier) {
            Some(existing) if existing.connection_id() != connection_id => {
                Err(HubError::DuplicateDeclaration {
                    component: info.identifier,
                    owner: existing.connection_id(),
                })
            }
            Some(existing) => {
                let component = info.identifier.clone();
                existing.update(info);
                debug!("Component '{}' updated by {}", component, connection_id);
                self.events.publish(RegistryEvent::Updated {
                    component,
                    connection: connection_id,
                });
                Ok(())
            }
            None => {
                let component = info.identifier.clone();
                info!("Component '{}' registered by {}", component, connection_id);
                self.components.insert(
                    component.clone(),
                    ComponentController::new(info, connection.clone()),
                );
                self.events.publish(RegistryEvent::Registered {
                    component,
                    connection: connection_id,
                });
                Ok(())
            }
        }
    }

    /// Remove a component. Only its owning connection may do so.
    pub fn unregister_component(&mut self, connection: ConnectionId, identifier: &str) -> Result<()> {
        let owner = self
            .components
            .get(identifier)
            .ok_or_else(|| HubError::UnknownComponent(identifier.to_string()))?
            .connection_id();
        if owner != connection {
            return Err(HubError::NotOwner {
                component: identifier.to_string(),
                connection,
            });
        }

        self.components.remove(identifier);
        info!("Component '{}' unregistered by {}", identifier, connection);
        self.events.publish(RegistryEvent::Unregistered {
            component: identifier.to_string(),
            connection,
        });
        Ok(())
    }

    /// Apply a connection's complete declaration set.
    ///
    /// Components the connection owned that are absent from `components` are
    /// unregistered. The set is rejected as a whole if any identifier is
    /// invalid, repeated, or owned by another connection.
    pub fn declare(
        &mut self,
        connection: &Arc<dyn Connection>,
        components: Vec<ComponentInfo>,
    ) -> Result<()> {
        let connection_id = connection.id();
        let mut seen = HashSet::new();
        for info in &components {
            info.validate()?;
            if !seen.insert(info.identifier.as_str()) {
                return Err(patchbay_core::Error::DuplicateIdentifier {
                    scope: "component",
                    identifier: info.identifier.clone(),
                }
                .into());
            }
            if let Some(existing) = self.components.get(&info.identifier) {
                if existing.connection_id() != connection_id {
                    return Err(HubError::DuplicateDeclaration {
                        component: info.identifier.clone(),
                        owner: existing.connection_id(),
                    });
                }
            }
        }

        let stale: Vec<String> = self
            .owned_by(connection_id)
            .filter(|id| !seen.contains(id.as_str()))
            .collect();
        for identifier in stale {
            self.unregister_component(connection_id, &identifier)?;
        }

        for info in components {
            self.register_component(connection, info)?;
        }
        Ok(())
    }

    /// Unregister every component owned by `connection`. Idempotent.
    pub fn clean(&mut self, connection: ConnectionId) -> Vec<String> {
        let owned: Vec<String> = self.owned_by(connection).collect();
        for identifier in &owned {
            // Ownership was just checked
            let _ = self.unregister_component(connection, identifier);
        }
        owned
    }

    fn owned_by(&self, connection: ConnectionId) -> impl Iterator<Item = String> + '_ {
        self.components
            .values()
            .filter(move |c| c.connection_id() == connection)
            .map(|c| c.identifier().to_string())
    }

    pub fn validate_component_selection(&self, selection: &mut ComponentSelection) -> bool {
        let valid = self.components.contains_key(&selection.identifier);
        selection.set_valid(valid);
        valid
    }

    /// Valid only if the component selection is valid and the channel exists
    pub fn validate_channel_selection(&self, selection: &mut ChannelSelection) -> bool {
        let valid = self.validate_component_selection(&mut selection.component)
            && self.channel_controller(selection).is_some();
        selection.set_valid(valid);
        valid
    }

    /// Valid only if the channel selection is valid and the parameter exists
    pub fn validate_parameter_selection(&self, selection: &mut ParameterSelection) -> bool {
        let valid = self.validate_channel_selection(&mut selection.channel)
            && self
                .channel_controller(&selection.channel)
                .is_some_and(|c| c.info().parameter(&selection.identifier).is_some());
        selection.set_valid(valid);
        valid
    }

    pub fn component_controller(&self, selection: &ComponentSelection) -> Option<&ComponentController> {
        self.components.get(&selection.identifier)
    }

    pub fn channel_controller(&self, selection: &ChannelSelection) -> Option<&ChannelController> {
        self.components
            .get(selection.component_id())?
            .channel(&selection.identifier)
    }

    /// Route a channel message from `connection` to its channel's subscribers.
    /// Returns the number of subscribers reached.
    pub fn dispatch(&self, connection: ConnectionId, message: &HubMessage) -> Result<usize> {
        let content = message.channel_content().ok_or_else(|| {
            patchbay_core::Error::UnsupportedMessageType(message.message_type().to_string())
        })?;

        let component = self
            .components
            .get(&content.component)
            .ok_or_else(|| HubError::UnknownComponent(content.component.clone()))?;
        if component.connection_id() != connection {
            return Err(HubError::NotOwner {
                component: content.component.clone(),
                connection,
            });
        }
        let channel = component.channel(&content.channel).ok_or_else(|| {
            HubError::UnknownChannel(format!("{}.{}", content.component, content.channel))
        })?;
        if let Some(undeclared) = content
            .parameters
            .keys()
            .find(|name| channel.info().parameter(name).is_none())
        {
            return Err(HubError::UnknownParameter(format!(
                "{}.{}.{}",
                content.component, content.channel, undeclared
            )));
        }

        Ok(channel.publish(message.clone()))
    }

    pub fn get(&self, identifier: &str) -> Option<&ComponentController> {
        self.components.get(identifier)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.components.contains_key(identifier)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Snapshot of every live declaration
    pub fn components(&self) -> Vec<ComponentInfo> {
        self.components.values().map(|c| c.info.clone()).collect()
    }

    /// Subscribe to registry changes
    pub fn subscribe(&self) -> (Subscription, mpsc::UnboundedReceiver<RegistryEvent>) {
        self.events.subscribe()
    }
}

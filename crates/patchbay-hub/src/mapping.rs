//! Mapping engine
//!
//! A [`ChannelMapping`] pipes messages from one component's channel to
//! another's. It owns one [`ParameterMapping`] per routed parameter; each of
//! those owns a static [`Mapper`] for messages without an instance and one
//! mapper per live instance, so stateful operators never share history
//! between concurrent instances (e.g. two held notes).
//!
//! Instance mappers are created by `create` messages before their payload is
//! processed and destroyed by `destroy` messages after it, so the final value
//! of an instance still passes through its own state.

use patchbay_bridge::Connection;
use patchbay_core::{
    ChannelContent, ChannelSelection, HubMessage, MessageContent, MessageType, ParameterSample,
    ParameterSelection,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::component::{ComponentManager, ControllerId};
use crate::error::{HubError, Result};
use crate::operator::{ParameterOperator, ProcessorChain};
use crate::stream::{Publisher, Subscription};

/// One processor chain built from a mapping's operator list
#[derive(Debug, Clone)]
pub struct Mapper {
    chain: ProcessorChain,
}

impl Mapper {
    pub fn new(operators: &[ParameterOperator]) -> Self {
        Self {
            chain: ProcessorChain::new(operators),
        }
    }

    /// Rebuild the chain for a new operator list; history starts empty
    pub fn reload(&mut self, operators: &[ParameterOperator]) {
        self.chain = ProcessorChain::new(operators);
    }

    pub fn process(&mut self, sample: ParameterSample) -> ParameterSample {
        self.chain.process(sample)
    }

    pub fn chain(&self) -> &ProcessorChain {
        &self.chain
    }
}

/// Routes one input parameter to one output parameter
#[derive(Debug, Clone)]
pub struct ParameterMapping {
    input: ParameterSelection,
    output: ParameterSelection,
    operators: Vec<ParameterOperator>,
    static_mapper: Mapper,
    instances: HashMap<String, Mapper>,
}

impl ParameterMapping {
    pub fn new(
        input: ParameterSelection,
        output: ParameterSelection,
        operators: Vec<ParameterOperator>,
    ) -> Result<Self> {
        for operator in &operators {
            operator.validate()?;
        }
        Ok(Self {
            input,
            output,
            static_mapper: Mapper::new(&operators),
            operators,
            instances: HashMap::new(),
        })
    }

    pub fn input(&self) -> &ParameterSelection {
        &self.input
    }

    pub fn output(&self) -> &ParameterSelection {
        &self.output
    }

    pub fn operators(&self) -> &[ParameterOperator] {
        &self.operators
    }

    /// Replace the operator list and reload every mapper
    pub fn set_operators(&mut self, operators: Vec<ParameterOperator>) -> Result<()> {
        for operator in &operators {
            operator.validate()?;
        }
        self.operators = operators;
        self.reload();
        Ok(())
    }

    /// Fresh mapper for `instance`, replacing any previous one
    pub fn create_instance_mapper(&mut self, instance: &str) {
        self.instances
            .insert(instance.to_string(), Mapper::new(&self.operators));
    }

    /// Drop the instance's mapper. Unknown instances are ignored.
    pub fn destroy_instance_mapper(&mut self, instance: &str) {
        self.instances.remove(instance);
    }

    pub fn has_instance(&self, instance: &str) -> bool {
        self.instances.contains_key(instance)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn static_mapper(&self) -> &Mapper {
        &self.static_mapper
    }

    pub fn instance_mapper(&self, instance: &str) -> Option<&Mapper> {
        self.instances.get(instance)
    }

    /// Run `sample` through the instance's mapper, or the static one when
    /// `instance` is `None`
    pub fn process(&mut self, sample: ParameterSample, instance: Option<&str>) -> Result<ParameterSample> {
        let mapper = match instance {
            Some(instance) => self
                .instances
                .get_mut(instance)
                .ok_or_else(|| HubError::UnknownInstance(instance.to_string()))?,
            None => &mut self.static_mapper,
        };
        Ok(mapper.process(sample))
    }

    /// Propagate the current operator list to every mapper
    pub fn reload(&mut self) {
        self.static_mapper.reload(&self.operators);
        for mapper in self.instances.values_mut() {
            mapper.reload(&self.operators);
        }
    }

    /// Drop all instance mappers and clear static history
    pub fn reset(&mut self) {
        self.instances.clear();
        self.static_mapper.reload(&self.operators);
    }
}

struct InputSubscription {
    controller: ControllerId,
    handle: Subscription,
    messages: mpsc::UnboundedReceiver<HubMessage>,
}

struct OutputTarget {
    controller: ControllerId,
    connection: Arc<dyn Connection>,
}

/// Routes one channel to another through a set of parameter mappings
pub struct ChannelMapping {
    input: ChannelSelection,
    output: ChannelSelection,
    parameters: Vec<ParameterMapping>,
    subscription: Option<InputSubscription>,
    target: Option<OutputTarget>,
}

impl ChannelMapping {
    pub fn new(input: ChannelSelection, output: ChannelSelection) -> Self {
        Self {
            input,
            output,
            parameters: Vec::new(),
            subscription: None,
            target: None,
        }
    }

    /// Add a parameter mapping between named parameters of the two channels
    pub fn with_parameter(
        mut self,
        input: impl Into<String>,
        output: impl Into<String>,
        operators: Vec<ParameterOperator>,
    ) -> Result<Self> {
        let mapping = ParameterMapping::new(
            ParameterSelection::new(self.input.clone(), input),
            ParameterSelection::new(self.output.clone(), output),
            operators,
        )?;
        self.parameters.push(mapping);
        Ok(self)
    }

    /// Add a parameter mapping; its selections must sit on this mapping's channels
    pub fn add_parameter_mapping(&mut self, mapping: ParameterMapping) -> Result<()> {
        for (expected, actual) in [
            (&self.input, &mapping.input.channel),
            (&self.output, &mapping.output.channel),
        ] {
            if !expected.addresses(actual.component_id(), &actual.identifier) {
                return Err(HubError::ChannelMismatch {
                    expected: expected.to_string(),
                    received: actual.to_string(),
                });
            }
        }
        self.parameters.push(mapping);
        Ok(())
    }

    pub fn input(&self) -> &ChannelSelection {
        &self.input
    }

    pub fn output(&self) -> &ChannelSelection {
        &self.output
    }

    pub fn parameters(&self) -> &[ParameterMapping] {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut [ParameterMapping] {
        &mut self.parameters
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn has_output(&self) -> bool {
        self.target.is_some()
    }

    /// Point the mapping at a different input channel
    pub fn set_input(&mut self, input: ChannelSelection, registry: &ComponentManager) {
        for mapping in &mut self.parameters {
            mapping.input.channel = input.clone();
            mapping.reset();
        }
        self.input = input;
        self.unsubscribe();
        self.resolve(registry);
    }

    /// Point the mapping at a different output channel
    pub fn set_output(&mut self, output: ChannelSelection, registry: &ComponentManager) {
        for mapping in &mut self.parameters {
            mapping.output.channel = output.clone();
        }
        self.output = output;
        self.resolve(registry);
    }

    /// Re-validate selections against the registry and re-resolve the input
    /// subscription and output target.
    ///
    /// The input is re-subscribed only when its controller changed, and the
    /// previous subscription is always cancelled first.
    pub fn resolve(&mut self, registry: &ComponentManager) {
        registry.validate_channel_selection(&mut self.input);
        registry.validate_channel_selection(&mut self.output);
        for mapping in &mut self.parameters {
            registry.validate_parameter_selection(&mut mapping.input);
            registry.validate_parameter_selection(&mut mapping.output);
        }

        match registry.channel_controller(&self.input) {
            Some(controller) => {
                let current = self.subscription.as_ref().map(|s| s.controller);
                if current != Some(controller.id()) {
                    self.unsubscribe();
                    let (handle, messages) = controller.subscribe();
                    debug!("Mapping {} -> {} subscribed to input", self.input, self.output);
                    self.subscription = Some(InputSubscription {
                        controller: controller.id(),
                        handle,
                        messages,
                    });
                }
            }
            None => self.unsubscribe(),
        }

        self.target = registry
            .channel_controller(&self.output)
            .zip(registry.component_controller(&self.output.component))
            .map(|(channel, component)| OutputTarget {
                controller: channel.id(),
                connection: component.connection().clone(),
            });
    }

    fn unsubscribe(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.handle.cancel();
        }
    }

    /// Process every queued input message. Returns the number handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let Some(subscription) = self.subscription.as_mut() else {
                break;
            };
            match subscription.messages.try_recv() {
                Ok(message) => {
                    handled += 1;
                    if let Err(e) = self.process(&message) {
                        warn!("Mapping {} -> {} dropped message: {}", self.input, self.output, e);
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    // Input channel went away
                    self.unsubscribe();
                    break;
                }
            }
        }
        handled
    }

    /// Map one inbound message and send the result to the output, if resolved.
    /// Returns the message sent.
    pub fn process(&mut self, message: &HubMessage) -> Result<Option<HubMessage>> {
        let content = message.channel_content().ok_or_else(|| {
            patchbay_core::Error::UnsupportedMessageType(message.message_type().to_string())
        })?;
        if !self.input.addresses(&content.component, &content.channel) {
            return Err(HubError::ChannelMismatch {
                expected: self.input.to_string(),
                received: format!("{}.{}", content.component, content.channel),
            });
        }

        let instance = content.instance.as_deref();
        let message_type = message.message_type();

        if let (MessageType::Create, Some(instance)) = (message_type, instance) {
            for mapping in &mut self.parameters {
                mapping.create_instance_mapper(instance);
            }
        }

        let target = self
            .target
            .as_ref()
            .map(|t| (t.controller, t.connection.clone()));
        let sent = match target {
            Some((controller, connection)) => {
                let outbound = self.map_content(message, content)?;
                match connection.send_message(&outbound) {
                    Ok(()) => debug!(
                        "{} {} -> {} (controller {})",
                        message_type, self.input, self.output, controller
                    ),
                    Err(e) => warn!("Send to {} failed: {}", self.output, e),
                }
                Some(outbound)
            }
            None => None,
        };

        if let (MessageType::Destroy, Some(instance)) = (message_type, instance) {
            for mapping in &mut self.parameters {
                mapping.destroy_instance_mapper(instance);
            }
        }

        Ok(sent)
    }

    fn map_content(&mut self, message: &HubMessage, content: &ChannelContent) -> Result<HubMessage> {
        let instance = content.instance.as_deref();
        let mut parameters = BTreeMap::new();

        for mapping in &mut self.parameters {
            let Some(values) = content.parameter(&mapping.input.identifier) else {
                debug!("{} missing from {} message", mapping.input, message.message_type());
                continue;
            };
            let sample = ParameterSample::at(values.to_vec(), message.timestamp());
            match mapping.process(sample, instance) {
                Ok(result) => {
                    parameters.insert(mapping.output.identifier.clone(), result.values);
                }
                Err(e) => warn!("Skipping {}: {}", mapping.input, e),
            }
        }

        let mapped = ChannelContent {
            component: self.output.component_id().to_string(),
            channel: self.output.identifier.clone(),
            instance: content.instance.clone(),
            key: content.key.clone(),
            parameters,
        };
        let mapped = MessageContent::channel(message.message_type(), mapped)?;
        Ok(HubMessage::at(mapped, message.timestamp())?)
    }

    /// Cancel the input subscription, forget the output and drop all
    /// instance state
    pub fn reset(&mut self) {
        self.unsubscribe();
        self.target = None;
        for mapping in &mut self.parameters {
            mapping.reset();
        }
    }

    pub fn summary(&self) -> MappingSummary {
        MappingSummary {
            input: self.input.to_string(),
            output: self.output.to_string(),
            input_valid: self.input.is_valid(),
            output_valid: self.output.is_valid(),
            parameters: self
                .parameters
                .iter()
                .map(|p| ParameterSummary {
                    input: p.input.identifier.clone(),
                    output: p.output.identifier.clone(),
                    operators: p.operators.clone(),
                })
                .collect(),
        }
    }
}

impl Drop for ChannelMapping {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Read-only view of a parameter mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSummary {
    pub input: String,
    pub output: String,
    pub operators: Vec<ParameterOperator>,
}

/// Read-only view of a channel mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingSummary {
    pub input: String,
    pub output: String,
    pub input_valid: bool,
    pub output_valid: bool,
    pub parameters: Vec<ParameterSummary>,
}

/// Change notifications from the mapping manager
#[derive(Debug, Clone, PartialEq)]
pub enum MappingEvent {
    Inserted { index: usize, mapping: MappingSummary },
    Removed { index: usize, mapping: MappingSummary },
}

/// Ordered, index-addressed collection of channel mappings
#[derive(Default)]
pub struct MappingManager {
    mappings: Vec<ChannelMapping>,
    events: Publisher<MappingEvent>,
}

impl MappingManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a mapping; returns its index
    pub fn add(&mut self, mapping: ChannelMapping, registry: &ComponentManager) -> usize {
        let index = self.mappings.len();
        self.insert_unchecked(index, mapping, registry);
        index
    }

    /// Insert at `index` (0..=len)
    pub fn insert(
        &mut self,
        index: usize,
        mapping: ChannelMapping,
        registry: &ComponentManager,
    ) -> Result<()> {
        if index > self.mappings.len() {
            return Err(HubError::IndexOutOfBounds {
                index,
                len: self.mappings.len(),
            });
        }
        self.insert_unchecked(index, mapping, registry);
        Ok(())
    }

    fn insert_unchecked(&mut self, index: usize, mut mapping: ChannelMapping, registry: &ComponentManager) {
        mapping.resolve(registry);
        let summary = mapping.summary();
        info!("Mapping {} -> {} added at {}", summary.input, summary.output, index);
        self.mappings.insert(index, mapping);
        self.events.publish(MappingEvent::Inserted {
            index,
            mapping: summary,
        });
    }

    /// Reset and discard the mapping at `index`
    pub fn remove(&mut self, index: usize) -> Result<MappingSummary> {
        if index >= self.mappings.len() {
            return Err(HubError::IndexOutOfBounds {
                index,
                len: self.mappings.len(),
            });
        }
        let mut mapping = self.mappings.remove(index);
        mapping.reset();
        let summary = mapping.summary();
        info!("Mapping {} -> {} removed from {}", summary.input, summary.output, index);
        self.events.publish(MappingEvent::Removed {
            index,
            mapping: summary.clone(),
        });
        Ok(summary)
    }

    /// Remove every mapping
    pub fn clear(&mut self) {
        while !self.mappings.is_empty() {
            let _ = self.remove(self.mappings.len() - 1);
        }
    }

    pub fn get(&self, index: usize) -> Option<&ChannelMapping> {
        self.mappings.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ChannelMapping> {
        self.mappings.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelMapping> {
        self.mappings.iter()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Re-resolve every mapping after a registry change
    pub fn refresh(&mut self, registry: &ComponentManager) {
        for mapping in &mut self.mappings {
            mapping.resolve(registry);
        }
    }

    /// Drain queued input of every mapping, in mapping order
    pub fn pump(&mut self) -> usize {
        self.mappings.iter_mut().map(ChannelMapping::pump).sum()
    }

    pub fn summaries(&self) -> Vec<MappingSummary> {
        self.mappings.iter().map(ChannelMapping::summary).collect()
    }

    pub fn subscribe(&self) -> (Subscription, mpsc::UnboundedReceiver<MappingEvent>) {
        self.events.subscribe()
    }
}

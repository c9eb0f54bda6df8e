//! Operators and processors
//!
//! A [`ParameterOperator`] is a pure transform over [`ParameterSample`]s.
//! Stateless operators see one sample; stateful operators also see a bounded
//! history of previous inputs and outputs, most recent first.
//!
//! A [`ParameterProcessor`] is one running instance of an operator and owns
//! that history. A [`ProcessorChain`] threads a sample through processors in
//! order; an empty chain is the identity.

use patchbay_core::{time, ParameterSample};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::error::{HubError, Result};

/// Closed set of transform operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterOperator {
    /// Multiply every value by `factor`
    Scale { factor: f64 },

    /// Add `amount` to every value
    Offset { amount: f64 },

    /// Clamp every value to `[min, max]`
    Clamp { min: f64, max: f64 },

    /// `1 - x` for every value
    Invert,

    /// Collapse the sample to a single value: the sum of its values
    Sum,

    /// Exponential smoothing towards the input, `factor` in `[0, 1]`
    Smooth { factor: f64 },

    /// Mean of the last `window` inputs, per value
    MovingAverage { window: usize },

    /// Rate of change per second, from sample timestamps
    Derivative,
}

impl ParameterOperator {
    pub fn name(&self) -> &'static str {
        match self {
            ParameterOperator::Scale { .. } => "scale",
            ParameterOperator::Offset { .. } => "offset",
            ParameterOperator::Clamp { .. } => "clamp",
            ParameterOperator::Invert => "invert",
            ParameterOperator::Sum => "sum",
            ParameterOperator::Smooth { .. } => "smooth",
            ParameterOperator::MovingAverage { .. } => "moving_average",
            ParameterOperator::Derivative => "derivative",
        }
    }

    pub fn is_stateful(&self) -> bool {
        self.input_memory() > 0 || self.output_memory() > 0
    }

    /// Number of previous inputs the operator needs
    pub fn input_memory(&self) -> usize {
        match self {
            ParameterOperator::MovingAverage { window } => window.saturating_sub(1),
            ParameterOperator::Derivative => 1,
            _ => 0,
        }
    }

    /// Number of previous outputs the operator needs
    pub fn output_memory(&self) -> usize {
        match self {
            ParameterOperator::Smooth { .. } => 1,
            _ => 0,
        }
    }

    /// Check operator arguments
    pub fn validate(&self) -> Result<()> {
        match self {
            ParameterOperator::Clamp { min, max } if min.is_nan() || max.is_nan() || min > max => {
                Err(HubError::Config(format!("clamp requires min <= max, got {}..{}", min, max)))
            }
            ParameterOperator::Smooth { factor } if !(0.0..=1.0).contains(factor) => Err(
                HubError::Config(format!("smooth factor must be within 0..=1, got {}", factor)),
            ),
            ParameterOperator::MovingAverage { window: 0 } => {
                Err(HubError::Config("moving_average window must be at least 1".into()))
            }
            _ => Ok(()),
        }
    }

    fn apply_stateless(&self, sample: &ParameterSample) -> ParameterSample {
        match self {
            ParameterOperator::Scale { factor } => sample.map(|v| v * factor),
            ParameterOperator::Offset { amount } => sample.map(|v| v + amount),
            ParameterOperator::Clamp { min, max } => sample.map(|v| v.clamp(*min, *max)),
            ParameterOperator::Invert => sample.map(|v| 1.0 - v),
            ParameterOperator::Sum => sample.with_values(vec![sample.values.iter().sum()]),
            _ => sample.clone(),
        }
    }

    /// Apply with history; `inputs`/`outputs` are most recent first
    fn apply_stateful(
        &self,
        sample: &ParameterSample,
        inputs: &VecDeque<ParameterSample>,
        outputs: &VecDeque<ParameterSample>,
    ) -> ParameterSample {
        match self {
            ParameterOperator::Smooth { factor } => {
                let Some(previous) = outputs.front() else {
                    return sample.clone();
                };
                let values = sample
                    .values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| match previous.values.get(i) {
                        Some(p) => p + factor * (v - p),
                        None => *v,
                    })
                    .collect();
                sample.with_values(values)
            }
            ParameterOperator::MovingAverage { .. } => {
                let values = sample
                    .values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| {
                        let (sum, count) = inputs
                            .iter()
                            .filter_map(|s| s.values.get(i))
                            .fold((*v, 1usize), |(sum, count), x| (sum + x, count + 1));
                        sum / count as f64
                    })
                    .collect();
                sample.with_values(values)
            }
            ParameterOperator::Derivative => {
                let Some(previous) = inputs.front() else {
                    return sample.map(|_| 0.0);
                };
                let dt = time::seconds_between(previous.timestamp, sample.timestamp);
                let values = sample
                    .values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| match previous.values.get(i) {
                        Some(p) if dt > 0.0 => (v - p) / dt,
                        _ => 0.0,
                    })
                    .collect();
                sample.with_values(values)
            }
            stateless => stateless.apply_stateless(sample),
        }
    }
}

/// One running operator instance
#[derive(Debug, Clone)]
pub enum ParameterProcessor {
    Stateless(ParameterOperator),
    Stateful {
        operator: ParameterOperator,
        inputs: VecDeque<ParameterSample>,
        outputs: VecDeque<ParameterSample>,
    },
}

impl ParameterProcessor {
    /// Pick the processor variant the operator needs
    pub fn new(operator: ParameterOperator) -> Self {
        if operator.is_stateful() {
            ParameterProcessor::Stateful {
                operator,
                inputs: VecDeque::new(),
                outputs: VecDeque::new(),
            }
        } else {
            ParameterProcessor::Stateless(operator)
        }
    }

    pub fn operator(&self) -> &ParameterOperator {
        match self {
            ParameterProcessor::Stateless(operator) => operator,
            ParameterProcessor::Stateful { operator, .. } => operator,
        }
    }

    pub fn process(&mut self, sample: ParameterSample) -> ParameterSample {
        match self {
            ParameterProcessor::Stateless(operator) => operator.apply_stateless(&sample),
            ParameterProcessor::Stateful {
                operator,
                inputs,
                outputs,
            } => {
                let output = operator.apply_stateful(&sample, inputs, outputs);

                inputs.push_front(sample);
                inputs.truncate(operator.input_memory());
                outputs.push_front(output.clone());
                outputs.truncate(operator.output_memory());

                output
            }
        }
    }

    /// Retained inputs, most recent first (empty for stateless processors)
    pub fn input_history(&self) -> Vec<&ParameterSample> {
        match self {
            ParameterProcessor::Stateless(_) => Vec::new(),
            ParameterProcessor::Stateful { inputs, .. } => inputs.iter().collect(),
        }
    }

    /// Retained outputs, most recent first (empty for stateless processors)
    pub fn output_history(&self) -> Vec<&ParameterSample> {
        match self {
            ParameterProcessor::Stateless(_) => Vec::new(),
            ParameterProcessor::Stateful { outputs, .. } => outputs.iter().collect(),
        }
    }
}

/// Ordered processors applied in sequence
#[derive(Debug, Clone, Default)]
pub struct ProcessorChain {
    processors: Vec<ParameterProcessor>,
}

impl ProcessorChain {
    /// Fresh processors (empty history) for `operators`
    pub fn new(operators: &[ParameterOperator]) -> Self {
        Self {
            processors: operators.iter().cloned().map(ParameterProcessor::new).collect(),
        }
    }

    pub fn process(&mut self, sample: ParameterSample) -> ParameterSample {
        self.processors
            .iter_mut()
            .fold(sample, |sample, processor| processor.process(sample))
    }

    pub fn processors(&self) -> &[ParameterProcessor] {
        &self.processors
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

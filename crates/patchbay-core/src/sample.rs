//! Parameter samples

use serde::{Deserialize, Serialize};

use crate::time::{self, Timestamp};

/// Ordered vector of numeric values captured at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSample {
    pub values: Vec<f64>,
    pub timestamp: Timestamp,
}

impl ParameterSample {
    /// Sample stamped with the current time
    pub fn new(values: Vec<f64>) -> Self {
        Self::at(values, time::now())
    }

    /// Sample stamped with a caller-supplied time
    pub fn at(values: Vec<f64>, timestamp: Timestamp) -> Self {
        Self { values, timestamp }
    }

    /// Copy of this sample carrying different values but the same timestamp
    pub fn with_values(&self, values: Vec<f64>) -> Self {
        Self {
            values,
            timestamp: self.timestamp,
        }
    }

    /// Apply `f` to every value, keeping the length
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        self.with_values(self.values.iter().copied().map(f).collect())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

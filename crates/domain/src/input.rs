//! Input: a leaf node holding one measurable or settable scalar.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::id::NodeId;

/// Whether callers may drive an input or only observe it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Settable through `Hub::actuate` and refreshed by polling.
    #[default]
    ReadWrite,
    /// Only refreshed by polling (photodiode, cost signal, …).
    ReadOnly,
}

impl Access {
    /// Whether `Hub::actuate` may target an input with this access mode.
    #[must_use]
    pub fn is_writable(self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

/// Static description of an input: its default value, optional bounds and
/// access mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputSpec {
    pub initial: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub access: Access,
}

impl Default for InputSpec {
    fn default() -> Self {
        Self {
            initial: 0.0,
            min: None,
            max: None,
            access: Access::ReadWrite,
        }
    }
}

impl InputSpec {
    /// A writable input starting at `initial`.
    #[must_use]
    pub fn settable(initial: f64) -> Self {
        Self {
            initial,
            ..Self::default()
        }
    }

    /// A read-only (measured) input starting at `initial`.
    #[must_use]
    pub fn measured(initial: f64) -> Self {
        Self {
            initial,
            access: Access::ReadOnly,
            ..Self::default()
        }
    }

    /// Restrict accepted values to `min..=max`.
    #[must_use]
    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::NonFinite`] when the initial value is not
    /// finite, and [`ValidationError::InvalidBounds`] when the bounds are
    /// inverted, not finite, or exclude the initial value.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.initial.is_finite() {
            return Err(ValidationError::NonFinite {
                value: self.initial,
            });
        }
        let min = self.min.unwrap_or(f64::NEG_INFINITY);
        let max = self.max.unwrap_or(f64::INFINITY);
        let finite_or_open = |bound: Option<f64>| bound.is_none_or(f64::is_finite);
        if !finite_or_open(self.min) || !finite_or_open(self.max) || min > max {
            return Err(ValidationError::InvalidBounds { min, max });
        }
        if !self.admits(self.initial) {
            return Err(ValidationError::InvalidBounds { min, max });
        }
        Ok(())
    }

    /// Whether `value` is finite and inside the configured bounds.
    #[must_use]
    pub fn admits(&self, value: f64) -> bool {
        value.is_finite()
            && self.min.is_none_or(|min| value >= min)
            && self.max.is_none_or(|max| value <= max)
    }
}

/// Runtime state of one input owned by a thing.
#[derive(Debug, Clone, PartialEq)]
pub struct Input {
    pub name: String,
    pub node: NodeId,
    pub spec: InputSpec,
    pub value: f64,
}

impl Input {
    /// Create an input holding its spec's initial value.
    #[must_use]
    pub fn new(name: impl Into<String>, node: NodeId, spec: InputSpec) -> Self {
        Self {
            name: name.into(),
            node,
            value: spec.initial,
            spec,
        }
    }
}

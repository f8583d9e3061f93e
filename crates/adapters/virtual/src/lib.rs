//! # apparatus-adapter-virtual
//!
//! Virtual drivers that simulate an optical alignment bench, for testing and
//! demonstration without hardware.
//!
//! ## Provided drivers
//!
//! | Kind | Driver | Inputs | Behaviour |
//! |------|--------|--------|-----------|
//! | `stage` | [`VirtualStage`] | `position` (read/write) | Moves one bench axis named after the thing |
//! | `power_meter` | [`VirtualPowerMeter`] | `power`, `cost` (read-only) | Gaussian coupling of all axes to the optimum |
//! | `flaky` | [`FlakyDriver`] around a stage | `position` (read/write) | Refuses connections and fails calls on schedule |
//!
//! ## Dependency rule
//!
//! Depends on `apparatus-app` (port traits) and `apparatus-domain` only.

mod bench;
mod drivers;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use apparatus_app::ports::DeviceDriver;
use apparatus_domain::input::InputSpec;

pub use bench::{BeamModel, VirtualBench};
pub use drivers::{FlakyDriver, VirtualPowerMeter, VirtualStage};

/// Which virtual driver to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    Stage,
    PowerMeter,
    Flaky,
}

/// Tuning for the built drivers. Every field defaults to "ideal device".
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DriverOptions {
    /// Travel time of each stage move, in milliseconds.
    pub travel_ms: u64,
    /// Connection attempts a flaky driver refuses before succeeding.
    pub refused_connects: u32,
    /// A flaky driver fails every n-th write or read (0 = never).
    pub fail_every: u32,
}

impl DriverKind {
    /// Inputs a thing backed by this driver exposes when the configuration
    /// does not list any.
    #[must_use]
    pub fn default_inputs(self) -> Vec<(String, InputSpec)> {
        match self {
            Self::Stage | Self::Flaky => vec![(
                drivers::POSITION.to_string(),
                InputSpec::settable(0.0).with_bounds(-1.0, 1.0),
            )],
            Self::PowerMeter => vec![
                (drivers::POWER.to_string(), InputSpec::measured(0.0)),
                (drivers::COST.to_string(), InputSpec::measured(0.0)),
            ],
        }
    }
}

impl VirtualBench {
    /// Build a driver for the thing called `thing`. Stages move the axis of
    /// the same name.
    #[must_use]
    pub fn driver(
        &self,
        thing: &str,
        kind: DriverKind,
        options: &DriverOptions,
    ) -> Box<dyn DeviceDriver> {
        let stage = || {
            VirtualStage::new(thing, self.clone())
                .with_travel(Duration::from_millis(options.travel_ms))
        };
        match kind {
            DriverKind::Stage => Box::new(stage()),
            DriverKind::PowerMeter => Box::new(VirtualPowerMeter::new(self.clone())),
            DriverKind::Flaky => Box::new(
                FlakyDriver::new(Box::new(stage()))
                    .refusing_connects(options.refused_connects)
                    .failing_every(options.fail_every),
            ),
        }
    }
}

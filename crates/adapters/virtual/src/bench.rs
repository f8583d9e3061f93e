//! Simulated optical bench shared by the virtual drivers.
//!
//! Stages move axes; the power meter measures how well the beam is coupled,
//! which is a gaussian of the distance between the axes and the optimum.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Deserialize;

/// Shape of the simulated coupling peak.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BeamModel {
    /// Power at the optimum.
    pub peak: f64,
    /// Gaussian width, in stage units.
    pub width: f64,
    /// Axis name → position of the optimum. Axes not listed peak at zero.
    pub optimum: BTreeMap<String, f64>,
}

impl Default for BeamModel {
    fn default() -> Self {
        Self {
            peak: 1.0,
            width: 0.5,
            optimum: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Bench {
    model: BeamModel,
    positions: BTreeMap<String, f64>,
}

/// Handle on one simulated bench. Clones share the same bench.
#[derive(Debug, Clone, Default)]
pub struct VirtualBench {
    inner: Arc<Mutex<Bench>>,
}

impl VirtualBench {
    #[must_use]
    pub fn new(model: BeamModel) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Bench {
                model,
                positions: BTreeMap::new(),
            })),
        }
    }

    fn bench(&self) -> std::sync::MutexGuard<'_, Bench> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current position of `axis` (zero until a stage moves it).
    #[must_use]
    pub fn position(&self, axis: &str) -> f64 {
        self.bench().positions.get(axis).copied().unwrap_or(0.0)
    }

    pub fn move_to(&self, axis: &str, position: f64) {
        self.bench().positions.insert(axis.to_string(), position);
    }

    /// Power currently reaching the detector.
    #[must_use]
    pub fn power(&self) -> f64 {
        let bench = self.bench();
        let model = &bench.model;
        let axes: std::collections::BTreeSet<&String> =
            model.optimum.keys().chain(bench.positions.keys()).collect();
        let distance: f64 = axes
            .into_iter()
            .map(|axis| {
                let at = bench.positions.get(axis).copied().unwrap_or(0.0);
                let best = model.optimum.get(axis).copied().unwrap_or(0.0);
                (at - best).powi(2)
            })
            .sum();
        model.peak * (-distance / (2.0 * model.width.powi(2))).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bench() -> VirtualBench {
        VirtualBench::new(BeamModel {
            peak: 2.0,
            width: 0.5,
            optimum: BTreeMap::from([("X".to_string(), 0.3)]),
        })
    }

    #[test]
    fn should_peak_at_optimum() {
        let bench = bench();
        bench.move_to("X", 0.3);
        assert!((bench.power() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn should_lose_power_away_from_optimum() {
        let bench = bench();
        let at_origin = bench.power();
        bench.move_to("X", 0.3);
        let at_peak = bench.power();
        bench.move_to("Y", 0.5);
        let detuned = bench.power();

        assert!(at_origin < at_peak);
        assert!(detuned < at_peak);
    }

    #[test]
    fn should_share_positions_between_clones() {
        let bench = bench();
        let other = bench.clone();
        other.move_to("X", -1.0);
        assert_eq!(bench.position("X"), -1.0);
    }
}

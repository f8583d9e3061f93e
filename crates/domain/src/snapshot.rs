//! Snapshot: the last committed value of every input in the hub.
//!
//! Snapshots are immutable once published: writers clone, modify and publish
//! a new one, readers keep whatever `Arc<Snapshot>` they were handed.

use std::collections::BTreeMap;
use std::ops::Index;

use serde::{Deserialize, Serialize};

use crate::time::{Timestamp, now};

/// Input name → value for one thing.
pub type ThingState = BTreeMap<String, f64>;

/// Aggregate state of a hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    hub: String,
    things: BTreeMap<String, ThingState>,
    committed_at: Timestamp,
}

impl Snapshot {
    /// An empty snapshot for the hub called `hub`.
    #[must_use]
    pub fn new(hub: impl Into<String>) -> Self {
        Self {
            hub: hub.into(),
            things: BTreeMap::new(),
            committed_at: now(),
        }
    }

    /// Name of the hub this snapshot belongs to.
    #[must_use]
    pub fn hub(&self) -> &str {
        &self.hub
    }

    /// When the last change was committed.
    #[must_use]
    pub fn committed_at(&self) -> Timestamp {
        self.committed_at
    }

    /// State of one thing.
    #[must_use]
    pub fn thing(&self, thing: &str) -> Option<&ThingState> {
        self.things.get(thing)
    }

    /// Value of one input.
    #[must_use]
    pub fn get(&self, thing: &str, input: &str) -> Option<f64> {
        self.things.get(thing)?.get(input).copied()
    }

    /// Iterate over `(thing, state)` pairs in name order.
    pub fn things(&self) -> impl Iterator<Item = (&str, &ThingState)> {
        self.things.iter().map(|(name, state)| (name.as_str(), state))
    }

    /// Number of inputs across all things.
    #[must_use]
    pub fn input_count(&self) -> usize {
        self.things.values().map(BTreeMap::len).sum()
    }

    /// Add an (empty) thing entry if it does not exist yet.
    pub fn insert_thing(&mut self, thing: &str) {
        self.things.entry(thing.to_string()).or_default();
        self.touch();
    }

    /// Drop a thing and all its inputs.
    pub fn remove_thing(&mut self, thing: &str) {
        self.things.remove(thing);
        self.touch();
    }

    /// Set one input value, creating the entries as needed.
    pub fn set(&mut self, thing: &str, input: &str, value: f64) {
        self.things
            .entry(thing.to_string())
            .or_default()
            .insert(input.to_string(), value);
        self.touch();
    }

    /// Drop one input.
    pub fn remove_input(&mut self, thing: &str, input: &str) {
        if let Some(state) = self.things.get_mut(thing) {
            state.remove(input);
        }
        self.touch();
    }

    /// Whether both snapshots have the same shape and every value differs by
    /// at most `tolerance`.
    #[must_use]
    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        self.things.len() == other.things.len()
            && self.things.iter().all(|(thing, state)| {
                other.things.get(thing).is_some_and(|theirs| {
                    state.len() == theirs.len()
                        && state.iter().all(|(input, value)| {
                            theirs
                                .get(input)
                                .is_some_and(|v| (v - value).abs() <= tolerance)
                        })
                })
            })
    }

    fn touch(&mut self) {
        self.committed_at = now();
    }
}

impl Index<&str> for Snapshot {
    type Output = ThingState;

    /// # Panics
    ///
    /// Panics if the thing is not part of the snapshot, like `BTreeMap`.
    fn index(&self, thing: &str) -> &Self::Output {
        &self.things[thing]
    }
}

/// Persisted form of a snapshot: `{hub: {thing: {input: value}}}`.
///
/// The nesting mirrors the tree so files stay readable and diffable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SavedState(pub BTreeMap<String, BTreeMap<String, ThingState>>);

impl SavedState {
    /// Things recorded for `hub`, if the file mentions it.
    #[must_use]
    pub fn hub(&self, hub: &str) -> Option<&BTreeMap<String, ThingState>> {
        self.0.get(hub)
    }
}

impl From<&Snapshot> for SavedState {
    fn from(snapshot: &Snapshot) -> Self {
        let mut hubs = BTreeMap::new();
        hubs.insert(snapshot.hub.clone(), snapshot.things.clone());
        Self(hubs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage_snapshot() -> Snapshot {
        let mut snapshot = Snapshot::new("autoAlign");
        snapshot.set("MEMS", "X", 0.1);
        snapshot.set("MEMS", "Y", -0.2);
        snapshot.set("meter", "power", 3.5);
        snapshot
    }

    #[test]
    fn should_read_values_back() {
        let snapshot = stage_snapshot();
        assert_eq!(snapshot.get("MEMS", "X"), Some(0.1));
        assert_eq!(snapshot["meter"]["power"], 3.5);
        assert_eq!(snapshot.get("MEMS", "Z"), None);
        assert_eq!(snapshot.input_count(), 3);
    }

    #[test]
    fn should_remove_input_and_thing() {
        let mut snapshot = stage_snapshot();
        snapshot.remove_input("MEMS", "Y");
        assert_eq!(snapshot.get("MEMS", "Y"), None);
        snapshot.remove_thing("MEMS");
        assert!(snapshot.thing("MEMS").is_none());
    }

    #[test]
    fn should_advance_commit_time_on_change() {
        let mut snapshot = stage_snapshot();
        let before = snapshot.committed_at();
        snapshot.set("MEMS", "X", 0.3);
        assert!(snapshot.committed_at() >= before);
    }

    #[test]
    fn should_compare_with_tolerance() {
        let a = stage_snapshot();
        let mut b = stage_snapshot();
        b.set("MEMS", "X", 0.1 + 1e-12);
        assert!(a.approx_eq(&b, 1e-9));
        b.set("MEMS", "X", 0.2);
        assert!(!a.approx_eq(&b, 1e-9));
    }

    #[test]
    fn should_not_be_approx_equal_when_shape_differs() {
        let a = stage_snapshot();
        let mut b = stage_snapshot();
        b.set("MEMS", "Z", 0.0);
        assert!(!a.approx_eq(&b, 1e-9));
    }

    #[test]
    fn should_nest_saved_state_under_hub_name() {
        let saved = SavedState::from(&stage_snapshot());
        let json = serde_json::to_value(&saved).unwrap();
        assert_eq!(json["autoAlign"]["MEMS"]["X"], 0.1);
        assert_eq!(json["autoAlign"]["meter"]["power"], 3.5);
        assert!(saved.hub("autoAlign").is_some());
        assert!(saved.hub("other").is_none());
    }
}

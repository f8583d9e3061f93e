//! Thing: one device and the inputs it exposes.
//!
//! A thing owns its driver exclusively. It is only ever driven by the worker
//! that consumes its command queue (or by the hub during bring-up and
//! shutdown), always behind a `tokio::sync::Mutex`, so driver calls on one
//! device never overlap.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use apparatus_domain::id::NodeId;
use apparatus_domain::input::{Input, InputSpec};
use apparatus_domain::path::NodePath;
use apparatus_domain::snapshot::ThingState;

use crate::error::{ConnectionError, DeviceError};
use crate::ports::{Ack, DeviceDriver};

/// Whether the hardware handle is usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Reference to an input returned by `add_input`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputHandle {
    pub thing: String,
    pub name: String,
    pub node: NodeId,
}

impl InputHandle {
    /// Full `thing.input` path.
    #[must_use]
    pub fn path(&self) -> NodePath {
        NodePath::input(self.thing.clone(), self.name.clone())
    }
}

/// A device with its driver and inputs.
pub struct Thing {
    name: String,
    node: NodeId,
    driver: Box<dyn DeviceDriver>,
    inputs: BTreeMap<String, Input>,
    connection: ConnectionState,
    io_timeout: Duration,
}

impl std::fmt::Debug for Thing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thing")
            .field("name", &self.name)
            .field("node", &self.node)
            .field("driver", &self.driver.kind())
            .field("inputs", &self.inputs)
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

impl Thing {
    /// Wrap `driver`. The thing starts disconnected and without inputs.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        node: NodeId,
        driver: Box<dyn DeviceDriver>,
        io_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            node,
            driver,
            inputs: BTreeMap::new(),
            connection: ConnectionState::Disconnected,
            io_timeout,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Driver family, for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.driver.kind()
    }

    #[must_use]
    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    #[must_use]
    pub fn input(&self, name: &str) -> Option<&Input> {
        self.inputs.get(name)
    }

    /// Inputs in name order.
    pub fn inputs(&self) -> impl Iterator<Item = &Input> {
        self.inputs.values()
    }

    /// The input a bare thing path addresses: the writable input registered
    /// first.
    #[must_use]
    pub fn primary_input(&self) -> Option<&Input> {
        self.inputs
            .values()
            .filter(|input| input.spec.access.is_writable())
            .min_by_key(|input| input.node)
    }

    /// Current value of every input.
    #[must_use]
    pub fn values(&self) -> ThingState {
        self.inputs
            .iter()
            .map(|(name, input)| (name.clone(), input.value))
            .collect()
    }

    /// Adopt an input that the registry already named and numbered.
    pub fn add_input(&mut self, name: impl Into<String>, node: NodeId, spec: InputSpec) -> InputHandle {
        let name = name.into();
        self.inputs
            .insert(name.clone(), Input::new(name.clone(), node, spec));
        InputHandle {
            thing: self.name.clone(),
            name,
            node,
        }
    }

    pub fn remove_input(&mut self, name: &str) -> Option<Input> {
        self.inputs.remove(name)
    }

    /// Overwrite an input value without touching the hardware.
    ///
    /// Returns `false` when the input does not exist.
    pub fn set_value(&mut self, name: &str, value: f64) -> bool {
        match self.inputs.get_mut(name) {
            Some(input) => {
                input.value = value;
                true
            }
            None => false,
        }
    }

    /// Open the hardware handle.
    ///
    /// # Errors
    ///
    /// Returns the driver's [`ConnectionError`], or
    /// [`ConnectionError::Timeout`] when the driver does not answer within the
    /// I/O timeout. The thing stays disconnected in both cases.
    pub async fn connect(&mut self, cancel: &CancellationToken) -> Result<(), ConnectionError> {
        let result = tokio::time::timeout(self.io_timeout, self.driver.connect(cancel))
            .await
            .unwrap_or(Err(ConnectionError::Timeout(self.io_timeout)));
        self.connection = match result {
            Ok(()) => ConnectionState::Connected,
            Err(_) => ConnectionState::Disconnected,
        };
        if result.is_ok() {
            tracing::info!(thing = %self.name, driver = self.kind(), "connected");
        }
        result
    }

    /// Drive `input` to `value` and store what the device applied.
    ///
    /// # Errors
    ///
    /// - [`DeviceError::Disconnected`] when `connect` has not succeeded
    /// - [`DeviceError::UnknownInput`] when the thing has no such input
    /// - [`DeviceError::Timeout`] when the driver exceeds the I/O timeout
    /// - [`DeviceError::Fault`] when the device acknowledges a non-finite value
    /// - whatever the driver reports
    pub async fn actuate(
        &mut self,
        input: &str,
        value: f64,
        cancel: &CancellationToken,
    ) -> Result<Ack, DeviceError> {
        if self.connection == ConnectionState::Disconnected {
            return Err(DeviceError::Disconnected);
        }
        if !self.inputs.contains_key(input) {
            return Err(DeviceError::UnknownInput(input.to_string()));
        }
        let ack = tokio::time::timeout(self.io_timeout, self.driver.write(input, value, cancel))
            .await
            .map_err(|_| DeviceError::Timeout(self.io_timeout))??;
        if !ack.value.is_finite() {
            return Err(DeviceError::Fault(
                format!("{} acknowledged {input} with {}", self.name, ack.value).into(),
            ));
        }
        self.set_value(input, ack.value);
        Ok(ack)
    }

    /// Read the device and store every reported value that names an input.
    ///
    /// Returns the values that were applied.
    ///
    /// # Errors
    ///
    /// Same as [`Thing::actuate`], minus `UnknownInput`.
    pub async fn update(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Vec<(String, f64)>, DeviceError> {
        if self.connection == ConnectionState::Disconnected {
            return Err(DeviceError::Disconnected);
        }
        let reading = tokio::time::timeout(self.io_timeout, self.driver.read(cancel))
            .await
            .map_err(|_| DeviceError::Timeout(self.io_timeout))??;

        let mut applied = Vec::with_capacity(reading.len());
        for (name, value) in reading {
            if !value.is_finite() {
                tracing::debug!(thing = %self.name, input = %name, value, "ignoring non-finite reading");
            } else if self.set_value(&name, value) {
                applied.push((name, value));
            } else {
                tracing::debug!(thing = %self.name, input = %name, "ignoring reading for unknown input");
            }
        }
        Ok(applied)
    }

    /// Release the hardware handle.
    pub async fn disconnect(&mut self) {
        if self.connection == ConnectionState::Connected {
            self.driver.disconnect().await;
            self.connection = ConnectionState::Disconnected;
            tracing::info!(thing = %self.name, "disconnected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingDriver;

    fn stage(driver: RecordingDriver) -> Thing {
        let mut thing = Thing::new(
            "X",
            NodeId::from_raw(1),
            Box::new(driver),
            Duration::from_millis(200),
        );
        thing.add_input("position", NodeId::from_raw(2), InputSpec::settable(0.0));
        thing.add_input("temperature", NodeId::from_raw(3), InputSpec::measured(20.0));
        thing
    }

    #[tokio::test]
    async fn should_fail_fast_when_not_connected() {
        let (driver, journal) = RecordingDriver::new();
        let mut thing = stage(driver);
        let cancel = CancellationToken::new();

        let result = thing.actuate("position", 1.0, &cancel).await;

        assert!(matches!(result, Err(DeviceError::Disconnected)));
        assert!(matches!(thing.update(&cancel).await, Err(DeviceError::Disconnected)));
        assert!(journal.calls().is_empty());
    }

    #[tokio::test]
    async fn should_store_acknowledged_value_when_actuated() {
        let (driver, journal) = RecordingDriver::new();
        let mut thing = stage(driver);
        let cancel = CancellationToken::new();
        thing.connect(&cancel).await.unwrap();

        let ack = thing.actuate("position", 0.25, &cancel).await.unwrap();

        assert_eq!(ack.value, 0.25);
        assert_eq!(thing.input("position").unwrap().value, 0.25);
        assert_eq!(journal.calls(), vec!["connect", "write position=0.25"]);
    }

    #[tokio::test]
    async fn should_stay_disconnected_when_connect_is_refused() {
        let (driver, _) = RecordingDriver::new();
        let mut thing = stage(driver.refusing_connect());
        let cancel = CancellationToken::new();

        assert!(thing.connect(&cancel).await.is_err());
        assert_eq!(thing.connection(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn should_reject_unknown_input() {
        let (driver, _) = RecordingDriver::new();
        let mut thing = stage(driver);
        let cancel = CancellationToken::new();
        thing.connect(&cancel).await.unwrap();

        let result = thing.actuate("focus", 1.0, &cancel).await;

        assert!(matches!(result, Err(DeviceError::UnknownInput(name)) if name == "focus"));
    }

    #[tokio::test]
    async fn should_keep_previous_value_when_write_fails() {
        let (driver, _) = RecordingDriver::new();
        let mut thing = stage(driver.failing_writes());
        let cancel = CancellationToken::new();
        thing.connect(&cancel).await.unwrap();

        let result = thing.actuate("position", 3.0, &cancel).await;

        assert!(matches!(result, Err(DeviceError::Fault(_))));
        assert_eq!(thing.input("position").unwrap().value, 0.0);
    }

    #[tokio::test]
    async fn should_reject_non_finite_ack_when_actuated() {
        let (driver, _) = RecordingDriver::new();
        let mut thing = stage(driver.acknowledging(f64::NAN));
        let cancel = CancellationToken::new();
        thing.connect(&cancel).await.unwrap();

        let result = thing.actuate("position", 0.5, &cancel).await;

        assert!(matches!(result, Err(DeviceError::Fault(_))));
        assert_eq!(thing.input("position").unwrap().value, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn should_time_out_when_driver_is_too_slow() {
        let (driver, _) = RecordingDriver::new();
        let mut thing = stage(driver.with_delay(Duration::from_secs(5)));
        let cancel = CancellationToken::new();
        thing.connect(&cancel).await.unwrap();

        let result = thing.actuate("position", 1.0, &cancel).await;

        assert!(matches!(result, Err(DeviceError::Timeout(_))));
    }

    #[tokio::test]
    async fn should_apply_known_readings_and_ignore_the_rest() {
        let (driver, _) = RecordingDriver::new();
        let driver = driver
            .with_reading("temperature", 21.5)
            .with_reading("humidity", 40.0)
            .with_reading("position", f64::NAN);
        let mut thing = stage(driver);
        let cancel = CancellationToken::new();
        thing.connect(&cancel).await.unwrap();

        let applied = thing.update(&cancel).await.unwrap();

        assert_eq!(applied, vec![("temperature".to_string(), 21.5)]);
        assert_eq!(thing.values()["temperature"], 21.5);
        assert_eq!(thing.values()["position"], 0.0);
    }

    #[test]
    fn should_pick_first_writable_input_as_primary() {
        let (driver, _) = RecordingDriver::new();
        let mut thing = stage(driver);
        thing.add_input("aperture", NodeId::from_raw(9), InputSpec::settable(1.0));

        assert_eq!(thing.primary_input().unwrap().name, "position");
    }

    #[test]
    fn should_have_no_primary_input_when_all_inputs_are_read_only() {
        let (driver, _) = RecordingDriver::new();
        let mut thing = Thing::new("meter", NodeId::from_raw(1), Box::new(driver), Duration::from_secs(1));
        thing.add_input("power", NodeId::from_raw(2), InputSpec::measured(0.0));

        assert!(thing.primary_input().is_none());
    }

    #[tokio::test]
    async fn should_call_driver_disconnect_once() {
        let (driver, journal) = RecordingDriver::new();
        let mut thing = stage(driver);
        let cancel = CancellationToken::new();
        thing.connect(&cancel).await.unwrap();

        thing.disconnect().await;
        thing.disconnect().await;

        assert_eq!(journal.calls(), vec!["connect", "disconnect"]);
    }
}

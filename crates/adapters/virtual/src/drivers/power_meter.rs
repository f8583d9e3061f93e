//! Virtual power meter: measures the coupling of the simulated bench.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use apparatus_app::error::{ConnectionError, DeviceError};
use apparatus_app::ports::{Ack, DeviceDriver, Reading};

use crate::bench::VirtualBench;

/// Measured optical power.
pub const POWER: &str = "power";
/// Negated power, for optimizers that minimize.
pub const COST: &str = "cost";

/// A read-only detector. Every write is refused.
#[derive(Debug)]
pub struct VirtualPowerMeter {
    bench: VirtualBench,
    connected: bool,
}

impl VirtualPowerMeter {
    #[must_use]
    pub fn new(bench: VirtualBench) -> Self {
        Self {
            bench,
            connected: false,
        }
    }
}

#[async_trait]
impl DeviceDriver for VirtualPowerMeter {
    fn kind(&self) -> &'static str {
        "power_meter"
    }

    async fn connect(&mut self, _cancel: &CancellationToken) -> Result<(), ConnectionError> {
        self.connected = true;
        Ok(())
    }

    async fn write(
        &mut self,
        input: &str,
        _value: f64,
        _cancel: &CancellationToken,
    ) -> Result<Ack, DeviceError> {
        Err(DeviceError::UnknownInput(input.to_string()))
    }

    async fn read(&mut self, _cancel: &CancellationToken) -> Result<Reading, DeviceError> {
        if !self.connected {
            return Err(DeviceError::Disconnected);
        }
        let power = self.bench.power();
        Ok(Reading::from([
            (POWER.to_string(), power),
            (COST.to_string(), -power),
        ]))
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }
}

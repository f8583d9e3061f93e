//! Virtual stage: one motorized axis on the bench.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use apparatus_app::error::{ConnectionError, DeviceError};
use apparatus_app::ports::{Ack, DeviceDriver, Reading};

use crate::bench::VirtualBench;

use super::settle;

/// Input every stage exposes.
pub const POSITION: &str = "position";

/// A simulated translation stage. Writes to `position` move the bench axis
/// after the configured travel time.
#[derive(Debug)]
pub struct VirtualStage {
    axis: String,
    bench: VirtualBench,
    travel: Duration,
    connected: bool,
}

impl VirtualStage {
    #[must_use]
    pub fn new(axis: impl Into<String>, bench: VirtualBench) -> Self {
        Self {
            axis: axis.into(),
            bench,
            travel: Duration::ZERO,
            connected: false,
        }
    }

    /// Time each move takes.
    #[must_use]
    pub fn with_travel(mut self, travel: Duration) -> Self {
        self.travel = travel;
        self
    }
}

#[async_trait]
impl DeviceDriver for VirtualStage {
    fn kind(&self) -> &'static str {
        "stage"
    }

    async fn connect(&mut self, _cancel: &CancellationToken) -> Result<(), ConnectionError> {
        self.connected = true;
        tracing::debug!(axis = %self.axis, "virtual stage homed");
        Ok(())
    }

    async fn write(
        &mut self,
        input: &str,
        value: f64,
        cancel: &CancellationToken,
    ) -> Result<Ack, DeviceError> {
        if !self.connected {
            return Err(DeviceError::Disconnected);
        }
        if input != POSITION {
            return Err(DeviceError::UnknownInput(input.to_string()));
        }
        settle(self.travel, cancel).await?;
        self.bench.move_to(&self.axis, value);
        Ok(Ack::applied(value))
    }

    async fn read(&mut self, _cancel: &CancellationToken) -> Result<Reading, DeviceError> {
        if !self.connected {
            return Err(DeviceError::Disconnected);
        }
        Ok(Reading::from([(POSITION.to_string(), self.bench.position(&self.axis))]))
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }
}

//! Device driver port: the contract every instrument family implements.
//!
//! A driver bridges one physical (or simulated) device into the apparatus.
//! Things depend only on this trait, never on a transport. Drivers are used
//! through `Box<dyn DeviceDriver>`, so the trait is object-safe via
//! [`async_trait`].
//!
//! Every call receives the owning worker's cancellation token. Drivers that
//! block for long (moving a stage, waiting on a bus) should check it at their
//! own timeout boundaries; the thing additionally bounds every call with the
//! hub's I/O timeout.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use apparatus_domain::time::{Timestamp, now};

use crate::error::{ConnectionError, DeviceError};

/// Values reported by one `read`, keyed by input name.
pub type Reading = BTreeMap<String, f64>;

/// Confirmation that a write was applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ack {
    /// The value the device actually applied (it may quantize the request).
    pub value: f64,
    /// When the device confirmed the write.
    pub at: Timestamp,
}

impl Ack {
    /// Acknowledge `value` now.
    #[must_use]
    pub fn applied(value: f64) -> Self {
        Self { value, at: now() }
    }
}

/// An actuatable / readable device.
#[async_trait]
pub trait DeviceDriver: Send {
    /// Short name of the driver family (`"stage"`, `"power_meter"`, …).
    fn kind(&self) -> &'static str;

    /// Open the hardware handle.
    async fn connect(&mut self, cancel: &CancellationToken) -> Result<(), ConnectionError>;

    /// Drive `input` to `value`.
    async fn write(
        &mut self,
        input: &str,
        value: f64,
        cancel: &CancellationToken,
    ) -> Result<Ack, DeviceError>;

    /// Measure the current values of the device's inputs.
    async fn read(&mut self, cancel: &CancellationToken) -> Result<Reading, DeviceError>;

    /// Release the hardware handle. Called when the thing is detached or the
    /// hub shuts down.
    async fn disconnect(&mut self) {}
}

//! Virtual drivers: stage, power meter, fault injection.

mod flaky;
mod power_meter;
mod stage;

pub use flaky::FlakyDriver;
pub use power_meter::{COST, POWER, VirtualPowerMeter};
pub use stage::{POSITION, VirtualStage};

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use apparatus_app::error::DeviceError;

/// Sleep for `delay` unless `cancel` fires first.
async fn settle(delay: Duration, cancel: &CancellationToken) -> Result<(), DeviceError> {
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        () = cancel.cancelled() => Err(DeviceError::Cancelled),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}

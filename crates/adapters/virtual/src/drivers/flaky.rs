//! Fault injection: wraps a driver and makes it misbehave on schedule.

use std::fmt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use apparatus_app::error::{ConnectionError, DeviceError};
use apparatus_app::ports::{Ack, DeviceDriver, Reading};

/// Error reported for injected faults.
#[derive(Debug)]
struct InjectedFault(&'static str);

impl fmt::Display for InjectedFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "injected fault: {}", self.0)
    }
}

impl std::error::Error for InjectedFault {}

/// Refuses the first `refused_connects` connection attempts and fails every
/// `fail_every`-th write or read.
pub struct FlakyDriver {
    inner: Box<dyn DeviceDriver>,
    refused_connects: u32,
    fail_every: u32,
    calls: u32,
}

impl fmt::Debug for FlakyDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlakyDriver")
            .field("inner", &self.inner.kind())
            .field("refused_connects", &self.refused_connects)
            .field("fail_every", &self.fail_every)
            .finish_non_exhaustive()
    }
}

impl FlakyDriver {
    /// Wrap `inner` without injecting anything yet.
    #[must_use]
    pub fn new(inner: Box<dyn DeviceDriver>) -> Self {
        Self {
            inner,
            refused_connects: 0,
            fail_every: 0,
            calls: 0,
        }
    }

    #[must_use]
    pub fn refusing_connects(mut self, attempts: u32) -> Self {
        self.refused_connects = attempts;
        self
    }

    /// Fail every `n`-th I/O call. Zero disables the injection.
    #[must_use]
    pub fn failing_every(mut self, n: u32) -> Self {
        self.fail_every = n;
        self
    }

    fn next_call_fails(&mut self) -> bool {
        self.calls = self.calls.wrapping_add(1);
        self.fail_every != 0 && self.calls % self.fail_every == 0
    }
}

#[async_trait]
impl DeviceDriver for FlakyDriver {
    fn kind(&self) -> &'static str {
        "flaky"
    }

    async fn connect(&mut self, cancel: &CancellationToken) -> Result<(), ConnectionError> {
        if self.refused_connects > 0 {
            self.refused_connects -= 1;
            return Err(ConnectionError::Refused(Box::new(InjectedFault("connect"))));
        }
        self.inner.connect(cancel).await
    }

    async fn write(
        &mut self,
        input: &str,
        value: f64,
        cancel: &CancellationToken,
    ) -> Result<Ack, DeviceError> {
        if self.next_call_fails() {
            return Err(DeviceError::Fault(Box::new(InjectedFault("write"))));
        }
        self.inner.write(input, value, cancel).await
    }

    async fn read(&mut self, cancel: &CancellationToken) -> Result<Reading, DeviceError> {
        if self.next_call_fails() {
            return Err(DeviceError::Fault(Box::new(InjectedFault("read"))));
        }
        self.inner.read(cancel).await
    }

    async fn disconnect(&mut self) {
        self.inner.disconnect().await;
    }
}

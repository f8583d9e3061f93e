//! In-memory fakes shared by the unit tests of this crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{ConnectionError, DeviceError};
use crate::ports::{Ack, DeviceDriver, Reading};

/// What the fake driver saw, in call order.
#[derive(Debug, Default)]
pub struct Journal {
    pub calls: Mutex<Vec<String>>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl Journal {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn enter(&self, call: String) {
        self.calls.lock().unwrap().push(call);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Driver that records every call and echoes writes back.
pub struct RecordingDriver {
    pub journal: Arc<Journal>,
    pub delay: Duration,
    pub reading: Reading,
    pub refuse_connect: bool,
    pub fail_writes: bool,
    pub ack: Option<f64>,
}

impl RecordingDriver {
    pub fn new() -> (Self, Arc<Journal>) {
        let journal = Arc::new(Journal::default());
        let driver = Self {
            journal: Arc::clone(&journal),
            delay: Duration::ZERO,
            reading: Reading::new(),
            refuse_connect: false,
            fail_writes: false,
            ack: None,
        };
        (driver, journal)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_reading(mut self, input: &str, value: f64) -> Self {
        self.reading.insert(input.to_string(), value);
        self
    }

    pub fn refusing_connect(mut self) -> Self {
        self.refuse_connect = true;
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// Acknowledge every write with `value` instead of echoing it.
    pub fn acknowledging(mut self, value: f64) -> Self {
        self.ack = Some(value);
        self
    }
}

#[async_trait]
impl DeviceDriver for RecordingDriver {
    fn kind(&self) -> &'static str {
        "recording"
    }

    async fn connect(&mut self, _cancel: &CancellationToken) -> Result<(), ConnectionError> {
        self.journal.calls.lock().unwrap().push("connect".to_string());
        if self.refuse_connect {
            return Err(ConnectionError::Refused("bench supply is off".into()));
        }
        Ok(())
    }

    async fn write(
        &mut self,
        input: &str,
        value: f64,
        _cancel: &CancellationToken,
    ) -> Result<Ack, DeviceError> {
        self.journal.enter(format!("write {input}={value}"));
        tokio::time::sleep(self.delay).await;
        self.journal.leave();
        if self.fail_writes {
            return Err(DeviceError::Fault("amplifier tripped".into()));
        }
        let applied = self.ack.unwrap_or(value);
        self.reading.insert(input.to_string(), applied);
        Ok(Ack::applied(applied))
    }

    async fn read(&mut self, _cancel: &CancellationToken) -> Result<Reading, DeviceError> {
        self.journal.enter("read".to_string());
        tokio::time::sleep(self.delay).await;
        self.journal.leave();
        Ok(self.reading.clone())
    }

    async fn disconnect(&mut self) {
        self.journal
            .calls
            .lock()
            .unwrap()
            .push("disconnect".to_string());
    }
}

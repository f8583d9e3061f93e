//! Application-layer errors.
//!
//! Hardware and persistence failures are always surfaced to the caller as one
//! of these typed results. Domain errors convert in through `#[from]`.

use std::time::Duration;

use apparatus_domain::error::{NotFoundError, PathError, RegistryError, ValidationError};

/// Boxed error reported by a driver or a store implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A device operation (`write`/`read`) failed.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The thing has not (successfully) connected yet.
    #[error("device is not connected")]
    Disconnected,

    /// The driver did not answer within the per-call I/O timeout.
    #[error("device did not answer within {0:?}")]
    Timeout(Duration),

    /// The driver observed the cancellation token and gave up.
    #[error("device operation cancelled")]
    Cancelled,

    /// The driver does not know the addressed input.
    #[error("device has no input named {0:?}")]
    UnknownInput(String),

    /// Transport or instrument failure reported by the driver.
    #[error("device fault")]
    Fault(#[source] BoxError),
}

/// Establishing the hardware handle failed.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The instrument or its transport refused the connection.
    #[error("connection refused")]
    Refused(#[source] BoxError),

    /// The driver did not connect within the per-call I/O timeout.
    #[error("connection not established within {0:?}")]
    Timeout(Duration),

    /// The driver observed the cancellation token and gave up.
    #[error("connection attempt cancelled")]
    Cancelled,
}

/// `Hub::actuate` (or another queued command) failed.
#[derive(Debug, thiserror::Error)]
pub enum ActuationError {
    /// The path could not be parsed.
    #[error("invalid path")]
    InvalidPath(#[from] PathError),

    /// The path does not name a node.
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    /// The target has no write capability (read-only input, or a thing
    /// without writable inputs).
    #[error("{path} is not actuatable")]
    NotActuatable { path: String },

    /// The value is not finite or lies outside the input's bounds.
    #[error("value {value} is out of range for {path}")]
    OutOfRange { path: String, value: f64 },

    /// The device reported a failure; the snapshot was left untouched.
    #[error("device error on {thing}")]
    Device {
        thing: String,
        #[source]
        source: DeviceError,
    },

    /// Reconnecting the device failed.
    #[error("connection error on {thing}")]
    Connection {
        thing: String,
        #[source]
        source: ConnectionError,
    },

    /// The command did not complete before the caller's deadline.
    #[error("{path} did not complete within {after:?}")]
    Timeout { path: String, after: Duration },

    /// No worker is consuming commands for the thing, or it stopped before
    /// answering.
    #[error("{thing} has no running worker")]
    Unavailable { thing: String },

    /// The thing was detached and its queue no longer accepts commands.
    #[error("command queue of {thing} is closed")]
    QueueClosed { thing: String },
}

/// A structural change to the tree or to a worker failed.
#[derive(Debug, thiserror::Error)]
pub enum StructureError {
    /// The input is being read by a running polling worker.
    #[error("{thing}.{input} is in use by a running worker")]
    ResourceBusy { thing: String, input: String },

    /// A worker is already consuming this thing's queue.
    #[error("{thing} already has a running worker")]
    AlreadyRunning { thing: String },

    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error("registry error")]
    Registry(#[from] RegistryError),

    #[error("invalid input")]
    Validation(#[from] ValidationError),

    #[error("worker error")]
    Worker(#[from] WorkerError),
}

/// Starting a worker failed.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Shared workers run on the ambient tokio runtime and there was none.
    #[error("shared workers must be spawned from within a tokio runtime")]
    NoRuntime,

    /// The operating system refused to create the dedicated thread.
    #[error("failed to spawn worker thread")]
    Spawn(#[source] std::io::Error),
}

/// Saving or loading the snapshot failed. Nothing was partially written.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Reading, writing or replacing the file failed.
    #[error("persistence I/O failed")]
    Io(#[from] std::io::Error),

    /// The stored data could not be encoded or decoded.
    #[error("persisted state is malformed")]
    Format(#[source] BoxError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_display_not_actuatable_with_path() {
        let err = ActuationError::NotActuatable {
            path: "meter.power".to_string(),
        };
        assert_eq!(err.to_string(), "meter.power is not actuatable");
    }

    #[test]
    fn should_expose_device_error_as_source() {
        let err = ActuationError::Device {
            thing: "X".to_string(),
            source: DeviceError::Disconnected,
        };
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "device is not connected");
    }

    #[test]
    fn should_convert_not_found_into_actuation_error() {
        let err: ActuationError = NotFoundError {
            kind: "thing",
            path: "Q".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "thing not found: Q");
    }

    #[test]
    fn should_display_resource_busy_with_full_path() {
        let err = StructureError::ResourceBusy {
            thing: "MEMS".to_string(),
            input: "X".to_string(),
        };
        assert_eq!(err.to_string(), "MEMS.X is in use by a running worker");
    }

    #[test]
    fn should_convert_io_error_into_persistence_error() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: PersistenceError = io.into();
        assert!(matches!(err, PersistenceError::Io(_)));
    }
}

//! Port definitions: traits that adapters implement.
//!
//! Ports are the boundaries between the application core and the outside world.
//! They are defined here (in `app`) so that both the hub and the adapter crates
//! can depend on them without creating circular dependencies.

pub mod driver;
pub mod snapshot_store;

pub use driver::{Ack, DeviceDriver, Reading};
pub use snapshot_store::SnapshotStore;

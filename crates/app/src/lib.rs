//! # apparatus-app
//!
//! Application layer: the hub service, its command pipeline and the **port
//! definitions** (traits) adapters implement.
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement (driven/outbound ports):
//!   - `DeviceDriver`: connect, write and read one instrument
//!   - `SnapshotStore`: persist and restore the hub state
//! - Provide the **runtime pieces** that need no IO of their own:
//!   - `Thing`: a device, its driver and its inputs
//!   - `CommandQueue`: per-thing FIFO with serialized dispatch
//!   - `Supervisor`: background workers with cooperative cancellation
//!   - `StateCell`: copy-on-write publication of the snapshot
//! - Expose the **driving port** callers use: `Hub` (actuate, read, save,
//!   load, structural changes, worker lifecycle)
//!
//! ## Dependency rule
//! Depends on `apparatus-domain` only (plus `tokio` for channels, timers and
//! tasks). Never imports adapter crates. Adapters depend on *this* crate, not
//! the reverse.

pub mod config;
pub mod error;
pub mod hub;
pub mod ports;
pub mod queue;
pub mod state;
pub mod thing;
pub mod worker;

#[cfg(test)]
mod testing;

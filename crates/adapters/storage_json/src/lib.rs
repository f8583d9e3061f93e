//! # apparatus-adapter-storage-json
//!
//! JSON file persistence adapter for the hub snapshot.
//!
//! ## Responsibilities
//! - Implement the `SnapshotStore` port defined in `apparatus-app::ports`
//! - Write pretty-printed, key-sorted JSON so saved states diff cleanly
//! - Replace the file atomically (temporary file in the same directory, then
//!   rename) so a crash never leaves a half-written state behind
//!
//! ## Dependency rule
//! Depends on `apparatus-app` (for the port trait) and `apparatus-domain` (for
//! the persisted type). The `app` and `domain` crates must never reference
//! this adapter.

pub mod error;
pub mod store;

pub use store::JsonFileStore;

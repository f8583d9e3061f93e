//! # apparatus-domain
//!
//! Pure domain model for the apparatus control graph.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions, timestamps
//! - Define **node names and paths** (`thing`, `thing.input`)
//! - Define the **node registry**: the arena that owns the hub → thing → input
//!   tree and enforces its invariants (unique sibling names, single parent,
//!   every node reachable from the hub)
//! - Define **inputs** (scalar values with bounds and an access mode)
//! - Define the aggregate **snapshot** and its persisted shape
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod input;
pub mod path;
pub mod registry;
pub mod snapshot;

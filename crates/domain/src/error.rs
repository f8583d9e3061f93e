//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts via `#[from]`.
//! The domain layer only knows about structural problems: invalid names,
//! unknown nodes and a broken tree.

use crate::id::NodeId;
use crate::registry::NodeKind;

/// A domain invariant was violated by caller-supplied data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// Node names must not be empty.
    #[error("name must not be empty")]
    EmptyName,

    /// Node names must not contain the path separator.
    #[error("name {name:?} must not contain '{}'", crate::path::SEPARATOR)]
    SeparatorInName { name: String },

    /// Input bounds are inverted or not finite.
    #[error("invalid bounds: min {min} must be finite and not above max {max}")]
    InvalidBounds { min: f64, max: f64 },

    /// A value was `NaN` or infinite.
    #[error("value {value} is not finite")]
    NonFinite { value: f64 },
}

/// Structural failure while mutating the node registry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    /// The requested parent is not part of this registry.
    #[error("parent node {0} is not attached to this hub")]
    UnattachedParent(NodeId),

    /// The node does not exist (any more).
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// Things live under the hub and inputs under things; nothing else.
    #[error("a {child:?} node cannot be registered under a {parent:?} node")]
    Misplaced { parent: NodeKind, child: NodeKind },

    /// The hub itself can never be removed.
    #[error("the root node cannot be removed")]
    RootRemoval,

    /// The requested name was rejected.
    #[error("invalid node name")]
    Validation(#[from] ValidationError),
}

/// A path did not resolve to any node.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} not found: {path}")]
pub struct NotFoundError {
    /// What was looked up (`"node"`, `"thing"`, `"input"`).
    pub kind: &'static str,
    /// The path or name as given by the caller.
    pub path: String,
}

/// A textual path could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// The path was empty.
    #[error("path must not be empty")]
    Empty,

    /// One of the segments was empty (e.g. `"X."` or `".position"`).
    #[error("path {0:?} contains an empty segment")]
    EmptySegment(String),

    /// More than `thing.input` was given.
    #[error("path {0:?} is deeper than thing.input")]
    TooDeep(String),
}

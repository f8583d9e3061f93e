//! Node names and dotted paths (`"MEMS"`, `"MEMS.X"`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PathError, ValidationError};

/// Separator between the thing and input segments of a path.
pub const SEPARATOR: char = '.';

/// Check that `name` is usable as a node name.
///
/// # Errors
///
/// Returns [`ValidationError::EmptyName`] for an empty (or blank) name and
/// [`ValidationError::SeparatorInName`] when it contains [`SEPARATOR`].
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if name.contains(SEPARATOR) {
        return Err(ValidationError::SeparatorInName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Address of a Thing or of one of its Inputs, relative to the hub.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodePath {
    thing: String,
    input: Option<String>,
}

impl NodePath {
    /// Path to a thing.
    #[must_use]
    pub fn thing(thing: impl Into<String>) -> Self {
        Self {
            thing: thing.into(),
            input: None,
        }
    }

    /// Path to an input of a thing.
    #[must_use]
    pub fn input(thing: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            thing: thing.into(),
            input: Some(input.into()),
        }
    }

    /// First segment.
    #[must_use]
    pub fn thing_name(&self) -> &str {
        &self.thing
    }

    /// Second segment, if any.
    #[must_use]
    pub fn input_name(&self) -> Option<&str> {
        self.input.as_deref()
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.input {
            Some(input) => write!(f, "{}{SEPARATOR}{input}", self.thing),
            None => f.write_str(&self.thing),
        }
    }
}

impl FromStr for NodePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(PathError::Empty);
        }
        let mut segments = s.split(SEPARATOR);
        let thing = segments.next().unwrap_or_default();
        let input = segments.next();
        if segments.next().is_some() {
            return Err(PathError::TooDeep(s.to_string()));
        }
        if thing.is_empty() || input.is_some_and(str::is_empty) {
            return Err(PathError::EmptySegment(s.to_string()));
        }
        Ok(Self {
            thing: thing.to_string(),
            input: input.map(str::to_string),
        })
    }
}

impl TryFrom<String> for NodePath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodePath> for String {
    fn from(path: NodePath) -> Self {
        path.to_string()
    }
}

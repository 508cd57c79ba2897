//! Node and lock identity
//!
//! `ClusterNode` identifies a cluster member. `LockId` identifies the category
//! a cluster lock protects; any serializable value can be used as a key.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::ClaspError;
use crate::utils::is_valid;

/// Identity of a cluster member
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterNode {
    name: String,
}

impl ClusterNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Create a node after checking the name only uses identifier characters
    pub fn parse(name: &str) -> Result<Self, ClaspError> {
        if name.is_empty() || !is_valid(name) {
            return Err(ClaspError::IllegalArgument(format!(
                "invalid cluster node name '{}'",
                name
            )));
        }
        Ok(Self::new(name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Display for ClusterNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Key of a lock category, compared by value
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockId(String);

impl LockId {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derive a key from an arbitrary serializable value.
    ///
    /// Two values produce the same `LockId` when their JSON encodings are equal.
    /// A value that encodes as a JSON string keeps its plain text, so
    /// `from_key("x")` and `LockId::from("x")` name the same lock.
    pub fn from_key<T: Serialize + ?Sized>(key: &T) -> Result<Self, ClaspError> {
        match serde_json::to_value(key)? {
            serde_json::Value::String(s) => Ok(Self(s)),
            other => Ok(Self(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for LockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LockId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for LockId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

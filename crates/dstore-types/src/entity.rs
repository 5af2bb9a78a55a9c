use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Marker that opens operational keys (`__health`, `__marker/`). Entity ids
/// must not start with it, otherwise their objects would be filtered out of
/// every listing.
pub const RESERVED_MARKER: &str = "__";

/// Stable identifier of a stored entity.
///
/// Entity ids become a single path segment of the object key, so they must be
/// non-empty, must not contain `/`, and must not be `.` or `..`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    /// Validate and wrap an entity id.
    pub fn new(value: impl Into<String>) -> Result<Self, TypeError> {
        let value = value.into();
        let reject = |reason: &str| {
            Err(TypeError::InvalidEntityId {
                value: value.clone(),
                reason: reason.into(),
            })
        };

        if value.is_empty() {
            return reject("must not be empty");
        }
        if value.contains('/') {
            return reject("must not contain '/'");
        }
        if value == "." || value == ".." {
            return reject("must not be a relative path component");
        }
        if value.starts_with(RESERVED_MARKER) {
            return reject("must not start with the reserved marker '__'");
        }
        if value.chars().any(char::is_control) {
            return reject("must not contain control characters");
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EntityId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

/// Mutable partition of an entity, usually its publication date.
///
/// The empty value means "unpartitioned". Non-empty values must not contain
/// `/` and must not start with `_`, which leaves the leading underscore free
/// for the key codec to mark unpartitioned objects.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PartitionValue(String);

impl PartitionValue {
    /// Validate and wrap a partition value.
    pub fn new(value: impl Into<String>) -> Result<Self, TypeError> {
        let value = value.into();
        let reject = |reason: &str| {
            Err(TypeError::InvalidPartition {
                value: value.clone(),
                reason: reason.into(),
            })
        };

        if value.contains('/') {
            return reject("must not contain '/'");
        }
        if value.starts_with('_') {
            return reject("must not start with '_'");
        }
        if value == "." || value == ".." {
            return reject("must not be a relative path component");
        }
        if value.chars().any(char::is_control) {
            return reject("must not contain control characters");
        }
        Ok(Self(value))
    }

    /// The empty partition used by unpartitioned collections.
    pub fn none() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PartitionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartitionValue({:?})", self.0)
    }
}

impl fmt::Display for PartitionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PartitionValue {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PartitionValue> for String {
    fn from(p: PartitionValue) -> Self {
        p.0
    }
}

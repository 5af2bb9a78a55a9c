use std::fmt;

use serde::{Deserialize, Serialize};

/// Transaction id carried alongside a write and stored in object metadata.
///
/// Incoming ids are accepted verbatim; missing ones are generated in the
/// `tid_<random>` shape used across the publishing pipeline.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Metadata key under which the correlation id is stored with each object.
    pub const METADATA_KEY: &'static str = "transaction_id";

    /// Generate a fresh correlation id.
    pub fn generate() -> Self {
        Self(format!("tid_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Use the supplied id if it is non-blank, otherwise generate one.
    pub fn from_optional(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() => Self(v.to_string()),
            _ => Self::generate(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Debug for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CorrelationId({})", self.0)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_prefixed_and_unique() {
        let a = CorrelationId::generate();
        let b = CorrelationId::generate();
        assert!(a.as_str().starts_with("tid_"));
        assert_ne!(a, b);
    }

    #[test]
    fn supplied_id_is_kept() {
        let id = CorrelationId::from_optional(Some("tid_abc123"));
        assert_eq!(id.as_str(), "tid_abc123");
    }

    #[test]
    fn blank_id_is_replaced() {
        assert!(CorrelationId::from_optional(Some("  ")).as_str().starts_with("tid_"));
        assert!(CorrelationId::from_optional(None).as_str().starts_with("tid_"));
    }
}

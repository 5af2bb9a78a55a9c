//! Object key scheme.
//!
//! Keys look like `{prefix}/{entity}/{leaf}` where the leaf is the partition
//! value followed by the collection suffix:
//!
//! ```text
//! content/9b7a3c0e-.../2024-03-01.json
//! concepts/organisations/_.json
//! ```
//!
//! The entity id comes first so `{prefix}/{entity}/` lists every object of
//! one entity and nothing else. Objects without a partition value use `_` as
//! their leaf, which [`PartitionValue`] can never be.

use std::fmt;

use dstore_types::{EntityId, PartitionValue, RESERVED_MARKER};

use crate::error::{EngineError, EngineResult};

pub const SEPARATOR: char = '/';

/// Leaf used for objects stored without a partition value.
pub const UNPARTITIONED_LEAF: &str = "_";

pub const DEFAULT_SUFFIX: &str = ".json";

/// Components recovered from an object key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedKey {
    pub entity: EntityId,
    pub partition: PartitionValue,
}

/// Two-way mapping between (entity, partition) and object keys.
///
/// Implementations must keep every key of an entity under
/// [`KeyCodec::entity_prefix`], and no key of any other entity there.
/// [`verify_entity_scoping`] checks this when a collection is built.
pub trait KeyCodec: Send + Sync + fmt::Debug {
    /// Collection prefix without separators at either end. May be empty.
    fn prefix(&self) -> &str;

    fn encode(&self, entity: &EntityId, partition: &PartitionValue) -> String;

    fn decode(&self, key: &str) -> EngineResult<DecodedKey>;

    /// Listing prefix covering every key of `entity`.
    fn entity_prefix(&self, entity: &EntityId) -> String;

    /// Listing prefix covering the whole collection, `None` for the bucket
    /// root.
    fn collection_prefix(&self) -> Option<String> {
        let prefix = self.prefix();
        (!prefix.is_empty()).then(|| format!("{prefix}{SEPARATOR}"))
    }

    /// Entity named by a listed key. Bulk id listings use this instead of
    /// [`KeyCodec::decode`] so keys that only carry an entity still count.
    fn entity_of(&self, key: &str) -> EngineResult<EntityId> {
        Ok(self.decode(key)?.entity)
    }

    /// The part of `key` below the collection prefix, or `None` when the key
    /// lies outside the collection.
    fn local_part<'k>(&self, key: &'k str) -> Option<&'k str> {
        let prefix = self.prefix();
        if prefix.is_empty() {
            return Some(key.strip_prefix(SEPARATOR).unwrap_or(key));
        }
        key.strip_prefix(prefix)?.strip_prefix(SEPARATOR)
    }
}

/// The production key scheme: `{prefix}/{entity}/{partition}{suffix}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityFirstCodec {
    prefix: String,
    suffix: String,
}

impl EntityFirstCodec {
    pub fn new(prefix: &str, suffix: &str) -> Self {
        Self {
            prefix: prefix.trim_matches(SEPARATOR).to_string(),
            suffix: suffix.to_string(),
        }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    fn join(&self, tail: &str) -> String {
        if self.prefix.is_empty() {
            tail.to_string()
        } else {
            format!("{}{SEPARATOR}{tail}", self.prefix)
        }
    }
}

impl Default for EntityFirstCodec {
    fn default() -> Self {
        Self::new("", DEFAULT_SUFFIX)
    }
}

impl KeyCodec for EntityFirstCodec {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn encode(&self, entity: &EntityId, partition: &PartitionValue) -> String {
        let leaf = if partition.is_empty() {
            UNPARTITIONED_LEAF
        } else {
            partition.as_str()
        };
        self.join(&format!("{entity}{SEPARATOR}{leaf}{}", self.suffix))
    }

    fn decode(&self, key: &str) -> EngineResult<DecodedKey> {
        let local = self
            .local_part(key)
            .ok_or_else(|| EngineError::malformed(key, "outside the collection prefix"))?;
        let segments: Vec<&str> = local.split(SEPARATOR).collect();
        let [entity, leaf] = segments[..] else {
            return Err(EngineError::malformed(
                key,
                format!("expected <entity>/<partition>, found {} segment(s)", segments.len()),
            ));
        };

        let entity = EntityId::new(entity).map_err(|e| EngineError::malformed(key, e.to_string()))?;
        let leaf = leaf.strip_suffix(self.suffix.as_str()).unwrap_or(leaf);
        let partition = match leaf {
            "" => return Err(EngineError::malformed(key, "empty partition segment")),
            UNPARTITIONED_LEAF => PartitionValue::none(),
            value => PartitionValue::new(value).map_err(|e| EngineError::malformed(key, e.to_string()))?,
        };
        Ok(DecodedKey { entity, partition })
    }

    fn entity_prefix(&self, entity: &EntityId) -> String {
        self.join(&format!("{entity}{SEPARATOR}"))
    }

    /// First segment below the prefix. A key with no partition segment
    /// (`{prefix}/{entity}{suffix}`) names its entity directly.
    fn entity_of(&self, key: &str) -> EngineResult<EntityId> {
        let local = self
            .local_part(key)
            .ok_or_else(|| EngineError::malformed(key, "outside the collection prefix"))?;
        let entity = match local.split_once(SEPARATOR) {
            Some((entity, _)) => entity,
            None => local.strip_suffix(self.suffix.as_str()).unwrap_or(local),
        };
        EntityId::new(entity).map_err(|e| EngineError::malformed(key, e.to_string()))
    }
}

/// Drops keys that are not entity objects: directory placeholders and
/// operational keys starting with the reserved marker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyFilter {
    reserved_marker: String,
}

impl KeyFilter {
    pub fn new(reserved_marker: impl Into<String>) -> Self {
        Self {
            reserved_marker: reserved_marker.into(),
        }
    }

    pub fn reserved_marker(&self) -> &str {
        &self.reserved_marker
    }

    pub fn accepts(&self, codec: &dyn KeyCodec, key: &str) -> bool {
        if key.is_empty() || key.ends_with(SEPARATOR) {
            return false;
        }
        let local = codec.local_part(key).unwrap_or(key);
        self.reserved_marker.is_empty() || !local.starts_with(self.reserved_marker.as_str())
    }
}

impl Default for KeyFilter {
    fn default() -> Self {
        Self::new(RESERVED_MARKER)
    }
}

/// Probe a codec for the entity-scoping property the locator relies on.
///
/// Every encoded key must sit under its entity prefix, decode back to its
/// inputs, and stay clear of the prefix of any other entity, including ids
/// that extend one another.
pub fn verify_entity_scoping(codec: &dyn KeyCodec) -> EngineResult<()> {
    let probe = |value: &str| EntityId::new(value).map_err(|e| EngineError::CodecInvariant(e.to_string()));
    let entities = [probe("probe")?, probe("probe-2")?, probe("probe.json")?];
    let partitions = [
        PartitionValue::none(),
        PartitionValue::new("2020-01-01").map_err(|e| EngineError::CodecInvariant(e.to_string()))?,
    ];

    for entity in &entities {
        let own_prefix = codec.entity_prefix(entity);
        for partition in &partitions {
            let key = codec.encode(entity, partition);
            if !key.starts_with(&own_prefix) {
                return Err(EngineError::CodecInvariant(format!(
                    "key {key:?} is outside its entity prefix {own_prefix:?}"
                )));
            }
            let decoded = codec
                .decode(&key)
                .map_err(|e| EngineError::CodecInvariant(format!("key {key:?} does not decode: {e}")))?;
            if decoded.entity != *entity || decoded.partition != *partition {
                return Err(EngineError::CodecInvariant(format!(
                    "key {key:?} decodes to ({}, {:?})",
                    decoded.entity,
                    decoded.partition.as_str()
                )));
            }
            for other in entities.iter().filter(|other| *other != entity) {
                let other_prefix = codec.entity_prefix(other);
                if key.starts_with(&other_prefix) {
                    return Err(EngineError::CodecInvariant(format!(
                        "key {key:?} of {entity} is listed under {other_prefix:?}"
                    )));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id(value: &str) -> EntityId {
        EntityId::new(value).unwrap()
    }

    fn date(value: &str) -> PartitionValue {
        PartitionValue::new(value).unwrap()
    }

    #[test]
    fn encodes_entity_first() {
        let codec = EntityFirstCodec::new("content", ".json");
        assert_eq!(codec.encode(&id("abc"), &date("2020-01-01")), "content/abc/2020-01-01.json");
        assert_eq!(codec.encode(&id("abc"), &PartitionValue::none()), "content/abc/_.json");
        assert_eq!(codec.entity_prefix(&id("abc")), "content/abc/");
        assert_eq!(codec.collection_prefix().as_deref(), Some("content/"));
    }

    #[test]
    fn entity_of_reads_the_first_segment() {
        let codec = EntityFirstCodec::new("content", ".json");
        assert_eq!(codec.entity_of("content/abc/2020-01-01.json").unwrap(), id("abc"));
        assert_eq!(codec.entity_of("content/abc.json").unwrap(), id("abc"));
        assert_eq!(codec.entity_of("content/abc/x/y.json").unwrap(), id("abc"));
        assert!(codec.entity_of("elsewhere/abc.json").is_err());
        assert!(codec.entity_of("content/.json").is_err());
    }

    #[test]
    fn empty_prefix_has_no_leading_separator() {
        let codec = EntityFirstCodec::new("", ".json");
        assert_eq!(codec.encode(&id("abc"), &date("2020-01-01")), "abc/2020-01-01.json");
        assert_eq!(codec.entity_prefix(&id("abc")), "abc/");
        assert_eq!(codec.collection_prefix(), None);
    }

    #[test]
    fn prefix_separators_are_normalised() {
        let codec = EntityFirstCodec::new("/concepts/", ".json");
        assert_eq!(codec.prefix(), "concepts");
        assert_eq!(codec.encode(&id("orgs"), &PartitionValue::none()), "concepts/orgs/_.json");
    }

    #[test]
    fn decode_recovers_components() {
        let codec = EntityFirstCodec::new("content", ".json");
        let decoded = codec.decode("content/abc/2020-01-01.json").unwrap();
        assert_eq!(decoded.entity, id("abc"));
        assert_eq!(decoded.partition, date("2020-01-01"));

        let decoded = codec.decode("content/abc/_.json").unwrap();
        assert!(decoded.partition.is_empty());
    }

    #[test]
    fn decode_tolerates_missing_suffix() {
        let codec = EntityFirstCodec::new("content", ".json");
        assert_eq!(codec.decode("content/abc/2020-01-01").unwrap().partition, date("2020-01-01"));
    }

    #[test]
    fn decode_rejects_wrong_segment_count() {
        let codec = EntityFirstCodec::new("content", ".json");
        for key in ["content/abc", "content/abc/x/2020-01-01.json", "content/"] {
            let err = codec.decode(key).unwrap_err();
            assert!(matches!(err, EngineError::MalformedKey { .. }), "{key}: {err}");
        }
    }

    #[test]
    fn decode_rejects_foreign_and_empty_leaves() {
        let codec = EntityFirstCodec::new("content", ".json");
        assert!(codec.decode("concepts/abc/_.json").is_err());
        assert!(codec.decode("content/abc/.json").is_err());
    }

    #[test]
    fn entity_prefix_does_not_cover_longer_ids() {
        let codec = EntityFirstCodec::new("c", ".json");
        let key = codec.encode(&id("abcd"), &date("2020-01-01"));
        assert!(!key.starts_with(&codec.entity_prefix(&id("abc"))));
    }

    #[test]
    fn filter_drops_placeholders_and_reserved_keys() {
        let codec = EntityFirstCodec::new("content", ".json");
        let filter = KeyFilter::default();
        assert!(filter.accepts(&codec, "content/abc/_.json"));
        assert!(!filter.accepts(&codec, "content/abc/"));
        assert!(!filter.accepts(&codec, "content/__health"));
        assert!(!filter.accepts(&codec, "content/__marker/x.json"));
        assert!(!filter.accepts(&codec, ""));
    }

    #[test]
    fn filter_checks_local_segment_without_prefix() {
        let codec = EntityFirstCodec::default();
        let filter = KeyFilter::default();
        assert!(!filter.accepts(&codec, "__health"));
        assert!(filter.accepts(&codec, "a__b/_.json"));
    }

    #[test]
    fn production_codec_passes_scoping_check() {
        verify_entity_scoping(&EntityFirstCodec::new("content", ".json")).unwrap();
        verify_entity_scoping(&EntityFirstCodec::new("", "")).unwrap();
    }

    /// Puts the partition ahead of the entity, so one entity's keys are
    /// scattered across the bucket.
    #[derive(Debug)]
    struct PartitionFirstCodec;

    impl KeyCodec for PartitionFirstCodec {
        fn prefix(&self) -> &str {
            ""
        }

        fn encode(&self, entity: &EntityId, partition: &PartitionValue) -> String {
            format!("{}_{entity}", partition.as_str())
        }

        fn decode(&self, key: &str) -> EngineResult<DecodedKey> {
            let (partition, entity) = key
                .split_once('_')
                .ok_or_else(|| EngineError::malformed(key, "no separator"))?;
            Ok(DecodedKey {
                entity: EntityId::new(entity)?,
                partition: PartitionValue::new(partition)?,
            })
        }

        fn entity_prefix(&self, entity: &EntityId) -> String {
            entity.to_string()
        }
    }

    #[test]
    fn partition_first_codec_is_rejected() {
        let err = verify_entity_scoping(&PartitionFirstCodec).unwrap_err();
        assert!(matches!(err, EngineError::CodecInvariant(_)));
    }

    proptest! {
        #[test]
        fn encode_decode_roundtrip(
            prefix in "([a-z]{1,8}(/[a-z]{1,8})?)?",
            entity in "[a-zA-Z0-9][a-zA-Z0-9._-]{0,40}",
            partition in "([0-9]{4}-[0-9]{2}-[0-9]{2})?",
        ) {
            let codec = EntityFirstCodec::new(&prefix, DEFAULT_SUFFIX);
            let entity = EntityId::new(entity).unwrap();
            let partition = PartitionValue::new(partition).unwrap();
            let key = codec.encode(&entity, &partition);

            prop_assert!(key.starts_with(&codec.entity_prefix(&entity)));
            prop_assert!(KeyFilter::default().accepts(&codec, &key));
            let decoded = codec.decode(&key).unwrap();
            prop_assert_eq!(decoded.entity, entity);
            prop_assert_eq!(decoded.partition, partition);
        }

        #[test]
        fn distinct_entities_have_disjoint_prefixes(
            a in "[a-z0-9]{1,12}",
            b in "[a-z0-9]{1,12}",
        ) {
            prop_assume!(a != b);
            let codec = EntityFirstCodec::new("content", DEFAULT_SUFFIX);
            let a = EntityId::new(a).unwrap();
            let b = EntityId::new(b).unwrap();
            let key = codec.encode(&b, &PartitionValue::none());
            prop_assert!(!key.starts_with(&codec.entity_prefix(&a)));
        }
    }
}

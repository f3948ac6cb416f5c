//! Tags - Key/value labels attached to resources
//!
//! Tags travel on a side channel (list/update tag calls) rather than in the
//! resource body. The effective tag set (`tags_all`) is the resource's own
//! tags merged over process-wide defaults; on read, defaults are subtracted
//! again so `tags` reflects only what the configuration declared.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::resource::{Attributes, Value};

/// Attribute holding the tags declared on the resource
pub const TAGS: &str = "tags";

/// Computed attribute holding the effective tags (defaults included)
pub const TAGS_ALL: &str = "tags_all";

/// Prefix reserved for tags managed by the cloud provider itself
pub const SYSTEM_PREFIX: &str = "aws:";

pub type Tags = BTreeMap<String, String>;

/// True for attributes handled by the tag side channel
pub fn is_tag_attribute(name: &str) -> bool {
    name == TAGS || name == TAGS_ALL
}

/// Tags applied to every resource unless the resource overrides the key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefaultTags(pub Tags);

impl DefaultTags {
    pub fn new<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Effective tags: defaults overlaid with resource tags (resource wins)
    pub fn merge(&self, resource_tags: &Tags) -> Tags {
        let mut merged = self.0.clone();
        merged.extend(resource_tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// Drop entries that exactly match a default tag
    pub fn remove_defaults(&self, all: &Tags) -> Tags {
        all.iter()
            .filter(|(k, v)| self.0.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Tags the reconciler must never manage or report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreTags {
    #[serde(default)]
    pub keys: BTreeSet<String>,
    #[serde(default)]
    pub key_prefixes: Vec<String>,
}

impl IgnoreTags {
    pub fn is_ignored(&self, key: &str) -> bool {
        key.starts_with(SYSTEM_PREFIX)
            || self.keys.contains(key)
            || self.key_prefixes.iter().any(|p| key.starts_with(p.as_str()))
    }

    pub fn apply(&self, tags: &Tags) -> Tags {
        tags.iter()
            .filter(|(k, _)| !self.is_ignored(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Minimal change that turns one tag set into another
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDiff {
    /// Keys to add or overwrite
    pub upsert: Tags,
    /// Keys to remove
    pub remove: Vec<String>,
}

impl TagDiff {
    pub fn between(old: &Tags, new: &Tags) -> Self {
        let upsert = new
            .iter()
            .filter(|(k, v)| old.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let remove = old
            .keys()
            .filter(|k| !new.contains_key(*k))
            .cloned()
            .collect();
        Self { upsert, remove }
    }

    pub fn is_empty(&self) -> bool {
        self.upsert.is_empty() && self.remove.is_empty()
    }
}

/// Read a string map attribute as tags
pub fn from_attributes(attributes: &Attributes, name: &str) -> Tags {
    match attributes.get(name) {
        Some(Value::Map(map)) => map
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect(),
        _ => Tags::new(),
    }
}

/// Tags as an attribute value; empty tag sets are absent
pub fn to_value(tags: &Tags) -> Option<Value> {
    if tags.is_empty() {
        None
    } else {
        Some(Value::string_map(tags.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(entries: &[(&str, &str)]) -> Tags {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn merge_prefers_resource_tags() {
        let defaults = DefaultTags::new([("env", "prod"), ("team", "core")]);
        let merged = defaults.merge(&tags(&[("env", "dev"), ("app", "mesh")]));
        assert_eq!(
            merged,
            tags(&[("app", "mesh"), ("env", "dev"), ("team", "core")])
        );
    }

    #[test]
    fn remove_defaults_keeps_overrides() {
        let defaults = DefaultTags::new([("env", "prod"), ("team", "core")]);
        let all = tags(&[("app", "mesh"), ("env", "dev"), ("team", "core")]);
        assert_eq!(
            defaults.remove_defaults(&all),
            tags(&[("app", "mesh"), ("env", "dev")])
        );
    }

    #[test]
    fn ignore_system_and_configured_keys() {
        let ignore = IgnoreTags {
            keys: ["owner".to_string()].into_iter().collect(),
            key_prefixes: vec!["kubernetes.io/".to_string()],
        };
        let all = tags(&[
            ("aws:cloudformation:stack-name", "s"),
            ("owner", "me"),
            ("kubernetes.io/cluster", "c"),
            ("app", "mesh"),
        ]);
        assert_eq!(ignore.apply(&all), tags(&[("app", "mesh")]));
    }

    #[test]
    fn diff_between_tag_sets() {
        let old = tags(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let new = tags(&[("a", "1"), ("b", "20"), ("d", "4")]);
        let diff = TagDiff::between(&old, &new);
        assert_eq!(diff.upsert, tags(&[("b", "20"), ("d", "4")]));
        assert_eq!(diff.remove, vec!["c".to_string()]);
        assert!(TagDiff::between(&old, &old).is_empty());
    }

    #[test]
    fn attribute_conversion() {
        let mut attrs = Attributes::new();
        attrs.insert(TAGS.to_string(), Value::string_map([("k", "v")]));
        let t = from_attributes(&attrs, TAGS);
        assert_eq!(t, tags(&[("k", "v")]));
        assert_eq!(to_value(&t), attrs.get(TAGS).cloned());
        assert_eq!(to_value(&Tags::new()), None);
    }
}

//! Differ - Compare two attribute trees of the same resource
//!
//! Update needs to know which top-level attributes changed between the old
//! and new configuration, and which remote update calls those changes map
//! to. Read uses the same comparison to report drift between tracked state
//! and the observed remote object.

use std::collections::BTreeMap;

use crate::resource::{Attributes, Value};
use crate::schema::{AttributeSchema, Codec, ResourceSchema};
use crate::tags;
use crate::wire::json_equivalent;

/// Result of comparing an old configuration with a new one
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Nothing to send
    NoChange,
    /// In-place update, one remote call per group
    Update {
        changed_attributes: Vec<String>,
        groups: Vec<GroupChange>,
    },
    /// A create-only attribute changed
    Replace { attributes: Vec<String> },
}

impl Diff {
    /// Returns whether this Diff involves a change
    pub fn is_change(&self) -> bool {
        !matches!(self, Diff::NoChange)
    }
}

/// Changed attributes converging through one remote update call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupChange {
    pub group: String,
    pub attributes: Vec<String>,
}

/// Compare old and new configuration of one resource
pub fn diff(schema: &ResourceSchema, old: &Attributes, new: &Attributes) -> Diff {
    let changed = changed_attributes(schema, old, new);
    if changed.is_empty() {
        return Diff::NoChange;
    }

    let replace: Vec<String> = changed
        .iter()
        .filter(|name| schema.get(name).is_some_and(|a| a.create_only))
        .cloned()
        .collect();
    if !replace.is_empty() {
        return Diff::Replace {
            attributes: replace,
        };
    }

    let groups = group_changes(schema, &changed);
    Diff::Update {
        changed_attributes: changed,
        groups,
    }
}

/// Top-level attributes whose value differs between `old` and `new`
///
/// Computed-only attributes and the effective tag set are ignored; they
/// are outputs, not configuration.
pub fn changed_attributes(schema: &ResourceSchema, old: &Attributes, new: &Attributes) -> Vec<String> {
    schema
        .attributes
        .values()
        .filter(|attr| !attr.is_computed_only() && attr.name != tags::TAGS_ALL)
        .filter(|attr| !attribute_eq(attr, old.get(&attr.name), new.get(&attr.name)))
        .map(|attr| attr.name.clone())
        .collect()
}

/// Group changed attributes by update group, in group name order
pub fn group_changes(schema: &ResourceSchema, changed: &[String]) -> Vec<GroupChange> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for name in changed {
        let group = if tags::is_tag_attribute(name) {
            tags::TAGS
        } else {
            schema.get(name).map_or(name.as_str(), AttributeSchema::group)
        };
        groups
            .entry(group.to_string())
            .or_default()
            .push(name.clone());
    }
    groups
        .into_iter()
        .map(|(group, attributes)| GroupChange { group, attributes })
        .collect()
}

/// Attributes where the observed object no longer matches tracked state
///
/// Write-only attributes are never returned by the remote API, so they are
/// not compared.
pub fn drifted_attributes(
    schema: &ResourceSchema,
    tracked: &Attributes,
    observed: &Attributes,
) -> Vec<String> {
    schema
        .attributes
        .values()
        .filter(|attr| !attr.is_computed_only() && !attr.write_only && attr.name != tags::TAGS_ALL)
        .filter(|attr| !attribute_eq(attr, tracked.get(&attr.name), observed.get(&attr.name)))
        .map(|attr| attr.name.clone())
        .collect()
}

fn attribute_eq(attr: &AttributeSchema, a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(Value::String(x)), Some(Value::String(y))) if attr.codec == Codec::Json => {
            json_equivalent(x, y)
        }
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeType, types};

    fn schema() -> ResourceSchema {
        ResourceSchema::new("access")
            .attribute(
                AttributeSchema::new("server_id", AttributeType::String)
                    .required()
                    .create_only(),
            )
            .attribute(AttributeSchema::new("home_directory", AttributeType::String).in_group("access"))
            .attribute(
                AttributeSchema::new("policy", AttributeType::String)
                    .with_codec(Codec::Json)
                    .in_group("access"),
            )
            .attribute(
                AttributeSchema::new("gids", AttributeType::Set(Box::new(AttributeType::Int)))
                    .in_group("posix"),
            )
            .attribute(AttributeSchema::new("role", AttributeType::String).write_only())
            .attribute(AttributeSchema::new("tags", types::tags()))
            .attribute(AttributeSchema::new("tags_all", types::tags()).computed())
            .attribute(AttributeSchema::new("arn", AttributeType::String).computed())
    }

    fn attrs(entries: &[(&str, Value)]) -> Attributes {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn identical_configuration_is_no_change() {
        let a = attrs(&[
            ("server_id", Value::from("s-1")),
            ("gids", Value::Set(vec![Value::Int(1), Value::Int(2)])),
        ]);
        let b = attrs(&[
            ("server_id", Value::from("s-1")),
            ("gids", Value::Set(vec![Value::Int(2), Value::Int(1)])),
        ]);
        assert_eq!(diff(&schema(), &a, &b), Diff::NoChange);
    }

    #[test]
    fn equivalent_json_is_no_change() {
        let a = attrs(&[("policy", Value::from(r#"{"a":1,"b":2}"#))]);
        let b = attrs(&[("policy", Value::from(r#"{ "b": 2, "a": 1 }"#))]);
        assert!(changed_attributes(&schema(), &a, &b).is_empty());
    }

    #[test]
    fn changes_grouped_by_update_group() {
        let old = attrs(&[
            ("home_directory", Value::from("/a")),
            ("gids", Value::Set(vec![Value::Int(1)])),
        ]);
        let new = attrs(&[
            ("home_directory", Value::from("/b")),
            ("policy", Value::from("{}")),
            ("tags", Value::string_map([("env", "prod")])),
        ]);

        match diff(&schema(), &old, &new) {
            Diff::Update {
                changed_attributes,
                groups,
            } => {
                assert_eq!(
                    changed_attributes,
                    vec!["gids", "home_directory", "policy", "tags"]
                );
                assert_eq!(
                    groups,
                    vec![
                        GroupChange {
                            group: "access".to_string(),
                            attributes: vec!["home_directory".to_string(), "policy".to_string()],
                        },
                        GroupChange {
                            group: "posix".to_string(),
                            attributes: vec!["gids".to_string()],
                        },
                        GroupChange {
                            group: "tags".to_string(),
                            attributes: vec!["tags".to_string()],
                        },
                    ]
                );
            }
            other => panic!("Expected Update, got {:?}", other),
        }
    }

    #[test]
    fn create_only_change_requires_replacement() {
        let old = attrs(&[("server_id", Value::from("s-1")), ("home_directory", Value::from("/a"))]);
        let new = attrs(&[("server_id", Value::from("s-2")), ("home_directory", Value::from("/b"))]);
        assert_eq!(
            diff(&schema(), &old, &new),
            Diff::Replace {
                attributes: vec!["server_id".to_string()]
            }
        );
    }

    #[test]
    fn computed_attributes_are_ignored() {
        let old = attrs(&[("arn", Value::from("arn:1"))]);
        let new = attrs(&[("arn", Value::from("arn:2"))]);
        assert!(!diff(&schema(), &old, &new).is_change());
    }

    #[test]
    fn write_only_attributes_never_drift() {
        let tracked = attrs(&[("role", Value::from("arn:aws:iam::1:role/r")), ("home_directory", Value::from("/a"))]);
        let observed = attrs(&[("home_directory", Value::from("/b"))]);
        assert_eq!(
            drifted_attributes(&schema(), &tracked, &observed),
            vec!["home_directory".to_string()]
        );
    }
}

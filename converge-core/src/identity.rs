//! Identity - Encoding and parsing resource identities
//!
//! Some remote objects carry a provider-assigned unique id; others are
//! addressed only by natural-key fields, in which case the identity is the
//! key values joined with [`SEPARATOR`]. Either way the host stores an opaque
//! [`Identity`], and remote calls are addressed by a [`RemoteKey`].

use std::fmt;

use crate::resource::{Attributes, Identity, Value};

/// Separator between natural-key components in composite identities and
/// import references
pub const SEPARATOR: char = '/';

/// Field of the natural key: attribute name and the wire field it addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyField {
    pub attribute: &'static str,
    pub wire_name: &'static str,
}

impl KeyField {
    pub const fn new(attribute: &'static str, wire_name: &'static str) -> Self {
        Self {
            attribute,
            wire_name,
        }
    }
}

/// How a resource kind derives its identity
#[derive(Debug, Clone)]
pub enum IdentityScheme {
    /// Identity is the natural-key values joined by [`SEPARATOR`]
    Composite { fields: Vec<KeyField> },
    /// Identity is the provider-assigned id found at `wire_field` in the
    /// create response. Remote calls are addressed by `key_fields`; with no
    /// key fields, the identity itself is the key.
    Assigned {
        wire_field: &'static str,
        key_fields: Vec<KeyField>,
    },
}

/// Ordered `(wire_name, value)` pairs addressing one remote object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteKey(Vec<(String, String)>);

impl RemoteKey {
    pub fn new(parts: Vec<(String, String)>) -> Self {
        Self(parts)
    }

    pub fn single(wire_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self(vec![(wire_name.into(), value.into())])
    }

    pub fn parts(&self) -> &[(String, String)] {
        &self.0
    }

    /// Value of one key component by wire name
    pub fn get(&self, wire_name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == wire_name)
            .map(|(_, v)| v.as_str())
    }

    /// Key values joined by `sep` (e.g., "|" for compound Cloud Control ids)
    pub fn join(&self, sep: &str) -> String {
        self.0
            .iter()
            .map(|(_, v)| v.as_str())
            .collect::<Vec<_>>()
            .join(sep)
    }
}

impl fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.join(&SEPARATOR.to_string()))
    }
}

/// Identity encoding error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("wrong format of reference ({reference}), expected: '{expected}'")]
    Malformed { reference: String, expected: String },

    #[error("key attribute '{0}' is missing or not a string")]
    MissingKey(String),

    #[error("create response does not contain '{0}'")]
    MissingAssignedId(String),
}

impl IdentityScheme {
    /// Fields whose values form the natural key
    pub fn key_fields(&self) -> &[KeyField] {
        match self {
            IdentityScheme::Composite { fields } => fields,
            IdentityScheme::Assigned { key_fields, .. } => key_fields,
        }
    }

    /// Human-readable reference format, e.g. "mesh_name/name"
    pub fn reference_format(&self) -> String {
        match self {
            IdentityScheme::Assigned {
                wire_field,
                key_fields,
            } if key_fields.is_empty() => wire_field.to_string(),
            _ => self
                .key_fields()
                .iter()
                .map(|f| f.attribute)
                .collect::<Vec<_>>()
                .join(&SEPARATOR.to_string()),
        }
    }

    /// Key attributes whose values could not be parsed back out of a
    /// reference: empty, or containing [`SEPARATOR`]
    pub fn unaddressable_keys<'a>(&self, attributes: &'a Attributes) -> Vec<(&'static str, &'a str)> {
        self.key_fields()
            .iter()
            .filter_map(|field| {
                let value = attributes.get(field.attribute)?.as_str()?;
                (value.is_empty() || value.contains(SEPARATOR)).then_some((field.attribute, value))
            })
            .collect()
    }

    /// Build the remote key from attributes (create, or tracked state for
    /// provider-assigned identities)
    pub fn key_from_attributes(
        &self,
        identity: Option<&Identity>,
        attributes: &Attributes,
    ) -> Result<RemoteKey, IdentityError> {
        match self {
            IdentityScheme::Assigned {
                wire_field,
                key_fields,
            } if key_fields.is_empty() => match identity {
                Some(id) => Ok(RemoteKey::single(*wire_field, id.as_str())),
                None => Err(IdentityError::MissingAssignedId(wire_field.to_string())),
            },
            _ => {
                let mut parts = Vec::new();
                for field in self.key_fields() {
                    let value = attributes
                        .get(field.attribute)
                        .and_then(Value::as_str)
                        .ok_or_else(|| IdentityError::MissingKey(field.attribute.to_string()))?;
                    parts.push((field.wire_name.to_string(), value.to_string()));
                }
                Ok(RemoteKey::new(parts))
            }
        }
    }

    /// Remote key for a tracked resource
    ///
    /// Composite identities are parsed back into their components; assigned
    /// identities fall back to the tracked natural-key attributes.
    pub fn key_for(
        &self,
        identity: &Identity,
        attributes: &Attributes,
    ) -> Result<RemoteKey, IdentityError> {
        match self {
            IdentityScheme::Composite { fields } => {
                let values = parse_reference(identity.as_str(), fields.len(), &self.reference_format())?;
                Ok(RemoteKey::new(
                    fields
                        .iter()
                        .zip(values)
                        .map(|(f, v)| (f.wire_name.to_string(), v))
                        .collect(),
                ))
            }
            IdentityScheme::Assigned { .. } => self.key_from_attributes(Some(identity), attributes),
        }
    }

    /// Parse an import reference into a remote key plus the natural-key
    /// attributes it implies
    pub fn parse_import(&self, reference: &str) -> Result<(RemoteKey, Attributes), IdentityError> {
        match self {
            IdentityScheme::Assigned {
                wire_field,
                key_fields,
            } if key_fields.is_empty() => {
                let values = parse_reference(reference, 1, wire_field)?;
                let id = values.into_iter().next().unwrap_or_default();
                Ok((RemoteKey::single(*wire_field, id), Attributes::new()))
            }
            _ => {
                let fields = self.key_fields();
                let values = parse_reference(reference, fields.len(), &self.reference_format())?;
                let mut attrs = Attributes::new();
                let mut parts = Vec::new();
                for (field, value) in fields.iter().zip(values) {
                    attrs.insert(field.attribute.to_string(), Value::String(value.clone()));
                    parts.push((field.wire_name.to_string(), value));
                }
                Ok((RemoteKey::new(parts), attrs))
            }
        }
    }

    /// Remote key of a listed object summary
    pub fn key_from_summary(
        &self,
        summary: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<RemoteKey, IdentityError> {
        let fields: Vec<(&str, &str)> = match self {
            IdentityScheme::Assigned {
                wire_field,
                key_fields,
            } if key_fields.is_empty() => vec![(*wire_field, *wire_field)],
            _ => self
                .key_fields()
                .iter()
                .map(|f| (f.attribute, f.wire_name))
                .collect(),
        };

        let mut parts = Vec::new();
        for (attribute, wire_name) in fields {
            let value = crate::wire::get_path(summary, wire_name)
                .and_then(|v| v.as_str())
                .ok_or_else(|| IdentityError::MissingKey(attribute.to_string()))?;
            parts.push((wire_name.to_string(), value.to_string()));
        }
        Ok(RemoteKey::new(parts))
    }

    /// Derive the identity after a successful create or import
    pub fn identity(
        &self,
        key: &RemoteKey,
        response: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Identity, IdentityError> {
        match self {
            IdentityScheme::Composite { .. } => Ok(Identity::new(key.to_string())),
            IdentityScheme::Assigned { wire_field, .. } => {
                crate::wire::get_path(response, wire_field)
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .map(Identity::new)
                    .ok_or_else(|| IdentityError::MissingAssignedId(wire_field.to_string()))
            }
        }
    }
}

/// Split a `/`-separated reference into exactly `expected` non-empty components
pub fn parse_reference(
    reference: &str,
    expected: usize,
    format: &str,
) -> Result<Vec<String>, IdentityError> {
    let parts: Vec<&str> = reference.split(SEPARATOR).collect();
    if parts.len() != expected || parts.iter().any(|p| p.is_empty()) {
        return Err(IdentityError::Malformed {
            reference: reference.to_string(),
            expected: format.to_string(),
        });
    }
    Ok(parts.into_iter().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mesh_scheme() -> IdentityScheme {
        IdentityScheme::Composite {
            fields: vec![
                KeyField::new("mesh_name", "meshName"),
                KeyField::new("name", "virtualNodeName"),
            ],
        }
    }

    #[test]
    fn parse_two_component_reference() {
        let parts = parse_reference("meshA/nodeB", 2, "mesh/node").unwrap();
        assert_eq!(parts, vec!["meshA".to_string(), "nodeB".to_string()]);
    }

    #[test]
    fn reject_wrong_component_count() {
        assert!(matches!(
            parse_reference("meshA", 2, "mesh/node"),
            Err(IdentityError::Malformed { .. })
        ));
        assert!(matches!(
            parse_reference("meshA/nodeB/extra", 2, "mesh/node"),
            Err(IdentityError::Malformed { .. })
        ));
        assert!(matches!(
            parse_reference("meshA/", 2, "mesh/node"),
            Err(IdentityError::Malformed { .. })
        ));
    }

    #[test]
    fn composite_identity_round_trips() {
        let scheme = mesh_scheme();
        let (key, attrs) = scheme.parse_import("meshA/nodeB").unwrap();
        assert_eq!(key.get("meshName"), Some("meshA"));
        assert_eq!(key.get("virtualNodeName"), Some("nodeB"));
        assert_eq!(attrs.get("name"), Some(&Value::from("nodeB")));

        let identity = scheme.identity(&key, &serde_json::Map::new()).unwrap();
        assert_eq!(identity.as_str(), "meshA/nodeB");

        let back = scheme.key_for(&identity, &Attributes::new()).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn assigned_identity_from_response() {
        let scheme = IdentityScheme::Assigned {
            wire_field: "metadata.uid",
            key_fields: vec![
                KeyField::new("mesh_name", "meshName"),
                KeyField::new("name", "virtualNodeName"),
            ],
        };
        let response = json!({"metadata": {"uid": "abc-123"}});
        let key = RemoteKey::single("meshName", "m");
        let identity = scheme
            .identity(&key, response.as_object().unwrap())
            .unwrap();
        assert_eq!(identity.as_str(), "abc-123");

        let missing = scheme.identity(&key, &serde_json::Map::new());
        assert!(matches!(missing, Err(IdentityError::MissingAssignedId(_))));
    }

    #[test]
    fn assigned_identity_without_key_fields_is_the_key() {
        let scheme = IdentityScheme::Assigned {
            wire_field: "ByteMatchSetId",
            key_fields: vec![],
        };
        let key = scheme
            .key_for(&Identity::new("set-1"), &Attributes::new())
            .unwrap();
        assert_eq!(key, RemoteKey::single("ByteMatchSetId", "set-1"));

        assert!(scheme.parse_import("a/b").is_err());
    }

    #[test]
    fn key_from_listing_summary() {
        let summary = json!({"meshName": "m", "virtualNodeName": "n", "arn": "arn:x"});
        let key = mesh_scheme()
            .key_from_summary(summary.as_object().unwrap())
            .unwrap();
        assert_eq!(key.to_string(), "m/n");

        let waf = IdentityScheme::Assigned {
            wire_field: "ByteMatchSetId",
            key_fields: vec![],
        };
        let summary = json!({"ByteMatchSetId": "set-1", "Name": "x"});
        assert_eq!(
            waf.key_from_summary(summary.as_object().unwrap()).unwrap(),
            RemoteKey::single("ByteMatchSetId", "set-1")
        );
    }

    #[test]
    fn separator_in_key_values_is_unaddressable() {
        let scheme = mesh_scheme();
        let mut attrs = Attributes::new();
        attrs.insert("mesh_name".to_string(), Value::from("m"));
        attrs.insert("name".to_string(), Value::from("a/b"));
        assert_eq!(scheme.unaddressable_keys(&attrs), vec![("name", "a/b")]);

        attrs.insert("name".to_string(), Value::from("b"));
        attrs.insert("mesh_name".to_string(), Value::from(""));
        assert_eq!(scheme.unaddressable_keys(&attrs), vec![("mesh_name", "")]);

        attrs.insert("mesh_name".to_string(), Value::from("m"));
        assert!(scheme.unaddressable_keys(&attrs).is_empty());
    }

    #[test]
    fn key_from_attributes_requires_every_field() {
        let scheme = mesh_scheme();
        let mut attrs = Attributes::new();
        attrs.insert("mesh_name".to_string(), Value::from("m"));
        assert_eq!(
            scheme.key_from_attributes(None, &attrs),
            Err(IdentityError::MissingKey("name".to_string()))
        );
    }
}

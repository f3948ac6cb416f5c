//! Wire mapping between attribute trees and remote API documents
//!
//! `encode` turns a desired configuration into the JSON request body of the
//! remote API and `decode` projects a remote object back into the attribute
//! tree. Both walk the resource schema, so the mapping is the same for every
//! resource kind; only the schema (provider names, codecs) differs.
//!
//! Omission and explicit zero stay distinguishable: absent attributes and
//! absent blocks are left out of the request, while `0`, `false` and `""`
//! are sent. Empty lists and sets carry no information on the wire and are
//! treated like omission in both directions.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value as JsonValue, json};

use crate::resource::{Attributes, Value};
use crate::schema::{AttributeSchema, AttributeType, Codec, ResourceSchema};
use crate::tags;

/// JSON object exchanged with the remote API
pub type WireObject = Map<String, JsonValue>;

/// Look up a dotted path (e.g., "metadata.uid") in a wire object
pub fn get_path<'a>(object: &'a WireObject, path: &str) -> Option<&'a JsonValue> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = object.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Set a dotted path, creating intermediate objects as needed
pub fn set_path(object: &mut WireObject, path: &str, value: JsonValue) {
    match path.split_once('.') {
        None => {
            object.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = object
                .entry(head.to_string())
                .or_insert_with(|| JsonValue::Object(Map::new()));
            if !entry.is_object() {
                *entry = JsonValue::Object(Map::new());
            }
            if let JsonValue::Object(inner) = entry {
                set_path(inner, rest, value);
            }
        }
    }
}

/// Encode a desired configuration into a create request body
pub fn encode(schema: &ResourceSchema, attributes: &Attributes) -> WireObject {
    let mut out = Map::new();
    for (name, attr) in &schema.attributes {
        if attr.is_computed_only() || attr.local || tags::is_tag_attribute(name) {
            continue;
        }
        if let Some(value) = attributes.get(name)
            && let Some(encoded) = encode_value(&attr.attr_type, attr.codec, value)
        {
            set_path(&mut out, attr.wire_name(), encoded);
        }
    }
    out
}

/// Encode only the changed attributes into an update request body
///
/// Attributes that were removed are sent as `null` so the remote clears them.
pub fn encode_update(schema: &ResourceSchema, changed: &[String], new: &Attributes) -> WireObject {
    let mut out = Map::new();
    for name in changed {
        let Some(attr) = schema.get(name).filter(|a| !a.local) else {
            continue;
        };
        let encoded = new
            .get(name)
            .and_then(|v| encode_value(&attr.attr_type, attr.codec, v))
            .unwrap_or(JsonValue::Null);
        set_path(&mut out, attr.wire_name(), encoded);
    }
    out
}

/// Project a remote object back onto the schema's attribute tree
pub fn decode(schema: &ResourceSchema, wire: &WireObject) -> Attributes {
    let mut out = Attributes::new();
    for (name, attr) in &schema.attributes {
        if tags::is_tag_attribute(name) {
            continue;
        }
        if let Some(raw) = get_path(wire, attr.wire_name())
            && let Some(value) = decode_value(&attr.attr_type, attr.codec, raw)
        {
            out.insert(name.clone(), value);
        }
    }
    out
}

/// Remove empty lists, sets and maps, recursively
///
/// This is the canonical form of a desired configuration: it is what
/// `decode(encode(x))` yields.
pub fn prune_empty(attributes: &mut Attributes) {
    attributes.retain(|_, value| prune_value(value));
}

fn prune_value(value: &mut Value) -> bool {
    match value {
        Value::List(items) | Value::Set(items) => {
            items.retain_mut(prune_value);
            !items.is_empty()
        }
        Value::Map(map) => {
            map.retain(|_, v| prune_value(v));
            !map.is_empty()
        }
        Value::Block(attrs) => {
            prune_empty(attrs);
            true
        }
        _ => true,
    }
}

/// Strip `Custom`/`Constrained` wrappers down to the structural type
fn structural(ty: &AttributeType) -> &AttributeType {
    match ty {
        AttributeType::Custom { base, .. } | AttributeType::Constrained { base, .. } => {
            structural(base)
        }
        other => other,
    }
}

fn encode_value(ty: &AttributeType, codec: Codec, value: &Value) -> Option<JsonValue> {
    let ty = structural(ty);
    match value {
        Value::String(s) => match codec {
            Codec::Json => Some(json!(normalize_json(s))),
            _ => Some(json!(s)),
        },
        Value::Int(n) => Some(json!(n)),
        Value::Bool(b) => Some(json!(b)),
        Value::List(items) | Value::Set(items) => {
            if items.is_empty() {
                return None;
            }
            let inner = match ty {
                AttributeType::List(inner) | AttributeType::Set(inner) => inner.as_ref(),
                other => other,
            };
            Some(JsonValue::Array(
                items
                    .iter()
                    .filter_map(|item| encode_value(inner, codec, item))
                    .collect(),
            ))
        }
        Value::Map(map) => {
            if map.is_empty() {
                return None;
            }
            let inner = match ty {
                AttributeType::Map(inner) => inner.as_ref(),
                other => other,
            };
            Some(JsonValue::Object(
                map.iter()
                    .filter_map(|(k, v)| encode_value(inner, codec, v).map(|e| (k.clone(), e)))
                    .collect(),
            ))
        }
        Value::Block(attrs) => {
            let block = ty.block_schema()?;
            Some(JsonValue::Object(encode_block(&block.attributes, attrs)))
        }
    }
}

fn encode_block(schemas: &BTreeMap<String, AttributeSchema>, attrs: &Attributes) -> WireObject {
    let mut out = Map::new();
    for (name, attr) in schemas {
        if let Some(value) = attrs.get(name)
            && let Some(encoded) = encode_value(&attr.attr_type, attr.codec, value)
        {
            set_path(&mut out, attr.wire_name(), encoded);
        }
    }
    out
}

fn decode_value(ty: &AttributeType, codec: Codec, raw: &JsonValue) -> Option<Value> {
    if raw.is_null() {
        return None;
    }
    match structural(ty) {
        AttributeType::String | AttributeType::Enum(_) => decode_scalar_string(codec, raw),
        AttributeType::Int => match raw {
            JsonValue::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(Value::Int),
            JsonValue::String(s) => s.parse().ok().map(Value::Int),
            _ => None,
        },
        AttributeType::Bool => match raw {
            JsonValue::Bool(b) => Some(Value::Bool(*b)),
            JsonValue::String(s) => s.parse().ok().map(Value::Bool),
            _ => None,
        },
        AttributeType::List(inner) => decode_items(inner, codec, raw).map(Value::List),
        AttributeType::Set(inner) => decode_items(inner, codec, raw).map(Value::Set),
        AttributeType::Map(inner) => {
            let object = raw.as_object()?;
            let map: BTreeMap<String, Value> = object
                .iter()
                .filter_map(|(k, v)| decode_value(inner, codec, v).map(|d| (k.clone(), d)))
                .collect();
            if map.is_empty() { None } else { Some(Value::Map(map)) }
        }
        AttributeType::Block(block) => {
            let object = raw.as_object()?;
            let mut attrs = Attributes::new();
            for (name, attr) in &block.attributes {
                if let Some(inner) = get_path(object, attr.wire_name())
                    && let Some(value) = decode_value(&attr.attr_type, attr.codec, inner)
                {
                    attrs.insert(name.clone(), value);
                }
            }
            Some(Value::Block(attrs))
        }
        AttributeType::Custom { .. } | AttributeType::Constrained { .. } => None,
    }
}

fn decode_items(inner: &AttributeType, codec: Codec, raw: &JsonValue) -> Option<Vec<Value>> {
    let items: Vec<Value> = raw
        .as_array()?
        .iter()
        .filter_map(|item| decode_value(inner, codec, item))
        .collect();
    if items.is_empty() { None } else { Some(items) }
}

fn decode_scalar_string(codec: Codec, raw: &JsonValue) -> Option<Value> {
    match codec {
        Codec::Timestamp => decode_timestamp(raw).map(Value::String),
        Codec::Json => match raw {
            JsonValue::String(s) => Some(Value::String(normalize_json(s))),
            other => Some(Value::String(other.to_string())),
        },
        Codec::Plain => match raw {
            JsonValue::String(s) => Some(Value::String(s.clone())),
            JsonValue::Number(n) => Some(Value::String(n.to_string())),
            JsonValue::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
    }
}

/// Timestamps arrive as epoch seconds or as RFC 3339 strings
fn decode_timestamp(raw: &JsonValue) -> Option<String> {
    let parsed: DateTime<Utc> = match raw {
        JsonValue::Number(n) => {
            let secs = n.as_f64()?;
            let whole = secs.trunc() as i64;
            let nanos = ((secs - secs.trunc()) * 1e9).round() as u32;
            DateTime::from_timestamp(whole, nanos)?
        }
        JsonValue::String(s) => DateTime::parse_from_rfc3339(s).ok()?.with_timezone(&Utc),
        _ => return None,
    };
    Some(parsed.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Canonical text of a JSON document (sorted keys, no insignificant
/// whitespace); unparsable input is returned unchanged
pub fn normalize_json(text: &str) -> String {
    match serde_json::from_str::<JsonValue>(text) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => text.to_string(),
    }
}

/// Semantic equality of two JSON documents
pub fn json_equivalent(a: &str, b: &str) -> bool {
    match (
        serde_json::from_str::<JsonValue>(a),
        serde_json::from_str::<JsonValue>(b),
    ) {
        (Ok(x), Ok(y)) => x == y,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{BlockSchema, types};

    fn node_schema() -> ResourceSchema {
        let duration = BlockSchema::new()
            .attribute(AttributeSchema::new("unit", types::one_of(&["s", "ms"])).required())
            .attribute(AttributeSchema::new("value", AttributeType::Int).required());

        ResourceSchema::new("node")
            .attribute(
                AttributeSchema::new("name", AttributeType::String)
                    .required()
                    .with_provider_name("nodeName"),
            )
            .attribute(
                AttributeSchema::new("scope", AttributeType::String)
                    .required()
                    .with_provider_name("scopeName"),
            )
            .attribute(
                AttributeSchema::new(
                    "spec",
                    types::block(
                        BlockSchema::new()
                            .attribute(
                                AttributeSchema::new(
                                    "backend",
                                    AttributeType::Set(Box::new(AttributeType::String)),
                                )
                                .with_provider_name("backends"),
                            )
                            .attribute(
                                AttributeSchema::new("idle", types::block(duration))
                                    .with_provider_name("idleTimeout"),
                            )
                            .attribute(
                                AttributeSchema::new("port", AttributeType::Int)
                                    .with_provider_name("port"),
                            ),
                    ),
                )
                .with_provider_name("spec"),
            )
            .attribute(
                AttributeSchema::new("policy", AttributeType::String).with_codec(Codec::Json),
            )
            .attribute(
                AttributeSchema::new("created_at", AttributeType::String)
                    .computed()
                    .with_codec(Codec::Timestamp)
                    .with_provider_name("metadata.createdAt"),
            )
            .attribute(
                AttributeSchema::new("uid", AttributeType::String)
                    .computed()
                    .with_provider_name("metadata.uid"),
            )
    }

    fn desired() -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("name".to_string(), Value::from("n1"));
        attrs.insert("scope".to_string(), Value::from("s1"));
        attrs.insert(
            "spec".to_string(),
            Value::block([
                (
                    "backend",
                    Value::Set(vec![Value::from("b"), Value::from("a")]),
                ),
                (
                    "idle",
                    Value::block([("unit", Value::from("s")), ("value", Value::Int(0))]),
                ),
                ("port", Value::Int(0)),
            ]),
        );
        attrs.insert(
            "policy".to_string(),
            Value::from(r#"{ "b": 1, "a": [1, 2] }"#),
        );
        attrs
    }

    #[test]
    fn encode_uses_provider_names() {
        let wire = encode(&node_schema(), &desired());
        assert_eq!(wire["nodeName"], json!("n1"));
        assert_eq!(wire["scopeName"], json!("s1"));
        assert_eq!(wire["spec"]["idleTimeout"]["value"], json!(0));
        // Explicit zero is sent, not dropped
        assert_eq!(wire["spec"]["port"], json!(0));
        // Computed attributes are never sent
        assert!(!wire.contains_key("metadata"));
    }

    #[test]
    fn absent_block_is_omitted() {
        let mut attrs = desired();
        attrs.remove("spec");
        let wire = encode(&node_schema(), &attrs);
        assert!(!wire.contains_key("spec"));
    }

    #[test]
    fn json_codec_is_normalized() {
        let wire = encode(&node_schema(), &desired());
        assert_eq!(wire["policy"], json!(r#"{"a":[1,2],"b":1}"#));
        assert!(json_equivalent(
            r#"{"a":[1,2],"b":1}"#,
            r#"{ "b": 1, "a": [1, 2] }"#
        ));
        assert!(!json_equivalent(r#"{"a":[2,1]}"#, r#"{"a":[1,2]}"#));
    }

    #[test]
    fn round_trip_preserves_desired_tree() {
        let schema = node_schema();
        let input = desired();
        let decoded = decode(&schema, &encode(&schema, &input));

        let mut expected = input;
        expected.insert(
            "policy".to_string(),
            Value::from(normalize_json(r#"{ "b": 1, "a": [1, 2] }"#)),
        );
        assert_eq!(decoded, expected);
    }

    #[test]
    fn decode_projects_computed_metadata() {
        let mut wire = encode(&node_schema(), &desired());
        wire.insert(
            "metadata".to_string(),
            json!({"uid": "u-1", "createdAt": 1700000000.0}),
        );
        let attrs = decode(&node_schema(), &wire);
        assert_eq!(attrs.get("uid"), Some(&Value::from("u-1")));
        assert_eq!(
            attrs.get("created_at"),
            Some(&Value::from("2023-11-14T22:13:20Z"))
        );
    }

    #[test]
    fn null_and_empty_nested_values_decode_to_absent() {
        let wire = json!({
            "nodeName": "n1",
            "spec": {"backends": [], "idleTimeout": null}
        });
        let attrs = decode(&node_schema(), wire.as_object().unwrap());
        let spec = attrs.get("spec").and_then(Value::as_block).unwrap();
        assert!(spec.is_empty());
        assert!(!attrs.contains_key("scope"));
    }

    #[test]
    fn encode_update_clears_removed_attributes() {
        let schema = node_schema();
        let mut new = desired();
        new.remove("policy");
        let body = encode_update(
            &schema,
            &["policy".to_string(), "name".to_string()],
            &new,
        );
        assert_eq!(body["policy"], JsonValue::Null);
        assert_eq!(body["nodeName"], json!("n1"));
        assert!(!body.contains_key("spec"));
    }

    #[test]
    fn prune_removes_empty_collections() {
        let mut attrs = Attributes::new();
        attrs.insert("a".to_string(), Value::List(vec![]));
        attrs.insert(
            "b".to_string(),
            Value::block([("c", Value::Set(vec![])), ("d", Value::Int(0))]),
        );
        prune_empty(&mut attrs);
        assert!(!attrs.contains_key("a"));
        assert_eq!(attrs.get("b"), Some(&Value::block([("d", Value::Int(0))])));
    }

    #[test]
    fn paths_are_created_on_demand() {
        let mut object = Map::new();
        set_path(&mut object, "metadata.uid", json!("x"));
        assert_eq!(get_path(&object, "metadata.uid"), Some(&json!("x")));
        assert_eq!(get_path(&object, "metadata.arn"), None);
    }

    #[test]
    fn local_attributes_are_never_sent() {
        let schema = node_schema().attribute(
            AttributeSchema::new("name_prefix", AttributeType::String)
                .local()
                .create_only(),
        );
        let mut attrs = desired();
        attrs.insert("name_prefix".to_string(), Value::from("web-"));

        assert!(!encode(&schema, &attrs).contains_key("name_prefix"));
        let update = encode_update(&schema, &["name_prefix".to_string()], &attrs);
        assert!(update.is_empty());
    }
}

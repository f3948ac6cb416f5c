//! Schema - Define type schemas for resources
//!
//! Each resource kind declares a schema describing its attribute tree:
//! types, required/optional/computed classification, nesting, validation,
//! and how each attribute maps onto the remote API's wire field.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{LazyLock, Mutex};

use regex::Regex;

use crate::resource::{Attributes, Value};

/// Attribute type
#[derive(Debug, Clone)]
pub enum AttributeType {
    /// String
    String,
    /// Integer
    Int,
    /// Boolean
    Bool,
    /// Enum (list of allowed values)
    Enum(Vec<String>),
    /// Custom type (with validation function)
    Custom {
        name: String,
        base: Box<AttributeType>,
        validate: fn(&Value) -> Result<(), String>,
    },
    /// Base type narrowed by a declarative constraint
    Constrained {
        base: Box<AttributeType>,
        constraint: Constraint,
    },
    /// Ordered list
    List(Box<AttributeType>),
    /// Unordered set
    Set(Box<AttributeType>),
    /// Free-form map with string keys
    Map(Box<AttributeType>),
    /// Nested block with its own attribute schema
    Block(Box<BlockSchema>),
}

/// Declarative value constraint
#[derive(Debug, Clone)]
pub enum Constraint {
    /// String length (in characters) within an inclusive range
    LenBetween(usize, usize),
    /// Integer within an inclusive range
    IntBetween(i64, i64),
    /// Integer greater than or equal to the bound
    IntAtLeast(i64),
    /// String fully matching a regular expression
    Pattern {
        pattern: &'static str,
        description: &'static str,
    },
}

/// Compiled pattern constraints, keyed by pattern source
static PATTERNS: LazyLock<Mutex<HashMap<&'static str, Regex>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Anchored regex for a pattern constraint, compiled once per pattern
fn compiled(pattern: &'static str) -> Result<Regex, regex::Error> {
    let mut cache = PATTERNS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(re) = cache.get(pattern) {
        return Ok(re.clone());
    }
    let re = Regex::new(&format!("^(?:{})$", pattern))?;
    cache.insert(pattern, re.clone());
    Ok(re)
}

impl Constraint {
    fn check(&self, value: &Value) -> Result<(), String> {
        match (self, value) {
            (Constraint::LenBetween(min, max), Value::String(s)) => {
                let len = s.chars().count();
                if len < *min || len > *max {
                    Err(format!(
                        "length must be between {} and {}, got {}",
                        min, max, len
                    ))
                } else {
                    Ok(())
                }
            }
            (Constraint::IntBetween(min, max), Value::Int(n)) => {
                if n < min || n > max {
                    Err(format!("must be between {} and {}, got {}", min, max, n))
                } else {
                    Ok(())
                }
            }
            (Constraint::IntAtLeast(min), Value::Int(n)) => {
                if n < min {
                    Err(format!("must be at least {}, got {}", min, n))
                } else {
                    Ok(())
                }
            }
            (
                Constraint::Pattern {
                    pattern,
                    description,
                },
                Value::String(s),
            ) => {
                let re = compiled(pattern)
                    .map_err(|e| format!("invalid pattern for {}: {}", description, e))?;
                if re.is_match(s) {
                    Ok(())
                } else {
                    Err(format!("'{}' is not a valid {}", s, description))
                }
            }
            (_, v) => Err(format!("constraint does not apply to {}", v.type_name())),
        }
    }
}

impl AttributeType {
    /// Check if a value conforms to this type
    pub fn validate(&self, value: &Value) -> Result<(), TypeError> {
        match (self, value) {
            (AttributeType::String, Value::String(_)) => Ok(()),
            (AttributeType::Int, Value::Int(_)) => Ok(()),
            (AttributeType::Bool, Value::Bool(_)) => Ok(()),

            (AttributeType::Enum(variants), Value::String(s)) => {
                if variants.iter().any(|v| v == s) {
                    Ok(())
                } else {
                    Err(TypeError::InvalidEnumVariant {
                        value: s.clone(),
                        expected: variants.clone(),
                    })
                }
            }

            (AttributeType::Custom { base, validate, .. }, v) => {
                base.validate(v)?;
                validate(v).map_err(|message| TypeError::ValidationFailed { message })
            }

            (AttributeType::Constrained { base, constraint }, v) => {
                base.validate(v)?;
                constraint
                    .check(v)
                    .map_err(|message| TypeError::ValidationFailed { message })
            }

            (AttributeType::List(inner), Value::List(items))
            | (AttributeType::Set(inner), Value::Set(items)) => {
                for (i, item) in items.iter().enumerate() {
                    inner.validate(item).map_err(|e| TypeError::ListItemError {
                        index: i,
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Map(inner), Value::Map(map)) => {
                for (k, v) in map {
                    inner.validate(v).map_err(|e| TypeError::MapValueError {
                        key: k.clone(),
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Block(block), Value::Block(attrs)) => {
                let mut errors = Vec::new();
                validate_attributes(&block.attributes, attrs, false, &mut errors);
                match errors.into_iter().next() {
                    None => Ok(()),
                    Some(e) => Err(e),
                }
            }

            _ => Err(TypeError::TypeMismatch {
                expected: self.type_name(),
                got: value.type_name().to_string(),
            }),
        }
    }

    fn type_name(&self) -> String {
        match self {
            AttributeType::String => "String".to_string(),
            AttributeType::Int => "Int".to_string(),
            AttributeType::Bool => "Bool".to_string(),
            AttributeType::Enum(variants) => format!("Enum({})", variants.join(" | ")),
            AttributeType::Custom { name, .. } => name.clone(),
            AttributeType::Constrained { base, .. } => base.type_name(),
            AttributeType::List(inner) => format!("List<{}>", inner.type_name()),
            AttributeType::Set(inner) => format!("Set<{}>", inner.type_name()),
            AttributeType::Map(inner) => format!("Map<{}>", inner.type_name()),
            AttributeType::Block(_) => "Block".to_string(),
        }
    }

    /// Block schema for a block, or a list/set of blocks
    pub fn block_schema(&self) -> Option<&BlockSchema> {
        match self {
            AttributeType::Block(block) => Some(block),
            AttributeType::List(inner) | AttributeType::Set(inner) => inner.block_schema(),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Type error
#[derive(Debug, Clone, thiserror::Error)]
pub enum TypeError {
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Invalid enum variant '{value}', expected one of: {}", expected.join(", "))]
    InvalidEnumVariant {
        value: String,
        expected: Vec<String>,
    },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Required attribute '{name}' is missing")]
    MissingRequired { name: String },

    #[error("Unknown attribute '{name}'")]
    UnknownAttribute { name: String },

    #[error("Attribute '{name}' is computed and cannot be set")]
    ComputedAttribute { name: String },

    #[error("Attribute '{name}' needs at least {min} items, got {got}")]
    TooFewItems { name: String, min: usize, got: usize },

    #[error("Attribute '{name}' allows at most {max} items, got {got}")]
    TooManyItems { name: String, max: usize, got: usize },

    #[error("Attribute '{name}' is not valid JSON: {message}")]
    InvalidJson { name: String, message: String },

    #[error("List item at index {index}: {inner}")]
    ListItemError { index: usize, inner: Box<TypeError> },

    #[error("Map value for key '{key}': {inner}")]
    MapValueError { key: String, inner: Box<TypeError> },

    #[error("{name}: {inner}")]
    AttributeError { name: String, inner: Box<TypeError> },
}

/// How an attribute is populated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeMode {
    /// Must be supplied by the user
    Required,
    /// May be supplied by the user
    Optional,
    /// Populated only by read; never supplied by the user
    Computed,
    /// May be supplied; otherwise populated by read
    OptionalComputed,
}

/// Wire representation of a scalar attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// Sent and received as-is
    #[default]
    Plain,
    /// JSON document carried in a string; compared semantically
    Json,
    /// Timestamp: epoch seconds or RFC 3339 on the wire, RFC 3339 in attributes
    Timestamp,
}

/// Attribute schema
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub name: String,
    pub attr_type: AttributeType,
    pub mode: AttributeMode,
    /// Changing this attribute replaces the resource
    pub create_only: bool,
    /// The remote API accepts this attribute but never returns it on read
    pub write_only: bool,
    /// Consumed before the request is built (e.g. a name prefix); never sent
    pub local: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
    /// Provider-side field name; top-level attributes may use a dotted path
    pub provider_name: Option<String>,
    pub codec: Codec,
    /// Update group this attribute converges with (defaults to its own name)
    pub update_group: Option<String>,
}

impl AttributeSchema {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            mode: AttributeMode::Optional,
            create_only: false,
            write_only: false,
            local: false,
            default: None,
            description: None,
            min_items: None,
            max_items: None,
            provider_name: None,
            codec: Codec::Plain,
            update_group: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.mode = AttributeMode::Required;
        self
    }

    pub fn computed(mut self) -> Self {
        self.mode = AttributeMode::Computed;
        self
    }

    pub fn optional_computed(mut self) -> Self {
        self.mode = AttributeMode::OptionalComputed;
        self
    }

    pub fn create_only(mut self) -> Self {
        self.create_only = true;
        self
    }

    pub fn write_only(mut self) -> Self {
        self.write_only = true;
        self
    }

    /// Input that shapes the request but is not itself a remote field
    pub fn local(mut self) -> Self {
        self.local = true;
        self.write_only = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_min_items(mut self, min: usize) -> Self {
        self.min_items = Some(min);
        self
    }

    pub fn with_max_items(mut self, max: usize) -> Self {
        self.max_items = Some(max);
        self
    }

    pub fn with_provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = Some(name.into());
        self
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.update_group = Some(group.into());
        self
    }

    pub fn is_computed_only(&self) -> bool {
        self.mode == AttributeMode::Computed
    }

    /// Name of the wire field (falls back to the attribute name)
    pub fn wire_name(&self) -> &str {
        self.provider_name.as_deref().unwrap_or(&self.name)
    }

    /// Update group this attribute belongs to
    pub fn group(&self) -> &str {
        self.update_group.as_deref().unwrap_or(&self.name)
    }

    fn validate_value(&self, value: &Value) -> Result<(), TypeError> {
        if let Some(items) = value.as_items() {
            if let Some(min) = self.min_items
                && items.len() < min
            {
                return Err(TypeError::TooFewItems {
                    name: self.name.clone(),
                    min,
                    got: items.len(),
                });
            }
            if let Some(max) = self.max_items
                && items.len() > max
            {
                return Err(TypeError::TooManyItems {
                    name: self.name.clone(),
                    max,
                    got: items.len(),
                });
            }
        }

        self.attr_type.validate(value)?;

        if self.codec == Codec::Json
            && let Value::String(s) = value
            && let Err(e) = serde_json::from_str::<serde_json::Value>(s)
        {
            return Err(TypeError::InvalidJson {
                name: self.name.clone(),
                message: e.to_string(),
            });
        }
        Ok(())
    }
}

/// Attribute schema of a nested block
#[derive(Debug, Clone, Default)]
pub struct BlockSchema {
    pub attributes: BTreeMap<String, AttributeSchema>,
}

impl BlockSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }
}

/// Resource schema
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    pub resource_type: String,
    /// Schema version; tracked state written with an older version is migrated
    pub version: u32,
    pub attributes: BTreeMap<String, AttributeSchema>,
    pub description: Option<String>,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            version: 0,
            attributes: BTreeMap::new(),
            description: None,
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.get(name)
    }

    /// Validate user-supplied attributes
    pub fn validate(&self, attributes: &Attributes) -> Result<(), Vec<TypeError>> {
        let mut errors = Vec::new();
        validate_attributes(&self.attributes, attributes, true, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Fill in schema defaults for absent optional attributes, recursing into
    /// every present block
    pub fn apply_defaults(&self, attributes: &mut Attributes) {
        apply_defaults(&self.attributes, attributes);
    }
}

fn validate_attributes(
    schemas: &BTreeMap<String, AttributeSchema>,
    attributes: &Attributes,
    top_level: bool,
    errors: &mut Vec<TypeError>,
) {
    for (name, schema) in schemas {
        if schema.mode == AttributeMode::Required
            && !attributes.contains_key(name)
            && schema.default.is_none()
        {
            errors.push(TypeError::MissingRequired { name: name.clone() });
        }
    }

    for (name, value) in attributes {
        let Some(schema) = schemas.get(name) else {
            errors.push(TypeError::UnknownAttribute { name: name.clone() });
            continue;
        };
        if top_level && schema.is_computed_only() {
            errors.push(TypeError::ComputedAttribute { name: name.clone() });
            continue;
        }
        if let Err(e) = schema.validate_value(value) {
            errors.push(TypeError::AttributeError {
                name: name.clone(),
                inner: Box::new(e),
            });
        }
    }
}

fn apply_defaults(schemas: &BTreeMap<String, AttributeSchema>, attributes: &mut Attributes) {
    for (name, schema) in schemas {
        if !attributes.contains_key(name)
            && let Some(default) = &schema.default
        {
            attributes.insert(name.clone(), default.clone());
        }

        let Some(block) = schema.attr_type.block_schema() else {
            continue;
        };
        match attributes.get_mut(name) {
            Some(Value::Block(inner)) => apply_defaults(&block.attributes, inner),
            Some(Value::List(items)) | Some(Value::Set(items)) => {
                for item in items {
                    if let Value::Block(inner) = item {
                        apply_defaults(&block.attributes, inner);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Helper functions for common types
pub mod types {
    use super::*;

    /// String with a length range
    pub fn string_len(min: usize, max: usize) -> AttributeType {
        AttributeType::Constrained {
            base: Box::new(AttributeType::String),
            constraint: Constraint::LenBetween(min, max),
        }
    }

    /// Integer within an inclusive range
    pub fn int_between(min: i64, max: i64) -> AttributeType {
        AttributeType::Constrained {
            base: Box::new(AttributeType::Int),
            constraint: Constraint::IntBetween(min, max),
        }
    }

    /// Integer with a lower bound
    pub fn int_at_least(min: i64) -> AttributeType {
        AttributeType::Constrained {
            base: Box::new(AttributeType::Int),
            constraint: Constraint::IntAtLeast(min),
        }
    }

    /// String matching a regular expression
    pub fn pattern(pattern: &'static str, description: &'static str) -> AttributeType {
        AttributeType::Constrained {
            base: Box::new(AttributeType::String),
            constraint: Constraint::Pattern {
                pattern,
                description,
            },
        }
    }

    /// String usable as one component of a `/`-separated reference
    pub fn key_part(min: usize, max: usize) -> AttributeType {
        AttributeType::Constrained {
            base: Box::new(string_len(min, max)),
            constraint: Constraint::Pattern {
                pattern: "[^/]*",
                description: "name (must not contain '/')",
            },
        }
    }

    /// Enum from a static list of values
    pub fn one_of(values: &[&str]) -> AttributeType {
        AttributeType::Enum(values.iter().map(|v| v.to_string()).collect())
    }

    /// ARN string (e.g., "arn:aws:iam::123456789012:role/x")
    pub fn arn() -> AttributeType {
        pattern(r"arn:[\w-]+:[\w-]+:[\w-]*:\d*:.+", "ARN")
    }

    /// 12-digit account id
    pub fn account_id() -> AttributeType {
        pattern(r"\d{12}", "account ID")
    }

    /// Key/value labels attached to a resource
    pub fn tags() -> AttributeType {
        AttributeType::Map(Box::new(AttributeType::String))
    }

    /// Block type from a block schema
    pub fn block(schema: BlockSchema) -> AttributeType {
        AttributeType::Block(Box::new(schema))
    }

    /// List of blocks
    pub fn block_list(schema: BlockSchema) -> AttributeType {
        AttributeType::List(Box::new(block(schema)))
    }

    /// Set of blocks
    pub fn block_set(schema: BlockSchema) -> AttributeType {
        AttributeType::Set(Box::new(block(schema)))
    }
}

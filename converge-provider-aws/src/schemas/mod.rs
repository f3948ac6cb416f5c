//! AWS resource kind definitions
//!
//! Every kind is described in the shape of its native service API (field
//! names, nesting, casing); the Cloud Control transport maps that shape onto
//! CloudFormation resource models.

pub mod appmesh;
pub mod lightsail;
pub mod transfer;
pub mod waf;

use converge_core::ResourceKind;
use converge_core::schema::{AttributeSchema, AttributeType};
use heck::{ToLowerCamelCase, ToPascalCase};

use crate::cloudcontrol::ModelMapping;

/// Attribute whose wire field is the lowerCamelCase form of its name
pub(crate) fn camel(name: &str, attr_type: AttributeType) -> AttributeSchema {
    AttributeSchema::new(name, attr_type).with_provider_name(name.to_lower_camel_case())
}

/// Attribute whose wire field is the PascalCase form of its name
pub(crate) fn pascal(name: &str, attr_type: AttributeType) -> AttributeSchema {
    AttributeSchema::new(name, attr_type).with_provider_name(name.to_pascal_case())
}

/// Set of plain strings
pub(crate) fn string_set() -> AttributeType {
    AttributeType::Set(Box::new(AttributeType::String))
}

/// Returns every resource kind this provider supports
pub fn all_kinds() -> Vec<ResourceKind> {
    vec![
        appmesh::virtual_node(),
        transfer::access(),
        waf::byte_match_set(),
        lightsail::key_pair(),
    ]
}

/// Look up a resource kind by name (e.g. "appmesh_virtual_node")
pub fn kind(name: &str) -> Option<ResourceKind> {
    all_kinds().into_iter().find(|k| k.name == name)
}

/// Cloud Control model mappings, keyed by remote type name
pub fn model_mappings() -> Vec<(&'static str, ModelMapping)> {
    vec![
        (appmesh::TYPE_NAME, appmesh::model_mapping()),
        (transfer::TYPE_NAME, transfer::model_mapping()),
        (waf::TYPE_NAME, waf::model_mapping()),
        (lightsail::TYPE_NAME, lightsail::model_mapping()),
    ]
}

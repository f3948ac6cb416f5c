//! WAF Classic byte match set resource definition
//!
//! Wire documents follow the WAF Classic API (`CreateByteMatchSet`,
//! `GetByteMatchSet`, `ListByteMatchSets`), which is PascalCase. The set is
//! addressed only by its assigned `ByteMatchSetId`.

use converge_core::ResourceKind;
use converge_core::identity::IdentityScheme;
use converge_core::schema::{BlockSchema, ResourceSchema, types};

use super::pascal;
use crate::cloudcontrol::{ModelMapping, WireCase};

pub const TYPE_NAME: &str = "AWS::WAF::ByteMatchSet";

const FIELD_TYPES: &[&str] = &[
    "URI",
    "QUERY_STRING",
    "HEADER",
    "METHOD",
    "BODY",
    "SINGLE_QUERY_ARG",
    "ALL_QUERY_ARGS",
];

const POSITIONAL_CONSTRAINTS: &[&str] = &[
    "EXACTLY",
    "STARTS_WITH",
    "ENDS_WITH",
    "CONTAINS",
    "CONTAINS_WORD",
];

const TEXT_TRANSFORMATIONS: &[&str] = &[
    "NONE",
    "COMPRESS_WHITE_SPACE",
    "HTML_ENTITY_DECODE",
    "LOWERCASE",
    "CMD_LINE",
    "URL_DECODE",
];

pub fn byte_match_set_schema() -> ResourceSchema {
    let field_to_match = BlockSchema::new()
        .attribute(pascal("data", types::string_len(1, 128)))
        .attribute(pascal("type", types::one_of(FIELD_TYPES)).required());

    let tuple = BlockSchema::new()
        .attribute(pascal("field_to_match", types::block(field_to_match)).required())
        .attribute(pascal("positional_constraint", types::one_of(POSITIONAL_CONSTRAINTS)).required())
        .attribute(pascal("target_string", types::string_len(1, 50)))
        .attribute(pascal("text_transformation", types::one_of(TEXT_TRANSFORMATIONS)).required());

    ResourceSchema::new("waf_byte_match_set")
        .with_description("A WAF Classic set of byte match conditions")
        .attribute(
            pascal("name", types::string_len(1, 128))
                .required()
                .create_only(),
        )
        .attribute(pascal("byte_match_tuples", types::block_set(tuple)))
}

pub fn byte_match_set() -> ResourceKind {
    ResourceKind::new(
        "waf_byte_match_set",
        TYPE_NAME,
        byte_match_set_schema(),
        IdentityScheme::Assigned {
            wire_field: "ByteMatchSetId",
            key_fields: Vec::new(),
        },
    )
}

pub fn model_mapping() -> ModelMapping {
    ModelMapping::new(TYPE_NAME, WireCase::Pascal)
        .alias("ByteMatchSetId", "Id")
        .identifier_at("ByteMatchSetId")
}

//! Transfer Family access resource definition
//!
//! An access grants a directory-service group (by its external id) access to
//! a Transfer server. Wire documents follow the Transfer API (`CreateAccess`,
//! `DescribeAccess`, `UpdateAccess`), which is PascalCase.

use converge_core::ResourceKind;
use converge_core::identity::{IdentityScheme, KeyField};
use converge_core::resource::Value;
use converge_core::schema::{AttributeType, BlockSchema, Codec, ResourceSchema, types};

use super::pascal;
use crate::cloudcontrol::{ModelMapping, WireCase};

pub const TYPE_NAME: &str = "AWS::Transfer::Access";

/// Every mutable attribute converges through one UpdateAccess call
const ACCESS_GROUP: &str = "access";

/// Server ids look like "s-0123456789abcdef0"
pub fn server_id() -> AttributeType {
    types::pattern(r"s-[0-9a-f]{17}", "Transfer server ID")
}

pub fn access_schema() -> ResourceSchema {
    let mapping = BlockSchema::new()
        .attribute(pascal("entry", types::string_len(0, 1024)).required())
        .attribute(pascal("target", types::string_len(0, 1024)).required());

    let posix_profile = BlockSchema::new()
        .attribute(pascal("gid", AttributeType::Int).required())
        .attribute(pascal("uid", AttributeType::Int).required())
        .attribute(pascal(
            "secondary_gids",
            AttributeType::Set(Box::new(AttributeType::Int)),
        ));

    ResourceSchema::new("transfer_access")
        .with_description("Access for a directory-service group to a Transfer server")
        .attribute(pascal("server_id", server_id()).required().create_only())
        .attribute(
            pascal("external_id", types::key_part(1, 256))
                .required()
                .create_only(),
        )
        .attribute(pascal("home_directory", types::string_len(0, 1024)).in_group(ACCESS_GROUP))
        .attribute(
            pascal("home_directory_mappings", types::block_list(mapping))
                .with_max_items(50)
                .in_group(ACCESS_GROUP),
        )
        .attribute(
            pascal("home_directory_type", types::one_of(&["PATH", "LOGICAL"]))
                .with_default(Value::from("PATH"))
                .in_group(ACCESS_GROUP),
        )
        .attribute(
            pascal("policy", AttributeType::String)
                .with_codec(Codec::Json)
                .in_group(ACCESS_GROUP),
        )
        .attribute(pascal("posix_profile", types::block(posix_profile)).in_group(ACCESS_GROUP))
        // Required by the API but never returned on read
        .attribute(
            pascal("role", types::arn())
                .write_only()
                .in_group(ACCESS_GROUP),
        )
}

pub fn access() -> ResourceKind {
    ResourceKind::new(
        "transfer_access",
        TYPE_NAME,
        access_schema(),
        IdentityScheme::Composite {
            fields: vec![
                KeyField::new("server_id", "ServerId"),
                KeyField::new("external_id", "ExternalId"),
            ],
        },
    )
}

pub fn model_mapping() -> ModelMapping {
    ModelMapping::new(TYPE_NAME, WireCase::Pascal)
}

//! Lightsail key pair resource definition
//!
//! Wire documents follow the Lightsail API (`CreateKeyPair`,
//! `ImportKeyPair`, `GetKeyPair`). The private key and fingerprints are only
//! returned by the create call, so they live in tracked state from then on.
//! Nothing about a key pair can be changed in place.

use chrono::Utc;
use converge_core::ResourceKind;
use converge_core::identity::{IdentityScheme, KeyField};
use converge_core::resource::{Attributes, Value};
use converge_core::schema::{AttributeType, ResourceSchema, types};
use log::debug;
use rand::Rng;

use super::camel;
use crate::cloudcontrol::{ModelMapping, WireCase};

pub const TYPE_NAME: &str = "AWS::Lightsail::KeyPair";

const DEFAULT_NAME_PREFIX: &str = "converge-";

pub fn key_pair_schema() -> ResourceSchema {
    ResourceSchema::new("lightsail_key_pair")
        .with_description("A Lightsail SSH key pair")
        .attribute(
            camel("name", types::key_part(1, 255))
                .optional_computed()
                .create_only()
                .with_provider_name("keyPairName"),
        )
        .attribute(
            camel("name_prefix", types::key_part(1, 100))
                .local()
                .create_only(),
        )
        .attribute(
            camel("pgp_key", AttributeType::String)
                .write_only()
                .create_only(),
        )
        .attribute(
            camel("public_key", AttributeType::String)
                .write_only()
                .create_only()
                .with_provider_name("publicKeyBase64"),
        )
        .attribute(camel("arn", AttributeType::String).computed())
        .attribute(camel("fingerprint", AttributeType::String).computed().write_only())
        .attribute(
            camel("private_key", AttributeType::String)
                .computed()
                .write_only()
                .with_provider_name("privateKeyBase64"),
        )
        .attribute(
            camel("encrypted_fingerprint", AttributeType::String)
                .computed()
                .write_only(),
        )
        .attribute(
            camel("encrypted_private_key", AttributeType::String)
                .computed()
                .write_only(),
        )
}

pub fn key_pair() -> ResourceKind {
    ResourceKind::new(
        "lightsail_key_pair",
        TYPE_NAME,
        key_pair_schema(),
        IdentityScheme::Composite {
            fields: vec![KeyField::new("name", "keyPairName")],
        },
    )
    .with_prepare_create(generate_name)
}

pub fn model_mapping() -> ModelMapping {
    ModelMapping::new(TYPE_NAME, WireCase::Camel)
}

/// Prefix + UTC timestamp + random hex suffix
pub fn unique_name(prefix: &str) -> String {
    let suffix: u32 = rand::thread_rng().r#gen();
    format!("{}{}{:08x}", prefix, Utc::now().format("%Y%m%d%H%M%S"), suffix)
}

fn generate_name(attributes: &mut Attributes) {
    if attributes.contains_key("name") {
        return;
    }
    let prefix = attributes
        .get("name_prefix")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_NAME_PREFIX);
    let name = unique_name(prefix);
    debug!("lightsail_key_pair: generated name {}", name);
    attributes.insert("name".to_string(), Value::String(name));
}

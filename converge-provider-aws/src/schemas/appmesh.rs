//! App Mesh virtual node resource definition
//!
//! Wire documents follow the App Mesh API (`CreateVirtualNode`,
//! `DescribeVirtualNode`):
//! https://docs.aws.amazon.com/app-mesh/latest/APIReference/API_VirtualNodeData.html

use converge_core::identity::{IdentityScheme, KeyField};
use converge_core::kind::StateMigration;
use converge_core::resource::{Attributes, Value};
use converge_core::schema::{AttributeType, BlockSchema, Codec, ResourceSchema, types};
use converge_core::status::StatusRule;
use converge_core::ResourceKind;

use super::{camel, string_set};
use crate::cloudcontrol::{ModelMapping, WireCase};

pub const TYPE_NAME: &str = "AWS::AppMesh::VirtualNode";

const PROTOCOLS: &[&str] = &["http", "tcp", "http2", "grpc"];

/// `{unit, value}` duration used by timeouts and outlier detection
fn duration() -> AttributeType {
    types::block(
        BlockSchema::new()
            .attribute(camel("unit", types::one_of(&["ms", "s"])).required())
            .attribute(camel("value", AttributeType::Int).required()),
    )
}

fn name_255() -> AttributeType {
    types::string_len(1, 255)
}

fn file_chain() -> AttributeType {
    types::block(BlockSchema::new().attribute(camel("certificate_chain", name_255()).required()))
}

fn sds_secret() -> AttributeType {
    types::block(BlockSchema::new().attribute(camel("secret_name", name_255()).required()))
}

fn subject_alternative_names() -> AttributeType {
    let exact = BlockSchema::new().attribute(camel("exact", string_set()).required().with_min_items(1));
    types::block(BlockSchema::new().attribute(camel("match", types::block(exact)).required()))
}

/// TLS client policy shared by backends and backend defaults
fn client_policy() -> AttributeType {
    let certificate = BlockSchema::new()
        .attribute(camel(
            "file",
            types::block(
                BlockSchema::new()
                    .attribute(camel("certificate_chain", name_255()).required())
                    .attribute(camel("private_key", name_255()).required()),
            ),
        ))
        .attribute(camel("sds", sds_secret()));

    let trust = BlockSchema::new()
        .attribute(camel(
            "acm",
            types::block(
                BlockSchema::new()
                    .attribute(
                        camel("certificate_authority_arns", string_set())
                            .required()
                            .with_min_items(1),
                    ),
            ),
        ))
        .attribute(camel("file", file_chain()))
        .attribute(camel("sds", sds_secret()));

    let validation = BlockSchema::new()
        .attribute(camel("subject_alternative_names", subject_alternative_names()))
        .attribute(camel("trust", types::block(trust)).required());

    let tls = BlockSchema::new()
        .attribute(camel("certificate", types::block(certificate)))
        .attribute(camel("enforce", AttributeType::Bool).with_default(Value::Bool(true)))
        .attribute(camel("ports", AttributeType::Set(Box::new(AttributeType::Int))))
        .attribute(camel("validation", types::block(validation)).required());

    types::block(BlockSchema::new().attribute(camel("tls", types::block(tls))))
}

fn connection_pool() -> AttributeType {
    let at_least_one = || types::int_at_least(1);
    types::block(
        BlockSchema::new()
            .attribute(camel(
                "grpc",
                types::block(
                    BlockSchema::new().attribute(camel("max_requests", at_least_one()).required()),
                ),
            ))
            .attribute(camel(
                "http",
                types::block(
                    BlockSchema::new()
                        .attribute(camel("max_connections", at_least_one()).required())
                        .attribute(camel("max_pending_requests", at_least_one())),
                ),
            ))
            .attribute(camel(
                "http2",
                types::block(
                    BlockSchema::new().attribute(camel("max_requests", at_least_one()).required()),
                ),
            ))
            .attribute(camel(
                "tcp",
                types::block(
                    BlockSchema::new()
                        .attribute(camel("max_connections", at_least_one()).required()),
                ),
            )),
    )
}

fn health_check() -> AttributeType {
    types::block(
        BlockSchema::new()
            .attribute(camel("healthy_threshold", types::int_between(2, 10)).required())
            .attribute(camel("interval_millis", types::int_between(5000, 300000)).required())
            .attribute(camel("path", AttributeType::String))
            .attribute(camel("port", types::int_between(1, 65535)).optional_computed())
            .attribute(camel("protocol", types::one_of(PROTOCOLS)).required())
            .attribute(camel("timeout_millis", types::int_between(2000, 60000)).required())
            .attribute(camel("unhealthy_threshold", types::int_between(2, 10)).required()),
    )
}

fn outlier_detection() -> AttributeType {
    types::block(
        BlockSchema::new()
            .attribute(camel("base_ejection_duration", duration()).required())
            .attribute(camel("interval", duration()).required())
            .attribute(camel("max_ejection_percent", types::int_between(0, 100)).required())
            .attribute(camel("max_server_errors", types::int_at_least(1)).required()),
    )
}

fn listener_timeout() -> AttributeType {
    let request_timeout = || {
        types::block(
            BlockSchema::new()
                .attribute(camel("idle", duration()))
                .attribute(camel("per_request", duration())),
        )
    };
    types::block(
        BlockSchema::new()
            .attribute(camel("grpc", request_timeout()))
            .attribute(camel("http", request_timeout()))
            .attribute(camel("http2", request_timeout()))
            .attribute(camel(
                "tcp",
                types::block(BlockSchema::new().attribute(camel("idle", duration()))),
            )),
    )
}

fn listener_tls() -> AttributeType {
    let certificate = BlockSchema::new()
        .attribute(camel(
            "acm",
            types::block(BlockSchema::new().attribute(camel("certificate_arn", types::arn()).required())),
        ))
        .attribute(camel(
            "file",
            types::block(
                BlockSchema::new()
                    .attribute(camel("certificate_chain", name_255()).required())
                    .attribute(camel("private_key", name_255()).required()),
            ),
        ))
        .attribute(camel("sds", sds_secret()));

    let trust = BlockSchema::new()
        .attribute(camel("file", file_chain()))
        .attribute(camel("sds", sds_secret()));

    let validation = BlockSchema::new()
        .attribute(camel("subject_alternative_names", subject_alternative_names()))
        .attribute(camel("trust", types::block(trust)).required());

    types::block(
        BlockSchema::new()
            .attribute(camel("certificate", types::block(certificate)).required())
            .attribute(camel("mode", types::one_of(&["STRICT", "PERMISSIVE", "DISABLED"])).required())
            .attribute(camel("validation", types::block(validation))),
    )
}

fn listener() -> BlockSchema {
    let port_mapping = BlockSchema::new()
        .attribute(camel("port", types::int_between(1, 65535)).required())
        .attribute(camel("protocol", types::one_of(PROTOCOLS)).required());

    BlockSchema::new()
        .attribute(camel("connection_pool", connection_pool()))
        .attribute(camel("health_check", health_check()))
        .attribute(camel("outlier_detection", outlier_detection()))
        .attribute(camel("port_mapping", types::block(port_mapping)).required())
        .attribute(camel("timeout", listener_timeout()))
        .attribute(camel("tls", listener_tls()))
}

fn service_discovery() -> AttributeType {
    let cloud_map = BlockSchema::new()
        .attribute(camel("attributes", types::tags()))
        .attribute(camel("namespace_name", types::string_len(1, 1024)).required())
        .attribute(camel("service_name", types::string_len(1, 1024)).required());
    let dns = BlockSchema::new().attribute(camel("hostname", AttributeType::String).required());

    types::block(
        BlockSchema::new()
            .attribute(camel("aws_cloud_map", types::block(cloud_map)))
            .attribute(camel("dns", types::block(dns))),
    )
}

fn spec() -> AttributeType {
    let virtual_service = BlockSchema::new()
        .attribute(camel("client_policy", client_policy()))
        .attribute(camel("virtual_service_name", name_255()).required());
    let backend = BlockSchema::new()
        .attribute(camel("virtual_service", types::block(virtual_service)).required());

    let access_log = BlockSchema::new().attribute(camel(
        "file",
        types::block(BlockSchema::new().attribute(camel("path", name_255()).required())),
    ));
    let logging = BlockSchema::new().attribute(camel("access_log", types::block(access_log)));

    types::block(
        BlockSchema::new()
            .attribute(
                camel("backend", types::block_set(backend))
                    .with_provider_name("backends")
                    .with_max_items(50),
            )
            .attribute(camel(
                "backend_defaults",
                types::block(BlockSchema::new().attribute(camel("client_policy", client_policy()))),
            ))
            .attribute(camel("listener", types::block_list(listener())).with_provider_name("listeners"))
            .attribute(camel("logging", types::block(logging)))
            .attribute(camel("service_discovery", service_discovery())),
    )
}

pub fn virtual_node_schema() -> ResourceSchema {
    ResourceSchema::new("appmesh_virtual_node")
        .with_description("An App Mesh virtual node")
        .with_version(1)
        .attribute(
            camel("name", types::key_part(1, 255))
                .required()
                .create_only()
                .with_provider_name("virtualNodeName"),
        )
        .attribute(camel("mesh_name", types::key_part(1, 255)).required().create_only())
        .attribute(
            camel("mesh_owner", types::account_id())
                .optional_computed()
                .create_only(),
        )
        .attribute(camel("spec", spec()).required())
        .attribute(
            camel("arn", AttributeType::String)
                .computed()
                .with_provider_name("metadata.arn"),
        )
        .attribute(
            camel("created_date", AttributeType::String)
                .computed()
                .with_codec(Codec::Timestamp)
                .with_provider_name("metadata.createdAt"),
        )
        .attribute(
            camel("last_updated_date", AttributeType::String)
                .computed()
                .with_codec(Codec::Timestamp)
                .with_provider_name("metadata.lastUpdatedAt"),
        )
        .attribute(
            camel("resource_owner", AttributeType::String)
                .computed()
                .with_provider_name("metadata.resourceOwner"),
        )
        .attribute(
            camel("status", AttributeType::String)
                .computed()
                .with_provider_name("status.status"),
        )
        .attribute(camel("tags", types::tags()))
        .attribute(camel("tags_all", types::tags()).computed())
}

pub fn virtual_node() -> ResourceKind {
    ResourceKind::new(
        "appmesh_virtual_node",
        TYPE_NAME,
        virtual_node_schema(),
        IdentityScheme::Assigned {
            wire_field: "metadata.uid",
            key_fields: vec![
                KeyField::new("mesh_name", "meshName"),
                KeyField::new("name", "virtualNodeName"),
            ],
        },
    )
    .with_status(StatusRule::new("status.status", &["ACTIVE"], &["DELETED"]))
    .with_tags()
    .with_migration(StateMigration {
        from: 0,
        migrate: upgrade_backends,
    })
}

pub fn model_mapping() -> ModelMapping {
    ModelMapping::new(TYPE_NAME, WireCase::Camel)
        .alias("metadata.uid", "Uid")
        .alias("metadata.arn", "Arn")
        .alias("metadata.resourceOwner", "ResourceOwner")
        .identifier_at("metadata.uid")
        .opaque("spec.serviceDiscovery.awsCloudMap.attributes")
}

/// Version 0 tracked backends as a set of virtual service names
fn upgrade_backends(mut attributes: Attributes) -> Result<Attributes, String> {
    if let Some(Value::Block(spec)) = attributes.get_mut("spec") {
        upgrade_spec_backends(spec)?;
    }
    Ok(attributes)
}

fn upgrade_spec_backends(spec: &mut Attributes) -> Result<(), String> {
    let Some(old) = spec.remove("backends") else {
        return Ok(());
    };
    let names = old
        .as_items()
        .ok_or_else(|| format!("spec.backends: expected a set, got {}", old.type_name()))?;

    let mut backend = Vec::new();
    for name in names {
        let Value::String(name) = name else {
            return Err(format!("spec.backends: expected strings, got {}", name.type_name()));
        };
        backend.push(Value::block([(
            "virtual_service",
            Value::block([("virtual_service_name", Value::String(name.clone()))]),
        )]));
    }
    if !backend.is_empty() {
        spec.insert("backend".to_string(), Value::Set(backend));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use converge_core::memory::{Call, MemoryApi, TypeBehavior};
    use converge_core::schema::TypeError;
    use converge_core::{Context, Phase, ReadOutcome, ReconcileError, Reconciler, ReconcilerConfig, TrackedResource};
    use converge_core::identity::RemoteKey;
    use converge_core::resource::Identity;
    use serde_json::json;

    fn behavior() -> TypeBehavior {
        TypeBehavior::new()
            .assigned_id("metadata.uid")
            .arn("metadata.arn")
            .created_at("metadata.createdAt")
            .last_updated_at("metadata.lastUpdatedAt")
            .status("status.status", "ACTIVE")
    }

    fn setup() -> (Arc<MemoryApi>, Context) {
        let api = Arc::new(MemoryApi::new().with_type(TYPE_NAME, behavior()));
        let config = ReconcilerConfig {
            propagation_timeout_secs: 1,
            initial_delay_ms: 5,
            max_delay_ms: 20,
            jitter: 0.0,
            ..Default::default()
        };
        let ctx = Context::new(api.clone()).with_config(config);
        (api, ctx)
    }

    fn listener(port: i64) -> Value {
        Value::block([(
            "port_mapping",
            Value::block([("port", Value::Int(port)), ("protocol", Value::from("http"))]),
        )])
    }

    fn backend(name: &str) -> Value {
        Value::block([(
            "virtual_service",
            Value::block([("virtual_service_name", Value::from(name))]),
        )])
    }

    fn desired() -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("name".to_string(), Value::from("serviceBv1"));
        attrs.insert("mesh_name".to_string(), Value::from("simpleapp"));
        attrs.insert(
            "spec".to_string(),
            Value::block([
                ("listener", Value::List(vec![listener(8080)])),
                ("backend", Value::Set(vec![backend("servicea.simpleapp.local")])),
                (
                    "service_discovery",
                    Value::block([(
                        "dns",
                        Value::block([("hostname", Value::from("serviceb.simpleapp.local"))]),
                    )]),
                ),
            ]),
        );
        attrs
    }

    fn key() -> RemoteKey {
        RemoteKey::new(vec![
            ("meshName".to_string(), "simpleapp".to_string()),
            ("virtualNodeName".to_string(), "serviceBv1".to_string()),
        ])
    }

    #[test]
    fn valid_minimal_spec() {
        let schema = virtual_node_schema();
        assert!(schema.validate(&desired()).is_ok());
    }

    #[test]
    fn names_cannot_contain_separator() {
        let mut attrs = desired();
        attrs.insert("mesh_name".to_string(), Value::from("simple/app"));
        let errors = virtual_node_schema().validate(&attrs).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().starts_with("mesh_name: "));
    }

    #[test]
    fn empty_trusted_authorities_are_rejected() {
        let policy = |arns: Vec<Value>| {
            Value::block([(
                "tls",
                Value::block([(
                    "validation",
                    Value::block([(
                        "trust",
                        Value::block([(
                            "acm",
                            Value::block([("certificate_authority_arns", Value::Set(arns))]),
                        )]),
                    )]),
                )]),
            )])
        };
        let with_policy = |policy: Value| {
            let mut attrs = desired();
            attrs.insert(
                "spec".to_string(),
                Value::block([
                    ("listener", Value::List(vec![listener(8080)])),
                    ("backend_defaults", Value::block([("client_policy", policy)])),
                ]),
            );
            attrs
        };

        let errors = virtual_node_schema()
            .validate(&with_policy(policy(vec![])))
            .unwrap_err();
        assert!(errors[0].to_string().contains("at least 1 items"));

        let arn = Value::from("arn:aws:acm-pca:us-east-1:123456789012:certificate-authority/ca");
        assert!(virtual_node_schema().validate(&with_policy(policy(vec![arn]))).is_ok());
    }

    #[test]
    fn cloud_map_attribute_keys_survive_the_model_mapping() {
        let wire = json!({
            "meshName": "simpleapp",
            "spec": {"serviceDiscovery": {"awsCloudMap": {
                "namespaceName": "simpleapp.local",
                "serviceName": "serviceb",
                "attributes": {"ECS_TASK": "x", "stage_name": "prod"}
            }}}
        });
        let wire = wire.as_object().cloned().unwrap();
        let mapping = model_mapping();

        let model = mapping.to_model(&wire);
        let cloud_map = &model["Spec"]["ServiceDiscovery"]["AwsCloudMap"];
        assert_eq!(cloud_map["NamespaceName"], json!("simpleapp.local"));
        assert_eq!(cloud_map["Attributes"], json!({"ECS_TASK": "x", "stage_name": "prod"}));

        assert_eq!(mapping.from_model(&model), wire);
    }

    #[test]
    fn listener_port_out_of_range() {
        let mut attrs = desired();
        attrs.insert(
            "spec".to_string(),
            Value::block([("listener", Value::List(vec![listener(70000)]))]),
        );
        let errors = virtual_node_schema().validate(&attrs).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("between 1 and 65535"));
    }

    #[test]
    fn health_check_bounds_are_enforced() {
        let mut attrs = desired();
        let check = Value::block([
            ("healthy_threshold", Value::Int(1)),
            ("interval_millis", Value::Int(5000)),
            ("protocol", Value::from("http")),
            ("timeout_millis", Value::Int(2000)),
            ("unhealthy_threshold", Value::Int(2)),
        ]);
        attrs.insert(
            "spec".to_string(),
            Value::block([(
                "listener",
                Value::List(vec![Value::block([
                    (
                        "port_mapping",
                        Value::block([("port", Value::Int(8080)), ("protocol", Value::from("http"))]),
                    ),
                    ("health_check", check),
                ])]),
            )]),
        );
        let errors = virtual_node_schema().validate(&attrs).unwrap_err();
        assert!(errors[0].to_string().contains("healthy_threshold"));
    }

    #[test]
    fn mesh_owner_must_be_an_account_id() {
        let mut attrs = desired();
        attrs.insert("mesh_owner".to_string(), Value::from("owner"));
        assert!(virtual_node_schema().validate(&attrs).is_err());

        attrs.insert("mesh_owner".to_string(), Value::from("123456789012"));
        assert!(virtual_node_schema().validate(&attrs).is_ok());
    }

    #[test]
    fn spec_is_required() {
        let mut attrs = desired();
        attrs.remove("spec");
        let errors = virtual_node_schema().validate(&attrs).unwrap_err();
        assert!(matches!(&errors[0], TypeError::MissingRequired { name } if name == "spec"));
    }

    #[tokio::test]
    async fn create_uses_native_field_names() {
        let (api, ctx) = setup();
        let reconciler = Reconciler::new(virtual_node());

        let tracked = reconciler.create(&ctx, &desired()).await.unwrap();

        let object = api.object(TYPE_NAME, &key()).unwrap();
        assert_eq!(object["meshName"], json!("simpleapp"));
        assert_eq!(object["virtualNodeName"], json!("serviceBv1"));
        assert_eq!(
            object["spec"]["listeners"][0]["portMapping"],
            json!({"port": 8080, "protocol": "http"})
        );
        assert_eq!(
            object["spec"]["backends"][0]["virtualService"]["virtualServiceName"],
            json!("servicea.simpleapp.local")
        );

        // Identity is the assigned uid, not the natural key
        assert_eq!(object["metadata"]["uid"], json!(tracked.identity.as_str()));
        assert_eq!(tracked.get("status"), Some(&Value::from("ACTIVE")));
        assert!(tracked.get("arn").and_then(Value::as_str).is_some());
        assert!(tracked.get("created_date").is_some());
        assert_eq!(tracked.get("spec"), desired().get("spec"));
        assert_eq!(tracked.schema_version, 1);
    }

    #[tokio::test]
    async fn client_policy_enforce_defaults_to_true() {
        let (api, ctx) = setup();
        let reconciler = Reconciler::new(virtual_node());

        let policy = Value::block([(
            "tls",
            Value::block([
                ("ports", Value::Set(vec![Value::Int(8443)])),
                (
                    "validation",
                    Value::block([(
                        "trust",
                        Value::block([(
                            "file",
                            Value::block([("certificate_chain", Value::from("/cert_chain.pem"))]),
                        )]),
                    )]),
                ),
            ]),
        )]);
        let mut attrs = desired();
        attrs.insert(
            "spec".to_string(),
            Value::block([
                ("listener", Value::List(vec![listener(8080)])),
                ("backend_defaults", Value::block([("client_policy", policy)])),
            ]),
        );

        reconciler.create(&ctx, &attrs).await.unwrap();
        let object = api.object(TYPE_NAME, &key()).unwrap();
        assert_eq!(
            object["spec"]["backendDefaults"]["clientPolicy"]["tls"]["enforce"],
            json!(true)
        );
    }

    #[tokio::test]
    async fn spec_update_is_one_call_and_tags_go_separately() {
        let (api, ctx) = setup();
        let reconciler = Reconciler::new(virtual_node());
        let old = desired();
        let tracked = reconciler.create(&ctx, &old).await.unwrap();
        api.clear_calls();

        let mut new = old.clone();
        new.insert(
            "spec".to_string(),
            Value::block([
                ("listener", Value::List(vec![listener(8081)])),
                (
                    "backend",
                    Value::Set(vec![
                        backend("servicea.simpleapp.local"),
                        backend("servicec.simpleapp.local"),
                    ]),
                ),
            ]),
        );
        new.insert("tags".to_string(), Value::string_map([("Name", "serviceBv1")]));

        let refreshed = reconciler
            .update(&ctx, &tracked, &old, &new)
            .await
            .unwrap()
            .into_present()
            .unwrap();

        let calls = api.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(&calls[0], Call::Update { group, body, .. }
            if group == "spec" && body.keys().collect::<Vec<_>>() == vec!["spec"]));
        assert!(matches!(&calls[1], Call::UpdateTags { diff, .. } if diff.upsert.contains_key("Name")));

        assert_eq!(refreshed.get("spec"), new.get("spec"));
        assert_eq!(refreshed.get("tags"), new.get("tags"));
        assert_eq!(refreshed.identity, tracked.identity);
    }

    #[tokio::test]
    async fn renaming_requires_replacement() {
        let (_api, ctx) = setup();
        let reconciler = Reconciler::new(virtual_node());
        let old = desired();
        let tracked = reconciler.create(&ctx, &old).await.unwrap();

        let mut new = old.clone();
        new.insert("name".to_string(), Value::from("serviceBv2"));
        let err = reconciler.update(&ctx, &tracked, &old, &new).await.unwrap_err();
        assert!(matches!(err, ReconcileError::ReplaceRequired { attributes, .. } if attributes == vec!["name".to_string()]));
    }

    #[tokio::test]
    async fn deleted_status_drops_the_node() {
        let (api, ctx) = setup();
        let reconciler = Reconciler::new(virtual_node());
        let tracked = reconciler.create(&ctx, &desired()).await.unwrap();

        api.set_field(TYPE_NAME, &key(), "status.status", json!("DELETED"));
        let outcome = reconciler.read(&ctx, &tracked, Phase::Existing).await.unwrap();
        assert_eq!(outcome, ReadOutcome::Absent);
    }

    #[tokio::test]
    async fn inactive_node_is_still_present() {
        let (api, ctx) = setup();
        let reconciler = Reconciler::new(virtual_node());
        let tracked = reconciler.create(&ctx, &desired()).await.unwrap();

        api.set_field(TYPE_NAME, &key(), "status.status", json!("INACTIVE"));
        let outcome = reconciler.read(&ctx, &tracked, Phase::Existing).await.unwrap();
        let present = outcome.into_present().unwrap();
        assert_eq!(present.get("status"), Some(&Value::from("INACTIVE")));
    }

    #[tokio::test]
    async fn import_by_mesh_and_node_name() {
        let (_api, ctx) = setup();
        let reconciler = Reconciler::new(virtual_node());
        let created = reconciler.create(&ctx, &desired()).await.unwrap();

        let imported = reconciler.import(&ctx, "simpleapp/serviceBv1").await.unwrap();
        assert_eq!(imported.identity, created.identity);
        assert_eq!(imported.get("mesh_name"), Some(&Value::from("simpleapp")));
        assert_eq!(imported.get("name"), Some(&Value::from("serviceBv1")));
        assert_eq!(imported.get("spec"), created.get("spec"));

        let err = reconciler.import(&ctx, "simpleapp").await.unwrap_err();
        assert!(err.to_string().contains("mesh_name/name"));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (api, ctx) = setup();
        let reconciler = Reconciler::new(virtual_node());
        let tracked = reconciler.create(&ctx, &desired()).await.unwrap();

        reconciler.delete(&ctx, &tracked).await.unwrap();
        assert!(api.object(TYPE_NAME, &key()).is_none());
        reconciler.delete(&ctx, &tracked).await.unwrap();
    }

    #[test]
    fn version_zero_backends_are_migrated() {
        let mut attrs = desired();
        attrs.insert(
            "spec".to_string(),
            Value::block([
                ("listener", Value::List(vec![listener(8080)])),
                (
                    "backends",
                    Value::Set(vec![Value::from("servicea.simpleapp.local")]),
                ),
            ]),
        );
        let tracked = TrackedResource::new("appmesh_virtual_node", Identity::new("uid-1"), attrs);

        let upgraded = Reconciler::new(virtual_node()).upgrade(tracked).unwrap();
        assert_eq!(upgraded.schema_version, 1);
        let spec = upgraded.get("spec").and_then(Value::as_block).unwrap();
        assert!(!spec.contains_key("backends"));
        assert_eq!(
            spec.get("backend"),
            Some(&Value::Set(vec![backend("servicea.simpleapp.local")]))
        );
    }

    #[test]
    fn malformed_version_zero_backends_fail_migration() {
        let mut attrs = Attributes::new();
        attrs.insert(
            "spec".to_string(),
            Value::block([("backends", Value::from("servicea"))]),
        );
        let tracked = TrackedResource::new("appmesh_virtual_node", Identity::new("uid-1"), attrs);
        let err = Reconciler::new(virtual_node()).upgrade(tracked).unwrap_err();
        assert!(matches!(err, ReconcileError::Migration { from: 0, .. }));
    }
}

//! AWS Cloud Control transport
//!
//! Implements `RemoteApi` on top of the Cloud Control API. Resource kinds
//! describe their wire documents in the shape of the native service API
//! (camelCase for App Mesh and Lightsail, PascalCase for Transfer and WAF);
//! Cloud Control speaks CloudFormation resource models, which are always
//! PascalCase and keep a few fields under different names. A
//! [`ModelMapping`] per type bridges the two.

use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_cloudcontrol::Client as CloudControlClient;
use aws_sdk_cloudcontrol::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cloudcontrol::types::{HandlerErrorCode, OperationStatus, ProgressEvent};
use converge_core::identity::RemoteKey;
use converge_core::provider::{ApiError, ApiResult, CreateRequest, Page, RemoteApi};
use converge_core::tags::{TagDiff, Tags};
use converge_core::wire::{WireObject, get_path, set_path};
use heck::{ToLowerCamelCase, ToPascalCase};
use log::debug;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

/// Separator of compound Cloud Control identifiers
const IDENTIFIER_SEPARATOR: &str = "|";

/// Resource model property holding tags
const TAGS_PROPERTY: &str = "Tags";

/// Connection settings for the Cloud Control client
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    /// Region to operate in; falls back to the SDK's default chain
    pub region: Option<String>,
    /// Custom endpoint (e.g. a local emulator)
    pub endpoint_url: Option<String>,
    /// Status polls per mutating request before giving up (default: 120)
    pub max_status_polls: Option<u32>,
    /// Delay between status polls in seconds (default: 5)
    pub status_poll_secs: Option<u64>,
}

/// Letter case of a kind's wire document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireCase {
    Camel,
    Pascal,
}

/// How one kind's wire documents map onto a Cloud Control resource model
#[derive(Debug, Clone)]
pub struct ModelMapping {
    /// CloudFormation type name used by Cloud Control
    pub cloud_type: String,
    pub wire_case: WireCase,
    /// `(wire path, model property)` pairs that do not follow the case rule
    pub aliases: Vec<(&'static str, &'static str)>,
    /// Wire path that receives the Cloud Control identifier after create
    pub identifier_path: Option<&'static str>,
    /// Wire paths holding user-keyed maps; keys below them keep their case
    pub opaque_paths: Vec<&'static str>,
}

impl ModelMapping {
    pub fn new(cloud_type: impl Into<String>, wire_case: WireCase) -> Self {
        Self {
            cloud_type: cloud_type.into(),
            wire_case,
            aliases: Vec::new(),
            identifier_path: None,
            opaque_paths: Vec::new(),
        }
    }

    pub fn alias(mut self, wire_path: &'static str, property: &'static str) -> Self {
        self.aliases.push((wire_path, property));
        self
    }

    pub fn identifier_at(mut self, wire_path: &'static str) -> Self {
        self.identifier_path = Some(wire_path);
        self
    }

    pub fn opaque(mut self, wire_path: &'static str) -> Self {
        self.opaque_paths.push(wire_path);
        self
    }

    fn passthrough(type_name: &str) -> Self {
        Self::new(type_name, WireCase::Pascal)
    }

    /// Wire document -> resource model
    pub fn to_model(&self, wire: &WireObject) -> WireObject {
        let mut wire = wire.clone();
        let mut aliased = Vec::new();
        for (wire_path, property) in &self.aliases {
            if let Some(value) = take_path(&mut wire, wire_path) {
                aliased.push((*property, value));
            }
        }

        let mut model = self.convert_object(wire, "", &|k: &str| k.to_pascal_case(), false);
        for (property, value) in aliased {
            model.insert(property.to_string(), value);
        }
        model
    }

    /// Resource model -> wire document
    pub fn from_model(&self, model: &WireObject) -> WireObject {
        let mut model = model.clone();
        model.remove(TAGS_PROPERTY);
        let mut aliased = Vec::new();
        for (wire_path, property) in &self.aliases {
            if let Some(value) = model.remove(*property) {
                aliased.push((*wire_path, value));
            }
        }

        let mut wire = match self.wire_case {
            WireCase::Pascal => model,
            WireCase::Camel => self.convert_object(model, "", &|k: &str| k.to_lower_camel_case(), true),
        };
        for (wire_path, value) in aliased {
            set_path(&mut wire, wire_path, value);
        }
        wire
    }

    /// Rename keys recursively, leaving values under opaque paths untouched
    ///
    /// `parent` is the wire path of `object`; when converting towards the
    /// wire, the renamed keys are the wire spelling.
    fn convert_object(
        &self,
        object: WireObject,
        parent: &str,
        rename: &dyn Fn(&str) -> String,
        to_wire: bool,
    ) -> WireObject {
        object
            .into_iter()
            .map(|(key, value)| {
                let renamed = rename(&key);
                let wire_key = if to_wire { &renamed } else { &key };
                let path = if parent.is_empty() {
                    wire_key.clone()
                } else {
                    format!("{}.{}", parent, wire_key)
                };
                let value = if self.opaque_paths.iter().any(|opaque| *opaque == path) {
                    value
                } else {
                    self.convert_value(value, &path, rename, to_wire)
                };
                (renamed, value)
            })
            .collect()
    }

    fn convert_value(
        &self,
        value: JsonValue,
        path: &str,
        rename: &dyn Fn(&str) -> String,
        to_wire: bool,
    ) -> JsonValue {
        match value {
            JsonValue::Object(object) => {
                JsonValue::Object(self.convert_object(object, path, rename, to_wire))
            }
            JsonValue::Array(items) => JsonValue::Array(
                items
                    .into_iter()
                    .map(|item| self.convert_value(item, path, rename, to_wire))
                    .collect(),
            ),
            other => other,
        }
    }
}

/// Remove the value at a dotted path, dropping parents left empty
fn take_path(object: &mut WireObject, path: &str) -> Option<JsonValue> {
    match path.split_once('.') {
        None => object.remove(path),
        Some((head, rest)) => {
            let inner = object.get_mut(head)?.as_object_mut()?;
            let taken = take_path(inner, rest);
            if inner.is_empty() {
                object.remove(head);
            }
            taken
        }
    }
}

/// Tags as `[{"Key": .., "Value": ..}]` model entries
fn build_tags(tags: &Tags) -> JsonValue {
    JsonValue::Array(
        tags.iter()
            .map(|(key, value)| json!({"Key": key, "Value": value}))
            .collect(),
    )
}

/// Parse tags from CloudFormation format to map
fn parse_tags(model: &WireObject) -> Tags {
    let mut tags = Tags::new();
    if let Some(JsonValue::Array(entries)) = model.get(TAGS_PROPERTY) {
        for tag in entries {
            if let (Some(key), Some(value)) = (
                tag.get("Key").and_then(|v| v.as_str()),
                tag.get("Value").and_then(|v| v.as_str()),
            ) {
                tags.insert(key.to_string(), value.to_string());
            }
        }
    }
    tags
}

/// JSON Patch operations for an update body; `null` clears the property
fn patch_operations(model: &WireObject) -> Vec<JsonValue> {
    model
        .iter()
        .map(|(property, value)| {
            if value.is_null() {
                json!({"op": "remove", "path": format!("/{}", property)})
            } else {
                json!({"op": "add", "path": format!("/{}", property), "value": value})
            }
        })
        .collect()
}

/// Classify an SDK error by its service error code
fn classify<E, R>(err: SdkError<E, R>) -> ApiError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: Debug,
{
    let code = err.code().map(str::to_string);
    let message = DisplayErrorContext(&err).to_string();
    ApiError::classify(code.as_deref(), message)
}

/// Outcome of a polled operation, or `None` while it is still running
fn operation_outcome(progress: Option<&ProgressEvent>) -> Option<ApiResult<String>> {
    let progress = progress?;
    match progress.operation_status() {
        Some(OperationStatus::Success) => Some(Ok(progress.identifier().unwrap_or("").to_string())),
        Some(OperationStatus::Failed) => Some(Err(classify_progress(progress))),
        Some(OperationStatus::CancelComplete) => Some(Err(ApiError::rejected(
            "CancelComplete",
            "Operation was cancelled",
        ))),
        _ => None,
    }
}

/// Classify a failed progress event by its handler error code
fn classify_progress(progress: &ProgressEvent) -> ApiError {
    let message = progress
        .status_message()
        .unwrap_or("Unknown error")
        .to_string();
    match progress.error_code() {
        Some(HandlerErrorCode::NotFound) => ApiError::NotFound(message),
        Some(HandlerErrorCode::Throttling) => ApiError::Throttled(message),
        Some(HandlerErrorCode::NetworkFailure) | Some(HandlerErrorCode::ServiceTimeout) => {
            ApiError::Transport(message)
        }
        Some(code) => ApiError::rejected(code.as_str(), message),
        None => ApiError::rejected("OperationFailed", message),
    }
}

/// `RemoteApi` over AWS Cloud Control
pub struct CloudControlApi {
    client: CloudControlClient,
    mappings: HashMap<String, ModelMapping>,
    max_status_polls: u32,
    status_poll_delay: Duration,
}

impl CloudControlApi {
    /// Load credentials and region through the SDK's default chain
    pub async fn new(config: &AwsConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(url) = &config.endpoint_url {
            loader = loader.endpoint_url(url);
        }
        let sdk_config = loader.load().await;

        Self {
            client: CloudControlClient::new(&sdk_config),
            mappings: HashMap::new(),
            max_status_polls: config.max_status_polls.unwrap_or(120),
            status_poll_delay: Duration::from_secs(config.status_poll_secs.unwrap_or(5)),
        }
    }

    /// Register how a kind's remote type maps onto its resource model
    pub fn with_mapping(mut self, type_name: &str, mapping: ModelMapping) -> Self {
        self.mappings.insert(type_name.to_string(), mapping);
        self
    }

    fn mapping(&self, type_name: &str) -> ModelMapping {
        self.mappings
            .get(type_name)
            .cloned()
            .unwrap_or_else(|| ModelMapping::passthrough(type_name))
    }

    fn identifier(key: &RemoteKey) -> String {
        key.join(IDENTIFIER_SEPARATOR)
    }

    async fn get_model(&self, cloud_type: &str, identifier: &str) -> ApiResult<WireObject> {
        debug!("GetResource {} {}", cloud_type, identifier);
        let response = self
            .client
            .get_resource()
            .type_name(cloud_type)
            .identifier(identifier)
            .send()
            .await
            .map_err(classify)?;

        let properties = response
            .resource_description()
            .and_then(|d| d.properties())
            .ok_or_else(|| ApiError::NotFound(format!("{} {}", cloud_type, identifier)))?;
        serde_json::from_str::<WireObject>(properties)
            .map_err(|e| ApiError::Transport(format!("malformed resource model: {}", e)))
    }

    async fn patch(&self, cloud_type: &str, identifier: &str, ops: Vec<JsonValue>) -> ApiResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let patch_document = JsonValue::Array(ops).to_string();
        debug!("UpdateResource {} {} {}", cloud_type, identifier, patch_document);

        let result = self
            .client
            .update_resource()
            .type_name(cloud_type)
            .identifier(identifier)
            .patch_document(patch_document)
            .send()
            .await
            .map_err(classify)?;

        if let Some(request_token) = result.progress_event().and_then(|p| p.request_token()) {
            self.wait_for_operation(request_token).await?;
        }
        Ok(())
    }

    /// Wait for a Cloud Control operation to complete
    async fn wait_for_operation(&self, request_token: &str) -> ApiResult<String> {
        for _ in 0..self.max_status_polls {
            let status = self
                .client
                .get_resource_request_status()
                .request_token(request_token)
                .send()
                .await
                .map_err(classify)?;

            if let Some(outcome) = operation_outcome(status.progress_event()) {
                return outcome;
            }
            tokio::time::sleep(self.status_poll_delay).await;
        }

        Err(ApiError::Transport(format!(
            "operation {} did not finish after {} status polls",
            request_token, self.max_status_polls
        )))
    }
}

#[async_trait]
impl RemoteApi for CloudControlApi {
    async fn create(&self, request: CreateRequest) -> ApiResult<WireObject> {
        let mapping = self.mapping(&request.type_name);
        let mut model = mapping.to_model(&request.body);
        if !request.tags.is_empty() {
            model.insert(TAGS_PROPERTY.to_string(), build_tags(&request.tags));
        }
        debug!("CreateResource {}", mapping.cloud_type);

        let result = self
            .client
            .create_resource()
            .type_name(&mapping.cloud_type)
            .desired_state(JsonValue::Object(model).to_string())
            .send()
            .await
            .map_err(classify)?;

        let request_token = result
            .progress_event()
            .and_then(|p| p.request_token())
            .ok_or_else(|| ApiError::Transport("No request token returned".to_string()))?;
        let identifier = self.wait_for_operation(request_token).await?;

        let mut response = match self.get_model(&mapping.cloud_type, &identifier).await {
            Ok(created) => mapping.from_model(&created),
            Err(e) if e.is_not_found() => {
                debug!("{} {} not readable yet", mapping.cloud_type, identifier);
                request.body
            }
            Err(e) => return Err(e),
        };
        if let Some(path) = mapping.identifier_path
            && get_path(&response, path).is_none()
        {
            set_path(&mut response, path, JsonValue::String(identifier));
        }
        Ok(response)
    }

    async fn get(&self, type_name: &str, key: &RemoteKey) -> ApiResult<WireObject> {
        let mapping = self.mapping(type_name);
        let model = self
            .get_model(&mapping.cloud_type, &Self::identifier(key))
            .await?;
        Ok(mapping.from_model(&model))
    }

    async fn update(
        &self,
        type_name: &str,
        key: &RemoteKey,
        group: &str,
        body: WireObject,
    ) -> ApiResult<()> {
        let mapping = self.mapping(type_name);
        debug!("updating {} group {}", type_name, group);
        let ops = patch_operations(&mapping.to_model(&body));
        self.patch(&mapping.cloud_type, &Self::identifier(key), ops)
            .await
    }

    async fn delete(&self, type_name: &str, key: &RemoteKey) -> ApiResult<()> {
        let mapping = self.mapping(type_name);
        let identifier = Self::identifier(key);
        debug!("DeleteResource {} {}", mapping.cloud_type, identifier);

        let result = self
            .client
            .delete_resource()
            .type_name(&mapping.cloud_type)
            .identifier(&identifier)
            .send()
            .await
            .map_err(classify)?;

        if let Some(request_token) = result.progress_event().and_then(|p| p.request_token()) {
            self.wait_for_operation(request_token).await?;
        }
        Ok(())
    }

    async fn list_tags(&self, type_name: &str, key: &RemoteKey) -> ApiResult<Tags> {
        let mapping = self.mapping(type_name);
        let model = self
            .get_model(&mapping.cloud_type, &Self::identifier(key))
            .await?;
        Ok(parse_tags(&model))
    }

    async fn update_tags(
        &self,
        type_name: &str,
        key: &RemoteKey,
        diff: &TagDiff,
    ) -> ApiResult<()> {
        let mapping = self.mapping(type_name);
        let identifier = Self::identifier(key);
        let model = self.get_model(&mapping.cloud_type, &identifier).await?;

        let mut tags = parse_tags(&model);
        for k in &diff.remove {
            tags.remove(k);
        }
        tags.extend(diff.upsert.iter().map(|(k, v)| (k.clone(), v.clone())));

        let op = if tags.is_empty() {
            json!({"op": "remove", "path": format!("/{}", TAGS_PROPERTY)})
        } else {
            json!({"op": "add", "path": format!("/{}", TAGS_PROPERTY), "value": build_tags(&tags)})
        };
        self.patch(&mapping.cloud_type, &identifier, vec![op]).await
    }

    async fn list_page(&self, type_name: &str, marker: Option<&str>) -> ApiResult<Page> {
        let mapping = self.mapping(type_name);
        debug!("ListResources {}", mapping.cloud_type);
        let response = self
            .client
            .list_resources()
            .type_name(&mapping.cloud_type)
            .set_next_token(marker.map(str::to_string))
            .send()
            .await
            .map_err(classify)?;

        let items = response
            .resource_descriptions()
            .iter()
            .filter_map(|desc| desc.properties())
            .filter_map(|properties| serde_json::from_str::<WireObject>(properties).ok())
            .map(|model| mapping.from_model(&model))
            .collect();

        Ok(Page {
            items,
            next_marker: response.next_token().map(str::to_string),
        })
    }
}

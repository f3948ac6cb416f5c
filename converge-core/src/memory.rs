//! In-memory remote API
//!
//! `MemoryApi` stores remote objects in a map, fills in server-side metadata
//! and records every mutating call, so reconciler behavior can be asserted
//! without a network. Tests can script eventual consistency (objects that
//! stay invisible for a number of reads), forced statuses and failures.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;

use crate::error::Operation;
use crate::identity::RemoteKey;
use crate::provider::{ApiError, ApiResult, CreateRequest, Page, RemoteApi};
use crate::tags::{TagDiff, Tags};
use crate::wire::{WireObject, set_path};

/// A mutating call as received by the remote
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create {
        type_name: String,
        key: RemoteKey,
        body: WireObject,
        tags: Tags,
    },
    Update {
        type_name: String,
        key: RemoteKey,
        group: String,
        body: WireObject,
    },
    Delete {
        type_name: String,
        key: RemoteKey,
    },
    UpdateTags {
        type_name: String,
        key: RemoteKey,
        diff: TagDiff,
    },
}

/// Server-side behavior of one remote type
#[derive(Debug, Clone, Default)]
pub struct TypeBehavior {
    assigned_id: Option<&'static str>,
    arn_path: Option<&'static str>,
    created_path: Option<&'static str>,
    updated_path: Option<&'static str>,
    status: Option<(&'static str, String)>,
    response_only: Vec<(&'static str, JsonValue)>,
}

impl TypeBehavior {
    pub fn new() -> Self {
        Self::default()
    }

    /// The server assigns a unique id at this path
    pub fn assigned_id(mut self, path: &'static str) -> Self {
        self.assigned_id = Some(path);
        self
    }

    pub fn arn(mut self, path: &'static str) -> Self {
        self.arn_path = Some(path);
        self
    }

    pub fn created_at(mut self, path: &'static str) -> Self {
        self.created_path = Some(path);
        self
    }

    pub fn last_updated_at(mut self, path: &'static str) -> Self {
        self.updated_path = Some(path);
        self
    }

    /// Status reported right after create
    pub fn status(mut self, path: &'static str, initial: impl Into<String>) -> Self {
        self.status = Some((path, initial.into()));
        self
    }

    /// Field included in the create response only, never stored
    pub fn response_only(mut self, path: &'static str, value: JsonValue) -> Self {
        self.response_only.push((path, value));
        self
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    object: WireObject,
    tags: Tags,
    hidden_reads: u32,
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<(String, String), (RemoteKey, StoredObject)>,
    behaviors: HashMap<String, TypeBehavior>,
    calls: Vec<Call>,
    reads: u32,
    propagation_delay: u32,
    failures: HashMap<&'static str, VecDeque<ApiError>>,
    page_size: Option<usize>,
}

#[derive(Debug, Default)]
pub struct MemoryApi {
    state: Mutex<State>,
}

fn slot(type_name: &str, key: &RemoteKey) -> (String, String) {
    (type_name.to_string(), key.to_string())
}

fn operation_slot(operation: Operation) -> &'static str {
    match operation {
        Operation::Create => "create",
        Operation::Read | Operation::Import => "get",
        Operation::Update => "update",
        Operation::Delete => "delete",
        Operation::List => "list",
        Operation::UpdateTags => "update_tags",
        Operation::ListTags => "list_tags",
    }
}

impl MemoryApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(self, type_name: &str, behavior: TypeBehavior) -> Self {
        self.state()
            .behaviors
            .insert(type_name.to_string(), behavior);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Objects created from now on answer not-found to their first `reads` gets
    pub fn set_propagation_delay(&self, reads: u32) {
        self.state().propagation_delay = reads;
    }

    /// Make the next call of `operation` fail with `error`
    pub fn fail_next(&self, operation: Operation, error: ApiError) {
        self.state()
            .failures
            .entry(operation_slot(operation))
            .or_default()
            .push_back(error);
    }

    pub fn set_page_size(&self, size: usize) {
        self.state().page_size = Some(size);
    }

    /// Seed an object as if it had been created out of band
    pub fn insert(&self, type_name: &str, key: RemoteKey, object: WireObject, tags: Tags) {
        self.state().objects.insert(
            slot(type_name, &key),
            (
                key,
                StoredObject {
                    object,
                    tags,
                    hidden_reads: 0,
                },
            ),
        );
    }

    /// Overwrite a field of a stored object (e.g., force a status)
    pub fn set_field(&self, type_name: &str, key: &RemoteKey, path: &str, value: JsonValue) {
        if let Some((_, stored)) = self.state().objects.get_mut(&slot(type_name, key)) {
            set_path(&mut stored.object, path, value);
        }
    }

    /// Delete an object out of band, without recording a call
    pub fn remove(&self, type_name: &str, key: &RemoteKey) -> bool {
        self.state().objects.remove(&slot(type_name, key)).is_some()
    }

    pub fn object(&self, type_name: &str, key: &RemoteKey) -> Option<WireObject> {
        self.state()
            .objects
            .get(&slot(type_name, key))
            .map(|(_, s)| s.object.clone())
    }

    pub fn tags(&self, type_name: &str, key: &RemoteKey) -> Option<Tags> {
        self.state()
            .objects
            .get(&slot(type_name, key))
            .map(|(_, s)| s.tags.clone())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        let mut state = self.state();
        state.calls.clear();
        state.reads = 0;
    }

    /// Number of get calls served so far
    pub fn reads(&self) -> u32 {
        self.state().reads
    }

    fn take_failure(state: &mut State, operation: Operation) -> ApiResult<()> {
        match state
            .failures
            .get_mut(operation_slot(operation))
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn not_found(type_name: &str, key: &RemoteKey) -> ApiError {
        ApiError::NotFound(format!("{} {} does not exist", type_name, key))
    }
}

#[async_trait]
impl RemoteApi for MemoryApi {
    async fn create(&self, request: CreateRequest) -> ApiResult<WireObject> {
        let mut state = self.state();
        state.calls.push(Call::Create {
            type_name: request.type_name.clone(),
            key: request.key.clone(),
            body: request.body.clone(),
            tags: request.tags.clone(),
        });
        Self::take_failure(&mut state, Operation::Create)?;

        let behavior = state
            .behaviors
            .get(&request.type_name)
            .cloned()
            .unwrap_or_default();
        let uid = uuid::Uuid::new_v4().to_string();
        let mut object = request.body;

        let key = match behavior.assigned_id {
            Some(path) => {
                set_path(&mut object, path, JsonValue::String(uid.clone()));
                if request.key.parts().is_empty() {
                    RemoteKey::single(path, uid.clone())
                } else {
                    request.key
                }
            }
            None => request.key,
        };

        if state.objects.contains_key(&slot(&request.type_name, &key)) {
            return Err(ApiError::rejected(
                "ConflictException",
                format!("{} {} already exists", request.type_name, key),
            ));
        }

        let now = Utc::now().timestamp();
        if let Some(path) = behavior.arn_path {
            let arn = format!("arn:aws:memory:us-east-1:123456789012:{}/{}", request.type_name, uid);
            set_path(&mut object, path, JsonValue::String(arn));
        }
        if let Some(path) = behavior.created_path {
            set_path(&mut object, path, JsonValue::from(now));
        }
        if let Some(path) = behavior.updated_path {
            set_path(&mut object, path, JsonValue::from(now));
        }
        if let Some((path, initial)) = &behavior.status {
            set_path(&mut object, path, JsonValue::String(initial.clone()));
        }

        let mut response = object.clone();
        for (path, value) in &behavior.response_only {
            set_path(&mut response, path, value.clone());
        }

        let hidden_reads = state.propagation_delay;
        state.objects.insert(
            slot(&request.type_name, &key),
            (
                key,
                StoredObject {
                    object,
                    tags: request.tags,
                    hidden_reads,
                },
            ),
        );
        Ok(response)
    }

    async fn get(&self, type_name: &str, key: &RemoteKey) -> ApiResult<WireObject> {
        let mut state = self.state();
        state.reads += 1;
        Self::take_failure(&mut state, Operation::Read)?;

        let Some((_, stored)) = state.objects.get_mut(&slot(type_name, key)) else {
            return Err(Self::not_found(type_name, key));
        };
        if stored.hidden_reads > 0 {
            stored.hidden_reads -= 1;
            return Err(Self::not_found(type_name, key));
        }
        Ok(stored.object.clone())
    }

    async fn update(
        &self,
        type_name: &str,
        key: &RemoteKey,
        group: &str,
        body: WireObject,
    ) -> ApiResult<()> {
        let mut state = self.state();
        state.calls.push(Call::Update {
            type_name: type_name.to_string(),
            key: key.clone(),
            group: group.to_string(),
            body: body.clone(),
        });
        Self::take_failure(&mut state, Operation::Update)?;

        let updated_path = state
            .behaviors
            .get(type_name)
            .and_then(|b| b.updated_path);
        let Some((_, stored)) = state.objects.get_mut(&slot(type_name, key)) else {
            return Err(Self::not_found(type_name, key));
        };
        for (field, value) in body {
            if value.is_null() {
                stored.object.remove(&field);
            } else {
                stored.object.insert(field, value);
            }
        }
        if let Some(path) = updated_path {
            set_path(&mut stored.object, path, JsonValue::from(Utc::now().timestamp()));
        }
        Ok(())
    }

    async fn delete(&self, type_name: &str, key: &RemoteKey) -> ApiResult<()> {
        let mut state = self.state();
        state.calls.push(Call::Delete {
            type_name: type_name.to_string(),
            key: key.clone(),
        });
        Self::take_failure(&mut state, Operation::Delete)?;

        match state.objects.remove(&slot(type_name, key)) {
            Some(_) => Ok(()),
            None => Err(Self::not_found(type_name, key)),
        }
    }

    async fn list_tags(&self, type_name: &str, key: &RemoteKey) -> ApiResult<Tags> {
        let mut state = self.state();
        Self::take_failure(&mut state, Operation::ListTags)?;
        state
            .objects
            .get(&slot(type_name, key))
            .map(|(_, s)| s.tags.clone())
            .ok_or_else(|| Self::not_found(type_name, key))
    }

    async fn update_tags(
        &self,
        type_name: &str,
        key: &RemoteKey,
        diff: &TagDiff,
    ) -> ApiResult<()> {
        let mut state = self.state();
        state.calls.push(Call::UpdateTags {
            type_name: type_name.to_string(),
            key: key.clone(),
            diff: diff.clone(),
        });
        Self::take_failure(&mut state, Operation::UpdateTags)?;

        let Some((_, stored)) = state.objects.get_mut(&slot(type_name, key)) else {
            return Err(Self::not_found(type_name, key));
        };
        for k in &diff.remove {
            stored.tags.remove(k);
        }
        stored
            .tags
            .extend(diff.upsert.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn list_page(&self, type_name: &str, marker: Option<&str>) -> ApiResult<Page> {
        let mut state = self.state();
        Self::take_failure(&mut state, Operation::List)?;

        let mut entries: Vec<(&String, &WireObject)> = state
            .objects
            .iter()
            .filter(|((t, _), _)| t == type_name)
            .map(|((_, k), (_, stored))| (k, &stored.object))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        let start = match marker {
            Some(m) => m
                .parse::<usize>()
                .map_err(|_| ApiError::rejected("InvalidNextToken", format!("bad marker {}", m)))?,
            None => 0,
        };
        let size = state.page_size.unwrap_or(100).max(1);
        let end = (start + size).min(entries.len());
        let items = entries
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .map(|(_, object)| (*object).clone())
            .collect();
        let next_marker = (end < entries.len()).then(|| end.to_string());

        Ok(Page { items, next_marker })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(name: &str) -> WireObject {
        json!({"Name": name}).as_object().cloned().unwrap()
    }

    fn request(name: &str) -> CreateRequest {
        CreateRequest {
            type_name: "Test::Thing".to_string(),
            key: RemoteKey::single("Name", name),
            body: body(name),
            tags: Tags::new(),
        }
    }

    #[tokio::test]
    async fn create_then_get() {
        let api = MemoryApi::new().with_type(
            "Test::Thing",
            TypeBehavior::new()
                .arn("Arn")
                .created_at("CreatedAt")
                .status("Status", "ACTIVE"),
        );
        let response = api.create(request("a")).await.unwrap();
        assert!(response["Arn"].as_str().unwrap().starts_with("arn:aws:"));

        let object = api
            .get("Test::Thing", &RemoteKey::single("Name", "a"))
            .await
            .unwrap();
        assert_eq!(object["Status"], json!("ACTIVE"));
        assert_eq!(api.calls().len(), 1);
        assert_eq!(api.reads(), 1);
    }

    #[tokio::test]
    async fn assigned_id_becomes_the_key() {
        let api = MemoryApi::new().with_type("Test::Set", TypeBehavior::new().assigned_id("SetId"));
        let response = api
            .create(CreateRequest {
                type_name: "Test::Set".to_string(),
                key: RemoteKey::new(vec![]),
                body: body("s"),
                tags: Tags::new(),
            })
            .await
            .unwrap();
        let id = response["SetId"].as_str().unwrap().to_string();
        assert!(api.get("Test::Set", &RemoteKey::single("SetId", id)).await.is_ok());
    }

    #[tokio::test]
    async fn propagation_delay_hides_new_objects() {
        let api = MemoryApi::new();
        api.set_propagation_delay(2);
        api.create(request("a")).await.unwrap();
        let key = RemoteKey::single("Name", "a");
        assert!(api.get("Test::Thing", &key).await.unwrap_err().is_not_found());
        assert!(api.get("Test::Thing", &key).await.unwrap_err().is_not_found());
        assert!(api.get("Test::Thing", &key).await.is_ok());
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let api = MemoryApi::new();
        api.create(request("a")).await.unwrap();
        let err = api.create(request("a")).await.unwrap_err();
        assert!(matches!(err, ApiError::Rejected { .. }));
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let api = MemoryApi::new();
        api.fail_next(Operation::Delete, ApiError::Transport("reset".to_string()));
        api.create(request("a")).await.unwrap();
        let key = RemoteKey::single("Name", "a");
        assert!(api.delete("Test::Thing", &key).await.is_err());
        assert!(api.delete("Test::Thing", &key).await.is_ok());
        assert!(api.delete("Test::Thing", &key).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn update_merges_and_clears_fields() {
        let api = MemoryApi::new();
        api.create(request("a")).await.unwrap();
        let key = RemoteKey::single("Name", "a");
        let patch = json!({"Size": 3, "Name": null}).as_object().cloned().unwrap();
        api.update("Test::Thing", &key, "size", patch).await.unwrap();
        let object = api.object("Test::Thing", &key).unwrap();
        assert_eq!(object.get("Size"), Some(&json!(3)));
        assert!(!object.contains_key("Name"));
    }

    #[tokio::test]
    async fn listing_is_paginated() {
        let api = MemoryApi::new();
        for name in ["a", "b", "c"] {
            api.create(request(name)).await.unwrap();
        }
        api.set_page_size(2);
        let first = api.list_page("Test::Thing", None).await.unwrap();
        assert_eq!(first.items.len(), 2);
        let second = api
            .list_page("Test::Thing", first.next_marker.as_deref())
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.next_marker, None);
    }
}

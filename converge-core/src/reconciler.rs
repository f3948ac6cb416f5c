//! Reconciler - Generic create/read/update/delete/import lifecycle
//!
//! One implementation drives every resource kind toward its desired
//! configuration. The kind supplies the data (schema, identity scheme,
//! status rule); the `Context` supplies the remote API and policy.
//!
//! Lifecycle of a tracked resource:
//!
//! ```text
//! absent -> create -> creating -> read confirms -> stable -> (update)* -> stable -> delete -> absent
//! ```
//!
//! A read of a stable resource that finds it gone or deleted routes to
//! absent. Finding it deleted while still creating is a terminal error.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::ReconcilerConfig;
use crate::differ::{self, Diff};
use crate::error::{Operation, ReconcileError, ReconcileResult};
use crate::identity::{IdentityError, IdentityScheme, RemoteKey, SEPARATOR};
use crate::kind::ResourceKind;
use crate::provider::{ApiError, ApiResult, CreateRequest, RemoteApi};
use crate::resource::{Attributes, ReadOutcome, TrackedResource, Value};
use crate::schema::{Codec, TypeError};
use crate::status::{Status, status_of};
use crate::tags::{self, TagDiff, Tags};
use crate::wait::{WaitError, wait_for_found};
use crate::wire::{self, WireObject, json_equivalent};

/// Everything a lifecycle call needs besides the resource itself
#[derive(Clone)]
pub struct Context {
    pub api: Arc<dyn RemoteApi>,
    pub config: ReconcilerConfig,
    pub cancel: CancellationToken,
}

impl Context {
    pub fn new(api: Arc<dyn RemoteApi>) -> Self {
        Self {
            api,
            config: ReconcilerConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Whether a read happens right after create or against a stable resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Creating,
    Existing,
}

/// Lifecycle driver for one resource kind
#[derive(Debug, Clone)]
pub struct Reconciler {
    kind: ResourceKind,
}

impl Reconciler {
    pub fn new(kind: ResourceKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    fn name(&self) -> &'static str {
        self.kind.name
    }

    fn identity_error(&self, source: IdentityError) -> ReconcileError {
        ReconcileError::Identity {
            kind: self.name().to_string(),
            source,
        }
    }

    /// Validate user input and bring it into canonical form
    fn normalize(&self, desired: &Attributes) -> ReconcileResult<Attributes> {
        self.kind
            .schema
            .validate(desired)
            .map_err(|errors| ReconcileError::ValidationFailed {
                kind: self.name().to_string(),
                errors,
            })?;
        let mut config = desired.clone();
        self.kind.schema.apply_defaults(&mut config);
        wire::prune_empty(&mut config);
        Ok(config)
    }

    /// Key values must survive being joined into an identity and parsed back
    fn check_key_parts(&self, config: &Attributes) -> ReconcileResult<()> {
        let errors: Vec<TypeError> = self
            .kind
            .identity
            .unaddressable_keys(config)
            .into_iter()
            .map(|(name, value)| TypeError::AttributeError {
                name: name.to_string(),
                inner: Box::new(TypeError::ValidationFailed {
                    message: format!(
                        "'{}' cannot address the resource: it must be non-empty and must not contain '{}'",
                        value, SEPARATOR
                    ),
                }),
            })
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ReconcileError::ValidationFailed {
                kind: self.name().to_string(),
                errors,
            })
        }
    }

    /// Effective tags of a configuration, defaults merged in
    fn effective_tags(&self, ctx: &Context, config: &Attributes) -> Tags {
        let own = tags::from_attributes(config, tags::TAGS);
        ctx.config.default_tags.merge(&own)
    }

    /// Effective tags the remote last reported; kinds that do not track
    /// `tags_all` fall back to the old configuration merged with defaults
    fn applied_tags(&self, ctx: &Context, tracked: &TrackedResource, old: &Attributes) -> Tags {
        if self.kind.schema.get(tags::TAGS_ALL).is_some() {
            tags::from_attributes(&tracked.attributes, tags::TAGS_ALL)
        } else {
            self.effective_tags(ctx, old)
        }
    }

    fn check_cancelled(&self, ctx: &Context, identity: &str, operation: Operation) -> ReconcileResult<()> {
        if ctx.cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled {
                kind: self.name().to_string(),
                identity: identity.to_string(),
                operation,
            });
        }
        Ok(())
    }

    /// Create the remote object and read it back
    pub async fn create(&self, ctx: &Context, desired: &Attributes) -> ReconcileResult<TrackedResource> {
        let mut config = self.normalize(desired)?;
        if let Some(prepare) = self.kind.prepare_create {
            prepare(&mut config);
        }
        self.check_key_parts(&config)?;

        let key = match &self.kind.identity {
            IdentityScheme::Assigned { key_fields, .. } if key_fields.is_empty() => {
                RemoteKey::new(Vec::new())
            }
            scheme => scheme
                .key_from_attributes(None, &config)
                .map_err(|e| self.identity_error(e))?,
        };
        self.check_cancelled(ctx, &key.to_string(), Operation::Create)?;

        let request = CreateRequest {
            type_name: self.kind.type_name.to_string(),
            key: key.clone(),
            body: wire::encode(&self.kind.schema, &config),
            tags: if self.kind.has_tags {
                self.effective_tags(ctx, &config)
            } else {
                Tags::new()
            },
        };

        debug!("{}: creating {}", self.name(), key);
        let response = ctx
            .api
            .create(request)
            .await
            .map_err(|e| ReconcileError::remote(self.name(), &key, Operation::Create, e))?;

        let identity = self
            .kind
            .identity
            .identity(&key, &response)
            .map_err(|e| self.identity_error(e))?;
        debug!("{}: created {}", self.name(), identity);

        // Fields only the create response carries (e.g. generated secrets)
        let from_response = wire::decode(&self.kind.schema, &response);
        for (name, attr) in &self.kind.schema.attributes {
            if attr.write_only
                && attr.is_computed_only()
                && let Some(value) = from_response.get(name)
            {
                config.insert(name.clone(), value.clone());
            }
        }

        let tracked = TrackedResource::new(self.name(), identity.clone(), config)
            .with_schema_version(self.kind.schema.version);

        match self.read(ctx, &tracked, Phase::Creating).await {
            Ok(ReadOutcome::Present(resource)) => Ok(resource),
            Ok(ReadOutcome::Absent) => Err(ReconcileError::PartialCreate {
                kind: self.name().to_string(),
                identity: identity.to_string(),
                source: Box::new(ReconcileError::NotFound {
                    kind: self.name().to_string(),
                    identity: identity.to_string(),
                }),
            }),
            Err(e @ ReconcileError::DeletedAfterCreate { .. }) => Err(e),
            Err(e) => Err(ReconcileError::PartialCreate {
                kind: self.name().to_string(),
                identity: identity.to_string(),
                source: Box::new(e),
            }),
        }
    }

    /// Read the remote object behind a tracked resource
    pub async fn read(
        &self,
        ctx: &Context,
        tracked: &TrackedResource,
        phase: Phase,
    ) -> ReconcileResult<ReadOutcome> {
        let identity = tracked.identity.as_str();
        let key = self
            .kind
            .identity
            .key_for(&tracked.identity, &tracked.attributes)
            .map_err(|e| self.identity_error(e))?;

        let object = match phase {
            Phase::Creating => self.poll_until_visible(ctx, identity, &key).await?,
            Phase::Existing => {
                self.check_cancelled(ctx, identity, Operation::Read)?;
                match self.get_bounded(ctx, &key).await {
                    Ok(object) => object,
                    Err(e) if e.is_not_found() => {
                        warn!("{}: {} not found, removing from state", self.name(), identity);
                        return Ok(ReadOutcome::Absent);
                    }
                    Err(e) => {
                        return Err(ReconcileError::remote(self.name(), identity, Operation::Read, e));
                    }
                }
            }
        };

        match status_of(self.kind.status.as_ref(), &object) {
            Status::Deleted if phase == Phase::Creating => {
                return Err(ReconcileError::DeletedAfterCreate {
                    kind: self.name().to_string(),
                    identity: identity.to_string(),
                    status: Status::Deleted.to_string(),
                });
            }
            Status::Deleted => {
                warn!("{}: {} is deleted, removing from state", self.name(), identity);
                return Ok(ReadOutcome::Absent);
            }
            Status::Transitional(raw) => {
                debug!("{}: {} is {}", self.name(), identity, raw);
            }
            Status::Active => {}
        }

        let tags = match self.read_tags(ctx, &key).await {
            Ok(tags) => tags,
            Err(e) if e.is_not_found() && phase == Phase::Existing => {
                warn!("{}: {} not found, removing from state", self.name(), identity);
                return Ok(ReadOutcome::Absent);
            }
            Err(e) => {
                return Err(ReconcileError::remote(self.name(), identity, Operation::ListTags, e));
            }
        };

        let observed = self.project(ctx, &object, tags, &tracked.attributes);
        let drift = differ::drifted_attributes(&self.kind.schema, &tracked.attributes, &observed);
        if phase == Phase::Existing && !drift.is_empty() {
            debug!("{}: {} drifted: {}", self.name(), identity, drift.join(", "));
        }

        Ok(ReadOutcome::Present(
            TrackedResource::new(self.name(), tracked.identity.clone(), observed)
                .with_schema_version(self.kind.schema.version),
        ))
    }

    /// Converge a stable resource from `old` to `new` configuration
    pub async fn update(
        &self,
        ctx: &Context,
        tracked: &TrackedResource,
        old: &Attributes,
        new: &Attributes,
    ) -> ReconcileResult<ReadOutcome> {
        let identity = tracked.identity.as_str();
        let new = self.normalize(new)?;
        let mut old = old.clone();
        self.kind.schema.apply_defaults(&mut old);
        wire::prune_empty(&mut old);

        let groups = match differ::diff(&self.kind.schema, &old, &new) {
            Diff::NoChange => Vec::new(),
            Diff::Replace { attributes } => {
                return Err(ReconcileError::ReplaceRequired {
                    kind: self.name().to_string(),
                    identity: identity.to_string(),
                    attributes,
                });
            }
            Diff::Update { groups, .. } => groups,
        };

        let key = self
            .kind
            .identity
            .key_for(&tracked.identity, &tracked.attributes)
            .map_err(|e| self.identity_error(e))?;

        for change in &groups {
            // Tags converge below, against the last observed effective set
            if change.group == tags::TAGS {
                continue;
            }

            self.check_cancelled(ctx, identity, Operation::Update)?;
            let body = wire::encode_update(&self.kind.schema, &change.attributes, &new);
            debug!(
                "{}: updating {} group {} ({})",
                self.name(),
                identity,
                change.group,
                change.attributes.join(", ")
            );
            ctx.api
                .update(self.kind.type_name, &key, &change.group, body)
                .await
                .map_err(|e| ReconcileError::remote(self.name(), identity, Operation::Update, e))?;
        }

        if self.kind.has_tags {
            let diff = TagDiff::between(&self.applied_tags(ctx, tracked, &old), &self.effective_tags(ctx, &new));
            if !diff.is_empty() {
                self.check_cancelled(ctx, identity, Operation::UpdateTags)?;
                debug!("{}: updating tags of {}", self.name(), identity);
                ctx.api
                    .update_tags(self.kind.type_name, &key, &diff)
                    .await
                    .map_err(|e| ReconcileError::remote(self.name(), identity, Operation::UpdateTags, e))?;
            }
        }

        // Computed values not returned by reads stay with the resource
        let mut attributes = new;
        for (name, attr) in &self.kind.schema.attributes {
            if attr.is_computed_only()
                && attr.write_only
                && let Some(value) = tracked.attributes.get(name)
            {
                attributes.insert(name.clone(), value.clone());
            }
        }
        let desired = TrackedResource::new(self.name(), tracked.identity.clone(), attributes)
            .with_schema_version(self.kind.schema.version);
        self.read(ctx, &desired, Phase::Existing).await
    }

    /// Delete the remote object; an already missing object is success
    pub async fn delete(&self, ctx: &Context, tracked: &TrackedResource) -> ReconcileResult<()> {
        let identity = tracked.identity.as_str();
        let key = self
            .kind
            .identity
            .key_for(&tracked.identity, &tracked.attributes)
            .map_err(|e| self.identity_error(e))?;
        self.check_cancelled(ctx, identity, Operation::Delete)?;

        debug!("{}: deleting {}", self.name(), identity);
        match ctx.api.delete(self.kind.type_name, &key).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("{}: {} already gone", self.name(), identity);
                Ok(())
            }
            Err(e) => Err(ReconcileError::remote(self.name(), identity, Operation::Delete, e)),
        }
    }

    /// Adopt an existing remote object by its import reference
    pub async fn import(&self, ctx: &Context, reference: &str) -> ReconcileResult<TrackedResource> {
        let (key, key_attributes) =
            self.kind
                .identity
                .parse_import(reference)
                .map_err(|source| ReconcileError::MalformedReference {
                    kind: self.name().to_string(),
                    source,
                })?;
        self.check_cancelled(ctx, reference, Operation::Import)?;

        let not_found = || ReconcileError::NotFound {
            kind: self.name().to_string(),
            identity: reference.to_string(),
        };
        let object = match self.get_bounded(ctx, &key).await {
            Ok(object) => object,
            Err(e) if e.is_not_found() => return Err(not_found()),
            Err(e) => return Err(ReconcileError::remote(self.name(), reference, Operation::Import, e)),
        };
        if status_of(self.kind.status.as_ref(), &object).is_deleted() {
            return Err(not_found());
        }

        let identity = self
            .kind
            .identity
            .identity(&key, &object)
            .map_err(|e| self.identity_error(e))?;
        let tags = self
            .read_tags(ctx, &key)
            .await
            .map_err(|e| match e {
                ApiError::NotFound(_) => not_found(),
                e => ReconcileError::remote(self.name(), reference, Operation::ListTags, e),
            })?;

        let mut attributes = self.project(ctx, &object, tags, &Attributes::new());
        for (name, value) in key_attributes {
            attributes.entry(name).or_insert(value);
        }
        info!("{}: imported {} as {}", self.name(), reference, identity);

        Ok(TrackedResource::new(self.name(), identity, attributes)
            .with_schema_version(self.kind.schema.version))
    }

    /// Remote keys of every object of this kind
    pub async fn list(&self, ctx: &Context) -> ReconcileResult<Vec<RemoteKey>> {
        let mut keys = Vec::new();
        self.list_each(ctx, |key| {
            keys.push(key);
            true
        })
        .await?;
        Ok(keys)
    }

    /// Walk every page of the listing; `visit` returns false to stop early
    pub async fn list_each<F>(&self, ctx: &Context, mut visit: F) -> ReconcileResult<()>
    where
        F: FnMut(RemoteKey) -> bool + Send,
    {
        let mut marker: Option<String> = None;
        loop {
            self.check_cancelled(ctx, "*", Operation::List)?;
            let page = ctx
                .api
                .list_page(self.kind.type_name, marker.as_deref())
                .await
                .map_err(|e| ReconcileError::remote(self.name(), "*", Operation::List, e))?;
            debug!("{}: listed {} object(s)", self.name(), page.items.len());

            for summary in &page.items {
                let key = self
                    .kind
                    .identity
                    .key_from_summary(summary)
                    .map_err(|e| self.identity_error(e))?;
                if !visit(key) {
                    return Ok(());
                }
            }

            match page.next_marker {
                Some(next) => marker = Some(next),
                None => return Ok(()),
            }
        }
    }

    /// Bring tracked state written by an older schema version up to date
    pub fn upgrade(&self, tracked: TrackedResource) -> ReconcileResult<TrackedResource> {
        if tracked.schema_version == self.kind.schema.version {
            return Ok(tracked);
        }
        let attributes = self.kind.upgrade(tracked.attributes, tracked.schema_version)?;
        Ok(TrackedResource::new(self.name(), tracked.identity, attributes)
            .with_schema_version(self.kind.schema.version))
    }

    async fn get_bounded(&self, ctx: &Context, key: &RemoteKey) -> ApiResult<WireObject> {
        let timeout = ctx.config.read_timeout();
        debug!("{}: reading {}", self.name(), key);
        match tokio::time::timeout(timeout, ctx.api.get(self.kind.type_name, key)).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Transport(format!(
                "read timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }

    async fn poll_until_visible(
        &self,
        ctx: &Context,
        identity: &str,
        key: &RemoteKey,
    ) -> ReconcileResult<WireObject> {
        let wait = ctx.config.propagation_wait();
        let label = format!("{} {}", self.name(), identity);
        let result = wait_for_found(
            &wait,
            Some(&ctx.cancel),
            move || async move {
                match self.get_bounded(ctx, key).await {
                    Ok(object) => Ok(Some(object)),
                    Err(e) if e.is_not_found() => Ok(None),
                    Err(e) => Err(e),
                }
            },
            &label,
        )
        .await;

        result.map_err(|e| match e {
            WaitError::Timeout { waited, .. } => ReconcileError::PropagationTimeout {
                kind: self.name().to_string(),
                identity: identity.to_string(),
                waited,
            },
            WaitError::Cancelled => ReconcileError::Cancelled {
                kind: self.name().to_string(),
                identity: identity.to_string(),
                operation: Operation::Read,
            },
            WaitError::Check(e) => ReconcileError::remote(self.name(), identity, Operation::Read, e),
        })
    }

    async fn read_tags(&self, ctx: &Context, key: &RemoteKey) -> ApiResult<Tags> {
        if !self.kind.has_tags {
            return Ok(Tags::new());
        }
        let remote = ctx.api.list_tags(self.kind.type_name, key).await?;
        Ok(ctx.config.ignore_tags.apply(&remote))
    }

    /// Project a remote object onto the attribute tree, carrying over what
    /// reads cannot observe
    fn project(&self, ctx: &Context, object: &WireObject, tags_all: Tags, tracked: &Attributes) -> Attributes {
        let mut observed = wire::decode(&self.kind.schema, object);

        if self.kind.has_tags {
            let own = ctx.config.default_tags.remove_defaults(&tags_all);
            if let Some(value) = tags::to_value(&own) {
                observed.insert(tags::TAGS.to_string(), value);
            }
            if self.kind.schema.get(tags::TAGS_ALL).is_some()
                && let Some(value) = tags::to_value(&tags_all)
            {
                observed.insert(tags::TAGS_ALL.to_string(), value);
            }
        }

        for (name, attr) in &self.kind.schema.attributes {
            let Some(previous) = tracked.get(name) else {
                continue;
            };
            if attr.write_only && !observed.contains_key(name) {
                observed.insert(name.clone(), previous.clone());
            } else if attr.codec == Codec::Json
                && let (Some(Value::String(seen)), Value::String(kept)) = (observed.get(name), previous)
                && json_equivalent(seen, kept)
            {
                observed.insert(name.clone(), previous.clone());
            }
        }
        observed
    }
}

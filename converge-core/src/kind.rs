//! Resource kinds - Everything resource-specific, expressed as data
//!
//! The reconciler is written once; a `ResourceKind` supplies the schema,
//! identity scheme, status rule, tag support, create-time preparation and
//! state migrations for one remote resource type.

use log::info;

use crate::error::ReconcileError;
use crate::identity::IdentityScheme;
use crate::resource::Attributes;
use crate::schema::ResourceSchema;
use crate::status::StatusRule;

/// Hook run on the desired configuration right before create
/// (e.g. to generate a name)
pub type PrepareCreate = fn(&mut Attributes);

/// One state upgrade step
#[derive(Debug, Clone, Copy)]
pub struct StateMigration {
    /// Schema version this step upgrades from (to `from + 1`)
    pub from: u32,
    pub migrate: fn(Attributes) -> Result<Attributes, String>,
}

#[derive(Debug, Clone)]
pub struct ResourceKind {
    /// Resource kind name as the host knows it (e.g., "appmesh_virtual_node")
    pub name: &'static str,
    /// Remote type name (e.g., "AWS::AppMesh::VirtualNode")
    pub type_name: &'static str,
    pub schema: ResourceSchema,
    pub identity: IdentityScheme,
    pub status: Option<StatusRule>,
    /// Tags are managed through the tag side channel
    pub has_tags: bool,
    pub prepare_create: Option<PrepareCreate>,
    pub migrations: Vec<StateMigration>,
}

impl ResourceKind {
    pub fn new(
        name: &'static str,
        type_name: &'static str,
        schema: ResourceSchema,
        identity: IdentityScheme,
    ) -> Self {
        Self {
            name,
            type_name,
            schema,
            identity,
            status: None,
            has_tags: false,
            prepare_create: None,
            migrations: Vec::new(),
        }
    }

    pub fn with_status(mut self, rule: StatusRule) -> Self {
        self.status = Some(rule);
        self
    }

    pub fn with_tags(mut self) -> Self {
        self.has_tags = true;
        self
    }

    pub fn with_prepare_create(mut self, hook: PrepareCreate) -> Self {
        self.prepare_create = Some(hook);
        self
    }

    pub fn with_migration(mut self, migration: StateMigration) -> Self {
        self.migrations.push(migration);
        self
    }

    /// Upgrade tracked attributes written with schema version `from` to the
    /// current version, one step at a time
    pub fn upgrade(&self, mut attributes: Attributes, from: u32) -> Result<Attributes, ReconcileError> {
        let target = self.schema.version;
        if from > target {
            return Err(ReconcileError::Migration {
                kind: self.name.to_string(),
                from,
                message: format!("state is newer than schema version {}", target),
            });
        }

        for version in from..target {
            let step = self
                .migrations
                .iter()
                .find(|m| m.from == version)
                .ok_or_else(|| ReconcileError::Migration {
                    kind: self.name.to_string(),
                    from: version,
                    message: "no migration registered".to_string(),
                })?;
            attributes = (step.migrate)(attributes).map_err(|message| ReconcileError::Migration {
                kind: self.name.to_string(),
                from: version,
                message,
            })?;
            info!("{}: migrated state from version {} to {}", self.name, version, version + 1);
        }
        Ok(attributes)
    }
}

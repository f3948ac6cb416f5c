//! Converge Core
//!
//! Generic reconciliation of declarative resource configurations against a
//! remote management API. A resource kind is pure data (schema, identity
//! scheme, status rule); the reconciler drives every kind through the same
//! create/read/update/delete/import lifecycle.

pub mod config;
pub mod differ;
pub mod error;
pub mod identity;
pub mod kind;
pub mod memory;
pub mod provider;
pub mod reconciler;
pub mod resource;
pub mod schema;
pub mod status;
pub mod tags;
pub mod wait;
pub mod wire;

pub use config::ReconcilerConfig;
pub use error::{Operation, ReconcileError, ReconcileResult};
pub use kind::ResourceKind;
pub use provider::{ApiError, RemoteApi};
pub use reconciler::{Context, Phase, Reconciler};
pub use resource::{Attributes, Identity, ReadOutcome, TrackedResource, Value};

//! Error - Failures surfaced by the reconciler
//!
//! Every variant names the resource kind and, once known, its identity, and
//! renders as `[kind identity] message`.

use std::fmt;
use std::time::Duration;

use crate::identity::IdentityError;
use crate::provider::ApiError;
use crate::schema::TypeError;

/// Lifecycle operation, for error messages and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    Import,
    List,
    UpdateTags,
    ListTags,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Import => "import",
            Operation::List => "list",
            Operation::UpdateTags => "update tags",
            Operation::ListTags => "list tags",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("[{kind}] invalid configuration: {}", join_errors(.errors))]
    ValidationFailed { kind: String, errors: Vec<TypeError> },

    #[error("[{kind} {identity}] {operation} rejected: {source}")]
    RemoteRejected {
        kind: String,
        identity: String,
        operation: Operation,
        source: ApiError,
    },

    #[error("[{kind} {identity}] not found")]
    NotFound { kind: String, identity: String },

    #[error("[{kind} {identity}] still not visible after {}s", .waited.as_secs())]
    PropagationTimeout {
        kind: String,
        identity: String,
        waited: Duration,
    },

    #[error("[{kind}] {source}")]
    MalformedReference { kind: String, source: IdentityError },

    #[error("[{kind} {identity}] {operation} failed: {source}")]
    RemoteError {
        kind: String,
        identity: String,
        operation: Operation,
        source: ApiError,
    },

    #[error("[{kind} {identity}] reported status {status} right after creation")]
    DeletedAfterCreate {
        kind: String,
        identity: String,
        status: String,
    },

    #[error("[{kind} {identity}] created, but reading it back failed: {source}")]
    PartialCreate {
        kind: String,
        identity: String,
        source: Box<ReconcileError>,
    },

    #[error("[{kind} {identity}] changing {} requires replacement", .attributes.join(", "))]
    ReplaceRequired {
        kind: String,
        identity: String,
        attributes: Vec<String>,
    },

    #[error("[{kind} {identity}] {operation} cancelled")]
    Cancelled {
        kind: String,
        identity: String,
        operation: Operation,
    },

    #[error("[{kind}] cannot migrate state from version {from}: {message}")]
    Migration {
        kind: String,
        from: u32,
        message: String,
    },

    #[error("[{kind}] {source}")]
    Identity { kind: String, source: IdentityError },
}

fn join_errors(errors: &[TypeError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ReconcileError {
    /// Wrap a remote API error. Service rejections of mutating calls are
    /// `RemoteRejected`; everything else is `RemoteError`.
    pub fn remote(
        kind: &str,
        identity: impl fmt::Display,
        operation: Operation,
        source: ApiError,
    ) -> Self {
        let kind = kind.to_string();
        let identity = identity.to_string();
        let mutating = matches!(
            operation,
            Operation::Create | Operation::Update | Operation::Delete | Operation::UpdateTags
        );
        match source {
            ApiError::Rejected { .. } if mutating => ReconcileError::RemoteRejected {
                kind,
                identity,
                operation,
                source,
            },
            source => ReconcileError::RemoteError {
                kind,
                identity,
                operation,
                source,
            },
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            ReconcileError::ValidationFailed { kind, .. }
            | ReconcileError::RemoteRejected { kind, .. }
            | ReconcileError::NotFound { kind, .. }
            | ReconcileError::PropagationTimeout { kind, .. }
            | ReconcileError::MalformedReference { kind, .. }
            | ReconcileError::RemoteError { kind, .. }
            | ReconcileError::DeletedAfterCreate { kind, .. }
            | ReconcileError::PartialCreate { kind, .. }
            | ReconcileError::ReplaceRequired { kind, .. }
            | ReconcileError::Cancelled { kind, .. }
            | ReconcileError::Migration { kind, .. }
            | ReconcileError::Identity { kind, .. } => kind,
        }
    }

    /// Identity the error refers to, when one was known
    pub fn identity(&self) -> Option<&str> {
        match self {
            ReconcileError::RemoteRejected { identity, .. }
            | ReconcileError::NotFound { identity, .. }
            | ReconcileError::PropagationTimeout { identity, .. }
            | ReconcileError::RemoteError { identity, .. }
            | ReconcileError::DeletedAfterCreate { identity, .. }
            | ReconcileError::PartialCreate { identity, .. }
            | ReconcileError::ReplaceRequired { identity, .. }
            | ReconcileError::Cancelled { identity, .. } => Some(identity),
            _ => None,
        }
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

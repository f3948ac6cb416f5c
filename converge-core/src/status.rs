//! Lifecycle status reported by the remote object

use crate::wire::{WireObject, get_path};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Active,
    Deleted,
    /// Any other reported value (e.g. "INACTIVE", "CREATING")
    Transitional(String),
}

impl Status {
    pub fn is_deleted(&self) -> bool {
        matches!(self, Status::Deleted)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Active => f.write_str("active"),
            Status::Deleted => f.write_str("deleted"),
            Status::Transitional(raw) => f.write_str(raw),
        }
    }
}

/// Where a kind's status lives on the wire and how to read it
#[derive(Debug, Clone)]
pub struct StatusRule {
    /// Dotted wire path of the status field (e.g. "status.status")
    pub path: &'static str,
    pub active: &'static [&'static str],
    pub deleted: &'static [&'static str],
}

impl StatusRule {
    pub const fn new(
        path: &'static str,
        active: &'static [&'static str],
        deleted: &'static [&'static str],
    ) -> Self {
        Self {
            path,
            active,
            deleted,
        }
    }

    /// Status of a described object. A missing status field counts as active.
    pub fn status_of(&self, object: &WireObject) -> Status {
        let Some(raw) = get_path(object, self.path).and_then(|v| v.as_str()) else {
            return Status::Active;
        };
        if self.deleted.contains(&raw) {
            Status::Deleted
        } else if self.active.contains(&raw) {
            Status::Active
        } else {
            Status::Transitional(raw.to_string())
        }
    }
}

/// Status of an object under an optional rule; kinds without a status field
/// are active whenever found
pub fn status_of(rule: Option<&StatusRule>, object: &WireObject) -> Status {
    rule.map_or(Status::Active, |r| r.status_of(object))
}

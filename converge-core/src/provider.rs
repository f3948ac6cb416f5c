//! Provider - Trait abstracting the remote management API
//!
//! A `RemoteApi` is the only thing the reconciler talks to. It speaks wire
//! documents and remote keys; everything resource-specific (field names,
//! identity, status) lives in the `ResourceKind` driving it.

use async_trait::async_trait;

use crate::identity::RemoteKey;
use crate::tags::{TagDiff, Tags};
use crate::wire::WireObject;

/// Error codes that mean the addressed object does not exist
const NOT_FOUND_CODES: &[&str] = &[
    "NotFoundException",
    "ResourceNotFoundException",
    "ResourceNotFound",
    "NotFound",
    "WAFNonexistentItemException",
    "DoesNotExist",
    "NoSuchEntity",
];

/// Error codes that mean the call was throttled and may succeed later
const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
    "WAFStaleDataException",
];

/// Error returned by a remote API call, classified by error code
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("{code}: {message}")]
    Rejected { code: String, message: String },

    #[error("throttled: {0}")]
    Throttled(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl ApiError {
    /// Classify an SDK error by its service error code.
    ///
    /// Errors without a code never reached the service and are transport
    /// failures.
    pub fn classify(code: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            Some(c) if NOT_FOUND_CODES.contains(&c) => ApiError::NotFound(message),
            Some(c) if THROTTLING_CODES.contains(&c) => ApiError::Throttled(message),
            Some(c) => ApiError::Rejected {
                code: c.to_string(),
                message,
            },
            None => ApiError::Transport(message),
        }
    }

    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Everything a create call needs
#[derive(Debug, Clone, PartialEq)]
pub struct CreateRequest {
    /// Remote type name (e.g., "AWS::AppMesh::VirtualNode")
    pub type_name: String,
    /// Natural key of the new object; empty when the provider assigns the id
    pub key: RemoteKey,
    pub body: WireObject,
    /// Effective tags, defaults already merged in
    pub tags: Tags,
}

/// One page of a listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Summaries of the listed objects; each holds at least the key fields
    pub items: Vec<WireObject>,
    /// Marker of the next page, `None` on the last page
    pub next_marker: Option<String>,
}

/// Remote management API
///
/// Implementations own transport, authentication and retries. Every method
/// maps to exactly one logical remote call as seen by the reconciler.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Create an object and return the create response
    async fn create(&self, request: CreateRequest) -> ApiResult<WireObject>;

    /// Describe an object; `ApiError::NotFound` when it does not exist
    async fn get(&self, type_name: &str, key: &RemoteKey) -> ApiResult<WireObject>;

    /// Apply one update group's changed fields. `null` values clear a field.
    async fn update(
        &self,
        type_name: &str,
        key: &RemoteKey,
        group: &str,
        body: WireObject,
    ) -> ApiResult<()>;

    async fn delete(&self, type_name: &str, key: &RemoteKey) -> ApiResult<()>;

    async fn list_tags(&self, type_name: &str, key: &RemoteKey) -> ApiResult<Tags>;

    /// Add/overwrite and remove tags in a single call
    async fn update_tags(&self, type_name: &str, key: &RemoteKey, diff: &TagDiff)
    -> ApiResult<()>;

    async fn list_page(&self, type_name: &str, marker: Option<&str>) -> ApiResult<Page>;
}

//! Converge AWS Provider
//!
//! AWS resource kinds for the converge reconciler, plus a Cloud Control
//! transport to drive them.
//!
//! ## Module Structure
//!
//! - `schemas` - Resource kind definitions (App Mesh, Transfer, WAF, Lightsail)
//! - `cloudcontrol` - `RemoteApi` implementation over AWS Cloud Control

pub mod cloudcontrol;
pub mod schemas;

use std::sync::Arc;

use converge_core::provider::RemoteApi;
use converge_core::{Context, Reconciler, ReconcilerConfig, ResourceKind};
use log::info;
use serde::Deserialize;

pub use cloudcontrol::{AwsConfig, CloudControlApi, ModelMapping, WireCase};
pub use schemas::{all_kinds, kind};

/// Provider error
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("unknown resource kind '{0}'")]
    UnknownKind(String),

    #[error("invalid provider configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// Provider configuration as supplied by the host
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub aws: AwsConfig,
    pub reconciler: ReconcilerConfig,
}

impl ProviderConfig {
    pub fn from_json(text: &str) -> Result<Self, ProviderError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Entry point the host uses to reconcile AWS resources
pub struct AwsProvider {
    context: Context,
    kinds: Vec<ResourceKind>,
}

impl AwsProvider {
    /// Connect to Cloud Control with every kind's model mapping registered
    pub async fn new(config: ProviderConfig) -> Self {
        let mut api = CloudControlApi::new(&config.aws).await;
        for (type_name, mapping) in schemas::model_mappings() {
            api = api.with_mapping(type_name, mapping);
        }
        info!(
            "AWS provider ready (region: {})",
            config.aws.region.as_deref().unwrap_or("default chain")
        );
        Self::with_api(Arc::new(api), config.reconciler)
    }

    /// Use an already constructed remote (e.g. an in-memory one)
    pub fn with_api(api: Arc<dyn RemoteApi>, config: ReconcilerConfig) -> Self {
        Self {
            context: Context::new(api).with_config(config),
            kinds: all_kinds(),
        }
    }

    pub fn name(&self) -> &'static str {
        "aws"
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn kinds(&self) -> &[ResourceKind] {
        &self.kinds
    }

    /// Reconciler for one resource kind
    pub fn reconciler(&self, kind_name: &str) -> Result<Reconciler, ProviderError> {
        self.kinds
            .iter()
            .find(|k| k.name == kind_name)
            .cloned()
            .map(Reconciler::new)
            .ok_or_else(|| ProviderError::UnknownKind(kind_name.to_string()))
    }
}

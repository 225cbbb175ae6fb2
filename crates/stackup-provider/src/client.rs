//! Remote resource client trait
//!
//! One implementation per resource kind. The convergence engine only talks to
//! this trait, so adding a kind never touches engine logic.

use crate::error::ProviderResult;
use serde::{Deserialize, Serialize};
use stackup_core::{Attributes, ResourceDescriptor, ResourceId, ResourceKind};
use std::collections::BTreeMap;

/// Whether a kind can change attributes without being recreated.
/// A static property of the kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    InPlace,
    Immutable,
}

/// What the provider reports about an existing resource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteObject {
    /// Remote-assigned identifier.
    pub identifier: String,
    pub attributes: Attributes,
    /// Values other resources may reference, e.g. `url` or `arn`.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

impl RemoteObject {
    /// True when every desired attribute matches the remote value.
    /// Keys only present remotely (provider-computed) are ignored.
    pub fn matches(&self, desired: &Attributes) -> bool {
        desired
            .iter()
            .all(|(k, v)| self.attributes.get(k) == Some(v))
    }

    /// Desired keys whose remote value differs.
    pub fn drifted_keys(&self, desired: &Attributes) -> Vec<String> {
        desired
            .iter()
            .filter(|(k, v)| self.attributes.get(*k) != Some(*v))
            .map(|(k, _)| k.clone())
            .collect()
    }
}

/// Account-level values used to derive identifiers and outputs.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderContext {
    pub account_id: String,
    pub region: String,
    pub partition: String,
    /// Host that serves the container registry, e.g. `123.registry.eu-west-1.example.com`.
    pub registry_host: String,
    /// Domain hosted services are published under.
    pub service_domain: String,
}

impl Default for ProviderContext {
    fn default() -> Self {
        Self {
            account_id: "000000000000".into(),
            region: "us-east-1".into(),
            partition: "stackup".into(),
            registry_host: "registry.local".into(),
            service_domain: "services.local".into(),
        }
    }
}

impl ProviderContext {
    pub fn role_arn(&self, name: &str) -> String {
        format!("arn:{}:iam::{}:role/{}", self.partition, self.account_id, name)
    }

    pub fn resource_arn(&self, service: &str, resource: &str) -> String {
        format!(
            "arn:{}:{}:{}:{}:{}",
            self.partition, service, self.region, self.account_id, resource
        )
    }

    pub fn repository_url(&self, repository: &str) -> String {
        format!("{}/{}", self.registry_host, repository)
    }

    pub fn service_host(&self, name: &str) -> String {
        format!("{}.{}.{}", name, self.region, self.service_domain)
    }
}

/// Create/read/update/destroy for one resource kind.
#[async_trait::async_trait]
pub trait ResourceClient: Send + Sync {
    fn kind(&self) -> ResourceKind;

    fn update_policy(&self) -> UpdatePolicy;

    /// Check kind-specific required attributes before any remote call.
    fn validate(&self, _descriptor: &ResourceDescriptor) -> ProviderResult<()> {
        Ok(())
    }

    /// Look the resource up. `Ok(None)` when it does not exist remotely.
    async fn read(&self, id: &ResourceId) -> ProviderResult<Option<RemoteObject>>;

    /// Create from a descriptor whose attributes are fully rendered.
    async fn create(&self, descriptor: &ResourceDescriptor) -> ProviderResult<RemoteObject>;

    async fn update(
        &self,
        identifier: &str,
        descriptor: &ResourceDescriptor,
    ) -> ProviderResult<RemoteObject>;

    /// Remove the resource. Returns `NotFound` if it is already gone.
    async fn destroy(&self, identifier: &str) -> ProviderResult<()>;
}

//! Lifecycle policy - image retention rules attached to a registry.

use super::{request, require, to_remote};
use crate::client::{RemoteObject, ResourceClient, UpdatePolicy};
use crate::control_plane::ControlPlane;
use crate::error::{ProviderError, ProviderResult};
use stackup_core::{ResourceDescriptor, ResourceId, ResourceKind};
use std::sync::Arc;

const COLLECTION: &str = "lifecycle-policies";

pub struct LifecyclePolicyClient {
    api: Arc<dyn ControlPlane>,
}

impl LifecyclePolicyClient {
    pub fn new(api: Arc<dyn ControlPlane>) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl ResourceClient for LifecyclePolicyClient {
    fn kind(&self) -> ResourceKind {
        ResourceKind::lifecycle_policy()
    }

    fn update_policy(&self) -> UpdatePolicy {
        UpdatePolicy::InPlace
    }

    fn validate(&self, descriptor: &ResourceDescriptor) -> ProviderResult<()> {
        require(descriptor, &["registry", "rules"])?;
        match descriptor.attributes.get("rules") {
            Some(serde_json::Value::Array(rules)) if !rules.is_empty() => Ok(()),
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Ok(()),
            _ => Err(ProviderError::validation(format!(
                "{}: 'rules' must be a non-empty list or policy document",
                descriptor.id
            ))),
        }
    }

    async fn read(&self, id: &ResourceId) -> ProviderResult<Option<RemoteObject>> {
        Ok(self
            .api
            .get(COLLECTION, &id.name)
            .await?
            .map(|o| to_remote(o, |_| Vec::new())))
    }

    async fn create(&self, descriptor: &ResourceDescriptor) -> ProviderResult<RemoteObject> {
        let object = self.api.create(COLLECTION, &request(descriptor)).await?;
        Ok(to_remote(object, |_| Vec::new()))
    }

    async fn update(
        &self,
        identifier: &str,
        descriptor: &ResourceDescriptor,
    ) -> ProviderResult<RemoteObject> {
        let object = self
            .api
            .update(COLLECTION, identifier, &request(descriptor))
            .await?;
        Ok(to_remote(object, |_| Vec::new()))
    }

    async fn destroy(&self, identifier: &str) -> ProviderResult<()> {
        self.api.delete(COLLECTION, identifier).await
    }
}

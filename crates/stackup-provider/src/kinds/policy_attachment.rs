//! Binds a managed policy to a role. Re-pointing means a new attachment.

use super::{request, require, to_remote};
use crate::client::{RemoteObject, ResourceClient, UpdatePolicy};
use crate::control_plane::ControlPlane;
use crate::error::ProviderResult;
use stackup_core::{ResourceDescriptor, ResourceId, ResourceKind};
use std::sync::Arc;

const COLLECTION: &str = "role-policy-attachments";

pub struct PolicyAttachmentClient {
    api: Arc<dyn ControlPlane>,
}

impl PolicyAttachmentClient {
    pub fn new(api: Arc<dyn ControlPlane>) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl ResourceClient for PolicyAttachmentClient {
    fn kind(&self) -> ResourceKind {
        ResourceKind::policy_attachment()
    }

    fn update_policy(&self) -> UpdatePolicy {
        UpdatePolicy::Immutable
    }

    fn validate(&self, descriptor: &ResourceDescriptor) -> ProviderResult<()> {
        require(descriptor, &["role", "policy"])
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

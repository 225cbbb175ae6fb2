//! Access role - an identity services assume, with a trust document.

use super::{request, require, to_remote};
use crate::client::{ProviderContext, RemoteObject, ResourceClient, UpdatePolicy};
use crate::control_plane::{ApiObject, ControlPlane};
use crate::error::ProviderResult;
use stackup_core::{ResourceDescriptor, ResourceId, ResourceKind};
use std::sync::Arc;

const COLLECTION: &str = "roles";

pub struct AccessRoleClient {
    api: Arc<dyn ControlPlane>,
    ctx: ProviderContext,
}

impl AccessRoleClient {
    pub fn new(api: Arc<dyn ControlPlane>, ctx: ProviderContext) -> Self {
        Self { api, ctx }
    }

    fn remote(&self, object: ApiObject) -> RemoteObject {
        let arn = self.ctx.role_arn(&object.name);
        let name = object.name.clone();
        to_remote(object, |_| vec![("arn", arn), ("name", name)])
    }
}

#[async_trait::async_trait]
impl ResourceClient for AccessRoleClient {
    fn kind(&self) -> ResourceKind {
        ResourceKind::access_role()
    }

    fn update_policy(&self) -> UpdatePolicy {
        UpdatePolicy::InPlace
    }

    fn validate(&self, descriptor: &ResourceDescriptor) -> ProviderResult<()> {
        require(descriptor, &["trust"])
    }

    async fn read(&self, id: &ResourceId) -> ProviderResult<Option<RemoteObject>> {
        Ok(self
            .api
            .get(COLLECTION, &id.name)
            .await?
            .map(|o| self.remote(o)))
    }

    async fn create(&self, descriptor: &ResourceDescriptor) -> ProviderResult<RemoteObject> {
        let object = self.api.create(COLLECTION, &request(descriptor)).await?;
        Ok(self.remote(object))
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
        Ok(self.remote(object))
    }

    async fn destroy(&self, identifier: &str) -> ProviderResult<()> {
        self.api.delete(COLLECTION, identifier).await
    }
}

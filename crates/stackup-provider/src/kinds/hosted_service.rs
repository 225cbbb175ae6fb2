//! Hosted container service - runs the published image and exposes a URL.

use super::{attr_str, request, require, to_remote};
use crate::client::{ProviderContext, RemoteObject, ResourceClient, UpdatePolicy};
use crate::control_plane::{ApiObject, ControlPlane};
use crate::error::{ProviderError, ProviderResult};
use stackup_core::{ResourceDescriptor, ResourceId, ResourceKind};
use std::sync::Arc;

const COLLECTION: &str = "services";

pub struct HostedServiceClient {
    api: Arc<dyn ControlPlane>,
    ctx: ProviderContext,
}

impl HostedServiceClient {
    pub fn new(api: Arc<dyn ControlPlane>, ctx: ProviderContext) -> Self {
        Self { api, ctx }
    }

    fn remote(&self, object: ApiObject) -> RemoteObject {
        // The backend may report its own URL; otherwise derive one.
        let url = format!("https://{}", self.ctx.service_host(&object.name));
        let arn = self
            .ctx
            .resource_arn("service", &format!("service/{}", object.name));
        to_remote(object, |_| vec![("url", url), ("arn", arn)])
    }
}

#[async_trait::async_trait]
impl ResourceClient for HostedServiceClient {
    fn kind(&self) -> ResourceKind {
        ResourceKind::hosted_service()
    }

    fn update_policy(&self) -> UpdatePolicy {
        UpdatePolicy::InPlace
    }

    fn validate(&self, descriptor: &ResourceDescriptor) -> ProviderResult<()> {
        require(descriptor, &["image"])?;
        if let Some(port) = descriptor.attributes.get("port") {
            let ok = port.as_u64().map(|p| (1..=65535).contains(&p)).unwrap_or(false);
            if !ok {
                return Err(ProviderError::validation(format!(
                    "{}: port must be between 1 and 65535",
                    descriptor.id
                )));
            }
        }
        match attr_str(descriptor, "image") {
            Some(image) if !image.trim().is_empty() => Ok(()),
            _ => Err(ProviderError::validation(format!(
                "{}: image must be a non-empty reference",
                descriptor.id
            ))),
        }
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

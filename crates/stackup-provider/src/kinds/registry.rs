//! Container registry - a named image repository.
//!
//! The repository name cannot change after creation.

use super::{attr_str, request, require, to_remote};
use crate::client::{ProviderContext, RemoteObject, ResourceClient, UpdatePolicy};
use crate::control_plane::{ApiObject, ControlPlane};
use crate::error::ProviderResult;
use stackup_core::{ResourceDescriptor, ResourceId, ResourceKind};
use std::sync::Arc;

const COLLECTION: &str = "registries";

pub struct RegistryClient {
    api: Arc<dyn ControlPlane>,
    ctx: ProviderContext,
}

impl RegistryClient {
    pub fn new(api: Arc<dyn ControlPlane>, ctx: ProviderContext) -> Self {
        Self { api, ctx }
    }

    fn remote(&self, object: ApiObject) -> RemoteObject {
        let repository = object
            .attributes
            .get("repository")
            .and_then(|v| v.as_str())
            .unwrap_or(&object.name)
            .to_string();
        let url = self.ctx.repository_url(&repository);
        let arn = self
            .ctx
            .resource_arn("registry", &format!("repository/{}", repository));
        to_remote(object, |_| vec![("url", url), ("arn", arn), ("repository", repository)])
    }
}

#[async_trait::async_trait]
impl ResourceClient for RegistryClient {
    fn kind(&self) -> ResourceKind {
        ResourceKind::registry()
    }

    fn update_policy(&self) -> UpdatePolicy {
        UpdatePolicy::Immutable
    }

    fn validate(&self, descriptor: &ResourceDescriptor) -> ProviderResult<()> {
        require(descriptor, &["repository"])?;
        if let Some(repo) = attr_str(descriptor, "repository") {
            let valid = !repo.is_empty()
                && repo
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "-_./".contains(c));
            if !valid {
                return Err(crate::error::ProviderError::validation(format!(
                    "{}: repository '{}' must be lowercase alphanumerics, '-', '_', '.' or '/'",
                    descriptor.id, repo
                )));
            }
        }
        Ok(())
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

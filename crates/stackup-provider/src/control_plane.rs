//! Control-plane backend - the provider's generic resource API.
//!
//! Per-kind clients translate descriptors into collection calls here. Objects
//! are looked up by name within a collection and mutated by their id.

use crate::error::ProviderResult;
use serde::{Deserialize, Serialize};
use stackup_core::Attributes;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiObject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

/// Request body for create and update.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiRequest {
    pub name: String,
    pub attributes: Attributes,
}

#[async_trait::async_trait]
pub trait ControlPlane: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, collection: &str, name: &str) -> ProviderResult<Option<ApiObject>>;

    async fn create(&self, collection: &str, request: &ApiRequest) -> ProviderResult<ApiObject>;

    async fn update(
        &self,
        collection: &str,
        id: &str,
        request: &ApiRequest,
    ) -> ProviderResult<ApiObject>;

    async fn delete(&self, collection: &str, id: &str) -> ProviderResult<()>;
}

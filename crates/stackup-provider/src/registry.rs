//! Client registry - resource kind to client lookup.

use crate::client::{ProviderContext, ResourceClient};
use crate::control_plane::ControlPlane;
use crate::kinds;
use stackup_core::ResourceKind;
use std::collections::HashMap;
use std::sync::Arc;

pub struct ClientRegistry {
    clients: HashMap<ResourceKind, Arc<dyn ResourceClient>>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    /// All five standard kinds backed by one control plane.
    pub fn standard(api: Arc<dyn ControlPlane>, ctx: ProviderContext) -> Self {
        let mut registry = Self::new();
        registry.register(kinds::RegistryClient::new(api.clone(), ctx.clone()));
        registry.register(kinds::LifecyclePolicyClient::new(api.clone()));
        registry.register(kinds::AccessRoleClient::new(api.clone(), ctx.clone()));
        registry.register(kinds::PolicyAttachmentClient::new(api.clone()));
        registry.register(kinds::HostedServiceClient::new(api, ctx));
        registry
    }

    /// Register a client. Replaces any existing client for the same kind.
    pub fn register(&mut self, client: impl ResourceClient + 'static) {
        self.register_arc(Arc::new(client));
    }

    pub fn register_arc(&mut self, client: Arc<dyn ResourceClient>) {
        self.clients.insert(client.kind(), client);
    }

    pub fn get(&self, kind: &ResourceKind) -> Option<Arc<dyn ResourceClient>> {
        self.clients.get(kind).cloned()
    }

    pub fn contains(&self, kind: &ResourceKind) -> bool {
        self.clients.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<ResourceKind> {
        let mut kinds: Vec<_> = self.clients.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

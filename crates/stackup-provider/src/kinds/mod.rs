//! Per-kind resource clients
//!
//! Each kind is a self-contained module implementing `ResourceClient` on top of
//! a shared `ControlPlane`. To add a kind: create the file, implement the
//! trait, register it in `ClientRegistry::standard()`.

pub mod access_role;
pub mod hosted_service;
pub mod lifecycle_policy;
pub mod policy_attachment;
pub mod registry;

pub use access_role::AccessRoleClient;
pub use hosted_service::HostedServiceClient;
pub use lifecycle_policy::LifecyclePolicyClient;
pub use policy_attachment::PolicyAttachmentClient;
pub use registry::RegistryClient;

use crate::client::RemoteObject;
use crate::control_plane::{ApiObject, ApiRequest};
use crate::error::{ProviderError, ProviderResult};
use stackup_core::{template, ResourceDescriptor};

/// Fail unless every key is present, non-null and fully rendered.
pub(crate) fn require(descriptor: &ResourceDescriptor, keys: &[&str]) -> ProviderResult<()> {
    for key in keys {
        match descriptor.attributes.get(*key) {
            None | Some(serde_json::Value::Null) => {
                return Err(ProviderError::validation(format!(
                    "{}: missing required attribute '{}'",
                    descriptor.id, key
                )));
            }
            Some(v) if template::has_placeholders(v) => {
                return Err(ProviderError::validation(format!(
                    "{}: attribute '{}' has unresolved placeholders",
                    descriptor.id, key
                )));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// String attribute, if present.
pub(crate) fn attr_str<'a>(descriptor: &'a ResourceDescriptor, key: &str) -> Option<&'a str> {
    descriptor.attributes.get(key).and_then(|v| v.as_str())
}

pub(crate) fn request(descriptor: &ResourceDescriptor) -> ApiRequest {
    ApiRequest {
        name: descriptor.id.name.clone(),
        attributes: descriptor.attributes.clone(),
    }
}

/// Control-plane object as seen by the engine; `derive` adds kind-specific outputs.
pub(crate) fn to_remote(
    object: ApiObject,
    derive: impl FnOnce(&ApiObject) -> Vec<(&'static str, String)>,
) -> RemoteObject {
    let mut outputs = object.outputs.clone();
    for (key, value) in derive(&object) {
        outputs.entry(key.to_string()).or_insert(value);
    }
    outputs
        .entry("id".to_string())
        .or_insert_with(|| object.id.clone());
    RemoteObject {
        identifier: object.id,
        attributes: object.attributes,
        outputs,
    }
}

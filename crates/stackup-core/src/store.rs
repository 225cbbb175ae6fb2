//! Descriptor store - the declared desired state for one run.
//!
//! Descriptors are immutable once loaded. A changed declaration replaces the
//! store wholesale via [`DescriptorStore::replace`].

use crate::error::{Error, Result};
use crate::types::{ResourceDescriptor, ResourceId};
use std::collections::HashMap;

#[derive(Clone, Debug, Default)]
pub struct DescriptorStore {
    /// Declaration order is kept; the resolver uses it as a tie-break.
    descriptors: Vec<ResourceDescriptor>,
    index: HashMap<ResourceId, usize>,
}

impl DescriptorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a validated store from descriptors in declaration order.
    pub fn from_descriptors(descriptors: Vec<ResourceDescriptor>) -> Result<Self> {
        let mut index = HashMap::with_capacity(descriptors.len());
        for (i, d) in descriptors.iter().enumerate() {
            if index.insert(d.id.clone(), i).is_some() {
                return Err(Error::DuplicateResource(d.id.clone()));
            }
        }

        for d in &descriptors {
            for dep in d.dependencies() {
                if !index.contains_key(&dep) {
                    return Err(Error::UnknownDependency {
                        resource: d.id.clone(),
                        missing: dep,
                    });
                }
            }
            if let Some(hc) = &d.health_check {
                if !d.id.kind.is_hosted_service() {
                    return Err(Error::invalid(
                        &d.id,
                        "health checks are only valid on hosted_service resources",
                    ));
                }
                hc.validate(&d.id)?;
            }
        }

        Ok(Self { descriptors, index })
    }

    /// Swap in a freshly loaded declaration.
    pub fn replace(&mut self, other: DescriptorStore) {
        *self = other;
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ResourceDescriptor> {
        self.index.get(id).map(|&i| &self.descriptors[i])
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    /// Position in declaration order.
    pub fn position(&self, id: &ResourceId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.descriptors.iter()
    }

    pub fn ids(&self) -> Vec<&ResourceId> {
        self.descriptors.iter().map(|d| &d.id).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Hosted services that carry a health check.
    pub fn health_checked(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.descriptors.iter().filter(|d| d.health_check.is_some())
    }
}

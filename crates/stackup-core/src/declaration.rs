//! Stack declaration - TOML resource blocks plus variable bindings.

use crate::error::{Error, Result};
use crate::store::DescriptorStore;
use crate::template::{self, Token};
use crate::types::{Attributes, HealthCheckSpec, ResourceDescriptor, ResourceId, ResourceKind};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Where the published artifact goes.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ArtifactBinding {
    /// Registry resource that receives the image.
    pub registry: ResourceId,
    /// Default image reference, overridable per run.
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDeclaration {
    #[serde(default)]
    variables: BTreeMap<String, String>,
    #[serde(default)]
    artifact: Option<ArtifactBinding>,
    #[serde(default, rename = "resource")]
    resources: Vec<RawResource>,
}

#[derive(Debug, Deserialize)]
struct RawResource {
    kind: String,
    name: String,
    #[serde(default)]
    attributes: Attributes,
    #[serde(default)]
    depends_on: Vec<ResourceId>,
    #[serde(default)]
    health_check: Option<HealthCheckSpec>,
}

/// A loaded, validated stack.
#[derive(Clone, Debug)]
pub struct Stack {
    pub store: DescriptorStore,
    pub artifact: Option<ArtifactBinding>,
}

impl Stack {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let stack = Self::from_toml_str(&content)?;
        tracing::info!(
            path = %path.display(),
            resources = stack.store.len(),
            "loaded stack declaration"
        );
        Ok(stack)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: RawDeclaration = toml::from_str(content)?;

        let mut descriptors = Vec::with_capacity(raw.resources.len());
        for r in raw.resources {
            let id = ResourceId::new(ResourceKind::new(r.kind), r.name);
            let attributes = substitute_variables(&id, &r.attributes, &raw.variables)?;
            descriptors.push(ResourceDescriptor {
                id,
                attributes,
                depends_on: r.depends_on,
                health_check: r.health_check,
            });
        }

        let store = DescriptorStore::from_descriptors(descriptors)?;

        if let Some(binding) = &raw.artifact {
            match store.get(&binding.registry) {
                Some(d) if d.id.kind.as_str() == ResourceKind::REGISTRY => {}
                Some(d) => {
                    return Err(Error::invalid(
                        &d.id,
                        "artifact target must be a registry resource",
                    ))
                }
                None => return Err(Error::UnknownTarget(binding.registry.to_string())),
            }
        }

        Ok(Self {
            store,
            artifact: raw.artifact,
        })
    }
}

fn substitute_variables(
    id: &ResourceId,
    attributes: &Attributes,
    variables: &BTreeMap<String, String>,
) -> Result<Attributes> {
    let mut resolve = |token: &Token| -> Result<Option<String>> {
        match token {
            Token::Variable(name) => variables
                .get(name)
                .cloned()
                .map(Some)
                .ok_or_else(|| Error::UnknownVariable {
                    resource: id.clone(),
                    name: name.clone(),
                }),
            Token::Invalid(raw) => Err(Error::invalid(id, format!("bad placeholder '${{{}}}'", raw))),
            _ => Ok(None),
        }
    };

    let mut out = Attributes::new();
    for (k, v) in attributes {
        out.insert(k.clone(), template::render_value(v, &mut resolve)?);
    }
    Ok(out)
}

//! Artifact publication - push an externally built image to the registry.
//!
//! The image is never built here. Publication takes a local reference (tag or
//! digest) and the registry address, and yields the pushed reference that
//! `${artifact.image}` renders to.

use crate::error::{DeployError, DeployResult};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PublishedArtifact {
    /// Reference the caller supplied.
    pub source: String,
    /// Reference inside the registry.
    pub image: String,
}

impl PublishedArtifact {
    /// Value for `${artifact.FIELD}`.
    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            "image" => Some(self.image.clone()),
            "source" => Some(self.source.clone()),
            _ => None,
        }
    }
}

/// Where `artifact_ref` lands inside `registry_address`. Keeps the digest or
/// tag; a bare name is published as `latest`.
pub fn target_reference(artifact_ref: &str, registry_address: &str) -> String {
    let registry = registry_address.trim_end_matches('/');
    if let Some((_, digest)) = artifact_ref.split_once('@') {
        return format!("{}@{}", registry, digest);
    }
    let last = artifact_ref.rsplit('/').next().unwrap_or(artifact_ref);
    match last.split_once(':') {
        Some((_, tag)) if !tag.is_empty() => format!("{}:{}", registry, tag),
        _ => format!("{}:latest", registry),
    }
}

#[async_trait::async_trait]
pub trait ArtifactPublisher: Send + Sync {
    async fn publish(
        &self,
        artifact_ref: &str,
        registry_address: &str,
    ) -> DeployResult<PublishedArtifact>;
}

/// Runs `<program> tag` then `<program> push`, e.g. docker or podman.
pub struct CommandPublisher {
    program: String,
}

impl CommandPublisher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> DeployResult<()> {
        debug!("{} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| DeployError::Publish {
                message: format!("failed to run {}: {}", self.program, e),
                output: None,
            })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Err(DeployError::Publish {
            message: format!(
                "{} {} exited with {}",
                self.program,
                args.first().copied().unwrap_or_default(),
                output.status
            ),
            output: Some(if stderr.is_empty() { stdout } else { stderr }),
        })
    }
}

impl Default for CommandPublisher {
    fn default() -> Self {
        Self::new("docker")
    }
}

#[async_trait::async_trait]
impl ArtifactPublisher for CommandPublisher {
    async fn publish(
        &self,
        artifact_ref: &str,
        registry_address: &str,
    ) -> DeployResult<PublishedArtifact> {
        let target = target_reference(artifact_ref, registry_address);
        info!(source = artifact_ref, target = %target, "publishing artifact");
        // A digest cannot be re-tagged; push it as-is
        if !target.contains('@') {
            self.run(&["tag", artifact_ref, &target]).await?;
        }
        self.run(&["push", &target]).await?;
        Ok(PublishedArtifact {
            source: artifact_ref.to_string(),
            image: target,
        })
    }
}

/// Records publications without side effects.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, String)>>,
    fail_with: Option<String>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every publish fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            fail_with: Some(message.into()),
        }
    }

    /// (source, registry address) pairs published so far.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl ArtifactPublisher for RecordingPublisher {
    async fn publish(
        &self,
        artifact_ref: &str,
        registry_address: &str,
    ) -> DeployResult<PublishedArtifact> {
        if let Some(message) = &self.fail_with {
            return Err(DeployError::Publish {
                message: message.clone(),
                output: Some("denied: requested access to the resource is denied".into()),
            });
        }
        if let Ok(mut p) = self.published.lock() {
            p.push((artifact_ref.to_string(), registry_address.to_string()));
        }
        Ok(PublishedArtifact {
            source: artifact_ref.to_string(),
            image: target_reference(artifact_ref, registry_address),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_keeps_tag_or_digest() {
        assert_eq!(
            target_reference("web:1.4.2", "registry.local/web"),
            "registry.local/web:1.4.2"
        );
        assert_eq!(
            target_reference("localhost:5000/web", "registry.local/web/"),
            "registry.local/web:latest"
        );
        assert_eq!(
            target_reference("web@sha256:abc", "registry.local/web"),
            "registry.local/web@sha256:abc"
        );
    }

    #[tokio::test]
    async fn recording_publisher_records() {
        let p = RecordingPublisher::new();
        let out = p.publish("web:2", "registry.local/web").await.unwrap();
        assert_eq!(out.image, "registry.local/web:2");
        assert_eq!(out.field("image").as_deref(), Some("registry.local/web:2"));
        assert!(out.field("digest").is_none());
        assert_eq!(p.published().len(), 1);
    }

    #[tokio::test]
    async fn missing_program_is_publish_error() {
        let p = CommandPublisher::new("stackup-no-such-container-tool");
        let err = p.publish("web:1", "registry.local/web").await.unwrap_err();
        assert!(matches!(err, DeployError::Publish { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_program_keeps_output() {
        let p = CommandPublisher::new("false");
        let err = p.publish("web:1", "registry.local/web").await.unwrap_err();
        assert!(err.to_string().contains("false tag"));
    }
}

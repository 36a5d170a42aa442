//! Build and artifact backend.
//!
//! Images live in environment-scoped namespaces. Building produces
//! `<environment>/<app>:<revision>`; promotion re-tags an existing image
//! into another namespace without rebuilding it.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{AppName, EnvironmentName, ImageRef, RevisionId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub app: AppName,
    pub environment: EnvironmentName,
    pub revision: RevisionId,
}

impl BuildRequest {
    pub fn image(&self) -> ImageRef {
        ImageRef::new(
            self.environment.clone(),
            self.app.clone(),
            self.revision.clone(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagOutcome {
    Created,
    /// The target already pointed at the same artifact.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("image {0} not found")]
    NotFound(ImageRef),

    #[error("image {0} already exists with different content")]
    TagConflict(ImageRef),

    #[error("build of {image} failed: {reason}")]
    BuildFailed { image: ImageRef, reason: String },

    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build(&self, request: &BuildRequest) -> Result<ImageRef, RegistryError>;
}

#[async_trait]
pub trait ImageRegistry: Send + Sync {
    async fn exists(&self, image: &ImageRef) -> Result<bool, RegistryError>;

    /// Make `target` point at the artifact behind `source`.
    async fn tag(&self, source: &ImageRef, target: &ImageRef) -> Result<TagOutcome, RegistryError>;

    async fn list_tags(
        &self,
        namespace: &EnvironmentName,
        repository: &AppName,
    ) -> Result<Vec<RevisionId>, RegistryError>;
}

//! In-memory image registry and builder.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::domain::{AppName, EnvironmentName, ImageRef, RevisionId};
use crate::identity::hex;
use crate::ports::{BuildRequest, ImageBuilder, ImageRegistry, RegistryError, TagOutcome};

/// One stored tag and the digest of the artifact it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredImage {
    pub image: ImageRef,
    pub digest: String,
}

/// Registry that keeps tags in a map.
///
/// A build derives the artifact digest from the application and revision,
/// so building the same revision twice yields the same artifact.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    images: Mutex<BTreeMap<ImageRef, String>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_images(images: impl IntoIterator<Item = StoredImage>) -> Self {
        let images = images
            .into_iter()
            .map(|stored| (stored.image, stored.digest))
            .collect();
        Self {
            images: Mutex::new(images),
        }
    }

    pub fn images(&self) -> Vec<StoredImage> {
        self.images
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(image, digest)| StoredImage {
                image: image.clone(),
                digest: digest.clone(),
            })
            .collect()
    }

    pub fn digest_of(&self, image: &ImageRef) -> Option<String> {
        self.images
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(image)
            .cloned()
    }

    fn digest_for(app: &AppName, revision: &RevisionId) -> String {
        let mut hasher = Sha256::new();
        hasher.update(app.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(revision.as_str().as_bytes());
        format!("sha256:{}", hex(&hasher.finalize()))
    }
}

#[async_trait]
impl ImageBuilder for InMemoryRegistry {
    async fn build(&self, request: &BuildRequest) -> Result<ImageRef, RegistryError> {
        let image = request.image();
        let digest = Self::digest_for(&request.app, &request.revision);
        debug!(image = %image, digest = %digest, "built image");
        self.images
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(image.clone(), digest);
        Ok(image)
    }
}

#[async_trait]
impl ImageRegistry for InMemoryRegistry {
    async fn exists(&self, image: &ImageRef) -> Result<bool, RegistryError> {
        Ok(self
            .images
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(image))
    }

    async fn tag(&self, source: &ImageRef, target: &ImageRef) -> Result<TagOutcome, RegistryError> {
        let mut images = self.images.lock().unwrap_or_else(PoisonError::into_inner);
        let digest = images
            .get(source)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(source.clone()))?;

        match images.get(target) {
            Some(existing) if *existing == digest => Ok(TagOutcome::Unchanged),
            Some(_) => Err(RegistryError::TagConflict(target.clone())),
            None => {
                images.insert(target.clone(), digest);
                Ok(TagOutcome::Created)
            }
        }
    }

    async fn list_tags(
        &self,
        namespace: &EnvironmentName,
        repository: &AppName,
    ) -> Result<Vec<RevisionId>, RegistryError> {
        Ok(self
            .images
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|image| &image.namespace == namespace && &image.repository == repository)
            .map(|image| image.tag.clone())
            .collect())
    }
}

//! Serializable snapshot of the in-memory registry and platform.
//!
//! Lets a pipeline run and a later, separate promotion invocation share
//! the same simulated cluster through a state file.

use serde::{Deserialize, Serialize};

use super::memory_platform::InMemoryPlatform;
use super::memory_registry::{InMemoryRegistry, StoredImage};
use crate::domain::EnvironmentSlot;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    #[serde(default)]
    pub images: Vec<StoredImage>,
    #[serde(default)]
    pub slots: Vec<EnvironmentSlot>,
}

impl ClusterState {
    pub fn capture(registry: &InMemoryRegistry, platform: &InMemoryPlatform) -> Self {
        Self {
            images: registry.images(),
            slots: platform.all_slots(),
        }
    }

    pub fn into_parts(self) -> (InMemoryRegistry, InMemoryPlatform) {
        (
            InMemoryRegistry::from_images(self.images),
            InMemoryPlatform::from_slots(self.slots),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AppName, EnvironmentName, RevisionId};
    use crate::ports::{BuildRequest, DeploymentPlatform, ImageBuilder, ImageRegistry};

    #[tokio::test]
    async fn state_survives_json() {
        let registry = InMemoryRegistry::new();
        let platform = InMemoryPlatform::new();
        let request = BuildRequest {
            app: AppName::new("app").unwrap(),
            environment: EnvironmentName::new("dev").unwrap(),
            revision: RevisionId::parse("de7c044").unwrap(),
        };
        let image = registry.build(&request).await.unwrap();
        platform
            .create_deployment(&request.app, &request.environment, &image, 0)
            .await
            .unwrap();

        let json = serde_json::to_string(&ClusterState::capture(&registry, &platform)).unwrap();
        let (registry, platform) = serde_json::from_str::<ClusterState>(&json)
            .unwrap()
            .into_parts();

        assert!(registry.exists(&image).await.unwrap());
        let slot = platform
            .slot(&request.app, &request.environment)
            .await
            .unwrap();
        assert_eq!(slot.live_revision(), Some(&request.revision));
        assert_eq!(slot.generation, 1);
    }
}

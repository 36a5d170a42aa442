//! In-memory deployment platform.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{
    AppName, Deployment, EnvironmentName, EnvironmentSlot, ImageRef, Route, Service,
};
use crate::ports::{DeploymentPlatform, PlatformError, ResourceKind};

type SlotKey = (AppName, EnvironmentName);

/// Platform that keeps one [`EnvironmentSlot`] per `(app, environment)`.
///
/// Deletes of the resource kinds passed to [`InMemoryPlatform::fail_deletes`]
/// fail while the resource exists, which lets tests exercise cleanup
/// policies.
#[derive(Debug, Default)]
pub struct InMemoryPlatform {
    slots: Mutex<BTreeMap<SlotKey, EnvironmentSlot>>,
    failing_deletes: Mutex<HashSet<ResourceKind>>,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_slots(slots: impl IntoIterator<Item = EnvironmentSlot>) -> Self {
        let slots = slots
            .into_iter()
            .map(|slot| ((slot.app.clone(), slot.environment.clone()), slot))
            .collect();
        Self {
            slots: Mutex::new(slots),
            failing_deletes: Mutex::default(),
        }
    }

    /// Every slot, including empty ones.
    pub fn all_slots(&self) -> Vec<EnvironmentSlot> {
        self.lock().values().cloned().collect()
    }

    pub fn fail_deletes(&self, kinds: impl IntoIterator<Item = ResourceKind>) {
        self.failing_deletes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(kinds);
    }

    pub fn heal(&self) {
        self.failing_deletes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<SlotKey, EnvironmentSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn delete_fails(&self, kind: ResourceKind) -> bool {
        self.failing_deletes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&kind)
    }

    fn with_slot<T>(
        &self,
        app: &AppName,
        environment: &EnvironmentName,
        f: impl FnOnce(&mut EnvironmentSlot) -> T,
    ) -> T {
        let mut slots = self.lock();
        let slot = slots
            .entry((app.clone(), environment.clone()))
            .or_insert_with(|| EnvironmentSlot::empty(app.clone(), environment.clone()));
        f(slot)
    }
}

#[async_trait]
impl DeploymentPlatform for InMemoryPlatform {
    async fn slot(
        &self,
        app: &AppName,
        environment: &EnvironmentName,
    ) -> Result<EnvironmentSlot, PlatformError> {
        Ok(self
            .lock()
            .get(&(app.clone(), environment.clone()))
            .cloned()
            .unwrap_or_else(|| EnvironmentSlot::empty(app.clone(), environment.clone())))
    }

    async fn slots(
        &self,
        environment: Option<&EnvironmentName>,
    ) -> Result<Vec<EnvironmentSlot>, PlatformError> {
        Ok(self
            .lock()
            .values()
            .filter(|slot| slot.resource_count() > 0)
            .filter(|slot| environment.is_none_or(|env| &slot.environment == env))
            .cloned()
            .collect())
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        app: &AppName,
        environment: &EnvironmentName,
    ) -> Result<u64, PlatformError> {
        let fails = self.delete_fails(kind);
        self.with_slot(app, environment, |slot| {
            let present = match kind {
                ResourceKind::Deployment => slot.deployment.is_some(),
                ResourceKind::Service => slot.service.is_some(),
                ResourceKind::Route => slot.route.is_some(),
            };
            if !present {
                return Ok(slot.generation);
            }
            if fails {
                return Err(PlatformError::Failed {
                    kind,
                    app: app.clone(),
                    environment: environment.clone(),
                    reason: "injected delete failure".to_string(),
                });
            }
            match kind {
                ResourceKind::Deployment => slot.deployment = None,
                ResourceKind::Service => slot.service = None,
                ResourceKind::Route => slot.route = None,
            }
            slot.generation += 1;
            debug!(%app, %environment, %kind, generation = slot.generation, "deleted resource");
            Ok(slot.generation)
        })
    }

    async fn create_deployment(
        &self,
        app: &AppName,
        environment: &EnvironmentName,
        image: &ImageRef,
        expected_generation: u64,
    ) -> Result<Deployment, PlatformError> {
        self.with_slot(app, environment, |slot| {
            if slot.generation != expected_generation {
                return Err(PlatformError::Conflict {
                    app: app.clone(),
                    environment: environment.clone(),
                    expected: expected_generation,
                    actual: slot.generation,
                });
            }
            slot.generation += 1;
            let deployment = Deployment {
                app: app.clone(),
                environment: environment.clone(),
                image: image.clone(),
                generation: slot.generation,
                rolled_out: false,
            };
            slot.deployment = Some(deployment.clone());
            debug!(%app, %environment, %image, generation = slot.generation, "created deployment");
            Ok(deployment)
        })
    }

    async fn ensure_service(
        &self,
        app: &AppName,
        environment: &EnvironmentName,
    ) -> Result<bool, PlatformError> {
        Ok(self.with_slot(app, environment, |slot| {
            if slot.service.is_some() {
                return false;
            }
            slot.service = Some(Service {
                app: app.clone(),
                environment: environment.clone(),
            });
            slot.generation += 1;
            true
        }))
    }

    async fn ensure_route(
        &self,
        app: &AppName,
        environment: &EnvironmentName,
    ) -> Result<bool, PlatformError> {
        Ok(self.with_slot(app, environment, |slot| {
            if slot.route.is_some() {
                return false;
            }
            slot.route = Some(Route::for_app(app, environment));
            slot.generation += 1;
            true
        }))
    }

    async fn trigger_rollout(
        &self,
        app: &AppName,
        environment: &EnvironmentName,
    ) -> Result<u64, PlatformError> {
        self.with_slot(app, environment, |slot| {
            let deployment = slot
                .deployment
                .as_mut()
                .ok_or_else(|| PlatformError::NoDeployment {
                    app: app.clone(),
                    environment: environment.clone(),
                })?;
            deployment.rolled_out = true;
            slot.rollouts += 1;
            Ok(slot.rollouts)
        })
    }
}

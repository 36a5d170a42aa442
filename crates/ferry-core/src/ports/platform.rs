//! Deployment backend.
//!
//! The platform keeps one [`EnvironmentSlot`] per `(app, environment)`.
//! Deletes are idempotent and report the slot generation after the call;
//! creating a deployment requires the caller's view of that generation to
//! still be current.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{AppName, Deployment, EnvironmentName, EnvironmentSlot, ImageRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Deployment,
    Service,
    Route,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::Deployment => "deployment",
            ResourceKind::Service => "service",
            ResourceKind::Route => "route",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("{app} in {environment} changed concurrently (expected generation {expected}, found {actual})")]
    Conflict {
        app: AppName,
        environment: EnvironmentName,
        expected: u64,
        actual: u64,
    },

    #[error("no deployment of {app} in {environment}")]
    NoDeployment {
        app: AppName,
        environment: EnvironmentName,
    },

    #[error("{kind} operation for {app} in {environment} failed: {reason}")]
    Failed {
        kind: ResourceKind,
        app: AppName,
        environment: EnvironmentName,
        reason: String,
    },
}

#[async_trait]
pub trait DeploymentPlatform: Send + Sync {
    /// Current state of the slot; an empty slot if nothing was ever created.
    async fn slot(
        &self,
        app: &AppName,
        environment: &EnvironmentName,
    ) -> Result<EnvironmentSlot, PlatformError>;

    /// All non-empty slots, optionally restricted to one environment.
    async fn slots(
        &self,
        environment: Option<&EnvironmentName>,
    ) -> Result<Vec<EnvironmentSlot>, PlatformError>;

    async fn delete(
        &self,
        kind: ResourceKind,
        app: &AppName,
        environment: &EnvironmentName,
    ) -> Result<u64, PlatformError>;

    /// Create the deployment if the slot is still at `expected_generation`.
    async fn create_deployment(
        &self,
        app: &AppName,
        environment: &EnvironmentName,
        image: &ImageRef,
        expected_generation: u64,
    ) -> Result<Deployment, PlatformError>;

    /// Create the service if absent. Returns `true` if it was created.
    async fn ensure_service(
        &self,
        app: &AppName,
        environment: &EnvironmentName,
    ) -> Result<bool, PlatformError>;

    /// Create the route if absent. Returns `true` if it was created.
    async fn ensure_route(
        &self,
        app: &AppName,
        environment: &EnvironmentName,
    ) -> Result<bool, PlatformError>;

    /// Roll out the current deployment. Returns the slot's rollout count.
    async fn trigger_rollout(
        &self,
        app: &AppName,
        environment: &EnvironmentName,
    ) -> Result<u64, PlatformError>;
}

//! Environment model: artifacts and the resources live in one environment.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::names::{AppName, EnvironmentName};
use super::revision::RevisionId;

/// An environment-scoped artifact reference: `<namespace>/<repository>:<tag>`.
///
/// The namespace is the environment, the repository the application and the
/// tag the revision id, so the same revision promoted to another environment
/// differs only in its namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageRef {
    pub namespace: EnvironmentName,
    pub repository: AppName,
    pub tag: RevisionId,
}

impl ImageRef {
    pub fn new(namespace: EnvironmentName, repository: AppName, tag: RevisionId) -> Self {
        Self {
            namespace,
            repository,
            tag,
        }
    }

    /// The same repository and tag in another namespace.
    pub fn in_namespace(&self, namespace: EnvironmentName) -> Self {
        Self {
            namespace,
            ..self.clone()
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.repository, self.tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub app: AppName,
    pub environment: EnvironmentName,
    pub image: ImageRef,
    /// Slot generation at which this deployment was created.
    pub generation: u64,
    /// Set once a rollout was triggered for this deployment.
    #[serde(default)]
    pub rolled_out: bool,
}

impl Deployment {
    pub fn revision(&self) -> &RevisionId {
        &self.image.tag
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub app: AppName,
    pub environment: EnvironmentName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub app: AppName,
    pub environment: EnvironmentName,
    pub host: String,
}

impl Route {
    pub fn for_app(app: &AppName, environment: &EnvironmentName) -> Self {
        Self {
            app: app.clone(),
            environment: environment.clone(),
            host: format!("{app}-{environment}.apps.local"),
        }
    }
}

/// Everything the platform holds for one `(app, environment)` pair.
///
/// The slot can hold at most one deployment. Every mutation bumps
/// `generation`, which callers use for compare-and-swap replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSlot {
    pub app: AppName,
    pub environment: EnvironmentName,
    pub deployment: Option<Deployment>,
    pub service: Option<Service>,
    pub route: Option<Route>,
    /// Number of rollouts triggered in this slot over its lifetime.
    #[serde(default)]
    pub rollouts: u64,
    #[serde(default)]
    pub generation: u64,
}

impl EnvironmentSlot {
    pub fn empty(app: AppName, environment: EnvironmentName) -> Self {
        Self {
            app,
            environment,
            deployment: None,
            service: None,
            route: None,
            rollouts: 0,
            generation: 0,
        }
    }

    /// Number of live resources (deployment, service, route) in the slot.
    pub fn resource_count(&self) -> usize {
        usize::from(self.deployment.is_some())
            + usize::from(self.service.is_some())
            + usize::from(self.route.is_some())
    }

    pub fn live_revision(&self) -> Option<&RevisionId> {
        self.deployment.as_ref().map(Deployment::revision)
    }
}

//! Environment reconciliation.
//!
//! Brings one `(app, environment)` slot to "exactly one live deployment of
//! this image": remove the old deployment and its service, create the new
//! deployment with a compare-and-swap on the slot generation, make sure a
//! service and route exist, then trigger the rollout explicitly.
//!
//! Callers must hold the slot's [`SlotGuard`], which serializes concurrent
//! reconciliations of the same pair within a process.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::domain::{AppName, Deployment, EnvironmentName, ImageRef, RevisionId};
use crate::ports::{DeploymentPlatform, PlatformError, ResourceKind};

/// How many times a deployment is recreated after a generation conflict.
pub const MAX_CAS_ATTEMPTS: usize = 3;

/// What to do when removing stale resources fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupPolicy {
    /// Abort the reconciliation.
    Strict,
    /// Log, record a warning and carry on.
    #[default]
    BestEffort,
}

/// What happens to an existing route when a deployment is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutePolicy {
    /// Keep the route so external consumers keep their address.
    #[default]
    Preserve,
    /// Delete and create it again with the new deployment.
    Recreate,
}

impl FromStr for CleanupPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(CleanupPolicy::Strict),
            "best-effort" => Ok(CleanupPolicy::BestEffort),
            other => Err(format!("unknown cleanup policy '{other}' (strict, best-effort)")),
        }
    }
}

impl FromStr for RoutePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preserve" => Ok(RoutePolicy::Preserve),
            "recreate" => Ok(RoutePolicy::Recreate),
            other => Err(format!("unknown route policy '{other}' (preserve, recreate)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupWarning {
    pub kind: String,
    pub error: String,
}

impl fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not remove {}: {}", self.kind, self.error)
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("cleanup of stale {kind} failed: {source}")]
    Cleanup {
        kind: ResourceKind,
        #[source]
        source: PlatformError,
    },

    #[error("{app} in {environment} kept changing; gave up after {attempts} attempts")]
    Contended {
        app: AppName,
        environment: EnvironmentName,
        attempts: usize,
    },

    #[error("image {image} does not belong to {app} in {environment}")]
    ForeignImage {
        image: ImageRef,
        app: AppName,
        environment: EnvironmentName,
    },

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub deployment: Deployment,
    /// Revision that was live before, if any.
    pub replaced: Option<RevisionId>,
    pub cleanup_warnings: Vec<CleanupWarning>,
    pub service_created: bool,
    pub route_created: bool,
    pub rollouts: u64,
}

/// Proof that the caller holds the lock of one `(app, environment)` slot.
pub struct SlotGuard {
    app: AppName,
    environment: EnvironmentName,
    _guard: OwnedMutexGuard<()>,
}

impl SlotGuard {
    pub fn app(&self) -> &AppName {
        &self.app
    }

    pub fn environment(&self) -> &EnvironmentName {
        &self.environment
    }
}

type SlotLocks = HashMap<(AppName, EnvironmentName), Arc<tokio::sync::Mutex<()>>>;

pub struct Reconciler {
    platform: Arc<dyn DeploymentPlatform>,
    cleanup: CleanupPolicy,
    route: RoutePolicy,
    locks: Mutex<SlotLocks>,
}

impl Reconciler {
    pub fn new(platform: Arc<dyn DeploymentPlatform>) -> Self {
        Self {
            platform,
            cleanup: CleanupPolicy::default(),
            route: RoutePolicy::default(),
            locks: Mutex::default(),
        }
    }

    pub fn with_cleanup_policy(mut self, cleanup: CleanupPolicy) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn with_route_policy(mut self, route: RoutePolicy) -> Self {
        self.route = route;
        self
    }

    /// Wait for exclusive access to one slot.
    pub async fn lock(&self, app: &AppName, environment: &EnvironmentName) -> SlotGuard {
        let mutex = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((app.clone(), environment.clone()))
            .or_default()
            .clone();
        SlotGuard {
            app: app.clone(),
            environment: environment.clone(),
            _guard: mutex.lock_owned().await,
        }
    }

    pub async fn reconcile(
        &self,
        guard: &SlotGuard,
        image: &ImageRef,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let app = guard.app();
        let environment = guard.environment();
        if &image.repository != app || &image.namespace != environment {
            return Err(ReconcileError::ForeignImage {
                image: image.clone(),
                app: app.clone(),
                environment: environment.clone(),
            });
        }

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let before = self.platform.slot(app, environment).await?;
            let replaced = before.live_revision().cloned();

            let mut cleanup_warnings = Vec::new();
            if before.deployment.is_some() {
                let mut stale = vec![ResourceKind::Deployment, ResourceKind::Service];
                if self.route == RoutePolicy::Recreate {
                    stale.push(ResourceKind::Route);
                }
                for kind in stale {
                    if let Err(error) = self.platform.delete(kind, app, environment).await {
                        match self.cleanup {
                            CleanupPolicy::Strict => {
                                return Err(ReconcileError::Cleanup { kind, source: error });
                            }
                            CleanupPolicy::BestEffort => {
                                warn!(%app, %environment, %kind, %error, "stale resource left behind");
                                cleanup_warnings.push(CleanupWarning {
                                    kind: kind.to_string(),
                                    error: error.to_string(),
                                });
                            }
                        }
                    }
                }
            }

            let generation = self.platform.slot(app, environment).await?.generation;
            let deployment = match self
                .platform
                .create_deployment(app, environment, image, generation)
                .await
            {
                Ok(deployment) => deployment,
                Err(PlatformError::Conflict { expected, actual, .. }) => {
                    debug!(%app, %environment, expected, actual, attempt, "slot changed, retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let service_created = self.platform.ensure_service(app, environment).await?;
            let route_created = self.platform.ensure_route(app, environment).await?;
            let rollouts = self.platform.trigger_rollout(app, environment).await?;

            info!(
                %app,
                %environment,
                %image,
                replaced = ?replaced.as_ref().map(RevisionId::as_str),
                route_created,
                "environment reconciled"
            );
            return Ok(ReconcileOutcome {
                deployment,
                replaced,
                cleanup_warnings,
                service_created,
                route_created,
                rollouts,
            });
        }

        Err(ReconcileError::Contended {
            app: app.clone(),
            environment: environment.clone(),
            attempts: MAX_CAS_ATTEMPTS,
        })
    }
}

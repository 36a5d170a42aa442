//! Environment promotion.
//!
//! Takes an image that a previous run built in the source environment and
//! reproduces its deployment in the target environment without rebuilding.
//! Nothing in the target is touched before the source image is known to
//! exist. Replaying the same request converges to the same end state.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument};

use super::reconcile::{CleanupWarning, ReconcileError, Reconciler};
use crate::domain::{AppName, EnvironmentName, ImageRef, PromotionId, RevisionId};
use crate::ports::{IdGenerator, ImageRegistry, RegistryError, TagOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromotionRequest {
    pub app: AppName,
    pub revision: RevisionId,
    pub source: EnvironmentName,
    pub target: EnvironmentName,
}

impl PromotionRequest {
    pub fn source_image(&self) -> ImageRef {
        ImageRef::new(self.source.clone(), self.app.clone(), self.revision.clone())
    }

    pub fn target_image(&self) -> ImageRef {
        self.source_image().in_namespace(self.target.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromotionReport {
    pub id: PromotionId,
    pub request: PromotionRequest,
    pub image: ImageRef,
    /// `false` when the target tag already pointed at the same artifact.
    pub tag_created: bool,
    pub replaced: Option<RevisionId>,
    pub cleanup_warnings: Vec<CleanupWarning>,
    pub route_created: bool,
    pub rollouts: u64,
}

#[derive(Debug, Error)]
pub enum PromotionError {
    #[error("source and target environment are both '{0}'")]
    SameEnvironment(EnvironmentName),

    #[error("revision {revision} of {app} was never built in {environment} (no image {image})")]
    MissingSourceArtifact {
        app: AppName,
        revision: RevisionId,
        environment: EnvironmentName,
        image: ImageRef,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

impl PromotionError {
    /// The request was rejected before anything in the target changed.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            PromotionError::SameEnvironment(_) | PromotionError::MissingSourceArtifact { .. }
        )
    }
}

pub struct Promoter {
    registry: Arc<dyn ImageRegistry>,
    reconciler: Arc<Reconciler>,
    ids: Arc<dyn IdGenerator>,
}

impl Promoter {
    pub fn new(
        registry: Arc<dyn ImageRegistry>,
        reconciler: Arc<Reconciler>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            registry,
            reconciler,
            ids,
        }
    }

    #[instrument(
        skip(self, request),
        fields(
            app = %request.app,
            revision = %request.revision,
            from = %request.source,
            to = %request.target,
        )
    )]
    pub async fn promote(&self, request: PromotionRequest) -> Result<PromotionReport, PromotionError> {
        if request.source == request.target {
            return Err(PromotionError::SameEnvironment(request.target.clone()));
        }

        let source = request.source_image();
        if !self.registry.exists(&source).await? {
            return Err(PromotionError::MissingSourceArtifact {
                app: request.app.clone(),
                revision: request.revision.clone(),
                environment: request.source.clone(),
                image: source,
            });
        }

        let guard = self.reconciler.lock(&request.app, &request.target).await;

        let target = request.target_image();
        let tag = self.registry.tag(&source, &target).await?;
        info!(image = %target, created = tag == TagOutcome::Created, "tagged image");

        let reconciled = self.reconciler.reconcile(&guard, &target).await?;
        drop(guard);

        let id = self.ids.promotion_id();
        info!(promotion = %id, "promotion complete");
        Ok(PromotionReport {
            id,
            request,
            image: target,
            tag_created: tag == TagOutcome::Created,
            replaced: reconciled.replaced,
            cleanup_warnings: reconciled.cleanup_warnings,
            route_created: reconciled.route_created,
            rollouts: reconciled.rollouts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::reconcile::{CleanupPolicy, RoutePolicy};
    use crate::domain::{EnvironmentSlot, Route};
    use crate::impls::{InMemoryPlatform, InMemoryRegistry};
    use crate::ports::{
        BuildRequest, DeploymentPlatform, ImageBuilder, ResourceKind, SystemClock, UlidGenerator,
    };

    fn app() -> AppName {
        AppName::new("app").unwrap()
    }

    fn env(name: &str) -> EnvironmentName {
        EnvironmentName::new(name).unwrap()
    }

    fn rev(value: &str) -> RevisionId {
        RevisionId::parse(value).unwrap()
    }

    fn request(revision: &str) -> PromotionRequest {
        PromotionRequest {
            app: app(),
            revision: rev(revision),
            source: env("dev"),
            target: env("stage"),
        }
    }

    struct Fixture {
        registry: Arc<InMemoryRegistry>,
        platform: Arc<InMemoryPlatform>,
    }

    impl Fixture {
        /// dev has de7c044 built; stage runs aa11bb2.
        async fn new() -> Self {
            let registry = Arc::new(InMemoryRegistry::new());
            let platform = Arc::new(InMemoryPlatform::new());
            for (environment, revision) in [("dev", "de7c044"), ("dev", "aa11bb2"), ("stage", "aa11bb2")] {
                registry
                    .build(&BuildRequest {
                        app: app(),
                        environment: env(environment),
                        revision: rev(revision),
                    })
                    .await
                    .unwrap();
            }

            let reconciler = Reconciler::new(platform.clone());
            let guard = reconciler.lock(&app(), &env("stage")).await;
            reconciler
                .reconcile(&guard, &ImageRef::new(env("stage"), app(), rev("aa11bb2")))
                .await
                .unwrap();

            Self { registry, platform }
        }

        fn promoter(&self, cleanup: CleanupPolicy, route: RoutePolicy) -> Promoter {
            let reconciler = Reconciler::new(self.platform.clone())
                .with_cleanup_policy(cleanup)
                .with_route_policy(route);
            Promoter::new(
                self.registry.clone(),
                Arc::new(reconciler),
                Arc::new(UlidGenerator::new(SystemClock)),
            )
        }

        async fn stage(&self) -> EnvironmentSlot {
            self.platform.slot(&app(), &env("stage")).await.unwrap()
        }
    }

    #[tokio::test]
    async fn promotion_replaces_the_live_revision() {
        let fixture = Fixture::new().await;
        let route_before = fixture.stage().await.route;

        let report = fixture
            .promoter(CleanupPolicy::BestEffort, RoutePolicy::Preserve)
            .promote(request("de7c044"))
            .await
            .unwrap();

        assert_eq!(report.replaced, Some(rev("aa11bb2")));
        assert_eq!(report.image.to_string(), "stage/app:de7c044");
        assert!(report.tag_created);
        assert!(!report.route_created);
        assert!(report.cleanup_warnings.is_empty());

        let stage = fixture.stage().await;
        let deployment = stage.deployment.clone().unwrap();
        assert_eq!(deployment.image.tag, rev("de7c044"));
        assert!(deployment.rolled_out);
        assert_eq!(stage.resource_count(), 3);
        assert_eq!(stage.route, route_before);
        assert!(fixture
            .registry
            .exists(&ImageRef::new(env("stage"), app(), rev("de7c044")))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn promotion_can_recreate_the_route() {
        let fixture = Fixture::new().await;

        let report = fixture
            .promoter(CleanupPolicy::BestEffort, RoutePolicy::Recreate)
            .promote(request("de7c044"))
            .await
            .unwrap();

        assert!(report.route_created);
        let stage = fixture.stage().await;
        assert_eq!(stage.route, Some(Route::for_app(&app(), &env("stage"))));
        assert_eq!(stage.resource_count(), 3);
    }

    #[tokio::test]
    async fn missing_source_artifact_mutates_nothing() {
        let fixture = Fixture::new().await;
        let images_before = fixture.registry.images();
        let stage_before = fixture.stage().await;

        let err = fixture
            .promoter(CleanupPolicy::BestEffort, RoutePolicy::Preserve)
            .promote(request("ffffff1"))
            .await
            .unwrap_err();

        assert!(err.is_precondition());
        assert!(matches!(err, PromotionError::MissingSourceArtifact { .. }));
        assert_eq!(fixture.registry.images(), images_before);
        assert_eq!(fixture.stage().await, stage_before);
    }

    #[tokio::test]
    async fn promotion_is_idempotent() {
        let fixture = Fixture::new().await;
        let promoter = fixture.promoter(CleanupPolicy::BestEffort, RoutePolicy::Preserve);

        promoter.promote(request("de7c044")).await.unwrap();
        let once = fixture.stage().await;
        let images_once = fixture.registry.images();

        let second = promoter.promote(request("de7c044")).await.unwrap();
        let twice = fixture.stage().await;

        assert!(!second.tag_created);
        assert_eq!(second.replaced, Some(rev("de7c044")));
        assert_eq!(fixture.registry.images(), images_once);
        assert_eq!(twice.deployment.as_ref().map(|d| &d.image), once.deployment.as_ref().map(|d| &d.image));
        assert_eq!(twice.service, once.service);
        assert_eq!(twice.route, once.route);
        assert_eq!(twice.resource_count(), 3);
    }

    #[tokio::test]
    async fn same_environment_is_rejected() {
        let fixture = Fixture::new().await;
        let mut same = request("de7c044");
        same.target = env("dev");

        let err = fixture
            .promoter(CleanupPolicy::BestEffort, RoutePolicy::Preserve)
            .promote(same)
            .await
            .unwrap_err();
        assert!(matches!(err, PromotionError::SameEnvironment(_)));
    }

    #[tokio::test]
    async fn best_effort_cleanup_records_what_was_left_behind() {
        let fixture = Fixture::new().await;
        fixture.platform.fail_deletes([ResourceKind::Service]);

        let report = fixture
            .promoter(CleanupPolicy::BestEffort, RoutePolicy::Preserve)
            .promote(request("de7c044"))
            .await
            .unwrap();

        assert_eq!(report.cleanup_warnings.len(), 1);
        assert_eq!(report.cleanup_warnings[0].kind, "service");

        // the stale service is adopted, not duplicated, and the old
        // deployment is gone
        let stage = fixture.stage().await;
        assert_eq!(stage.resource_count(), 3);
        assert_eq!(stage.live_revision(), Some(&rev("de7c044")));
        let all = fixture.platform.slots(Some(&env("stage"))).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn best_effort_keeps_one_deployment_when_its_delete_fails() {
        let fixture = Fixture::new().await;
        fixture.platform.fail_deletes([ResourceKind::Deployment]);

        let report = fixture
            .promoter(CleanupPolicy::BestEffort, RoutePolicy::Preserve)
            .promote(request("de7c044"))
            .await
            .unwrap();

        assert_eq!(report.replaced, Some(rev("aa11bb2")));
        assert_eq!(report.cleanup_warnings.len(), 1);
        assert_eq!(report.cleanup_warnings[0].kind, "deployment");

        let stage = fixture.stage().await;
        assert_eq!(stage.resource_count(), 3);
        assert_eq!(stage.live_revision(), Some(&rev("de7c044")));
        assert_eq!(fixture.platform.slots(Some(&env("stage"))).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn best_effort_adopts_a_route_that_could_not_be_recreated() {
        let fixture = Fixture::new().await;
        let route_before = fixture.stage().await.route;
        fixture.platform.fail_deletes([ResourceKind::Route]);

        let report = fixture
            .promoter(CleanupPolicy::BestEffort, RoutePolicy::Recreate)
            .promote(request("de7c044"))
            .await
            .unwrap();

        assert_eq!(report.cleanup_warnings.len(), 1);
        assert_eq!(report.cleanup_warnings[0].kind, "route");
        assert!(!report.route_created);

        let stage = fixture.stage().await;
        assert_eq!(stage.resource_count(), 3);
        assert_eq!(stage.live_revision(), Some(&rev("de7c044")));
        assert_eq!(stage.route, route_before);
    }

    #[tokio::test]
    async fn strict_cleanup_aborts_before_creating() {
        let fixture = Fixture::new().await;
        fixture.platform.fail_deletes([ResourceKind::Deployment]);

        let err = fixture
            .promoter(CleanupPolicy::Strict, RoutePolicy::Preserve)
            .promote(request("de7c044"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PromotionError::Reconcile(ReconcileError::Cleanup {
                kind: ResourceKind::Deployment,
                ..
            })
        ));
        assert!(!err.is_precondition());
        assert_eq!(fixture.stage().await.live_revision(), Some(&rev("aa11bb2")));
    }

    #[tokio::test]
    async fn concurrent_promotions_of_one_slot_are_serialized() {
        let fixture = Fixture::new().await;
        let promoter = Arc::new(fixture.promoter(CleanupPolicy::Strict, RoutePolicy::Preserve));

        let a = tokio::spawn({
            let promoter = promoter.clone();
            async move { promoter.promote(request("de7c044")).await }
        });
        let b = tokio::spawn({
            let promoter = promoter.clone();
            async move { promoter.promote(request("aa11bb2")).await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let stage = fixture.stage().await;
        assert_eq!(stage.resource_count(), 3);
        assert!(stage.deployment.is_some());
    }
}

//! EngineBuilder - wiring of handlers, ports and configuration
//!
//! Handlers that need a collaborator are registered only when that
//! collaborator is supplied: a source enables `resolve-revision`, an image
//! store enables `build-image`, a platform enables `deploy`, and a store
//! plus a platform enable promotions.
//!
//! `build()` fails fast when a kind named in `expect_kinds()` has no
//! handler, so a misconfigured embedding stops before the first run.

use std::sync::Arc;

use thiserror::Error;

use super::pipeline::PipelineRunner;
use super::promoter::Promoter;
use super::reconcile::Reconciler;
use crate::config::EngineConfig;
use crate::handlers::{
    BUILD_IMAGE, BuildImageHandler, DEPLOY, DeployHandler, HandlerError, HandlerRegistry,
    RESOLVE_REVISION, ResolveRevisionHandler, TaskHandler,
};
use crate::identity::RevisionResolver;
use crate::ports::{
    Clock, DeploymentPlatform, IdGenerator, ImageBuilder, ImageRegistry, SourceContent,
    SystemClock, UlidGenerator,
};

/// Errors raised while assembling an engine.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Missing task kinds: {0:?}. These kinds were expected but no handler is registered.")]
    MissingTaskKinds(Vec<String>),

    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// Assembles an [`Engine`].
///
/// ```ignore
/// let engine = EngineBuilder::new(EngineConfig::from_env()?)
///     .with_source(Arc::new(DirectorySource::new(".")))
///     .with_images(registry.clone(), registry)
///     .with_platform(platform)
///     .expect_kinds(&["resolve-revision", "build-image", "deploy"])
///     .build()?;
/// ```
pub struct EngineBuilder {
    config: EngineConfig,
    handlers: HandlerRegistry,
    expected_kinds: Option<Vec<String>>,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    source: Option<Arc<dyn SourceContent>>,
    builder: Option<Arc<dyn ImageBuilder>>,
    registry: Option<Arc<dyn ImageRegistry>>,
    platform: Option<Arc<dyn DeploymentPlatform>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            handlers: HandlerRegistry::builtin(),
            expected_kinds: None,
            clock: Arc::new(SystemClock),
            ids: None,
            source: None,
            builder: None,
            registry: None,
            platform: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn with_source(mut self, source: Arc<dyn SourceContent>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_images(mut self, builder: Arc<dyn ImageBuilder>, registry: Arc<dyn ImageRegistry>) -> Self {
        self.builder = Some(builder);
        self.registry = Some(registry);
        self
    }

    pub fn with_platform(mut self, platform: Arc<dyn DeploymentPlatform>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Register a handler for a custom task kind.
    pub fn register(mut self, kind: &str, handler: Arc<dyn TaskHandler>) -> Result<Self, BuildError> {
        self.handlers.register(kind, handler)?;
        Ok(self)
    }

    /// Kinds that must have a handler once `build()` has wired the ports.
    pub fn expect_kinds(mut self, kinds: &[&str]) -> Self {
        self.expected_kinds = Some(kinds.iter().map(|kind| kind.to_string()).collect());
        self
    }

    pub fn build(self) -> Result<Engine, BuildError> {
        let mut handlers = self.handlers;

        if let Some(source) = self.source {
            let resolver = RevisionResolver::new(self.config.revision_length);
            handlers.register(
                RESOLVE_REVISION,
                Arc::new(ResolveRevisionHandler::new(resolver, source)),
            )?;
        }
        if let Some(builder) = self.builder {
            handlers.register(BUILD_IMAGE, Arc::new(BuildImageHandler::new(builder)))?;
        }
        let reconciler = self.platform.map(|platform| {
            Arc::new(
                Reconciler::new(platform)
                    .with_cleanup_policy(self.config.cleanup_policy)
                    .with_route_policy(self.config.route_policy),
            )
        });
        if let Some(reconciler) = &reconciler {
            handlers.register(DEPLOY, Arc::new(DeployHandler::new(reconciler.clone())))?;
        }

        if let Some(expected) = &self.expected_kinds {
            let missing: Vec<String> = expected
                .iter()
                .filter(|kind| !handlers.contains(kind))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTaskKinds(missing));
            }
        }

        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(self.clock.clone())));
        let promoter = match (self.registry, &reconciler) {
            (Some(registry), Some(reconciler)) => {
                Some(Promoter::new(registry, reconciler.clone(), ids.clone()))
            }
            _ => None,
        };
        let runner = PipelineRunner::new(Arc::new(handlers), self.clock, ids)
            .with_options(self.config.scheduler_options());

        Ok(Engine {
            config: self.config,
            runner,
            promoter,
        })
    }
}

/// A wired engine: pipeline runs and, when a registry and a platform were
/// supplied, promotions.
pub struct Engine {
    config: EngineConfig,
    runner: PipelineRunner,
    promoter: Option<Promoter>,
}

impl Engine {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn runner(&self) -> &PipelineRunner {
        &self.runner
    }

    pub fn promoter(&self) -> Option<&Promoter> {
        self.promoter.as_ref()
    }
}

//! Domain model: names, definitions, run state, environments, errors.

pub mod environment;
pub mod errors;
pub mod ids;
pub mod names;
pub mod outcome;
pub mod param;
pub mod record;
pub mod revision;
pub mod spec;
pub mod state;

pub use environment::{Deployment, EnvironmentSlot, ImageRef, Route, Service};
pub use errors::{
    DefinitionError, DispatchError, ExecutionError, PipelineError, RevisionError, StoreError,
    TransitionError,
};
pub use ids::{PromotionId, RunId};
pub use names::{AppName, EnvironmentName, ParamName, PipelineName, ResultName, TaskName};
pub use outcome::{LogLine, TaskOutcome};
pub use param::{ContextVar, ParamArg, ParamValue, ResolvedValue, ResultRef, Segment};
pub use record::TaskRunRecord;
pub use revision::RevisionId;
pub use spec::{ParamKind, ParamSpec, PipelineSpec, StepSpec, TaskSpec};
pub use state::{RunState, SkipReason, TaskRunState};

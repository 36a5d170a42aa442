//! Pipeline runs.
//!
//! [`PipelineRunner`] turns a definition into a [`RunReport`]: build and
//! check the graph, bind the pipeline parameters, then hand everything to
//! the scheduler. Definition errors surface before any task starts.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::scheduler::{Scheduler, SchedulerOptions};
use crate::domain::{
    DefinitionError, ParamName, PipelineError, PipelineName, PipelineSpec, ResolvedValue,
    ResultName, RunId, RunState, TaskName, TaskRunRecord, TaskRunState,
};
use crate::graph::TaskGraph;
use crate::handlers::{HandlerRegistry, RESOLVE_REVISION};
use crate::ports::{Clock, IdGenerator};
use crate::results::RunContext;

/// Everything an operator needs to know about a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub pipeline: PipelineName,
    pub state: RunState,
    pub params: BTreeMap<ParamName, ResolvedValue>,
    pub tasks: Vec<TaskRunRecord>,
    pub results: BTreeMap<TaskName, BTreeMap<ResultName, String>>,
    pub failed_task: Option<TaskName>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.state == RunState::Succeeded
    }

    /// `0` when every task run succeeded or was legitimately skipped, `1` otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.succeeded() { 0 } else { 1 }
    }

    pub fn task(&self, name: &str) -> Option<&TaskRunRecord> {
        self.tasks.iter().find(|record| record.task.as_str() == name)
    }

    /// Revision ids published by `resolve-revision` tasks.
    pub fn revisions(&self) -> Vec<(&TaskName, &str)> {
        self.tasks
            .iter()
            .filter(|record| record.kind == RESOLVE_REVISION)
            .flat_map(|record| record.results.values().map(move |v| (&record.task, v.as_str())))
            .collect()
    }
}

pub struct PipelineRunner {
    handlers: Arc<HandlerRegistry>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    options: SchedulerOptions,
}

impl PipelineRunner {
    pub fn new(handlers: Arc<HandlerRegistry>, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            handlers,
            clock,
            ids,
            options: SchedulerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SchedulerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Build and check the graph without running anything.
    pub fn graph(&self, spec: &PipelineSpec) -> Result<TaskGraph, DefinitionError> {
        TaskGraph::build(spec, &self.handlers)
    }

    #[instrument(skip_all, fields(pipeline = %spec.name, run_id = tracing::field::Empty))]
    pub async fn run(
        &self,
        spec: &PipelineSpec,
        provided: &BTreeMap<String, String>,
    ) -> Result<RunReport, PipelineError> {
        let graph = self.graph(spec)?;
        let params = spec.bind_params(provided)?;

        let run_id = self.ids.run_id();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));
        let started_at = self.clock.now();
        info!(tasks = graph.len(), finally = graph.finally_tasks().len(), "run started");

        let context = RunContext {
            run_id,
            pipeline: spec.name.clone(),
        };
        let scheduler = Scheduler::new(&graph, &self.handlers, self.clock.as_ref(), &self.options);
        let outcome = scheduler.run(context, params.clone()).await?;

        let state = if outcome
            .records
            .iter()
            .any(|record| record.state == TaskRunState::Failed)
        {
            RunState::Failed
        } else {
            RunState::Succeeded
        };
        match &outcome.failed_task {
            Some(task) => warn!(%task, "run failed"),
            None => info!("run succeeded"),
        }

        Ok(RunReport {
            run_id,
            pipeline: spec.name.clone(),
            state,
            params,
            results: outcome.store.snapshot(),
            tasks: outcome.records,
            failed_task: outcome.failed_task,
            started_at,
            finished_at: self.clock.now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use rstest::rstest;

    use super::*;
    use crate::app::reconcile::Reconciler;
    use crate::app::scheduler::FailurePolicy;
    use crate::domain::{
        ExecutionError, ParamSpec, ParamValue, SkipReason, StepSpec, TaskOutcome, TaskSpec,
    };
    use crate::graph::EdgeKind;
    use crate::handlers::{
        BuildImageHandler, DeployHandler, ResolveRevisionHandler, TaskHandler, TaskInvocation,
        BUILD_IMAGE, DEPLOY,
    };
    use crate::identity::RevisionResolver;
    use crate::impls::{InMemoryPlatform, InMemoryRegistry, InMemorySource};
    use crate::ports::{DeploymentPlatform, FixedClock, ImageRegistry, SystemClock, UlidGenerator};
    use crate::domain::{AppName, EnvironmentName, ImageRef, RevisionId};

    fn t(name: &str) -> TaskName {
        TaskName::new(name).unwrap()
    }

    fn p(name: &str) -> ParamName {
        ParamName::new(name).unwrap()
    }

    fn r(name: &str) -> ResultName {
        ResultName::new(name).unwrap()
    }

    fn v(text: &str) -> ParamValue {
        ParamValue::parse(text).unwrap()
    }

    /// Records start/end order and the peak number of bodies in flight.
    #[derive(Default)]
    struct Recorder {
        delays: HashMap<String, u64>,
        failing: HashSet<String>,
        withholding: HashSet<String>,
        events: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Recorder {
        fn delay(mut self, task: &str, millis: u64) -> Self {
            self.delays.insert(task.to_string(), millis);
            self
        }

        fn failing(mut self, task: &str) -> Self {
            self.failing.insert(task.to_string());
            self
        }

        fn withholding(mut self, task: &str) -> Self {
            self.withholding.insert(task.to_string());
            self
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn position(&self, event: &str) -> usize {
            self.events()
                .iter()
                .position(|e| e == event)
                .unwrap_or_else(|| panic!("no event {event}"))
        }

        fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TaskHandler for Recorder {
        async fn run(&self, invocation: &TaskInvocation) -> Result<TaskOutcome, ExecutionError> {
            let task = invocation.task.name.to_string();
            self.events.lock().unwrap().push(format!("start:{task}"));
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            if let Some(millis) = self.delays.get(&task) {
                tokio::time::sleep(Duration::from_millis(*millis)).await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.events.lock().unwrap().push(format!("end:{task}"));

            if self.failing.contains(&task) {
                return Err(ExecutionError::Handler(format!("{task} broke")));
            }
            let mut outcome = TaskOutcome::new();
            if !self.withholding.contains(&task) {
                let value = match invocation.param("input") {
                    Some(input) => format!("{}+{task}", input.to_plain()),
                    None => task.clone(),
                };
                for result in &invocation.task.results {
                    outcome = outcome.with_result(result.clone(), value.clone());
                }
            }
            Ok(outcome)
        }
    }

    struct Panicker;

    #[async_trait]
    impl TaskHandler for Panicker {
        async fn run(&self, _: &TaskInvocation) -> Result<TaskOutcome, ExecutionError> {
            panic!("boom");
        }
    }

    fn recorded_task(name: &str) -> TaskSpec {
        TaskSpec::new(t(name)).kind("recorded").result(r("out"))
    }

    fn consumer(name: &str, producer: &str) -> TaskSpec {
        recorded_task(name)
            .param(ParamSpec::required(p("input")))
            .arg(p("input"), v(&format!("$(tasks.{producer}.results.out)")))
    }

    fn pipeline(tasks: Vec<TaskSpec>) -> PipelineSpec {
        tasks
            .into_iter()
            .fold(PipelineSpec::new(PipelineName::new("test").unwrap()), PipelineSpec::task)
    }

    fn runner(recorder: Arc<Recorder>, options: SchedulerOptions) -> PipelineRunner {
        let mut handlers = HandlerRegistry::builtin();
        handlers.register("recorded", recorder).unwrap();
        handlers.register("panic", Arc::new(Panicker)).unwrap();
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
        PipelineRunner::new(
            Arc::new(handlers),
            Arc::new(clock),
            Arc::new(UlidGenerator::new(SystemClock)),
        )
        .with_options(options)
    }

    fn state(report: &RunReport, task: &str) -> TaskRunState {
        report.task(task).unwrap().state
    }

    async fn run(recorder: Arc<Recorder>, options: SchedulerOptions, spec: &PipelineSpec) -> RunReport {
        runner(recorder, options).run(spec, &BTreeMap::new()).await.unwrap()
    }

    #[tokio::test]
    async fn consumer_starts_after_producer_published() {
        let recorder = Arc::new(Recorder::default().delay("a", 30));
        let spec = pipeline(vec![consumer("b", "a"), recorded_task("a")]);

        let report = run(recorder.clone(), SchedulerOptions::default(), &spec).await;

        assert!(report.succeeded());
        assert!(recorder.position("end:a") < recorder.position("start:b"));
        assert_eq!(report.results[&t("b")][&r("out")], "a+b");
        assert_eq!(
            report.task("b").unwrap().params[&p("input")],
            ResolvedValue::String("a".to_string())
        );
    }

    #[tokio::test]
    async fn independent_tasks_run_concurrently() {
        let recorder = Arc::new(Recorder::default().delay("a", 50).delay("b", 50));
        let spec = pipeline(vec![recorded_task("a"), recorded_task("b")]);

        let report = run(recorder.clone(), SchedulerOptions::default(), &spec).await;

        assert!(report.succeeded());
        assert_eq!(recorder.peak(), 2);
    }

    #[tokio::test]
    async fn max_parallel_caps_in_flight_bodies() {
        let recorder = Arc::new(Recorder::default().delay("a", 20).delay("b", 20).delay("c", 20));
        let spec = pipeline(vec![recorded_task("a"), recorded_task("b"), recorded_task("c")]);
        let options = SchedulerOptions {
            max_parallel: Some(1),
            ..SchedulerOptions::default()
        };

        let report = run(recorder.clone(), options, &spec).await;

        assert!(report.succeeded());
        assert_eq!(recorder.peak(), 1);
    }

    #[tokio::test]
    async fn failure_skips_every_descendant() {
        let recorder = Arc::new(Recorder::default().failing("a").delay("d", 30));
        let spec = pipeline(vec![
            recorded_task("a"),
            consumer("b", "a"),
            consumer("c", "b"),
            recorded_task("d"),
        ]);

        let report = run(recorder.clone(), SchedulerOptions::default(), &spec).await;

        assert_eq!(report.state, RunState::Failed);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.failed_task, Some(t("a")));
        assert_eq!(state(&report, "a"), TaskRunState::Failed);
        for skipped in ["b", "c"] {
            let record = report.task(skipped).unwrap();
            assert_eq!(record.state, TaskRunState::Skipped);
            assert_eq!(record.skip_reason, Some(SkipReason::AncestorFailed(t("a"))));
            assert!(record.started_at.is_none());
        }
        // already running when `a` failed
        assert_eq!(state(&report, "d"), TaskRunState::Succeeded);
        assert!(!recorder.events().iter().any(|e| e == "start:b" || e == "start:c"));
        assert!(!report.results.contains_key(&t("a")));
    }

    #[rstest]
    #[case(FailurePolicy::StopDispatch, TaskRunState::Skipped)]
    #[case(FailurePolicy::ContinueIndependent, TaskRunState::Succeeded)]
    #[tokio::test]
    async fn failure_policy_decides_independent_branches(
        #[case] failure_policy: FailurePolicy,
        #[case] expected: TaskRunState,
    ) {
        let recorder = Arc::new(Recorder::default().failing("a").delay("d", 30));
        let spec = pipeline(vec![recorded_task("a"), recorded_task("d"), consumer("e", "d")]);
        let options = SchedulerOptions {
            failure_policy,
            ..SchedulerOptions::default()
        };

        let report = run(recorder, options, &spec).await;

        assert_eq!(state(&report, "d"), TaskRunState::Succeeded);
        assert_eq!(state(&report, "e"), expected);
        if expected == TaskRunState::Skipped {
            assert_eq!(report.task("e").unwrap().skip_reason, Some(SkipReason::RunAborted));
        }
    }

    #[tokio::test]
    async fn missing_declared_result_fails_the_task() {
        let recorder = Arc::new(Recorder::default().withholding("a"));
        let spec = pipeline(vec![recorded_task("a"), consumer("b", "a")]);

        let report = run(recorder, SchedulerOptions::default(), &spec).await;

        let a = report.task("a").unwrap();
        assert_eq!(a.state, TaskRunState::Failed);
        assert_eq!(a.error.as_deref(), Some("declared result 'out' was not produced"));
        assert!(a.results.is_empty());
        assert_eq!(state(&report, "b"), TaskRunState::Skipped);
    }

    #[tokio::test]
    async fn slow_task_times_out() {
        let recorder = Arc::new(Recorder::default().delay("slow", 10_000));
        let spec = pipeline(vec![recorded_task("slow"), consumer("after", "slow")]);
        let options = SchedulerOptions {
            task_timeout: Some(Duration::from_millis(50)),
            ..SchedulerOptions::default()
        };

        let report = run(recorder, options, &spec).await;

        let slow = report.task("slow").unwrap();
        assert_eq!(slow.state, TaskRunState::Failed);
        assert!(slow.error.as_deref().unwrap().starts_with("timed out"));
        assert_eq!(state(&report, "after"), TaskRunState::Skipped);
    }

    #[tokio::test]
    async fn panicking_task_fails_alone() {
        let recorder = Arc::new(Recorder::default());
        let spec = pipeline(vec![TaskSpec::new(t("bad")).kind("panic"), recorded_task("fine")]);
        let options = SchedulerOptions {
            failure_policy: FailurePolicy::ContinueIndependent,
            ..SchedulerOptions::default()
        };

        let report = run(recorder, options, &spec).await;

        let bad = report.task("bad").unwrap();
        assert_eq!(bad.state, TaskRunState::Failed);
        assert!(bad.error.as_deref().unwrap().contains("boom"));
        assert_eq!(state(&report, "fine"), TaskRunState::Succeeded);
    }

    #[tokio::test]
    async fn finally_tasks_run_after_a_failure() {
        let recorder = Arc::new(Recorder::default().failing("a"));
        let spec = pipeline(vec![recorded_task("a")])
            .finally_task(recorded_task("cleanup"))
            .finally_task(consumer("report", "a"));

        let report = run(recorder.clone(), SchedulerOptions::default(), &spec).await;

        let cleanup = report.task("cleanup").unwrap();
        assert!(cleanup.finally);
        assert_eq!(cleanup.state, TaskRunState::Succeeded);
        assert!(recorder.position("end:a") < recorder.position("start:cleanup"));

        // `a` never published, so the reference cannot resolve
        let dependent = report.task("report").unwrap();
        assert_eq!(dependent.state, TaskRunState::Failed);
        assert!(dependent.error.as_deref().unwrap().contains("$(tasks.a.results.out)"));
        assert_eq!(report.failed_task, Some(t("a")));
    }

    #[tokio::test]
    async fn definition_errors_surface_before_any_task_runs() {
        let recorder = Arc::new(Recorder::default());
        let spec = pipeline(vec![consumer("a", "b"), consumer("b", "a")]);

        let err = runner(recorder.clone(), SchedulerOptions::default())
            .run(&spec, &BTreeMap::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Definition(DefinitionError::Cycle(_))));
        assert!(recorder.events().is_empty());
    }

    #[tokio::test]
    async fn undeclared_pipeline_param_is_rejected() {
        let recorder = Arc::new(Recorder::default());
        let spec = pipeline(vec![recorded_task("a")]);
        let provided = BTreeMap::from([("nope".to_string(), "1".to_string())]);

        let err = runner(recorder, SchedulerOptions::default())
            .run(&spec, &provided)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Definition(DefinitionError::UndeclaredPipelineParam(_))
        ));
    }

    #[tokio::test]
    async fn script_results_flow_into_the_next_script() {
        let recorder = Arc::new(Recorder::default());
        let spec = PipelineSpec::new(PipelineName::new("greet").unwrap())
            .param(ParamSpec::optional(p("who"), "world"))
            .task(
                TaskSpec::new(t("hello"))
                    .param(ParamSpec::required(p("who")))
                    .arg(p("who"), v("$(params.who)"))
                    .result(r("greeting"))
                    .step(StepSpec::new(
                        "write",
                        r#"printf 'hello %s' "$PARAM_WHO" > "$RESULTS_DIR/greeting""#,
                    )),
            )
            .task(
                TaskSpec::new(t("shout"))
                    .param(ParamSpec::required(p("text")))
                    .arg(p("text"), v("$(tasks.hello.results.greeting)!"))
                    .result(r("loud"))
                    .step(StepSpec::new(
                        "upper",
                        r#"printf '%s' "$PARAM_TEXT" | tr a-z A-Z > "$RESULTS_DIR/loud""#,
                    )),
            );
        let provided = BTreeMap::from([("who".to_string(), "ferry".to_string())]);

        let report = runner(recorder, SchedulerOptions::default())
            .run(&spec, &provided)
            .await
            .unwrap();

        assert!(report.succeeded(), "{report:#?}");
        assert_eq!(report.results[&t("hello")][&r("greeting")], "hello ferry");
        assert_eq!(report.results[&t("shout")][&r("loud")], "HELLO FERRY!");
    }

    /// resolve-revision, then build, then deploy, all wired through results.
    #[tokio::test]
    async fn build_and_deploy_follow_the_revision() {
        let source = InMemorySource::new()
            .with_file("main.rs", "fn main() {}")
            .with_file("Cargo.toml", "[package]");
        let registry = Arc::new(InMemoryRegistry::new());
        let platform = Arc::new(InMemoryPlatform::new());
        let reconciler = Arc::new(Reconciler::new(platform.clone()));

        let mut handlers = HandlerRegistry::builtin();
        handlers
            .register(
                RESOLVE_REVISION,
                Arc::new(ResolveRevisionHandler::new(RevisionResolver::default(), Arc::new(source))),
            )
            .unwrap();
        handlers
            .register(BUILD_IMAGE, Arc::new(BuildImageHandler::new(registry.clone())))
            .unwrap();
        handlers
            .register(DEPLOY, Arc::new(DeployHandler::new(reconciler)))
            .unwrap();

        let revision_ref = "$(tasks.revision.results.revision)";
        let spec = PipelineSpec::new(PipelineName::new("ship").unwrap())
            .param(ParamSpec::optional(p("env"), "dev"))
            .task(
                TaskSpec::new(t("deploy"))
                    .kind(DEPLOY)
                    .param(ParamSpec::required(p("app")))
                    .param(ParamSpec::required(p("environment")))
                    .param(ParamSpec::required(p("revision")))
                    .param(ParamSpec::required(p("image")))
                    .arg(p("app"), v("app"))
                    .arg(p("environment"), v("$(params.env)"))
                    .arg(p("revision"), v(revision_ref))
                    .arg(p("image"), v("$(tasks.build.results.image)"))
                    .result(r("deployment")),
            )
            .task(
                TaskSpec::new(t("build"))
                    .kind(BUILD_IMAGE)
                    .param(ParamSpec::required(p("app")))
                    .param(ParamSpec::required(p("environment")))
                    .param(ParamSpec::required(p("revision")))
                    .arg(p("app"), v("app"))
                    .arg(p("environment"), v("$(params.env)"))
                    .arg(p("revision"), v(revision_ref))
                    .result(r("image")),
            )
            .task(TaskSpec::new(t("revision")).kind(RESOLVE_REVISION).result(r("revision")));

        let runner = PipelineRunner::new(
            Arc::new(handlers),
            Arc::new(SystemClock),
            Arc::new(UlidGenerator::new(SystemClock)),
        );
        let graph = runner.graph(&spec).unwrap();
        assert_eq!(graph.edge_kind(&t("revision"), &t("deploy")), Some(EdgeKind::Data));
        assert_eq!(graph.edge_kind(&t("build"), &t("deploy")), Some(EdgeKind::Data));
        assert_eq!(graph.edge_kind(&t("revision"), &t("build")), Some(EdgeKind::Data));

        let report = runner.run(&spec, &BTreeMap::new()).await.unwrap();
        assert!(report.succeeded(), "{report:#?}");

        let revisions = report.revisions();
        assert_eq!(revisions.len(), 1);
        let revision = RevisionId::parse(revisions[0].1).unwrap();
        assert_eq!(revision.as_str().len(), 7);

        let app = AppName::new("app").unwrap();
        let dev = EnvironmentName::new("dev").unwrap();
        let image = ImageRef::new(dev.clone(), app.clone(), revision.clone());
        assert!(registry.exists(&image).await.unwrap());
        assert_eq!(report.results[&t("build")][&r("image")], image.to_string());
        assert_eq!(report.results[&t("deploy")][&r("deployment")], image.to_string());

        let slot = platform.slot(&app, &dev).await.unwrap();
        assert_eq!(slot.live_revision(), Some(&revision));
        assert_eq!(slot.resource_count(), 3);
    }
}

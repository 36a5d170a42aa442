//! Scheduler: executes a [`TaskGraph`] for one run.
//!
//! A single coordinator owns every task run record and the result store.
//! Task bodies run on a `JoinSet`; only the coordinator mutates state, so
//! publishing results and dispatching dependents happen in one place and in
//! a fixed order: a task's results are in the store before any dependent is
//! even considered ready.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::domain::{
    ExecutionError, ParamName, PipelineError, ResolvedValue, SkipReason, TaskName, TaskOutcome,
    TaskRunRecord, TaskRunState, TaskSpec,
};
use crate::graph::TaskGraph;
use crate::handlers::{HandlerRegistry, TaskInvocation};
use crate::ports::Clock;
use crate::results::{ParameterResolver, ResultStore, RunContext};

/// What happens to the rest of the run once a task failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Finish what is running, dispatch nothing new.
    #[default]
    StopDispatch,
    /// Keep dispatching branches that do not depend on the failed task.
    ContinueIndependent,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop" | "stop-dispatch" => Ok(FailurePolicy::StopDispatch),
            "continue" | "continue-independent" => Ok(FailurePolicy::ContinueIndependent),
            other => Err(format!("unknown failure policy '{other}' (stop, continue)")),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::StopDispatch => f.write_str("stop"),
            FailurePolicy::ContinueIndependent => f.write_str("continue"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Upper bound on task bodies running at once. `None` runs every ready task.
    pub max_parallel: Option<usize>,
    pub failure_policy: FailurePolicy,
    /// A task body running longer than this fails with `TimedOut`.
    pub task_timeout: Option<Duration>,
}

/// Terminal state of every task run plus the published results.
#[derive(Debug)]
pub struct RunOutcome {
    /// Main tasks in declaration order, then finally tasks.
    pub records: Vec<TaskRunRecord>,
    pub store: ResultStore,
    /// First task run that failed.
    pub failed_task: Option<TaskName>,
}

pub struct Scheduler<'a> {
    graph: &'a TaskGraph,
    handlers: &'a HandlerRegistry,
    clock: &'a dyn Clock,
    options: &'a SchedulerOptions,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        graph: &'a TaskGraph,
        handlers: &'a HandlerRegistry,
        clock: &'a dyn Clock,
        options: &'a SchedulerOptions,
    ) -> Self {
        Self {
            graph,
            handlers,
            clock,
            options,
        }
    }

    pub async fn run(
        &self,
        context: RunContext,
        params: BTreeMap<ParamName, ResolvedValue>,
    ) -> Result<RunOutcome, PipelineError> {
        let mut execution = Execution::new(self, context, params);

        let roots = self.graph.roots().into_iter().cloned();
        execution.ready.extend(roots);
        execution.drive(Phase::Main).await?;
        execution.abort_pending()?;

        let finally = self.graph.finally_tasks().iter().map(|t| t.name.clone());
        execution.ready.extend(finally);
        execution.drive(Phase::Finally).await?;

        Ok(execution.finish())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Main,
    Finally,
}

type Finished = Result<TaskOutcome, ExecutionError>;

struct Execution<'s, 'a> {
    scheduler: &'s Scheduler<'a>,
    context: RunContext,
    params: BTreeMap<ParamName, ResolvedValue>,
    specs: HashMap<TaskName, &'a TaskSpec>,
    order: Vec<TaskName>,
    records: HashMap<TaskName, TaskRunRecord>,
    /// Unfinished predecessors of every task that is not ready yet.
    waiting: HashMap<TaskName, usize>,
    ready: VecDeque<TaskName>,
    store: ResultStore,
    running: JoinSet<Finished>,
    in_flight: HashMap<Id, TaskName>,
    aborted: bool,
    failed_task: Option<TaskName>,
}

impl<'s, 'a> Execution<'s, 'a> {
    fn new(
        scheduler: &'s Scheduler<'a>,
        context: RunContext,
        params: BTreeMap<ParamName, ResolvedValue>,
    ) -> Self {
        let graph = scheduler.graph;

        let mut records = HashMap::new();
        for task in graph.tasks() {
            records.insert(task.name.clone(), TaskRunRecord::new(context.run_id, task));
        }
        for task in graph.finally_tasks() {
            records.insert(
                task.name.clone(),
                TaskRunRecord::new_finally(context.run_id, task),
            );
        }

        let waiting = graph
            .tasks()
            .iter()
            .map(|task| (task.name.clone(), graph.predecessors(&task.name).count()))
            .filter(|(_, count)| *count > 0)
            .collect();

        Self {
            scheduler,
            context,
            params,
            specs: all_tasks(graph).map(|task| (task.name.clone(), task)).collect(),
            order: all_tasks(graph).map(|task| task.name.clone()).collect(),
            records,
            waiting,
            ready: VecDeque::new(),
            store: ResultStore::for_tasks(all_tasks(graph)),
            running: JoinSet::new(),
            in_flight: HashMap::new(),
            aborted: false,
            failed_task: None,
        }
    }

    fn limit(&self) -> usize {
        self.scheduler
            .options
            .max_parallel
            .unwrap_or(usize::MAX)
            .max(1)
    }

    async fn drive(&mut self, phase: Phase) -> Result<(), PipelineError> {
        loop {
            while !self.aborted && self.running.len() < self.limit() {
                let Some(task) = self.ready.pop_front() else {
                    break;
                };
                self.dispatch(&task, phase)?;
            }

            let Some(joined) = self.running.join_next_with_id().await else {
                return Ok(());
            };
            let (task, finished) = match joined {
                Ok((id, finished)) => (self.in_flight.remove(&id), finished),
                Err(error) => (
                    self.in_flight.remove(&error.id()),
                    Err(ExecutionError::Panicked(panic_message(error))),
                ),
            };
            if let Some(task) = task {
                self.complete(&task, finished, phase)?;
            }
        }
    }

    fn dispatch(&mut self, task: &TaskName, phase: Phase) -> Result<(), PipelineError> {
        let Some(&spec) = self.specs.get(task) else {
            return Ok(());
        };
        let now = self.scheduler.clock.now();
        let Some(record) = self.records.get_mut(task) else {
            return Ok(());
        };
        record.mark_running(now)?;

        let resolved = ParameterResolver::new(&self.context, &self.params, &self.store).resolve(spec);
        let params = match resolved {
            Ok(params) => params,
            Err(error) => return self.fail(task, error.into(), phase),
        };
        record.set_params(params.clone());

        let Some(handler) = self.scheduler.handlers.get(&spec.kind) else {
            let error = ExecutionError::Handler(format!("no handler for task kind '{}'", spec.kind));
            return self.fail(task, error, phase);
        };

        debug!(run_id = %self.context.run_id, %task, kind = %spec.kind, "dispatching");
        let invocation = TaskInvocation {
            run_id: self.context.run_id,
            pipeline: self.context.pipeline.clone(),
            task: spec.clone(),
            params,
        };
        let timeout = self.scheduler.options.task_timeout;
        let handle = self.running.spawn(async move {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, handler.run(&invocation))
                    .await
                    .unwrap_or(Err(ExecutionError::TimedOut(limit))),
                None => handler.run(&invocation).await,
            }
        });
        self.in_flight.insert(handle.id(), task.clone());
        Ok(())
    }

    fn complete(&mut self, task: &TaskName, finished: Finished, phase: Phase) -> Result<(), PipelineError> {
        let outcome = match finished {
            Ok(outcome) => outcome,
            Err(error) => return self.fail(task, error, phase),
        };
        let Some(&spec) = self.specs.get(task) else {
            return Ok(());
        };

        let mut results = BTreeMap::new();
        for name in &spec.results {
            let Some(value) = outcome.results.get(name) else {
                if let Some(record) = self.records.get_mut(task) {
                    record.log = outcome.log;
                }
                return self.fail(task, ExecutionError::MissingResult(name.clone()), phase);
            };
            results.insert(name.clone(), value.clone());
        }

        let now = self.scheduler.clock.now();
        let Some(record) = self.records.get_mut(task) else {
            return Ok(());
        };
        record.mark_succeeded(now, outcome.exit_code, outcome.log)?;
        self.store.publish(task, record.state, results.clone())?;
        record.attach_results(results);
        info!(run_id = %self.context.run_id, %task, "task succeeded");

        if phase == Phase::Main {
            let graph = self.scheduler.graph;
            for dependent in graph.dependents(task) {
                let Some(count) = self.waiting.get_mut(dependent) else {
                    continue;
                };
                *count -= 1;
                if *count == 0 {
                    self.waiting.remove(dependent);
                    self.ready.push_back(dependent.clone());
                }
            }
        }
        Ok(())
    }

    fn fail(&mut self, task: &TaskName, error: ExecutionError, phase: Phase) -> Result<(), PipelineError> {
        warn!(run_id = %self.context.run_id, %task, %error, "task failed");
        let now = self.scheduler.clock.now();
        if let Some(record) = self.records.get_mut(task) {
            record.mark_failed(now, &error)?;
        }
        self.failed_task.get_or_insert_with(|| task.clone());

        if phase == Phase::Finally {
            return Ok(());
        }

        for descendant in self.scheduler.graph.descendants(task) {
            let Some(record) = self.records.get_mut(&descendant) else {
                continue;
            };
            if record.state == TaskRunState::Pending {
                record.mark_skipped(now, SkipReason::AncestorFailed(task.clone()))?;
                self.waiting.remove(&descendant);
                self.ready.retain(|queued| queued != &descendant);
                debug!(run_id = %self.context.run_id, task = %descendant, "skipped");
            }
        }

        if self.scheduler.options.failure_policy == FailurePolicy::StopDispatch {
            self.aborted = true;
        }
        Ok(())
    }

    /// Everything in the main graph that never started is skipped.
    fn abort_pending(&mut self) -> Result<(), PipelineError> {
        let now = self.scheduler.clock.now();
        let graph = self.scheduler.graph;
        for task in graph.tasks() {
            let Some(record) = self.records.get_mut(&task.name) else {
                continue;
            };
            if record.state == TaskRunState::Pending {
                record.mark_skipped(now, SkipReason::RunAborted)?;
            }
        }
        self.waiting.clear();
        self.ready.clear();
        self.aborted = false;
        Ok(())
    }

    fn finish(mut self) -> RunOutcome {
        let records = self
            .order
            .iter()
            .filter_map(|task| self.records.remove(task))
            .collect();
        RunOutcome {
            records,
            store: self.store,
            failed_task: self.failed_task,
        }
    }
}

fn all_tasks(graph: &TaskGraph) -> impl Iterator<Item = &TaskSpec> {
    graph.tasks().iter().chain(graph.finally_tasks())
}

fn panic_message(error: JoinError) -> String {
    match error.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string()),
        Err(error) => error.to_string(),
    }
}

//! Dependency graph builder.
//!
//! [`TaskGraph::build`] validates a [`PipelineSpec`] and derives its edges:
//! one explicit edge per `run_after` entry and one data edge per task whose
//! result is referenced in a parameter value. Every definition error is
//! reported here, before any task runs.

mod dependency;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

pub use self::dependency::{DependencyGraph, EdgeKind};
use crate::domain::{
    DefinitionError, ParamArg, ParamSpec, PipelineName, PipelineSpec, ResultRef, TaskName,
    TaskSpec,
};
use crate::handlers::HandlerRegistry;

/// One edge of the graph: `to` waits for `from`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: TaskName,
    pub to: TaskName,
    pub kind: EdgeKind,
}

/// A validated, acyclic pipeline.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    spec: PipelineSpec,
    index: BTreeMap<TaskName, usize>,
    deps: DependencyGraph,
}

impl TaskGraph {
    pub fn build(spec: &PipelineSpec, handlers: &HandlerRegistry) -> Result<Self, DefinitionError> {
        if spec.tasks.is_empty() {
            return Err(DefinitionError::EmptyPipeline);
        }
        check_pipeline_params(spec)?;

        let mut names = HashSet::new();
        for task in spec.tasks.iter().chain(&spec.finally) {
            if !names.insert(&task.name) {
                return Err(DefinitionError::DuplicateTask(task.name.clone()));
            }
            task.check_declarations()?;
            if !handlers.contains(&task.kind) {
                return Err(DefinitionError::UnknownTaskKind {
                    task: task.name.clone(),
                    kind: task.kind.clone(),
                });
            }
            check_args(spec, task)?;
        }

        let index: BTreeMap<TaskName, usize> = spec
            .tasks
            .iter()
            .enumerate()
            .map(|(i, task)| (task.name.clone(), i))
            .collect();
        let finally: HashSet<&TaskName> = spec.finally.iter().map(|t| &t.name).collect();

        let mut deps = DependencyGraph::new();
        for task in &spec.tasks {
            deps.add_node(task.name.clone());

            for before in &task.run_after {
                if before == &task.name {
                    return Err(DefinitionError::SelfReference(task.name.clone()));
                }
                if !index.contains_key(before) {
                    return Err(DefinitionError::UnknownTask {
                        task: task.name.clone(),
                        missing: before.clone(),
                    });
                }
                deps.add_dependency(&task.name, before, EdgeKind::Explicit);
            }

            for reference in effective_result_refs(task) {
                check_result_ref(spec, &index, &finally, task, reference)?;
                deps.add_dependency(&task.name, &reference.task, EdgeKind::Data);
            }
        }

        for task in &spec.finally {
            if !task.run_after.is_empty() {
                return Err(DefinitionError::FinallyRunAfter(task.name.clone()));
            }
            for reference in effective_result_refs(task) {
                check_result_ref(spec, &index, &finally, task, reference)?;
            }
        }

        if let Some(cycle) = deps.detect_cycle() {
            return Err(DefinitionError::Cycle(cycle));
        }

        Ok(Self {
            spec: spec.clone(),
            index,
            deps,
        })
    }

    pub fn pipeline(&self) -> &PipelineName {
        &self.spec.name
    }

    pub fn spec(&self) -> &PipelineSpec {
        &self.spec
    }

    /// Main tasks in declaration order.
    pub fn tasks(&self) -> &[TaskSpec] {
        &self.spec.tasks
    }

    pub fn finally_tasks(&self) -> &[TaskSpec] {
        &self.spec.finally
    }

    pub fn task(&self, name: &TaskName) -> Option<&TaskSpec> {
        self.index.get(name).map(|&i| &self.spec.tasks[i])
    }

    pub fn len(&self) -> usize {
        self.spec.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spec.tasks.is_empty()
    }

    pub fn predecessors(&self, task: &TaskName) -> impl Iterator<Item = &TaskName> {
        self.deps.dependencies(task)
    }

    pub fn dependents(&self, task: &TaskName) -> impl Iterator<Item = &TaskName> {
        self.deps.dependents(task)
    }

    pub fn descendants(&self, task: &TaskName) -> BTreeSet<TaskName> {
        self.deps.descendants(task)
    }

    pub fn edges(&self) -> Vec<Edge> {
        self.deps
            .edges()
            .map(|(to, from, kind)| Edge {
                from: from.clone(),
                to: to.clone(),
                kind,
            })
            .collect()
    }

    pub fn edge_kind(&self, from: &TaskName, to: &TaskName) -> Option<EdgeKind> {
        self.deps.edge_kind(to, from)
    }

    /// Tasks without predecessors, in declaration order.
    pub fn roots(&self) -> Vec<&TaskName> {
        self.spec
            .tasks
            .iter()
            .map(|t| &t.name)
            .filter(|name| !self.deps.has_dependencies(name))
            .collect()
    }

    pub fn topological_order(&self) -> Vec<TaskName> {
        // the graph was checked for cycles in `build`
        self.deps.topological_order().unwrap_or_default()
    }
}

/// Renders the graph as a Mermaid flowchart. Data edges are dotted.
impl fmt::Display for TaskGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph TD")?;
        for task in &self.spec.tasks {
            writeln!(f, "    {}[\"{} ({})\"]", mermaid_id(&task.name), task.name, task.kind)?;
        }
        for task in &self.spec.finally {
            writeln!(
                f,
                "    {}([\"{} ({}, finally)\"])",
                mermaid_id(&task.name),
                task.name,
                task.kind
            )?;
        }
        for edge in self.edges() {
            let arrow = match edge.kind {
                EdgeKind::Explicit => "-->",
                EdgeKind::Data => "-.->",
                EdgeKind::Both => "==>",
            };
            writeln!(f, "    {} {arrow} {}", mermaid_id(&edge.from), mermaid_id(&edge.to))?;
        }
        Ok(())
    }
}

fn mermaid_id(name: &TaskName) -> String {
    name.as_str().replace('-', "_")
}

fn check_pipeline_params(spec: &PipelineSpec) -> Result<(), DefinitionError> {
    let mut seen = HashSet::new();
    for param in &spec.params {
        if !seen.insert(&param.name) {
            return Err(DefinitionError::DuplicateDeclaration {
                task: spec.name.to_string(),
                what: "parameter",
                name: param.name.to_string(),
            });
        }
        if let Some(default) = &param.default {
            param.check_kind(spec.name.as_str(), default)?;
            if !default.is_literal() {
                return Err(DefinitionError::NonLiteralDefault(param.name.clone()));
            }
        }
    }
    Ok(())
}

/// Arguments bound to declared params, falling back to the param default.
fn effective_args(task: &TaskSpec) -> impl Iterator<Item = (&ParamSpec, &ParamArg)> {
    task.params.iter().filter_map(|param| {
        task.args
            .get(&param.name)
            .or(param.default.as_ref())
            .map(|arg| (param, arg))
    })
}

fn effective_result_refs(task: &TaskSpec) -> impl Iterator<Item = &ResultRef> {
    effective_args(task).flat_map(|(_, arg)| arg.result_refs())
}

fn check_args(spec: &PipelineSpec, task: &TaskSpec) -> Result<(), DefinitionError> {
    for name in task.args.keys() {
        if task.param_spec(name).is_none() {
            return Err(DefinitionError::UnknownArgument {
                task: task.name.clone(),
                param: name.clone(),
            });
        }
    }
    for param in &task.params {
        if param.is_required() && !task.args.contains_key(&param.name) {
            return Err(DefinitionError::MissingArgument {
                task: task.name.clone(),
                param: param.name.clone(),
            });
        }
    }
    for (param, arg) in effective_args(task) {
        param.check_kind(task.name.as_str(), arg)?;
        for referenced in arg.param_refs() {
            if spec.param_spec(referenced).is_none() {
                return Err(DefinitionError::UnknownParam {
                    owner: task.name.to_string(),
                    param: referenced.clone(),
                });
            }
        }
    }
    Ok(())
}

fn check_result_ref(
    spec: &PipelineSpec,
    index: &BTreeMap<TaskName, usize>,
    finally: &HashSet<&TaskName>,
    task: &TaskSpec,
    reference: &ResultRef,
) -> Result<(), DefinitionError> {
    if reference.task == task.name {
        return Err(DefinitionError::SelfReference(task.name.clone()));
    }
    if finally.contains(&reference.task) {
        return Err(DefinitionError::FinallyReference {
            task: task.name.clone(),
            producer: reference.task.clone(),
            result: reference.result.clone(),
        });
    }
    let Some(&producer) = index.get(&reference.task) else {
        return Err(DefinitionError::UnknownProducer {
            task: task.name.clone(),
            producer: reference.task.clone(),
            result: reference.result.clone(),
        });
    };
    if !spec.tasks[producer].declares_result(&reference.result) {
        return Err(DefinitionError::DanglingResult {
            task: task.name.clone(),
            producer: reference.task.clone(),
            result: reference.result.clone(),
        });
    }
    Ok(())
}

//! Task and pipeline definitions.
//!
//! Definitions are plain data, loaded from JSON. Validation against each
//! other (references, cycles, handler kinds) happens in [`crate::graph`].

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::DefinitionError;
use super::names::{ParamName, PipelineName, ResultName, TaskName};
use super::param::{ParamArg, ParamValue, ResolvedValue};

/// Handler kind used when a task does not name one.
pub const DEFAULT_TASK_KIND: &str = "script";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    #[default]
    String,
    Array,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::String => f.write_str("a string"),
            ParamKind::Array => f.write_str("an array"),
        }
    }
}

/// A declared parameter. Without a default it is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: ParamName,

    #[serde(default, rename = "type")]
    pub kind: ParamKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ParamArg>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParamSpec {
    pub fn required(name: ParamName) -> Self {
        Self {
            name,
            kind: ParamKind::String,
            default: None,
            description: None,
        }
    }

    pub fn optional(name: ParamName, default: impl Into<String>) -> Self {
        Self {
            name,
            kind: ParamKind::String,
            default: Some(ParamArg::Single(ParamValue::literal(default))),
            description: None,
        }
    }

    pub fn array(mut self) -> Self {
        self.kind = ParamKind::Array;
        self
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }

    /// Check that `arg` has the shape this parameter expects.
    pub fn check_kind(&self, owner: &str, arg: &ParamArg) -> Result<(), DefinitionError> {
        let matches = matches!(
            (self.kind, arg),
            (ParamKind::String, ParamArg::Single(_)) | (ParamKind::Array, ParamArg::Many(_))
        );
        if matches {
            Ok(())
        } else {
            Err(DefinitionError::KindMismatch {
                owner: owner.to_string(),
                param: self.name.clone(),
                expected: self.kind,
            })
        }
    }
}

/// One step of a task body. Opaque to the scheduler; interpreted by handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,

    /// Container image the step is meant to run in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    pub script: String,

    /// Extra environment variables, passed verbatim.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl StepSpec {
    pub fn new(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: None,
            script: script.into(),
            env: BTreeMap::new(),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

fn default_kind() -> String {
    DEFAULT_TASK_KIND.to_string()
}

/// A declared unit of work inside a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: TaskName,

    /// Key of the handler that executes this task.
    #[serde(default = "default_kind")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<ParamSpec>,

    /// Values bound to the declared params.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<ParamName, ParamArg>,

    /// Declared input resources (source checkouts, images, ...).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<ResultName>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepSpec>,

    /// Explicit predecessors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub run_after: Vec<TaskName>,
}

impl TaskSpec {
    pub fn new(name: TaskName) -> Self {
        Self {
            name,
            kind: default_kind(),
            params: Vec::new(),
            args: BTreeMap::new(),
            resources: Vec::new(),
            results: Vec::new(),
            steps: Vec::new(),
            run_after: Vec::new(),
        }
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn arg(mut self, name: ParamName, value: impl Into<ParamArg>) -> Self {
        self.args.insert(name, value.into());
        self
    }

    pub fn result(mut self, name: ResultName) -> Self {
        self.results.push(name);
        self
    }

    pub fn step(mut self, step: StepSpec) -> Self {
        self.steps.push(step);
        self
    }

    pub fn run_after(mut self, task: TaskName) -> Self {
        self.run_after.push(task);
        self
    }

    pub fn declares_result(&self, result: &ResultName) -> bool {
        self.results.contains(result)
    }

    pub fn param_spec(&self, name: &ParamName) -> Option<&ParamSpec> {
        self.params.iter().find(|p| &p.name == name)
    }

    /// Reject duplicate param and result declarations within this task.
    pub fn check_declarations(&self) -> Result<(), DefinitionError> {
        let mut seen = HashSet::new();
        for param in &self.params {
            if !seen.insert(param.name.as_str()) {
                return Err(DefinitionError::DuplicateDeclaration {
                    task: self.name.to_string(),
                    what: "parameter",
                    name: param.name.to_string(),
                });
            }
        }

        let mut seen = HashSet::new();
        for result in &self.results {
            if !seen.insert(result.as_str()) {
                return Err(DefinitionError::DuplicateDeclaration {
                    task: self.name.to_string(),
                    what: "result",
                    name: result.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// An ordered collection of tasks plus pipeline-level parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub name: PipelineName,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<ParamSpec>,

    pub tasks: Vec<TaskSpec>,

    /// Tasks that run once every other task reached a terminal state.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finally: Vec<TaskSpec>,
}

impl PipelineSpec {
    pub fn new(name: PipelineName) -> Self {
        Self {
            name,
            params: Vec::new(),
            tasks: Vec::new(),
            finally: Vec::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn task(mut self, task: TaskSpec) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn finally_task(mut self, task: TaskSpec) -> Self {
        self.finally.push(task);
        self
    }

    pub fn param_spec(&self, name: &ParamName) -> Option<&ParamSpec> {
        self.params.iter().find(|p| &p.name == name)
    }

    /// Bind operator-supplied values to the declared pipeline parameters.
    ///
    /// Unknown names and missing required params are definition errors.
    /// Values for array params are split on commas.
    pub fn bind_params(
        &self,
        provided: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<ParamName, ResolvedValue>, DefinitionError> {
        for key in provided.keys() {
            if !self.params.iter().any(|p| p.name.as_str() == key) {
                return Err(DefinitionError::UndeclaredPipelineParam(key.clone()));
            }
        }

        let mut bound = BTreeMap::new();
        for param in &self.params {
            let value = match (provided.get(param.name.as_str()), &param.default) {
                (Some(raw), _) => match param.kind {
                    ParamKind::String => ResolvedValue::String(raw.clone()),
                    ParamKind::Array => ResolvedValue::Array(
                        raw.split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(str::to_string)
                            .collect(),
                    ),
                },
                (None, Some(default)) => {
                    param.check_kind(self.name.as_str(), default)?;
                    literal_value(default)
                        .ok_or_else(|| DefinitionError::NonLiteralDefault(param.name.clone()))?
                }
                (None, None) => return Err(DefinitionError::MissingPipelineParam(param.name.clone())),
            };
            bound.insert(param.name.clone(), value);
        }
        Ok(bound)
    }
}

fn literal_value(arg: &ParamArg) -> Option<ResolvedValue> {
    match arg {
        ParamArg::Single(v) => v.as_literal().map(ResolvedValue::String),
        ParamArg::Many(vs) => vs
            .iter()
            .map(ParamValue::as_literal)
            .collect::<Option<Vec<_>>>()
            .map(ResolvedValue::Array),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIPELINE: &str = r#"
    {
      "name": "build-and-deploy",
      "params": [
        { "name": "app" },
        { "name": "flags", "type": "array", "default": ["--quiet"] }
      ],
      "tasks": [
        {
          "name": "git-rev",
          "kind": "resolve-revision",
          "results": ["revision"]
        },
        {
          "name": "build",
          "params": [{ "name": "tag" }],
          "args": { "tag": "$(tasks.git-rev.results.revision)" },
          "steps": [{ "name": "build", "script": "echo building $PARAM_TAG" }]
        }
      ]
    }"#;

    #[test]
    fn pipeline_loads_from_json() {
        let pipeline = PipelineSpec::from_json(PIPELINE).unwrap();

        assert_eq!(pipeline.name.as_str(), "build-and-deploy");
        assert_eq!(pipeline.tasks.len(), 2);
        assert_eq!(pipeline.tasks[0].kind, "resolve-revision");
        assert_eq!(pipeline.tasks[1].kind, DEFAULT_TASK_KIND);

        let tag = &pipeline.tasks[1].args[&ParamName::new("tag").unwrap()];
        assert_eq!(tag.result_refs().count(), 1);
    }

    #[test]
    fn bind_params_applies_defaults_and_requires_missing() {
        let pipeline = PipelineSpec::from_json(PIPELINE).unwrap();

        let err = pipeline.bind_params(&BTreeMap::new()).unwrap_err();
        assert!(matches!(err, DefinitionError::MissingPipelineParam(p) if p.as_str() == "app"));

        let provided = BTreeMap::from([("app".to_string(), "shop".to_string())]);
        let bound = pipeline.bind_params(&provided).unwrap();
        assert_eq!(
            bound[&ParamName::new("app").unwrap()],
            ResolvedValue::String("shop".to_string())
        );
        assert_eq!(
            bound[&ParamName::new("flags").unwrap()],
            ResolvedValue::Array(vec!["--quiet".to_string()])
        );
    }

    #[test]
    fn bind_params_rejects_unknown_names() {
        let pipeline = PipelineSpec::from_json(PIPELINE).unwrap();
        let provided = BTreeMap::from([
            ("app".to_string(), "shop".to_string()),
            ("colour".to_string(), "blue".to_string()),
        ]);

        assert!(matches!(
            pipeline.bind_params(&provided),
            Err(DefinitionError::UndeclaredPipelineParam(name)) if name == "colour"
        ));
    }

    #[test]
    fn bind_params_splits_array_values() {
        let pipeline = PipelineSpec::from_json(PIPELINE).unwrap();
        let provided = BTreeMap::from([
            ("app".to_string(), "shop".to_string()),
            ("flags".to_string(), "-v, --no-cache".to_string()),
        ]);
        let bound = pipeline.bind_params(&provided).unwrap();
        assert_eq!(
            bound[&ParamName::new("flags").unwrap()],
            ResolvedValue::Array(vec!["-v".to_string(), "--no-cache".to_string()])
        );
    }

    #[test]
    fn duplicate_results_are_rejected() {
        let task = TaskSpec::new(TaskName::new("t").unwrap())
            .result(ResultName::new("out").unwrap())
            .result(ResultName::new("out").unwrap());
        assert!(matches!(
            task.check_declarations(),
            Err(DefinitionError::DuplicateDeclaration { what: "result", .. })
        ));
    }
}

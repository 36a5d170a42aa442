//! Parameter values with typed references.
//!
//! A [`ParamValue`] is parsed once, when a definition is loaded, into a list
//! of [`Segment`]s. References to task results, pipeline parameters and run
//! context are values of their own, so the graph builder reads data
//! dependencies straight off the segments and the resolver substitutes them
//! without scanning text again.
//!
//! Textual form (accepted by [`ParamValue::parse`], produced by `Display`):
//!
//! | form                           | segment                          |
//! |--------------------------------|----------------------------------|
//! | `$(tasks.<task>.results.<r>)`  | [`Segment::Result`]              |
//! | `$(params.<name>)`             | [`Segment::Param`]               |
//! | `$(context.pipelineRun.name)`  | [`Segment::Context`] (run id)    |
//! | `$(context.pipeline.name)`     | [`Segment::Context`] (pipeline)  |
//! | `$$(`                          | literal `$(`                     |
//!
//! Values are only built through `parse` and the single-segment
//! constructors, so a text segment never ends in `$` right before a
//! reference and `Display` output always parses back to the same segments.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::DefinitionError;
use super::names::{ParamName, ResultName, TaskName};

/// Address of one published result: `(task name, result name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResultRef {
    pub task: TaskName,
    pub result: ResultName,
}

impl ResultRef {
    pub fn new(task: TaskName, result: ResultName) -> Self {
        Self { task, result }
    }
}

impl fmt::Display for ResultRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$(tasks.{}.results.{})", self.task, self.result)
    }
}

/// Values known only once a run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextVar {
    /// Identifier of the current pipeline run.
    RunName,
    /// Name of the pipeline being run.
    PipelineName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Result(ResultRef),
    Param(ParamName),
    Context(ContextVar),
}

impl Segment {
    fn from_expression(expression: &str) -> Result<Self, DefinitionError> {
        let invalid = |reason: &str| DefinitionError::InvalidReference {
            reference: format!("$({expression})"),
            reason: reason.to_string(),
        };
        let parts: Vec<&str> = expression.split('.').collect();

        match parts.as_slice() {
            ["tasks", task, "results", result] => {
                let task = TaskName::new(*task).map_err(|e| invalid(&e.to_string()))?;
                let result = ResultName::new(*result).map_err(|e| invalid(&e.to_string()))?;
                Ok(Segment::Result(ResultRef { task, result }))
            }
            ["params", name] => {
                let name = ParamName::new(*name).map_err(|e| invalid(&e.to_string()))?;
                Ok(Segment::Param(name))
            }
            ["context", "pipelineRun", "name"] => Ok(Segment::Context(ContextVar::RunName)),
            ["context", "pipeline", "name"] => Ok(Segment::Context(ContextVar::PipelineName)),
            _ => Err(invalid("unknown reference form")),
        }
    }
}

/// A scalar parameter value: literal text interleaved with references.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParamValue {
    segments: Vec<Segment>,
}

impl ParamValue {
    pub fn parse(input: &str) -> Result<Self, DefinitionError> {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut rest = input;

        while let Some(pos) = rest.find("$(") {
            if rest[..pos].ends_with('$') {
                text.push_str(&rest[..pos - 1]);
                text.push_str("$(");
                rest = &rest[pos + 2..];
                continue;
            }

            text.push_str(&rest[..pos]);
            let after = &rest[pos + 2..];
            let end = after
                .find(')')
                .ok_or_else(|| DefinitionError::InvalidReference {
                    reference: rest[pos..].to_string(),
                    reason: "missing closing ')'".to_string(),
                })?;
            let segment = Segment::from_expression(&after[..end])?;

            if !text.is_empty() {
                segments.push(Segment::Text(std::mem::take(&mut text)));
            }
            segments.push(segment);
            rest = &after[end + 1..];
        }

        text.push_str(rest);
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }

        Ok(Self { segments })
    }

    pub fn literal(text: impl Into<String>) -> Self {
        let text = text.into();
        let segments = if text.is_empty() {
            Vec::new()
        } else {
            vec![Segment::Text(text)]
        };
        Self { segments }
    }

    pub fn result(task: TaskName, result: ResultName) -> Self {
        Self {
            segments: vec![Segment::Result(ResultRef { task, result })],
        }
    }

    pub fn param(name: ParamName) -> Self {
        Self {
            segments: vec![Segment::Param(name)],
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn result_refs(&self) -> impl Iterator<Item = &ResultRef> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Result(r) => Some(r),
            _ => None,
        })
    }

    pub fn param_refs(&self) -> impl Iterator<Item = &ParamName> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(p) => Some(p),
            _ => None,
        })
    }

    /// True when the value contains no references at all.
    pub fn is_literal(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Text(_)))
    }

    /// The plain text of a literal value, or `None` if it holds a reference.
    pub fn as_literal(&self) -> Option<String> {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.concat())
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => f.write_str(&text.replace("$(", "$$("))?,
                Segment::Result(r) => r.fmt(f)?,
                Segment::Param(p) => write!(f, "$(params.{p})")?,
                Segment::Context(ContextVar::RunName) => f.write_str("$(context.pipelineRun.name)")?,
                Segment::Context(ContextVar::PipelineName) => f.write_str("$(context.pipeline.name)")?,
            }
        }
        Ok(())
    }
}

impl TryFrom<String> for ParamValue {
    type Error = DefinitionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ParamValue> for String {
    fn from(value: ParamValue) -> Self {
        value.to_string()
    }
}

/// An argument bound to a declared parameter: a string, or an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamArg {
    Single(ParamValue),
    Many(Vec<ParamValue>),
}

impl ParamArg {
    pub fn values(&self) -> impl Iterator<Item = &ParamValue> {
        match self {
            ParamArg::Single(v) => std::slice::from_ref(v).iter(),
            ParamArg::Many(vs) => vs.iter(),
        }
    }

    pub fn result_refs(&self) -> impl Iterator<Item = &ResultRef> {
        self.values().flat_map(ParamValue::result_refs)
    }

    pub fn param_refs(&self) -> impl Iterator<Item = &ParamName> {
        self.values().flat_map(ParamValue::param_refs)
    }

    pub fn is_literal(&self) -> bool {
        self.values().all(ParamValue::is_literal)
    }
}

impl From<ParamValue> for ParamArg {
    fn from(value: ParamValue) -> Self {
        ParamArg::Single(value)
    }
}

/// A parameter value after substitution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResolvedValue {
    String(String),
    Array(Vec<String>),
}

impl ResolvedValue {
    /// Render as a single string; array elements are joined by spaces.
    pub fn to_plain(&self) -> String {
        match self {
            ResolvedValue::String(s) => s.clone(),
            ResolvedValue::Array(items) => items.join(" "),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ResolvedValue::String(s) => Some(s),
            ResolvedValue::Array(_) => None,
        }
    }
}

impl fmt::Display for ResolvedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_plain())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn task(name: &str) -> TaskName {
        TaskName::new(name).unwrap()
    }

    fn result(name: &str) -> ResultName {
        ResultName::new(name).unwrap()
    }

    #[test]
    fn parses_result_reference_inside_text() {
        let value = ParamValue::parse("image-registry/dev/app:$(tasks.git-rev.results.revision)")
            .unwrap();

        assert_eq!(
            value.segments(),
            &[
                Segment::Text("image-registry/dev/app:".to_string()),
                Segment::Result(ResultRef::new(task("git-rev"), result("revision"))),
            ]
        );
        let refs: Vec<_> = value.result_refs().collect();
        assert_eq!(refs.len(), 1);
        assert!(!value.is_literal());
    }

    #[test]
    fn parses_params_and_context() {
        let value = ParamValue::parse("$(params.app)-$(context.pipelineRun.name)").unwrap();
        assert_eq!(
            value.segments(),
            &[
                Segment::Param(ParamName::new("app").unwrap()),
                Segment::Text("-".to_string()),
                Segment::Context(ContextVar::RunName),
            ]
        );
    }

    #[test]
    fn escaped_reference_stays_literal() {
        let value = ParamValue::parse("echo $$(tasks.a.results.b)").unwrap();
        assert!(value.is_literal());
        assert_eq!(
            value.segments(),
            &[Segment::Text("echo $(tasks.a.results.b)".to_string())]
        );
        assert_eq!(value.to_string(), "echo $$(tasks.a.results.b)");
    }

    #[rstest]
    #[case("a$$$(tasks.x.results.y)")]
    #[case("$$$$(")]
    #[case("cost: $ $(params.price)")]
    #[case("$")]
    #[case("$(params.a)$$(params.b)")]
    fn display_parses_back_to_the_same_segments(#[case] input: &str) {
        let value = ParamValue::parse(input).unwrap();
        let reparsed = ParamValue::parse(&value.to_string()).unwrap();
        assert_eq!(reparsed.segments(), value.segments());
    }

    #[rstest]
    #[case::unclosed("$(tasks.a.results.b")]
    #[case::unknown_form("$(workspaces.src.path)")]
    #[case::bad_task_name("$(tasks.a b.results.c)")]
    #[case::short_form("$(tasks.a)")]
    fn rejects_malformed_references(#[case] input: &str) {
        assert!(matches!(
            ParamValue::parse(input),
            Err(DefinitionError::InvalidReference { .. })
        ));
    }

    #[test]
    fn display_reproduces_textual_form() {
        let input = "$(params.registry)/$(tasks.build.results.image)";
        assert_eq!(ParamValue::parse(input).unwrap().to_string(), input);
    }

    #[test]
    fn args_deserialize_as_string_or_array() {
        let single: ParamArg = serde_json::from_str("\"$(params.app)\"").unwrap();
        assert!(matches!(single, ParamArg::Single(_)));

        let many: ParamArg =
            serde_json::from_str("[\"--tag\", \"$(tasks.rev.results.revision)\"]").unwrap();
        assert!(matches!(many, ParamArg::Many(ref v) if v.len() == 2));
        assert_eq!(many.result_refs().count(), 1);
    }
}

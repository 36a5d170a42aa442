//! Dispatch-time parameter resolution.
//!
//! Substitution walks the typed segments of each value once. Inserted
//! values are plain text and are never expanded again, so a result that
//! happens to contain `$(...)` stays as it is.

use std::collections::BTreeMap;

use crate::domain::{
    ContextVar, DispatchError, ParamArg, ParamName, ParamValue, PipelineName, ResolvedValue,
    RunId, Segment, TaskSpec,
};

use super::store::ResultStore;

/// Values available for `$(context.*)` references.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub pipeline: PipelineName,
}

pub struct ParameterResolver<'a> {
    context: &'a RunContext,
    pipeline_params: &'a BTreeMap<ParamName, ResolvedValue>,
    store: &'a ResultStore,
}

impl<'a> ParameterResolver<'a> {
    pub fn new(
        context: &'a RunContext,
        pipeline_params: &'a BTreeMap<ParamName, ResolvedValue>,
        store: &'a ResultStore,
    ) -> Self {
        Self {
            context,
            pipeline_params,
            store,
        }
    }

    /// Resolve every declared parameter of `task`.
    pub fn resolve(
        &self,
        task: &TaskSpec,
    ) -> Result<BTreeMap<ParamName, ResolvedValue>, DispatchError> {
        let mut resolved = BTreeMap::new();
        for param in &task.params {
            let arg = task
                .args
                .get(&param.name)
                .or(param.default.as_ref())
                .ok_or_else(|| DispatchError::MissingParam(param.name.clone()))?;
            resolved.insert(param.name.clone(), self.resolve_arg(&param.name, arg)?);
        }
        Ok(resolved)
    }

    fn resolve_arg(&self, param: &ParamName, arg: &ParamArg) -> Result<ResolvedValue, DispatchError> {
        match arg {
            ParamArg::Single(value) => Ok(ResolvedValue::String(self.substitute(param, value)?)),
            ParamArg::Many(values) => {
                let mut items = Vec::with_capacity(values.len());
                for value in values {
                    // a bare array pipeline param is spliced element-wise
                    if let [Segment::Param(name)] = value.segments() {
                        if let Some(ResolvedValue::Array(array)) = self.pipeline_params.get(name) {
                            items.extend(array.iter().cloned());
                            continue;
                        }
                    }
                    items.push(self.substitute(param, value)?);
                }
                Ok(ResolvedValue::Array(items))
            }
        }
    }

    fn substitute(&self, param: &ParamName, value: &ParamValue) -> Result<String, DispatchError> {
        let mut out = String::new();
        for segment in value.segments() {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Result(reference) => {
                    let published = self.store.get(reference).ok_or_else(|| {
                        DispatchError::UnresolvedReference {
                            param: param.clone(),
                            reference: reference.clone(),
                        }
                    })?;
                    out.push_str(published);
                }
                Segment::Param(name) => {
                    let value = self.pipeline_params.get(name).ok_or_else(|| {
                        DispatchError::UnknownParam {
                            param: param.clone(),
                            missing: name.clone(),
                        }
                    })?;
                    out.push_str(&value.to_plain());
                }
                Segment::Context(ContextVar::RunName) => {
                    out.push_str(&self.context.run_id.to_string())
                }
                Segment::Context(ContextVar::PipelineName) => {
                    out.push_str(self.context.pipeline.as_str())
                }
            }
        }
        Ok(out)
    }
}

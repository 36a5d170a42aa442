//! Per-run, write-once result store.
//!
//! A task's results become visible in one step, when the scheduler
//! publishes them after the task succeeded. There is no partial state: a
//! task has either published all its declared results or none.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{ResultName, ResultRef, StoreError, TaskName, TaskRunState, TaskSpec};

#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    declared: BTreeMap<TaskName, BTreeSet<ResultName>>,
    published: BTreeMap<TaskName, BTreeMap<ResultName, String>>,
}

impl ResultStore {
    /// A store accepting results of the given tasks only.
    pub fn for_tasks<'a>(tasks: impl IntoIterator<Item = &'a TaskSpec>) -> Self {
        let declared = tasks
            .into_iter()
            .map(|task| (task.name.clone(), task.results.iter().cloned().collect()))
            .collect();
        Self {
            declared,
            published: BTreeMap::new(),
        }
    }

    /// Publish every declared result of `task` at once.
    ///
    /// `state` is the task's state at the time of the call and must be
    /// `Succeeded`. `results` must contain exactly the declared names.
    pub fn publish(
        &mut self,
        task: &TaskName,
        state: TaskRunState,
        results: BTreeMap<ResultName, String>,
    ) -> Result<(), StoreError> {
        let declared = self
            .declared
            .get(task)
            .ok_or_else(|| StoreError::UnknownTask(task.clone()))?;

        if state != TaskRunState::Succeeded {
            return Err(StoreError::NotSucceeded {
                task: task.clone(),
                state,
            });
        }
        if self.published.contains_key(task) {
            return Err(StoreError::AlreadyPublished(task.clone()));
        }
        if let Some(extra) = results.keys().find(|name| !declared.contains(*name)) {
            return Err(StoreError::UndeclaredResult {
                task: task.clone(),
                result: extra.clone(),
            });
        }
        if let Some(missing) = declared.iter().find(|name| !results.contains_key(*name)) {
            return Err(StoreError::MissingResult {
                task: task.clone(),
                result: missing.clone(),
            });
        }

        self.published.insert(task.clone(), results);
        Ok(())
    }

    pub fn get(&self, reference: &ResultRef) -> Option<&str> {
        self.published
            .get(&reference.task)?
            .get(&reference.result)
            .map(String::as_str)
    }

    pub fn is_published(&self, task: &TaskName) -> bool {
        self.published.contains_key(task)
    }

    pub fn results_of(&self, task: &TaskName) -> Option<&BTreeMap<ResultName, String>> {
        self.published.get(task)
    }

    pub fn snapshot(&self) -> BTreeMap<TaskName, BTreeMap<ResultName, String>> {
        self.published.clone()
    }
}

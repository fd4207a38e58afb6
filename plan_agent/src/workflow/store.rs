//! Result store for one plan run.
//!
//! Holds the accepted output of every completed task. Each slot is written
//! exactly once; a second write for the same task is rejected. Only
//! completed results are stored, so a lookup miss means the task has not
//! completed (yet or ever).

use plan_core::TaskId;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

/// Error types for result store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The task already has a stored result
    #[error("Result for task {0} already recorded")]
    AlreadyRecorded(TaskId),
}

/// Append-only mapping from task id to accepted result.
///
/// Cloning the store yields another handle to the same run-scoped data.
#[derive(Clone, Debug, Default)]
pub struct ResultStore {
    inner: Arc<RwLock<HashMap<TaskId, Value>>>,
}

impl ResultStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<TaskId, Value>> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TaskId, Value>> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records the accepted result of a task.
    ///
    /// # Returns
    ///
    /// - `Ok(())` if the slot was empty
    /// - `Err(StoreError::AlreadyRecorded)` if the task was already written
    pub fn record(&self, task_id: &TaskId, value: Value) -> Result<(), StoreError> {
        let mut map = self.write();
        if map.contains_key(task_id) {
            return Err(StoreError::AlreadyRecorded(task_id.clone()));
        }
        map.insert(task_id.clone(), value);
        Ok(())
    }

    /// Returns a copy of a task's stored result.
    pub fn get(&self, task_id: &TaskId) -> Option<Value> {
        self.read().get(task_id).cloned()
    }

    /// Returns true if the task has a stored result.
    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.read().contains_key(task_id)
    }

    /// Returns the number of stored results.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns true if nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Returns a point-in-time copy of every stored result.
    pub fn snapshot(&self) -> HashMap<TaskId, Value> {
        self.read().clone()
    }
}

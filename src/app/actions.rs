use anyhow::Result;

use crate::storage::{PolicyStatus, StorageHandle, TaskState};

/// Thin mutation layer between key handlers and storage, mirroring the
/// optimistic-versioning rules the storage layer enforces.
pub struct ActionDispatcher<'a> {
    storage: &'a StorageHandle,
}

impl<'a> ActionDispatcher<'a> {
    pub fn new(storage: &'a StorageHandle) -> Self {
        Self { storage }
    }

    /// Flips a task between TODO and DONE, passing the version the view
    /// was rendered from so a concurrent edit surfaces as a conflict
    /// instead of a silent overwrite.
    pub fn toggle_task(&self, task_id: i64) -> Result<TaskState> {
        let Some(task) = self.storage.fetch_task(task_id)? else {
            anyhow::bail!("task #{task_id} no longer exists");
        };
        let next = task.state.toggled();
        self.storage
            .set_task_state(task_id, next, Some(task.version))?;
        Ok(next)
    }

    pub fn assign_person(&self, task_id: i64, person_id: i64) -> Result<()> {
        self.storage.assign_task(task_id, person_id)
    }

    pub fn unassign_person(&self, task_id: i64) -> Result<()> {
        self.storage.unassign_task(task_id)
    }

    pub fn delete_policy(&self, policy_id: i64) -> Result<()> {
        self.storage.delete_policy(policy_id)
    }

    pub fn set_policy_status(&self, policy_id: i64, status: PolicyStatus) -> Result<()> {
        self.storage.set_policy_status(policy_id, status)
    }
}

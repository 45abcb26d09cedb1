//! Catalog facade whose calls go through the [`RetryExecutor`].
//!
//! Services hold a `RetryingCatalog` so a flapping store turns into latency
//! instead of errors. Validation, not-found and contention errors still come
//! straight back to the caller.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{CatalogError, Result};
use crate::retry::RetryExecutor;
use crate::types::*;
use crate::Catalog;

#[derive(Clone)]
pub struct RetryingCatalog {
    catalog: Catalog,
    executor: RetryExecutor,
}

impl RetryingCatalog {
    pub fn new(catalog: Catalog, executor: RetryExecutor) -> Self {
        Self { catalog, executor }
    }

    /// The unwrapped catalog, for calls whose failure the caller handles itself.
    pub fn inner(&self) -> &Catalog {
        &self.catalog
    }

    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    pub async fn get_tasks(&self, state: TaskState, limit: Limit) -> Result<Vec<Task>> {
        let catalog = &self.catalog;
        self.executor
            .run("get_tasks", move || catalog.get_tasks_in_state(state, limit))
            .await
    }

    pub async fn get_tasks_in_states(&self, states: &[TaskState], limit: Limit) -> Result<Vec<Task>> {
        let catalog = &self.catalog;
        self.executor
            .run("get_tasks_in_states", move || catalog.get_tasks_in_states(states, limit))
            .await
    }

    pub async fn count_in_states(&self, states: &[TaskState]) -> Result<u64> {
        let catalog = &self.catalog;
        self.executor
            .run("count_in_states", move || catalog.count_in_states(states))
            .await
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let catalog = &self.catalog;
        self.executor
            .run("get_task", move || catalog.get_task(task_id))
            .await
    }

    pub async fn get_all_tasks(&self) -> Result<Vec<Task>> {
        let catalog = &self.catalog;
        self.executor
            .run("get_all_tasks", move || catalog.get_all_tasks())
            .await
    }

    pub async fn get_processing_tasks(&self) -> Result<Vec<Task>> {
        let catalog = &self.catalog;
        self.executor
            .run("get_processing_tasks", move || catalog.get_processing_tasks())
            .await
    }

    pub async fn get_archived_tasks(&self, query: &ArchivedTaskQuery) -> Result<Vec<Task>> {
        let catalog = &self.catalog;
        self.executor
            .run("get_archived_tasks", move || catalog.get_archived_tasks(query))
            .await
    }

    pub async fn update_state(&self, task: &Task) -> Result<()> {
        let catalog = &self.catalog;
        self.executor
            .run("update_state", move || catalog.update_task(task))
            .await
    }

    pub async fn transition(
        &self,
        task_id: &str,
        from: TaskState,
        to: TaskState,
        error: Option<&str>,
    ) -> Result<bool> {
        let catalog = &self.catalog;
        self.executor
            .run("transition", move || catalog.transition_task(task_id, from, to, error))
            .await
    }

    pub async fn release_claim(&self, task_id: &str, member: &str, error: Option<&str>) -> Result<bool> {
        let catalog = &self.catalog;
        self.executor
            .run("release_claim", move || catalog.release_claim(task_id, member, error))
            .await
    }

    pub async fn try_lock_task(&self, task_id: &str, owner: &str) -> Result<bool> {
        let catalog = &self.catalog;
        self.executor
            .run("try_lock_task", move || catalog.try_lock_task(task_id, owner))
            .await
    }

    /// `LockContention` is never retried; the caller skips the task.
    pub async fn claim_task(&self, task_id: &str, member: &str) -> Result<Task> {
        let catalog = &self.catalog;
        self.executor
            .run("claim_task", move || catalog.claim_task(task_id, member))
            .await
    }

    pub async fn begin_archiving(&self, task_id: &str) -> Result<Task> {
        let catalog = &self.catalog;
        self.executor
            .run("begin_archiving", move || catalog.begin_archiving(task_id))
            .await
    }

    pub async fn release_locks_held_by(&self, owner: &str) -> Result<u64> {
        let catalog = &self.catalog;
        self.executor
            .run("release_locks_held_by", move || catalog.release_locks_held_by(owner))
            .await
    }

    pub async fn unlock_task(&self, task_id: &str, owner: &str) -> Result<bool> {
        let catalog = &self.catalog;
        self.executor
            .run("unlock_task", move || catalog.unlock_task(task_id, owner))
            .await
    }

    pub async fn add_timestamp(&self, task_id: &str, state: TaskState, at: DateTime<Utc>) -> Result<()> {
        let catalog = &self.catalog;
        self.executor
            .run("add_timestamp", move || catalog.add_state_timestamp(task_id, state, at))
            .await
    }

    pub async fn remove_timestamp(&self, task_id: &str, state: TaskState, at: DateTime<Utc>) -> Result<u64> {
        let catalog = &self.catalog;
        self.executor
            .run("remove_timestamp", move || catalog.remove_state_timestamp(task_id, state, at))
            .await
    }

    /// An insert that committed before a transient failure shows up as a
    /// duplicate on the next attempt; the stored row is returned then.
    pub async fn add_new_task(&self, task: &NewTask) -> Result<Task> {
        let catalog = &self.catalog;
        let interrupted = &AtomicBool::new(false);
        self.executor
            .run("add_new_task", move || add_task_resuming(catalog, task, interrupted))
            .await
    }

    pub async fn add_new_user(&self, user: &User) -> Result<()> {
        let catalog = &self.catalog;
        self.executor
            .run("add_new_user", move || catalog.add_user(user))
            .await
    }

    pub async fn get_user(&self, email: &str) -> Result<Option<User>> {
        let catalog = &self.catalog;
        self.executor
            .run("get_user", move || catalog.get_user(email))
            .await
    }

    pub async fn is_user_notifiable(&self, email: &str) -> Result<bool> {
        let catalog = &self.catalog;
        self.executor
            .run("is_user_notifiable", move || catalog.is_user_notifiable(email))
            .await
    }

    pub async fn get_users_to_notify(&self) -> Result<Vec<Ward>> {
        let catalog = &self.catalog;
        self.executor
            .run("get_users_to_notify", move || catalog.get_users_to_notify())
            .await
    }

    pub async fn remove_notification(&self, ward: &Ward) -> Result<bool> {
        let catalog = &self.catalog;
        self.executor
            .run("remove_notification", move || catalog.remove_notification(ward))
            .await
    }
}

async fn add_task_resuming(catalog: &Catalog, task: &NewTask, interrupted: &AtomicBool) -> Result<Task> {
    match catalog.add_task(task).await {
        Err(CatalogError::Validation(reason)) if interrupted.load(Ordering::SeqCst) => {
            match catalog.get_task(&task.task_id).await? {
                Some(existing) if same_request(&existing, task) => Ok(existing),
                _ => Err(CatalogError::Validation(reason)),
            }
        }
        Err(err) => {
            if err.is_transient() {
                interrupted.store(true, Ordering::SeqCst);
            }
            Err(err)
        }
        ok => ok,
    }
}

fn same_request(existing: &Task, new: &NewTask) -> bool {
    existing.dataset == new.dataset
        && existing.region == new.region
        && Some(existing.image_date) == new.image_date
        && existing.user_email == new.user_email
        && existing.priority == new.priority
}

//! Client-side task cache with optimistic updates.
//!
//! [`TaskStore`] is the single source of truth for task state in the client.
//! It reconciles three kinds of input:
//!
//! - user-initiated CRUD actions, which round-trip through the [`ApiClient`]
//! - server confirmations of those actions
//! - realtime events from other clients, applied through the mutation hooks
//!   ([`TaskStore::insert_from_event`], [`TaskStore::remove_from_event`],
//!   [`TaskStore::apply_optimistic`])
//!
//! # Optimistic updates
//!
//! Speculative and confirmed state live in the same collection, so readers
//! never have to tell them apart. Correctness rests on two things instead:
//! every write echoes the version the caller last saw, and a side ledger of
//! pending updates records the pre-mutation version of each speculatively
//! edited task. When a write fails, [`TaskStore::rollback`] discards the
//! ledger entry and re-fetches the canonical task.
//!
//! # Concurrency
//!
//! State sits behind a `std::sync::Mutex` that is only held for the duration
//! of a single mutation and never across an `.await`. Each hook is therefore
//! an atomic step, while network calls remain suspension points during which
//! realtime events may be applied. The policy for such races is
//! last-applied-wins; stale versions are left for the server to reject.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError};
use crate::types::{
    CreateTaskRequest, Task, TaskId, TaskMutation, TaskQuery, UpdateTaskRequest, DEFAULT_PAGE_SIZE,
};

/// Observable task state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskState {
    /// Cached tasks, newest first. Ids are unique.
    pub tasks: Vec<Task>,

    /// The focused task, mirroring its entry in `tasks`.
    pub current_task: Option<Task>,

    /// True while a read, create or delete is in flight. Updates do not set it.
    pub is_loading: bool,

    /// Message of the most recent failure, if not cleared.
    pub error: Option<String>,

    /// Optimistic updates awaiting confirmation, keyed by task id.
    pub pending: HashMap<TaskId, UpdateTaskRequest>,
}

impl TaskState {
    fn position(&self, id: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }

    /// Replaces the task with the same id in place, or prepends it when absent.
    fn upsert(&mut self, task: Task) {
        match self.position(&task.id) {
            Some(pos) => self.tasks[pos] = task.clone(),
            None => self.tasks.insert(0, task.clone()),
        }
        self.mirror(task);
    }

    /// Replaces the task with the same id if present and refreshes the focus
    /// mirror either way. Returns whether the collection held the task.
    fn replace(&mut self, task: Task) -> bool {
        let cached = match self.position(&task.id) {
            Some(pos) => {
                self.tasks[pos] = task.clone();
                true
            }
            None => false,
        };
        self.mirror(task);
        cached
    }

    fn remove(&mut self, id: &str) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != id);
        if self.current_task.as_ref().is_some_and(|c| c.id == id) {
            self.current_task = None;
        }
        self.tasks.len() != before
    }

    /// Copies `task` into the current-task slot when it is the focused one.
    fn mirror(&mut self, task: Task) {
        if let Some(current) = self.current_task.as_mut() {
            if current.id == task.id {
                *current = task;
            }
        }
    }

    /// Replaces the whole collection, keeping the focused task in sync.
    fn replace_all(&mut self, tasks: Vec<Task>) {
        self.tasks = unique_by_id(tasks);
        let focused = self
            .current_task
            .as_ref()
            .and_then(|current| self.tasks.iter().find(|t| t.id == current.id))
            .cloned();
        if let Some(task) = focused {
            self.current_task = Some(task);
        }
    }
}

/// Drops later duplicates so ids stay unique, keeping server order.
fn unique_by_id(tasks: Vec<Task>) -> Vec<Task> {
    let mut seen = HashSet::with_capacity(tasks.len());
    tasks
        .into_iter()
        .filter(|t| seen.insert(t.id.clone()))
        .collect()
}

/// The client's task cache and the actions that keep it in sync with the server.
///
/// Construct one per session; clones share the same state.
#[derive(Debug, Clone)]
pub struct TaskStore {
    api: ApiClient,
    page_size: u32,
    state: Arc<Mutex<TaskState>>,
}

impl TaskStore {
    /// Creates an empty store backed by `api`, listing with the default page size.
    #[must_use]
    pub fn new(api: ApiClient) -> Self {
        Self::with_page_size(api, DEFAULT_PAGE_SIZE)
    }

    /// Creates an empty store that lists `page_size` tasks per fetch.
    #[must_use]
    pub fn with_page_size(api: ApiClient, page_size: u32) -> Self {
        Self {
            api,
            page_size,
            state: Arc::new(Mutex::new(TaskState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Tasks requested per page by [`fetch_all`](Self::fetch_all).
    #[must_use]
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Returns a copy of the whole state.
    #[must_use]
    pub fn snapshot(&self) -> TaskState {
        self.lock().clone()
    }

    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        self.lock().tasks.clone()
    }

    #[must_use]
    pub fn task(&self, id: &str) -> Option<Task> {
        self.lock().tasks.iter().find(|t| t.id == id).cloned()
    }

    #[must_use]
    pub fn current_task(&self) -> Option<Task> {
        self.lock().current_task.clone()
    }

    /// Returns the pending-ledger entry for `id`, if an optimistic update is outstanding.
    #[must_use]
    pub fn pending(&self, id: &str) -> Option<UpdateTaskRequest> {
        self.lock().pending.get(id).cloned()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.lock().is_loading
    }

    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    // ------------------------------------------------------------------
    // Server-backed actions
    // ------------------------------------------------------------------

    /// Replaces the collection with the first page of tasks in `project_id`
    /// (or in every project when `None`).
    ///
    /// # Errors
    ///
    /// On failure the collection is left untouched and the message is stored as `error`.
    pub async fn fetch_all(&self, project_id: Option<&str>) -> Result<(), ApiError> {
        self.fetch_page(TaskQuery::first_page(project_id, self.page_size))
            .await
    }

    /// Replaces the collection with one page of tasks.
    ///
    /// # Errors
    ///
    /// On failure the collection is left untouched and the message is stored as `error`.
    pub async fn fetch_page(&self, query: TaskQuery) -> Result<(), ApiError> {
        self.begin_loading();
        match self.api.list_tasks(&query).await {
            Ok(page) => {
                let count = page.data.len();
                let mut state = self.lock();
                state.replace_all(page.data);
                state.is_loading = false;
                debug!(count, page = query.page, total = page.total, "Loaded tasks");
                Ok(())
            }
            Err(e) => Err(self.fail(e, true)),
        }
    }

    /// Replaces the collection with the tasks assigned to `assignee_id`.
    ///
    /// # Errors
    ///
    /// On failure the collection is left untouched and the message is stored as `error`.
    pub async fn fetch_by_assignee(&self, assignee_id: &str) -> Result<(), ApiError> {
        self.begin_loading();
        match self.api.tasks_by_assignee(assignee_id).await {
            Ok(tasks) => {
                let count = tasks.len();
                let mut state = self.lock();
                state.replace_all(tasks);
                state.is_loading = false;
                debug!(count, assignee_id = %assignee_id, "Loaded assigned tasks");
                Ok(())
            }
            Err(e) => Err(self.fail(e, true)),
        }
    }

    /// Fetches one task and writes it into the collection, replacing the
    /// cached copy or prepending it when absent.
    ///
    /// This is also how [`rollback`](Self::rollback) restores canonical state.
    ///
    /// # Errors
    ///
    /// On failure prior state is left untouched and the message is stored as `error`.
    pub async fn fetch_one(&self, id: &str) -> Result<Task, ApiError> {
        self.begin_loading();
        match self.api.get_task(id).await {
            Ok(task) => {
                let mut state = self.lock();
                state.upsert(task.clone());
                state.is_loading = false;
                debug!(task_id = %id, version = task.version, "Loaded task");
                Ok(task)
            }
            Err(e) => Err(self.fail(e, true)),
        }
    }

    /// Creates a task and prepends the server's canonical copy.
    ///
    /// If a realtime echo of the same task arrived first, that entry is
    /// replaced in place instead.
    ///
    /// # Errors
    ///
    /// On failure nothing changes besides `error`.
    pub async fn create(&self, request: CreateTaskRequest) -> Result<Task, ApiError> {
        self.begin_loading();
        match self.api.create_task(&request).await {
            Ok(task) => {
                let mut state = self.lock();
                state.upsert(task.clone());
                state.is_loading = false;
                info!(task_id = %task.id, "Task created");
                Ok(task)
            }
            Err(e) => Err(self.fail(e, true)),
        }
    }

    /// Sends an update carrying the caller's believed-current version.
    ///
    /// On success the cached task and its focused mirror become the server's
    /// copy and the pending entry for `id` is cleared. On failure the task is
    /// rolled back to canonical state before the error is recorded. The
    /// loading flag is not touched, so concurrent per-task edits never block
    /// each other.
    ///
    /// # Errors
    ///
    /// Returns the update's [`ApiError`]; its message is stored as `error`.
    pub async fn update(&self, id: &str, request: UpdateTaskRequest) -> Result<Task, ApiError> {
        match self.api.update_task(id, &request).await {
            Ok(task) => {
                let mut state = self.lock();
                if !state.replace(task.clone()) {
                    debug!(task_id = %id, "Updated task is no longer cached");
                }
                state.pending.remove(id);
                debug!(task_id = %id, version = task.version, "Update confirmed");
                Ok(task)
            }
            Err(e) => {
                warn!(task_id = %id, error = %e, "Update failed, rolling back");
                if let Err(rollback_err) = self.rollback(id).await {
                    debug!(task_id = %id, error = %rollback_err, "Rollback fetch failed");
                }
                self.lock().error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Deletes a task. On success it leaves the collection, the focus is
    /// cleared if it pointed at it, and any pending entry is dropped.
    ///
    /// # Errors
    ///
    /// On failure the task remains and the message is stored as `error`.
    pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
        self.begin_loading();
        match self.api.delete_task(id).await {
            Ok(()) => {
                let mut state = self.lock();
                state.remove(id);
                state.pending.remove(id);
                state.is_loading = false;
                info!(task_id = %id, "Task deleted");
                Ok(())
            }
            Err(e) => Err(self.fail(e, true)),
        }
    }

    /// Discards the pending entry for `id` and re-fetches the canonical task.
    ///
    /// No-op without a pending entry. The entry is removed once the fetch
    /// resolves, whether or not it succeeded.
    ///
    /// # Errors
    ///
    /// Returns the re-fetch error, if any.
    pub async fn rollback(&self, id: &str) -> Result<(), ApiError> {
        if !self.lock().pending.contains_key(id) {
            return Ok(());
        }

        debug!(task_id = %id, "Rolling back optimistic update");
        let result = self.fetch_one(id).await.map(|_| ());
        self.lock().pending.remove(id);
        result
    }

    // ------------------------------------------------------------------
    // Local mutation hooks
    // ------------------------------------------------------------------

    /// Applies a mutation locally, ahead of or without server confirmation.
    ///
    /// The first optimistic call for a task records its pre-mutation version
    /// (the rollback anchor) in the pending ledger; later calls before
    /// confirmation mutate the task but leave the anchor alone. Tasks that
    /// are not cached are ignored.
    ///
    /// Returns whether the mutation was applied.
    pub fn apply_optimistic(&self, id: &str, mutation: impl Into<TaskMutation>) -> bool {
        let mutation = mutation.into();
        if let TaskMutation::Replace(task) = &mutation {
            if task.id != id {
                warn!(task_id = %id, replacement_id = %task.id, "Replacement id mismatch, ignoring");
                return false;
            }
        }

        let mut state = self.lock();
        let Some(pos) = state.position(id) else {
            debug!(task_id = %id, "Optimistic update for uncached task ignored");
            return false;
        };

        let base_version = state.tasks[pos].version;
        state
            .pending
            .entry(id.to_string())
            .or_insert_with(|| UpdateTaskRequest::new(base_version, mutation.changes()));

        mutation.apply_to(&mut state.tasks[pos]);
        if let Some(current) = state.current_task.as_mut().filter(|c| c.id == id) {
            mutation.apply_to(current);
        }
        true
    }

    /// Inserts a task created elsewhere. An already cached id is replaced in place.
    pub fn insert_from_event(&self, task: Task) {
        debug!(task_id = %task.id, "Task inserted from event");
        self.lock().upsert(task);
    }

    /// Removes a task deleted elsewhere. The pending ledger is not touched.
    pub fn remove_from_event(&self, id: &str) {
        if self.lock().remove(id) {
            debug!(task_id = %id, "Task removed from event");
        }
    }

    /// Sets or clears the focused task.
    pub fn set_focus(&self, task: Option<Task>) {
        self.lock().current_task = task;
    }

    pub fn clear_error(&self) {
        self.lock().error = None;
    }

    fn begin_loading(&self) {
        let mut state = self.lock();
        state.is_loading = true;
        state.error = None;
    }

    /// Records `error` in state and hands it back for propagation.
    fn fail(&self, error: ApiError, clear_loading: bool) -> ApiError {
        let mut state = self.lock();
        state.error = Some(error.to_string());
        if clear_loading {
            state.is_loading = false;
        }
        error
    }
}

//! Wire types shared by the REST gateway, the task store and the realtime channel.
//!
//! All types serialize to camelCase JSON. Enum values use the kebab-case
//! spellings the backend emits (`in-progress`, `task-created`, ...).

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque server-assigned task identifier.
pub type TaskId = String;

/// Default page requested by [`TaskQuery::default`].
pub const DEFAULT_PAGE: u32 = 1;

/// Default page size requested by [`TaskQuery::default`].
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Workflow status of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Review,
    Done,
}

/// Priority of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl TaskStatus {
    /// The wire name, e.g. `in-progress`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in-progress",
            Self::Review => "review",
            Self::Done => "done",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(Self::Todo),
            "in-progress" => Ok(Self::InProgress),
            "review" => Ok(Self::Review),
            "done" => Ok(Self::Done),
            other => Err(format!(
                "unknown status '{other}' (expected todo, in-progress, review or done)"
            )),
        }
    }
}

impl TaskPriority {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!(
                "unknown priority '{other}' (expected low, medium, high or critical)"
            )),
        }
    }
}

/// A server-owned task record.
///
/// `version` is assigned by the server on every successful mutation and must
/// be echoed back on writes. Fields the client does not model are kept in
/// `extra` so a cached task round-trips without loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,

    #[serde(default)]
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub status: TaskStatus,

    #[serde(default)]
    pub priority: TaskPriority,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,

    pub version: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    /// Server fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    /// Creates a task with the given identity and defaults for everything else.
    ///
    /// Mostly useful for fixtures; real tasks come from the server.
    #[must_use]
    pub fn new(id: impl Into<TaskId>, title: impl Into<String>, version: u64) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            status: TaskStatus::default(),
            priority: TaskPriority::default(),
            assignee_id: None,
            project_id: None,
            due_date: None,
            version,
            created_at: None,
            updated_at: None,
            extra: Map::new(),
        }
    }

    /// Sets the status, builder style.
    #[must_use]
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }
}

/// A partial set of task fields. Absent fields are left untouched when applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
}

impl TaskChanges {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn with_assignee(mut self, assignee_id: impl Into<String>) -> Self {
        self.assignee_id = Some(assignee_id.into());
        self
    }

    /// Returns true when no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Overwrites the fields of `task` that are present in this change set.
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title.clone_from(title);
        }
        if let Some(description) = &self.description {
            task.description = Some(description.clone());
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(assignee_id) = &self.assignee_id {
            task.assignee_id = Some(assignee_id.clone());
        }
        if let Some(project_id) = &self.project_id {
            task.project_id = Some(project_id.clone());
        }
        if let Some(due_date) = self.due_date {
            task.due_date = Some(due_date);
        }
    }
}

impl From<&Task> for TaskChanges {
    fn from(task: &Task) -> Self {
        Self {
            title: Some(task.title.clone()),
            description: task.description.clone(),
            status: Some(task.status),
            priority: Some(task.priority),
            assignee_id: task.assignee_id.clone(),
            project_id: task.project_id.clone(),
            due_date: task.due_date,
        }
    }
}

/// A local mutation applied to a cached task ahead of (or instead of) server confirmation.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskMutation {
    /// Merge the present fields into the cached task.
    Patch(TaskChanges),
    /// Replace the cached task wholesale, version included.
    Replace(Task),
}

impl TaskMutation {
    /// The attempted fields, as recorded in the pending ledger.
    #[must_use]
    pub fn changes(&self) -> TaskChanges {
        match self {
            Self::Patch(changes) => changes.clone(),
            Self::Replace(task) => TaskChanges::from(task),
        }
    }

    /// Applies the mutation to `task`.
    pub fn apply_to(&self, task: &mut Task) {
        match self {
            Self::Patch(changes) => changes.apply_to(task),
            Self::Replace(replacement) => *task = replacement.clone(),
        }
    }
}

impl From<TaskChanges> for TaskMutation {
    fn from(changes: TaskChanges) -> Self {
        Self::Patch(changes)
    }
}

impl From<Task> for TaskMutation {
    fn from(task: Task) -> Self {
        Self::Replace(task)
    }
}

/// Body of `PATCH /tasks/:id`: the version the caller believes is current plus the changes.
///
/// Also the shape of a pending-ledger entry, where `version` is the rollback anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    pub version: u64,

    #[serde(flatten)]
    pub changes: TaskChanges,
}

impl UpdateTaskRequest {
    #[must_use]
    pub fn new(version: u64, changes: TaskChanges) -> Self {
        Self { version, changes }
    }
}

/// Body of `POST /tasks`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
}

impl CreateTaskRequest {
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Scope and paging for `GET /tasks`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskQuery {
    pub project_id: Option<String>,
    pub page: u32,
    pub page_size: u32,
}

impl Default for TaskQuery {
    fn default() -> Self {
        Self {
            project_id: None,
            page: DEFAULT_PAGE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl TaskQuery {
    /// First page of `project_id` (or of every project when `None`).
    #[must_use]
    pub fn first_page(project_id: Option<&str>, page_size: u32) -> Self {
        Self {
            project_id: project_id.map(str::to_string),
            page: DEFAULT_PAGE,
            page_size,
        }
    }

    /// Query-string pairs in the order the backend documents them.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("page", self.page.to_string()),
            ("pageSize", self.page_size.to_string()),
        ];
        if let Some(project_id) = &self.project_id {
            pairs.push(("projectId", project_id.clone()));
        }
        pairs
    }
}

/// Standard response envelope returned by every REST endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Older backends spell this `sucess`; both are accepted.
    #[serde(alias = "sucess")]
    pub success: bool,

    pub data: Option<T>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
    pub data: Vec<T>,

    #[serde(default)]
    pub total: u64,

    #[serde(default)]
    pub page: u32,

    #[serde(default)]
    pub page_size: u32,

    #[serde(default)]
    pub total_pages: u32,
}

/// Public profile of an authenticated user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,

    #[serde(default)]
    pub name: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of `POST /auth/login`.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Body of `POST /auth/register`.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

/// Body of `POST /auth/refresh`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Access/refresh token pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Payload returned by login and register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
}

/// An event pushed by the server over the realtime channel.
///
/// Adjacently tagged: `{"type": "task-deleted", "payload": {"taskId": "t1"}}`.
/// Kinds outside this enumeration fail to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum RealtimeEvent {
    TaskCreated {
        task: Task,
    },
    TaskUpdated {
        task: Task,
    },
    TaskDeleted {
        #[serde(rename = "taskId")]
        task_id: TaskId,
    },
    UserJoined(Value),
    UserLeft(Value),
    PresenceUpdated(Value),
    #[serde(alias = "typing.started")]
    TypingStarted(Value),
    #[serde(alias = "typing.stopped")]
    TypingStopped(Value),
}

impl RealtimeEvent {
    /// The wire name of this event kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TaskCreated { .. } => "task-created",
            Self::TaskUpdated { .. } => "task-updated",
            Self::TaskDeleted { .. } => "task-deleted",
            Self::UserJoined(_) => "user-joined",
            Self::UserLeft(_) => "user-left",
            Self::PresenceUpdated(_) => "presence-updated",
            Self::TypingStarted(_) => "typing-started",
            Self::TypingStopped(_) => "typing-stopped",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_status_serializes_to_kebab_case() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::InProgress).unwrap(),
            "\"in-progress\""
        );
        assert_eq!(
            serde_json::to_string(&TaskStatus::Review).unwrap(),
            "\"review\""
        );
        assert_eq!(serde_json::to_string(&TaskStatus::Todo).unwrap(), "\"todo\"");
    }

    #[test]
    fn status_and_priority_parse_wire_names() {
        for status in [
            TaskStatus::Todo,
            TaskStatus::InProgress,
            TaskStatus::Review,
            TaskStatus::Done,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>(), Ok(status));
        }
        assert_eq!("critical".parse::<TaskPriority>(), Ok(TaskPriority::Critical));
        assert!("blocked".parse::<TaskStatus>().is_err());
        assert!("urgent".parse::<TaskPriority>().is_err());
    }

    #[test]
    fn task_decodes_review_status_and_critical_priority() {
        let task: Task = serde_json::from_value(json!({
            "id": "t9",
            "title": "Ship it",
            "status": "review",
            "priority": "critical",
            "version": 4
        }))
        .unwrap();

        assert_eq!(task.status, TaskStatus::Review);
        assert_eq!(task.priority, TaskPriority::Critical);
        assert!(serde_json::from_value::<Task>(json!({
            "id": "t9", "status": "in-review", "version": 1
        }))
        .is_err());
    }

    #[test]
    fn task_deserializes_minimal_record() {
        let task: Task =
            serde_json::from_value(json!({"id": "t1", "status": "todo", "version": 1})).unwrap();

        assert_eq!(task.id, "t1");
        assert_eq!(task.status, TaskStatus::Todo);
        assert_eq!(task.version, 1);
        assert!(task.title.is_empty());
        assert!(task.extra.is_empty());
    }

    #[test]
    fn task_keeps_unknown_fields() {
        let raw = json!({
            "id": "t1",
            "title": "Write docs",
            "status": "done",
            "priority": "high",
            "assigneeId": "u1",
            "version": 4,
            "labels": ["docs"],
        });

        let task: Task = serde_json::from_value(raw).unwrap();
        assert_eq!(task.assignee_id.as_deref(), Some("u1"));
        assert_eq!(task.extra.get("labels"), Some(&json!(["docs"])));

        let back = serde_json::to_value(&task).unwrap();
        assert_eq!(back["labels"], json!(["docs"]));
        assert_eq!(back["assigneeId"], "u1");
    }

    #[test]
    fn task_changes_apply_only_present_fields() {
        let mut task = Task::new("t1", "Original", 3);
        task.description = Some("keep me".to_string());

        TaskChanges::new()
            .with_status(TaskStatus::Done)
            .with_title("Renamed")
            .apply_to(&mut task);

        assert_eq!(task.title, "Renamed");
        assert_eq!(task.status, TaskStatus::Done);
        assert_eq!(task.description.as_deref(), Some("keep me"));
        assert_eq!(task.version, 3);
    }

    #[test]
    fn task_changes_is_empty() {
        assert!(TaskChanges::new().is_empty());
        assert!(!TaskChanges::new().with_priority(TaskPriority::Low).is_empty());
    }

    #[test]
    fn replace_mutation_overwrites_version() {
        let mut task = Task::new("t1", "Old", 1);
        let replacement = Task::new("t1", "New", 2).with_status(TaskStatus::Done);

        TaskMutation::from(replacement.clone()).apply_to(&mut task);

        assert_eq!(task, replacement);
    }

    #[test]
    fn update_request_flattens_changes() {
        let request =
            UpdateTaskRequest::new(7, TaskChanges::new().with_status(TaskStatus::InProgress));

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, json!({"version": 7, "status": "in-progress"}));
    }

    #[test]
    fn task_query_pairs_include_project_when_set() {
        let query = TaskQuery::first_page(Some("p1"), 50);
        assert_eq!(
            query.to_pairs(),
            vec![
                ("page", "1".to_string()),
                ("pageSize", "50".to_string()),
                ("projectId", "p1".to_string()),
            ]
        );

        let unscoped = TaskQuery::default();
        assert_eq!(unscoped.to_pairs().len(), 2);
    }

    #[test]
    fn api_response_accepts_misspelled_success() {
        let response: ApiResponse<Task> = serde_json::from_value(json!({
            "sucess": true,
            "data": {"id": "t1", "version": 1}
        }))
        .unwrap();

        assert!(response.success);
        assert_eq!(response.data.unwrap().id, "t1");
    }

    #[test]
    fn api_response_data_defaults_to_none() {
        let response: ApiResponse<Task> =
            serde_json::from_value(json!({"success": false, "message": "nope"})).unwrap();

        assert!(!response.success);
        assert!(response.data.is_none());
        assert_eq!(response.message.as_deref(), Some("nope"));
    }

    fn decode_envelope<T: serde::de::DeserializeOwned>(value: Value) -> ApiResponse<T> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn api_response_decodes_for_any_deserializable_payload() {
        let response: ApiResponse<Paginated<Task>> = decode_envelope(json!({
            "success": true,
            "data": {"data": [{"id": "t1", "version": 1}], "total": 1}
        }));
        assert_eq!(response.data.unwrap().data[0].id, "t1");

        let empty: ApiResponse<User> = decode_envelope(json!({"success": true}));
        assert!(empty.data.is_none());
    }

    #[test]
    fn realtime_task_deleted_decodes() {
        let event: RealtimeEvent =
            serde_json::from_value(json!({"type": "task-deleted", "payload": {"taskId": "t1"}}))
                .unwrap();

        assert_eq!(
            event,
            RealtimeEvent::TaskDeleted {
                task_id: "t1".to_string()
            }
        );
        assert_eq!(event.kind(), "task-deleted");
    }

    #[test]
    fn realtime_task_created_decodes_nested_task() {
        let event: RealtimeEvent = serde_json::from_value(json!({
            "type": "task-created",
            "payload": {"task": {"id": "t9", "title": "New", "version": 1}}
        }))
        .unwrap();

        match event {
            RealtimeEvent::TaskCreated { task } => {
                assert_eq!(task.id, "t9");
                assert_eq!(task.title, "New");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn realtime_typing_accepts_dotted_alias() {
        let event: RealtimeEvent =
            serde_json::from_value(json!({"type": "typing.started", "payload": "u1"})).unwrap();

        assert_eq!(event, RealtimeEvent::TypingStarted(json!("u1")));
    }

    #[test]
    fn realtime_unknown_kind_is_rejected() {
        let result: Result<RealtimeEvent, _> =
            serde_json::from_value(json!({"type": "task-archived", "payload": {"taskId": "t1"}}));

        assert!(result.is_err());
    }
}

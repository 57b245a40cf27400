//! REST gateway for the Taskdeck backend.
//!
//! [`ApiClient`] issues every HTTP call the client makes and normalizes the
//! results:
//!
//! - A bearer `Authorization` header is attached when an access token is set,
//!   and omitted otherwise (the server decides what needs auth).
//! - Successful responses are unwrapped from the `{success, data, message}`
//!   envelope.
//! - Non-2xx responses become [`ApiError::Status`] carrying the server's
//!   `message`, or `"API request failed"` when the body has none.
//!
//! The client is cheap to clone; clones share the connection pool and the
//! access token.
//!
//! # Example
//!
//! ```rust,ignore
//! use taskdeck_client::api::ApiClient;
//! use taskdeck_client::types::TaskQuery;
//!
//! let client = ApiClient::new("http://localhost:3001", Duration::from_secs(30))?;
//! client.set_access_token(Some("token".to_string()));
//! let page = client.list_tasks(&TaskQuery::default()).await?;
//! println!("{} tasks", page.data.len());
//! ```

use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::types::{
    ApiResponse, AuthResponse, CreateTaskRequest, LoginRequest, Paginated, RefreshRequest,
    RegisterRequest, Task, TaskQuery, TokenPair, UpdateTaskRequest, User,
};

/// Message used when an error response carries no message of its own.
const FALLBACK_ERROR_MESSAGE: &str = "API request failed";

/// Errors returned by the REST gateway.
///
/// The `Display` output is what the stores surface to the user as `error`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request did not complete within the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The server could not be reached.
    #[error("server unavailable: {0}")]
    Unavailable(String),

    /// The server answered with a non-success status.
    ///
    /// Stale-version conflicts arrive here too; the backend does not tag them.
    #[error("{message} (HTTP {status})")]
    Status { status: u16, message: String },

    /// A 2xx envelope reported `success: false` or carried no data.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The response body could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The HTTP client could not be built.
    #[error("client configuration error: {0}")]
    Configuration(String),
}

impl ApiError {
    /// HTTP status for [`ApiError::Status`], `None` for everything else.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Error body shape returned by the backend on failure.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for the Taskdeck REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http_client: Client,
    base_url: String,
    base: Url,
    timeout: Duration,
    access_token: Arc<RwLock<Option<String>>>,
}

impl ApiClient {
    /// Creates a client for `base_url` with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Configuration`] if `base_url` is not an absolute
    /// http(s) URL or the HTTP client cannot be created.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let base = Url::parse(&base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| ApiError::Configuration(format!("invalid base URL '{base_url}'")))?;

        let http_client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| ApiError::Configuration(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            base_url,
            base,
            timeout,
            access_token: Arc::new(RwLock::new(None)),
        })
    }

    /// Creates a client from the loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Configuration`] if the HTTP client cannot be created.
    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        Self::new(config.api_url.clone(), config.request_timeout)
    }

    /// Returns the base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sets or clears the bearer token attached to subsequent requests.
    pub fn set_access_token(&self, token: Option<String>) {
        let mut slot = self
            .access_token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = token.filter(|t| !t.is_empty());
    }

    /// Returns true when a bearer token is currently set.
    #[must_use]
    pub fn has_access_token(&self) -> bool {
        self.current_token().is_some()
    }

    fn current_token(&self) -> Option<String> {
        self.access_token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Appends `segments` to the base path, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Starts a request with the JSON content type and, when available, the bearer token.
    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let builder = self
            .http_client
            .request(method, self.url(segments))
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        match self.current_token() {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {token}")),
            None => builder,
        }
    }

    /// Sends the request and returns the response if its status is 2xx.
    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout(self.timeout)
            } else if e.is_connect() {
                ApiError::Unavailable(format!("connection failed: {e}"))
            } else {
                ApiError::Unavailable(format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| FALLBACK_ERROR_MESSAGE.to_string());

        warn!(status = status.as_u16(), message = %message, "Request failed");

        Err(ApiError::Status {
            status: status.as_u16(),
            message,
        })
    }

    /// Sends the request and unwraps `data` from the response envelope.
    async fn fetch<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = self.send(builder).await?;

        let envelope: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("failed to parse response: {e}")))?;

        match envelope {
            ApiResponse {
                success: true,
                data: Some(data),
                ..
            } => Ok(data),
            ApiResponse { message, .. } => Err(ApiError::Rejected(
                message.unwrap_or_else(|| "response carried no data".to_string()),
            )),
        }
    }

    /// Sends a request whose response carries no data.
    ///
    /// An empty body (e.g. `204 No Content`) counts as success.
    async fn execute(&self, builder: RequestBuilder) -> Result<(), ApiError> {
        let response = self.send(builder).await?;
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("failed to read response: {e}")))?;

        if body.trim().is_empty() {
            return Ok(());
        }

        let envelope: ApiResponse<serde_json::Value> = serde_json::from_str(&body)
            .map_err(|e| ApiError::InvalidResponse(format!("failed to parse response: {e}")))?;

        if envelope.success {
            Ok(())
        } else {
            Err(ApiError::Rejected(
                envelope
                    .message
                    .unwrap_or_else(|| "request was not successful".to_string()),
            ))
        }
    }

    // ------------------------------------------------------------------
    // Auth
    // ------------------------------------------------------------------

    /// `POST /auth/login`
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        debug!(url = %self.url(&["auth", "login"]), "Logging in");
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        self.fetch(self.request(Method::POST, &["auth", "login"]).json(&body))
            .await
    }

    /// `POST /auth/register`
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<AuthResponse, ApiError> {
        debug!(url = %self.url(&["auth", "register"]), "Registering account");
        let body = RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
            name: name.to_string(),
        };
        self.fetch(self.request(Method::POST, &["auth", "register"]).json(&body))
            .await
    }

    /// `POST /auth/refresh`
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        debug!("Refreshing access token");
        let body = RefreshRequest {
            refresh_token: refresh_token.to_string(),
        };
        self.fetch(self.request(Method::POST, &["auth", "refresh"]).json(&body))
            .await
    }

    /// `POST /auth/logout`
    pub async fn logout(&self) -> Result<(), ApiError> {
        debug!("Logging out");
        self.execute(self.request(Method::POST, &["auth", "logout"]))
            .await
    }

    /// `GET /auth/me`
    pub async fn profile(&self) -> Result<User, ApiError> {
        self.fetch(self.request(Method::GET, &["auth", "me"])).await
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    /// `GET /tasks?page&pageSize[&projectId]`
    pub async fn list_tasks(&self, query: &TaskQuery) -> Result<Paginated<Task>, ApiError> {
        debug!(
            project_id = ?query.project_id,
            page = query.page,
            page_size = query.page_size,
            "Listing tasks"
        );
        self.fetch(
            self.request(Method::GET, &["tasks"])
                .query(&query.to_pairs()),
        )
        .await
    }

    /// `GET /tasks/:id`
    pub async fn get_task(&self, id: &str) -> Result<Task, ApiError> {
        debug!(task_id = %id, "Fetching task");
        self.fetch(self.request(Method::GET, &["tasks", id]))
            .await
    }

    /// `POST /tasks`
    pub async fn create_task(&self, request: &CreateTaskRequest) -> Result<Task, ApiError> {
        debug!(title = %request.title, "Creating task");
        self.fetch(self.request(Method::POST, &["tasks"]).json(request))
            .await
    }

    /// `PATCH /tasks/:id`
    pub async fn update_task(
        &self,
        id: &str,
        request: &UpdateTaskRequest,
    ) -> Result<Task, ApiError> {
        debug!(task_id = %id, version = request.version, "Updating task");
        self.fetch(
            self.request(Method::PATCH, &["tasks", id])
                .json(request),
        )
        .await
    }

    /// `DELETE /tasks/:id`
    pub async fn delete_task(&self, id: &str) -> Result<(), ApiError> {
        debug!(task_id = %id, "Deleting task");
        self.execute(self.request(Method::DELETE, &["tasks", id]))
            .await
    }

    /// `GET /tasks/asignee/:asigneeId` (path spelling is the backend's).
    pub async fn tasks_by_assignee(&self, assignee_id: &str) -> Result<Vec<Task>, ApiError> {
        debug!(assignee_id = %assignee_id, "Listing tasks by assignee");
        self.fetch(
            self.request(Method::GET, &["tasks", "asignee", assignee_id]),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_client(mock_server: &MockServer) -> ApiClient {
        ApiClient::new(mock_server.uri(), Duration::from_secs(5))
            .expect("failed to create test client")
    }

    fn task_json(id: &str, version: u64) -> serde_json::Value {
        json!({"id": id, "title": "Task", "status": "todo", "version": version})
    }

    #[test]
    fn new_trims_trailing_slash() {
        let client = ApiClient::new("http://localhost:3001/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:3001");
    }

    #[test]
    fn new_rejects_relative_base_url() {
        let err = ApiClient::new("localhost", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ApiError::Configuration(ref m) if m.contains("localhost")));
    }

    #[test]
    fn empty_token_is_treated_as_absent() {
        let client = ApiClient::new("http://localhost:3001", Duration::from_secs(1)).unwrap();
        client.set_access_token(Some(String::new()));
        assert!(!client.has_access_token());

        client.set_access_token(Some("abc".to_string()));
        assert!(client.has_access_token());
    }

    #[tokio::test]
    async fn bearer_header_sent_when_token_set() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/tasks/t1"))
            .and(header("Authorization", "Bearer secret-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "data": task_json("t1", 1)})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        client.set_access_token(Some("secret-token".to_string()));

        let task = client.get_task("t1").await.unwrap();
        assert_eq!(task.id, "t1");
    }

    #[tokio::test]
    async fn bearer_header_omitted_without_token() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/auth/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"id": "u1", "email": "a@b.c", "name": "Ada"}
            })))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let user = client.profile().await.unwrap();
        assert_eq!(user.name, "Ada");

        let requests = mock_server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn list_tasks_sends_paging_and_scope() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/tasks"))
            .and(query_param("page", "1"))
            .and(query_param("pageSize", "20"))
            .and(query_param("projectId", "p1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {
                    "data": [task_json("t1", 1), task_json("t2", 3)],
                    "total": 2, "page": 1, "pageSize": 20, "totalPages": 1
                }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let page = client
            .list_tasks(&TaskQuery::first_page(Some("p1"), 20))
            .await
            .unwrap();

        assert_eq!(page.data.len(), 2);
        assert_eq!(page.total, 2);
        assert_eq!(page.data[1].version, 3);
    }

    #[tokio::test]
    async fn update_task_sends_version_with_changes() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path("/tasks/t1"))
            .and(body_json(json!({"version": 2, "status": "done"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "data": task_json("t1", 3)})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let request = UpdateTaskRequest::new(
            2,
            crate::types::TaskChanges::new().with_status(crate::types::TaskStatus::Done),
        );

        let task = client.update_task("t1", &request).await.unwrap();
        assert_eq!(task.version, 3);
    }

    #[tokio::test]
    async fn error_status_uses_server_message() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path("/tasks/t1"))
            .respond_with(
                ResponseTemplate::new(409).set_body_json(json!({"message": "Version mismatch"})),
            )
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let err = client
            .update_task("t1", &UpdateTaskRequest::new(1, Default::default()))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ApiError::Status { status: 409, ref message } if message == "Version mismatch"
        ));
        assert_eq!(err.status(), Some(409));
        assert_eq!(err.to_string(), "Version mismatch (HTTP 409)");
    }

    #[tokio::test]
    async fn error_status_without_body_uses_fallback_message() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/tasks/missing"))
            .respond_with(ResponseTemplate::new(500).set_body_string("<html>oops</html>"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let err = client.get_task("missing").await.unwrap_err();

        assert!(matches!(
            err,
            ApiError::Status { status: 500, ref message } if message == FALLBACK_ERROR_MESSAGE
        ));
    }

    #[tokio::test]
    async fn unsuccessful_envelope_is_rejected() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/tasks/t1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": false, "message": "archived"})),
            )
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let err = client.get_task("t1").await.unwrap_err();

        assert!(matches!(err, ApiError::Rejected(ref m) if m == "archived"));
    }

    #[tokio::test]
    async fn malformed_json_is_invalid_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/tasks/t1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let err = client.get_task("t1").await.unwrap_err();

        assert!(matches!(err, ApiError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn delete_accepts_empty_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/tasks/t1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        assert!(client.delete_task("t1").await.is_ok());
    }

    #[tokio::test]
    async fn delete_accepts_null_data_envelope() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/tasks/t1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": null})),
            )
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        assert!(client.delete_task("t1").await.is_ok());
    }

    #[tokio::test]
    async fn tasks_by_assignee_uses_backend_path() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/tasks/asignee/u7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": [task_json("t4", 1)]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let tasks = client.tasks_by_assignee("u7").await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "t4");
    }

    #[tokio::test]
    async fn task_id_is_encoded_as_single_path_segment() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/tasks/a%2Fb%3Fc%23d"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/tasks/a/b"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        client.delete_task("a/b?c#d").await.unwrap();
    }

    #[tokio::test]
    async fn base_path_prefix_is_kept() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/tasks/t1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "data": task_json("t1", 2)})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client =
            ApiClient::new(format!("{}/api/v1/", mock_server.uri()), Duration::from_secs(5))
                .unwrap();
        let task = client.get_task("t1").await.unwrap();
        assert_eq!(task.version, 2);
    }

    #[tokio::test]
    async fn connection_error_is_unavailable() {
        // Port 1 is reserved and nothing listens there.
        let client = ApiClient::new("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();

        let err = client.get_task("t1").await.unwrap_err();
        assert!(matches!(err, ApiError::Unavailable(_)));
    }

    #[test]
    fn api_error_display() {
        assert_eq!(
            ApiError::Timeout(Duration::from_secs(5)).to_string(),
            "request timed out after 5s"
        );
        assert_eq!(
            ApiError::Rejected("nope".to_string()).to_string(),
            "request rejected: nope"
        );
        assert_eq!(
            ApiError::Unavailable("down".to_string()).status(),
            None
        );
    }
}

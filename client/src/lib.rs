//! TaskDeck client - collaborative task management client core.
//!
//! This crate keeps a local cache of tasks in sync with a TaskDeck server
//! while several users edit the same tasks concurrently.
//!
//! # Overview
//!
//! Changes reach the cache along two paths:
//!
//! 1. User actions go through the [`TaskStore`], which calls the REST API via
//!    the [`ApiClient`] and applies the server's response.
//! 2. Changes made by other clients arrive as events on the [`RealtimeChannel`]
//!    and are applied through the store's mutation hooks.
//!
//! Edits can be applied optimistically before the server confirms them. The
//! store records the version each speculative edit started from and rolls
//! back to the server's copy when a write fails.
//!
//! The [`SessionStore`] owns credentials. It publishes access-token changes,
//! which connect and disconnect the realtime channel.
//!
//! # Modules
//!
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types for client operations
//! - [`types`]: Wire types for tasks, auth payloads and realtime events
//! - [`api`]: Authenticated REST gateway
//! - [`session`]: Session state, token lifecycle and persistence
//! - [`store`]: Task cache, pending ledger and optimistic updates
//! - [`realtime`]: WebSocket channel adapter
//!
//! # Example
//!
//! ```no_run
//! use taskdeck_client::{ApiClient, Config, RealtimeChannel, SessionStore, TaskStore};
//!
//! # async fn example() -> taskdeck_client::Result<()> {
//! let config = Config::from_env()?;
//! let api = ApiClient::from_config(&config)?;
//! let session = SessionStore::restore(api.clone(), config.session_file.clone())?;
//! let store = TaskStore::with_page_size(api, config.page_size);
//!
//! let channel = RealtimeChannel::new(&config.ws_url, store.clone())?;
//! tokio::spawn(channel.run(session.token_updates()));
//!
//! store.fetch_all(None).await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod realtime;
pub mod session;
pub mod store;
pub mod types;

pub use api::{ApiClient, ApiError};
pub use config::{Config, ConfigError};
pub use error::{ClientError, Result};
pub use realtime::{
    dispatch, handle_frame, ConnectionState, Frame, Intent, RealtimeChannel, RealtimeError,
    RealtimeHandle,
};
pub use session::{PersistedSession, SessionError, SessionState, SessionStore};
pub use store::{TaskState, TaskStore};
pub use types::{
    CreateTaskRequest, Paginated, RealtimeEvent, Task, TaskChanges, TaskId, TaskMutation,
    TaskPriority, TaskQuery, TaskStatus, UpdateTaskRequest, User,
};

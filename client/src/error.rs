//! Error types for the TaskDeck client.
//!
//! Each component owns a focused error enum ([`ConfigError`], [`ApiError`],
//! [`SessionError`], [`RealtimeError`]). [`ClientError`] wraps them all for
//! callers that drive several components and want a single `?`-friendly type.

use thiserror::Error;

use crate::api::ApiError;
use crate::config::ConfigError;
use crate::realtime::RealtimeError;
use crate::session::SessionError;

/// Errors that can occur during client operations.
///
/// # Examples
///
/// ```ignore
/// use taskdeck_client::{ClientError, Config, TaskStore, ApiClient};
///
/// async fn list() -> Result<(), ClientError> {
///     let config = Config::from_env()?;
///     let store = TaskStore::new(ApiClient::from_config(&config)?);
///     store.fetch_all(None).await?;
///     Ok(())
/// }
/// ```
#[derive(Error, Debug)]
pub enum ClientError {
    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// REST gateway error.
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Session persistence error.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Realtime channel error.
    #[error("realtime error: {0}")]
    Realtime(#[from] RealtimeError),
}

/// A specialized `Result` type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

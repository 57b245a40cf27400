//! Login session state for the Taskdeck client.
//!
//! [`SessionStore`] owns the access/refresh token pair and the signed-in
//! user. Every token change is pushed to three places in one step:
//!
//! - the [`ApiClient`], so subsequent requests carry the bearer header
//! - a [`watch`] channel, which the realtime adapter follows to connect and
//!   disconnect (see [`SessionStore::token_updates`])
//! - the session file on disk, so a later run can [`SessionStore::restore`] it
//!
//! # Example
//!
//! ```rust,ignore
//! use taskdeck_client::api::ApiClient;
//! use taskdeck_client::session::SessionStore;
//!
//! let api = ApiClient::new("http://localhost:3001", Duration::from_secs(30))?;
//! let session = SessionStore::restore(api, config.session_file.clone())?;
//! if !session.is_authenticated() {
//!     session.login("ada@example.com", "hunter2").await?;
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError};
use crate::types::{AuthResponse, User};

/// Errors from reading or writing the persisted session file.
#[derive(Error, Debug)]
pub enum SessionError {
    /// File system I/O error.
    #[error("session file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The session file is not valid JSON.
    #[error("session file is corrupt: {0}")]
    Json(#[from] serde_json::Error),
}

/// The subset of session state that survives a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    pub user: Option<User>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub is_authenticated: bool,
}

impl PersistedSession {
    /// Reads a session file. A missing file yields an empty session.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Writes the session file, creating parent directories as needed.
    ///
    /// The file holds bearer tokens, so on Unix it is restricted to the owner (0600).
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if serialization or any file operation fails.
    pub fn save(&self, path: &Path) -> Result<(), SessionError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(path, perms)?;
        }

        Ok(())
    }
}

/// Observable session state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub user: Option<User>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl SessionState {
    fn persisted(&self) -> PersistedSession {
        PersistedSession {
            user: self.user.clone(),
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            is_authenticated: self.is_authenticated,
        }
    }
}

/// Holds tokens and the current user, and drives login, refresh and logout.
///
/// Cloning yields another handle onto the same session.
#[derive(Debug, Clone)]
pub struct SessionStore {
    api: ApiClient,
    state: Arc<Mutex<SessionState>>,
    token_tx: Arc<watch::Sender<Option<String>>>,
    session_file: Option<PathBuf>,
}

impl SessionStore {
    /// Creates a signed-out session. With `session_file` set, changes are persisted there.
    #[must_use]
    pub fn new(api: ApiClient, session_file: Option<PathBuf>) -> Self {
        let (token_tx, _) = watch::channel(None);
        Self {
            api,
            state: Arc::new(Mutex::new(SessionState::default())),
            token_tx: Arc::new(token_tx),
            session_file,
        }
    }

    /// Creates a session rehydrated from `session_file`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the file exists but cannot be read or parsed.
    pub fn restore(api: ApiClient, session_file: PathBuf) -> Result<Self, SessionError> {
        let persisted = PersistedSession::load(&session_file)?;
        let store = Self::new(api, Some(session_file));

        let access_token = persisted.access_token.clone();
        {
            let mut state = store.lock();
            state.user = persisted.user;
            state.access_token = persisted.access_token;
            state.refresh_token = persisted.refresh_token;
            state.is_authenticated = persisted.is_authenticated && access_token.is_some();
        }
        store.publish_token(access_token);

        debug!(
            authenticated = store.is_authenticated(),
            "Restored session from disk"
        );
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns a copy of the current session state.
    #[must_use]
    pub fn snapshot(&self) -> SessionState {
        self.lock().clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.lock().is_authenticated
    }

    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.lock().access_token.clone()
    }

    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.lock().user.clone()
    }

    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    /// Subscribes to access-token changes. `None` means signed out.
    ///
    /// The realtime adapter connects while this holds a token and disconnects
    /// when it is cleared. The channel closes when every handle to this store
    /// has been dropped.
    #[must_use]
    pub fn token_updates(&self) -> watch::Receiver<Option<String>> {
        self.token_tx.subscribe()
    }

    /// Signs in with email and password.
    ///
    /// # Errors
    ///
    /// Returns the [`ApiError`] from the backend; the message is also stored as `error`.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), ApiError> {
        self.begin();
        let result = self.api.login(email, password).await;
        self.finish_auth(result, "Login")
    }

    /// Creates an account and signs in.
    ///
    /// # Errors
    ///
    /// Returns the [`ApiError`] from the backend; the message is also stored as `error`.
    pub async fn register(&self, email: &str, password: &str, name: &str) -> Result<(), ApiError> {
        self.begin();
        let result = self.api.register(email, password, name).await;
        self.finish_auth(result, "Registration")
    }

    /// Exchanges the refresh token for a new token pair.
    ///
    /// Does nothing without a refresh token. If the refresh fails the session
    /// is logged out.
    ///
    /// # Errors
    ///
    /// Returns the [`ApiError`] that caused the logout.
    pub async fn refresh(&self) -> Result<(), ApiError> {
        let Some(refresh_token) = self.lock().refresh_token.clone() else {
            return Ok(());
        };

        match self.api.refresh(&refresh_token).await {
            Ok(pair) => {
                {
                    let mut state = self.lock();
                    state.access_token = Some(pair.access_token.clone());
                    state.refresh_token = Some(pair.refresh_token);
                }
                self.publish_token(Some(pair.access_token));
                self.persist();
                info!("Access token refreshed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, logging out");
                self.logout().await;
                Err(e)
            }
        }
    }

    /// Signs out. The server call is best-effort; local state is always cleared.
    pub async fn logout(&self) {
        if let Err(e) = self.api.logout().await {
            debug!(error = %e, "Logout request failed, clearing session anyway");
        }

        {
            let mut state = self.lock();
            state.user = None;
            state.access_token = None;
            state.refresh_token = None;
            state.is_authenticated = false;
        }
        self.publish_token(None);
        self.persist();
        info!("Logged out");
    }

    /// Fetches the signed-in user's profile and stores it.
    ///
    /// # Errors
    ///
    /// Returns the [`ApiError`] from the backend; the message is also stored as `error`.
    pub async fn load_profile(&self) -> Result<User, ApiError> {
        match self.api.profile().await {
            Ok(user) => {
                self.set_user(user.clone());
                Ok(user)
            }
            Err(e) => {
                self.lock().error = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub fn set_user(&self, user: User) {
        self.lock().user = Some(user);
        self.persist();
    }

    pub fn clear_error(&self) {
        self.lock().error = None;
    }

    fn begin(&self) {
        let mut state = self.lock();
        state.is_loading = true;
        state.error = None;
    }

    fn finish_auth(
        &self,
        result: Result<AuthResponse, ApiError>,
        action: &str,
    ) -> Result<(), ApiError> {
        match result {
            Ok(auth) => {
                {
                    let mut state = self.lock();
                    state.user = Some(auth.user);
                    state.access_token = Some(auth.access_token.clone());
                    state.refresh_token = Some(auth.refresh_token);
                    state.is_authenticated = true;
                    state.is_loading = false;
                }
                self.publish_token(Some(auth.access_token));
                self.persist();
                info!("{action} succeeded");
                Ok(())
            }
            Err(e) => {
                let mut state = self.lock();
                state.error = Some(e.to_string());
                state.is_loading = false;
                Err(e)
            }
        }
    }

    /// Hands the token to the API client and notifies subscribers if it changed.
    fn publish_token(&self, token: Option<String>) {
        self.api.set_access_token(token.clone());
        self.token_tx.send_if_modified(|current| {
            if *current == token {
                false
            } else {
                *current = token;
                true
            }
        });
    }

    fn persist(&self) {
        let Some(path) = &self.session_file else {
            return;
        };
        let persisted = self.lock().persisted();
        if let Err(e) = persisted.save(path) {
            warn!(error = %e, path = %path.display(), "Failed to persist session");
        }
    }
}

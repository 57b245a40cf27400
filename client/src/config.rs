//! Configuration module for the Taskdeck client.
//!
//! This module handles parsing configuration from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `TASKDECK_API_URL` | No | `http://localhost:3001` | REST base URL |
//! | `TASKDECK_WS_URL` | No | `ws://localhost:3001` | Realtime base URL (`http(s)` is rewritten to `ws(s)`) |
//! | `TASKDECK_PAGE_SIZE` | No | 20 | Tasks per page for list fetches (1-100) |
//! | `TASKDECK_REQUEST_TIMEOUT_SECS` | No | 30 | HTTP request timeout |
//! | `TASKDECK_SESSION_FILE` | No | `<data dir>/taskdeck/session.json` | Persisted login session |
//!
//! # Example
//!
//! ```no_run
//! use taskdeck_client::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("API URL: {}", config.api_url);
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;
use reqwest::Url;
use thiserror::Error;

use crate::types::DEFAULT_PAGE_SIZE;

/// Default REST endpoint (local development server).
pub const DEFAULT_API_URL: &str = "http://localhost:3001";

/// Default realtime endpoint (local development server).
pub const DEFAULT_WS_URL: &str = "ws://localhost:3001";

/// Largest page size the backend accepts.
const MAX_PAGE_SIZE: u32 = 100;

/// Default HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Application directory name under the platform data directory.
const APP_DIR: &str = "taskdeck";

/// Session file name inside [`APP_DIR`].
const SESSION_FILE: &str = "session.json";

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to determine home directory.
    #[error("failed to determine home directory")]
    NoHomeDirectory,
}

/// Configuration for the Taskdeck client.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the REST API, without trailing slash.
    pub api_url: String,

    /// Base URL of the realtime endpoint, `ws://` or `wss://`, without trailing slash.
    pub ws_url: String,

    /// Tasks requested per page by `fetch_all`.
    pub page_size: u32,

    /// Timeout applied to every HTTP request.
    pub request_timeout: Duration,

    /// Where the login session is persisted between runs.
    pub session_file: PathBuf,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - `TASKDECK_WS_URL` uses a scheme other than ws, wss, http or https
    /// - `TASKDECK_PAGE_SIZE` is not an integer between 1 and 100
    /// - `TASKDECK_REQUEST_TIMEOUT_SECS` is not a positive integer
    /// - `TASKDECK_SESSION_FILE` is unset and the home directory cannot be determined
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url = env::var("TASKDECK_API_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| DEFAULT_API_URL.to_string());

        let ws_url = match env::var("TASKDECK_WS_URL") {
            Ok(url) => websocket_url(&url).ok_or_else(|| ConfigError::InvalidValue {
                key: "TASKDECK_WS_URL".to_string(),
                message: format!("expected ws://, wss://, http:// or https:// URL, got '{url}'"),
            })?,
            Err(_) => DEFAULT_WS_URL.to_string(),
        };

        // Optional: TASKDECK_PAGE_SIZE (default: 20, must be 1-100)
        let page_size = match env::var("TASKDECK_PAGE_SIZE") {
            Ok(val) => {
                let size = val.parse::<u32>().map_err(|_| ConfigError::InvalidValue {
                    key: "TASKDECK_PAGE_SIZE".to_string(),
                    message: format!("expected positive integer, got '{val}'"),
                })?;
                if !(1..=MAX_PAGE_SIZE).contains(&size) {
                    return Err(ConfigError::InvalidValue {
                        key: "TASKDECK_PAGE_SIZE".to_string(),
                        message: format!("page size must be between 1 and {MAX_PAGE_SIZE}, got {size}"),
                    });
                }
                size
            }
            Err(_) => DEFAULT_PAGE_SIZE,
        };

        // Optional: TASKDECK_REQUEST_TIMEOUT_SECS (default: 30, must be > 0)
        let timeout_secs = match env::var("TASKDECK_REQUEST_TIMEOUT_SECS") {
            Ok(val) => {
                let secs = val.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                    key: "TASKDECK_REQUEST_TIMEOUT_SECS".to_string(),
                    message: format!("expected positive integer, got '{val}'"),
                })?;
                if secs == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: "TASKDECK_REQUEST_TIMEOUT_SECS".to_string(),
                        message: "timeout must be at least 1 second".to_string(),
                    });
                }
                secs
            }
            Err(_) => DEFAULT_REQUEST_TIMEOUT_SECS,
        };

        let session_file = match env::var("TASKDECK_SESSION_FILE") {
            Ok(path) => PathBuf::from(path),
            Err(_) => {
                let base_dirs = BaseDirs::new().ok_or(ConfigError::NoHomeDirectory)?;
                base_dirs.data_dir().join(APP_DIR).join(SESSION_FILE)
            }
        };

        Ok(Self {
            api_url,
            ws_url,
            page_size,
            request_timeout: Duration::from_secs(timeout_secs),
            session_file,
        })
    }
}

/// Normalizes a realtime base URL to a `ws`/`wss` scheme without trailing slash.
///
/// Returns `None` for any other scheme.
fn websocket_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        _ => return None,
    };
    url.set_scheme(scheme).ok()?;
    Some(url.as_str().trim_end_matches('/').to_string())
}

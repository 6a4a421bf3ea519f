use std::path::PathBuf;
use std::time::Duration;

use crate::transport::{Backoff, ReconnectPolicy};

#[derive(Debug, Clone)]
pub struct Config {
    /// Origin of the mail-assistant web app; the API lives under `/api`
    pub base_url: String,
    /// Session token sent as the `jwt-token` cookie
    pub token: Option<String>,
    /// Where `signin` stores and `signout` clears the session token
    pub session_file: PathBuf,
    /// Reconnect behavior of the task-run WebSocket
    pub reconnect: ReconnectPolicy,
    /// Per-request timeout for REST calls
    pub request_timeout: Duration,
    /// Refresh interval for list screens in watch mode
    pub poll_interval: Duration,
    /// Refresh interval for the unread-notification badge
    pub notification_poll_interval: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let session_file = PathBuf::from(env_str(
            "MAIL_CONSOLE_SESSION_FILE",
            ".mail-console-session",
        ));
        let token = std::env::var("MAIL_CONSOLE_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| read_session_token(&session_file));

        let backoff = Backoff::from_env(&env_str("MAIL_CONSOLE_RECONNECT_BACKOFF", "fixed"))?;
        let max_attempts = match std::env::var("MAIL_CONSOLE_RECONNECT_MAX_ATTEMPTS") {
            Ok(raw) => Some(raw.parse::<u32>().map_err(|e| {
                anyhow::anyhow!("Failed to parse env var MAIL_CONSOLE_RECONNECT_MAX_ATTEMPTS={raw}: {e}")
            })?),
            Err(_) => None,
        };

        Ok(Self {
            base_url: env_str("MAIL_CONSOLE_BASE_URL", "http://localhost:8080"),
            token,
            session_file,
            reconnect: ReconnectPolicy {
                delay: Duration::from_millis(env_parse("MAIL_CONSOLE_RECONNECT_DELAY_MS", 5000)?),
                backoff,
                max_attempts,
                connect_timeout: Duration::from_secs(env_parse(
                    "MAIL_CONSOLE_CONNECT_TIMEOUT_SECS",
                    10,
                )?),
            },
            request_timeout: Duration::from_secs(env_parse(
                "MAIL_CONSOLE_REQUEST_TIMEOUT_SECS",
                30,
            )?),
            poll_interval: Duration::from_secs(env_parse("MAIL_CONSOLE_POLL_INTERVAL_SECS", 10)?),
            notification_poll_interval: Duration::from_secs(env_parse(
                "MAIL_CONSOLE_NOTIFICATION_POLL_SECS",
                5,
            )?),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            token: None,
            session_file: PathBuf::from(".mail-console-session"),
            reconnect: ReconnectPolicy::default(),
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(10),
            notification_poll_interval: Duration::from_secs(5),
        }
    }
}

/// Read a previously stored session token, ignoring a missing or blank file.
pub fn read_session_token(path: &std::path::Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|t| !t.is_empty())
}

pub fn store_session_token(path: &std::path::Path, token: &str) -> std::io::Result<()> {
    std::fs::write(path, token.trim())
}

/// Sign-out is purely local: the token file is removed, nothing is sent.
pub fn clear_session_token(path: &std::path::Path) -> std::io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_token_roundtrip_and_signout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session");

        assert_eq!(read_session_token(&path), None);
        store_session_token(&path, "  abc.def.ghi\n").unwrap();
        assert_eq!(read_session_token(&path).as_deref(), Some("abc.def.ghi"));

        assert!(clear_session_token(&path).unwrap());
        assert!(!clear_session_token(&path).unwrap());
        assert_eq!(read_session_token(&path), None);
    }

    #[test]
    fn test_blank_session_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session");
        std::fs::write(&path, "   \n").unwrap();
        assert_eq!(read_session_token(&path), None);
    }

    #[test]
    fn test_default_reconnect_is_fixed_and_unbounded() {
        let config = Config::default();
        assert_eq!(config.reconnect.delay, Duration::from_millis(5000));
        assert_eq!(config.reconnect.backoff, Backoff::Fixed);
        assert_eq!(config.reconnect.max_attempts, None);
        assert_eq!(config.reconnect.connect_timeout, Duration::from_secs(10));
    }
}

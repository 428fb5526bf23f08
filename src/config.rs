//! File configuration for session defaults.
//!
//! A TOML file can preset everything a session carries:
//!
//! ```toml
//! timeout_secs = 10
//! max_retries = 5
//! backoff_factor = 0.5
//! retry_statuses = [429, 500, 502, 503, 504]
//! proxy = "socks5://127.0.0.1:1080"
//!
//! [headers]
//! Accept-Language = "en"
//!
//! [cookies]
//! sid = "abc"
//! ```
//!
//! Unknown keys are rejected so typos surface instead of being ignored.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::session::{Session, SessionConfig};
use crate::transport::constants::{DEFAULT_BACKOFF_FACTOR, DEFAULT_MAX_RETRIES};
use crate::transport::{RetryPolicy, TransportError};

/// Upper bound for `timeout_secs`.
const MAX_TIMEOUT_SECS: f64 = 3600.0;
/// Upper bound for `max_retries`.
const MAX_RETRIES_LIMIT: u32 = 20;
/// Upper bound for `backoff_factor`.
const MAX_BACKOFF_FACTOR: f64 = 60.0;

/// Errors from loading or applying a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or has unknown keys.
    #[error("failed to parse config {}: {source}", origin(.path.as_deref()))]
    Parse {
        /// Config file path, when parsed from disk.
        path: Option<PathBuf>,
        /// The underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of its accepted range.
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid {
        /// Offending key.
        field: &'static str,
        /// What was wrong.
        reason: String,
    },

    /// The values were accepted but the session could not be built.
    #[error(transparent)]
    Session(#[from] TransportError),
}

fn origin(path: Option<&Path>) -> String {
    path.map_or_else(|| "text".to_string(), |p| format!("file '{}'", p.display()))
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// TOML-backed session defaults. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Per-attempt timeout in seconds (fractions allowed).
    pub timeout_secs: Option<f64>,
    /// Retries after the first attempt.
    pub max_retries: Option<u32>,
    /// Backoff factor in seconds.
    pub backoff_factor: Option<f64>,
    /// Statuses that trigger a retry; replaces the default set.
    pub retry_statuses: Option<Vec<u16>>,
    /// Retry connection failures and timeouts.
    pub retry_on_connection_error: Option<bool>,
    /// Let POST and PATCH use the retry policy.
    pub retry_non_idempotent: Option<bool>,
    /// Proxy URL for HTTP and HTTPS traffic.
    pub proxy: Option<String>,
    /// Disable TLS certificate verification.
    pub danger_accept_invalid_certs: Option<bool>,
    /// User-Agent sent by the client.
    pub user_agent: Option<String>,
    /// Default headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Default cookies.
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    /// Default query parameters.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl FileConfig {
    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for bad syntax or unknown keys,
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(raw).map_err(|source| ConfigError::Parse { path: None, source })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates values against session constraints.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(timeout) = self.timeout_secs
            && !(timeout > 0.0 && timeout <= MAX_TIMEOUT_SECS)
        {
            return Err(ConfigError::invalid(
                "timeout_secs",
                format!("{timeout}. Expected range: (0, {MAX_TIMEOUT_SECS}]"),
            ));
        }
        if let Some(retries) = self.max_retries
            && retries > MAX_RETRIES_LIMIT
        {
            return Err(ConfigError::invalid(
                "max_retries",
                format!("{retries}. Expected range: 0..={MAX_RETRIES_LIMIT}"),
            ));
        }
        if let Some(factor) = self.backoff_factor
            && !(0.0..=MAX_BACKOFF_FACTOR).contains(&factor)
        {
            return Err(ConfigError::invalid(
                "backoff_factor",
                format!("{factor}. Expected range: 0..={MAX_BACKOFF_FACTOR}"),
            ));
        }
        if let Some(statuses) = &self.retry_statuses
            && let Some(bad) = statuses.iter().find(|s| !(100..=599).contains(*s))
        {
            return Err(ConfigError::invalid(
                "retry_statuses",
                format!("{bad} is not an HTTP status code"),
            ));
        }
        if let Some(proxy) = &self.proxy {
            let scheme = proxy.split_once("://").map(|(scheme, _)| scheme);
            if !matches!(scheme, Some("http" | "https" | "socks5" | "socks5h")) {
                return Err(ConfigError::invalid(
                    "proxy",
                    format!("'{proxy}'. Expected an http://, https:// or socks5:// URL"),
                ));
            }
        }
        if let Some(ua) = &self.user_agent
            && ua.trim().is_empty()
        {
            return Err(ConfigError::invalid("user_agent", "must not be empty"));
        }
        Ok(())
    }

    /// Retry policy described by this file, on top of the defaults.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Session`] if the policy is rejected.
    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        let mut policy = RetryPolicy::new(
            self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            self.backoff_factor.unwrap_or(DEFAULT_BACKOFF_FACTOR),
        )?;
        if let Some(statuses) = &self.retry_statuses {
            policy = policy.with_retryable_statuses(statuses.iter().copied());
        }
        if let Some(enabled) = self.retry_on_connection_error {
            policy = policy.with_connection_retries(enabled);
        }
        Ok(policy)
    }

    /// Construction-time settings described by this file.
    ///
    /// # Errors
    ///
    /// See [`retry_policy`](Self::retry_policy).
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        let mut config = SessionConfig::new()
            .retry_policy(self.retry_policy()?)
            .retry_non_idempotent(self.retry_non_idempotent.unwrap_or(false))
            .danger_accept_invalid_certs(self.danger_accept_invalid_certs.unwrap_or(false));
        if let Some(timeout) = self.timeout_secs {
            config = config.timeout(Duration::from_secs_f64(timeout));
        }
        if let Some(ua) = &self.user_agent {
            config = config.user_agent(ua.clone());
        }
        Ok(config)
    }

    /// Copies headers, cookies, params and proxy into `session`.
    pub fn apply_to(&self, session: &mut Session) {
        if !self.headers.is_empty() {
            session.set_headers(Some(&self.headers));
        }
        if !self.cookies.is_empty() {
            session.set_cookies(Some(&self.cookies));
        }
        if !self.params.is_empty() {
            session.set_params(Some(&self.params));
        }
        if let Some(proxy) = &self.proxy {
            session.set_proxy(Some(proxy));
        }
    }
}

impl Session {
    /// Builds a session from file configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Session`] if the HTTP client cannot be built.
    pub fn from_config(config: &FileConfig) -> Result<Self, ConfigError> {
        let mut session = Self::new(config.session_config()?)?;
        config.apply_to(&mut session);
        Ok(session)
    }
}

/// Config file found (or not) at a resolved location.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path, if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed config when the file exists.
    pub config: Option<FileConfig>,
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/spider-utils/config.toml`
/// 2. `$HOME/.config/spider-utils/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("spider-utils")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("spider-utils")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from the default path if present.
///
/// # Errors
///
/// See [`load_file_config`]. A missing file is not an error.
pub fn load_default_file_config() -> Result<LoadedConfig, ConfigError> {
    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(p) if p.exists() => Some(load_file_config(p)?),
        _ => None,
    };
    Ok(LoadedConfig { path, config })
}

/// Reads, parses and validates a config file.
///
/// # Errors
///
/// [`ConfigError::Read`], [`ConfigError::Parse`] or [`ConfigError::Invalid`].
pub fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: FileConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: Some(path.to_path_buf()),
        source,
    })?;
    config.validate()?;
    debug!(path = %path.display(), "loaded config file");
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_full_config() {
        let config = FileConfig::parse(
            r#"
timeout_secs = 2.5
max_retries = 1
backoff_factor = 0.0
retry_statuses = [429, 503]
retry_on_connection_error = false
retry_non_idempotent = true
proxy = "socks5://127.0.0.1:1080"
user_agent = "probe/1.0"

[headers]
Accept-Language = "en"

[cookies]
sid = "abc"

[params]
page = "1"
"#,
        )
        .unwrap();

        assert_eq!(config.timeout_secs, Some(2.5));
        assert_eq!(config.headers["Accept-Language"], "en");
        assert_eq!(config.cookies["sid"], "abc");
        assert_eq!(config.params["page"], "1");

        let policy = config.retry_policy().unwrap();
        assert_eq!(policy.max_attempts(), 1);
        assert!(policy.is_retryable_status(429));
        assert!(!policy.is_retryable_status(500));
        assert!(!policy.retry_on_connection_error());

        let session_config = config.session_config().unwrap();
        assert_eq!(session_config.timeout, Duration::from_millis(2500));
        assert!(session_config.retry_non_idempotent);
        assert_eq!(session_config.user_agent.as_deref(), Some("probe/1.0"));
    }

    #[test]
    fn test_empty_config_keeps_defaults() {
        let config = FileConfig::parse("").unwrap();
        assert_eq!(config, FileConfig::default());
        let policy = config.retry_policy().unwrap();
        assert_eq!(policy.max_attempts(), DEFAULT_MAX_RETRIES);
        assert!(policy.is_retryable_status(403));
        assert!(!config.session_config().unwrap().accept_invalid_certs);
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let err = FileConfig::parse("verify = false").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("verify"), "Expected key in: {err}");
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        for (raw, field) in [
            ("timeout_secs = 0", "timeout_secs"),
            ("max_retries = 100", "max_retries"),
            ("backoff_factor = -1.0", "backoff_factor"),
            ("retry_statuses = [42]", "retry_statuses"),
            (r#"proxy = "127.0.0.1:1080""#, "proxy"),
            (r#"user_agent = " ""#, "user_agent"),
        ] {
            match FileConfig::parse(raw) {
                Err(ConfigError::Invalid { field: got, .. }) => assert_eq!(got, field, "{raw}"),
                other => panic!("expected invalid {field} for {raw}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_load_file_config_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_retries = \"three\"").unwrap();

        let err = load_file_config(&path).unwrap_err();
        assert!(err.to_string().contains("config.toml"), "Expected path in: {err}");

        let missing = load_file_config(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }

    #[test]
    fn test_apply_to_merges_maps_and_proxy() {
        let config = FileConfig::parse(
            r#"
proxy = "http://127.0.0.1:3128"
[headers]
X-Test = "1"
"#,
        )
        .unwrap();
        let mut session = Session::from_config(&config).unwrap();
        session.set_headers(Some(&BTreeMap::from([("X-Other".to_string(), "2".to_string())])));
        config.apply_to(&mut session);

        assert_eq!(session.headers().len(), 2);
        assert_eq!(session.proxy(), Some("http://127.0.0.1:3128"));
    }
}

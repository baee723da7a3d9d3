//! Adapter configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Well-known manager interface port.
pub const DEFAULT_PORT: u16 = 5038;

/// Keychain service name used when resolving the login secret.
pub const KEYRING_SERVICE: &str = "ami-monitor";

/// Reconnect policy applied after the live link drops.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ReconnectConfig {
    /// Fixed delay before each reconnect attempt.
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: u64,
    /// Attempts before the adapter gives up and turns fatal.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_seconds: default_delay_seconds(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Timeouts (seconds) for dialing and request/response calls.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Dial timeout for each TCP connect.
    #[serde(default = "default_connect_seconds")]
    pub connect_seconds: u64,
    /// Response timeout for `exec`; 0 means wait forever.
    #[serde(default = "default_exec_seconds")]
    pub exec_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_seconds: default_connect_seconds(),
            exec_seconds: default_exec_seconds(),
        }
    }
}

/// Pipeline queue sizing.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct QueueConfig {
    /// Capacity of every inter-task queue. A full queue blocks its sender.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_delay_seconds() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    100
}

fn default_connect_seconds() -> u64 {
    10
}

fn default_exec_seconds() -> u64 {
    30
}

fn default_capacity() -> usize {
    64
}

/// Adapter configuration parsed from a TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AdapterConfig {
    /// Manager host name or address.
    pub host: String,
    /// Manager TCP port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Reconnect policy.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Dial and call timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Queue sizing.
    #[serde(default)]
    pub queues: QueueConfig,
}

impl AdapterConfig {
    /// Default configuration pointed at `host` on the well-known port.
    #[must_use]
    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            reconnect: ReconnectConfig::default(),
            timeouts: TimeoutConfig::default(),
            queues: QueueConfig::default(),
        }
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// `host:port` form of the endpoint.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Delay between reconnect attempts.
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect.delay_seconds)
    }

    /// Dial timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.connect_seconds)
    }

    /// Exec response timeout, `None` when disabled.
    #[must_use]
    pub fn exec_timeout(&self) -> Option<Duration> {
        match self.timeouts.exec_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Check invariants that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(AppError::Config("host must not be empty".into()));
        }

        if self.port == 0 {
            return Err(AppError::Config("port must be greater than zero".into()));
        }

        if self.reconnect.max_attempts == 0 {
            return Err(AppError::Config(
                "reconnect.max_attempts must be greater than zero".into(),
            ));
        }

        if self.timeouts.connect_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.connect_seconds must be greater than zero".into(),
            ));
        }

        if self.queues.capacity == 0 {
            return Err(AppError::Config(
                "queues.capacity must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

/// Load the login secret for `username` from the OS keychain with an
/// `AMI_SECRET` env-var fallback.
///
/// # Errors
///
/// Returns `AppError::Config` if neither the keychain nor the environment
/// provides a secret.
pub async fn load_secret(username: &str) -> Result<String> {
    let user = username.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &user).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(username, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(username, ?err, "keychain lookup failed, trying env var");
        }
    }

    env::var("AMI_SECRET").map_err(|_| {
        AppError::Config(format!(
            "secret for {username} not found in keychain or AMI_SECRET env var"
        ))
    })
}

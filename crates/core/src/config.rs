//! Process configuration: which client talks to the backend and how the
//! orchestrator and task-log readers are tuned.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::mutation::RetryPolicy;
use crate::replication::DEFAULT_TASK_PAGE_SIZE;

const ENV_CLIENT: &str = "NETPLANE_CLIENT";
const ENV_BACKEND_URL: &str = "NETPLANE_BACKEND_URL";
const ENV_BACKEND_TOKEN: &str = "NETPLANE_BACKEND_TOKEN";
const ENV_RETRY_ATTEMPTS: &str = "NETPLANE_CONTENTION_RETRY_ATTEMPTS";
const ENV_RETRY_DELAY_MS: &str = "NETPLANE_CONTENTION_RETRY_DELAY_MS";
const ENV_TASK_PAGE_SIZE: &str = "NETPLANE_TASK_PAGE_SIZE";
const ENV_COMPENSATION_POLICY: &str = "NETPLANE_COMPENSATION_POLICY";

pub const DEFAULT_CONTENTION_RETRY_ATTEMPTS: u32 = 5;
pub const DEFAULT_CONTENTION_RETRY_DELAY_MS: u64 = 200;

/// Backend client selected at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientKind {
    /// Append to the task log; an external consumer applies it.
    #[default]
    TaskLog,
    /// Call the backend REST API synchronously after commit.
    DirectRest,
}

impl ClientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientKind::TaskLog => "task_log",
            ClientKind::DirectRest => "direct_rest",
        }
    }
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientKind {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "task_log" | "tasklog" => Ok(ClientKind::TaskLog),
            "direct_rest" | "rest" => Ok(ClientKind::DirectRest),
            other => Err(Error::Config(format!("unknown client kind '{other}'"))),
        }
    }
}

/// What to do when the compensating transaction itself fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationFailurePolicy {
    /// Log at error level and return the original remote error untouched.
    #[default]
    LogAndSwallow,
    /// Attach the compensation failure to the returned `RemoteApplyFailed`.
    Attach,
}

impl FromStr for CompensationFailurePolicy {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "log_and_swallow" | "log" => Ok(CompensationFailurePolicy::LogAndSwallow),
            "attach" => Ok(CompensationFailurePolicy::Attach),
            other => Err(Error::Config(format!(
                "unknown compensation policy '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplicationConfig {
    pub client: ClientKind,
    pub backend_url: Option<String>,
    pub backend_token: Option<String>,
    pub contention_retry_attempts: u32,
    pub contention_retry_delay_ms: u64,
    pub task_page_size: i64,
    pub compensation_policy: CompensationFailurePolicy,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            client: ClientKind::default(),
            backend_url: None,
            backend_token: None,
            contention_retry_attempts: DEFAULT_CONTENTION_RETRY_ATTEMPTS,
            contention_retry_delay_ms: DEFAULT_CONTENTION_RETRY_DELAY_MS,
            task_page_size: DEFAULT_TASK_PAGE_SIZE,
            compensation_policy: CompensationFailurePolicy::default(),
        }
    }
}

impl ReplicationConfig {
    /// Reads `NETPLANE_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Unset or blank keys keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(value) = get(ENV_CLIENT) {
            config.client = value.parse()?;
        }
        config.backend_url = get(ENV_BACKEND_URL).map(|v| v.trim_end_matches('/').to_string());
        config.backend_token = get(ENV_BACKEND_TOKEN);
        if let Some(value) = get(ENV_RETRY_ATTEMPTS) {
            config.contention_retry_attempts = parse_number(ENV_RETRY_ATTEMPTS, &value)?;
        }
        if let Some(value) = get(ENV_RETRY_DELAY_MS) {
            config.contention_retry_delay_ms = parse_number(ENV_RETRY_DELAY_MS, &value)?;
        }
        if let Some(value) = get(ENV_TASK_PAGE_SIZE) {
            config.task_page_size = parse_number(ENV_TASK_PAGE_SIZE, &value)?;
        }
        if let Some(value) = get(ENV_COMPENSATION_POLICY) {
            config.compensation_policy = value.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.client == ClientKind::DirectRest && self.backend_url.is_none() {
            return Err(Error::Config(format!(
                "{ENV_BACKEND_URL} is required when the client is direct_rest"
            )));
        }
        if self.contention_retry_attempts == 0 {
            return Err(Error::Config(format!(
                "{ENV_RETRY_ATTEMPTS} must be at least 1"
            )));
        }
        if self.task_page_size <= 0 {
            return Err(Error::Config(format!(
                "{ENV_TASK_PAGE_SIZE} must be positive, got {}",
                self.task_page_size
            )));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.contention_retry_attempts,
            Duration::from_millis(self.contention_retry_delay_ms),
        )
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{key} must be a number, got '{value}'")))
}

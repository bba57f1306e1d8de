//! Pool configuration and Docker endpoint resolution
//!
//! Endpoint precedence, highest first:
//! 1. Explicit endpoint passed by the caller
//! 2. `DOCKER_HOST`
//! 3. `DOCKER_URL`
//! 4. Platform default (`http://localhost:2375` on Windows, the local unix socket elsewhere)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DOCKER_HOST_ENV: &str = "DOCKER_HOST";
pub const DOCKER_URL_ENV: &str = "DOCKER_URL";
pub const MOUNT_ROOT_ENV: &str = "POOL_MOUNT_ROOT";

#[cfg(windows)]
pub const DEFAULT_ENDPOINT: &str = "http://localhost:2375";
#[cfg(not(windows))]
pub const DEFAULT_ENDPOINT: &str = "unix:///var/run/docker.sock";

pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_RETRY_WAIT: Duration = Duration::from_secs(60);
pub const DEFAULT_MOUNT_ROOT: &str = "mount";

/// Tunables for a [`crate::Pool`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Explicit engine endpoint; falls back to the environment when unset.
    pub endpoint: Option<String>,
    /// Client-side timeout applied by the engine client to every request.
    pub client_timeout: Duration,
    /// Deadline for each remote call made while tearing the pool down.
    pub teardown_timeout: Duration,
    /// Wall-clock bound for [`crate::Pool::retry`].
    pub max_retry_wait: Duration,
    /// Host-side root under which bind-mount directories are created.
    pub mount_root: PathBuf,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            client_timeout: DEFAULT_CLIENT_TIMEOUT,
            teardown_timeout: DEFAULT_TEARDOWN_TIMEOUT,
            max_retry_wait: DEFAULT_MAX_RETRY_WAIT,
            mount_root: PathBuf::from(DEFAULT_MOUNT_ROOT),
        }
    }
}

impl PoolConfig {
    /// Defaults, with the mount root taken from `POOL_MOUNT_ROOT` when set.
    ///
    /// The endpoint is left unset so that it is resolved from the environment when the pool
    /// connects; see [`resolve_endpoint`].
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(root) = non_empty_env(MOUNT_ROOT_ENV) {
            config.mount_root = PathBuf::from(root);
        }
        config
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_mount_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.mount_root = root.into();
        self
    }

    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = timeout;
        self
    }

    pub fn with_max_retry_wait(mut self, wait: Duration) -> Self {
        self.max_retry_wait = wait;
        self
    }

    /// The endpoint this configuration connects to.
    pub fn resolved_endpoint(&self) -> String {
        resolve_endpoint(self.endpoint.as_deref())
    }
}

/// Resolve the engine endpoint. Empty strings count as unset at every level.
pub fn resolve_endpoint(explicit: Option<&str>) -> String {
    explicit
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .or_else(|| non_empty_env(DOCKER_HOST_ENV))
        .or_else(|| non_empty_env(DOCKER_URL_ENV))
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

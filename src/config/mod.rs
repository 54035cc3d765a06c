//! Configuration types for the worker, the install gate and the proxy server.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration of the offline cache worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Cache generation tag. Partitions whose name does not end in `-<version>` are purged on activation.
    pub version: String,
    /// App-shell resources cached at install time, relative to the worker scope.
    pub shell_manifest: Vec<String>,
    /// Document served to HTML navigations that miss the cache while offline.
    pub root_document: String,
    /// Hostname substrings whose requests are never intercepted or cached.
    pub bypass_hosts: Vec<String>,
    /// Whether a freshly installed worker activates without waiting for old clients.
    pub skip_waiting: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            version: "v2".to_string(),
            shell_manifest: vec![
                "/".to_string(),
                "/catalog/".to_string(),
                "/static/css/modern-retro.css".to_string(),
                "/static/manifest.json".to_string(),
                "/static/games/js/pwa-install.js".to_string(),
            ],
            root_document: "/".to_string(),
            bypass_hosts: vec!["retrogames.cc".to_string()],
            skip_waiting: true,
        }
    }
}

impl WorkerConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cache version tag.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Replaces the app-shell manifest.
    #[must_use]
    pub fn with_shell_manifest<I, T>(mut self, manifest: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.shell_manifest = manifest.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the bypass host list.
    #[must_use]
    pub fn with_bypass_hosts<I, T>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.bypass_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    /// Sets whether installation forces immediate activation.
    #[must_use]
    pub const fn with_skip_waiting(mut self, skip: bool) -> Self {
        self.skip_waiting = skip;
        self
    }
}

/// Configuration of the install gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Element id of the custom install button.
    pub affordance_id: String,
    /// Cookie whose presence counts as a logged-in session.
    pub session_cookie: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            affordance_id: "pwa-install-button".to_string(),
            session_cookie: "sessionid".to_string(),
        }
    }
}

/// Proxy server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Origin the worker fronts. Relative requests are resolved against it.
    pub upstream: String,
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Upper bound on a single upstream request, in seconds. Zero disables it.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            upstream: "http://127.0.0.1:8000".to_string(),
            host: "127.0.0.1".to_string(),
            port: 9780,
            request_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Returns the upstream timeout, if any.
    #[must_use]
    pub const fn request_timeout(&self) -> Option<Duration> {
        if self.request_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.request_timeout_secs))
        }
    }
}

/// Path configuration for cache storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Directory where cache partitions are persisted.
    pub cache_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            cache_dir: cache_dir.join("retro-shell"),
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub worker: WorkerConfig,
    pub gate: GateConfig,
    pub server: ServerConfig,
    pub paths: PathConfig,
}

impl AppConfig {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the default config file location.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("retro-shell")
            .join("config.toml")
    }

    /// Loads configuration from a TOML file. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Checks values the type system cannot.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker version tag is empty or contains whitespace.
    pub fn validate(&self) -> crate::Result<()> {
        let version = &self.worker.version;
        if version.is_empty() || version.chars().any(char::is_whitespace) {
            return Err(crate::Error::InvalidConfig(format!(
                "worker.version must be a non-empty tag without whitespace, got {version:?}"
            )));
        }
        Ok(())
    }
}

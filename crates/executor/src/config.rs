//! Executor configuration via `sqlrun.toml`
//!
//! Every field has a default, so an empty or missing file behaves like
//! [`ExecutorConfig::default`]. Values are validated when the file is read.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlrun_core::{Error, Result};

/// Conventional config file name.
pub const CONFIG_FILE_NAME: &str = "sqlrun.toml";

/// Which family of catalog queries a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CatalogDialect {
    /// Pick from the server's capability at connect time: `Show` for
    /// reduced-capability servers, `PgCatalog` otherwise
    #[default]
    Auto,
    /// `SHOW ...` statements understood by reduced-capability servers
    Show,
    /// Queries against `pg_catalog` and `information_schema`
    PgCatalog,
}

impl CatalogDialect {
    /// The concrete dialect for a server of the given capability.
    pub fn resolve(self, reduced_capability: bool) -> CatalogDialect {
        match self {
            CatalogDialect::Auto if reduced_capability => CatalogDialect::Show,
            CatalogDialect::Auto => CatalogDialect::PgCatalog,
            fixed => fixed,
        }
    }
}

/// Executor configuration loaded from `sqlrun.toml`.
///
/// # Example
///
/// ```toml
/// wait_interval_ms = 1000
/// proxy_hostname = "pgbouncer"
/// catalog = "auto"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Bounded wait of the cancellation poll loop, in milliseconds.
    #[serde(default = "default_wait_interval_ms")]
    pub wait_interval_ms: u64,
    /// Host reported for reduced-capability servers when none was resolved.
    #[serde(default = "default_proxy_hostname")]
    pub proxy_hostname: String,
    /// Catalog query family.
    #[serde(default)]
    pub catalog: CatalogDialect,
}

fn default_wait_interval_ms() -> u64 {
    1000
}

fn default_proxy_hostname() -> String {
    "pgbouncer".to_string()
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            wait_interval_ms: default_wait_interval_ms(),
            proxy_hostname: default_proxy_hostname(),
            catalog: CatalogDialect::default(),
        }
    }
}

fn config_error(reason: String) -> Error {
    Error::Config { reason }
}

impl ExecutorConfig {
    /// The poll-loop wait as a `Duration`.
    pub fn wait_interval(&self) -> Duration {
        Duration::from_millis(self.wait_interval_ms)
    }

    /// Check values that deserialize but cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.wait_interval_ms == 0 {
            return Err(config_error(
                "wait_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.proxy_hostname.trim().is_empty() {
            return Err(config_error("proxy_hostname must not be empty".to_string()));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# sqlrun executor configuration
#
# How often (milliseconds) a running statement wakes up to check for an
# operator interrupt. Only used for full-capability servers.
wait_interval_ms = 1000

# Host reported for reduced-capability servers reached without an explicit host.
proxy_hostname = "pgbouncer"

# Catalog queries: "auto" (default; SHOW statements for reduced-capability
# servers, pg_catalog otherwise), "show" or "pg_catalog"
catalog = "auto"
"#
    }

    /// Read and parse config from a file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            config_error(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: ExecutorConfig = toml::from_str(&content).map_err(|e| {
            config_error(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                config_error(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::internal(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            config_error(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

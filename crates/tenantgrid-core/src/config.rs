//! tenantgrid.toml configuration parser.
//!
//! Every section except `[database]` is optional. Values that are absent fall
//! back to the defaults of the crate that consumes them (the pool manager,
//! the numbering service, the directory).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub database: DatabaseConfig,
    pub pool: Option<PoolConfig>,
    pub directory: Option<DirectoryConfig>,
    pub numbering: Option<NumberingConfig>,
    pub logging: Option<LoggingConfig>,
}

/// Credentials shared by every tenant pool. Only host and database differ
/// between tenants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub user: String,
    pub password: Option<String>,
    /// Name of an environment variable holding the password. Takes
    /// precedence over `password` when set and present.
    pub password_env: Option<String>,
    pub ssl_mode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PoolConfig {
    pub max_conns_per_tenant: Option<u32>,
    pub min_conns_per_tenant: Option<u32>,
    pub connect_timeout: Option<String>,
    pub max_total_pools: Option<usize>,
    pub idle_timeout: Option<String>,
    pub health_check_period: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DirectoryConfig {
    /// redb file holding tenants and counters. Unset keeps the directory in
    /// memory.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NumberingConfig {
    /// `"strict"` or `"cached"`.
    pub strategy: Option<String>,
    pub range_size: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// An `EnvFilter` directive, e.g. `"info,tenantgrid=debug"`.
    pub filter: Option<String>,
    #[serde(default)]
    pub format: LogFormat,
}

impl DatabaseConfig {
    /// The password to use, reading `password_env` first.
    pub fn resolved_password(&self) -> Option<String> {
        self.password_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .or_else(|| self.password.clone())
    }
}

impl GridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: GridConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn pool(&self) -> PoolConfig {
        self.pool.clone().unwrap_or_default()
    }

    pub fn directory(&self) -> DirectoryConfig {
        self.directory.clone().unwrap_or_default()
    }

    pub fn numbering(&self) -> NumberingConfig {
        self.numbering.clone().unwrap_or_default()
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }
}

/// Parse a duration string like `"500ms"`, `"10s"`, `"5m"`, `"1h"` or a bare
/// number of seconds. `"0"` is a valid zero duration.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

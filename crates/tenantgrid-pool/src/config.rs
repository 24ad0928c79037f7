//! Pool manager configuration.

use std::fmt;
use std::time::Duration;

use tenantgrid_core::{GridConfig, parse_duration};

use crate::dsn::SslMode;
use crate::error::{PoolError, PoolResult};

/// Settings handed to the [`PoolOpener`](crate::PoolOpener) for every
/// tenant pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    /// Zero disables driver-level liveness checks.
    pub health_check_period: Duration,
}

/// Configuration for a [`PoolManager`](crate::PoolManager).
#[derive(Clone)]
pub struct ManagerConfig {
    /// Shared by every tenant database.
    pub db_user: String,
    pub db_password: String,
    pub max_conns_per_tenant: u32,
    pub min_conns_per_tenant: u32,
    /// Bounds both opening and the first ping of a new pool.
    pub connect_timeout: Duration,
    /// 0 means unlimited.
    pub max_total_pools: usize,
    /// Zero disables idle eviction.
    pub pool_idle_timeout: Duration,
    /// Zero disables the health-check loop.
    pub health_check_period: Duration,
    pub ssl_mode: SslMode,
}

impl ManagerConfig {
    /// Defaults with the given shared credentials.
    pub fn new(db_user: impl Into<String>, db_password: impl Into<String>) -> Self {
        Self {
            db_user: db_user.into(),
            db_password: db_password.into(),
            max_conns_per_tenant: 10,
            min_conns_per_tenant: 2,
            connect_timeout: Duration::from_secs(10),
            max_total_pools: 100,
            pool_idle_timeout: Duration::from_secs(30 * 60),
            health_check_period: Duration::from_secs(60),
            ssl_mode: SslMode::Disable,
        }
    }

    /// Build from the `[database]` and `[pool]` sections. Absent pool values
    /// keep their defaults.
    pub fn from_grid_config(config: &GridConfig) -> PoolResult<Self> {
        let password = config
            .database
            .resolved_password()
            .ok_or_else(|| PoolError::Config("database password is not set".to_string()))?;
        let mut out = Self::new(config.database.user.clone(), password);

        if let Some(mode) = &config.database.ssl_mode {
            out.ssl_mode = mode.parse().map_err(PoolError::Config)?;
        }

        let pool = config.pool();
        if let Some(max) = pool.max_conns_per_tenant {
            out.max_conns_per_tenant = max;
        }
        if let Some(min) = pool.min_conns_per_tenant {
            out.min_conns_per_tenant = min;
        }
        if let Some(limit) = pool.max_total_pools {
            out.max_total_pools = limit;
        }
        if let Some(d) = pool.connect_timeout.as_deref() {
            out.connect_timeout = duration_field("connect_timeout", d)?;
        }
        if let Some(d) = pool.idle_timeout.as_deref() {
            out.pool_idle_timeout = duration_field("idle_timeout", d)?;
        }
        if let Some(d) = pool.health_check_period.as_deref() {
            out.health_check_period = duration_field("health_check_period", d)?;
        }

        out.validate()?;
        Ok(out)
    }

    pub fn validate(&self) -> PoolResult<()> {
        if self.db_user.is_empty() {
            return Err(PoolError::Config("db_user must not be empty".to_string()));
        }
        if self.db_password.is_empty() {
            return Err(PoolError::Config("db_password must not be empty".to_string()));
        }
        if self.max_conns_per_tenant == 0 {
            return Err(PoolError::Config(
                "max_conns_per_tenant must be at least 1".to_string(),
            ));
        }
        if self.min_conns_per_tenant > self.max_conns_per_tenant {
            return Err(PoolError::Config(format!(
                "min_conns_per_tenant ({}) exceeds max_conns_per_tenant ({})",
                self.min_conns_per_tenant, self.max_conns_per_tenant
            )));
        }
        if self.connect_timeout.is_zero() {
            return Err(PoolError::Config("connect_timeout must be nonzero".to_string()));
        }
        Ok(())
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.max_conns_per_tenant,
            min_connections: self.min_conns_per_tenant,
            connect_timeout: self.connect_timeout,
            health_check_period: self.health_check_period,
        }
    }

    /// Eviction runs at half the idle timeout; `None` when eviction is off.
    pub fn eviction_interval(&self) -> Option<Duration> {
        if self.pool_idle_timeout.is_zero() {
            None
        } else {
            Some(self.pool_idle_timeout / 2)
        }
    }

    pub fn health_check_interval(&self) -> Option<Duration> {
        if self.health_check_period.is_zero() {
            None
        } else {
            Some(self.health_check_period)
        }
    }
}

fn duration_field(name: &str, value: &str) -> PoolResult<Duration> {
    parse_duration(value)
        .ok_or_else(|| PoolError::Config(format!("invalid duration for {name}: '{value}'")))
}

impl fmt::Debug for ManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerConfig")
            .field("db_user", &self.db_user)
            .field("db_password", &"***")
            .field("max_conns_per_tenant", &self.max_conns_per_tenant)
            .field("min_conns_per_tenant", &self.min_conns_per_tenant)
            .field("connect_timeout", &self.connect_timeout)
            .field("max_total_pools", &self.max_total_pools)
            .field("pool_idle_timeout", &self.pool_idle_timeout)
            .field("health_check_period", &self.health_check_period)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

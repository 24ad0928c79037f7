//! Postgres backend built on sqlx.

use std::str::FromStr;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};

use crate::backend::{BoxFuture, ConnectionStats, OpenError, PhysicalPool, PoolOpener};
use crate::config::PoolSettings;

/// Opens a sqlx [`PgPool`] per tenant.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgPoolOpener;

impl PoolOpener for PgPoolOpener {
    type Pool = PgPhysicalPool;

    fn open<'a>(
        &'a self,
        dsn: &'a str,
        settings: &'a PoolSettings,
    ) -> BoxFuture<'a, Result<PgPhysicalPool, OpenError>> {
        Box::pin(async move {
            let options =
                PgConnectOptions::from_str(dsn).map_err(|e| OpenError::InvalidDsn(e.to_string()))?;
            let pool = PgPoolOptions::new()
                .max_connections(settings.max_connections)
                .min_connections(settings.min_connections)
                .acquire_timeout(settings.connect_timeout)
                .test_before_acquire(!settings.health_check_period.is_zero())
                .connect_with(options)
                .await
                .map_err(|e| OpenError::Connect(e.to_string()))?;
            Ok(PgPhysicalPool { pool })
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgPhysicalPool {
    pool: PgPool,
}

impl PgPhysicalPool {
    /// The underlying sqlx pool, for running tenant queries.
    pub fn inner(&self) -> &PgPool {
        &self.pool
    }
}

impl PhysicalPool for PgPhysicalPool {
    fn ping(&self) -> BoxFuture<'_, Result<(), String>> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.pool.close().await })
    }

    fn connection_stats(&self) -> ConnectionStats {
        let total = self.pool.size();
        let idle = u32::try_from(self.pool.num_idle()).unwrap_or(total);
        ConnectionStats {
            total,
            idle,
            acquired: total.saturating_sub(idle),
        }
    }
}

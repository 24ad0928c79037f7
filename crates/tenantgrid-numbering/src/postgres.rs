//! Counters stored inside each tenant's own database.
//!
//! Expects a `document_sequences(sequence_key TEXT PRIMARY KEY,
//! current_value BIGINT NOT NULL)` table in every tenant database. Each call
//! holds a pool lease for the duration of its single statement.

use std::sync::Arc;

use tenantgrid_pool::{PgPoolOpener, PoolManager};

use crate::error::{NumberingError, NumberingResult};
use crate::sequence::SequenceKey;
use crate::store::{CounterFuture, CounterStore};

const INCREMENT_SQL: &str = "INSERT INTO document_sequences (sequence_key, current_value) \
     VALUES ($1, $2) \
     ON CONFLICT (sequence_key) DO UPDATE \
     SET current_value = document_sequences.current_value + EXCLUDED.current_value \
     RETURNING current_value";

const SET_SQL: &str = "INSERT INTO document_sequences (sequence_key, current_value) \
     VALUES ($1, $2) \
     ON CONFLICT (sequence_key) DO UPDATE SET current_value = EXCLUDED.current_value";

const CURRENT_SQL: &str = "SELECT current_value FROM document_sequences WHERE sequence_key = $1";

pub struct PgSequenceStore {
    manager: Arc<PoolManager<PgPoolOpener>>,
}

impl PgSequenceStore {
    pub fn new(manager: Arc<PoolManager<PgPoolOpener>>) -> Self {
        Self { manager }
    }
}

impl CounterStore for PgSequenceStore {
    fn increment<'a>(&'a self, key: &'a SequenceKey, by: u64) -> CounterFuture<'a, u64> {
        Box::pin(async move {
            let lease = self.manager.lease(&key.tenant_id).await?;
            let value = sqlx::query_scalar::<_, i64>(INCREMENT_SQL)
                .bind(key.table_key())
                .bind(to_column(key, by)?)
                .fetch_one(lease.pool().inner())
                .await?;
            from_column(key, value)
        })
    }

    fn set<'a>(&'a self, key: &'a SequenceKey, value: u64) -> CounterFuture<'a, ()> {
        Box::pin(async move {
            let lease = self.manager.lease(&key.tenant_id).await?;
            sqlx::query(SET_SQL)
                .bind(key.table_key())
                .bind(to_column(key, value)?)
                .execute(lease.pool().inner())
                .await?;
            Ok(())
        })
    }

    fn current<'a>(&'a self, key: &'a SequenceKey) -> CounterFuture<'a, u64> {
        Box::pin(async move {
            let lease = self.manager.lease(&key.tenant_id).await?;
            let value = sqlx::query_scalar::<_, i64>(CURRENT_SQL)
                .bind(key.table_key())
                .fetch_optional(lease.pool().inner())
                .await?;
            value.map_or(Ok(0), |v| from_column(key, v))
        })
    }
}

fn to_column(key: &SequenceKey, value: u64) -> NumberingResult<i64> {
    i64::try_from(value).map_err(|_| NumberingError::Overflow(key.to_string()))
}

fn from_column(key: &SequenceKey, value: i64) -> NumberingResult<u64> {
    u64::try_from(value).map_err(|_| {
        NumberingError::InvalidKey(format!("{key} holds negative counter {value}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::{ResetPeriod, SequenceConfig};
    use chrono::NaiveDate;

    fn key() -> SequenceKey {
        let cfg = SequenceConfig::new("INV", ResetPeriod::Never);
        SequenceKey::new("t1", &cfg, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()).unwrap()
    }

    #[test]
    fn column_conversions() {
        let k = key();
        assert_eq!(to_column(&k, 42).unwrap(), 42);
        assert!(matches!(to_column(&k, u64::MAX), Err(NumberingError::Overflow(_))));
        assert_eq!(from_column(&k, 7).unwrap(), 7);
        assert!(from_column(&k, -1).is_err());
    }

    #[test]
    fn upsert_adds_to_existing_value() {
        assert!(INCREMENT_SQL.contains("ON CONFLICT (sequence_key)"));
        assert!(INCREMENT_SQL.contains("current_value + EXCLUDED.current_value"));
        assert!(INCREMENT_SQL.ends_with("RETURNING current_value"));
    }
}
